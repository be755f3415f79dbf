//! Route table a plugin fills during `register_routes`.
//!
//! Paths are relative to the plugin's namespace; the host mounts the
//! finished table under `/plugins/<name>`.

use axum::Router;
use axum::routing::MethodRouter;

/// A mountable set of routes owned by one plugin.
#[derive(Debug, Default)]
pub struct RouteTable {
    router: Router,
    paths: Vec<String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, e.g. `table.route("/hello", get(hello))`.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> &mut Self {
        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, method_router);
        self.paths.push(path.to_string());
        self
    }

    /// Merge a prebuilt router into the table.
    pub fn merge(&mut self, other: Router) -> &mut Self {
        let router = std::mem::take(&mut self.router);
        self.router = router.merge(other);
        self
    }

    /// Paths added through [`RouteTable::route`].
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Consume the table, returning the router to mount.
    pub fn into_router(self) -> Router {
        self.router
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    #[tokio::test]
    async fn routes_are_served_by_the_built_router() {
        let mut table = RouteTable::new();
        table
            .route("/hello", get(|| async { "hello" }))
            .route("/bye", get(|| async { "bye" }));

        assert_eq!(table.paths(), ["/hello", "/bye"]);

        let router = table.into_router();
        let response = router
            .clone()
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
