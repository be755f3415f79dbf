//! Runtime-gated mounting of plugin routes.
//!
//! axum routers are fixed once served, so plugin routes are not merged into
//! the host router. Instead a single dispatcher serves `/plugins/{name}/...`
//! and forwards to whatever route table is currently mounted for `name`.
//! Unloading a plugin removes its table, and its routes answer 404 from the
//! next request on.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use parking_lot::RwLock;
use tower::ServiceExt;
use tracing::debug;

/// URL prefix under which plugin route tables are mounted.
pub const PLUGIN_ROUTE_PREFIX: &str = "/plugins";

/// Plugin name → currently mounted route table.
#[derive(Debug, Default)]
pub struct MountTable {
    routes: RwLock<HashMap<String, Router>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount (or replace) the route table for `plugin`.
    pub fn mount(&self, plugin: &str, router: Router) {
        self.routes.write().insert(plugin.to_string(), router);
    }

    /// Remove the route table for `plugin`. Unmounting twice is a no-op.
    pub fn unmount(&self, plugin: &str) {
        self.routes.write().remove(plugin);
    }

    /// The mounted route table for `plugin`, if any.
    pub fn get(&self, plugin: &str) -> Option<Router> {
        self.routes.read().get(plugin).cloned()
    }

    pub fn is_mounted(&self, plugin: &str) -> bool {
        self.routes.read().contains_key(plugin)
    }

    /// Mounted plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forward `request` to the table mounted for `plugin`, with the
    /// `/plugins/{plugin}` prefix stripped from its path.
    ///
    /// The forwarded path is cut from the raw request URI, so percent-encoded
    /// bytes reach the plugin's router exactly as the client sent them.
    pub async fn dispatch(&self, plugin: &str, mut request: Request<Body>) -> Response {
        let Some(router) = self.get(plugin) else {
            debug!(plugin, "request for unmounted plugin");
            return StatusCode::NOT_FOUND.into_response();
        };

        let rest = forwarded_path(request.uri().path());
        let path_and_query = match request.uri().query() {
            Some(query) => format!("{rest}?{query}"),
            None => rest.to_string(),
        };
        match path_and_query.parse::<Uri>() {
            Ok(uri) => *request.uri_mut() = uri,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        }

        let result: Result<Response, Infallible> = router.oneshot(request).await;
        match result {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

/// Path below `/plugins/{plugin}` in a raw request path, always starting
/// with `/`.
fn forwarded_path(path: &str) -> &str {
    let below_prefix = path.strip_prefix(PLUGIN_ROUTE_PREFIX).unwrap_or(path);
    let below_prefix = below_prefix.strip_prefix('/').unwrap_or(below_prefix);
    below_prefix
        .find('/')
        .and_then(|i| below_prefix.get(i..))
        .unwrap_or("/")
}

async fn dispatch_root(
    State(mounts): State<Arc<MountTable>>,
    Path(plugin): Path<String>,
    request: Request<Body>,
) -> Response {
    mounts.dispatch(&plugin, request).await
}

async fn dispatch_nested(
    State(mounts): State<Arc<MountTable>>,
    Path((plugin, _rest)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    mounts.dispatch(&plugin, request).await
}

/// Router that serves every mounted plugin under [`PLUGIN_ROUTE_PREFIX`].
pub fn router<S>(mounts: Arc<MountTable>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(&format!("{PLUGIN_ROUTE_PREFIX}/{{plugin}}"), any(dispatch_root))
        .route(
            &format!("{PLUGIN_ROUTE_PREFIX}/{{plugin}}/{{*rest}}"),
            any(dispatch_nested),
        )
        .with_state(mounts)
}
