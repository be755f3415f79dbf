//! Powertable plugin for Benana.
//!
//! Owns the `powertable_*` tables, serves a greeting route, and publishes
//! an [`Echo`] service that other plugins look up by [`ECHO_SERVICE`].

use std::path::{Path, PathBuf};

use axum::Json;
use axum::extract::Query;
use axum::routing::get;
use benana_sdk::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgConnection;
use tracing::debug;

pub const PLUGIN_NAME: &str = "powertable";

/// Service registry key of the [`Echo`] service.
pub const ECHO_SERVICE: &str = "powertable.echo";

/// Trivial capability shared with other plugins.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl Echo {
    pub fn echo(&self, input: &str) -> String {
        input.to_string()
    }
}

#[derive(Debug, Default)]
pub struct PowertablePlugin;

#[derive(Debug, Deserialize)]
struct EchoParams {
    text: Option<String>,
}

async fn hello() -> Json<Value> {
    Json(json!({
        "plugin": PLUGIN_NAME,
        "message": "Hello from powertable",
    }))
}

async fn echo(Query(params): Query<EchoParams>) -> Json<Value> {
    let text = params.text.unwrap_or_default();
    Json(json!({ "echo": Echo.echo(&text) }))
}

#[async_trait]
impl Plugin for PowertablePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Editable tables with an echo service for other plugins"
    }

    fn migrations_dir(&self, plugin_root: &Path) -> PathBuf {
        plugin_root.join("migrations")
    }

    fn on_load(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        ctx.services().register(ECHO_SERVICE, Echo);
        Ok(())
    }

    fn register_routes(&self, routes: &mut RouteTable) {
        routes.route("/hello", get(hello)).route("/echo", get(echo));
    }

    fn permissions(&self) -> Vec<Permission> {
        vec![
            Permission::new("powertable:view").with_description("View powertable"),
            Permission::new("powertable:edit").with_description("Edit powertable"),
        ]
    }

    async fn seed(&self, conn: &mut PgConnection) -> anyhow::Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO powertable_tables (name, created_at) VALUES ($1, $2) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind("default")
        .bind(now)
        .execute(conn)
        .await?;
        debug!(rows = result.rows_affected(), "seeded powertable");
        Ok(())
    }

    fn on_unload(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        ctx.services().unregister(ECHO_SERVICE);
        Ok(())
    }
}

/// Factory the host resolves for this package.
pub fn plugin() -> Box<dyn Plugin> {
    Box::new(PowertablePlugin)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn context() -> PluginContext {
        PluginContext::new(
            PLUGIN_NAME,
            Arc::new(ServiceRegistry::new()),
            Arc::new(PermissionRegistry::new()),
        )
    }

    #[test]
    fn echo_service_lives_between_load_and_unload() {
        let plugin = plugin();
        let ctx = context();

        plugin.on_load(&ctx).unwrap();
        let echo = ctx.services().get::<Echo>(ECHO_SERVICE).unwrap();
        assert_eq!(echo.echo("warmup"), "warmup");

        plugin.on_unload(&ctx).unwrap();
        assert!(!ctx.services().contains(ECHO_SERVICE));
    }

    #[test]
    fn declares_namespaced_permissions() {
        let keys: Vec<String> = plugin().permissions().into_iter().map(|p| p.key).collect();
        assert_eq!(keys, vec!["powertable:view", "powertable:edit"]);
    }

    #[tokio::test]
    async fn hello_route_answers() {
        let mut table = RouteTable::new();
        plugin().register_routes(&mut table);
        assert_eq!(table.paths(), ["/hello", "/echo"]);

        let response = table
            .into_router()
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["plugin"], "powertable");
    }
}
