//! Reports plugin for Benana.
//!
//! Uses the powertable echo service when it is available. Load order is
//! not guaranteed for explicit loads, so a missing service is tolerated.

use std::path::{Path, PathBuf};

use axum::Json;
use axum::routing::get;
use benana_sdk::prelude::*;
use powertable::{ECHO_SERVICE, Echo};
use serde_json::{Value, json};
use tracing::{debug, warn};

pub const PLUGIN_NAME: &str = "reports";

#[derive(Debug, Default)]
pub struct ReportsPlugin;

async fn summary() -> Json<Value> {
    Json(json!({
        "plugin": PLUGIN_NAME,
        "summary": { "users": 0, "reports": 0 },
    }))
}

#[async_trait]
impl Plugin for ReportsPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Reports over powertable data"
    }

    fn migrations_dir(&self, plugin_root: &Path) -> PathBuf {
        plugin_root.join("migrations")
    }

    fn on_load(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        match ctx.services().get::<Echo>(ECHO_SERVICE) {
            Ok(echo) => debug!(reply = %echo.echo("warmup"), "powertable echo available"),
            Err(ServiceError::NotFound { .. }) => {
                debug!("powertable echo not registered, continuing without it");
            }
            Err(e) => warn!(error = %e, "powertable echo unusable"),
        }
        Ok(())
    }

    fn register_routes(&self, routes: &mut RouteTable) {
        routes.route("/summary", get(summary));
    }

    fn permissions(&self) -> Vec<Permission> {
        vec![Permission::new("reports:view").with_description("View reports")]
    }
}

/// Factory the host resolves for this package.
pub fn plugin() -> Box<dyn Plugin> {
    Box::new(ReportsPlugin)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn context(services: Arc<ServiceRegistry>) -> PluginContext {
        PluginContext::new(PLUGIN_NAME, services, Arc::new(PermissionRegistry::new()))
    }

    #[test]
    fn loads_without_powertable() {
        let ctx = context(Arc::new(ServiceRegistry::new()));
        assert!(plugin().on_load(&ctx).is_ok());
    }

    #[test]
    fn loads_with_wrongly_typed_service() {
        let services = Arc::new(ServiceRegistry::new());
        services.register(ECHO_SERVICE, "not an echo".to_string());
        assert!(plugin().on_load(&context(services)).is_ok());
    }

    #[test]
    fn loads_after_powertable() {
        let services = Arc::new(ServiceRegistry::new());
        let ctx = context(services.clone());
        powertable::plugin()
            .on_load(&PluginContext::new(
                "powertable",
                services,
                Arc::new(PermissionRegistry::new()),
            ))
            .unwrap();
        assert!(plugin().on_load(&ctx).is_ok());
    }
}
