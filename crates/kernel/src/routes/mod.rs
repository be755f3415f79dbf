//! HTTP route handlers.

pub mod health;
pub mod plugin_admin;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::plugin::mount;
use crate::state::AppState;

/// Build the full application router.
///
/// Admin routes sit behind the admin token check; plugin routes are
/// dispatched through the mount table so unloading takes effect at once.
pub fn app(state: AppState) -> Router {
    let admin = plugin_admin::router().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        crate::middleware::require_admin_token,
    ));

    Router::new()
        .merge(health::router())
        .merge(admin)
        .merge(mount::router(state.mounts()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
