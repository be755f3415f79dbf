//! Admin routes for plugin management.
//!
//! JSON API over the plugin manager: list, enable, disable, reload,
//! install from an uploaded archive, and migration inspection/rollback.

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::plugin::MigrationRecord;
use crate::state::AppState;

/// Largest plugin archive accepted by the install endpoint.
const MAX_ARCHIVE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct PluginList {
    available: Vec<String>,
    loaded: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    status: &'static str,
    name: String,
}

impl ActionResponse {
    fn new(status: &'static str, name: impl Into<String>) -> Json<Self> {
        Json(Self {
            status,
            name: name.into(),
        })
    }
}

#[derive(Debug, Serialize)]
struct MigrationList {
    plugin: String,
    applied: Vec<MigrationRecord>,
}

#[derive(Debug, Serialize)]
struct RollbackResponse {
    status: &'static str,
    name: String,
    rolled_back: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RollbackParams {
    steps: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PermissionRow {
    plugin: String,
    key: String,
    description: Option<String>,
}

/// GET /admin/plugins
async fn list_plugins(State(state): State<AppState>) -> Json<PluginList> {
    let manager = state.plugins();
    Json(PluginList {
        available: manager.discover(),
        loaded: manager.loaded_names(),
    })
}

/// POST /admin/plugins/{name}/enable
///
/// Any load failure is reported as 400 with the error message.
async fn enable_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ActionResponse>> {
    state
        .plugins()
        .load(&name)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(ActionResponse::new("enabled", name))
}

/// POST /admin/plugins/{name}/disable
async fn disable_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ActionResponse>> {
    state.plugins().disable(&name).await?;
    Ok(ActionResponse::new("disabled", name))
}

/// POST /admin/plugins/{name}/reload
async fn reload_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ActionResponse>> {
    state.plugins().reload(&name).await?;
    Ok(ActionResponse::new("reloaded", name))
}

/// POST /admin/plugins/install
///
/// Expects a multipart form with the archive in the `file` field.
async fn install_plugin(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<ActionResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("upload has no file name".to_string()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read upload: {e}")))?;

        let name = state.plugins().install(&file_name, data.to_vec()).await?;
        info!(plugin = %name, archive = %file_name, "plugin installed via admin API");
        return Ok(ActionResponse::new("installed", name));
    }

    Err(AppError::BadRequest(
        "missing multipart field 'file'".to_string(),
    ))
}

/// GET /admin/plugins/{name}/migrations
async fn list_migrations(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<MigrationList>> {
    let applied = state.plugins().applied_migrations(&name).await?;
    Ok(Json(MigrationList {
        plugin: name,
        applied,
    }))
}

/// POST /admin/plugins/{name}/rollback?steps=N
async fn rollback_migrations(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<RollbackParams>,
) -> AppResult<Json<RollbackResponse>> {
    let steps = params.steps.unwrap_or(1);
    let rolled_back = state.plugins().rollback(&name, steps).await?;
    Ok(Json(RollbackResponse {
        status: "rolled_back",
        name,
        rolled_back,
    }))
}

/// GET /admin/permissions
async fn list_permissions(State(state): State<AppState>) -> Json<Vec<PermissionRow>> {
    let mut rows: Vec<PermissionRow> = state
        .plugins()
        .permissions()
        .list_all()
        .into_iter()
        .map(|(plugin, permission)| PermissionRow {
            plugin,
            key: permission.key,
            description: permission.description,
        })
        .collect();
    rows.sort_by(|a, b| (&a.plugin, &a.key).cmp(&(&b.plugin, &b.key)));
    Json(rows)
}

/// Create the plugin admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/plugins", get(list_plugins))
        .route(
            "/admin/plugins/install",
            post(install_plugin).layer(DefaultBodyLimit::max(MAX_ARCHIVE_BYTES)),
        )
        .route("/admin/plugins/{name}/enable", post(enable_plugin))
        .route("/admin/plugins/{name}/disable", post(disable_plugin))
        .route("/admin/plugins/{name}/reload", post(reload_plugin))
        .route("/admin/plugins/{name}/migrations", get(list_migrations))
        .route("/admin/plugins/{name}/rollback", post(rollback_migrations))
        .route("/admin/permissions", get(list_permissions))
}
