//! HTTP/JSON facade: one module per resource area, mirroring the command
//! surface. `default` is the sentinel branch id in URLs; endpoints
//! without a branch segment operate on main implicitly.

pub mod api_keys;
pub mod backend;
pub mod branches;
pub mod buckets;
pub mod driver;
pub mod files;
pub mod pgwire;
pub mod s3;
pub mod settings;
pub mod snapshots;
pub mod tables;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use cormorant_protocol::http_types::HealthResponse;
use tower_http::trace::TraceLayer;

use crate::middleware;
use crate::state::App;

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn metrics_handler(State(app): State<Arc<App>>) -> impl IntoResponse {
    crate::metrics::ACTIVE_TABLE_LOCKS.set(app.storage.locks().active_locks_count() as i64);
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
}

/// Build the full application router.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        // Backend administration
        .route("/backend/init", post(backend::init_backend))
        .route("/backend/remove", post(backend::remove_backend))
        // Command service
        .route("/driver/execute", post(driver::execute))
        // Projects
        .route(
            "/projects",
            post(backend::create_project).get(backend::list_projects),
        )
        .route(
            "/projects/:project_id",
            get(backend::get_project)
                .put(backend::update_project)
                .delete(backend::delete_project),
        )
        .route("/projects/:project_id/stats", get(backend::project_stats))
        // Buckets (branch-scoped URLs; buckets are shared across branches)
        .route(
            "/projects/:project_id/branches/:branch_id/buckets",
            post(buckets::create_bucket).get(buckets::list_buckets),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name",
            delete(buckets::delete_bucket),
        )
        // Tables
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables",
            post(tables::create_table).get(tables::list_tables),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name",
            get(tables::get_table).delete(tables::delete_table),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/preview",
            get(tables::preview_table),
        )
        // Schema evolution
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/columns",
            post(tables::add_column),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/columns/:column_name",
            put(tables::alter_column).delete(tables::drop_column),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/primary-key",
            post(tables::add_primary_key).delete(tables::drop_primary_key),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/rows/delete",
            post(tables::delete_rows),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/truncate",
            post(tables::truncate_table),
        )
        // Import / export
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/import/file",
            post(tables::import_from_file),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/buckets/:bucket_name/tables/:table_name/export",
            post(tables::export_to_file),
        )
        // Branches
        .route(
            "/projects/:project_id/branches",
            post(branches::create_branch).get(branches::list_branches),
        )
        .route(
            "/projects/:project_id/branches/:branch_id",
            get(branches::get_branch).delete(branches::delete_branch),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/tables/:bucket_name/:table_name/pull",
            post(branches::pull_table),
        )
        // Snapshots (default branch only)
        .route(
            "/projects/:project_id/branches/:branch_id/snapshots",
            post(snapshots::create_snapshot).get(snapshots::list_snapshots),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/snapshots/:snapshot_id",
            get(snapshots::get_snapshot).delete(snapshots::delete_snapshot),
        )
        .route(
            "/projects/:project_id/branches/:branch_id/snapshots/:snapshot_id/restore",
            post(snapshots::restore_snapshot),
        )
        // Snapshot settings at the three scopes
        .route(
            "/projects/:project_id/settings/snapshots",
            get(settings::get_project_settings)
                .put(settings::put_project_settings)
                .delete(settings::delete_project_settings),
        )
        .route(
            "/projects/:project_id/buckets/:bucket_name/settings/snapshots",
            get(settings::get_bucket_settings)
                .put(settings::put_bucket_settings)
                .delete(settings::delete_bucket_settings),
        )
        .route(
            "/projects/:project_id/buckets/:bucket_name/tables/:table_name/settings/snapshots",
            get(settings::get_table_settings)
                .put(settings::put_table_settings)
                .delete(settings::delete_table_settings),
        )
        // API keys
        .route(
            "/projects/:project_id/api-keys",
            post(api_keys::create_api_key).get(api_keys::list_api_keys),
        )
        .route(
            "/projects/:project_id/api-keys/:key_id",
            get(api_keys::get_api_key).delete(api_keys::revoke_api_key),
        )
        .route(
            "/projects/:project_id/api-keys/:key_id/rotate",
            post(api_keys::rotate_api_key),
        )
        // Files
        .route(
            "/projects/:project_id/files/prepare",
            post(files::prepare_upload),
        )
        .route(
            "/projects/:project_id/files/upload/:upload_key",
            post(files::upload_file),
        )
        .route(
            "/projects/:project_id/files",
            post(files::register_file).get(files::list_files),
        )
        .route(
            "/projects/:project_id/files/:file_id",
            get(files::get_file).delete(files::delete_file),
        )
        .route(
            "/projects/:project_id/files/:file_id/download",
            get(files::download_file),
        )
        // Wire-session bridge (internal surface)
        .route("/internal/pgwire/auth", post(pgwire::authenticate))
        .route(
            "/internal/pgwire/sessions",
            post(pgwire::create_session).get(pgwire::list_sessions),
        )
        .route(
            "/internal/pgwire/sessions/cleanup",
            post(pgwire::cleanup_stale),
        )
        .route(
            "/internal/pgwire/sessions/:session_id",
            get(pgwire::get_session).delete(pgwire::close_session),
        )
        .route(
            "/internal/pgwire/sessions/:session_id/activity",
            patch(pgwire::update_activity),
        )
        // S3-compatible surface
        .route("/s3/:bucket", get(s3::list_objects))
        .route(
            "/s3/:bucket/*key",
            get(s3::get_object)
                .put(s3::put_object)
                .head(s3::head_object)
                .delete(s3::delete_object),
        )
        .layer(axum::middleware::from_fn_with_state(
            app.clone(),
            middleware::operation_timeout,
        ))
        .layer(axum::middleware::from_fn_with_state(
            app.clone(),
            middleware::idempotency::idempotency,
        ))
        .layer(axum::middleware::from_fn(middleware::http_metrics))
        .layer(axum::middleware::from_fn(
            middleware::request_id::request_id,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
