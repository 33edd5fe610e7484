use axum::{
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::common::jwt::auth_middleware;
use crate::database::connection::DbPool;
use crate::routes::{audit, certificates, documents};

#[derive(Clone)]
pub struct AppStateData {
    pub db_pool: DbPool,
    pub upload_dir: String,
}

pub type AppState = Arc<Mutex<AppStateData>>;

pub fn create_router() -> Router<AppState> {
    let auth_routes = Router::new()
        .route(
            "/certificates",
            post(certificates::upload_certificate).get(certificates::list_certificates),
        )
        .route("/certificates/:id/revoke", post(certificates::revoke_certificate))
        .route("/documents", post(documents::create_document))
        .route("/documents/:id", get(documents::get_document))
        .route("/documents/:id/sign", post(documents::sign_document))
        .route("/documents/:id/verify", post(documents::verify_document))
        .route("/documents/:id/sign-pdf", post(documents::sign_document_pdf))
        .route("/pdf/inspect", post(documents::inspect_pdf))
        .route("/audit", get(audit::list_audit))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        .nest("/api", auth_routes)
        .route("/health", get(health_check))
}

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
