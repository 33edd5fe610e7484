use axum::{
    extract::{Extension, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::common::responses::ApiResponse;
use crate::database::queries::{DocumentQueries, SignedDocumentQueries};
use crate::models::signed_document::SignedDocumentEntry;
use crate::routes::web::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditFilter {
    /// Restrict the listing to one document (must belong to the caller).
    pub document_id: Option<i64>,
}

/// Read-only audit ledger listing for compliance reporting. Without a
/// document filter the listing covers the caller's own signatures.
#[utoipa::path(
    get,
    path = "/api/audit",
    params(AuditFilter),
    responses(
        (status = 200, description = "Audit entries", body = crate::common::responses::AuditListResponse),
        (status = 403, description = "Filtered document belongs to another owner"),
        (status = 404, description = "Filtered document not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_audit(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    Query(filter): Query<AuditFilter>,
) -> (StatusCode, Json<ApiResponse<Vec<SignedDocumentEntry>>>) {
    let pool = state.lock().await.db_pool.clone();

    let rows = match filter.document_id {
        Some(document_id) => {
            match DocumentQueries::find_by_id(&pool, document_id).await {
                Ok(Some(document)) if document.owner_id == owner_id => {}
                Ok(Some(_)) => {
                    return ApiResponse::forbidden(
                        "Document belongs to another owner".to_string(),
                    );
                }
                Ok(None) => {
                    return ApiResponse::not_found("Document not found".to_string());
                }
                Err(e) => {
                    eprintln!("❌ audit: document {}: {}", document_id, e);
                    return ApiResponse::internal_error("Failed to fetch document".to_string());
                }
            }
            SignedDocumentQueries::list_for_document(&pool, document_id).await
        }
        None => SignedDocumentQueries::list_for_signer(&pool, owner_id).await,
    };

    match rows {
        Ok(rows) => {
            let entries: Vec<SignedDocumentEntry> =
                rows.into_iter().map(SignedDocumentEntry::from).collect();
            ApiResponse::success(entries, "Audit entries retrieved".to_string())
        }
        Err(e) => {
            eprintln!("❌ audit: listing failed: {}", e);
            ApiResponse::internal_error("Failed to fetch audit entries".to_string())
        }
    }
}
