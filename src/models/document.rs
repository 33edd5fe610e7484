use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::database::models::DbClinicalDocument;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClinicalDocument {
    pub id: i64,
    pub owner_id: i64,
    pub document_type: String,
    pub title: String,
    pub content: String,
    pub signature: Option<String>,
    pub signature_method: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbClinicalDocument> for ClinicalDocument {
    fn from(row: DbClinicalDocument) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            document_type: row.document_type,
            title: row.title,
            content: row.content,
            signature: row.signature,
            signature_method: row.signature_method,
            signed_at: row.signed_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateDocumentRequest {
    pub document_type: String,
    pub title: String,
    pub content: String,
}
