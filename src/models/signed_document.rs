use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::database::models::DbSignedDocument;
use crate::models::certificate::SignerCertificate;

/// Audit ledger entry as exposed to compliance reporting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedDocumentEntry {
    pub id: i64,
    pub document_type: String,
    pub document_id: i64,
    pub certificate_id: i64,
    pub signer_id: i64,
    pub signature_algorithm: String,
    pub signature_value: String,
    pub signature_hash: String,
    pub is_valid: Option<bool>,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbSignedDocument> for SignedDocumentEntry {
    fn from(row: DbSignedDocument) -> Self {
        Self {
            id: row.id,
            document_type: row.document_type,
            document_id: row.document_id,
            certificate_id: row.certificate_id,
            signer_id: row.signer_id,
            signature_algorithm: row.signature_algorithm,
            signature_value: row.signature_value,
            signature_hash: row.signature_hash,
            is_valid: row.is_valid,
            validated_at: row.validated_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SignDocumentRequest {
    /// Container passphrase, required on every signing call. Only a
    /// one-way hash of it is ever stored.
    pub passphrase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignDocumentResponse {
    pub signature: String,
    pub signature_algorithm: String,
    pub signed_at: DateTime<Utc>,
    pub certificate_info: SignerCertificate,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerifySignatureResponse {
    pub valid: bool,
    pub signature_hash: String,
    pub signature_algorithm: String,
    pub validated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedPdfResponse {
    pub pdf_base64: String,
    /// True when the input had no cross-reference table and the signature
    /// block was appended after the document instead of spliced before it.
    pub degraded: bool,
    pub signed_at: DateTime<Utc>,
    pub certificate_info: SignerCertificate,
}
