use chrono::{DateTime, Utc};

/// Row in `digital_certificates`. One owner, never hard-deleted; at most
/// one row per owner carries `is_active = true`.
#[derive(Debug, Clone)]
pub struct DbDigitalCertificate {
    pub id: i64,
    pub owner_id: i64,
    pub certificate_type: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub certificate_pem: String,
    pub public_key_pem: String,
    pub pfx_file_path: Option<String>,
    pub pfx_passphrase_hash: Option<String>,
    pub fingerprint: Option<String>,
    pub is_hardware_token: bool,
    pub token_serial_number: Option<String>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDigitalCertificate {
    pub owner_id: i64,
    pub certificate_type: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub certificate_pem: String,
    pub public_key_pem: String,
    pub pfx_file_path: Option<String>,
    pub pfx_passphrase_hash: Option<String>,
    pub fingerprint: Option<String>,
}

/// Row in the append-only `signed_documents` ledger.
#[derive(Debug, Clone)]
pub struct DbSignedDocument {
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

#[derive(Debug, Clone)]
pub struct CreateSignedDocument {
    pub document_type: String,
    pub document_id: i64,
    pub certificate_id: i64,
    pub signer_id: i64,
    pub signature_algorithm: String,
    pub signature_value: String,
    pub signature_hash: String,
    pub is_valid: Option<bool>,
    pub validated_at: Option<DateTime<Utc>>,
}

/// Row in `clinical_documents`. The signature fields are written exactly
/// once; a signed document never transitions back.
#[derive(Debug, Clone)]
pub struct DbClinicalDocument {
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

#[derive(Debug, Clone)]
pub struct CreateClinicalDocument {
    pub owner_id: i64,
    pub document_type: String,
    pub title: String,
    pub content: String,
}
