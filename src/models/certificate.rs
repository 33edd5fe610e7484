use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::database::models::DbDigitalCertificate;

/// A1 identities are software containers; A3/A4 live on hardware tokens
/// whose keys never leave the device and therefore never enter the
/// container upload path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    A1,
    A3,
    A4,
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateType::A1 => write!(f, "a1"),
            CertificateType::A3 => write!(f, "a3"),
            CertificateType::A4 => write!(f, "a4"),
        }
    }
}

impl std::str::FromStr for CertificateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "a1" => Ok(CertificateType::A1),
            "a3" => Ok(CertificateType::A3),
            "a4" => Ok(CertificateType::A4),
            _ => Err(format!("Invalid certificate type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Active,
    Inactive,
    Revoked,
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateStatus::Active => write!(f, "active"),
            CertificateStatus::Inactive => write!(f, "inactive"),
            CertificateStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// Metadata of the certificate that produced a signature, echoed back to
/// the caller with every signing response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignerCertificate {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

/// Certificate listing entry. Container bytes, file path and passphrase
/// hash never leave the server.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CertificateInfo {
    pub id: i64,
    pub certificate_type: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub status: CertificateStatus,
    pub fingerprint: Option<String>,
    pub is_hardware_token: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<DbDigitalCertificate> for CertificateInfo {
    fn from(cert: DbDigitalCertificate) -> Self {
        let status = if cert.revoked_at.is_some() {
            CertificateStatus::Revoked
        } else if cert.is_active {
            CertificateStatus::Active
        } else {
            CertificateStatus::Inactive
        };
        Self {
            id: cert.id,
            certificate_type: cert.certificate_type,
            issuer: cert.issuer,
            subject: cert.subject,
            serial_number: cert.serial_number,
            valid_from: cert.valid_from,
            valid_to: cert.valid_to,
            status,
            fingerprint: cert.fingerprint,
            is_hardware_token: cert.is_hardware_token,
            revoked_at: cert.revoked_at,
            revoked_reason: cert.revoked_reason,
            last_used_at: cert.last_used_at,
            usage_count: cert.usage_count,
            created_at: cert.created_at,
        }
    }
}

/// Upload response: what the caller needs to confirm which identity was
/// registered.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadedCertificate {
    pub id: i64,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RevokeCertificateRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmbeddedCertificateInfo {
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub serial_number: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub common_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PdfSignatureEntry {
    pub filter: Option<String>,
    pub subfilter: Option<String>,
    pub name: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub signing_time: Option<DateTime<Utc>>,
    pub contents_length: usize,
    pub certificate: Option<EmbeddedCertificateInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PdfSignatureReport {
    pub signature_count: usize,
    pub signatures: Vec<PdfSignatureEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn certificate_type_round_trips() {
        for (text, expected) in [
            ("a1", CertificateType::A1),
            ("A3", CertificateType::A3),
            ("a4", CertificateType::A4),
        ] {
            assert_eq!(CertificateType::from_str(text).unwrap(), expected);
        }
        assert!(CertificateType::from_str("a2").is_err());
        assert_eq!(CertificateType::A1.to_string(), "a1");
    }

    #[test]
    fn status_derivation_prefers_revoked() {
        let mut cert = DbDigitalCertificate {
            id: 1,
            owner_id: 1,
            certificate_type: "a1".to_string(),
            issuer: None,
            subject: None,
            serial_number: "ab".to_string(),
            valid_from: Utc::now(),
            valid_to: Utc::now(),
            certificate_pem: String::new(),
            public_key_pem: String::new(),
            pfx_file_path: None,
            pfx_passphrase_hash: None,
            fingerprint: None,
            is_hardware_token: false,
            token_serial_number: None,
            is_active: false,
            revoked_at: Some(Utc::now()),
            revoked_reason: Some("compromised".to_string()),
            last_used_at: None,
            usage_count: 0,
            created_at: Utc::now(),
        };
        assert_eq!(CertificateInfo::from(cert.clone()).status, CertificateStatus::Revoked);

        cert.revoked_at = None;
        cert.is_active = true;
        assert_eq!(CertificateInfo::from(cert.clone()).status, CertificateStatus::Active);

        cert.is_active = false;
        assert_eq!(CertificateInfo::from(cert).status, CertificateStatus::Inactive);
    }
}
