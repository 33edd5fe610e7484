use bcrypt::{hash, DEFAULT_COST};
use chrono::Utc;
use sqlx::PgPool;
use std::path::{Path, PathBuf};

use crate::database::models::CreateDigitalCertificate;
use crate::database::queries::CertificateQueries;
use crate::error::{SignError, SignResult};
use crate::models::certificate::{CertificateType, UploadedCertificate};
use crate::services::pkcs12::{decode_container, DecodedContainer};

/// Certificate upload orchestration: decode and validate the container,
/// register the certificate as the owner's single active identity, and
/// persist the raw container under an owner-scoped path.
///
/// The passphrase is stored only as a bcrypt hash, used as a fail-fast
/// UI hint. It is never the authorization boundary: every later signing
/// operation re-decrypts the container with a caller-supplied passphrase.
pub async fn ingest_certificate(
    pool: &PgPool,
    upload_dir: &str,
    owner_id: i64,
    declared_type: CertificateType,
    container: Vec<u8>,
    passphrase: &str,
) -> SignResult<UploadedCertificate> {
    if declared_type != CertificateType::A1 {
        return Err(SignError::CertificateNotValid(
            "hardware-token certificates (a3/a4) hold their keys on the token and cannot be uploaded as containers"
                .to_string(),
        ));
    }

    // Container decode is CPU-bound; keep it off the request-serving path.
    let decoded = {
        let bytes = container.clone();
        let pass = passphrase.to_string();
        tokio::task::spawn_blocking(move || decode_container(&bytes, &pass))
            .await
            .map_err(|e| SignError::Crypto(format!("decode task failed: {}", e)))??
    };

    // Keep the metadata, drop certificate and private key right here.
    let DecodedContainer {
        issuer,
        subject,
        serial_number,
        valid_from,
        valid_to,
        certificate_pem,
        public_key_pem,
        ..
    } = decoded;

    // Temporal validation at upload; sign-time re-checks independently.
    let now = Utc::now();
    if now < valid_from {
        return Err(SignError::CertificateNotValid(format!(
            "certificate is not valid before {}",
            valid_from
        )));
    }
    if now > valid_to {
        return Err(SignError::CertificateNotValid(format!(
            "certificate expired at {}",
            valid_to
        )));
    }

    if CertificateQueries::serial_exists(pool, &serial_number).await? {
        return Err(SignError::DuplicateSerial(serial_number));
    }

    let passphrase_hash = hash(passphrase, DEFAULT_COST)
        .map_err(|e| SignError::Crypto(format!("failed to hash passphrase: {}", e)))?;
    let fingerprint = format!("{:x}", md5::compute(&container));
    let file_path = container_path(upload_dir, owner_id, &serial_number);

    let row = CertificateQueries::insert_active(
        pool,
        CreateDigitalCertificate {
            owner_id,
            certificate_type: declared_type.to_string(),
            issuer: Some(issuer.clone()),
            subject: Some(subject.clone()),
            serial_number: serial_number.clone(),
            valid_from,
            valid_to,
            certificate_pem,
            public_key_pem,
            pfx_file_path: Some(file_path.to_string_lossy().to_string()),
            pfx_passphrase_hash: Some(passphrase_hash),
            fingerprint: Some(fingerprint),
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            SignError::DuplicateSerial(serial_number.clone())
        } else {
            SignError::Database(e)
        }
    })?;

    // Compensation: the row exists and is active, so a failed container
    // write must revoke it immediately. An active certificate with no
    // usable key material is a forbidden state at all times.
    if let Err(e) = persist_container(&file_path, &container).await {
        eprintln!(
            "❌ ingest: container write failed for certificate {}: {}",
            row.id, e
        );
        if let Err(revoke_err) =
            CertificateQueries::revoke(pool, row.id, "container persistence failed").await
        {
            eprintln!(
                "❌ ingest: compensating revocation failed for certificate {}: {}",
                row.id, revoke_err
            );
        }
        return Err(SignError::Storage(format!(
            "failed to persist container: {}",
            e
        )));
    }

    Ok(UploadedCertificate {
        id: row.id,
        subject,
        issuer,
        serial_number,
        valid_from,
        valid_to,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub fn container_path(upload_dir: &str, owner_id: i64, serial_number: &str) -> PathBuf {
    Path::new(upload_dir)
        .join("certificates")
        .join(owner_id.to_string())
        .join(format!("{}.pfx", serial_number))
}

async fn persist_container(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_paths_are_owner_scoped() {
        let path = container_path("uploads", 42, "0badc0de");
        assert_eq!(
            path,
            Path::new("uploads/certificates/42/0badc0de.pfx")
        );
    }
}
