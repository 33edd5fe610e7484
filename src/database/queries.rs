use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::models::{
    CreateClinicalDocument, CreateDigitalCertificate, CreateSignedDocument, DbClinicalDocument,
    DbDigitalCertificate, DbSignedDocument,
};

// Structured query implementations, one namespace per table.
pub struct CertificateQueries;
pub struct DocumentQueries;
pub struct SignedDocumentQueries;

const CERTIFICATE_COLUMNS: &str = "id, owner_id, certificate_type, issuer, subject, serial_number, \
     valid_from, valid_to, certificate_pem, public_key_pem, pfx_file_path, pfx_passphrase_hash, \
     fingerprint, is_hardware_token, token_serial_number, is_active, revoked_at, revoked_reason, \
     last_used_at, usage_count, created_at";

const SIGNED_DOCUMENT_COLUMNS: &str = "id, document_type, document_id, certificate_id, signer_id, \
     signature_algorithm, signature_value, signature_hash, is_valid, validated_at, created_at";

const DOCUMENT_COLUMNS: &str =
    "id, owner_id, document_type, title, content, signature, signature_method, signed_at, created_at";

fn row_to_certificate(row: &PgRow) -> Result<DbDigitalCertificate, sqlx::Error> {
    Ok(DbDigitalCertificate {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        certificate_type: row.try_get("certificate_type")?,
        issuer: row.try_get("issuer")?,
        subject: row.try_get("subject")?,
        serial_number: row.try_get("serial_number")?,
        valid_from: row.try_get("valid_from")?,
        valid_to: row.try_get("valid_to")?,
        certificate_pem: row.try_get("certificate_pem")?,
        public_key_pem: row.try_get("public_key_pem")?,
        pfx_file_path: row.try_get("pfx_file_path")?,
        pfx_passphrase_hash: row.try_get("pfx_passphrase_hash")?,
        fingerprint: row.try_get("fingerprint")?,
        is_hardware_token: row.try_get("is_hardware_token")?,
        token_serial_number: row.try_get("token_serial_number")?,
        is_active: row.try_get("is_active")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_reason: row.try_get("revoked_reason")?,
        last_used_at: row.try_get("last_used_at")?,
        usage_count: row.try_get("usage_count")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_signed_document(row: &PgRow) -> Result<DbSignedDocument, sqlx::Error> {
    Ok(DbSignedDocument {
        id: row.try_get("id")?,
        document_type: row.try_get("document_type")?,
        document_id: row.try_get("document_id")?,
        certificate_id: row.try_get("certificate_id")?,
        signer_id: row.try_get("signer_id")?,
        signature_algorithm: row.try_get("signature_algorithm")?,
        signature_value: row.try_get("signature_value")?,
        signature_hash: row.try_get("signature_hash")?,
        is_valid: row.try_get("is_valid")?,
        validated_at: row.try_get("validated_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_document(row: &PgRow) -> Result<DbClinicalDocument, sqlx::Error> {
    Ok(DbClinicalDocument {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        document_type: row.try_get("document_type")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        signature: row.try_get("signature")?,
        signature_method: row.try_get("signature_method")?,
        signed_at: row.try_get("signed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

impl CertificateQueries {
    /// Insert a new active certificate, deactivating every other active
    /// certificate of the same owner inside the same transaction. This is
    /// the only write path that activates a certificate, so an owner never
    /// holds zero-or-two active rows even under concurrent uploads.
    pub async fn insert_active(
        pool: &PgPool,
        data: CreateDigitalCertificate,
    ) -> Result<DbDigitalCertificate, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE digital_certificates SET is_active = FALSE WHERE owner_id = $1 AND is_active",
        )
        .bind(data.owner_id)
        .execute(&mut *tx)
        .await?;

        let query = format!(
            r#"
            INSERT INTO digital_certificates
                (owner_id, certificate_type, issuer, subject, serial_number, valid_from, valid_to,
                 certificate_pem, public_key_pem, pfx_file_path, pfx_passphrase_hash, fingerprint,
                 is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, TRUE)
            RETURNING {CERTIFICATE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(data.owner_id)
            .bind(&data.certificate_type)
            .bind(&data.issuer)
            .bind(&data.subject)
            .bind(&data.serial_number)
            .bind(data.valid_from)
            .bind(data.valid_to)
            .bind(&data.certificate_pem)
            .bind(&data.public_key_pem)
            .bind(&data.pfx_file_path)
            .bind(&data.pfx_passphrase_hash)
            .bind(&data.fingerprint)
            .fetch_one(&mut *tx)
            .await?;

        let certificate = row_to_certificate(&row)?;
        tx.commit().await?;
        Ok(certificate)
    }

    pub async fn serial_exists(pool: &PgPool, serial_number: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM digital_certificates WHERE serial_number = $1) AS present",
        )
        .bind(serial_number)
        .fetch_one(pool)
        .await?;
        row.try_get("present")
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: i64,
    ) -> Result<Option<DbDigitalCertificate>, sqlx::Error> {
        let query = format!("SELECT {CERTIFICATE_COLUMNS} FROM digital_certificates WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
        row.as_ref().map(row_to_certificate).transpose()
    }

    /// The owner's usable signing certificate: active, not revoked, and
    /// currently inside its validity window. Validity is re-checked here
    /// on every sign call; a certificate valid at upload time may have
    /// lapsed since.
    pub async fn find_active_for_owner(
        pool: &PgPool,
        owner_id: i64,
    ) -> Result<Option<DbDigitalCertificate>, sqlx::Error> {
        let query = format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM digital_certificates \
             WHERE owner_id = $1 AND is_active AND revoked_at IS NULL \
               AND valid_from <= NOW() AND valid_to >= NOW()"
        );
        let row = sqlx::query(&query).bind(owner_id).fetch_optional(pool).await?;
        row.as_ref().map(row_to_certificate).transpose()
    }

    pub async fn list_for_owner(
        pool: &PgPool,
        owner_id: i64,
    ) -> Result<Vec<DbDigitalCertificate>, sqlx::Error> {
        let query = format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM digital_certificates \
             WHERE owner_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query).bind(owner_id).fetch_all(pool).await?;
        rows.iter().map(row_to_certificate).collect()
    }

    /// Terminal revocation. Guarded on `revoked_at IS NULL` so a second
    /// revocation keeps the original timestamp and reason; nothing ever
    /// reactivates a revoked row.
    pub async fn revoke(
        pool: &PgPool,
        id: i64,
        reason: &str,
    ) -> Result<Option<DbDigitalCertificate>, sqlx::Error> {
        let query = format!(
            "UPDATE digital_certificates \
             SET is_active = FALSE, revoked_at = NOW(), revoked_reason = $2 \
             WHERE id = $1 AND revoked_at IS NULL \
             RETURNING {CERTIFICATE_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(reason)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(row_to_certificate).transpose()
    }

    /// Database-level atomic increment; never read-modify-write in
    /// application code.
    pub async fn record_usage(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE digital_certificates \
             SET usage_count = usage_count + 1, last_used_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

impl DocumentQueries {
    pub async fn create(
        pool: &PgPool,
        data: CreateClinicalDocument,
    ) -> Result<DbClinicalDocument, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO clinical_documents (owner_id, document_type, title, content)
            VALUES ($1, $2, $3, $4)
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(data.owner_id)
            .bind(&data.document_type)
            .bind(&data.title)
            .bind(&data.content)
            .fetch_one(pool)
            .await?;
        row_to_document(&row)
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: i64,
    ) -> Result<Option<DbClinicalDocument>, sqlx::Error> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM clinical_documents WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
        row.as_ref().map(row_to_document).transpose()
    }

    /// One-way signing transition. The `signature IS NULL` guard makes the
    /// write race-safe: of two concurrent signers exactly one sees a row
    /// updated, the other observes zero rows and must report the document
    /// as already signed.
    pub async fn apply_signature(
        pool: &PgPool,
        id: i64,
        signature: &str,
        signature_method: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE clinical_documents \
             SET signature = $2, signature_method = $3, signed_at = NOW() \
             WHERE id = $1 AND signature IS NULL",
        )
        .bind(id)
        .bind(signature)
        .bind(signature_method)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

impl SignedDocumentQueries {
    /// Append an immutable ledger row. There is deliberately no update or
    /// delete path for the signature fields of this table.
    pub async fn append(
        pool: &PgPool,
        data: CreateSignedDocument,
    ) -> Result<DbSignedDocument, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO signed_documents
                (document_type, document_id, certificate_id, signer_id, signature_algorithm,
                 signature_value, signature_hash, is_valid, validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SIGNED_DOCUMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(&data.document_type)
            .bind(data.document_id)
            .bind(data.certificate_id)
            .bind(data.signer_id)
            .bind(&data.signature_algorithm)
            .bind(&data.signature_value)
            .bind(&data.signature_hash)
            .bind(data.is_valid)
            .bind(data.validated_at)
            .fetch_one(pool)
            .await?;
        row_to_signed_document(&row)
    }

    pub async fn list_for_document(
        pool: &PgPool,
        document_id: i64,
    ) -> Result<Vec<DbSignedDocument>, sqlx::Error> {
        let query = format!(
            "SELECT {SIGNED_DOCUMENT_COLUMNS} FROM signed_documents \
             WHERE document_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query).bind(document_id).fetch_all(pool).await?;
        rows.iter().map(row_to_signed_document).collect()
    }

    pub async fn list_for_signer(
        pool: &PgPool,
        signer_id: i64,
    ) -> Result<Vec<DbSignedDocument>, sqlx::Error> {
        let query = format!(
            "SELECT {SIGNED_DOCUMENT_COLUMNS} FROM signed_documents \
             WHERE signer_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query).bind(signer_id).fetch_all(pool).await?;
        rows.iter().map(row_to_signed_document).collect()
    }

    pub async fn find_latest_for_document(
        pool: &PgPool,
        document_id: i64,
    ) -> Result<Option<DbSignedDocument>, sqlx::Error> {
        let query = format!(
            "SELECT {SIGNED_DOCUMENT_COLUMNS} FROM signed_documents \
             WHERE document_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&query).bind(document_id).fetch_optional(pool).await?;
        row.as_ref().map(row_to_signed_document).transpose()
    }

    /// Validation annotation: the only permitted update, and it touches
    /// only the verification outcome columns.
    pub async fn mark_validated(
        pool: &PgPool,
        id: i64,
        is_valid: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE signed_documents SET is_valid = $2, validated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(is_valid)
        .execute(pool)
        .await?;
        Ok(())
    }
}
