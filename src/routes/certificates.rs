use axum::{
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    response::Json,
};
use std::str::FromStr;

use crate::common::responses::ApiResponse;
use crate::database::queries::CertificateQueries;
use crate::error::SignError;
use crate::models::certificate::{
    CertificateInfo, CertificateType, RevokeCertificateRequest, UploadedCertificate,
};
use crate::routes::web::AppState;
use crate::services::ingest::ingest_certificate;

/// Upload a PKCS#12 (A1) certificate container.
///
/// The container is decoded and validated before anything is persisted;
/// on success it becomes the owner's single active certificate.
#[utoipa::path(
    post,
    path = "/api/certificates",
    request_body(content = Vec<u8>, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Certificate registered", body = crate::common::responses::UploadedCertificateResponse),
        (status = 400, description = "Missing fields, undecodable container, or certificate outside its validity window"),
        (status = 409, description = "Serial number already registered"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn upload_certificate(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    mut multipart: Multipart,
) -> (StatusCode, Json<ApiResponse<UploadedCertificate>>) {
    let (pool, upload_dir) = {
        let state = state.lock().await;
        (state.db_pool.clone(), state.upload_dir.clone())
    };

    let mut container: Option<Vec<u8>> = None;
    let mut passphrase: Option<String> = None;
    let mut declared_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "certificate" => {
                container = Some(field.bytes().await.unwrap_or_default().to_vec());
            }
            "passphrase" => {
                passphrase = Some(
                    String::from_utf8_lossy(&field.bytes().await.unwrap_or_default()).to_string(),
                );
            }
            "certificate_type" => {
                declared_type = Some(
                    String::from_utf8_lossy(&field.bytes().await.unwrap_or_default()).to_string(),
                );
            }
            _ => {}
        }
    }

    let container = match container {
        Some(bytes) if !bytes.is_empty() => normalize_container(bytes),
        _ => return ApiResponse::bad_request("No certificate file provided".to_string()),
    };
    let passphrase = match passphrase {
        Some(p) => p,
        None => return ApiResponse::bad_request("Passphrase is required".to_string()),
    };
    let declared_type = match declared_type.as_deref() {
        None | Some("") => CertificateType::A1,
        Some(text) => match CertificateType::from_str(text) {
            Ok(t) => t,
            Err(e) => return ApiResponse::bad_request(e),
        },
    };

    match ingest_certificate(&pool, &upload_dir, owner_id, declared_type, container, &passphrase)
        .await
    {
        Ok(uploaded) => {
            ApiResponse::success(uploaded, "Certificate uploaded successfully".to_string())
        }
        Err(SignError::ContainerDecode(_)) => {
            ApiResponse::bad_request("Invalid PKCS#12 container or passphrase".to_string())
        }
        Err(e @ SignError::CertificateMissing) | Err(e @ SignError::PrivateKeyMissing) => {
            ApiResponse::bad_request(e.to_string())
        }
        Err(SignError::CertificateNotValid(message)) => ApiResponse::bad_request(message),
        Err(SignError::DuplicateSerial(serial)) => ApiResponse::conflict(format!(
            "A certificate with serial number {} is already registered",
            serial
        )),
        Err(e) => {
            eprintln!("❌ upload: certificate ingestion failed: {}", e);
            ApiResponse::internal_error("Failed to register certificate".to_string())
        }
    }
}

/// Containers arrive either as raw DER or as base64 text, depending on
/// the client. A DER PKCS#12 always opens with an ASN.1 SEQUENCE tag;
/// anything else is tried as base64 before being handed to the decoder.
fn normalize_container(bytes: Vec<u8>) -> Vec<u8> {
    if bytes.first() == Some(&0x30) {
        return bytes;
    }
    let text: String = bytes
        .iter()
        .map(|&b| b as char)
        .filter(|c| !c.is_whitespace())
        .collect();
    match base64::decode(&text) {
        Ok(decoded) if decoded.first() == Some(&0x30) => decoded,
        _ => bytes,
    }
}

/// List the caller's certificates, newest first.
#[utoipa::path(
    get,
    path = "/api/certificates",
    responses(
        (status = 200, description = "Certificates retrieved", body = crate::common::responses::CertificateListResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_certificates(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
) -> (StatusCode, Json<ApiResponse<Vec<CertificateInfo>>>) {
    let pool = state.lock().await.db_pool.clone();

    match CertificateQueries::list_for_owner(&pool, owner_id).await {
        Ok(rows) => {
            let certificates: Vec<CertificateInfo> =
                rows.into_iter().map(CertificateInfo::from).collect();
            ApiResponse::success(certificates, "Certificates retrieved successfully".to_string())
        }
        Err(e) => {
            eprintln!("❌ list-certificates: {}", e);
            ApiResponse::internal_error("Failed to fetch certificates".to_string())
        }
    }
}

/// Revoke a certificate. Terminal: a revoked certificate can never be
/// reactivated, only superseded by a new upload.
#[utoipa::path(
    post,
    path = "/api/certificates/{id}/revoke",
    request_body = RevokeCertificateRequest,
    params(("id" = i64, Path, description = "Certificate id")),
    responses(
        (status = 200, description = "Certificate revoked", body = crate::common::responses::CertificateInfoResponse),
        (status = 403, description = "Certificate belongs to another owner"),
        (status = 404, description = "Certificate not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_certificate(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    Path(id): Path<i64>,
    Json(payload): Json<RevokeCertificateRequest>,
) -> (StatusCode, Json<ApiResponse<CertificateInfo>>) {
    let pool = state.lock().await.db_pool.clone();

    let certificate = match CertificateQueries::find_by_id(&pool, id).await {
        Ok(Some(c)) => c,
        Ok(None) => return ApiResponse::not_found("Certificate not found".to_string()),
        Err(e) => {
            eprintln!("❌ revoke: certificate {}: {}", id, e);
            return ApiResponse::internal_error("Failed to fetch certificate".to_string());
        }
    };
    if certificate.owner_id != owner_id {
        return ApiResponse::forbidden("Certificate belongs to another owner".to_string());
    }

    match CertificateQueries::revoke(&pool, id, &payload.reason).await {
        Ok(Some(revoked)) => ApiResponse::success(
            CertificateInfo::from(revoked),
            "Certificate revoked".to_string(),
        ),
        // Already revoked earlier: terminal state, original reason stands.
        Ok(None) => ApiResponse::success(
            CertificateInfo::from(certificate),
            "Certificate was already revoked".to_string(),
        ),
        Err(e) => {
            eprintln!("❌ revoke: certificate {}: {}", id, e);
            ApiResponse::internal_error("Failed to revoke certificate".to_string())
        }
    }
}
