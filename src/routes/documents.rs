use axum::{
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use sqlx::PgPool;

use crate::common::responses::ApiResponse;
use crate::database::models::{CreateClinicalDocument, CreateSignedDocument, DbClinicalDocument, DbDigitalCertificate};
use crate::database::queries::{CertificateQueries, DocumentQueries, SignedDocumentQueries};
use crate::error::SignError;
use crate::models::certificate::PdfSignatureReport;
use crate::models::document::{ClinicalDocument, CreateDocumentRequest};
use crate::models::signed_document::{
    SignDocumentRequest, SignDocumentResponse, SignedPdfResponse, VerifySignatureResponse,
};
use crate::routes::web::AppState;
use crate::services::pdf_signature::{inspect_pdf_signatures, sign_pdf, SignatureMetadata};
use crate::services::signing::{canonical_payload, payload_digest, sign_detached, verify_detached};

/// Signature method labels recorded on the document row.
const METHOD_DETACHED: &str = "SHA256withRSA-detached";
const METHOD_PDF_EMBEDDED: &str = "PKCS7-PDF-embedded";

#[utoipa::path(
    post,
    path = "/api/documents",
    request_body = CreateDocumentRequest,
    responses(
        (status = 201, description = "Document created", body = crate::common::responses::ClinicalDocumentResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_document(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    Json(payload): Json<CreateDocumentRequest>,
) -> (StatusCode, Json<ApiResponse<ClinicalDocument>>) {
    let pool = state.lock().await.db_pool.clone();

    if payload.title.trim().is_empty() || payload.content.trim().is_empty() {
        return ApiResponse::bad_request("Title and content are required".to_string());
    }
    match payload.document_type.as_str() {
        "prescription" | "certificate" => {}
        other => {
            return ApiResponse::bad_request(format!("Unknown document type: {}", other));
        }
    }

    match DocumentQueries::create(
        &pool,
        CreateClinicalDocument {
            owner_id,
            document_type: payload.document_type,
            title: payload.title,
            content: payload.content,
        },
    )
    .await
    {
        Ok(document) => ApiResponse::created(
            ClinicalDocument::from(document),
            "Document created".to_string(),
        ),
        Err(e) => {
            eprintln!("❌ create-document: {}", e);
            ApiResponse::internal_error("Failed to create document".to_string())
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}",
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document retrieved", body = crate::common::responses::ClinicalDocumentResponse),
        (status = 404, description = "Document not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_document(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<ApiResponse<ClinicalDocument>>) {
    let pool = state.lock().await.db_pool.clone();

    match fetch_owned_document(&pool, id, owner_id).await {
        Ok(document) => {
            ApiResponse::success(ClinicalDocument::from(document), "Document retrieved".to_string())
        }
        Err(response) => map_response(response),
    }
}

/// Sign a clinical document with the caller's active certificate.
///
/// The container is re-decrypted with the supplied passphrase on every
/// call; signing is a one-way transition and an already-signed document
/// is rejected.
#[utoipa::path(
    post,
    path = "/api/documents/{id}/sign",
    request_body = SignDocumentRequest,
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document signed", body = crate::common::responses::SignDocumentApiResponse),
        (status = 400, description = "No active certificate, or document already signed"),
        (status = 401, description = "Wrong container passphrase"),
        (status = 403, description = "Document belongs to another owner"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn sign_document(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    Path(id): Path<i64>,
    Json(payload): Json<SignDocumentRequest>,
) -> (StatusCode, Json<ApiResponse<SignDocumentResponse>>) {
    let pool = state.lock().await.db_pool.clone();

    let document = match fetch_owned_document(&pool, id, owner_id).await {
        Ok(document) => document,
        Err(response) => return map_response(response),
    };
    if document.signature.is_some() {
        return ApiResponse::bad_request("Document already carries a signature".to_string());
    }

    let (certificate, container) = match load_signing_material(&pool, owner_id).await {
        Ok(pair) => pair,
        Err(response) => return map_response(response),
    };
    if !passphrase_precheck(&certificate, &payload.passphrase) {
        return ApiResponse::unauthorized("Invalid certificate passphrase".to_string());
    }

    let canonical = canonical_payload(&document);
    let signed = {
        let passphrase = payload.passphrase.clone();
        let task = tokio::task::spawn_blocking(move || {
            sign_detached(&container, &passphrase, canonical.as_bytes())
        })
        .await;
        match task {
            Ok(Ok(signed)) => signed,
            Ok(Err(SignError::ContainerDecode(_))) => {
                return ApiResponse::unauthorized("Invalid certificate passphrase".to_string());
            }
            Ok(Err(e)) => {
                eprintln!("❌ sign: certificate {}: {}", certificate.id, e);
                return ApiResponse::internal_error(
                    "Stored certificate container is unusable".to_string(),
                );
            }
            Err(e) => {
                eprintln!("❌ sign: certificate {}: signing task failed: {}", certificate.id, e);
                return ApiResponse::internal_error("Signing failed".to_string());
            }
        }
    };

    // One-way transition; of two concurrent signers exactly one wins.
    match DocumentQueries::apply_signature(&pool, document.id, &signed.signature, METHOD_DETACHED)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            return ApiResponse::bad_request("Document already carries a signature".to_string());
        }
        Err(e) => {
            eprintln!("❌ sign: document {}: {}", document.id, e);
            return ApiResponse::internal_error("Failed to record signature".to_string());
        }
    }

    record_signing(
        &pool,
        &document,
        certificate.id,
        owner_id,
        signed.algorithm,
        &signed.signature,
        &signed.payload_hash,
    )
    .await;

    ApiResponse::success(
        SignDocumentResponse {
            signature: signed.signature,
            signature_algorithm: signed.algorithm.to_string(),
            signed_at: signed.signed_at,
            certificate_info: signed.certificate,
        },
        "Document signed successfully".to_string(),
    )
}

/// Verify a document's detached signature against the signer
/// certificate's stored public key. Digest recomputation and RSA
/// verification only; chain-of-trust is out of scope by design.
#[utoipa::path(
    post,
    path = "/api/documents/{id}/verify",
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Verification outcome", body = crate::common::responses::VerifySignatureApiResponse),
        (status = 400, description = "Document is not signed"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn verify_document(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<ApiResponse<VerifySignatureResponse>>) {
    let pool = state.lock().await.db_pool.clone();

    let document = match fetch_owned_document(&pool, id, owner_id).await {
        Ok(document) => document,
        Err(response) => return map_response(response),
    };
    let signature = match &document.signature {
        Some(signature) => signature.clone(),
        None => return ApiResponse::bad_request("Document is not signed".to_string()),
    };

    let ledger = match SignedDocumentQueries::find_latest_for_document(&pool, document.id).await {
        Ok(Some(ledger)) => ledger,
        Ok(None) => {
            return ApiResponse::bad_request("No audit record exists for this document".to_string());
        }
        Err(e) => {
            eprintln!("❌ verify: document {}: {}", document.id, e);
            return ApiResponse::internal_error("Failed to fetch audit record".to_string());
        }
    };
    let certificate = match CertificateQueries::find_by_id(&pool, ledger.certificate_id).await {
        Ok(Some(certificate)) => certificate,
        Ok(None) => {
            return ApiResponse::internal_error("Signer certificate record is missing".to_string());
        }
        Err(e) => {
            eprintln!("❌ verify: certificate {}: {}", ledger.certificate_id, e);
            return ApiResponse::internal_error("Failed to fetch signer certificate".to_string());
        }
    };

    let canonical = canonical_payload(&document);
    let valid = match verify_detached(&certificate.public_key_pem, canonical.as_bytes(), &signature)
    {
        Ok(valid) => valid,
        Err(e) => {
            eprintln!("❌ verify: certificate {}: {}", certificate.id, e);
            false
        }
    };

    if let Err(e) = SignedDocumentQueries::mark_validated(&pool, ledger.id, valid).await {
        eprintln!("❌ verify: audit row {}: annotation failed: {}", ledger.id, e);
    }

    ApiResponse::success(
        VerifySignatureResponse {
            valid,
            signature_hash: ledger.signature_hash,
            signature_algorithm: ledger.signature_algorithm,
            validated_at: Utc::now(),
        },
        if valid {
            "Signature is valid".to_string()
        } else {
            "Signature is NOT valid".to_string()
        },
    )
}

/// Sign the rendered PDF of a clinical document and embed the CMS
/// envelope into the PDF bytes. Applies the same one-way signed
/// transition as the detached flow.
#[utoipa::path(
    post,
    path = "/api/documents/{id}/sign-pdf",
    request_body(content = Vec<u8>, content_type = "multipart/form-data"),
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "PDF signed", body = crate::common::responses::SignedPdfApiResponse),
        (status = 400, description = "No active certificate, missing PDF, or document already signed"),
        (status = 401, description = "Wrong container passphrase"),
        (status = 403, description = "Document belongs to another owner"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn sign_document_pdf(
    State(state): State<AppState>,
    Extension(owner_id): Extension<i64>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> (StatusCode, Json<ApiResponse<SignedPdfResponse>>) {
    let pool = state.lock().await.db_pool.clone();

    let document = match fetch_owned_document(&pool, id, owner_id).await {
        Ok(document) => document,
        Err(response) => return map_response(response),
    };
    if document.signature.is_some() {
        return ApiResponse::bad_request("Document already carries a signature".to_string());
    }

    let mut pdf_data: Option<Vec<u8>> = None;
    let mut passphrase: Option<String> = None;
    let mut metadata = SignatureMetadata::default();

    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "pdf" => {
                pdf_data = Some(field.bytes().await.unwrap_or_default().to_vec());
            }
            "passphrase" => {
                passphrase = Some(
                    String::from_utf8_lossy(&field.bytes().await.unwrap_or_default()).to_string(),
                );
            }
            "reason" => {
                metadata.reason = Some(
                    String::from_utf8_lossy(&field.bytes().await.unwrap_or_default()).to_string(),
                );
            }
            "location" => {
                metadata.location = Some(
                    String::from_utf8_lossy(&field.bytes().await.unwrap_or_default()).to_string(),
                );
            }
            "contact" => {
                metadata.contact = Some(
                    String::from_utf8_lossy(&field.bytes().await.unwrap_or_default()).to_string(),
                );
            }
            _ => {}
        }
    }

    let pdf_data = match pdf_data {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return ApiResponse::bad_request("No PDF file provided".to_string()),
    };
    let passphrase = match passphrase {
        Some(p) => p,
        None => return ApiResponse::bad_request("Passphrase is required".to_string()),
    };

    let (certificate, container) = match load_signing_material(&pool, owner_id).await {
        Ok(pair) => pair,
        Err(response) => return map_response(response),
    };
    if !passphrase_precheck(&certificate, &passphrase) {
        return ApiResponse::unauthorized("Invalid certificate passphrase".to_string());
    }

    // PDF hashing and envelope construction are the heaviest crypto in the
    // service; keep them off the request-serving path.
    let pdf_hash = payload_digest(&pdf_data);
    let signed = {
        let task = tokio::task::spawn_blocking(move || {
            sign_pdf(&container, &passphrase, &pdf_data, &metadata)
        })
        .await;
        match task {
            Ok(Ok(signed)) => signed,
            Ok(Err(SignError::ContainerDecode(_))) => {
                return ApiResponse::unauthorized("Invalid certificate passphrase".to_string());
            }
            Ok(Err(e)) => {
                eprintln!("❌ sign-pdf: certificate {}: {}", certificate.id, e);
                return ApiResponse::internal_error(
                    "Stored certificate container is unusable".to_string(),
                );
            }
            Err(e) => {
                eprintln!(
                    "❌ sign-pdf: certificate {}: signing task failed: {}",
                    certificate.id, e
                );
                return ApiResponse::internal_error("Signing failed".to_string());
            }
        }
    };

    let envelope_b64 = base64::encode(&signed.envelope_der);
    match DocumentQueries::apply_signature(&pool, document.id, &envelope_b64, METHOD_PDF_EMBEDDED)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            return ApiResponse::bad_request("Document already carries a signature".to_string());
        }
        Err(e) => {
            eprintln!("❌ sign-pdf: document {}: {}", document.id, e);
            return ApiResponse::internal_error("Failed to record signature".to_string());
        }
    }

    record_signing(
        &pool,
        &document,
        certificate.id,
        owner_id,
        crate::services::signing::SIGNATURE_ALGORITHM,
        &envelope_b64,
        &pdf_hash,
    )
    .await;

    ApiResponse::success(
        SignedPdfResponse {
            pdf_base64: base64::encode(&signed.bytes),
            degraded: signed.degraded,
            signed_at: signed.signed_at,
            certificate_info: signed.certificate,
        },
        "PDF signed successfully".to_string(),
    )
}

/// Report the signature dictionaries embedded in an uploaded PDF.
#[utoipa::path(
    post,
    path = "/api/pdf/inspect",
    request_body(content = Vec<u8>, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Signature report", body = crate::common::responses::PdfInspectionResponse),
        (status = 400, description = "Not a readable PDF"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn inspect_pdf(
    State(_state): State<AppState>,
    Extension(_owner_id): Extension<i64>,
    mut multipart: Multipart,
) -> (StatusCode, Json<ApiResponse<PdfSignatureReport>>) {
    let mut pdf_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        if field.name().unwrap_or("") == "pdf" {
            pdf_data = Some(field.bytes().await.unwrap_or_default().to_vec());
        }
    }

    let pdf_data = match pdf_data {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return ApiResponse::bad_request("No PDF file provided".to_string()),
    };

    match inspect_pdf_signatures(&pdf_data) {
        Ok(report) => ApiResponse::success(report, "PDF inspected".to_string()),
        Err(e) => ApiResponse::bad_request(e.to_string()),
    }
}

/// Fetch a document and enforce ownership. The error side carries a
/// ready-to-return response for the 404/403/500 cases; `map_response`
/// re-wraps it under the calling handler's payload type.
async fn fetch_owned_document(
    pool: &PgPool,
    id: i64,
    owner_id: i64,
) -> Result<DbClinicalDocument, (StatusCode, Json<ApiResponse<()>>)> {
    match DocumentQueries::find_by_id(pool, id).await {
        Ok(Some(document)) => {
            if document.owner_id != owner_id {
                Err(ApiResponse::forbidden(
                    "Document belongs to another owner".to_string(),
                ))
            } else {
                Ok(document)
            }
        }
        Ok(None) => Err(ApiResponse::not_found("Document not found".to_string())),
        Err(e) => {
            eprintln!("❌ fetch-document: document {}: {}", id, e);
            Err(ApiResponse::internal_error(
                "Failed to fetch document".to_string(),
            ))
        }
    }
}

/// Resolve the caller's usable certificate and read its stored container
/// bytes. Validity is re-checked here on every call.
async fn load_signing_material(
    pool: &PgPool,
    owner_id: i64,
) -> Result<(DbDigitalCertificate, Vec<u8>), (StatusCode, Json<ApiResponse<()>>)> {
    let certificate = match CertificateQueries::find_active_for_owner(pool, owner_id).await {
        Ok(Some(certificate)) => certificate,
        Ok(None) => {
            return Err(ApiResponse::bad_request(
                "No active certificate within its validity window".to_string(),
            ));
        }
        Err(e) => {
            eprintln!("❌ sign: owner {}: certificate lookup failed: {}", owner_id, e);
            return Err(ApiResponse::internal_error(
                "Failed to resolve certificate".to_string(),
            ));
        }
    };

    let path = match &certificate.pfx_file_path {
        Some(path) => path.clone(),
        None => {
            // Forbidden state: active A1 row without backing container.
            eprintln!(
                "❌ sign: certificate {} is active without a stored container",
                certificate.id
            );
            return Err(ApiResponse::internal_error(
                "Certificate has no stored container".to_string(),
            ));
        }
    };

    match tokio::fs::read(&path).await {
        Ok(container) => Ok((certificate, container)),
        Err(e) => {
            eprintln!(
                "❌ sign: certificate {}: container read failed: {}",
                certificate.id, e
            );
            Err(ApiResponse::internal_error(
                "Failed to read certificate container".to_string(),
            ))
        }
    }
}

/// Fail-fast hint against the stored passphrase hash. A mismatch rejects
/// early with the same passphrase error the decoder would produce; a
/// match never bypasses the real boundary, which is decrypting the
/// container with the caller-supplied passphrase.
fn passphrase_precheck(certificate: &DbDigitalCertificate, passphrase: &str) -> bool {
    match &certificate.pfx_passphrase_hash {
        Some(hash) => bcrypt::verify(passphrase, hash).unwrap_or(true),
        None => true,
    }
}

/// Post-signing bookkeeping: atomic usage increment plus the append-only
/// audit row. Failures here are logged with the certificate id and
/// operation kind but do not void an already-applied signature.
async fn record_signing(
    pool: &PgPool,
    document: &DbClinicalDocument,
    certificate_id: i64,
    signer_id: i64,
    algorithm: &str,
    signature_value: &str,
    signature_hash: &str,
) {
    if let Err(e) = CertificateQueries::record_usage(pool, certificate_id).await {
        eprintln!(
            "❌ sign: certificate {}: usage accounting failed: {}",
            certificate_id, e
        );
    }

    let entry = CreateSignedDocument {
        document_type: document.document_type.clone(),
        document_id: document.id,
        certificate_id,
        signer_id,
        signature_algorithm: algorithm.to_string(),
        signature_value: signature_value.to_string(),
        signature_hash: signature_hash.to_string(),
        is_valid: Some(true),
        validated_at: Some(Utc::now()),
    };
    if let Err(e) = SignedDocumentQueries::append(pool, entry).await {
        eprintln!(
            "❌ sign: certificate {}: audit append failed: {}",
            certificate_id, e
        );
    }
}

/// Re-wrap a helper's error response under this handler's payload type.
fn map_response<B>(
    (status, Json(body)): (StatusCode, Json<ApiResponse<()>>),
) -> (StatusCode, Json<ApiResponse<B>>) {
    (
        status,
        Json(ApiResponse {
            success: body.success,
            status_code: body.status_code,
            message: body.message,
            data: None,
            error: body.error,
        }),
    )
}
