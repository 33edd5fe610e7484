use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::certificate::{CertificateInfo, PdfSignatureReport, UploadedCertificate};
use crate::models::document::ClinicalDocument;
use crate::models::signed_document::{
    SignDocumentResponse, SignedDocumentEntry, SignedPdfResponse, VerifySignatureResponse,
};

/// Uniform JSON envelope for every API response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[aliases(
    UploadedCertificateResponse = ApiResponse<UploadedCertificate>,
    CertificateInfoResponse = ApiResponse<CertificateInfo>,
    CertificateListResponse = ApiResponse<Vec<CertificateInfo>>,
    ClinicalDocumentResponse = ApiResponse<ClinicalDocument>,
    SignDocumentApiResponse = ApiResponse<SignDocumentResponse>,
    VerifySignatureApiResponse = ApiResponse<VerifySignatureResponse>,
    SignedPdfApiResponse = ApiResponse<SignedPdfResponse>,
    PdfInspectionResponse = ApiResponse<PdfSignatureReport>,
    AuditListResponse = ApiResponse<Vec<SignedDocumentEntry>>
)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                status_code: 200,
                message,
                data: Some(data),
                error: None,
            }),
        )
    }

    pub fn created(data: T, message: String) -> (StatusCode, Json<Self>) {
        (
            StatusCode::CREATED,
            Json(Self {
                success: true,
                status_code: 201,
                message,
                data: Some(data),
                error: None,
            }),
        )
    }

    fn failure(status: StatusCode, message: String) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                status_code: status.as_u16(),
                message: message.clone(),
                data: None,
                error: Some(message),
            }),
        )
    }

    pub fn bad_request(message: String) -> (StatusCode, Json<Self>) {
        Self::failure(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: String) -> (StatusCode, Json<Self>) {
        Self::failure(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: String) -> (StatusCode, Json<Self>) {
        Self::failure(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: String) -> (StatusCode, Json<Self>) {
        Self::failure(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: String) -> (StatusCode, Json<Self>) {
        Self::failure(StatusCode::CONFLICT, message)
    }

    pub fn internal_error(message: String) -> (StatusCode, Json<Self>) {
        Self::failure(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}
