mod common;
mod database;
mod error;
mod models;
mod routes;
mod services;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use database::connection::{establish_connection, run_migrations};
use routes::web::{create_router, AppState, AppStateData};

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::certificates::upload_certificate,
        routes::certificates::list_certificates,
        routes::certificates::revoke_certificate,
        routes::documents::create_document,
        routes::documents::get_document,
        routes::documents::sign_document,
        routes::documents::verify_document,
        routes::documents::sign_document_pdf,
        routes::documents::inspect_pdf,
        routes::audit::list_audit,
    ),
    components(
        schemas(
            models::certificate::CertificateType,
            models::certificate::CertificateStatus,
            models::certificate::CertificateInfo,
            models::certificate::UploadedCertificate,
            models::certificate::SignerCertificate,
            models::certificate::RevokeCertificateRequest,
            models::certificate::EmbeddedCertificateInfo,
            models::certificate::PdfSignatureEntry,
            models::certificate::PdfSignatureReport,
            models::document::ClinicalDocument,
            models::document::CreateDocumentRequest,
            models::signed_document::SignedDocumentEntry,
            models::signed_document::SignDocumentRequest,
            models::signed_document::SignDocumentResponse,
            models::signed_document::VerifySignatureResponse,
            models::signed_document::SignedPdfResponse,
            common::responses::UploadedCertificateResponse,
            common::responses::CertificateInfoResponse,
            common::responses::CertificateListResponse,
            common::responses::ClinicalDocumentResponse,
            common::responses::SignDocumentApiResponse,
            common::responses::VerifySignatureApiResponse,
            common::responses::SignedPdfApiResponse,
            common::responses::PdfInspectionResponse,
            common::responses::AuditListResponse,
        )
    ),
    tags(
        (name = "certificates", description = "A1 certificate ingestion and lifecycle"),
        (name = "documents", description = "Clinical document signing and verification"),
        (name = "audit", description = "Append-only signing audit trail")
    ),
    security(("bearer_auth" = [])),
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    match dotenvy::dotenv() {
        Ok(path) => println!("Loaded .env file from: {:?}", path),
        Err(e) => println!("Failed to load .env file: {}", e),
    }

    if std::env::var("DATABASE_URL").is_err() {
        println!("DATABASE_URL not set");
        std::process::exit(1);
    }

    let pool = establish_connection()
        .await
        .expect("Failed to connect to database");

    println!("Running database migrations...");
    match run_migrations(&pool).await {
        Ok(_) => println!("✅ Database migrations completed successfully"),
        Err(e) => {
            println!("❌ Database migration failed: {}", e);
            std::process::exit(1);
        }
    }

    let upload_dir = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());
    if let Err(e) = tokio::fs::create_dir_all(&upload_dir).await {
        println!("❌ Failed to create upload directory {}: {}", upload_dir, e);
        std::process::exit(1);
    }

    let app_state: AppState = Arc::new(Mutex::new(AppStateData {
        db_pool: pool,
        upload_dir,
    }));

    let openapi_json = {
        let mut openapi = ApiDoc::openapi();
        let scheme = utoipa::openapi::security::SecurityScheme::Http(
            utoipa::openapi::security::Http::new(utoipa::openapi::security::HttpAuthScheme::Bearer),
        );
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme("bearer_auth", scheme);
        } else {
            let mut components = utoipa::openapi::Components::new();
            components.add_security_scheme("bearer_auth", scheme);
            openapi.components = Some(components);
        }
        openapi
    };

    let swagger_routes = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi_json);

    let app = Router::new()
        .merge(create_router())
        .merge(swagger_routes)
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024)) // 25MB limit for container/PDF uploads
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("Server running on http://{}", addr);
    println!("Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service()).await.unwrap();
}
