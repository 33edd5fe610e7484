use thiserror::Error;

/// Failure taxonomy for the certificate and signing core.
///
/// `ContainerDecode` is the user-correctable case (wrong passphrase or
/// corrupt bytes) and must stay distinguishable from the malformed-upload
/// cases (`CertificateMissing`, `PrivateKeyMissing`) so callers can tell a
/// retypable mistake from a corrupt asset.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("container decode failed: {0}")]
    ContainerDecode(String),

    #[error("no certificate found in container")]
    CertificateMissing,

    #[error("no private key found in container")]
    PrivateKeyMissing,

    #[error("certificate not valid: {0}")]
    CertificateNotValid(String),

    #[error("certificate serial number already registered: {0}")]
    DuplicateSerial(String),

    #[error("PDF structure error: {0}")]
    PdfStructure(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<openssl::error::ErrorStack> for SignError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        SignError::Crypto(e.to_string())
    }
}

pub type SignResult<T> = Result<T, SignError>;
