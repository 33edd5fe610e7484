pub mod certificate;
pub mod document;
pub mod signed_document;
