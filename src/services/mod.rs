pub mod ingest;
pub mod pdf_signature;
pub mod pkcs12;
pub mod signing;

#[cfg(test)]
pub mod test_support;
