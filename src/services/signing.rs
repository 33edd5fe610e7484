use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::{Signer, Verifier};
use sha2::{Digest, Sha256};

use crate::database::models::DbClinicalDocument;
use crate::error::{SignError, SignResult};
use crate::models::certificate::SignerCertificate;
use crate::services::pkcs12::{decode_container, DecodedContainer};

/// RSA PKCS#1 v1.5 over SHA-256, the algorithm label recorded in the
/// audit ledger.
pub const SIGNATURE_ALGORITHM: &str = "SHA256withRSA";

pub struct DetachedSignature {
    /// Base64 of the raw RSA signature bytes.
    pub signature: String,
    /// SHA-256 hex of the exact payload that was signed. Stored in the
    /// audit row so the signature can be re-verified offline against the
    /// certificate's public PEM.
    pub payload_hash: String,
    pub algorithm: &'static str,
    pub signed_at: DateTime<Utc>,
    pub certificate: SignerCertificate,
}

/// Canonical byte payload for a clinical document.
///
/// serde_json's default map ordering is alphabetical, so the rendered
/// string is deterministic for a given document and can be rebuilt by an
/// independent verifier.
pub fn canonical_payload(document: &DbClinicalDocument) -> String {
    serde_json::json!({
        "content": document.content,
        "document_id": document.id,
        "document_type": document.document_type,
        "title": document.title,
    })
    .to_string()
}

pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Produce a detached signature over `payload` with the key inside the
/// container. The key is re-derived on every call and dropped with the
/// decoded container on every exit path; nothing decrypted survives the
/// call. The signature is self-checked against the container's own public
/// key before it is returned.
pub fn sign_detached(
    container: &[u8],
    passphrase: &str,
    payload: &[u8],
) -> SignResult<DetachedSignature> {
    let decoded = decode_container(container, passphrase)?;

    let mut signer = Signer::new(MessageDigest::sha256(), &decoded.private_key)?;
    signer.update(payload)?;
    let raw = signer.sign_to_vec()?;

    // Internal self-check path: verify with the key re-derived from the
    // container before the signature leaves this function.
    let mut verifier = Verifier::new(MessageDigest::sha256(), &decoded.private_key)?;
    verifier.update(payload)?;
    if !verifier.verify(&raw)? {
        return Err(SignError::Crypto("self-check of fresh signature failed".to_string()));
    }

    Ok(DetachedSignature {
        signature: base64::encode(&raw),
        payload_hash: payload_digest(payload),
        algorithm: SIGNATURE_ALGORITHM,
        signed_at: Utc::now(),
        certificate: signer_certificate(&decoded),
    })
}

/// Verify a detached signature against a public key PEM. Digest
/// recomputation and RSA verification only: possession of the specific
/// key is proven, chain-of-trust is deliberately not.
pub fn verify_detached(
    public_key_pem: &str,
    payload: &[u8],
    signature_b64: &str,
) -> SignResult<bool> {
    let raw = base64::decode(signature_b64)
        .map_err(|e| SignError::Crypto(format!("signature is not valid base64: {}", e)))?;
    let pkey = PKey::public_key_from_pem(public_key_pem.as_bytes())?;

    let mut verifier = Verifier::new(MessageDigest::sha256(), &pkey)?;
    verifier.update(payload)?;
    Ok(verifier.verify(&raw)?)
}

pub fn signer_certificate(decoded: &DecodedContainer) -> SignerCertificate {
    SignerCertificate {
        subject: decoded.subject.clone(),
        issuer: decoded.issuer.clone(),
        serial_number: decoded.serial_number.clone(),
        valid_from: decoded.valid_from,
        valid_to: decoded.valid_to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{build_container, generate_identity};

    fn fixture() -> (Vec<u8>, String) {
        let (cert, key) = generate_identity("Dr. Ana Souza");
        let der = build_container(&cert, &key, "s3cret");
        let public_pem = String::from_utf8(
            cert.public_key().unwrap().public_key_to_pem().unwrap(),
        )
        .unwrap();
        (der, public_pem)
    }

    #[test]
    fn sign_verify_round_trip() {
        let (der, public_pem) = fixture();
        let payload = b"prescription: amoxicillin 500mg, 3x daily";

        let signed = sign_detached(&der, "s3cret", payload).expect("sign");
        assert_eq!(signed.algorithm, SIGNATURE_ALGORITHM);
        assert_eq!(signed.payload_hash, payload_digest(payload));
        assert!(verify_detached(&public_pem, payload, &signed.signature).expect("verify"));
    }

    #[test]
    fn any_byte_flip_invalidates() {
        let (der, public_pem) = fixture();
        let payload = b"short payload".to_vec();

        let signed = sign_detached(&der, "s3cret", &payload).expect("sign");
        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify_detached(&public_pem, &tampered, &signed.signature).expect("verify"),
                "flipping byte {} must break verification",
                i
            );
        }
    }

    #[test]
    fn wrong_passphrase_never_signs() {
        let (der, _) = fixture();
        match sign_detached(&der, "wrong", b"payload") {
            Err(SignError::ContainerDecode(_)) => {}
            Err(other) => panic!("expected ContainerDecode, got {other:?}"),
            Ok(_) => panic!("wrong passphrase must not produce a signature"),
        }
    }

    #[test]
    fn garbage_signature_is_rejected_not_fatal() {
        let (_, public_pem) = fixture();
        assert!(verify_detached(&public_pem, b"payload", "AAAA").is_err() ||
            !verify_detached(&public_pem, b"payload", "AAAA").unwrap());
    }

    #[test]
    fn canonical_payload_is_deterministic_and_key_ordered() {
        let document = DbClinicalDocument {
            id: 42,
            owner_id: 7,
            document_type: "prescription".to_string(),
            title: "Rx".to_string(),
            content: "amoxicillin 500mg".to_string(),
            signature: None,
            signature_method: None,
            signed_at: None,
            created_at: Utc::now(),
        };
        let a = canonical_payload(&document);
        let b = canonical_payload(&document);
        assert_eq!(a, b);
        let content_pos = a.find("\"content\"").unwrap();
        let id_pos = a.find("\"document_id\"").unwrap();
        let title_pos = a.find("\"title\"").unwrap();
        assert!(content_pos < id_pos && id_pos < title_pos);
    }

    #[tokio::test]
    async fn concurrent_signs_are_distinct_and_all_valid() {
        let (der, public_pem) = fixture();
        let n = 8;

        let tasks: Vec<_> = (0..n)
            .map(|i| {
                let der = der.clone();
                tokio::task::spawn_blocking(move || {
                    let payload = format!("document #{i}");
                    let signed = sign_detached(&der, "s3cret", payload.as_bytes()).expect("sign");
                    (payload, signed.signature)
                })
            })
            .collect();

        let mut signatures = Vec::new();
        for result in futures::future::join_all(tasks).await {
            let (payload, signature) = result.expect("join");
            assert!(verify_detached(&public_pem, payload.as_bytes(), &signature).expect("verify"));
            signatures.push(signature);
        }

        signatures.sort();
        signatures.dedup();
        assert_eq!(signatures.len(), n, "signatures over distinct payloads must differ");
    }
}
