use chrono::{DateTime, TimeZone, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::pkcs12::{ParsedPkcs12_2, Pkcs12};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use crate::error::{SignError, SignResult};

/// Key-bag encodings tried during private key extraction, in order.
///
/// Issuing tools disagree on how the key ends up inside the container:
/// most shroud it as encrypted PKCS#8 under the container passphrase,
/// some leave the bag unshrouded, and a few legacy exporters drop a bare
/// `PrivateKeyInfo` into the authenticated safe. A single parse path
/// rejects containers that are otherwise perfectly usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBagEncoding {
    ShroudedKeyBag,
    KeyBag,
    GenericKeyBag,
}

pub const KEY_BAG_ORDER: [KeyBagEncoding; 3] = [
    KeyBagEncoding::ShroudedKeyBag,
    KeyBagEncoding::KeyBag,
    KeyBagEncoding::GenericKeyBag,
];

/// Result of a successful container decode. The private key lives only as
/// long as this value; callers must not cache it past the operation that
/// requested the decode.
pub struct DecodedContainer {
    pub certificate: X509,
    pub private_key: PKey<Private>,
    pub issuer: String,
    pub subject: String,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub certificate_pem: String,
    pub public_key_pem: String,
}

/// Decode a PKCS#12 container under the supplied passphrase.
///
/// A MAC or structure failure is reported as `ContainerDecode`; a
/// container without a leaf certificate as `CertificateMissing`; a
/// container whose key cannot be recovered by any supported bag encoding
/// as `PrivateKeyMissing`. Nothing partial is ever returned.
pub fn decode_container(der: &[u8], passphrase: &str) -> SignResult<DecodedContainer> {
    let pkcs12 = Pkcs12::from_der(der)
        .map_err(|e| SignError::ContainerDecode(format!("not a PKCS#12 structure: {}", e)))?;

    let parsed = pkcs12
        .parse2(passphrase)
        .map_err(|e| SignError::ContainerDecode(format!("wrong passphrase or corrupt container: {}", e)))?;

    // openssl only fills `cert` when it pairs with a recovered key; a
    // container holding a lone certificate bag surfaces it on the ca
    // stack instead. Either place counts as the leaf being present.
    let certificate = parsed
        .cert
        .clone()
        .or_else(|| leaf_from_ca_stack(&parsed))
        .ok_or(SignError::CertificateMissing)?;
    let private_key = extract_private_key(der, &parsed)?;

    let issuer = name_entries(certificate.issuer_name());
    let subject = name_entries(certificate.subject_name());
    let serial_number = serial_hex(&certificate)?;
    let valid_from = asn1_to_utc(certificate.not_before())?;
    let valid_to = asn1_to_utc(certificate.not_after())?;

    let certificate_pem = String::from_utf8(certificate.to_pem()?)
        .map_err(|_| SignError::Crypto("certificate PEM is not UTF-8".to_string()))?;
    let public_key_pem = String::from_utf8(certificate.public_key()?.public_key_to_pem()?)
        .map_err(|_| SignError::Crypto("public key PEM is not UTF-8".to_string()))?;

    Ok(DecodedContainer {
        certificate,
        private_key,
        issuer,
        subject,
        serial_number,
        valid_from,
        valid_to,
        certificate_pem,
        public_key_pem,
    })
}

fn leaf_from_ca_stack(parsed: &ParsedPkcs12_2) -> Option<X509> {
    parsed
        .ca
        .as_ref()
        .and_then(|stack| stack.iter().next().map(|c| c.to_owned()))
}

/// Try each supported bag encoding in fixed order; first success wins.
fn extract_private_key(raw: &[u8], parsed: &ParsedPkcs12_2) -> SignResult<PKey<Private>> {
    for encoding in KEY_BAG_ORDER {
        if let Some(key) = try_key_bag(encoding, raw, parsed) {
            return Ok(key);
        }
    }
    Err(SignError::PrivateKeyMissing)
}

fn try_key_bag(
    encoding: KeyBagEncoding,
    raw: &[u8],
    parsed: &ParsedPkcs12_2,
) -> Option<PKey<Private>> {
    match encoding {
        // Shrouded PKCS#8 bag, decrypted with the container passphrase.
        KeyBagEncoding::ShroudedKeyBag => parsed.pkey.clone(),
        // Unshrouded key bag: the container MAC checked out above, but the
        // bag itself carries no inner encryption.
        KeyBagEncoding::KeyBag => Pkcs12::from_der(raw).ok()?.parse2("").ok()?.pkey,
        KeyBagEncoding::GenericKeyBag => scan_for_key_bag(raw),
    }
}

/// Legacy exporters occasionally leave a bare `PrivateKeyInfo` in the
/// authenticated safe where neither shrouded parse finds it. Walk the
/// container for DER SEQUENCE heads and try each as a key structure.
fn scan_for_key_bag(raw: &[u8]) -> Option<PKey<Private>> {
    let mut offset = 0;
    while offset + 4 < raw.len() {
        if raw[offset] == 0x30 && raw[offset + 1] == 0x82 {
            if let Ok(key) = PKey::private_key_from_der(&raw[offset..]) {
                return Some(key);
            }
        }
        offset += 1;
    }
    None
}

/// Render an X.509 name as `K=V, K=V` the way certificate viewers print it.
pub fn name_entries(name: &openssl::x509::X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("UNKNOWN");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| "<binary>".to_string());
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn serial_hex(cert: &X509) -> SignResult<String> {
    let bn = cert.serial_number().to_bn()?;
    Ok(hex::encode(bn.to_vec()))
}

/// Convert an ASN.1 time to chrono by diffing against the Unix epoch.
pub fn asn1_to_utc(time: &Asn1TimeRef) -> SignResult<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| SignError::Crypto("certificate validity timestamp out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{
        build_cert_only_container, build_container, generate_identity,
    };

    #[test]
    fn decodes_valid_container() {
        let (cert, key) = generate_identity("Dr. Ana Souza");
        let der = build_container(&cert, &key, "s3cret");

        let decoded = decode_container(&der, "s3cret").expect("decode");
        assert!(decoded.subject.contains("Dr. Ana Souza"));
        assert!(!decoded.serial_number.is_empty());
        assert!(decoded.certificate_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(decoded.public_key_pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(decoded.valid_from < decoded.valid_to);
    }

    #[test]
    fn wrong_passphrase_is_container_decode() {
        let (cert, key) = generate_identity("Dr. Ana Souza");
        let der = build_container(&cert, &key, "s3cret");

        match decode_container(&der, "wrong") {
            Err(SignError::ContainerDecode(_)) => {}
            other => panic!("expected ContainerDecode, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn random_bytes_are_container_decode() {
        let junk: Vec<u8> = (0..512).map(|i| (i * 7 % 251) as u8).collect();
        match decode_container(&junk, "anything") {
            Err(SignError::ContainerDecode(_)) => {}
            other => panic!("expected ContainerDecode, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn container_without_key_is_private_key_missing() {
        let (cert, _key) = generate_identity("Dr. Ana Souza");
        let der = build_cert_only_container(&cert, "s3cret");

        match decode_container(&der, "s3cret") {
            Err(SignError::PrivateKeyMissing) => {}
            other => panic!("expected PrivateKeyMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn scan_recovers_bare_private_key_info() {
        let (_cert, key) = generate_identity("Dr. Ana Souza");
        let key_der = key.private_key_to_der().expect("key der");

        let mut blob = vec![0u8; 37];
        blob.extend_from_slice(&key_der);
        blob.extend_from_slice(&[0u8; 11]);

        let found = scan_for_key_bag(&blob).expect("scan should find the key");
        assert_eq!(
            found.private_key_to_der().expect("der"),
            key_der,
            "recovered key must match the embedded one"
        );
    }

    #[test]
    fn bag_order_is_fixed() {
        assert_eq!(
            KEY_BAG_ORDER,
            [
                KeyBagEncoding::ShroudedKeyBag,
                KeyBagEncoding::KeyBag,
                KeyBagEncoding::GenericKeyBag,
            ]
        );
    }
}
