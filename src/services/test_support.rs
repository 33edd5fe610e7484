//! Shared crypto fixtures: a self-signed RSA signing identity and the
//! PKCS#12 containers wrapping it. Everything is generated in-process so
//! the tests never depend on files or external tooling.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509};

/// Self-signed RSA-2048 signing certificate valid for one year.
pub fn generate_identity(common_name: &str) -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).expect("generate RSA key");
    let key = PKey::from_rsa(rsa).expect("wrap RSA key");

    let mut builder = X509Builder::new().expect("x509 builder");
    builder.set_version(2).expect("version");

    let serial = BigNum::from_u32(rand::random::<u32>()).expect("serial");
    let serial = serial.to_asn1_integer().expect("serial asn1");
    builder.set_serial_number(&serial).expect("set serial");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_nid(Nid::COUNTRYNAME, "BR").expect("country");
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Clinsign Test").expect("org");
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).expect("cn");
    let name = name.build();

    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");

    let not_before = Asn1Time::days_from_now(0).expect("not before");
    let not_after = Asn1Time::days_from_now(365).expect("not after");
    builder.set_not_before(&not_before).expect("set not before");
    builder.set_not_after(&not_after).expect("set not after");

    builder.set_pubkey(&key).expect("pubkey");

    let basic_constraints = BasicConstraints::new().critical().build().expect("bc");
    builder.append_extension(basic_constraints).expect("append bc");
    let key_usage = KeyUsage::new()
        .critical()
        .digital_signature()
        .non_repudiation()
        .build()
        .expect("ku");
    builder.append_extension(key_usage).expect("append ku");

    builder.sign(&key, MessageDigest::sha256()).expect("sign");
    (builder.build(), key)
}

/// PKCS#12 container bundling the identity under a passphrase.
pub fn build_container(cert: &X509, key: &PKey<Private>, passphrase: &str) -> Vec<u8> {
    let mut builder = Pkcs12::builder();
    builder.name("clinsign-test");
    builder.pkey(key);
    builder.cert(cert);
    builder
        .build2(passphrase)
        .expect("build pkcs12")
        .to_der()
        .expect("pkcs12 der")
}

/// A container carrying only the certificate bag, no key.
pub fn build_cert_only_container(cert: &X509, passphrase: &str) -> Vec<u8> {
    let mut builder = Pkcs12::builder();
    builder.name("clinsign-test");
    builder.cert(cert);
    builder
        .build2(passphrase)
        .expect("build cert-only pkcs12")
        .to_der()
        .expect("pkcs12 der")
}
