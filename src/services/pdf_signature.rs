use chrono::{DateTime, Utc};
use lopdf::Document;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use x509_parser::prelude::*;

use crate::error::{SignError, SignResult};
use crate::models::certificate::{
    EmbeddedCertificateInfo, PdfSignatureEntry, PdfSignatureReport, SignerCertificate,
};
use crate::services::pkcs12::decode_container;
use crate::services::signing::signer_certificate;

/// Free-text fields carried into the `/Sig` dictionary.
#[derive(Debug, Default, Clone)]
pub struct SignatureMetadata {
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact: Option<String>,
}

pub struct EmbeddedPdfSignature {
    /// The PDF with the signature block spliced in.
    pub bytes: Vec<u8>,
    /// DER of the CMS envelope, kept for the audit row.
    pub envelope_der: Vec<u8>,
    /// True when no cross-reference marker was found and the block was
    /// appended after the document instead of spliced before the table.
    pub degraded: bool,
    pub signed_at: DateTime<Utc>,
    pub certificate: SignerCertificate,
}

/// Build a CMS/PKCS#7 SignedData envelope over the full PDF byte buffer.
/// SHA-256 digest; signed attributes (content-type, message-digest,
/// signing-time) and the signer certificate travel inside the envelope.
pub fn build_cms_envelope(
    content: &[u8],
    cert: &X509,
    key: &PKey<Private>,
) -> SignResult<Vec<u8>> {
    let extra_certs = Stack::new()?;
    let flags = Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY;
    let pkcs7 = Pkcs7::sign(cert, key, &extra_certs, content, flags)?;
    Ok(pkcs7.to_der()?)
}

/// Sign a PDF byte buffer with the identity inside the container.
///
/// The key is re-derived for this one call and discarded with the decoded
/// container on every exit path.
pub fn sign_pdf(
    container: &[u8],
    passphrase: &str,
    pdf: &[u8],
    metadata: &SignatureMetadata,
) -> SignResult<EmbeddedPdfSignature> {
    let decoded = decode_container(container, passphrase)?;
    let envelope_der = build_cms_envelope(pdf, &decoded.certificate, &decoded.private_key)?;

    let signer_name = common_name(&decoded.certificate).unwrap_or_else(|| "Unknown".to_string());
    let signed_at = Utc::now();
    let (bytes, degraded) =
        SignatureBlockWriter.embed(pdf, &envelope_der, metadata, &signer_name, signed_at);

    if degraded {
        eprintln!(
            "⚠️  pdf-sign: no cross-reference table found for certificate serial {}, signature block appended non-structurally",
            decoded.serial_number
        );
    }

    Ok(EmbeddedPdfSignature {
        bytes,
        envelope_der,
        degraded,
        signed_at,
        certificate: signer_certificate(&decoded),
    })
}

/// Splices the rendered `/Sig` dictionary into raw PDF bytes.
///
/// All byte-structure mutation lives behind this type. It does NOT
/// rewrite the cross-reference table or trailer as a conforming
/// incremental update, so the output is an audit-grade artifact rather
/// than a third-party-verifiable signature; a conforming
/// incremental-update writer can replace this type without touching
/// envelope construction.
pub struct SignatureBlockWriter;

impl SignatureBlockWriter {
    /// Returns the mutated buffer and whether the degraded trailing-append
    /// path was taken (no xref marker found).
    pub fn embed(
        &self,
        pdf: &[u8],
        envelope_der: &[u8],
        metadata: &SignatureMetadata,
        signer_name: &str,
        signed_at: DateTime<Utc>,
    ) -> (Vec<u8>, bool) {
        let block = self.render_block(pdf, envelope_der, metadata, signer_name, signed_at);

        match xref_insertion_point(pdf) {
            Some(pos) => {
                let mut out = Vec::with_capacity(pdf.len() + block.len());
                out.extend_from_slice(&pdf[..pos]);
                out.extend_from_slice(block.as_bytes());
                out.extend_from_slice(&pdf[pos..]);
                (out, false)
            }
            None => {
                let mut out = Vec::with_capacity(pdf.len() + block.len() + 1);
                out.extend_from_slice(pdf);
                out.push(b'\n');
                out.extend_from_slice(block.as_bytes());
                (out, true)
            }
        }
    }

    fn render_block(
        &self,
        pdf: &[u8],
        envelope_der: &[u8],
        metadata: &SignatureMetadata,
        signer_name: &str,
        signed_at: DateTime<Utc>,
    ) -> String {
        let object_number = next_object_number(pdf);
        let date = format!("D:{}", signed_at.format("%Y%m%d%H%M%S+00'00'"));

        let mut dict = format!(
            "{} 0 obj\n<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /adbe.pkcs7.detached /Name ({}) /M ({}) /ByteRange [0 {} {} 0]",
            object_number,
            escape_pdf_string(signer_name),
            date,
            pdf.len(),
            pdf.len(),
        );
        if let Some(reason) = &metadata.reason {
            dict.push_str(&format!(" /Reason ({})", escape_pdf_string(reason)));
        }
        if let Some(location) = &metadata.location {
            dict.push_str(&format!(" /Location ({})", escape_pdf_string(location)));
        }
        if let Some(contact) = &metadata.contact {
            dict.push_str(&format!(" /ContactInfo ({})", escape_pdf_string(contact)));
        }
        dict.push_str(&format!(" /Contents <{}> >>\nendobj\n", hex::encode(envelope_der)));
        dict
    }
}

/// Offset of the last `xref` table keyword, skipping `startxref` markers.
fn xref_insertion_point(pdf: &[u8]) -> Option<usize> {
    let needle = b"xref";
    let mut found = None;
    let mut i = 0;
    while i + needle.len() <= pdf.len() {
        if &pdf[i..i + needle.len()] == needle {
            let inside_startxref = i >= 5 && &pdf[i - 5..i] == b"start";
            if !inside_startxref {
                found = Some(i);
            }
            i += needle.len();
        } else {
            i += 1;
        }
    }
    found
}

/// Highest `N G obj` header in the buffer, plus one.
fn next_object_number(pdf: &[u8]) -> u32 {
    let needle = b" obj";
    let mut max = 0u32;
    let mut i = 0;
    while i + needle.len() <= pdf.len() {
        if &pdf[i..i + needle.len()] != needle {
            i += 1;
            continue;
        }
        // Layout before the match: <object-number> <generation> obj
        let gen_end = i;
        let mut gen_start = gen_end;
        while gen_start > 0 && pdf[gen_start - 1].is_ascii_digit() {
            gen_start -= 1;
        }
        if gen_start < gen_end && gen_start > 0 && pdf[gen_start - 1] == b' ' {
            let num_end = gen_start - 1;
            let mut num_start = num_end;
            while num_start > 0 && pdf[num_start - 1].is_ascii_digit() {
                num_start -= 1;
            }
            if num_start < num_end {
                if let Some(n) = std::str::from_utf8(&pdf[num_start..num_end])
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                {
                    max = max.max(n);
                }
            }
        }
        i += needle.len();
    }
    max + 1
}

fn escape_pdf_string(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

fn common_name(cert: &X509) -> Option<String> {
    cert.subject_name()
        .entries()
        .find(|e| e.object().nid() == openssl::nid::Nid::COMMONNAME)
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string())
}

/// Walk a PDF's AcroForm signature fields and report what is embedded.
/// Read-only compliance inspection; no cryptographic verification happens
/// here.
pub fn inspect_pdf_signatures(pdf: &[u8]) -> SignResult<PdfSignatureReport> {
    let doc = Document::load_mem(pdf)
        .map_err(|e| SignError::PdfStructure(format!("failed to load PDF: {}", e)))?;

    let mut signatures = Vec::new();

    let catalog = doc
        .catalog()
        .map_err(|e| SignError::PdfStructure(format!("no document catalog: {}", e)))?;

    let acroform_fields = catalog
        .get(b"AcroForm")
        .ok()
        .and_then(|r| r.as_reference().ok())
        .and_then(|id| doc.get_object(id).ok())
        .and_then(|o| o.as_dict().ok())
        .and_then(|d| d.get(b"Fields").ok())
        .and_then(|f| f.as_array().ok())
        .cloned()
        .unwrap_or_default();

    for field_ref in &acroform_fields {
        let field_dict = match field_ref
            .as_reference()
            .ok()
            .and_then(|id| doc.get_object(id).ok())
            .and_then(|o| o.as_dict().ok())
        {
            Some(dict) => dict,
            None => continue,
        };

        let is_signature = field_dict
            .get(b"FT")
            .ok()
            .and_then(|ft| ft.as_name_str().ok())
            .map(|name| name == "Sig")
            .unwrap_or(false);
        if !is_signature {
            continue;
        }

        let sig_dict = match field_dict
            .get(b"V")
            .ok()
            .and_then(|v| v.as_reference().ok())
            .and_then(|id| doc.get_object(id).ok())
            .and_then(|o| o.as_dict().ok())
        {
            Some(dict) => dict,
            None => continue,
        };

        let text_entry = |key: &[u8]| -> Option<String> {
            sig_dict
                .get(key)
                .ok()
                .and_then(|v| v.as_str().ok())
                .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
        };
        let name_entry = |key: &[u8]| -> Option<String> {
            sig_dict
                .get(key)
                .ok()
                .and_then(|v| v.as_name_str().ok())
                .map(|s| s.to_string())
        };

        let contents = sig_dict
            .get(b"Contents")
            .ok()
            .and_then(|c| c.as_str().ok())
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default();

        signatures.push(PdfSignatureEntry {
            filter: name_entry(b"Filter"),
            subfilter: name_entry(b"SubFilter"),
            name: text_entry(b"Name"),
            reason: text_entry(b"Reason"),
            location: text_entry(b"Location"),
            signing_time: text_entry(b"M").as_deref().and_then(parse_pdf_date),
            contents_length: contents.len(),
            certificate: extract_embedded_certificate(&contents),
        });
    }

    Ok(PdfSignatureReport {
        signature_count: signatures.len(),
        signatures,
    })
}

/// Parse a PDF date of the form `D:YYYYMMDDHHmmSS...`.
fn parse_pdf_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.strip_prefix("D:").unwrap_or(date_str);
    if date_str.len() < 14 {
        return None;
    }

    let year = date_str[0..4].parse::<i32>().ok()?;
    let month = date_str[4..6].parse::<u32>().ok()?;
    let day = date_str[6..8].parse::<u32>().ok()?;
    let hour = date_str[8..10].parse::<u32>().ok()?;
    let minute = date_str[10..12].parse::<u32>().ok()?;
    let second = date_str[12..14].parse::<u32>().ok()?;

    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    let time = chrono::NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(
        chrono::NaiveDateTime::new(date, time),
        Utc,
    ))
}

/// Find the signer certificate inside raw PKCS#7 bytes by scanning for
/// DER SEQUENCE heads and trying each as an X.509 certificate.
fn extract_embedded_certificate(signature_bytes: &[u8]) -> Option<EmbeddedCertificateInfo> {
    let mut offset = 0;
    while offset + 4 < signature_bytes.len() {
        if signature_bytes[offset] == 0x30 && signature_bytes[offset + 1] == 0x82 {
            if let Ok((_, cert)) = X509Certificate::from_der(&signature_bytes[offset..]) {
                let common_name = cert
                    .subject()
                    .iter_common_name()
                    .next()
                    .and_then(|cn| cn.as_str().ok())
                    .map(|s| s.to_string());

                let valid_from = DateTime::<Utc>::from_timestamp(
                    cert.validity().not_before.to_datetime().unix_timestamp(),
                    0,
                );
                let valid_to = DateTime::<Utc>::from_timestamp(
                    cert.validity().not_after.to_datetime().unix_timestamp(),
                    0,
                );

                return Some(EmbeddedCertificateInfo {
                    issuer: Some(cert.issuer().to_string()),
                    subject: Some(cert.subject().to_string()),
                    serial_number: Some(format!("{:x}", cert.serial)),
                    valid_from,
                    valid_to,
                    common_name,
                });
            }
        }
        offset += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{build_container, generate_identity};
    use lopdf::{dictionary, Object, StringFormat};
    use openssl::x509::store::X509StoreBuilder;

    const MINIMAL_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
xref\n0 3\n0000000000 65535 f \n0000000009 00000 n \n0000000056 00000 n \n\
trailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n106\n%%EOF\n";

    fn fixture() -> Vec<u8> {
        let (cert, key) = generate_identity("Dr. Ana Souza");
        build_container(&cert, &key, "s3cret")
    }

    #[test]
    fn embeds_signature_block_before_xref() {
        let container = fixture();
        let signed = sign_pdf(&container, "s3cret", MINIMAL_PDF, &SignatureMetadata {
            reason: Some("Prescription issuance".to_string()),
            location: Some("Clinic".to_string()),
            contact: Some("ana@example.org".to_string()),
        })
        .expect("sign pdf");

        assert!(!signed.degraded);
        let out = &signed.bytes;

        let text = String::from_utf8_lossy(out);
        assert!(text.contains("/Type /Sig"));
        assert!(text.contains("/Filter /Adobe.PPKLite"));
        assert!(text.contains("/SubFilter /adbe.pkcs7.detached"));
        assert!(text.contains("/Reason (Prescription issuance)"));
        assert!(text.contains(&hex::encode(&signed.envelope_der)));

        // Original bytes up to the xref table are untouched.
        let insertion = xref_insertion_point(MINIMAL_PDF).expect("fixture has xref");
        assert_eq!(&out[..insertion], &MINIMAL_PDF[..insertion]);
        // The block sits before the xref keyword in the output.
        let sig_pos = text.find("/Type /Sig").unwrap();
        let xref_pos = text.rfind("\nxref").unwrap();
        assert!(sig_pos < xref_pos);
    }

    #[test]
    fn degrades_to_trailing_append_without_xref() {
        let container = fixture();
        let input = b"%PDF-1.4\nno cross reference table here\n%%EOF\n";
        let signed = sign_pdf(&container, "s3cret", input, &SignatureMetadata::default())
            .expect("sign pdf");

        assert!(signed.degraded);
        assert!(signed.bytes.starts_with(input));
        assert!(String::from_utf8_lossy(&signed.bytes).contains("/Type /Sig"));
    }

    #[test]
    fn cms_envelope_verifies_over_original_buffer() {
        let (cert, key) = generate_identity("Dr. Ana Souza");
        let envelope = build_cms_envelope(MINIMAL_PDF, &cert, &key).expect("envelope");

        let pkcs7 = Pkcs7::from_der(&envelope).expect("envelope parses as PKCS#7");
        let store = X509StoreBuilder::new().unwrap().build();
        let certs = Stack::new().unwrap();
        pkcs7
            .verify(
                &certs,
                &store,
                Some(MINIMAL_PDF),
                None,
                Pkcs7Flags::BINARY | Pkcs7Flags::NOVERIFY,
            )
            .expect("signature must verify over the original buffer");
    }

    #[test]
    fn object_numbering_continues_after_existing_objects() {
        assert_eq!(next_object_number(MINIMAL_PDF), 3);
        assert_eq!(next_object_number(b"no objects at all"), 1);
    }

    #[test]
    fn pdf_strings_are_escaped() {
        assert_eq!(escape_pdf_string("plain"), "plain");
        assert_eq!(escape_pdf_string("a(b)c\\d"), "a\\(b\\)c\\\\d");
    }

    #[test]
    fn inspection_reports_acroform_signature() {
        let (cert, key) = generate_identity("Dr. Ana Souza");
        let envelope = build_cms_envelope(b"some content", &cert, &key).expect("envelope");

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Object::Array(vec![]),
            "Count" => 0,
        });
        let sig_id = doc.add_object(dictionary! {
            "Type" => "Sig",
            "Filter" => "Adobe.PPKLite",
            "SubFilter" => "adbe.pkcs7.detached",
            "Reason" => Object::String(b"Test".to_vec(), StringFormat::Literal),
            "M" => Object::String(b"D:20260101120000+00'00'".to_vec(), StringFormat::Literal),
            "Contents" => Object::String(envelope, StringFormat::Hexadecimal),
        });
        let field_id = doc.add_object(dictionary! {
            "FT" => "Sig",
            "T" => Object::String(b"Signature1".to_vec(), StringFormat::Literal),
            "V" => Object::Reference(sig_id),
        });
        let acroform_id = doc.add_object(dictionary! {
            "Fields" => Object::Array(vec![Object::Reference(field_id)]),
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
            "AcroForm" => Object::Reference(acroform_id),
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");

        let report = inspect_pdf_signatures(&bytes).expect("inspect");
        assert_eq!(report.signature_count, 1);
        let entry = &report.signatures[0];
        assert_eq!(entry.subfilter.as_deref(), Some("adbe.pkcs7.detached"));
        assert_eq!(entry.reason.as_deref(), Some("Test"));
        assert!(entry.signing_time.is_some());
        let embedded = entry.certificate.as_ref().expect("embedded certificate");
        assert_eq!(embedded.common_name.as_deref(), Some("Dr. Ana Souza"));
    }
}
