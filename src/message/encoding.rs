//! DER encoding of request content and decoding of embedded values
//!
//! Proof-of-possession signatures are computed over the DER encoding of the
//! `CertTemplate`, and the issuance backend receives the DER of the whole
//! `CertRequest`. Control and CRL-entry extension values arrive as DER and
//! are read here.

use chrono::{DateTime, Datelike, Utc};
use yasna::models::ObjectIdentifier;
use yasna::{DERWriter, Tag};

use super::crmf::{CertRequest, CertTemplate, OptionalValidity, TimeEncoding, UniqueIdentifier};
use super::{AlgorithmIdentifier, SerialNumber};
use crate::error::{CmpError, Result};

const TAG_SEQUENCE: u8 = 0x30;
const TAG_UTC_TIME: u8 = 0x17;
const TAG_GENERALIZED_TIME: u8 = 0x18;
const CONTEXT_CONSTRUCTED: u8 = 0xA0;

/// DER of a `CertTemplate` (RFC 4211 Section 5 tagging).
pub fn encode_cert_template(template: &CertTemplate) -> Result<Vec<u8>> {
    let prepared = PreparedTemplate::new(template)?;
    Ok(yasna::construct_der(|writer| {
        write_template(writer, template, &prepared)
    }))
}

/// DER of a `CertRequest`.
pub fn encode_cert_request(request: &CertRequest) -> Result<Vec<u8>> {
    let template = encode_cert_template(&request.cert_template)?;
    let controls = match &request.controls {
        Some(controls) => Some(
            controls
                .iter()
                .map(|c| Ok((parse_oid(&c.oid)?, c.value.as_slice())))
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|seq| {
            seq.next().write_i64(request.cert_req_id);
            seq.next().write_der(&template);
            if let Some(controls) = &controls {
                seq.next().write_sequence(|ctrls| {
                    for (oid, value) in controls {
                        ctrls.next().write_sequence(|attr| {
                            attr.next().write_oid(oid);
                            attr.next().write_der(value);
                        });
                    }
                });
            }
        })
    }))
}

/// Read an `ENUMERATED` value, e.g. a `CRLReason`.
pub fn decode_enumerated(der: &[u8]) -> Result<i64> {
    yasna::parse_der(der, |reader| reader.read_enum())
        .map_err(|e| CmpError::bad_data_format(format!("Malformed ENUMERATED value: {}", e)))
}

/// Read the serial number out of a `CertId ::= SEQUENCE { issuer GeneralName, serialNumber INTEGER }`.
pub fn decode_cert_id_serial(der: &[u8]) -> Result<SerialNumber> {
    let (magnitude, positive) = yasna::parse_der(der, |reader| {
        reader.read_sequence(|seq| {
            seq.next().read_der()?;
            seq.next().read_bigint_bytes()
        })
    })
    .map_err(|e| CmpError::bad_data_format(format!("Malformed CertId: {}", e)))?;
    if !positive {
        return Err(CmpError::bad_data_format(
            "CertId serial number is negative",
        ));
    }
    Ok(SerialNumber::from_bytes(&magnitude))
}

/// Parse a dotted OID such as `1.2.840.113549.1.1.11`.
pub fn parse_oid(dotted: &str) -> Result<ObjectIdentifier> {
    let components = dotted
        .split('.')
        .map(|arc| arc.parse::<u64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| CmpError::bad_data_format(format!("Malformed object identifier '{}'", dotted)))?;
    if components.len() < 2 {
        return Err(CmpError::bad_data_format(format!(
            "Object identifier '{}' has fewer than two arcs",
            dotted
        )));
    }
    Ok(ObjectIdentifier::new(components))
}

struct PreparedTemplate {
    signing_alg: Option<ObjectIdentifier>,
    public_key: Option<Vec<u8>>,
    validity: Option<(Option<Vec<u8>>, Option<Vec<u8>>)>,
    issuer_uid_bits: Option<usize>,
    subject_uid_bits: Option<usize>,
    extensions: Vec<ObjectIdentifier>,
}

impl PreparedTemplate {
    fn new(template: &CertTemplate) -> Result<Self> {
        let signing_alg = template
            .signing_alg
            .as_ref()
            .map(|alg| parse_oid(&alg.algorithm))
            .transpose()?;
        // publicKey [6] IMPLICIT SubjectPublicKeyInfo
        let public_key = template
            .public_key
            .as_deref()
            .map(|spki| implicit_constructed(6, spki))
            .transpose()?;
        let validity = template
            .validity
            .as_ref()
            .map(|v: &OptionalValidity| -> Result<_> {
                let not_before = v
                    .not_before
                    .as_ref()
                    .map(|time| encode_time(time, v.not_before_encoding))
                    .transpose()?;
                let not_after = v
                    .not_after
                    .as_ref()
                    .map(|time| encode_time(time, v.not_after_encoding))
                    .transpose()?;
                Ok((not_before, not_after))
            })
            .transpose()?;
        let issuer_uid_bits = template.issuer_uid.as_ref().map(bit_length).transpose()?;
        let subject_uid_bits = template.subject_uid.as_ref().map(bit_length).transpose()?;
        let extensions = template
            .extensions
            .iter()
            .flatten()
            .map(|ext| parse_oid(&ext.extn_id))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            signing_alg,
            public_key,
            validity,
            issuer_uid_bits,
            subject_uid_bits,
            extensions,
        })
    }
}

fn write_template(writer: DERWriter, template: &CertTemplate, prepared: &PreparedTemplate) {
    writer.write_sequence(|seq| {
        if let Some(version) = template.version {
            seq.next()
                .write_tagged_implicit(Tag::context(0), |w| w.write_i64(version));
        }
        if let Some(serial) = &template.serial_number {
            seq.next().write_tagged_implicit(Tag::context(1), |w| {
                if serial.as_bytes().is_empty() {
                    w.write_i64(0)
                } else {
                    w.write_bigint_bytes(serial.as_bytes(), true)
                }
            });
        }
        if let (Some(alg), Some(oid)) = (&template.signing_alg, &prepared.signing_alg) {
            seq.next()
                .write_tagged_implicit(Tag::context(2), |w| write_algorithm(w, oid, alg));
        }
        if let Some(issuer) = &template.issuer {
            seq.next()
                .write_tagged(Tag::context(3), |w| w.write_der(issuer.as_der()));
        }
        if let Some((not_before, not_after)) = &prepared.validity {
            seq.next().write_tagged_implicit(Tag::context(4), |w| {
                w.write_sequence(|validity| {
                    if let Some(time) = not_before {
                        validity
                            .next()
                            .write_tagged(Tag::context(0), |w| w.write_der(time));
                    }
                    if let Some(time) = not_after {
                        validity
                            .next()
                            .write_tagged(Tag::context(1), |w| w.write_der(time));
                    }
                })
            });
        }
        if let Some(subject) = &template.subject {
            seq.next()
                .write_tagged(Tag::context(5), |w| w.write_der(subject.as_der()));
        }
        if let Some(spki) = &prepared.public_key {
            seq.next().write_der(spki);
        }
        if let (Some(uid), Some(bits)) = (&template.issuer_uid, prepared.issuer_uid_bits) {
            seq.next().write_tagged_implicit(Tag::context(7), |w| {
                w.write_bitvec_bytes(&uid.bytes, bits)
            });
        }
        if let (Some(uid), Some(bits)) = (&template.subject_uid, prepared.subject_uid_bits) {
            seq.next().write_tagged_implicit(Tag::context(8), |w| {
                w.write_bitvec_bytes(&uid.bytes, bits)
            });
        }
        if let Some(extensions) = &template.extensions {
            seq.next().write_tagged_implicit(Tag::context(9), |w| {
                w.write_sequence(|exts| {
                    for (ext, oid) in extensions.iter().zip(&prepared.extensions) {
                        exts.next().write_sequence(|e| {
                            e.next().write_oid(oid);
                            if ext.critical {
                                e.next().write_bool(true);
                            }
                            e.next().write_bytes(&ext.extn_value);
                        });
                    }
                })
            });
        }
    })
}

fn write_algorithm(writer: DERWriter, oid: &ObjectIdentifier, alg: &AlgorithmIdentifier) {
    writer.write_sequence(|seq| {
        seq.next().write_oid(oid);
        if let Some(params) = &alg.parameters {
            seq.next().write_der(params);
        }
    })
}

/// Replace the universal SEQUENCE tag of `der` with a constructed context tag.
fn implicit_constructed(tag_number: u8, der: &[u8]) -> Result<Vec<u8>> {
    match der.first() {
        Some(&TAG_SEQUENCE) if tag_number < 31 => {
            let mut retagged = der.to_vec();
            retagged[0] = CONTEXT_CONSTRUCTED | tag_number;
            Ok(retagged)
        }
        _ => Err(CmpError::bad_data_format(
            "Expected a DER SEQUENCE in certificate template",
        )),
    }
}

/// Significant bits of a `UniqueIdentifier` BIT STRING.
fn bit_length(uid: &UniqueIdentifier) -> Result<usize> {
    let unused = usize::from(uid.unused_bits);
    if unused > 7 || (uid.bytes.is_empty() && unused != 0) {
        return Err(CmpError::bad_data_format(format!(
            "UniqueIdentifier with {} bytes cannot have {} unused bits",
            uid.bytes.len(),
            unused
        )));
    }
    Ok(uid.bytes.len() * 8 - unused)
}

/// DER of a `Time` value in the requested alternative.
fn encode_time(time: &DateTime<Utc>, encoding: TimeEncoding) -> Result<Vec<u8>> {
    let utc_range = (1950..2050).contains(&time.year());
    let (tag, text) = match encoding {
        TimeEncoding::UtcTime if !utc_range => {
            return Err(CmpError::bad_data_format(format!(
                "Validity bound {} is outside the UTCTime range",
                time
            )))
        }
        TimeEncoding::UtcTime => (TAG_UTC_TIME, time.format("%y%m%d%H%M%SZ").to_string()),
        TimeEncoding::Rfc5280 if utc_range => {
            (TAG_UTC_TIME, time.format("%y%m%d%H%M%SZ").to_string())
        }
        TimeEncoding::Rfc5280 | TimeEncoding::GeneralizedTime => {
            (TAG_GENERALIZED_TIME, generalized_time_text(time))
        }
    };
    let mut der = Vec::with_capacity(2 + text.len());
    der.push(tag);
    der.push(text.len() as u8);
    der.extend_from_slice(text.as_bytes());
    Ok(der)
}

/// DER GeneralizedTime text: fractional seconds only when non-zero, without
/// trailing zeros.
fn generalized_time_text(time: &DateTime<Utc>) -> String {
    let mut text = time.format("%Y%m%d%H%M%S").to_string();
    let nanos = time.timestamp_subsec_nanos() % 1_000_000_000;
    if nanos > 0 {
        let fraction = format!("{:09}", nanos);
        text.push('.');
        text.push_str(fraction.trim_end_matches('0'));
    }
    text.push('Z');
    text
}
