//! X.509 transform: DER → owned, serializable certificate summary, then the built-in lint battery.

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::objects::{oid_registry, oid2sn};
use x509_parser::oid_registry::Oid;
use x509_parser::public_key::PublicKey;
use x509_parser::x509::X509Name;

use super::lints::{self, LintDescription, LintResultSet};
use super::{ParseError, Transform};

/// Dotted OID of rsaEncryption.
pub const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AlgorithmInfo {
    pub oid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AlgorithmInfo {
    fn from_oid(oid: &Oid<'_>) -> Self {
        Self {
            oid: oid.to_id_string(),
            name: oid2sn(oid, oid_registry()).ok().map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NameInfo {
    /// RFC 4514 style rendering; empty for an empty name.
    pub dn: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub common_name: Vec<String>,
}

impl NameInfo {
    fn from_name(name: &X509Name<'_>) -> Self {
        Self {
            dn: name.to_string(),
            common_name: name
                .iter_common_name()
                .filter_map(|attr| attr.as_str().ok())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidityInfo {
    pub start: String,
    pub end: String,
    /// `end - start` in seconds; negative when the dates are inverted.
    pub length: i64,
}

fn rfc3339(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| timestamp.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub algorithm: AlgorithmInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<usize>,
}

impl KeyInfo {
    pub fn is_rsa(&self) -> bool {
        self.algorithm.oid == RSA_ENCRYPTION_OID
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BasicConstraintsInfo {
    pub critical: bool,
    pub is_ca: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_path_len: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyUsageInfo {
    pub critical: bool,
    /// Names of the asserted bits, e.g. `digital_signature`, `key_cert_sign`.
    pub usages: Vec<&'static str>,
}

impl KeyUsageInfo {
    pub fn has(&self, usage: &str) -> bool {
        self.usages.iter().any(|u| *u == usage)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubjectAltNameInfo {
    pub critical: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub email_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
}

impl SubjectAltNameInfo {
    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty()
            && self.ip_addresses.is_empty()
            && self.email_addresses.is_empty()
            && self.uris.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExtensionInfo {
    pub oid: String,
    pub critical: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionsInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_constraints: Option<BasicConstraintsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_usage: Option<KeyUsageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_alt_name: Option<SubjectAltNameInfo>,
    /// Every extension in certificate order.
    pub all: Vec<ExtensionInfo>,
}

/// Owned summary of one parsed certificate. This is the `parsed` field of an output record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParsedCertificate {
    /// 1, 2 or 3.
    pub version: u32,
    /// Decimal serial number.
    pub serial_number: String,
    /// DER content octets of the serial INTEGER, hex.
    pub serial_hex: String,
    pub signature_algorithm: AlgorithmInfo,
    pub issuer: NameInfo,
    pub subject: NameInfo,
    pub validity: ValidityInfo,
    pub subject_key_info: KeyInfo,
    pub extensions: ExtensionsInfo,
    pub self_issued: bool,
    pub fingerprint_sha256: String,
    #[serde(skip)]
    pub(crate) raw_serial: Vec<u8>,
}

impl ParsedCertificate {
    pub fn is_ca(&self) -> bool {
        self.extensions
            .basic_constraints
            .as_ref()
            .is_some_and(|bc| bc.is_ca)
    }

    pub fn raw_serial(&self) -> &[u8] {
        &self.raw_serial
    }
}

const KEY_USAGE_NAMES: [&str; 9] = [
    "digital_signature",
    "content_commitment",
    "key_encipherment",
    "data_encipherment",
    "key_agreement",
    "key_cert_sign",
    "crl_sign",
    "encipher_only",
    "decipher_only",
];

fn extensions_info(cert: &X509Certificate<'_>) -> ExtensionsInfo {
    let basic_constraints = cert
        .basic_constraints()
        .ok()
        .flatten()
        .map(|ext| BasicConstraintsInfo {
            critical: ext.critical,
            is_ca: ext.value.ca,
            max_path_len: ext.value.path_len_constraint,
        });
    let key_usage = cert.key_usage().ok().flatten().map(|ext| {
        let flags = ext.value.flags;
        KeyUsageInfo {
            critical: ext.critical,
            usages: KEY_USAGE_NAMES
                .iter()
                .enumerate()
                .filter(|(bit, _)| ((flags >> *bit) & 1) == 1)
                .map(|(_, name)| *name)
                .collect(),
        }
    });
    let subject_alt_name = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            let mut san = SubjectAltNameInfo {
                critical: ext.critical,
                ..Default::default()
            };
            for name in &ext.value.general_names {
                match name {
                    GeneralName::DNSName(s) => san.dns_names.push(s.to_string()),
                    GeneralName::RFC822Name(s) => san.email_addresses.push(s.to_string()),
                    GeneralName::URI(s) => san.uris.push(s.to_string()),
                    GeneralName::IPAddress(bytes) => san.ip_addresses.push(ip_to_string(bytes)),
                    _ => {}
                }
            }
            san
        });
    ExtensionsInfo {
        basic_constraints,
        key_usage,
        subject_alt_name,
        all: cert
            .extensions()
            .iter()
            .map(|ext| ExtensionInfo {
                oid: ext.oid.to_id_string(),
                critical: ext.critical,
            })
            .collect(),
    }
}

fn ip_to_string(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
            std::net::Ipv4Addr::from(octets).to_string()
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => hex::encode(bytes),
    }
}

fn key_info(cert: &X509Certificate<'_>) -> KeyInfo {
    let spki = cert.public_key();
    let bits = match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => Some(rsa.key_size()),
        Ok(PublicKey::EC(point)) => Some(point.key_size()),
        _ => None,
    };
    KeyInfo {
        algorithm: AlgorithmInfo::from_oid(&spki.algorithm.algorithm),
        bits,
    }
}

/// Summarize a parsed certificate. `der` is the exact input block (for the fingerprint).
fn summarize(cert: &X509Certificate<'_>, der: &[u8]) -> ParsedCertificate {
    let validity = cert.validity();
    let start = validity.not_before.timestamp();
    let end = validity.not_after.timestamp();
    let issuer = NameInfo::from_name(cert.issuer());
    let subject = NameInfo::from_name(cert.subject());
    ParsedCertificate {
        version: cert.version().0 + 1,
        serial_number: cert.serial.to_string(),
        serial_hex: hex::encode(cert.raw_serial()),
        signature_algorithm: AlgorithmInfo::from_oid(&cert.signature_algorithm.algorithm),
        self_issued: issuer.dn == subject.dn,
        issuer,
        subject,
        validity: ValidityInfo {
            start: rfc3339(start),
            end: rfc3339(end),
            length: end - start,
        },
        subject_key_info: key_info(cert),
        extensions: extensions_info(cert),
        fingerprint_sha256: hex::encode(Sha256::digest(der)),
        raw_serial: cert.raw_serial().to_vec(),
    }
}

/// DER X.509 parser plus the built-in lint battery.
#[derive(Clone, Copy, Debug, Default)]
pub struct X509Transform;

impl Transform for X509Transform {
    type Certificate = ParsedCertificate;
    type Lints = LintResultSet;
    type Description = LintDescription;

    fn parse(&self, raw: &[u8]) -> Result<ParsedCertificate, ParseError> {
        let (rest, cert) = x509_parser::parse_x509_certificate(raw)
            .map_err(|e| ParseError::Der(e.to_string()))?;
        if !rest.is_empty() {
            return Err(ParseError::TrailingData(rest.len()));
        }
        // v1..v3 are encoded as 0..2; anything else is not a certificate we can describe.
        if cert.version().0 > 2 {
            return Err(ParseError::Der(format!(
                "invalid certificate version {}",
                cert.version().0
            )));
        }
        Ok(summarize(&cert, raw))
    }

    fn lint(&self, cert: &ParsedCertificate) -> LintResultSet {
        lints::run_lints(cert)
    }

    fn describe(&self) -> Vec<LintDescription> {
        lints::describe()
    }
}
