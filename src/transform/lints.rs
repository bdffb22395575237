//! Built-in lint battery run against every parsed certificate.

use serde::Serialize;
use std::collections::BTreeMap;

use super::x509::ParsedCertificate;

/// Outcome of one lint on one certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LintStatus {
    #[serde(rename = "pass")]
    Pass,
    /// Lint does not apply to this certificate.
    #[serde(rename = "NA")]
    NotApplicable,
    #[serde(rename = "notice")]
    Notice,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LintResult {
    pub result: LintStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LintResult {
    fn status(result: LintStatus) -> Self {
        Self {
            result,
            details: None,
        }
    }

    fn with_details(result: LintStatus, details: impl Into<String>) -> Self {
        Self {
            result,
            details: Some(details.into()),
        }
    }
}

/// Where a lint's requirement comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LintSource {
    #[serde(rename = "RFC5280")]
    Rfc5280,
    #[serde(rename = "CABF_BR")]
    CabfBaselineRequirements,
    #[serde(rename = "Community")]
    Community,
}

/// Results of the whole battery on one certificate. This is the `lints` field of an output record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LintResultSet {
    pub results: BTreeMap<&'static str, LintResult>,
    pub notices_present: bool,
    pub warnings_present: bool,
    pub errors_present: bool,
}

impl LintResultSet {
    pub fn get(&self, name: &str) -> Option<LintStatus> {
        self.results.get(name).map(|r| r.result)
    }
}

/// Self-description of one lint, printed by `--list-lints-json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LintDescription {
    pub name: &'static str,
    pub description: &'static str,
    pub citation: &'static str,
    pub source: LintSource,
}

struct Lint {
    name: &'static str,
    description: &'static str,
    citation: &'static str,
    source: LintSource,
    applies: fn(&ParsedCertificate) -> bool,
    check: fn(&ParsedCertificate) -> LintResult,
}

const MAX_SERIAL_OCTETS: usize = 20;
const MIN_RSA_BITS: usize = 2048;
const MAX_SUBSCRIBER_VALIDITY_SECS: i64 = 398 * 24 * 60 * 60;

fn always(_: &ParsedCertificate) -> bool {
    true
}

fn is_ca(c: &ParsedCertificate) -> bool {
    c.is_ca()
}

fn is_subscriber(c: &ParsedCertificate) -> bool {
    !c.is_ca()
}

fn pass_if(ok: bool, failing: LintStatus) -> LintResult {
    LintResult::status(if ok { LintStatus::Pass } else { failing })
}

static LINTS: &[Lint] = &[
    Lint {
        name: "e_cert_extensions_version_not_3",
        description: "Extensions may only be present in version 3 certificates",
        citation: "RFC 5280: 4.1.2.9",
        source: LintSource::Rfc5280,
        applies: |c| !c.extensions.all.is_empty(),
        check: |c| pass_if(c.version == 3, LintStatus::Error),
    },
    Lint {
        name: "e_serial_number_not_positive",
        description: "Certificate serial number must be a positive integer",
        citation: "RFC 5280: 4.1.2.2",
        source: LintSource::Rfc5280,
        applies: always,
        check: |c| {
            let serial = c.raw_serial();
            let negative = serial.first().is_some_and(|b| b & 0x80 != 0);
            let zero = serial.iter().all(|&b| b == 0);
            pass_if(!negative && !zero, LintStatus::Error)
        },
    },
    Lint {
        name: "e_serial_number_longer_than_20_octets",
        description: "Certificate serial number must not be longer than 20 octets",
        citation: "RFC 5280: 4.1.2.2",
        source: LintSource::Rfc5280,
        applies: always,
        check: |c| {
            let len = c.raw_serial().len();
            if len > MAX_SERIAL_OCTETS {
                LintResult::with_details(LintStatus::Error, format!("serial is {len} octets"))
            } else {
                LintResult::status(LintStatus::Pass)
            }
        },
    },
    Lint {
        name: "e_validity_time_not_positive",
        description: "notAfter must not be earlier than notBefore",
        citation: "RFC 5280: 4.1.2.5",
        source: LintSource::Rfc5280,
        applies: always,
        check: |c| pass_if(c.validity.length >= 0, LintStatus::Error),
    },
    Lint {
        name: "e_ca_basic_constraints_not_critical",
        description: "CA certificates must mark the basicConstraints extension critical",
        citation: "RFC 5280: 4.2.1.9",
        source: LintSource::Rfc5280,
        applies: is_ca,
        check: |c| {
            let critical = c
                .extensions
                .basic_constraints
                .as_ref()
                .is_some_and(|bc| bc.critical);
            pass_if(critical, LintStatus::Error)
        },
    },
    Lint {
        name: "e_ca_key_cert_sign_not_set",
        description: "CA certificates must include keyUsage with keyCertSign asserted",
        citation: "CABF BR: 7.1.2.1",
        source: LintSource::CabfBaselineRequirements,
        applies: is_ca,
        check: |c| match &c.extensions.key_usage {
            None => LintResult::with_details(LintStatus::Error, "keyUsage extension missing"),
            Some(ku) => pass_if(ku.has("key_cert_sign"), LintStatus::Error),
        },
    },
    Lint {
        name: "e_sub_cert_missing_san",
        description: "Subscriber certificates must contain a subjectAltName with at least one entry",
        citation: "CABF BR: 7.1.2.7.12",
        source: LintSource::CabfBaselineRequirements,
        applies: is_subscriber,
        check: |c| {
            let present = c
                .extensions
                .subject_alt_name
                .as_ref()
                .is_some_and(|san| !san.is_empty());
            pass_if(present, LintStatus::Error)
        },
    },
    Lint {
        name: "e_sub_cert_common_name_not_from_san",
        description: "A subscriber commonName must repeat a DNS name or IP address from the subjectAltName",
        citation: "CABF BR: 7.1.4.3",
        source: LintSource::CabfBaselineRequirements,
        applies: |c| is_subscriber(c) && !c.subject.common_name.is_empty(),
        check: |c| {
            let san = c.extensions.subject_alt_name.as_ref();
            let in_san = |cn: &String| {
                san.is_some_and(|san| {
                    san.dns_names.iter().any(|d| d.eq_ignore_ascii_case(cn))
                        || san.ip_addresses.iter().any(|ip| ip == cn)
                })
            };
            match c.subject.common_name.iter().find(|&cn| !in_san(cn)) {
                None => LintResult::status(LintStatus::Pass),
                Some(cn) => LintResult::with_details(
                    LintStatus::Error,
                    format!("commonName {cn:?} not found in subjectAltName"),
                ),
            }
        },
    },
    Lint {
        name: "w_sub_cert_validity_over_398_days",
        description: "Subscriber certificates should not be valid for more than 398 days",
        citation: "CABF BR: 6.3.2",
        source: LintSource::CabfBaselineRequirements,
        applies: is_subscriber,
        check: |c| {
            pass_if(
                c.validity.length <= MAX_SUBSCRIBER_VALIDITY_SECS,
                LintStatus::Warn,
            )
        },
    },
    Lint {
        name: "e_rsa_mod_less_than_2048_bits",
        description: "RSA public keys must have a modulus of at least 2048 bits",
        citation: "CABF BR: 6.1.5",
        source: LintSource::CabfBaselineRequirements,
        applies: |c| c.subject_key_info.is_rsa() && c.subject_key_info.bits.is_some(),
        check: |c| match c.subject_key_info.bits {
            Some(bits) if bits < MIN_RSA_BITS => {
                LintResult::with_details(LintStatus::Error, format!("modulus is {bits} bits"))
            }
            _ => LintResult::status(LintStatus::Pass),
        },
    },
    Lint {
        name: "e_subject_empty_without_san",
        description: "A certificate with an empty subject must carry a subjectAltName",
        citation: "RFC 5280: 4.2.1.6",
        source: LintSource::Rfc5280,
        applies: |c| c.subject.dn.is_empty(),
        check: |c| pass_if(c.extensions.subject_alt_name.is_some(), LintStatus::Error),
    },
    Lint {
        name: "n_sub_cert_key_usage_missing",
        description: "Subscriber certificates usually carry a keyUsage extension",
        citation: "RFC 5280: 4.2.1.3",
        source: LintSource::Community,
        applies: is_subscriber,
        check: |c| pass_if(c.extensions.key_usage.is_some(), LintStatus::Notice),
    },
];

/// Run every lint against `cert`.
pub fn run_lints(cert: &ParsedCertificate) -> LintResultSet {
    let mut set = LintResultSet::default();
    for lint in LINTS {
        let result = if (lint.applies)(cert) {
            (lint.check)(cert)
        } else {
            LintResult::status(LintStatus::NotApplicable)
        };
        match result.result {
            LintStatus::Notice => set.notices_present = true,
            LintStatus::Warn => set.warnings_present = true,
            LintStatus::Error => set.errors_present = true,
            LintStatus::Pass | LintStatus::NotApplicable => {}
        }
        set.results.insert(lint.name, result);
    }
    set
}

pub fn describe() -> Vec<LintDescription> {
    LINTS
        .iter()
        .map(|l| LintDescription {
            name: l.name,
            description: l.description,
            citation: l.citation,
            source: l.source,
        })
        .collect()
}
