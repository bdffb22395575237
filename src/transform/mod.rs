//! Parse + lint transform applied by each worker. The pipeline only sees this trait.

pub mod lints;
pub mod x509;

use serde::Serialize;

pub use lints::{LintDescription, LintResultSet, LintStatus};
pub use x509::{ParsedCertificate, X509Transform};

/// Why a block could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    Der(String),
    #[error("trailing data: {0} bytes after certificate")]
    TrailingData(usize),
}

/// Opaque parse-and-lint step. Implementations must be stateless across blocks;
/// one instance is shared by every worker.
pub trait Transform: Send + Sync + 'static {
    /// Parsed form of one block.
    type Certificate: Serialize;
    /// Lint results for one parsed block.
    type Lints: Serialize;
    /// One entry of the self-description printed by `--list-lints-json`.
    type Description: Serialize;

    fn parse(&self, raw: &[u8]) -> Result<Self::Certificate, ParseError>;

    fn lint(&self, cert: &Self::Certificate) -> Self::Lints;

    fn describe(&self) -> Vec<Self::Description>;
}
