//! Certsift: streaming X.509 parse-and-lint pipeline (segmenter → workers → sink)

pub mod engine;
pub mod pipeline;
pub mod transform;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

use log::debug;
use std::io::{Read, Write};

use crate::pipeline::Coordinator;
use crate::transform::X509Transform;

/// Result alias used by public certsift API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: parse and lint every certificate in `input` with the built-in X.509 transform,
/// writing one JSON record per line to `output`.
///
/// - Configuration errors ([`ConfigError`]) are returned before any thread starts.
/// - Under [`ParseFailurePolicy::Fatal`], or on an output write error, the process exits; see
///   [`pipeline::fatal`].
///
/// For a custom [`Transform`](crate::transform::Transform), build a [`Coordinator`] directly.
///
/// ```ignore
/// let stats = certsift::lint_stream(std::fs::File::open("certs.pem")?, std::io::stdout(), &Default::default())?;
/// ```
pub fn lint_stream<R, W>(input: R, output: W, opts: &PipelineOpts) -> Result<RunStats>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let config = opts.clone().validate()?;
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        config
    );
    let (_, stats) = Coordinator::new(config, X509Transform).run(input, output)?;
    Ok(stats)
}
