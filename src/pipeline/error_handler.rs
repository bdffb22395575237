//! Pipeline error taxonomy and the fatal exit path.

use std::io;

use crate::transform::ParseError;
use crate::utils::config::FATAL_EXIT_CODE;

/// Errors that stop the whole process. They never cross a queue.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("could not parse certificate (block {seq}): {source}; parsing errors are fatal")]
    FatalParse { seq: u64, source: ParseError },
    #[error("could not marshal output JSON for block {seq}: {source}")]
    Serialize {
        seq: u64,
        source: serde_json::Error,
    },
    #[error("could not write output: {0}")]
    Output(#[source] io::Error),
}

/// Log `err` and terminate the process now. In-flight blocks and buffered output are abandoned.
pub fn fatal(err: &PipelineError) -> ! {
    log::error!("{err}");
    std::process::exit(FATAL_EXIT_CODE)
}
