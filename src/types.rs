//! Public and internal types for the certsift API and pipeline.

use serde::Deserialize;
use std::fmt;

use crate::utils::config::Defaults;

/// One encoded certificate exactly as cut from the input stream: container encoding removed, not yet parsed.
///
/// `seq` is the block's position in segmenter emission order (0-based). It only labels diagnostics;
/// output order is not tied to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBlock {
    seq: u64,
    bytes: Vec<u8>,
}

impl RawBlock {
    pub fn new(seq: u64, bytes: Vec<u8>) -> Self {
        Self { seq, bytes }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// One finished JSON document (no trailing newline). The sink adds the line terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultRecord(Vec<u8>);

impl ResultRecord {
    pub fn new(json: Vec<u8>) -> Self {
        Self(json)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Container encoding of the input stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InputEncoding {
    /// PEM armor blocks, possibly with unrelated bytes between them.
    #[default]
    #[value(alias = "delimited")]
    #[serde(alias = "delimited")]
    Pem,
    /// One standard-base64 DER blob per line.
    #[value(alias = "line-base64")]
    #[serde(alias = "line-base64")]
    Base64,
}

impl fmt::Display for InputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputEncoding::Pem => f.write_str("pem"),
            InputEncoding::Base64 => f.write_str("base64"),
        }
    }
}

/// What a worker does with a block the transform cannot parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseFailurePolicy {
    /// Log a warning, emit nothing.
    #[default]
    WarnAndDrop,
    /// Emit a record with the raw bytes and the error text, no parsed/lint fields.
    EmitErrorJson,
    /// Terminate the process on the first failure.
    Fatal,
}

impl ParseFailurePolicy {
    /// Resolve the two CLI booleans into one policy. Both set is a configuration error.
    pub fn from_flags(fatal: bool, emit_json: bool) -> Result<Self, ConfigError> {
        match (fatal, emit_json) {
            (true, true) => Err(ConfigError::ConflictingParseErrorPolicies),
            (true, false) => Ok(ParseFailurePolicy::Fatal),
            (false, true) => Ok(ParseFailurePolicy::EmitErrorJson),
            (false, false) => Ok(ParseFailurePolicy::WarnAndDrop),
        }
    }
}

/// Configuration errors. Always fatal, always raised before any pipeline stage starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at most one of --json-parse-errors and --fatal-parse-errors may be specified")]
    ConflictingParseErrorPolicies,
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("PEM label must not be empty")]
    EmptyPemLabel,
    #[error("invalid config file {path}: {message}")]
    InvalidConfigFile { path: String, message: String },
}

/// Pipeline options as given (CLI, config file or lib caller). Resolve with [`PipelineOpts::validate`].
#[derive(Clone, Debug)]
pub struct PipelineOpts {
    /// Worker count. 0 means one worker per available core.
    pub workers: usize,
    /// Capacity of both bounded queues.
    pub queue_capacity: usize,
    pub encoding: InputEncoding,
    pub on_parse_error: ParseFailurePolicy,
    /// PEM label accepted by the armor segmenter (e.g. `CERTIFICATE`).
    pub pem_label: String,
    /// Largest armor unit (header through footer) held in memory before it is declared malformed.
    pub max_unit_bytes: usize,
    /// Show a record counter on stderr.
    pub progress: bool,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            workers: Defaults::WORKERS,
            queue_capacity: Defaults::QUEUE_CAPACITY,
            encoding: InputEncoding::default(),
            on_parse_error: ParseFailurePolicy::default(),
            pem_label: Defaults::PEM_LABEL.to_string(),
            max_unit_bytes: Defaults::MAX_UNIT_BYTES,
            progress: false,
        }
    }
}

impl PipelineOpts {
    /// Check invariants and resolve `workers == 0`. The result is immutable for the whole run.
    pub fn validate(self) -> Result<PipelineConfig, ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        let pem_label = self.pem_label.trim().to_string();
        if pem_label.is_empty() {
            return Err(ConfigError::EmptyPemLabel);
        }
        let workers = match self.workers {
            0 => rayon::current_num_threads().max(1),
            n => n,
        };
        Ok(PipelineConfig {
            workers,
            queue_capacity: self.queue_capacity,
            encoding: self.encoding,
            on_parse_error: self.on_parse_error,
            pem_label,
            max_unit_bytes: self.max_unit_bytes.max(Defaults::MIN_UNIT_BYTES),
            progress: self.progress,
        })
    }
}

/// Validated, immutable pipeline configuration handed to the [`Coordinator`](crate::pipeline::Coordinator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    workers: usize,
    queue_capacity: usize,
    encoding: InputEncoding,
    on_parse_error: ParseFailurePolicy,
    pem_label: String,
    max_unit_bytes: usize,
    progress: bool,
}

impl PipelineConfig {
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn encoding(&self) -> InputEncoding {
        self.encoding
    }

    pub fn on_parse_error(&self) -> ParseFailurePolicy {
        self.on_parse_error
    }

    pub fn pem_label(&self) -> &str {
        &self.pem_label
    }

    pub fn max_unit_bytes(&self) -> usize {
        self.max_unit_bytes
    }

    pub fn progress(&self) -> bool {
        self.progress
    }
}

/// Segmenter counters, returned by the segmenter thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentStats {
    /// Blocks put on the block queue.
    pub blocks: u64,
    /// Malformed armor units or undecodable lines (one warning each).
    pub malformed: u64,
    /// Well-formed armor units whose label is not the accepted one.
    pub foreign: u64,
    /// Bytes dropped at end of input that did not form a complete unit.
    pub trailing_bytes: u64,
}

/// Per-worker counters, summed by the coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub parse_failures: u64,
    pub records: u64,
    pub dropped: u64,
    /// Blocks on which the transform panicked. Any non-zero count fails the run.
    pub panicked: u64,
}

impl std::ops::AddAssign for WorkerStats {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.parse_failures += rhs.parse_failures;
        self.records += rhs.records;
        self.dropped += rhs.dropped;
        self.panicked += rhs.panicked;
    }
}

/// Summary of one pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub segment: SegmentStats,
    pub workers: WorkerStats,
    /// Lines written by the sink.
    pub records_written: u64,
}
