use clap::Parser;
use std::path::{Path, PathBuf};

use crate::InputEncoding;

/// Stream path meaning stdin/stdout.
pub const STDIO_PATH: &str = "-";

/// Parse and lint a stream of X.509 certificates, one JSON result per line.
#[derive(Clone, Debug, Parser)]
#[command(name = "certsift")]
#[command(about = "Read PEM or base64 certificates, parse and lint each one, write NDJSON results.")]
pub struct Cli {
    /// Input file. "-" or omitted: stdin.
    #[arg(value_name = "INPUT", conflicts_with = "input_file")]
    pub input: Option<PathBuf>,

    /// Input file (same as INPUT).
    #[arg(long, short = 'i', value_name = "PATH")]
    pub input_file: Option<PathBuf>,

    /// Output file. "-" or omitted: stdout.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Number of parse/lint workers. 0 uses every available core.
    #[arg(long, short = 'w', visible_alias = "threads", value_parser = clap::value_parser!(usize))]
    pub workers: Option<usize>,

    /// Capacity of the block and record queues.
    #[arg(long, short = 'c', visible_alias = "queue-capacity", value_parser = clap::value_parser!(usize))]
    pub channel_size: Option<usize>,

    /// Input encoding.
    #[arg(long, short = 'f', value_enum)]
    pub format: Option<InputEncoding>,

    /// PEM armor label to accept; other labels are skipped.
    #[arg(long, value_name = "LABEL")]
    pub pem_label: Option<String>,

    /// Stop the process on the first certificate that fails to parse.
    #[arg(long)]
    pub fatal_parse_errors: bool,

    /// Emit a JSON record with the error text for certificates that fail to parse.
    #[arg(long)]
    pub json_parse_errors: bool,

    /// Print the supported lints as JSON, one per line, and exit.
    #[arg(long)]
    pub list_lints_json: bool,

    /// TOML config file. Default: `.certsift.toml` in the current directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show a record counter on stderr.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl Cli {
    /// Input path from INPUT or `--input-file`; `None` means stdin.
    pub fn input_path(&self) -> Option<&Path> {
        self.input
            .as_deref()
            .or(self.input_file.as_deref())
            .filter(|p| *p != Path::new(STDIO_PATH))
    }

    /// Output path; `None` means stdout.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_file
            .as_deref()
            .filter(|p| *p != Path::new(STDIO_PATH))
    }
}
