//! Application configuration constants.
//! Defaults and limits in one place.

use std::sync::OnceLock;

// ---- Package / file names (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Config file looked up in the current directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }
}

// ---- Pipeline defaults ----

/// Built-in defaults for [`PipelineOpts`](crate::PipelineOpts).
pub struct Defaults;

impl Defaults {
    pub const WORKERS: usize = 1;
    /// Capacity of the block queue and the record queue.
    pub const QUEUE_CAPACITY: usize = 1000;
    pub const PEM_LABEL: &'static str = "CERTIFICATE";
    /// An armor unit larger than this without a footer is declared malformed (1 MiB).
    pub const MAX_UNIT_BYTES: usize = 1024 * 1024;
    /// Floor for `max_unit_bytes` so a single read chunk always fits.
    pub const MIN_UNIT_BYTES: usize = 4 * 1024;
}

// ---- Segmenter I/O ----

/// Bytes requested from the input per read while scanning armor.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

// ---- Sink ----

/// Capacity of the sink's buffered writer.
pub const SINK_BUFFER_SIZE: usize = 64 * 1024;

/// Progress counter is refreshed every this many records.
pub const PROGRESS_UPDATE_BATCH_SIZE: usize = 100;

// ---- Exit ----

/// Exit status for fatal pipeline errors (fatal parse policy, unwritable output, unserializable record).
pub const FATAL_EXIT_CODE: i32 = 1;
