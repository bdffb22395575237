//! Load `.certsift.toml` (or an explicit `--config` file). CLI only; lib callers build [`PipelineOpts`] themselves.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::utils::config::PackagePaths;
use crate::{ConfigError, InputEncoding, ParseFailurePolicy, PipelineOpts};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertsiftToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    format: Option<InputEncoding>,
    on_parse_error: Option<ParseFailurePolicy>,
    pem_label: Option<String>,
    verbose: Option<bool>,
    progress: Option<bool>,
}

impl CertsiftToml {
    /// `verbose` is read before the logger exists, so it lives outside [`PipelineOpts`].
    pub fn verbose(&self) -> Option<bool> {
        self.settings.verbose
    }
}

fn parse_file(path: &Path) -> Result<CertsiftToml, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidConfigFile {
        path: path.display().to_string(),
        message,
    };
    let s = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    toml::from_str(&s).map_err(|e| invalid(e.to_string()))
}

/// Load the config file.
///
/// - `explicit: Some(path)` → the file must exist and parse; otherwise a [`ConfigError`].
/// - `explicit: None` → `.certsift.toml` in `dir` if present; a broken implicit file is logged and ignored.
pub fn load_config_file(
    explicit: Option<&Path>,
    dir: &Path,
) -> Result<Option<CertsiftToml>, ConfigError> {
    if let Some(path) = explicit {
        return parse_file(path).map(Some);
    }
    let path: PathBuf = dir.join(PackagePaths::get().config_filename());
    if !path.is_file() {
        return Ok(None);
    }
    Ok(parse_file(&path)
        .map_err(|e| log::warn!("{e}; ignoring"))
        .ok())
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($section:expr, $opts:expr, $field:ident => $opts_field:ident) => {
        if let Some(v) = $section.$field.clone() {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_opts(file: &CertsiftToml, opts: &mut PipelineOpts) {
    let s = &file.settings;
    apply_file_opt!(s, opts, workers => workers);
    apply_file_opt!(s, opts, queue_capacity => queue_capacity);
    apply_file_opt!(s, opts, format => encoding);
    apply_file_opt!(s, opts, on_parse_error => on_parse_error);
    apply_file_opt!(s, opts, pem_label => pem_label);
    apply_file_opt!(s, opts, progress => progress);
}
