//! CLI command handler: run the pipeline over one input, or print the lint list with --list-lints-json.

use anyhow::{Context, Result};
use log::debug;
use std::io::{self, Write};

use crate::engine::arg_parser::Cli;
use crate::engine::streams::{open_input, open_output};
use crate::pipeline::Coordinator;
use crate::transform::{Transform, X509Transform};
use crate::utils::certsift_toml::CertsiftToml;
use crate::utils::config::PackagePaths;
use crate::utils::{apply_file_to_opts, load_config_file, setup_logging};
use crate::{ParseFailurePolicy, PipelineOpts};

/// Defaults, then config file, then CLI flags. Fails on conflicting parse-error flags.
pub fn setup_opts(cli: &Cli, file: Option<&CertsiftToml>) -> Result<PipelineOpts> {
    let mut opts = PipelineOpts::default();
    if let Some(file) = file {
        apply_file_to_opts(file, &mut opts);
    }
    if let Some(n) = cli.workers {
        opts.workers = n;
    }
    if let Some(n) = cli.channel_size {
        opts.queue_capacity = n;
    }
    if let Some(f) = cli.format {
        opts.encoding = f;
    }
    if let Some(label) = &cli.pem_label {
        opts.pem_label = label.clone();
    }
    if let Some(p) = cli.progress {
        opts.progress = p;
    }
    if cli.fatal_parse_errors || cli.json_parse_errors {
        opts.on_parse_error =
            ParseFailurePolicy::from_flags(cli.fatal_parse_errors, cli.json_parse_errors)?;
    }
    Ok(opts)
}

/// Print `transform`'s self-description to `out`, one JSON object per line.
pub fn write_descriptions<T: Transform, W: Write>(transform: &T, mut out: W) -> Result<()> {
    for desc in transform.describe() {
        serde_json::to_writer(&mut out, &desc).context("serialize lint description")?;
        out.write_all(b"\n").context("write lint description")?;
    }
    out.flush().context("flush lint descriptions")?;
    Ok(())
}

/// Run the pipeline (default) or list lints. Configuration errors are returned before any stream is opened.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let file = load_config_file(cli.config.as_deref(), &cwd)?;
    let verbose = cli
        .verbose
        .or_else(|| file.as_ref().and_then(|f| f.verbose()))
        .unwrap_or(false);
    setup_logging(verbose);

    if cli.list_lints_json {
        return write_descriptions(&X509Transform, io::stdout().lock());
    }

    let config = setup_opts(cli, file.as_ref())?.validate()?;
    debug!(
        "{} CONFIG:{:#?}",
        PackagePaths::get().pkg_name().to_uppercase(),
        config
    );

    let input = open_input(cli.input_path())?;
    let output = open_output(cli.output_path())?;
    let coordinator = Coordinator::new(config, X509Transform);
    let (_, stats) = coordinator.run(input, output)?;
    debug!(
        "dropped: {} unparsable, {} foreign-label blocks, {} trailing bytes",
        stats.workers.dropped, stats.segment.foreign, stats.segment.trailing_bytes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InputEncoding;
    use clap::Parser;

    #[test]
    fn test_cli_overrides_file() {
        let file: CertsiftToml =
            toml::from_str("[settings]\nworkers = 8\nformat = \"base64\"\n").unwrap();
        let cli = Cli::parse_from(["certsift", "-w", "2"]);
        let opts = setup_opts(&cli, Some(&file)).unwrap();
        assert_eq!(opts.workers, 2);
        assert_eq!(opts.encoding, InputEncoding::Base64);
    }

    #[test]
    fn test_policy_flags() {
        let cli = Cli::parse_from(["certsift", "--json-parse-errors"]);
        let opts = setup_opts(&cli, None).unwrap();
        assert_eq!(opts.on_parse_error, ParseFailurePolicy::EmitErrorJson);

        let cli = Cli::parse_from(["certsift", "--json-parse-errors", "--fatal-parse-errors"]);
        let err = setup_opts(&cli, None).unwrap_err();
        assert!(err.to_string().contains("at most one"));
    }

    #[test]
    fn test_file_policy_kept_without_flags() {
        let file: CertsiftToml =
            toml::from_str("[settings]\non_parse_error = \"fatal\"\n").unwrap();
        let cli = Cli::parse_from(["certsift"]);
        let opts = setup_opts(&cli, Some(&file)).unwrap();
        assert_eq!(opts.on_parse_error, ParseFailurePolicy::Fatal);
    }

    #[test]
    fn test_descriptions_one_json_per_line() {
        let mut out = Vec::new();
        write_descriptions(&X509Transform, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), X509Transform.describe().len());
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v["name"].is_string());
        }
    }
}
