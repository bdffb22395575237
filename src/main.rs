//! Certsift CLI: parse and lint a stream of certificates into NDJSON.

use anyhow::Result;
use certsift::engine::arg_parser::Cli;
use certsift::engine::handle_run;
use clap::Parser;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
