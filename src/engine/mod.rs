//! Engine module: CLI surface around the pipeline

pub mod arg_parser;
pub mod cli;
pub mod progress;
pub mod streams;

// Re-export commonly used functions
pub use arg_parser::Cli;
pub use cli::{handle_run, setup_opts, write_descriptions};
pub use streams::{open_input, open_output};
