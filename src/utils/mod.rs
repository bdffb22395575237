pub mod certsift_toml;
pub mod config;
pub mod logger;

pub use certsift_toml::{apply_file_to_opts, load_config_file};
pub use config::*;
pub use logger::setup_logging;
