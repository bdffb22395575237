//! Open the input and output streams named on the command line.

use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// `None` reads stdin. The segmenter buffers, so the file is returned unbuffered.
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn Read + Send>> {
    match path {
        None => {
            info!("reading from stdin");
            Ok(Box::new(io::stdin()))
        }
        Some(p) => {
            let file =
                File::open(p).with_context(|| format!("open input file {}", p.display()))?;
            info!("reading from {}", p.display());
            Ok(Box::new(file))
        }
    }
}

/// `None` writes stdout. Creates or truncates the file.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    match path {
        None => {
            info!("writing to stdout");
            Ok(Box::new(io::stdout()))
        }
        Some(p) => {
            let file =
                File::create(p).with_context(|| format!("create output file {}", p.display()))?;
            info!("writing to {}", p.display());
            Ok(Box::new(file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_has_path_in_error() {
        let missing = std::env::temp_dir().join("certsift-no-such-input.pem");
        let err = open_input(Some(&missing)).err().unwrap();
        assert!(format!("{err:#}").contains("certsift-no-such-input.pem"));
    }

    #[test]
    fn test_output_file_is_created() {
        let path = std::env::temp_dir().join(format!("certsift-out-{}.ndjson", std::process::id()));
        {
            let mut out = open_output(Some(&path)).unwrap();
            out.write_all(b"{}\n").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"{}\n");
        let _ = std::fs::remove_file(&path);
    }
}
