//! Progress counter on stderr for records written (total is unknown up front).

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a counter for unknown total (shows count without percentage)
pub fn create_counter(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " certs"
    )))
}

/// Advance the counter by `n`. Uses try_lock so a contended bar never stalls the sink.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if n == 0 {
        return;
    }
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
    }
}

/// Final refresh and newline so later log lines start clean.
pub fn close_counter(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.lock() {
        let _ = bar.refresh();
        eprintln!();
    }
}
