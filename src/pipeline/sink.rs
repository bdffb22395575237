//! Sink: drains the record queue onto the output stream, one line per record, arrival order.

use log::{debug, error};
use std::io::{BufWriter, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::error_handler::{PipelineError, fatal};
use super::queue::BoundedQueue;
use super::worker::panic_message;
use crate::ResultRecord;
use crate::engine::progress::{ProgressBar, close_counter, create_counter, update_progress_bar};
use crate::utils::config::{PROGRESS_UPDATE_BATCH_SIZE, SINK_BUFFER_SIZE};

/// Write every record from `records` as `json\n` until the queue is closed and drained.
/// Returns the writer (flushed) and the number of lines written. A write error is fatal.
pub fn run_sink<W: Write>(
    records: &BoundedQueue<ResultRecord>,
    output: W,
    progress: Option<&ProgressBar>,
) -> (W, u64) {
    let mut out = BufWriter::with_capacity(SINK_BUFFER_SIZE, output);
    let mut written = 0_u64;
    while let Some(record) = records.get() {
        if let Err(e) = out
            .write_all(record.as_bytes())
            .and_then(|()| out.write_all(b"\n"))
        {
            fatal(&PipelineError::Output(e));
        }
        written += 1;
        if let Some(pb) = progress
            && written.is_multiple_of(PROGRESS_UPDATE_BATCH_SIZE as u64)
        {
            update_progress_bar(pb, PROGRESS_UPDATE_BATCH_SIZE);
        }
    }
    if let Some(pb) = progress {
        update_progress_bar(pb, (written % PROGRESS_UPDATE_BATCH_SIZE as u64) as usize);
    }
    debug!("sink: record queue drained, {written} lines");
    match out.into_inner() {
        Ok(w) => (w, written),
        Err(e) => fatal(&PipelineError::Output(e.into_error())),
    }
}

/// Spawn the sink thread. It never closes `records`; the coordinator does after the workers exit.
///
/// Returns `None` if writing panicked. The queue is still drained to the end so workers never block
/// on a dead sink.
pub fn spawn_sink_thread<W>(
    records: Arc<BoundedQueue<ResultRecord>>,
    output: W,
    show_progress: bool,
) -> JoinHandle<Option<(W, u64)>>
where
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let pb = show_progress.then(|| create_counter("Certificates"));
        let result = catch_unwind(AssertUnwindSafe(|| run_sink(&records, output, pb.as_ref())));
        if let Some(pb) = pb {
            close_counter(&pb);
        }
        match result {
            Ok(done) => Some(done),
            Err(payload) => {
                error!("sink panicked: {}", panic_message(payload.as_ref()));
                let discarded = std::iter::from_fn(|| records.get()).count();
                debug!("sink: discarded {discarded} records after panic");
                None
            }
        }
    })
}
