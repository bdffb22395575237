use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, error, warn};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::error_handler::{PipelineError, fatal};
use super::queue::BoundedQueue;
use crate::transform::Transform;
use crate::{ParseFailurePolicy, RawBlock, ResultRecord, WorkerStats};

fn as_base64<S: Serializer>(bytes: &&[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
}

/// Shape of one output line.
#[derive(Serialize)]
struct Record<'a, C, L> {
    #[serde(serialize_with = "as_base64")]
    raw: &'a [u8],
    #[serde(skip_serializing_if = "Option::is_none")]
    parsed: Option<&'a C>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lints: Option<&'a L>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// What became of one block.
#[derive(Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    Record(ResultRecord),
    /// Parse failed under warn-and-drop.
    Dropped,
}

fn to_record<C: Serialize, L: Serialize>(
    seq: u64,
    record: &Record<'_, C, L>,
) -> Result<ResultRecord, PipelineError> {
    serde_json::to_vec(record)
        .map(ResultRecord::new)
        .map_err(|source| PipelineError::Serialize { seq, source })
}

/// Parse, lint and serialize one block under `policy`. Pure: logging aside, no side effects.
/// `Err` means the process must stop (fatal policy or unserializable record).
pub fn process_block<T: Transform>(
    transform: &T,
    block: &RawBlock,
    policy: ParseFailurePolicy,
) -> Result<BlockOutcome, PipelineError> {
    let raw = block.as_bytes();
    match transform.parse(raw) {
        Ok(cert) => {
            let lints = transform.lint(&cert);
            let record = Record {
                raw,
                parsed: Some(&cert),
                lints: Some(&lints),
                error: None,
            };
            to_record(block.seq(), &record).map(BlockOutcome::Record)
        }
        Err(source) => match policy {
            ParseFailurePolicy::Fatal => Err(PipelineError::FatalParse {
                seq: block.seq(),
                source,
            }),
            ParseFailurePolicy::WarnAndDrop => {
                warn!("could not parse certificate (block {}): {source}", block.seq());
                Ok(BlockOutcome::Dropped)
            }
            ParseFailurePolicy::EmitErrorJson => {
                warn!("could not parse certificate (block {}): {source}", block.seq());
                let record: Record<'_, T::Certificate, T::Lints> = Record {
                    raw,
                    parsed: None,
                    lints: None,
                    error: Some(source.to_string()),
                };
                to_record(block.seq(), &record).map(BlockOutcome::Record)
            }
        },
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Single worker: take blocks until the block queue is closed and drained, put records.
/// Any [`PipelineError`] ends the process on the spot. A transform panic is contained to its block:
/// it is logged and counted, and the worker keeps draining so the producer never blocks on a dead pool.
fn transform_worker_loop<T: Transform>(
    id: usize,
    transform: Arc<T>,
    blocks: Arc<BoundedQueue<RawBlock>>,
    records: Arc<BoundedQueue<ResultRecord>>,
    policy: ParseFailurePolicy,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(block) = blocks.get() {
        stats.processed += 1;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            process_block(transform.as_ref(), &block, policy)
        }));
        match outcome {
            Ok(Ok(BlockOutcome::Record(record))) => {
                records.put(record);
                stats.records += 1;
            }
            Ok(Ok(BlockOutcome::Dropped)) => {
                stats.parse_failures += 1;
                stats.dropped += 1;
            }
            Ok(Err(err)) => fatal(&err),
            Err(payload) => {
                error!(
                    "worker {id}: transform panicked on block {}: {}",
                    block.seq(),
                    panic_message(payload.as_ref())
                );
                stats.panicked += 1;
            }
        }
    }
    debug!("worker {id}: block queue drained, {} blocks", stats.processed);
    stats
}

/// Spawn `num_workers` interchangeable workers over the shared queues. Each returns its counters when
/// the block queue is closed and empty.
pub fn spawn_transform_workers<T: Transform>(
    transform: &Arc<T>,
    blocks: &Arc<BoundedQueue<RawBlock>>,
    records: &Arc<BoundedQueue<ResultRecord>>,
    policy: ParseFailurePolicy,
    num_workers: usize,
) -> Vec<JoinHandle<WorkerStats>> {
    (0..num_workers)
        .map(|id| {
            let transform = Arc::clone(transform);
            let blocks = Arc::clone(blocks);
            let records = Arc::clone(records);
            thread::spawn(move || transform_worker_loop(id, transform, blocks, records, policy))
        })
        .collect()
}
