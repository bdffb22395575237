//! Pipeline components: queues, segmenter, workers, sink and the coordinator that wires them.

pub mod error_handler;
pub mod orchestrator;
pub mod queue;
pub mod segment;
pub mod sink;
pub mod worker;

pub use error_handler::{PipelineError, fatal};
pub use orchestrator::Coordinator;
pub use queue::BoundedQueue;
pub use segment::{
    Base64Lines, PemBlocks, SegmentOutcome, run_segment_loop, segment_iter, spawn_segment_thread,
};
pub use sink::{run_sink, spawn_sink_thread};
pub use worker::{BlockOutcome, process_block, spawn_transform_workers};
