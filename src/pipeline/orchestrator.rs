use anyhow::{Result, anyhow};
use log::{debug, info};
use std::io::{Read, Write};
use std::sync::Arc;

use super::queue::BoundedQueue;
use super::segment::spawn_segment_thread;
use super::sink::spawn_sink_thread;
use super::worker::spawn_transform_workers;
use crate::transform::Transform;
use crate::{PipelineConfig, RunStats, WorkerStats};

/// Owns the pipeline configuration and the shared transform; wires segmenter → workers → sink
/// for one input/output pair and shuts them down in order.
pub struct Coordinator<T: Transform> {
    config: PipelineConfig,
    transform: Arc<T>,
}

impl<T: Transform> Coordinator<T> {
    pub fn new(config: PipelineConfig, transform: T) -> Self {
        Self {
            config,
            transform: Arc::new(transform),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Stream `input` through the pipeline into `output`. Returns the flushed writer and run counters.
    ///
    /// Shutdown order: segmenter joined → block queue closed → workers joined → record queue closed →
    /// sink joined → output flushed. A read error ends the segmenter early; everything already queued
    /// still reaches the output before the error is returned.
    pub fn run<R, W>(&self, input: R, output: W) -> Result<(W, RunStats)>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let capacity = self.config.queue_capacity();
        let blocks = Arc::new(BoundedQueue::new(capacity));
        let records = Arc::new(BoundedQueue::new(capacity));
        debug!(
            "pipeline: {} workers, queue capacity {capacity}, format {}",
            self.config.workers(),
            self.config.encoding()
        );

        let segment_handle = spawn_segment_thread(input, &self.config, Arc::clone(&blocks));
        let sink_handle =
            spawn_sink_thread(Arc::clone(&records), output, self.config.progress());
        let worker_handles = spawn_transform_workers(
            &self.transform,
            &blocks,
            &records,
            self.config.on_parse_error(),
            self.config.workers(),
        );

        let segment_result = segment_handle
            .join()
            .unwrap_or_else(|_| Err(anyhow!("segmenter thread panicked")));
        blocks.close();

        let mut worker_stats = WorkerStats::default();
        let mut worker_panicked = false;
        for h in worker_handles {
            match h.join() {
                Ok(stats) => worker_stats += stats,
                Err(_) => worker_panicked = true,
            }
        }
        records.close();

        let (mut output, records_written) = sink_handle
            .join()
            .ok()
            .flatten()
            .ok_or_else(|| anyhow!("sink thread panicked"))?;
        output.flush()?;

        if worker_panicked {
            return Err(anyhow!("worker thread panicked"));
        }
        if worker_stats.panicked > 0 {
            return Err(anyhow!(
                "transform panicked on {} of {} blocks",
                worker_stats.panicked,
                worker_stats.processed
            ));
        }
        let segment = segment_result?;
        let stats = RunStats {
            segment,
            workers: worker_stats,
            records_written,
        };
        info!(
            "{} blocks read, {} records written, {} parse failures, {} malformed inputs",
            stats.segment.blocks,
            stats.records_written,
            stats.workers.parse_failures,
            stats.segment.malformed
        );
        Ok((output, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ParseError;
    use crate::{InputEncoding, ParseFailurePolicy, PipelineOpts};
    use std::io::{self, Cursor};

    struct Echo;

    impl Transform for Echo {
        type Certificate = usize;
        type Lints = ();
        type Description = ();

        fn parse(&self, raw: &[u8]) -> Result<usize, ParseError> {
            if raw == b"bad" {
                Err(ParseError::Der("bad".into()))
            } else {
                Ok(raw.len())
            }
        }

        fn lint(&self, _cert: &usize) {}

        fn describe(&self) -> Vec<()> {
            vec![]
        }
    }

    fn config(workers: usize, capacity: usize, policy: ParseFailurePolicy) -> PipelineConfig {
        PipelineOpts {
            workers,
            queue_capacity: capacity,
            encoding: InputEncoding::Base64,
            on_parse_error: policy,
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn lines(n: usize) -> String {
        use base64::Engine;
        (0..n)
            .map(|i| base64::engine::general_purpose::STANDARD.encode(format!("block-{i}")) + "\n")
            .collect()
    }

    #[test]
    fn test_every_block_yields_one_line() {
        for (workers, capacity) in [(1, 1), (4, 1), (3, 7), (8, 1000)] {
            let c = Coordinator::new(config(workers, capacity, ParseFailurePolicy::WarnAndDrop), Echo);
            let (out, stats) = c.run(Cursor::new(lines(50)), Vec::new()).unwrap();
            assert_eq!(out.iter().filter(|b| **b == b'\n').count(), 50);
            assert_eq!(stats.segment.blocks, 50);
            assert_eq!(stats.records_written, 50);
        }
    }

    #[test]
    fn test_dropped_parse_failures_are_counted() {
        use base64::Engine;
        let bad = base64::engine::general_purpose::STANDARD.encode("bad");
        let input = format!("{}{bad}\n{}", lines(2), lines(1));
        let c = Coordinator::new(config(2, 2, ParseFailurePolicy::WarnAndDrop), Echo);
        let (_, stats) = c.run(Cursor::new(input), Vec::new()).unwrap();
        assert_eq!(stats.segment.blocks, 4);
        assert_eq!(stats.workers.dropped, 1);
        assert_eq!(stats.records_written, 3);
    }

    /// Panics on every block.
    struct Boom;

    impl Transform for Boom {
        type Certificate = usize;
        type Lints = ();
        type Description = ();

        fn parse(&self, _raw: &[u8]) -> Result<usize, ParseError> {
            panic!("boom");
        }

        fn lint(&self, _cert: &usize) {}

        fn describe(&self) -> Vec<()> {
            vec![]
        }
    }

    #[test]
    fn test_panicking_transform_fails_run_without_hanging() {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let c = Coordinator::new(config(1, 1, ParseFailurePolicy::WarnAndDrop), Boom);
            let _ = tx.send(c.run(Cursor::new(lines(10)), Vec::new()).map(|(_, s)| s));
        });
        let result = rx
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("coordinator did not finish after transform panics");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("transform panicked on 10 of 10 blocks"));
    }

    struct FailAfter {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::other("device gone")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn test_read_error_drains_then_fails() {
        let input = FailAfter {
            data: Cursor::new(lines(3).into_bytes()),
        };
        let (tx, rx) = std::sync::mpsc::channel();
        #[derive(Debug)]
        struct Tee(std::sync::mpsc::Sender<Vec<u8>>);
        impl Write for Tee {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let _ = self.0.send(buf.to_vec());
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let c = Coordinator::new(config(2, 1, ParseFailurePolicy::WarnAndDrop), Echo);
        let err = c.run(input, Tee(tx)).unwrap_err();
        assert!(format!("{err:#}").contains("device gone"));
        let written: Vec<u8> = rx.try_iter().flatten().collect();
        assert_eq!(written.iter().filter(|b| **b == b'\n').count(), 3);
    }
}
