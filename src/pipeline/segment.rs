//! Segmenter: cuts the raw input stream into certificate blocks.
//!
//! Each encoding is a lazy iterator of [`SegmentOutcome`]; [`run_segment_loop`] is the common loop
//! that logs the non-block outcomes and puts blocks on the queue.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, error, info, warn};
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::pipeline::queue::BoundedQueue;
use crate::utils::config::READ_CHUNK_SIZE;
use crate::{InputEncoding, PipelineConfig, RawBlock, SegmentStats};

/// One step of a segmenter scan.
#[derive(Debug)]
pub enum SegmentOutcome {
    /// Decoded payload of one conforming unit.
    Block(Vec<u8>),
    /// A unit that could not be extracted or decoded. `reason` carries the location.
    Malformed { reason: String },
    /// A well-formed armor unit whose label is not the accepted one.
    Foreign { label: String, offset: u64 },
    /// Non-armor bytes between units (not counted as a unit).
    Ignored { bytes: usize },
    /// Bytes at end of input that never became a complete unit.
    Trailing { bytes: usize },
    /// The input stream failed; the scan ends here.
    ReadError(io::Error),
}

const BEGIN: &[u8] = b"-----BEGIN ";
const END: &[u8] = b"-----END ";
const DASHES: &[u8] = b"-----";

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn count_non_whitespace(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| !b.is_ascii_whitespace()).count()
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Decode an armor body: optional `Key: value` header lines ended by a blank line, then base64
/// wrapped over any number of lines.
pub fn decode_armor_body(body: &[u8]) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let mut lines = body.split(|&b| b == b'\n').peekable();
    let has_headers = lines
        .peek()
        .is_some_and(|first| first.contains(&b':'));
    if has_headers {
        for line in lines.by_ref() {
            if trim_ascii(line).is_empty() {
                break;
            }
        }
    }
    let payload: Vec<u8> = lines
        .flatten()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(payload)
}

/// Result of one scan attempt over the buffered bytes.
enum Scan {
    Emit(SegmentOutcome),
    NeedMore,
}

/// Armor (PEM) segmenter over any reader.
///
/// Holds unread bytes in a growing buffer; a unit is only judged once its header, footer, or a
/// following header is in the buffer, or the input has ended.
pub struct PemBlocks<R> {
    reader: R,
    label: Vec<u8>,
    max_unit_bytes: usize,
    buf: Vec<u8>,
    /// Scan position in `buf`.
    pos: usize,
    /// Stream offset of `buf[0]`.
    base: u64,
    /// Non-whitespace garbage skipped since the last emitted outcome.
    ignored: usize,
    eof: bool,
    done: bool,
}

impl<R: Read> PemBlocks<R> {
    pub fn new(reader: R, label: &str, max_unit_bytes: usize) -> Self {
        Self {
            reader,
            label: label.as_bytes().to_vec(),
            max_unit_bytes,
            buf: Vec::new(),
            pos: 0,
            base: 0,
            ignored: 0,
            eof: false,
            done: false,
        }
    }

    fn offset(&self, at: usize) -> u64 {
        self.base + at as u64
    }

    /// Drop consumed bytes and read one more chunk. Sets `eof` on a zero-length read.
    fn fill(&mut self) -> io::Result<()> {
        self.buf.drain(..self.pos);
        self.base += self.pos as u64;
        self.pos = 0;
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK_SIZE, 0);
        let n = loop {
            match self.reader.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        };
        self.buf.truncate(start + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }

    /// Skip to `to`, remembering any non-whitespace bytes passed over.
    fn skip_garbage(&mut self, to: usize) {
        self.ignored += count_non_whitespace(&self.buf[self.pos..to]);
        self.pos = to;
    }

    fn take_ignored(&mut self) -> Option<SegmentOutcome> {
        match std::mem::take(&mut self.ignored) {
            0 => None,
            bytes => Some(SegmentOutcome::Ignored { bytes }),
        }
    }

    fn scan(&mut self) -> Scan {
        let window = &self.buf[self.pos..];
        let Some(rel) = find(window, BEGIN) else {
            // Keep a tail that may hold the start of a header split across reads.
            let keep = if self.eof { 0 } else { BEGIN.len() - 1 };
            let to = self.buf.len().saturating_sub(keep).max(self.pos);
            self.skip_garbage(to);
            return Scan::NeedMore;
        };
        let header_start = self.pos + rel;
        self.skip_garbage(header_start);
        if let Some(ignored) = self.take_ignored() {
            return Scan::Emit(ignored);
        }

        let after_begin = header_start + BEGIN.len();
        let Some(nl) = self.buf[after_begin..].iter().position(|&b| b == b'\n') else {
            return self.incomplete(header_start);
        };
        let header_end = after_begin + nl;
        let header = trim_ascii(&self.buf[after_begin..header_end]);
        let Some(label) = header
            .strip_suffix(DASHES)
            .filter(|l| !l.is_empty() && !l.ends_with(b"-"))
            .map(<[u8]>::to_vec)
        else {
            let reason = format!(
                "invalid armor header at offset {}",
                self.offset(header_start)
            );
            self.pos = after_begin;
            return Scan::Emit(SegmentOutcome::Malformed { reason });
        };

        let body_start = header_end + 1;
        let mut footer = END.to_vec();
        footer.extend_from_slice(&label);
        footer.extend_from_slice(DASHES);
        let footer_at = find(&self.buf[body_start..], &footer).map(|i| body_start + i);
        let next_begin = find(&self.buf[body_start..], BEGIN).map(|i| body_start + i);

        match (footer_at, next_begin) {
            (Some(f), Some(b)) if b < f => self.missing_footer(header_start, b),
            (Some(f), _) => {
                let outcome = self.finish_unit(header_start, &label, body_start, f);
                self.pos = f + footer.len();
                Scan::Emit(outcome)
            }
            (None, Some(b)) => self.missing_footer(header_start, b),
            (None, None) => self.incomplete(header_start),
        }
    }

    /// Another header starts before this unit's footer: the unit can never complete.
    fn missing_footer(&mut self, header_start: usize, next_begin: usize) -> Scan {
        let reason = format!(
            "armor block at offset {} has no matching END line",
            self.offset(header_start)
        );
        self.pos = next_begin;
        Scan::Emit(SegmentOutcome::Malformed { reason })
    }

    /// Header seen, footer not yet: wait for more input unless the input ended or the unit is too large.
    fn incomplete(&mut self, header_start: usize) -> Scan {
        if self.eof {
            let bytes = self.buf.len() - header_start;
            self.pos = self.buf.len();
            return Scan::Emit(SegmentOutcome::Trailing { bytes });
        }
        if self.buf.len() - header_start > self.max_unit_bytes {
            let reason = format!(
                "armor block at offset {} exceeds {} bytes without an END line",
                self.offset(header_start),
                self.max_unit_bytes
            );
            self.pos = header_start + BEGIN.len();
            return Scan::Emit(SegmentOutcome::Malformed { reason });
        }
        Scan::NeedMore
    }

    fn finish_unit(
        &self,
        header_start: usize,
        label: &[u8],
        body_start: usize,
        footer_at: usize,
    ) -> SegmentOutcome {
        let offset = self.offset(header_start);
        if label != self.label.as_slice() {
            return SegmentOutcome::Foreign {
                label: String::from_utf8_lossy(label).into_owned(),
                offset,
            };
        }
        match decode_armor_body(&self.buf[body_start..footer_at]) {
            Ok(bytes) => SegmentOutcome::Block(bytes),
            Err(e) => SegmentOutcome::Malformed {
                reason: format!("armor block at offset {offset} has undecodable content: {e}"),
            },
        }
    }
}

impl<R: Read> Iterator for PemBlocks<R> {
    type Item = SegmentOutcome;

    fn next(&mut self) -> Option<SegmentOutcome> {
        while !self.done {
            if let Scan::Emit(outcome) = self.scan() {
                return Some(outcome);
            }
            if self.eof {
                self.done = true;
                let trailing = std::mem::take(&mut self.ignored);
                return (trailing > 0).then_some(SegmentOutcome::Trailing { bytes: trailing });
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(SegmentOutcome::ReadError(e));
            }
        }
        None
    }
}

/// Line segmenter: one standard-base64 blob per line. Blank lines are skipped silently.
///
/// A line longer than `max_line_bytes` is reported as malformed and skipped up to its newline
/// without being buffered.
pub struct Base64Lines<R> {
    reader: R,
    max_line_bytes: usize,
    line: Vec<u8>,
    line_no: u64,
    done: bool,
}

impl<R: BufRead> Base64Lines<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            line: Vec::new(),
            line_no: 0,
            done: false,
        }
    }

    /// Read the next line into `line`. `Ok(None)` at end of input, `Ok(Some(true))` if the line
    /// went over the cap (and `line` was discarded).
    fn read_line(&mut self) -> io::Result<Option<bool>> {
        self.line.clear();
        let mut read_any = false;
        let mut overlong = false;
        loop {
            let available = match self.reader.fill_buf() {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                break;
            }
            read_any = true;
            let (used, newline) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if !overlong {
                if self.line.len() + used > self.max_line_bytes {
                    overlong = true;
                    self.line.clear();
                } else {
                    self.line.extend_from_slice(&available[..used]);
                }
            }
            self.reader.consume(used);
            if newline {
                break;
            }
        }
        Ok(read_any.then_some(overlong))
    }
}

impl<R: BufRead> Iterator for Base64Lines<R> {
    type Item = SegmentOutcome;

    fn next(&mut self) -> Option<SegmentOutcome> {
        while !self.done {
            match self.read_line() {
                Ok(None) => self.done = true,
                Ok(Some(true)) => {
                    self.line_no += 1;
                    return Some(SegmentOutcome::Malformed {
                        reason: format!(
                            "line {}: longer than {} bytes",
                            self.line_no, self.max_line_bytes
                        ),
                    });
                }
                Ok(Some(false)) => {
                    self.line_no += 1;
                    let text = trim_ascii(&self.line);
                    if text.is_empty() {
                        continue;
                    }
                    return Some(match STANDARD.decode(text) {
                        Ok(bytes) => SegmentOutcome::Block(bytes),
                        Err(e) => SegmentOutcome::Malformed {
                            reason: format!("line {}: could not decode base64: {e}", self.line_no),
                        },
                    });
                }
                Err(e) => {
                    self.done = true;
                    return Some(SegmentOutcome::ReadError(e));
                }
            }
        }
        None
    }
}

/// Build the segmenter for `config.encoding()` over `reader`.
pub fn segment_iter<R: Read + 'static>(
    reader: R,
    config: &PipelineConfig,
) -> Box<dyn Iterator<Item = SegmentOutcome>> {
    match config.encoding() {
        InputEncoding::Pem => Box::new(PemBlocks::new(
            reader,
            config.pem_label(),
            config.max_unit_bytes(),
        )),
        InputEncoding::Base64 => Box::new(Base64Lines::new(
            BufReader::new(reader),
            config.max_unit_bytes(),
        )),
    }
}

/// Run the common segment loop: put blocks on `blocks`, log and count everything else.
/// Returns the counters, or the read error that ended the scan.
pub fn run_segment_loop<I>(blocks: &BoundedQueue<RawBlock>, iter: I) -> Result<SegmentStats>
where
    I: Iterator<Item = SegmentOutcome>,
{
    let mut stats = SegmentStats::default();
    for outcome in iter {
        match outcome {
            SegmentOutcome::Block(bytes) => {
                blocks.put(RawBlock::new(stats.blocks, bytes));
                stats.blocks += 1;
            }
            SegmentOutcome::Malformed { reason } => {
                warn!("skipping malformed input: {reason}");
                stats.malformed += 1;
            }
            SegmentOutcome::Foreign { label, offset } => {
                warn!("skipping armor block labelled {label:?} at offset {offset}");
                stats.foreign += 1;
            }
            SegmentOutcome::Ignored { bytes } => {
                debug!("ignored {bytes} non-armor bytes between blocks");
            }
            SegmentOutcome::Trailing { bytes } => {
                info!("dropping {bytes} trailing bytes that do not form a complete block");
                stats.trailing_bytes += bytes as u64;
            }
            SegmentOutcome::ReadError(e) => {
                error!("error reading input: {e}");
                return Err(e).context("read input");
            }
        }
    }
    debug!("segmenter: input exhausted, {} blocks", stats.blocks);
    Ok(stats)
}

/// Spawn the segmenter thread. It never closes `blocks`; the coordinator does after joining it.
pub fn spawn_segment_thread<R>(
    reader: R,
    config: &PipelineConfig,
    blocks: Arc<BoundedQueue<RawBlock>>,
) -> JoinHandle<Result<SegmentStats>>
where
    R: Read + Send + 'static,
{
    let config = config.clone();
    thread::spawn(move || {
        match config.encoding() {
            InputEncoding::Pem => info!("Reading PEM certificates..."),
            InputEncoding::Base64 => info!("Reading base64 certificates..."),
        }
        let iter = segment_iter(reader, &config);
        run_segment_loop(&blocks, iter)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn armor(label: &str, payload: &[u8]) -> String {
        let b64 = STANDARD.encode(payload);
        let mut s = format!("-----BEGIN {label}-----\n");
        for chunk in b64.as_bytes().chunks(64) {
            s.push_str(std::str::from_utf8(chunk).unwrap());
            s.push('\n');
        }
        s.push_str(&format!("-----END {label}-----\n"));
        s
    }

    fn pem_outcomes(input: &str) -> Vec<SegmentOutcome> {
        PemBlocks::new(Cursor::new(input.as_bytes().to_vec()), "CERTIFICATE", 1 << 20).collect()
    }

    fn blocks(outcomes: &[SegmentOutcome]) -> Vec<Vec<u8>> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                SegmentOutcome::Block(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    fn malformed(outcomes: &[SegmentOutcome]) -> usize {
        outcomes
            .iter()
            .filter(|o| matches!(o, SegmentOutcome::Malformed { .. }))
            .count()
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(pem_outcomes("").is_empty());
    }

    #[test]
    fn test_two_blocks_with_garbage_between() {
        let input = format!(
            "{}\nsome junk here\n{}\ngoop",
            armor("CERTIFICATE", b"first"),
            armor("CERTIFICATE", b"second")
        );
        let out = pem_outcomes(&input);
        assert_eq!(blocks(&out), vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(malformed(&out), 0);
        assert!(matches!(out.last(), Some(SegmentOutcome::Trailing { bytes: 4 })));
    }

    #[test]
    fn test_header_without_footer_mid_stream_is_malformed() {
        let input = format!(
            "{}-----BEGIN CERTIFICATE-----\nAAAA\n{}",
            armor("CERTIFICATE", b"one"),
            armor("CERTIFICATE", b"two")
        );
        let out = pem_outcomes(&input);
        assert_eq!(blocks(&out), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(malformed(&out), 1);
    }

    #[test]
    fn test_undecodable_body_is_malformed_and_scan_resumes() {
        let input = format!(
            "-----BEGIN CERTIFICATE-----\n!!!not base64!!!\n-----END CERTIFICATE-----\n{}",
            armor("CERTIFICATE", b"ok")
        );
        let out = pem_outcomes(&input);
        assert_eq!(blocks(&out), vec![b"ok".to_vec()]);
        assert_eq!(malformed(&out), 1);
    }

    #[test]
    fn test_foreign_label_is_skipped() {
        let input = format!(
            "{}{}",
            armor("PRIVATE KEY", b"secret"),
            armor("CERTIFICATE", b"cert")
        );
        let out = pem_outcomes(&input);
        assert_eq!(blocks(&out), vec![b"cert".to_vec()]);
        assert!(out.iter().any(
            |o| matches!(o, SegmentOutcome::Foreign { label, offset: 0 } if label == "PRIVATE KEY")
        ));
    }

    #[test]
    fn test_truncated_block_at_eof_is_trailing() {
        let input = format!(
            "{}-----BEGIN CERTIFICATE-----\nAAAA",
            armor("CERTIFICATE", b"x")
        );
        let out = pem_outcomes(&input);
        assert_eq!(blocks(&out).len(), 1);
        assert_eq!(malformed(&out), 0);
        assert!(matches!(out.last(), Some(SegmentOutcome::Trailing { .. })));
    }

    #[test]
    fn test_headers_in_body_are_skipped() {
        let b64 = STANDARD.encode(b"with headers");
        let input = format!(
            "-----BEGIN CERTIFICATE-----\nProc-Type: 4,ENCRYPTED\nDEK-Info: none\n\n{b64}\n-----END CERTIFICATE-----\n"
        );
        assert_eq!(blocks(&pem_outcomes(&input)), vec![b"with headers".to_vec()]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let input = armor("CERTIFICATE", b"windows").replace('\n', "\r\n");
        assert_eq!(blocks(&pem_outcomes(&input)), vec![b"windows".to_vec()]);
    }

    /// Reader that hands out one byte per read, so every boundary is split.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(1);
            self.0.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_blocks_split_across_reads() {
        let input = format!(
            "junk{}{}",
            armor("CERTIFICATE", &[7u8; 300]),
            armor("CERTIFICATE", b"tail")
        );
        let out: Vec<_> =
            PemBlocks::new(Trickle(Cursor::new(input.into_bytes())), "CERTIFICATE", 1 << 20)
                .collect();
        assert_eq!(blocks(&out), vec![vec![7u8; 300], b"tail".to_vec()]);
    }

    #[test]
    fn test_oversized_unit_is_malformed() {
        let mut input = String::from("-----BEGIN CERTIFICATE-----\n");
        input.push_str(&"A".repeat(3 * READ_CHUNK_SIZE));
        input.push_str(&format!("\n-----END CERTIFICATE-----\n{}", armor("CERTIFICATE", b"next")));
        let out: Vec<_> = PemBlocks::new(
            Cursor::new(input.into_bytes()),
            "CERTIFICATE",
            READ_CHUNK_SIZE,
        )
        .collect();
        assert!(malformed(&out) >= 1);
        assert_eq!(blocks(&out).last(), Some(&b"next".to_vec()));
    }

    #[test]
    fn test_base64_lines_skip_bad_and_blank() {
        let input = format!(
            "{}\n\nnot*base64\n{}\r\n",
            STANDARD.encode(b"a"),
            STANDARD.encode(b"b")
        );
        let out: Vec<_> = Base64Lines::new(Cursor::new(input.into_bytes()), 1 << 20).collect();
        assert_eq!(blocks(&out), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(malformed(&out), 1);
        assert!(matches!(&out[1], SegmentOutcome::Malformed { reason } if reason.starts_with("line 3")));
    }

    #[test]
    fn test_base64_line_over_cap_is_malformed_and_scan_resumes() {
        let cap = 64;
        let input = format!(
            "{}\n{}\n{}\n",
            STANDARD.encode(b"a"),
            "A".repeat(10 * cap),
            STANDARD.encode(b"b")
        );
        // Small buffer so the long line arrives across many fills.
        let reader = BufReader::with_capacity(16, Cursor::new(input.into_bytes()));
        let out: Vec<_> = Base64Lines::new(reader, cap).collect();
        assert_eq!(blocks(&out), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(malformed(&out), 1);
        assert!(matches!(
            &out[1],
            SegmentOutcome::Malformed { reason } if reason == "line 2: longer than 64 bytes"
        ));
    }

    #[test]
    fn test_base64_unterminated_last_line_over_cap() {
        let out: Vec<_> = Base64Lines::new(Cursor::new("A".repeat(100).into_bytes()), 32).collect();
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], SegmentOutcome::Malformed { .. }));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }
    }

    #[test]
    fn test_read_error_ends_loop_with_error() {
        let q = BoundedQueue::new(4);
        let iter = PemBlocks::new(FailingReader, "CERTIFICATE", 1 << 20);
        let err = run_segment_loop(&q, iter).unwrap_err();
        assert!(format!("{err:#}").contains("disk on fire"));
    }

    #[test]
    fn test_segment_loop_counts_and_numbers_blocks() {
        let q = BoundedQueue::new(8);
        let input = format!(
            "{}-----BEGIN CERTIFICATE-----\nAAAA\n{}",
            armor("CERTIFICATE", b"one"),
            armor("CERTIFICATE", b"two")
        );
        let iter = PemBlocks::new(Cursor::new(input.into_bytes()), "CERTIFICATE", 1 << 20);
        let stats = run_segment_loop(&q, iter).unwrap();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.malformed, 1);
        q.close();
        let seqs: Vec<u64> = std::iter::from_fn(|| q.get()).map(|b| b.seq()).collect();
        assert_eq!(seqs, vec![0, 1]);
    }
}
