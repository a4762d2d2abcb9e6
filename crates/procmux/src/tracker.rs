//! Command tracker and marker-based demultiplexer.
//!
//! The interpreter executes packets sequentially, so begin/end marker pairs
//! appear on stdout in submit order. The tracker exploits this: interleaved
//! stdout chunks are attributed with a single FIFO head pointer, never a
//! marker-to-id map. Stderr carries no framing; chunks are appended to the
//! FIFO head's error buffer (best-effort attribution, documented weakness).
//!
//! The tracker is a pure data structure: it parses chunks and hands removed
//! records back to the caller, which resolves promises and runs callbacks
//! outside the state lock.

use crate::result::{CompletionCallback, ResultSender};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Pre-marker noise buffer cap. The trailing window kept is far larger than
/// any marker, so a marker split across chunks is never lost.
const PRE_BUF_CAP: usize = 256 * 1024;

/// Sentinel the engine may emit on stderr around a forced restart.
pub(crate) const TIMEOUT_SENTINEL: &[u8] = b"__VS_INTERNAL_TIMEOUT__";

/// State for one in-flight command.
pub(crate) struct CmdRecord {
    pub id: u64,
    pub begin_marker: Vec<u8>,
    pub end_marker: Vec<u8>,
    /// Bytes received on stdout before the begin marker was seen.
    pub pre_buf: Vec<u8>,
    pub out_buf: Vec<u8>,
    pub err_buf: Vec<u8>,
    pub begun: bool,
    pub timed_out: bool,
    pub started: Instant,
    /// Absolute deadline; `None` means no timeout.
    pub deadline: Option<Instant>,
    pub sender: Option<ResultSender>,
    pub callback: Option<CompletionCallback>,
}

impl std::fmt::Debug for CmdRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdRecord")
            .field("id", &self.id)
            .field("begun", &self.begun)
            .field("timed_out", &self.timed_out)
            .field("out_len", &self.out_buf.len())
            .field("err_len", &self.err_buf.len())
            .finish()
    }
}

#[derive(Default)]
struct TrackerState {
    inflight: HashMap<u64, CmdRecord>,
    /// Submit order; the front is the command currently expected on stdout.
    order: VecDeque<u64>,
}

/// In-flight command registry and demultiplexer.
pub(crate) struct CommandTracker {
    state: Mutex<TrackerState>,
    /// Timeout sentinels expected on stderr that must not fail the head.
    pending_sentinels: AtomicU32,
    inflight_count: AtomicU32,
    high_water: AtomicU32,
    dropped_stderr_chunks: AtomicU64,
}

impl CommandTracker {
    pub fn new() -> Self {
        CommandTracker {
            state: Mutex::new(TrackerState::default()),
            pending_sentinels: AtomicU32::new(0),
            inflight_count: AtomicU32::new(0),
            high_water: AtomicU32::new(0),
            dropped_stderr_chunks: AtomicU64::new(0),
        }
    }

    /// Register an in-flight record. Must happen before the packet is
    /// enqueued for writing so readers can demultiplex immediately.
    pub fn register(&self, record: CmdRecord) {
        let id = record.id;
        let mut state = self.state.lock().expect("tracker state poisoned");
        state.order.push_back(id);
        state.inflight.insert(id, record);
        drop(state);

        let now = self.inflight_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut hw = self.high_water.load(Ordering::Relaxed);
        while now > hw {
            match self.high_water.compare_exchange_weak(
                hw,
                now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => hw = actual,
            }
        }
    }

    /// Feed a stdout chunk through the demultiplexer. Returns every record
    /// completed by this chunk, in completion order, with `out_buf` holding
    /// exactly the bytes between its markers.
    pub fn on_stdout(&self, chunk: &[u8]) -> Vec<CmdRecord> {
        let mut completed = Vec::new();
        let mut carry = chunk.to_vec();

        let mut state = self.state.lock().expect("tracker state poisoned");
        while !carry.is_empty() {
            let Some(&head) = state.order.front() else {
                break;
            };
            if !state.inflight.contains_key(&head) {
                // Expired entry: the map half was removed by the scanner.
                state.order.pop_front();
                continue;
            }

            let finished = {
                let record = state
                    .inflight
                    .get_mut(&head)
                    .expect("head id present in map");

                if !record.begun {
                    record.pre_buf.append(&mut carry);
                    let Some(pos) = find(&record.pre_buf, &record.begin_marker) else {
                        if record.pre_buf.len() > PRE_BUF_CAP {
                            let excess = record.pre_buf.len() - PRE_BUF_CAP;
                            record.pre_buf.drain(..excess);
                        }
                        break;
                    };
                    let after = skip_crlf(&record.pre_buf, pos + record.begin_marker.len());
                    carry = record.pre_buf.split_off(after);
                    record.pre_buf.clear();
                    record.begun = true;
                    tracing::trace!(id = record.id, "begin marker parsed");
                }

                record.out_buf.append(&mut carry);
                let Some(pos) = find(&record.out_buf, &record.end_marker) else {
                    break;
                };
                let tail = skip_crlf(&record.out_buf, pos + record.end_marker.len());
                // Bytes after the end marker belong to the next command.
                carry = record.out_buf.split_off(tail);
                record.out_buf.truncate(pos);
                tracing::trace!(
                    id = record.id,
                    out_len = record.out_buf.len(),
                    "end marker parsed"
                );
                true
            };

            if finished {
                let record = state
                    .inflight
                    .remove(&head)
                    .expect("completed id present in map");
                state.order.pop_front();
                completed.push(record);
            }
        }
        drop(state);

        if !completed.is_empty() {
            self.inflight_count
                .fetch_sub(completed.len() as u32, Ordering::Relaxed);
        }
        completed
    }

    /// Feed a stderr chunk. Appends to the head command's error buffer; an
    /// unexpected timeout sentinel removes and returns the head, marked
    /// timed out, for the caller to fail.
    pub fn on_stderr(&self, chunk: &[u8]) -> Option<CmdRecord> {
        let mut buf = chunk.to_vec();
        let mut fail_head = false;

        while let Some(pos) = find(&buf, TIMEOUT_SENTINEL) {
            let end = skip_crlf(&buf, pos + TIMEOUT_SENTINEL.len());
            buf.drain(pos..end);

            if self.pending_sentinels.load(Ordering::Relaxed) > 0 {
                self.pending_sentinels.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            // Only the first unexpected sentinel per chunk is acted on.
            fail_head = true;
            break;
        }

        let mut state = self.state.lock().expect("tracker state poisoned");
        let Some(&head) = state.order.front() else {
            if !buf.is_empty() {
                self.dropped_stderr_chunks.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        };
        let Some(record) = state.inflight.get_mut(&head) else {
            if !buf.is_empty() {
                self.dropped_stderr_chunks.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        };

        if !buf.is_empty() {
            record.err_buf.extend_from_slice(&buf);
        }

        if fail_head {
            record.timed_out = true;
            let record = state
                .inflight
                .remove(&head)
                .expect("head id present in map");
            state.order.pop_front();
            drop(state);
            self.inflight_count.fetch_sub(1, Ordering::Relaxed);
            return Some(record);
        }
        None
    }

    /// Remove and return every record whose deadline has passed, marked
    /// timed out.
    pub fn expire_due(&self, now: Instant) -> Vec<CmdRecord> {
        let mut state = self.state.lock().expect("tracker state poisoned");
        if state.inflight.is_empty() {
            return Vec::new();
        }

        let due: Vec<u64> = state
            .order
            .iter()
            .copied()
            .filter(|id| {
                state
                    .inflight
                    .get(id)
                    .and_then(|r| r.deadline)
                    .is_some_and(|deadline| now >= deadline)
            })
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(mut record) = state.inflight.remove(&id) {
                record.timed_out = true;
                state.order.retain(|&queued| queued != id);
                expired.push(record);
            }
        }
        drop(state);

        if !expired.is_empty() {
            self.inflight_count
                .fetch_sub(expired.len() as u32, Ordering::Relaxed);
        }
        expired
    }

    /// Remove and return every in-flight record. Used by `stop`.
    pub fn drain_all(&self) -> Vec<CmdRecord> {
        let mut state = self.state.lock().expect("tracker state poisoned");
        state.order.clear();
        let drained: Vec<CmdRecord> = {
            let mut records: Vec<(u64, CmdRecord)> = state.inflight.drain().collect();
            // Deterministic abort order for waiters.
            records.sort_by_key(|(id, _)| *id);
            records.into_iter().map(|(_, record)| record).collect()
        };
        drop(state);

        if !drained.is_empty() {
            self.inflight_count
                .fetch_sub(drained.len() as u32, Ordering::Relaxed);
        }
        drained
    }

    /// Announce that a timeout sentinel may arrive on stderr and must be
    /// swallowed rather than fail the head command.
    pub fn expect_sentinel(&self) {
        self.pending_sentinels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inflight_count(&self) -> u32 {
        self.inflight_count.load(Ordering::Relaxed)
    }

    pub fn high_water(&self) -> u32 {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn dropped_stderr_chunks(&self) -> u64 {
        self.dropped_stderr_chunks.load(Ordering::Relaxed)
    }
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Index just past an optional `\r` and `\n` starting at `pos`.
fn skip_crlf(buf: &[u8], mut pos: usize) -> usize {
    if pos < buf.len() && buf[pos] == b'\r' {
        pos += 1;
    }
    if pos < buf.len() && buf[pos] == b'\n' {
        pos += 1;
    }
    pos
}
