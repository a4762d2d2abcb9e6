//! The bulk channel itself: open, read, write, probe, chunked transfer.

use crate::error::{ProcmuxError, Result};
use crate::shm::layout::{offset, HEADER_BYTES, MAGIC_AND_VERSION};
use crate::shm::sync::{NamedEvent, NamedMutex};
use memmap2::MmapMut;
use std::ffi::CString;
use std::fs::File;
use std::os::unix::io::FromRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sleep between sequence polls when no events are available.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Transfer direction through the channel. `HostToShell` is the wire's
/// a2b lane, `ShellToHost` the b2a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToShell,
    ShellToHost,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::HostToShell => 0,
            Direction::ShellToHost => 1,
        }
    }

    fn seq_offset(self) -> usize {
        match self {
            Direction::HostToShell => offset::A2B_SEQ,
            Direction::ShellToHost => offset::B2A_SEQ,
        }
    }

    fn length_offset(self) -> usize {
        match self {
            Direction::HostToShell => offset::A2B_LENGTH,
            Direction::ShellToHost => offset::B2A_LENGTH,
        }
    }

    fn wire_tag(self) -> &'static str {
        match self {
            Direction::HostToShell => "a2b",
            Direction::ShellToHost => "b2a",
        }
    }
}

/// Non-blocking snapshot of the channel header.
#[derive(Debug, Clone, Copy)]
pub struct HeaderSnapshot {
    pub magic: u32,
    pub version: u32,
    pub frame_bytes: u64,
    pub host_to_shell_seq: u64,
    pub shell_to_host_seq: u64,
    pub host_to_shell_length: u64,
    pub shell_to_host_length: u64,
}

#[derive(Debug)]
struct DirectionEvents {
    request: NamedEvent,
    ack: NamedEvent,
}

/// A named shared-memory channel for bulk payloads.
///
/// Opening creates the mapping when it does not exist yet and initializes
/// the header; re-opening validates the magic/version sentinel and the
/// frame capacity. The named objects persist until [`BulkChannel::unlink`]
/// so a writer may exit before its reader attaches.
#[derive(Debug)]
pub struct BulkChannel {
    name: String,
    frame_bytes: u64,
    map: MmapMut,
    _file: File,
    mutex: NamedMutex,
    /// Advisory wake-ups; `None` falls back to sequence polling.
    events: [Option<DirectionEvents>; 2],
    /// Last sequence consumed per direction by this handle.
    last_read: [u64; 2],
}

impl BulkChannel {
    /// Open or create the channel `name` with per-direction capacity
    /// `frame_bytes`.
    pub fn open(name: &str, frame_bytes: u64) -> Result<Self> {
        if name.is_empty() {
            return Err(ProcmuxError::InvalidArg("channel name is empty".into()));
        }
        if frame_bytes == 0 {
            return Err(ProcmuxError::InvalidArg(
                "frame_bytes must be positive".into(),
            ));
        }
        let total = (HEADER_BYTES as u64)
            .checked_add(frame_bytes.checked_mul(2).ok_or_else(too_large)?)
            .ok_or_else(too_large)?;
        if total > usize::MAX as u64 {
            return Err(too_large());
        }

        let file = open_shm_object(name)?;
        if file.metadata()?.len() < total {
            file.set_len(total)?;
        }

        // SAFETY: the mapping is private to this struct; concurrent
        // processes coordinate through the named mutex and the atomic
        // header fields.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        if map.len() < total as usize {
            return Err(ProcmuxError::BadState(format!(
                "mapping for '{name}' is shorter than its layout"
            )));
        }

        let sentinel = atomic_at(&map, offset::MAGIC_AND_VERSION).load(Ordering::Acquire);
        if sentinel != MAGIC_AND_VERSION {
            // First open: zero-fill, publish frame size before the sentinel.
            map.fill(0);
            atomic_at(&map, offset::FRAME_BYTES).store(frame_bytes, Ordering::Relaxed);
            atomic_at(&map, offset::MAGIC_AND_VERSION).store(MAGIC_AND_VERSION, Ordering::Release);
            debug!(name, frame_bytes, "bulk channel initialized");
        } else {
            let stored = atomic_at(&map, offset::FRAME_BYTES).load(Ordering::Acquire);
            if stored != frame_bytes {
                // The mapping closes with this early return; no handle leaks.
                return Err(ProcmuxError::IncompatibleFrame {
                    name: name.to_string(),
                    expected: frame_bytes,
                    actual: stored,
                });
            }
        }

        let mutex = NamedMutex::open(&format!("{name}:mtx"))?;
        let events = [
            open_events(name, Direction::HostToShell),
            open_events(name, Direction::ShellToHost),
        ];

        Ok(BulkChannel {
            name: name.to_string(),
            frame_bytes,
            map,
            _file: file,
            mutex,
            events,
            last_read: [0; 2],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame_bytes(&self) -> u64 {
        self.frame_bytes
    }

    /// Remove the named objects backing channel `name`. Safe to call while
    /// other handles are still open; they keep their mappings.
    pub fn unlink(name: &str) {
        unlink_shm_object(name);
        NamedMutex::unlink(&format!("{name}:mtx"));
        for direction in [Direction::HostToShell, Direction::ShellToHost] {
            let tag = direction.wire_tag();
            NamedEvent::unlink(&format!("{name}:ev_{tag}_req"));
            NamedEvent::unlink(&format!("{name}:ev_{tag}_ack"));
        }
    }

    /// Non-blocking header snapshot.
    #[must_use]
    pub fn header(&self) -> HeaderSnapshot {
        let sentinel = self.field(offset::MAGIC_AND_VERSION).load(Ordering::Acquire);
        HeaderSnapshot {
            magic: (sentinel & 0xFFFF_FFFF) as u32,
            version: (sentinel >> 32) as u32,
            frame_bytes: self.field(offset::FRAME_BYTES).load(Ordering::Acquire),
            host_to_shell_seq: self.field(offset::A2B_SEQ).load(Ordering::Acquire),
            shell_to_host_seq: self.field(offset::B2A_SEQ).load(Ordering::Acquire),
            host_to_shell_length: self.field(offset::A2B_LENGTH).load(Ordering::Acquire),
            shell_to_host_length: self.field(offset::B2A_LENGTH).load(Ordering::Acquire),
        }
    }

    /// Publish one payload in `direction`. Returns the new sequence value.
    pub fn write(&mut self, direction: Direction, payload: &[u8], timeout: Duration) -> Result<u64> {
        if payload.len() as u64 > self.frame_bytes {
            return Err(ProcmuxError::InvalidArg(format!(
                "payload of {} bytes exceeds frame capacity {}",
                payload.len(),
                self.frame_bytes
            )));
        }

        let next_seq;
        {
            let _guard = self.mutex.lock(timeout)?;
            let start = self.region_start(direction);
            self.map[start..start + payload.len()].copy_from_slice(payload);
            // Length is published before the sequence bump; a reader that
            // observes the new sequence is guaranteed the matching length.
            self.field(direction.length_offset())
                .store(payload.len() as u64, Ordering::Release);
            next_seq = self
                .field(direction.seq_offset())
                .fetch_add(1, Ordering::Release)
                + 1;
        }

        if let Some(events) = &self.events[direction.index()] {
            events.request.signal();
            events.ack.try_consume();
        }
        Ok(next_seq)
    }

    /// Read the pending payload in `direction` into `buf`. Returns the
    /// payload length. `timeout == 0` never blocks (`WouldBlock` when
    /// nothing is pending); `BufferTooSmall` reports the required length
    /// without copying or consuming.
    pub fn read_into(
        &mut self,
        direction: Direction,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<u64> {
        let deadline = Instant::now() + timeout;
        self.await_advance(direction, timeout, deadline)?;

        let length;
        {
            let _guard = self
                .mutex
                .lock(deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL))?;
            // Re-read under the lock; the peeked value may be stale.
            length = self.field(direction.length_offset()).load(Ordering::Acquire);
            if length > self.frame_bytes {
                drop(_guard);
                self.signal_ack(direction);
                return Err(ProcmuxError::BadState(format!(
                    "stored length {length} exceeds frame capacity {}",
                    self.frame_bytes
                )));
            }
            if (buf.len() as u64) < length {
                drop(_guard);
                self.signal_ack(direction);
                return Err(ProcmuxError::BufferTooSmall { required: length });
            }
            let start = self.region_start(direction);
            buf[..length as usize].copy_from_slice(&self.map[start..start + length as usize]);
            self.last_read[direction.index()] =
                self.field(direction.seq_offset()).load(Ordering::Acquire);
        }

        self.signal_ack(direction);
        Ok(length)
    }

    /// Consume the pending payload in `direction` without copying it out:
    /// `f` runs against a borrowed view of the region while the
    /// cross-process mutex is held. The view is invalid after the call.
    pub fn read_in_place<R>(
        &mut self,
        direction: Direction,
        timeout: Duration,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R> {
        let deadline = Instant::now() + timeout;
        self.await_advance(direction, timeout, deadline)?;

        let output;
        {
            let _guard = self
                .mutex
                .lock(deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL))?;
            let length = self.field(direction.length_offset()).load(Ordering::Acquire);
            if length > self.frame_bytes {
                drop(_guard);
                self.signal_ack(direction);
                return Err(ProcmuxError::BadState(format!(
                    "stored length {length} exceeds frame capacity {}",
                    self.frame_bytes
                )));
            }
            let start = self.region_start(direction);
            output = f(&self.map[start..start + length as usize]);
            self.last_read[direction.index()] =
                self.field(direction.seq_offset()).load(Ordering::Acquire);
        }

        self.signal_ack(direction);
        Ok(output)
    }

    /// Report the pending payload's length without consuming the sequence.
    pub fn probe(&self, direction: Direction, timeout: Duration) -> Result<u64> {
        let deadline = Instant::now() + timeout;
        self.await_advance(direction, timeout, deadline)?;

        let _guard = self
            .mutex
            .lock(deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL))?;
        let length = self.field(direction.length_offset()).load(Ordering::Acquire);
        if length > self.frame_bytes {
            return Err(ProcmuxError::BadState(format!(
                "stored length {length} exceeds frame capacity {}",
                self.frame_bytes
            )));
        }
        Ok(length)
    }

    /// Send a payload larger than one frame as a sequence of acknowledged
    /// chunks. Returns the number of chunks sent.
    pub fn write_chunked(
        &mut self,
        direction: Direction,
        payload: &[u8],
        chunk_size: u64,
        timeout: Duration,
    ) -> Result<u64> {
        if chunk_size == 0 {
            return Err(ProcmuxError::InvalidArg(
                "chunk_size must be positive".into(),
            ));
        }
        let Some(events) = &self.events[direction.index()] else {
            return Err(ProcmuxError::System(
                "chunked transfer requires the channel events".into(),
            ));
        };

        let chunk_size = chunk_size.min(self.frame_bytes);
        let total = payload.len() as u64;
        let chunk_count = if total == 0 { 1 } else { total.div_ceil(chunk_size) };

        {
            let _guard = self.mutex.lock(timeout)?;
            self.field(offset::TOTAL_SIZE).store(total, Ordering::Release);
            self.field(offset::CHUNK_SIZE)
                .store(chunk_size, Ordering::Release);
            self.field(offset::CHUNK_COUNT)
                .store(chunk_count, Ordering::Release);
            self.field(offset::XFER_SEQ).fetch_add(1, Ordering::Release);
            self.field(offset::XFER_VALID).store(1, Ordering::Release);
        }

        for index in 0..chunk_count {
            let start = (index * chunk_size) as usize;
            let end = (((index + 1) * chunk_size).min(total)) as usize;
            let chunk = &payload[start..end];

            {
                let _guard = self.mutex.lock(timeout)?;
                let region = self.region_start(direction);
                self.map[region..region + chunk.len()].copy_from_slice(chunk);
                self.field(offset::XFER_OFFSET)
                    .store(start as u64, Ordering::Release);
                self.field(offset::XFER_LENGTH)
                    .store(chunk.len() as u64, Ordering::Release);
                self.field(offset::CHUNK_INDEX).store(index, Ordering::Release);
                self.field(direction.length_offset())
                    .store(chunk.len() as u64, Ordering::Release);
                self.field(direction.seq_offset())
                    .fetch_add(1, Ordering::Release);
            }

            events.request.signal();
            if !events.ack.wait_timeout(timeout)? {
                let _guard = self.mutex.lock(POLL_INTERVAL)?;
                self.field(offset::XFER_VALID).store(0, Ordering::Release);
                return Err(ProcmuxError::TimedOut);
            }
        }

        {
            let _guard = self.mutex.lock(timeout)?;
            self.field(offset::XFER_VALID).store(0, Ordering::Release);
        }
        Ok(chunk_count)
    }

    /// Receive and reassemble a chunked transfer. `timeout` bounds the wait
    /// for each individual chunk.
    pub fn read_chunked(&mut self, direction: Direction, timeout: Duration) -> Result<Vec<u8>> {
        if self.events[direction.index()].is_none() {
            return Err(ProcmuxError::System(
                "chunked transfer requires the channel events".into(),
            ));
        }

        self.await_advance(direction, timeout, Instant::now() + timeout)?;

        let (total, chunk_size, chunk_count) = {
            let _guard = self.mutex.lock(timeout)?;
            if self.field(offset::XFER_VALID).load(Ordering::Acquire) != 1 {
                return Err(ProcmuxError::BadState(
                    "no chunked transfer in progress".into(),
                ));
            }
            (
                self.field(offset::TOTAL_SIZE).load(Ordering::Acquire),
                self.field(offset::CHUNK_SIZE).load(Ordering::Acquire),
                self.field(offset::CHUNK_COUNT).load(Ordering::Acquire),
            )
        };
        if chunk_size == 0
            || chunk_size > self.frame_bytes
            || chunk_count == 0
            || total > chunk_size.saturating_mul(chunk_count)
            || total > usize::MAX as u64
        {
            return Err(ProcmuxError::BadState(format!(
                "chunked transfer metadata is inconsistent: total={total} chunk_size={chunk_size} chunk_count={chunk_count}"
            )));
        }

        let mut out = vec![0u8; total as usize];
        loop {
            let done;
            {
                let _guard = self.mutex.lock(timeout)?;
                let chunk_offset = self.field(offset::XFER_OFFSET).load(Ordering::Acquire);
                let chunk_length = self.field(offset::XFER_LENGTH).load(Ordering::Acquire);
                let chunk_index = self.field(offset::CHUNK_INDEX).load(Ordering::Acquire);
                if chunk_length > self.frame_bytes
                    || chunk_offset.saturating_add(chunk_length) > total.max(chunk_length)
                {
                    return Err(ProcmuxError::BadState(format!(
                        "chunk {chunk_index} out of bounds: offset={chunk_offset} length={chunk_length}"
                    )));
                }
                let region = self.region_start(direction);
                out[chunk_offset as usize..(chunk_offset + chunk_length) as usize]
                    .copy_from_slice(&self.map[region..region + chunk_length as usize]);
                self.last_read[direction.index()] =
                    self.field(direction.seq_offset()).load(Ordering::Acquire);
                done = chunk_index + 1 >= chunk_count;
            }
            self.signal_ack(direction);
            if done {
                break;
            }
            self.await_advance(direction, timeout, Instant::now() + timeout)?;
        }
        Ok(out)
    }

    /// Block until `direction`'s sequence counter advances past the last
    /// value this handle consumed. Event wakes are advisory; the counter
    /// decides.
    fn await_advance(
        &self,
        direction: Direction,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            let seq = self.field(direction.seq_offset()).load(Ordering::Acquire);
            if seq > self.last_read[direction.index()] {
                return Ok(());
            }
            if timeout.is_zero() {
                return Err(ProcmuxError::WouldBlock);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let seq = self.field(direction.seq_offset()).load(Ordering::Acquire);
                if seq > self.last_read[direction.index()] {
                    return Ok(());
                }
                return Err(ProcmuxError::TimedOut);
            }
            match &self.events[direction.index()] {
                Some(events) => {
                    let _ = events.request.wait_timeout(remaining)?;
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }

    fn signal_ack(&self, direction: Direction) {
        if let Some(events) = &self.events[direction.index()] {
            events.ack.signal();
        }
    }

    fn region_start(&self, direction: Direction) -> usize {
        HEADER_BYTES + direction.index() * self.frame_bytes as usize
    }

    fn field(&self, offset: usize) -> &AtomicU64 {
        atomic_at(&self.map, offset)
    }
}

/// Atomic view of one 64-bit header field.
fn atomic_at(map: &MmapMut, offset: usize) -> &AtomicU64 {
    debug_assert!(offset % 8 == 0 && offset + 8 <= HEADER_BYTES);
    // SAFETY: the mapping is page-aligned and at least HEADER_BYTES long,
    // the offset is 8-byte aligned, and AtomicU64 permits any bit pattern.
    // The reference's lifetime is tied to the borrow of the mapping.
    unsafe { &*(map.as_ptr().add(offset) as *const AtomicU64) }
}

fn shm_object_name(name: &str) -> String {
    format!("/{}", name.replace('/', "_"))
}

fn open_shm_object(name: &str) -> Result<File> {
    let c_name = CString::new(shm_object_name(name))
        .map_err(|_| ProcmuxError::InvalidArg(format!("channel name contains NUL: {name}")))?;
    // SAFETY: c_name is a valid NUL-terminated string; shm_open copies it.
    let fd = unsafe {
        libc::shm_open(
            c_name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT,
            0o600 as libc::mode_t,
        )
    };
    if fd < 0 {
        return Err(ProcmuxError::System(format!(
            "shm_open('{name}') failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    // SAFETY: fd is a freshly returned descriptor we now own.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn unlink_shm_object(name: &str) {
    if let Ok(c_name) = CString::new(shm_object_name(name)) {
        // SAFETY: c_name is a valid NUL-terminated string. Failure
        // (already unlinked) is irrelevant.
        unsafe {
            libc::shm_unlink(c_name.as_ptr());
        }
    }
}

fn open_events(name: &str, direction: Direction) -> Option<DirectionEvents> {
    let tag = direction.wire_tag();
    let request = NamedEvent::open(&format!("{name}:ev_{tag}_req"));
    let ack = NamedEvent::open(&format!("{name}:ev_{tag}_ack"));
    match (request, ack) {
        (Ok(request), Ok(ack)) => Some(DirectionEvents { request, ack }),
        (request, ack) => {
            let err = request.err().or(ack.err());
            warn!(
                name,
                direction = tag,
                "channel events unavailable, falling back to polling: {}",
                err.map(|e| e.to_string()).unwrap_or_default()
            );
            None
        }
    }
}

fn too_large() -> ProcmuxError {
    ProcmuxError::InvalidArg("frame_bytes is too large".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::layout::{MAGIC, VERSION};

    fn unique(label: &str) -> String {
        format!(
            "procmux-chan-{label}-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        )
    }

    /// Unlinks the named objects when the test ends.
    struct Cleanup(String);

    impl Drop for Cleanup {
        fn drop(&mut self) {
            BulkChannel::unlink(&self.0);
        }
    }

    fn open_unique(label: &str, frame_bytes: u64) -> (BulkChannel, Cleanup) {
        let name = unique(label);
        let channel = BulkChannel::open(&name, frame_bytes).expect("open channel");
        (channel, Cleanup(name))
    }

    const T: Duration = Duration::from_secs(2);

    #[test]
    fn test_open_initializes_header() {
        let (channel, _cleanup) = open_unique("hdr", 4096);
        let header = channel.header();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, VERSION);
        assert_eq!(header.frame_bytes, 4096);
        assert_eq!(header.host_to_shell_seq, 0);
        assert_eq!(header.shell_to_host_seq, 0);
    }

    #[test]
    fn test_open_rejects_zero_frame() {
        assert!(matches!(
            BulkChannel::open(&unique("zero"), 0),
            Err(ProcmuxError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_reopen_with_mismatched_frame_fails() {
        let (_first, cleanup) = open_unique("mismatch", 4096);
        let err = BulkChannel::open(&cleanup.0, 8192).expect_err("mismatch must fail");
        match err {
            ProcmuxError::IncompatibleFrame {
                expected, actual, ..
            } => {
                assert_eq!(expected, 8192);
                assert_eq!(actual, 4096);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (mut channel, _cleanup) = open_unique("rt", 4096);

        let seq = channel
            .write(Direction::HostToShell, &[0x01, 0x02, 0x03], T)
            .expect("write");
        assert_eq!(seq, 1);

        let mut buf = [0u8; 16];
        let len = channel
            .read_into(Direction::HostToShell, &mut buf, T)
            .expect("read");
        assert_eq!(len, 3);
        assert_eq!(&buf[..3], &[0x01, 0x02, 0x03]);
        assert_eq!(channel.header().host_to_shell_seq, 1);
    }

    #[test]
    fn test_oversize_write_is_invalid_arg() {
        let (mut channel, _cleanup) = open_unique("big", 64);
        let payload = vec![0u8; 65];
        assert!(matches!(
            channel.write(Direction::HostToShell, &payload, T),
            Err(ProcmuxError::InvalidArg(_))
        ));
    }

    #[test]
    fn test_read_empty_channel_would_block() {
        let (mut channel, _cleanup) = open_unique("wb", 64);
        let mut buf = [0u8; 64];
        assert!(matches!(
            channel.read_into(Direction::HostToShell, &mut buf, Duration::ZERO),
            Err(ProcmuxError::WouldBlock)
        ));
    }

    #[test]
    fn test_read_timeout_expires() {
        let (mut channel, _cleanup) = open_unique("to", 64);
        let mut buf = [0u8; 64];
        let started = Instant::now();
        assert!(matches!(
            channel.read_into(
                Direction::ShellToHost,
                &mut buf,
                Duration::from_millis(50)
            ),
            Err(ProcmuxError::TimedOut)
        ));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_probe_reports_length_without_consuming() {
        let (mut channel, _cleanup) = open_unique("probe", 64);
        channel
            .write(Direction::HostToShell, b"abcde", T)
            .expect("write");

        assert_eq!(channel.probe(Direction::HostToShell, T).expect("probe"), 5);
        // Probe again: the sequence was not consumed.
        assert_eq!(channel.probe(Direction::HostToShell, T).expect("probe"), 5);

        let mut buf = [0u8; 64];
        let len = channel
            .read_into(Direction::HostToShell, &mut buf, T)
            .expect("read");
        assert_eq!(len, 5);
        assert_eq!(&buf[..5], b"abcde");
    }

    #[test]
    fn test_buffer_too_small_reports_required_length() {
        let (mut channel, _cleanup) = open_unique("small", 64);
        channel
            .write(Direction::HostToShell, &[7u8; 16], T)
            .expect("write");

        let mut buf = [0u8; 4];
        match channel.read_into(Direction::HostToShell, &mut buf, T) {
            Err(ProcmuxError::BufferTooSmall { required }) => assert_eq!(required, 16),
            other => panic!("unexpected result: {other:?}"),
        }
        // Nothing was consumed; a big-enough buffer still gets the payload.
        let mut big = [0u8; 64];
        assert_eq!(
            channel
                .read_into(Direction::HostToShell, &mut big, T)
                .expect("read"),
            16
        );
    }

    #[test]
    fn test_directions_are_independent() {
        let (mut channel, _cleanup) = open_unique("dirs", 64);
        channel
            .write(Direction::HostToShell, b"down", T)
            .expect("write a2b");
        channel
            .write(Direction::ShellToHost, b"up!", T)
            .expect("write b2a");

        let mut buf = [0u8; 64];
        assert_eq!(
            channel
                .read_into(Direction::ShellToHost, &mut buf, T)
                .expect("read b2a"),
            3
        );
        assert_eq!(&buf[..3], b"up!");
        assert_eq!(
            channel
                .read_into(Direction::HostToShell, &mut buf, T)
                .expect("read a2b"),
            4
        );
        assert_eq!(&buf[..4], b"down");
    }

    #[test]
    fn test_two_handles_share_one_channel() {
        let (mut writer, cleanup) = open_unique("pair", 4096);
        let mut reader = BulkChannel::open(&cleanup.0, 4096).expect("open reader");

        writer
            .write(Direction::HostToShell, b"cross-handle", T)
            .expect("write");
        let mut buf = [0u8; 4096];
        let len = reader
            .read_into(Direction::HostToShell, &mut buf, T)
            .expect("read");
        assert_eq!(&buf[..len as usize], b"cross-handle");
    }

    #[test]
    fn test_read_in_place_hands_out_the_region_view() {
        let (mut channel, _cleanup) = open_unique("inplace", 64);
        channel
            .write(Direction::HostToShell, b"zero copy", T)
            .expect("write");

        let digest = channel
            .read_in_place(Direction::HostToShell, T, |view| {
                assert_eq!(view, b"zero copy");
                view.iter().map(|&b| b as u64).sum::<u64>()
            })
            .expect("in-place read");
        assert_eq!(digest, b"zero copy".iter().map(|&b| b as u64).sum::<u64>());

        // The read consumed the sequence.
        let mut buf = [0u8; 64];
        assert!(matches!(
            channel.read_into(Direction::HostToShell, &mut buf, Duration::ZERO),
            Err(ProcmuxError::WouldBlock)
        ));
    }

    #[test]
    fn test_sequence_increments_per_write() {
        let (mut channel, _cleanup) = open_unique("seq", 64);
        for expected in 1..=5u64 {
            let seq = channel
                .write(Direction::ShellToHost, b"x", T)
                .expect("write");
            assert_eq!(seq, expected);
        }
    }
}
