//! I/O pump: writer queue and the three pipe loops.
//!
//! One writer thread drains a FIFO of framed packets into the child's
//! stdin; two reader threads push raw stdout/stderr chunks into the
//! demultiplexer. Reader buffers live on the thread's stack and are reused
//! on every iteration; the chunk handler must copy what it keeps.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::process::ChildStdin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Fixed reader buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Pause before retrying a write that would block.
const WRITE_BACKOFF: Duration = Duration::from_micros(200);

/// FIFO of packets awaiting write to the child's stdin.
pub(crate) struct WriteQueue {
    queue: Mutex<VecDeque<Vec<u8>>>,
    cv: Condvar,
}

impl WriteQueue {
    pub fn new() -> Self {
        WriteQueue {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    /// Enqueue one packet and wake the writer.
    pub fn push(&self, packet: Vec<u8>) {
        let mut queue = self.queue.lock().expect("write queue poisoned");
        queue.push_back(packet);
        drop(queue);
        self.cv.notify_one();
    }

    /// Dequeue one packet, blocking while the queue is empty and `running`
    /// holds. Returns `None` once `running` clears.
    pub fn pop(&self, running: &AtomicBool) -> Option<Vec<u8>> {
        let mut queue = self.queue.lock().expect("write queue poisoned");
        loop {
            if !running.load(Ordering::Acquire) {
                return None;
            }
            if let Some(packet) = queue.pop_front() {
                return Some(packet);
            }
            queue = self.cv.wait(queue).expect("write queue poisoned");
        }
    }

    /// Drop any packets that never reached the child.
    pub fn clear(&self) {
        self.queue.lock().expect("write queue poisoned").clear();
    }

    /// Wake the writer so it can observe a cleared `running` flag.
    pub fn wake_all(&self) {
        self.cv.notify_all();
    }
}

/// Write `data` completely, retrying interrupted and would-block writes.
pub(crate) fn write_all_retrying(stdin: &mut ChildStdin, data: &[u8]) -> std::io::Result<()> {
    let mut written = 0;
    while written < data.len() {
        match stdin.write(&data[written..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "child stdin accepted zero bytes",
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(WRITE_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
    stdin.flush()
}

/// Writer thread body. Exits when `io_running` clears, the stdin handle is
/// gone, or a write fails fatally (broken pipe after child death).
pub(crate) fn writer_loop(
    queue: &WriteQueue,
    stdin: &Mutex<Option<ChildStdin>>,
    io_running: &AtomicBool,
) {
    while io_running.load(Ordering::Acquire) {
        let Some(packet) = queue.pop(io_running) else {
            break;
        };

        let mut guard = stdin.lock().expect("stdin handle poisoned");
        let Some(handle) = guard.as_mut() else {
            io_running.store(false, Ordering::Release);
            break;
        };
        if let Err(e) = write_all_retrying(handle, &packet) {
            debug!("writer loop stopping: {e}");
            io_running.store(false, Ordering::Release);
            break;
        }
        trace!(bytes = packet.len(), "packet written");
    }
}

/// Reader thread body for one of the child's output pipes. The chunk
/// handler receives a borrowed view that is only valid for the call.
pub(crate) fn reader_loop<R, F>(mut stream: R, io_running: &AtomicBool, mut on_chunk: F)
where
    R: Read,
    F: FnMut(&[u8]),
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        if !io_running.load(Ordering::Acquire) {
            break;
        }
        match stream.read(&mut buf) {
            Ok(0) => {
                // EOF: the child exited or the peer end was closed.
                break;
            }
            Ok(n) => on_chunk(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("reader loop stopping: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_queue_pop_returns_pushed_packets_in_order() {
        let queue = WriteQueue::new();
        let running = AtomicBool::new(true);
        queue.push(b"one".to_vec());
        queue.push(b"two".to_vec());
        assert_eq!(queue.pop(&running).as_deref(), Some(b"one".as_slice()));
        assert_eq!(queue.pop(&running).as_deref(), Some(b"two".as_slice()));
    }

    #[test]
    fn test_queue_pop_unblocks_on_shutdown() {
        let queue = Arc::new(WriteQueue::new());
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            std::thread::spawn(move || queue.pop(&running))
        };

        std::thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Release);
        queue.wake_all();
        assert!(handle.join().expect("pop thread").is_none());
    }

    #[test]
    fn test_queue_clear_drops_pending_packets() {
        let queue = WriteQueue::new();
        let running = AtomicBool::new(true);
        queue.push(b"stale".to_vec());
        queue.clear();
        queue.push(b"fresh".to_vec());
        assert_eq!(queue.pop(&running).as_deref(), Some(b"fresh".as_slice()));
    }

    #[test]
    fn test_reader_loop_delivers_chunks_until_eof() {
        let data: &[u8] = b"abc def";
        let running = AtomicBool::new(true);
        let mut seen = Vec::new();
        reader_loop(data, &running, |chunk| seen.extend_from_slice(chunk));
        assert_eq!(seen, b"abc def");
    }
}
