//! Bulk-channel integration tests: two handles on one named region, the
//! chunked transfer protocol, and the header wire contract.

#![cfg(unix)]

use procmux::{BulkChannel, Direction, ProcmuxError, MAGIC, VERSION};
use std::time::Duration;

const T: Duration = Duration::from_secs(5);

fn unique(label: &str) -> String {
    format!(
        "procmux-it-{label}-{}-{}",
        std::process::id(),
        rand::random::<u32>()
    )
}

/// Unlinks the channel's named objects when the test ends.
struct Cleanup(String);

impl Drop for Cleanup {
    fn drop(&mut self) {
        BulkChannel::unlink(&self.0);
    }
}

#[test]
fn test_header_wire_contract_after_open() {
    let name = unique("contract");
    let _cleanup = Cleanup(name.clone());
    let channel = BulkChannel::open(&name, 16 * 1024).expect("open channel");
    let header = channel.header();

    assert_eq!(header.magic, 0x4D48_5356);
    assert_eq!(header.magic, MAGIC);
    assert_eq!(header.version, VERSION);
    assert_eq!(header.frame_bytes, 16 * 1024);
    assert_eq!(header.host_to_shell_length, 0);
    assert_eq!(header.shell_to_host_length, 0);
}

#[test]
fn test_seed_scenario_roundtrip() {
    // Seed scenario 5: write 3 bytes, read with a 16-byte buffer.
    let name = unique("seed5");
    let _cleanup = Cleanup(name.clone());
    let mut writer = BulkChannel::open(&name, 4096).expect("open writer");
    let mut reader = BulkChannel::open(&name, 4096).expect("open reader");

    let old_seq = writer.header().host_to_shell_seq;
    let new_seq = writer
        .write(Direction::HostToShell, &[0x01, 0x02, 0x03], T)
        .expect("write");
    assert_eq!(new_seq, old_seq + 1);

    let mut buf = [0u8; 16];
    let length = reader
        .read_into(Direction::HostToShell, &mut buf, T)
        .expect("read");
    assert_eq!(length, 3);
    assert_eq!(&buf[..3], &[0x01, 0x02, 0x03]);
}

#[test]
fn test_seed_scenario_oversize_write() {
    // Seed scenario 6: frame_bytes + 1 is an invalid argument.
    let name = unique("seed6");
    let _cleanup = Cleanup(name.clone());
    let mut channel = BulkChannel::open(&name, 1024).expect("open channel");
    let payload = vec![0xAA; 1025];
    let err = channel
        .write(Direction::HostToShell, &payload, T)
        .expect_err("oversize write must fail");
    assert!(matches!(err, ProcmuxError::InvalidArg(_)));
    assert_eq!(err.status_code(), -1);
}

#[test]
fn test_probe_does_not_consume_sequence() {
    let name = unique("probe");
    let _cleanup = Cleanup(name.clone());
    let mut writer = BulkChannel::open(&name, 256).expect("open writer");
    let reader = BulkChannel::open(&name, 256).expect("open reader");

    writer
        .write(Direction::ShellToHost, b"sized", T)
        .expect("write");

    assert_eq!(reader.probe(Direction::ShellToHost, T).expect("probe"), 5);
    assert_eq!(reader.probe(Direction::ShellToHost, T).expect("probe"), 5);
    // The writer-side view of the counter is unchanged by probing.
    assert_eq!(writer.header().shell_to_host_seq, 1);
}

#[test]
fn test_reader_blocks_until_writer_publishes() {
    let name = unique("block");
    let _cleanup = Cleanup(name.clone());
    let mut writer = BulkChannel::open(&name, 1024).expect("open writer");

    let reader_thread = {
        let name = name.clone();
        std::thread::spawn(move || {
            let mut reader = BulkChannel::open(&name, 1024).expect("open reader");
            let mut buf = [0u8; 1024];
            let length = reader
                .read_into(Direction::HostToShell, &mut buf, Duration::from_secs(10))
                .expect("blocking read");
            buf[..length as usize].to_vec()
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    writer
        .write(Direction::HostToShell, b"woken by event", T)
        .expect("write");

    assert_eq!(reader_thread.join().expect("reader thread"), b"woken by event");
}

#[test]
fn test_chunked_roundtrip_reassembles_exactly() {
    // Payload of k * chunk_size + r bytes, 0 < r <= chunk_size.
    let name = unique("chunked");
    let _cleanup = Cleanup(name.clone());
    let frame = 4096u64;
    let chunk_size = 1024u64;
    let payload: Vec<u8> = (0..(3 * chunk_size + 500)).map(|i| (i % 251) as u8).collect();

    let mut writer = BulkChannel::open(&name, frame).expect("open writer");
    let reader_thread = {
        let name = name.clone();
        std::thread::spawn(move || {
            let mut reader = BulkChannel::open(&name, frame).expect("open reader");
            reader
                .read_chunked(Direction::HostToShell, Duration::from_secs(10))
                .expect("chunked read")
        })
    };

    let chunks = writer
        .write_chunked(Direction::HostToShell, &payload, chunk_size, T)
        .expect("chunked write");
    assert_eq!(chunks, 4, "k=3 full chunks plus one remainder");

    let received = reader_thread.join().expect("reader thread");
    assert_eq!(received.len(), payload.len());
    assert_eq!(received, payload, "byte-for-byte reassembly");
}

#[test]
fn test_chunked_write_aborts_without_reader() {
    let name = unique("noack");
    let _cleanup = Cleanup(name.clone());
    let mut writer = BulkChannel::open(&name, 512).expect("open writer");
    let payload = vec![1u8; 2048];
    let err = writer
        .write_chunked(
            Direction::HostToShell,
            &payload,
            512,
            Duration::from_millis(100),
        )
        .expect_err("no reader acks, the writer must abort");
    assert!(matches!(err, ProcmuxError::TimedOut));
    assert_eq!(err.status_code(), 1);
}

#[test]
fn test_many_roundtrips_keep_sequences_monotonic() {
    let name = unique("mono");
    let _cleanup = Cleanup(name.clone());
    let mut writer = BulkChannel::open(&name, 256).expect("open writer");
    let mut reader = BulkChannel::open(&name, 256).expect("open reader");

    let mut last_seq = 0;
    for round in 0..50u32 {
        let payload = round.to_le_bytes();
        let seq = writer
            .write(Direction::HostToShell, &payload, T)
            .expect("write");
        assert!(seq > last_seq, "sequence must never decrease");
        last_seq = seq;

        let mut buf = [0u8; 256];
        let length = reader
            .read_into(Direction::HostToShell, &mut buf, T)
            .expect("read");
        assert_eq!(length, 4);
        assert_eq!(&buf[..4], &payload);
    }
    assert_eq!(writer.header().host_to_shell_seq, 50);
}

#[test]
fn test_empty_payload_roundtrip() {
    let name = unique("empty");
    let _cleanup = Cleanup(name.clone());
    let mut writer = BulkChannel::open(&name, 128).expect("open writer");
    let mut reader = BulkChannel::open(&name, 128).expect("open reader");

    writer
        .write(Direction::ShellToHost, &[], T)
        .expect("empty write");
    let mut buf = [0u8; 8];
    assert_eq!(
        reader
            .read_into(Direction::ShellToHost, &mut buf, T)
            .expect("empty read"),
        0
    );
}
