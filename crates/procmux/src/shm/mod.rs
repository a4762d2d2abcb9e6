//! Shared-memory bulk channel.
//!
//! A named, versioned memory mapping used as a side channel when a payload
//! is too large or too hot for the text pipes. Layout:
//!
//! ```text
//! [128-byte header][host-to-shell region][shell-to-host region]
//! ```
//!
//! Both regions hold `frame_bytes` each. All cross-process field mutations
//! happen under one named mutex; the per-direction sequence counters are
//! additionally atomic so a reader may peek them without locking. The
//! request/ack events are advisory only: every wake re-checks the sequence
//! counter, so lost signals degrade to polling without data loss.
//!
//! Named objects follow the wire convention: mapping `<name>`, mutex
//! `<name>:mtx`, events `<name>:ev_{a2b,b2a}_{req,ack}`.

mod channel;
mod layout;
mod sync;

pub use channel::{BulkChannel, Direction, HeaderSnapshot};
pub use layout::{HEADER_BYTES, MAGIC, VERSION};
pub(crate) use sync::{NamedEvent, NamedMutex};
