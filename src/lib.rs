//! A durable, segmented Write-Ahead Log (WAL).
//!
//! [`Wal`] persists opaque byte payloads as a sequence of numbered segment
//! files behind a pluggable [`SegmentStore`]. Each record is assigned a
//! monotonically increasing **LSN** (Log Sequence Number), framed with a
//! length prefix, and protected by a CRC-32 checksum that covers both the
//! payload and the LSN.
//!
//! # Features
//!
//! - **Segmented** – when the current segment reaches `max_segment_size`
//!   bytes the WAL rotates to a fresh segment, and segments past
//!   `max_segments` are deleted oldest-first.
//! - **Durable** – a background task syncs buffered records to stable
//!   storage every `sync_interval`; [`Wal::sync`] and [`Wal::close`] do so
//!   on demand.
//! - **Checkpointed** – [`Wal::write_checkpoint`] syncs everything before
//!   the marker lands, so recovery can start from the last checkpoint via
//!   [`Wal::read_from_checkpoint`].
//! - **Recoverable** – on reopen the WAL resumes from the highest segment,
//!   recovers the last LSN, and cuts a torn trailing frame left by a crash.
//! - **Pluggable storage** – segments live behind the [`SegmentStore`]
//!   trait; [`FileSegmentStore`] is the filesystem implementation and
//!   [`MemorySegmentStore`] backs tests and benchmarks.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use segwal::{FileSegmentStore, Wal, WalOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), segwal::WalError> {
//!     // 1. Open (or resume) the WAL over a directory of segment files.
//!     let store = FileSegmentStore::new("./wal-data").await?;
//!     let wal = Wal::open(store, WalOptions::default()).await?;
//!
//!     // 2. Append records – each returns its LSN.
//!     let lsn = wal.write_entry(b"payload bytes").await?;
//!     println!("appended record {lsn}");
//!
//!     // 3. Mark a known-good state. Everything below the checkpoint is
//!     //    on stable storage once this returns.
//!     wal.write_checkpoint(b"snapshot ref").await?;
//!
//!     // 4. Read back: the whole log, or just from the last checkpoint.
//!     let all = wal.read_all().await?;
//!     let recent = wal.read_from_checkpoint().await?;
//!     println!("{} records total, {} since checkpoint", all.len(), recent.len());
//!
//!     // 5. Shut down cleanly: stops the background sync and flushes.
//!     wal.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Recovery
//!
//! Reopening a directory with [`Wal::open`] scans the highest-numbered
//! segment to find the last LSN and continues appending from there. A torn
//! frame at the tail (crash mid-append) is truncated away; a record whose
//! CRC does not verify makes the open fail with [`WalError::Corrupt`].


pub mod memory;
pub mod reader;
pub mod record;
pub mod segment;
pub mod types;
pub mod wal;
pub mod writer;

pub use memory::MemorySegmentStore;
pub use reader::{read_all_records, read_records_with_checkpoint, FramedReader};
pub use record::{compute_checksum, Record};
pub use segment::FileSegmentStore;
pub use types::{Lsn, SegmentId, SegmentSink, SegmentSource, SegmentStore, WalError, WalOptions};
pub use wal::{Wal, WalCounters};
pub use writer::{FramedWriter, DEFAULT_BUFFER_SIZE};
