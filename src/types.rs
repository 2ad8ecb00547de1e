use std::time::Duration;
use thiserror::Error;

/// Log Sequence Number: strictly monotonic, assigned by the [`Wal`](crate::wal::Wal).
/// LSN 0 is reserved for "no record".
pub type Lsn = u64;

/// Identifier of one append-only segment within the store.
pub type SegmentId = u64;

#[derive(Error, Debug)]
pub enum WalError {
    /// An underlying read, write, or stat failed. A torn frame (short read
    /// after the length prefix was consumed) surfaces here with
    /// [`std::io::ErrorKind::UnexpectedEof`].
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request for stable storage (fsync) failed.
    #[error("sync to stable storage failed: {0}")]
    Sync(#[source] std::io::Error),

    /// A segment store operation (create/open/list/delete/truncate) failed.
    #[error("segment store error: {0}")]
    Store(String),

    /// The requested segment does not exist.
    #[error("segment {0} not found")]
    NotFound(SegmentId),

    /// Framing inconsistent mid-stream, or a record failed its CRC check.
    #[error("corrupt WAL record: {0}")]
    Corrupt(String),

    /// Operation attempted on a closed WAL.
    #[error("WAL is closed")]
    Closed,
}

/// Configuration for the WAL.
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Upper bound on persisted plus buffered bytes of the current segment
    /// before rotation.
    pub max_segment_size: u64,
    /// Retention bound: when reached on rotation, the oldest segment IDs
    /// are deleted.
    pub max_segments: u32,
    /// Period of the background sync.
    pub sync_interval: Duration,
    /// If false, `sync()` flushes buffers but never requests stable storage.
    pub enable_fsync: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            max_segment_size: 4 * 1024 * 1024, // 4 MiB
            max_segments: 10,
            sync_interval: Duration::from_secs(3),
            enable_fsync: true,
        }
    }
}

/// An append-only byte sink for one segment.
///
/// Returned by [`SegmentStore::create`]. Writes always land at the end of
/// the segment. Implementations that can reach stable storage advertise it
/// via [`supports_stable_storage`](SegmentSink::supports_stable_storage);
/// for the rest, `sync` degrades to flush-only at the framing layer.
#[async_trait::async_trait]
pub trait SegmentSink: Send {
    /// Append `buf` in its entirety.
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Request stable storage for everything appended so far.
    async fn sync(&mut self) -> std::io::Result<()>;

    /// Release the sink. Writes after close fail.
    async fn close(&mut self) -> std::io::Result<()>;

    /// Whether [`sync`](SegmentSink::sync) actually reaches stable storage.
    fn supports_stable_storage(&self) -> bool;
}

/// A sequential byte source for one segment, positioned at byte 0.
#[async_trait::async_trait]
pub trait SegmentSource: Send {
    /// Read up to `buf.len()` bytes, returning the count; 0 means end of
    /// the segment.
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Names, creates, enumerates, and deletes segments.
///
/// This is the substitutability seam for alternative backends:
/// [`FileSegmentStore`](crate::segment::FileSegmentStore) persists segments
/// as files in one directory, and
/// [`MemorySegmentStore`](crate::memory::MemorySegmentStore) keeps them in
/// process memory for tests and benchmarks.
///
/// Stores are safe for concurrent readers; create/delete serialize on the
/// store's own metadata. A source opened before a delete keeps streaming
/// the bytes it already has access to.
#[async_trait::async_trait]
pub trait SegmentStore: Send + Sync {
    /// Return an append sink for segment `id`, creating the segment if it
    /// does not exist. An existing segment is opened at end-of-stream.
    async fn create(&self, id: SegmentId) -> Result<Box<dyn SegmentSink>, WalError>;

    /// Open segment `id` for sequential reading from byte 0.
    async fn open(&self, id: SegmentId) -> Result<Box<dyn SegmentSource>, WalError>;

    /// All segment IDs present, ascending.
    async fn list(&self) -> Result<Vec<SegmentId>, WalError>;

    /// Remove segment `id`.
    async fn delete(&self, id: SegmentId) -> Result<(), WalError>;

    /// Current persisted byte length of segment `id`.
    async fn size(&self, id: SegmentId) -> Result<u64, WalError>;

    /// Discard every byte of segment `id` past `len`. Used by recovery to
    /// cut a torn frame off the tail before appending resumes.
    async fn truncate(&self, id: SegmentId, len: u64) -> Result<(), WalError>;
}
