use crate::reader::{read_all_records, read_records_with_checkpoint, FramedReader};
use crate::record::Record;
use crate::types::{Lsn, SegmentId, SegmentStore, WalError, WalOptions};
use crate::writer::FramedWriter;
use log::{error, info, warn};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalState {
    Open,
    Closing,
    Closed,
}

/// Point-in-time counters of coordinator activity since open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalCounters {
    /// Records appended, checkpoint markers included.
    pub appends: u64,
    /// Checkpoint markers among those appends.
    pub checkpoints: u64,
    /// Explicit syncs: manual calls plus background timer firings.
    pub syncs: u64,
    /// Segment rotations.
    pub rotations: u64,
}

/// Coordinator state guarded by the single coarse-grained mutex: the
/// current segment, its framed writer, the LSN counter, and the background
/// sync deadline all change together.
struct WalInner {
    state: WalState,
    current_segment: SegmentId,
    writer: FramedWriter,
    last_lsn: Lsn,
    sync_deadline: Instant,
    counters: WalCounters,
}

impl WalInner {
    fn ensure_open(&self) -> Result<(), WalError> {
        match self.state {
            WalState::Open => Ok(()),
            WalState::Closing | WalState::Closed => Err(WalError::Closed),
        }
    }
}

/// A durable, segmented, append-only log.
///
/// Every record is assigned a strictly increasing LSN. Writes go to the
/// current segment through a buffered framed writer; a background task
/// periodically drains the buffer and requests stable storage. When the
/// current segment reaches [`WalOptions::max_segment_size`] the WAL rotates
/// to a fresh segment, deleting the oldest ones past
/// [`WalOptions::max_segments`].
///
/// All methods are safe for concurrent use; writes serialize on an internal
/// mutex, which is also what guarantees LSN ordering matches write order.
pub struct Wal {
    store: Arc<dyn SegmentStore>,
    options: WalOptions,
    inner: Mutex<WalInner>,
    shutdown: watch::Sender<bool>,
    sync_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Open or create a WAL over `store`.
    ///
    /// Resumes from the highest existing segment: the tail segment is
    /// scanned to recover the last LSN, and a torn trailing frame (from a
    /// crash mid-append) is cut off so that appending can resume at a clean
    /// boundary. A fully framed record that fails its CRC check aborts the
    /// open with [`WalError::Corrupt`].
    ///
    /// The returned WAL owns a background task that syncs every
    /// [`WalOptions::sync_interval`]; call [`close`](Wal::close) to stop it
    /// and flush everything out.
    pub async fn open(
        store: impl SegmentStore + 'static,
        options: WalOptions,
    ) -> Result<Arc<Self>, WalError> {
        let store: Arc<dyn SegmentStore> = Arc::new(store);

        let ids = store.list().await?;
        let current_segment = ids.last().copied().unwrap_or(0);

        // Creating the sink first guarantees the segment exists before the
        // recovery scan and the first size() query.
        let sink = store.create(current_segment).await?;
        let mut writer = FramedWriter::new(sink, options.enable_fsync);

        let last_lsn = match Self::recover_tail(&store, current_segment).await {
            Ok(lsn) => lsn,
            Err(e) => {
                let _ = writer.close().await;
                return Err(e);
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let wal = Arc::new(Self {
            inner: Mutex::new(WalInner {
                state: WalState::Open,
                current_segment,
                writer,
                last_lsn,
                sync_deadline: Instant::now() + options.sync_interval,
                counters: WalCounters::default(),
            }),
            store,
            options,
            shutdown,
            sync_task: StdMutex::new(None),
        });

        let task = tokio::spawn(Self::sync_loop(Arc::downgrade(&wal), shutdown_rx));
        *wal.sync_task.lock().unwrap() = Some(task);

        Ok(wal)
    }

    /// Scan the tail segment for the last LSN, verifying CRCs along the
    /// way. Trailing bytes that do not frame a complete record are
    /// truncated away so the next append starts at the last good boundary.
    async fn recover_tail(
        store: &Arc<dyn SegmentStore>,
        id: SegmentId,
    ) -> Result<Lsn, WalError> {
        let source = store.open(id).await?;
        let mut reader = FramedReader::new(source);
        let mut last_lsn: Lsn = 0;

        loop {
            match reader.read_record().await {
                Ok(Some(record)) => {
                    record.verify()?;
                    last_lsn = record.lsn;
                }
                Ok(None) => break,
                Err(WalError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        let good_len = reader.position();
        let size = store.size(id).await?;
        if size > good_len {
            warn!(
                "segment {id} has a torn tail, truncating {} stray byte(s) at offset {good_len}",
                size - good_len
            );
            store.truncate(id, good_len).await?;
        }

        Ok(last_lsn)
    }

    /// Append an ordinary record and return its LSN.
    ///
    /// Rotates the current segment first if it is full. The record lands in
    /// the write buffer; durability comes from the background sync, an
    /// explicit [`sync`](Wal::sync), or [`close`](Wal::close).
    pub async fn write_entry(&self, payload: &[u8]) -> Result<Lsn, WalError> {
        self.write(payload, false).await
    }

    /// Append a checkpoint marker and return its LSN.
    ///
    /// Before the marker is written, everything already in the log is
    /// synced to stable storage, so a checkpoint on disk implies every
    /// record below its LSN is durable.
    pub async fn write_checkpoint(&self, payload: &[u8]) -> Result<Lsn, WalError> {
        self.write(payload, true).await
    }

    async fn write(&self, payload: &[u8], is_checkpoint: bool) -> Result<Lsn, WalError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;

        self.rotate_if_needed(&mut inner).await?;

        // The LSN is consumed even if the append below fails; a write error
        // leaves a gap and callers should close and reopen.
        inner.last_lsn += 1;
        let lsn = inner.last_lsn;

        let record = if is_checkpoint {
            inner.writer.sync().await?;
            Record::new_checkpoint(lsn, payload.to_vec())
        } else {
            Record::new(lsn, payload.to_vec())
        };

        inner.writer.write_record(&record).await?;

        inner.counters.appends += 1;
        if is_checkpoint {
            inner.counters.checkpoints += 1;
        }
        Ok(lsn)
    }

    async fn rotate_if_needed(&self, inner: &mut WalInner) -> Result<(), WalError> {
        let size = self.store.size(inner.current_segment).await?;
        let buffered = inner.writer.buffered_bytes() as u64;
        if size + buffered < self.options.max_segment_size {
            return Ok(());
        }
        self.rotate(inner).await
    }

    /// Seal the current segment and switch to the next ID, deleting the
    /// oldest segments while the retention bound is exceeded.
    async fn rotate(&self, inner: &mut WalInner) -> Result<(), WalError> {
        inner.writer.sync().await?;
        inner.writer.close().await?;

        let mut ids = self.store.list().await?;
        while !ids.is_empty() && ids.len() as u32 >= self.options.max_segments {
            let oldest = ids.remove(0);
            if let Err(e) = self.store.delete(oldest).await {
                warn!("retention: failed to delete segment {oldest}: {e}");
            }
        }

        inner.current_segment += 1;
        let sink = self.store.create(inner.current_segment).await?;
        inner.writer = FramedWriter::new(sink, self.options.enable_fsync);
        inner.counters.rotations += 1;

        info!("rotated WAL to segment {}", inner.current_segment);
        Ok(())
    }

    /// Flush buffered records and request stable storage (unless fsync is
    /// disabled). Re-arms the background sync timer.
    pub async fn sync(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        inner.writer.sync().await?;
        inner.counters.syncs += 1;
        inner.sync_deadline = Instant::now() + self.options.sync_interval;
        Ok(())
    }

    async fn sync_loop(wal: Weak<Wal>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let deadline = match wal.upgrade() {
                Some(wal) => wal.inner.lock().await.sync_deadline,
                None => return,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let Some(wal) = wal.upgrade() else { return };
                    // A manual sync may have pushed the deadline out while
                    // we slept; if so, go back to sleep.
                    if wal.inner.lock().await.sync_deadline > Instant::now() {
                        continue;
                    }
                    if let Err(e) = wal.sync().await {
                        error!("background WAL sync failed: {e}");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    /// The last LSN assigned, or 0 if the log is empty.
    pub async fn last_lsn(&self) -> Lsn {
        self.inner.lock().await.last_lsn
    }

    /// Activity counters since this WAL was opened.
    pub async fn counters(&self) -> WalCounters {
        self.inner.lock().await.counters
    }

    /// Read every record from every segment, in LSN order, verifying CRCs.
    ///
    /// Safe to call while writes are in flight: only the open-state check
    /// touches the coordinator lock, never the I/O.
    pub async fn read_all(&self) -> Result<Vec<Record>, WalError> {
        self.ensure_open().await?;
        let ids = self.store.list().await?;

        let mut records = Vec::new();
        for id in ids {
            let source = self.store.open(id).await?;
            let mut reader = FramedReader::new(source);
            let mut segment_records = read_all_records(&mut reader).await?;
            records.append(&mut segment_records);
        }
        Ok(records)
    }

    /// Read records from the most recent checkpoint onward.
    ///
    /// Scans segments in ascending order; each checkpoint marker discards
    /// everything accumulated before it, so the result starts with the
    /// highest checkpoint record. With no checkpoint in the log this equals
    /// [`read_all`](Wal::read_all).
    pub async fn read_from_checkpoint(&self) -> Result<Vec<Record>, WalError> {
        self.ensure_open().await?;
        let ids = self.store.list().await?;

        let mut records = Vec::new();
        let mut best_checkpoint_lsn: Lsn = 0;
        for id in ids {
            let source = self.store.open(id).await?;
            let mut reader = FramedReader::new(source);
            let (mut segment_records, checkpoint_lsn) =
                read_records_with_checkpoint(&mut reader).await?;
            if checkpoint_lsn > best_checkpoint_lsn {
                best_checkpoint_lsn = checkpoint_lsn;
                records = segment_records;
            } else {
                records.append(&mut segment_records);
            }
        }
        Ok(records)
    }

    async fn ensure_open(&self) -> Result<(), WalError> {
        self.inner.lock().await.ensure_open()
    }

    /// Stop the background syncer, flush and sync the current segment, and
    /// release it. A second call returns [`WalError::Closed`].
    pub async fn close(&self) -> Result<(), WalError> {
        let _ = self.shutdown.send(true);
        let task = self.sync_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        inner.state = WalState::Closing;

        let sync_result = inner.writer.sync().await;
        let close_result = inner.writer.close().await;
        inner.state = WalState::Closed;

        sync_result?;
        close_result
    }
}
