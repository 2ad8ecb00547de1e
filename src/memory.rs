use crate::types::{SegmentId, SegmentSink, SegmentSource, SegmentStore, WalError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// In-memory segment store for tests and benchmarks.
///
/// Segments live in a shared map, so clones of the store observe the same
/// data; dropping a [`Wal`](crate::wal::Wal) and reopening against a clone
/// models a process restart. [`crash`](MemorySegmentStore::crash) sharpens
/// that into a power-loss model: every byte written but never synced is
/// discarded.
///
/// Deleting a segment while a source is open mirrors filesystem semantics:
/// the source keeps streaming the bytes it already has access to.
#[derive(Clone, Default)]
pub struct MemorySegmentStore {
    segments: Arc<Mutex<BTreeMap<SegmentId, Arc<Mutex<MemorySegment>>>>>,
}

#[derive(Default)]
struct MemorySegment {
    data: Vec<u8>,
    synced_len: usize,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a process kill: roll every segment back to its last synced
    /// length.
    pub fn crash(&self) {
        let segments = self.segments.lock().unwrap();
        for segment in segments.values() {
            let mut segment = segment.lock().unwrap();
            let synced = segment.synced_len;
            segment.data.truncate(synced);
        }
    }

    fn segment(&self, id: SegmentId) -> Option<Arc<Mutex<MemorySegment>>> {
        self.segments.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait::async_trait]
impl SegmentStore for MemorySegmentStore {
    async fn create(&self, id: SegmentId) -> Result<Box<dyn SegmentSink>, WalError> {
        let segment = self
            .segments
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .clone();
        Ok(Box::new(MemorySink {
            segment: Some(segment),
        }))
    }

    async fn open(&self, id: SegmentId) -> Result<Box<dyn SegmentSource>, WalError> {
        let segment = self.segment(id).ok_or(WalError::NotFound(id))?;
        Ok(Box::new(MemorySource { segment, pos: 0 }))
    }

    async fn list(&self) -> Result<Vec<SegmentId>, WalError> {
        Ok(self.segments.lock().unwrap().keys().copied().collect())
    }

    async fn delete(&self, id: SegmentId) -> Result<(), WalError> {
        self.segments
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(WalError::NotFound(id))
    }

    async fn size(&self, id: SegmentId) -> Result<u64, WalError> {
        let segment = self.segment(id).ok_or(WalError::NotFound(id))?;
        let len = segment.lock().unwrap().data.len();
        Ok(len as u64)
    }

    async fn truncate(&self, id: SegmentId, len: u64) -> Result<(), WalError> {
        let segment = self.segment(id).ok_or(WalError::NotFound(id))?;
        let mut segment = segment.lock().unwrap();
        segment.data.truncate(len as usize);
        segment.synced_len = segment.synced_len.min(len as usize);
        Ok(())
    }
}

struct MemorySink {
    segment: Option<Arc<Mutex<MemorySegment>>>,
}

impl MemorySink {
    fn segment(&self) -> std::io::Result<&Arc<Mutex<MemorySegment>>> {
        self.segment.as_ref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "segment sink is closed")
        })
    }
}

#[async_trait::async_trait]
impl SegmentSink for MemorySink {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.segment()?.lock().unwrap().data.extend_from_slice(buf);
        Ok(())
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        let mut segment = self.segment()?.lock().unwrap();
        segment.synced_len = segment.data.len();
        Ok(())
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.segment = None;
        Ok(())
    }

    fn supports_stable_storage(&self) -> bool {
        true
    }
}

struct MemorySource {
    segment: Arc<Mutex<MemorySegment>>,
    pos: usize,
}

#[async_trait::async_trait]
impl SegmentSource for MemorySource {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let segment = self.segment.lock().unwrap();
        let n = buf.len().min(segment.data.len().saturating_sub(self.pos));
        buf[..n].copy_from_slice(&segment.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
