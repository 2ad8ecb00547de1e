use crate::types::{SegmentId, SegmentSink, SegmentSource, SegmentStore, WalError};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SEGMENT_PREFIX: &str = "segment-";

/// Generate a segment filename, e.g. `segment-3`.
pub fn segment_filename(id: SegmentId) -> String {
    format!("{SEGMENT_PREFIX}{id}")
}

/// Parse a directory entry name back into a segment ID. Entries that do not
/// match the `segment-<decimal>` pattern yield `None`.
fn parse_segment_id(name: &str) -> Option<SegmentId> {
    name.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

/// Segment store backed by regular files in a single directory.
///
/// Each segment is one append-only file named `segment-<id>`. Stable
/// storage is an fsync on the file descriptor.
pub struct FileSegmentStore {
    directory: PathBuf,
}

impl FileSegmentStore {
    /// Open the store rooted at `directory`, creating the directory if
    /// needed.
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self, WalError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| WalError::Store(format!("create directory {directory:?}: {e}")))?;
        Ok(Self { directory })
    }

    fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.directory.join(segment_filename(id))
    }

    /// The directory holding the segment files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait::async_trait]
impl SegmentStore for FileSegmentStore {
    async fn create(&self, id: SegmentId) -> Result<Box<dyn SegmentSink>, WalError> {
        let path = self.segment_path(id);
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o644);
        let file = options
            .open(&path)
            .await
            .map_err(|e| WalError::Store(format!("create segment {id}: {e}")))?;
        Ok(Box::new(FileSink { file: Some(file) }))
    }

    async fn open(&self, id: SegmentId) -> Result<Box<dyn SegmentSource>, WalError> {
        let path = self.segment_path(id);
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WalError::NotFound(id))
            }
            Err(e) => return Err(WalError::Store(format!("open segment {id}: {e}"))),
        };
        Ok(Box::new(FileSource { file }))
    }

    async fn list(&self) -> Result<Vec<SegmentId>, WalError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| WalError::Store(format!("list segments: {e}")))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WalError::Store(format!("list segments: {e}")))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = parse_segment_id(name) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete(&self, id: SegmentId) -> Result<(), WalError> {
        match tokio::fs::remove_file(self.segment_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(WalError::NotFound(id)),
            Err(e) => Err(WalError::Store(format!("delete segment {id}: {e}"))),
        }
    }

    async fn size(&self, id: SegmentId) -> Result<u64, WalError> {
        match tokio::fs::metadata(self.segment_path(id)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(WalError::NotFound(id)),
            Err(e) => Err(WalError::Store(format!("stat segment {id}: {e}"))),
        }
    }

    async fn truncate(&self, id: SegmentId, len: u64) -> Result<(), WalError> {
        let file = match tokio::fs::OpenOptions::new()
            .write(true)
            .open(self.segment_path(id))
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WalError::NotFound(id))
            }
            Err(e) => return Err(WalError::Store(format!("truncate segment {id}: {e}"))),
        };
        file.set_len(len)
            .await
            .map_err(|e| WalError::Store(format!("truncate segment {id}: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| WalError::Store(format!("truncate segment {id}: {e}")))?;
        Ok(())
    }
}

struct FileSink {
    file: Option<tokio::fs::File>,
}

impl FileSink {
    fn file_mut(&mut self) -> std::io::Result<&mut tokio::fs::File> {
        self.file.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "segment sink is closed")
        })
    }
}

#[async_trait::async_trait]
impl SegmentSink for FileSink {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file_mut()?.write_all(buf).await
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.file_mut()?.sync_all().await
    }

    async fn close(&mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    fn supports_stable_storage(&self) -> bool {
        true
    }
}

struct FileSource {
    file: tokio::fs::File,
}

#[async_trait::async_trait]
impl SegmentSource for FileSource {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf).await
    }
}
