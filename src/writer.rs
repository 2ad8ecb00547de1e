use crate::record::Record;
use crate::types::{SegmentSink, WalError};
use prost::Message;

/// Default size of the in-memory write buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// Writes length-prefixed records to a [`SegmentSink`], buffering frames to
/// amortize syscalls.
///
/// Each frame is a little-endian `u32` byte length followed by the encoded
/// [`Record`]. Frames are placed into the buffer whole; a frame at least as
/// large as the buffer capacity is flushed straight through to the sink.
pub struct FramedWriter {
    sink: Option<Box<dyn SegmentSink>>,
    buf: Vec<u8>,
    capacity: usize,
    enable_fsync: bool,
}

impl FramedWriter {
    /// Wrap `sink` with the default 4 KiB buffer.
    pub fn new(sink: Box<dyn SegmentSink>, enable_fsync: bool) -> Self {
        Self::with_capacity(sink, enable_fsync, DEFAULT_BUFFER_SIZE)
    }

    /// Wrap `sink` with a buffer of `capacity` bytes.
    pub fn with_capacity(sink: Box<dyn SegmentSink>, enable_fsync: bool, capacity: usize) -> Self {
        Self {
            sink: Some(sink),
            buf: Vec::with_capacity(capacity),
            capacity,
            enable_fsync,
        }
    }

    fn sink_mut(&mut self) -> Result<&mut Box<dyn SegmentSink>, WalError> {
        self.sink.as_mut().ok_or_else(|| {
            WalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "framed writer is closed",
            ))
        })
    }

    /// Marshal `record`, prefix it with its length, and stage the frame in
    /// the buffer (or write it through if it alone exceeds the buffer).
    pub async fn write_record(&mut self, record: &Record) -> Result<(), WalError> {
        let data = record.encode_to_vec();
        let mut frame = Vec::with_capacity(4 + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(&data);

        if self.buf.len() + frame.len() > self.capacity {
            self.flush().await?;
        }
        if frame.len() >= self.capacity {
            self.sink_mut()?.write_all(&frame).await?;
        } else {
            self.buf.extend_from_slice(&frame);
        }
        Ok(())
    }

    /// Drain the buffer into the sink.
    pub async fn flush(&mut self) -> Result<(), WalError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let sink = self.sink.as_mut().ok_or_else(|| {
            WalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "framed writer is closed",
            ))
        })?;
        sink.write_all(&self.buf).await?;
        self.buf.clear();
        Ok(())
    }

    /// Flush, then request stable storage if the sink supports it and fsync
    /// is enabled. Otherwise this is a flush.
    pub async fn sync(&mut self) -> Result<(), WalError> {
        self.flush().await?;
        let enable_fsync = self.enable_fsync;
        let sink = self.sink_mut()?;
        if enable_fsync && sink.supports_stable_storage() {
            sink.sync().await.map_err(WalError::Sync)?;
        }
        Ok(())
    }

    /// Bytes accumulated but not yet handed to the sink.
    pub fn buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Flush and release the sink. Subsequent operations fail.
    pub async fn close(&mut self) -> Result<(), WalError> {
        self.flush().await?;
        if let Some(mut sink) = self.sink.take() {
            sink.close().await?;
        }
        Ok(())
    }
}
