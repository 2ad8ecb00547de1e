use crate::record::Record;
use crate::types::{Lsn, SegmentSource, WalError};
use prost::Message;

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Streams length-prefixed records from a [`SegmentSource`].
///
/// End of stream is the normal termination signal: no bytes left at a frame
/// boundary, or a prefix too short to hold the 4-byte length. A short read
/// *after* the length prefix has been consumed is a torn frame and surfaces
/// as [`WalError::Io`] with [`std::io::ErrorKind::UnexpectedEof`].
///
/// The reader does not verify checksums itself; callers that want integrity
/// invoke [`Record::verify`] on each record (the scan helpers below do).
pub struct FramedReader {
    source: Box<dyn SegmentSource>,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
    position: u64,
}

impl FramedReader {
    pub fn new(source: Box<dyn SegmentSource>) -> Self {
        Self {
            source,
            buf: vec![0u8; READ_CHUNK_SIZE],
            start: 0,
            end: 0,
            eof: false,
            position: 0,
        }
    }

    /// Byte offset just past the last fully framed record. Bytes of a torn
    /// or short tail are never counted; recovery truncates down to this.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn available(&self) -> usize {
        self.end - self.start
    }

    /// Pull from the source until `n` bytes are buffered or the source is
    /// exhausted; returns the bytes available.
    async fn fill_to(&mut self, n: usize) -> std::io::Result<usize> {
        while self.available() < n && !self.eof {
            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }
            if self.end == self.buf.len() {
                self.buf.resize(self.end + READ_CHUNK_SIZE, 0);
            }
            let read = self.source.read(&mut self.buf[self.end..]).await?;
            if read == 0 {
                self.eof = true;
            } else {
                self.end += read;
            }
        }
        Ok(self.available())
    }

    /// Fill `dst` from the buffer and then the source; returns bytes copied,
    /// which is short only when the source ends first.
    async fn read_into(&mut self, dst: &mut [u8]) -> std::io::Result<usize> {
        let mut copied = self.available().min(dst.len());
        dst[..copied].copy_from_slice(&self.buf[self.start..self.start + copied]);
        self.start += copied;

        while copied < dst.len() && !self.eof {
            let read = self.source.read(&mut dst[copied..]).await?;
            if read == 0 {
                self.eof = true;
            } else {
                copied += read;
            }
        }
        Ok(copied)
    }

    /// Read the next record, or `None` at end of stream.
    pub async fn read_record(&mut self) -> Result<Option<Record>, WalError> {
        let avail = self.fill_to(4).await?;
        if avail < 4 {
            // Nothing left, or a prefix too short to frame a record.
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.buf[self.start..self.start + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        self.start += 4;

        let mut data = vec![0u8; len];
        let got = self.read_into(&mut data).await?;
        if got < len {
            return Err(WalError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("torn frame: length prefix says {len} bytes, only {got} present"),
            )));
        }

        let record = Record::decode(data.as_slice())
            .map_err(|e| WalError::Corrupt(format!("record does not unmarshal: {e}")))?;

        self.position += 4 + len as u64;
        Ok(Some(record))
    }
}

/// Drain a segment, verifying every record's CRC.
pub async fn read_all_records(reader: &mut FramedReader) -> Result<Vec<Record>, WalError> {
    let mut records = Vec::new();
    while let Some(record) = reader.read_record().await? {
        record.verify()?;
        records.push(record);
    }
    Ok(records)
}

/// Drain a segment while tracking checkpoints: each checkpoint marker
/// resets the accumulated list to just itself. Returns the records from the
/// last checkpoint onward and that checkpoint's LSN (0 if none was seen).
pub async fn read_records_with_checkpoint(
    reader: &mut FramedReader,
) -> Result<(Vec<Record>, Lsn), WalError> {
    let mut records = Vec::new();
    let mut checkpoint_lsn: Lsn = 0;
    while let Some(record) = reader.read_record().await? {
        record.verify()?;
        if record.is_checkpoint() {
            checkpoint_lsn = record.lsn;
            records = vec![record];
        } else {
            records.push(record);
        }
    }
    Ok((records, checkpoint_lsn))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource {
        data: Vec<u8>,
        pos: usize,
    }

    impl VecSource {
        fn new(data: Vec<u8>) -> Box<Self> {
            Box::new(Self { data, pos: 0 })
        }
    }

    #[async_trait::async_trait]
    impl SegmentSource for VecSource {
        async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn frame(record: &Record) -> Vec<u8> {
        let data = record.encode_to_vec();
        let mut out = (data.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(&data);
        out
    }

    #[tokio::test]
    async fn empty_stream_is_end_of_stream() {
        let mut reader = FramedReader::new(VecSource::new(Vec::new()));
        assert!(reader.read_record().await.unwrap().is_none());
        assert_eq!(reader.position(), 0);
    }

    #[tokio::test]
    async fn streams_records_in_order() {
        let mut bytes = frame(&Record::new(1, b"one".to_vec()));
        bytes.extend(frame(&Record::new(2, b"two".to_vec())));
        let total = bytes.len() as u64;

        let mut reader = FramedReader::new(VecSource::new(bytes));
        assert_eq!(reader.read_record().await.unwrap().unwrap().lsn, 1);
        assert_eq!(reader.read_record().await.unwrap().unwrap().lsn, 2);
        assert!(reader.read_record().await.unwrap().is_none());
        assert_eq!(reader.position(), total);
    }

    #[tokio::test]
    async fn short_length_prefix_is_end_of_stream() {
        let mut bytes = frame(&Record::new(1, b"one".to_vec()));
        let good = bytes.len() as u64;
        bytes.extend_from_slice(&[0x09, 0x00]); // two stray bytes of a prefix

        let mut reader = FramedReader::new(VecSource::new(bytes));
        assert!(reader.read_record().await.unwrap().is_some());
        assert!(reader.read_record().await.unwrap().is_none());
        assert_eq!(reader.position(), good);
    }

    #[tokio::test]
    async fn torn_body_is_unexpected_eof() {
        let mut bytes = frame(&Record::new(1, b"one".to_vec()));
        let good = bytes.len() as u64;
        let torn = frame(&Record::new(2, b"two".to_vec()));
        bytes.extend_from_slice(&torn[..torn.len() - 2]);

        let mut reader = FramedReader::new(VecSource::new(bytes));
        assert!(reader.read_record().await.unwrap().is_some());
        match reader.read_record().await {
            Err(WalError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected torn frame error, got {other:?}"),
        }
        assert_eq!(reader.position(), good);
    }

    #[tokio::test]
    async fn garbage_body_is_corrupt() {
        let mut bytes = (4u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);

        let mut reader = FramedReader::new(VecSource::new(bytes));
        assert!(matches!(
            reader.read_record().await,
            Err(WalError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn checkpoint_scan_resets_accumulated_records() {
        let mut bytes = Vec::new();
        bytes.extend(frame(&Record::new(1, b"a".to_vec())));
        bytes.extend(frame(&Record::new(2, b"b".to_vec())));
        bytes.extend(frame(&Record::new_checkpoint(3, b"cp".to_vec())));
        bytes.extend(frame(&Record::new(4, b"c".to_vec())));

        let mut reader = FramedReader::new(VecSource::new(bytes));
        let (records, checkpoint_lsn) =
            read_records_with_checkpoint(&mut reader).await.unwrap();
        assert_eq!(checkpoint_lsn, 3);
        let lsns: Vec<Lsn> = records.iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![3, 4]);
        assert!(records[0].is_checkpoint());
    }

    #[tokio::test]
    async fn scan_rejects_bad_crc() {
        let mut record = Record::new(1, b"abc".to_vec());
        record.checksum ^= 0xDEAD_BEEF;
        let bytes = frame(&record);

        let mut reader = FramedReader::new(VecSource::new(bytes));
        assert!(matches!(
            read_all_records(&mut reader).await,
            Err(WalError::Corrupt(_))
        ));
    }
}
