use crate::types::{Lsn, WalError};

/// A single WAL record.
///
/// Encoded on disk as a protobuf message so the wire form is canonical and
/// field-tagged; the outer frame adds a little-endian `u32` length prefix
/// (see [`FramedWriter`](crate::writer::FramedWriter)).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Record {
    /// Monotonically increasing sequence number, unique across segments.
    #[prost(uint64, tag = "1")]
    pub lsn: u64,
    /// Opaque caller payload.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    /// CRC-32/IEEE over `payload ∥ lsn_le64`.
    #[prost(uint32, tag = "3")]
    pub checksum: u32,
    /// Set for checkpoint markers; absent for ordinary records.
    #[prost(bool, optional, tag = "4")]
    pub is_checkpoint: Option<bool>,
}

/// CRC-32 (IEEE 802.3) over the payload followed by the LSN as exactly
/// 8 little-endian bytes.
///
/// Folding the LSN into the checksum means an intact payload spliced under
/// a different LSN still fails verification.
pub fn compute_checksum(payload: &[u8], lsn: Lsn) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.update(&lsn.to_le_bytes());
    hasher.finalize()
}

impl Record {
    /// Build an ordinary record with its checksum filled in.
    pub fn new(lsn: Lsn, payload: Vec<u8>) -> Self {
        let checksum = compute_checksum(&payload, lsn);
        Self {
            lsn,
            payload,
            checksum,
            is_checkpoint: None,
        }
    }

    /// Build a checkpoint marker with its checksum filled in.
    pub fn new_checkpoint(lsn: Lsn, payload: Vec<u8>) -> Self {
        let mut record = Self::new(lsn, payload);
        record.is_checkpoint = Some(true);
        record
    }

    /// Recompute the checksum and compare against the stored one.
    pub fn verify(&self) -> Result<(), WalError> {
        let expected = compute_checksum(&self.payload, self.lsn);
        if self.checksum != expected {
            return Err(WalError::Corrupt(format!(
                "CRC mismatch for LSN {}: expected {expected}, got {}",
                self.lsn, self.checksum
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn checksum_is_deterministic() {
        let a = compute_checksum(b"payload", 7);
        let b = compute_checksum(b"payload", 7);
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_binds_lsn() {
        // Same payload under a different LSN must not verify.
        let record = Record::new(1, b"data".to_vec());
        let mut spliced = record.clone();
        spliced.lsn = 2;
        assert!(spliced.verify().is_err());
        assert!(record.verify().is_ok());
    }

    #[test]
    fn tampered_payload_fails_verify() {
        let mut record = Record::new(5, b"hello".to_vec());
        record.payload[0] ^= 0x01;
        let err = record.verify().unwrap_err();
        assert!(matches!(err, WalError::Corrupt(_)));
    }

    #[test]
    fn checkpoint_flag_not_covered_by_checksum() {
        // The checksum covers payload and LSN only; flag presence does not
        // change it.
        let plain = Record::new(3, b"cp".to_vec());
        let marker = Record::new_checkpoint(3, b"cp".to_vec());
        assert_eq!(plain.checksum, marker.checksum);
        assert!(marker.is_checkpoint());
        assert!(!plain.is_checkpoint());
    }

    #[test]
    fn encoding_round_trips() {
        let record = Record::new_checkpoint(42, b"state".to_vec());
        let bytes = record.encode_to_vec();
        let decoded = Record::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, record);
        decoded.verify().unwrap();
    }

    #[test]
    fn empty_payload_is_valid() {
        let record = Record::new(1, Vec::new());
        record.verify().unwrap();
        let bytes = record.encode_to_vec();
        let decoded = Record::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.lsn, 1);
        assert!(decoded.payload.is_empty());
    }
}
