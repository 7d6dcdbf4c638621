//! Fixed-width checksum records forming the fileset integrity chain

use crate::{ChronoError, Result};
use bytes::{BufMut, BytesMut};

/// Serialized width of one digest record
pub const DIGEST_LEN: usize = 4;

/// Checksum over a byte range
pub fn digest(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Append one fixed-width digest record
pub fn write_digest(buf: &mut BytesMut, digest: u32) {
    buf.put_u32_le(digest);
}

/// Serialize a single digest record, used for checkpoint files
pub fn digest_bytes(digest: u32) -> [u8; DIGEST_LEN] {
    digest.to_le_bytes()
}

/// Parse a buffer of fixed-width digest records
pub fn read_digests(data: &[u8]) -> Result<Vec<u32>> {
    if data.len() % DIGEST_LEN != 0 {
        return Err(ChronoError::InvalidFormat(format!(
            "digest buffer length {} is not a multiple of {}",
            data.len(),
            DIGEST_LEN
        )));
    }
    Ok(data
        .chunks_exact(DIGEST_LEN)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Parse a checkpoint file holding exactly one digest record
pub fn read_checkpoint(data: &[u8]) -> Result<u32> {
    if data.len() != DIGEST_LEN {
        return Err(ChronoError::InvalidFormat(format!(
            "checkpoint file length {} is not {}",
            data.len(),
            DIGEST_LEN
        )));
    }
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Validate a byte range against an expected digest
pub fn validate(data: &[u8], expected: u32) -> Result<()> {
    let actual = digest(data);
    if actual != expected {
        return Err(ChronoError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let mut buf = BytesMut::new();
        write_digest(&mut buf, 0xdeadbeef);
        write_digest(&mut buf, 7);

        let digests = read_digests(&buf).unwrap();
        assert_eq!(digests, vec![0xdeadbeef, 7]);
    }

    #[test]
    fn test_read_digests_rejects_ragged_buffer() {
        assert!(read_digests(&[0x1, 0x2, 0x3]).is_err());
        assert!(read_digests(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_checkpoint_must_hold_exactly_one_record() {
        assert!(read_checkpoint(&[]).is_err());
        assert!(read_checkpoint(&[0x1, 0x2, 0x3, 0x4, 0x5]).is_err());
        assert_eq!(read_checkpoint(&7u32.to_le_bytes()).unwrap(), 7);
    }

    #[test]
    fn test_validate() {
        let data = b"some bytes";
        assert!(validate(data, digest(data)).is_ok());
        let err = validate(data, digest(data).wrapping_add(1)).unwrap_err();
        assert!(err.is_corruption());
    }
}
