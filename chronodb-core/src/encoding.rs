//! Pluggable datapoint codec
//!
//! Every other module treats the encoded block payload as an opaque byte
//! stream; the concrete scheme is behind the [`Encoder`]/[`Decoder`] traits.
//! [`PlainCodec`] is the built-in implementation: bincode framing with LZ4
//! compression.

use crate::types::Datapoint;
use crate::{ChronoError, Result};
use bytes::Bytes;

/// Encodes datapoints into an opaque byte stream
pub trait Encoder: Send + Sync {
    /// Encode datapoints, which must already be in timestamp order
    fn encode(&self, datapoints: &[Datapoint]) -> Result<Bytes>;
}

/// Decodes an opaque byte stream back into datapoints
pub trait Decoder: Send + Sync {
    /// Decode a payload produced by the matching [`Encoder`]
    fn decode(&self, data: &[u8]) -> Result<Vec<Datapoint>>;
}

/// Built-in codec: bincode-serialized datapoints behind an LZ4 frame
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl Encoder for PlainCodec {
    fn encode(&self, datapoints: &[Datapoint]) -> Result<Bytes> {
        let raw = bincode::serialize(datapoints)
            .map_err(|e| ChronoError::InvalidFormat(e.to_string()))?;
        Ok(Bytes::from(lz4_flex::compress_prepend_size(&raw)))
    }
}

impl Decoder for PlainCodec {
    fn decode(&self, data: &[u8]) -> Result<Vec<Datapoint>> {
        let raw = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| ChronoError::InvalidFormat(e.to_string()))?;
        bincode::deserialize(&raw).map_err(|e| ChronoError::InvalidFormat(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeUnit;

    #[test]
    fn test_round_trip() {
        let codec = PlainCodec;
        let datapoints = vec![
            Datapoint::new(1_000, 1.5, TimeUnit::Seconds),
            Datapoint {
                timestamp: 2_000,
                value: -3.25,
                unit: TimeUnit::Nanoseconds,
                annotation: Some(vec![0xde, 0xad]),
            },
        ];

        let encoded = codec.encode(&datapoints).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, datapoints);
    }

    #[test]
    fn test_empty_round_trip() {
        let codec = PlainCodec;
        let encoded = codec.encode(&[]).unwrap();
        assert!(codec.decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_payload_fails() {
        let codec = PlainCodec;
        let err = codec.decode(&[0x1, 0x2, 0x3]).unwrap_err();
        assert!(matches!(err, ChronoError::InvalidFormat(_)));
    }
}
