use crate::common::options::CompressionType;
use crate::common::{Error, Result};

/// Compresses a block per the requested type. Falls back to storing raw
/// bytes when compression is off or does not pay for itself: Snappy
/// output is kept only when it saves at least 12.5% of the raw size.
pub fn compress_block(raw: &[u8], requested: CompressionType) -> (Vec<u8>, CompressionType) {
    match requested {
        CompressionType::NoCompression => (raw.to_vec(), CompressionType::NoCompression),
        CompressionType::SnappyCompression => {
            let mut encoder = snap::raw::Encoder::new();
            match encoder.compress_vec(raw) {
                Ok(compressed) if compressed.len() < raw.len() - raw.len() / 8 => {
                    (compressed, CompressionType::SnappyCompression)
                }
                _ => (raw.to_vec(), CompressionType::NoCompression),
            }
        }
    }
}

pub fn uncompress_block(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = snap::raw::Decoder::new();
    decoder
        .decompress_vec(compressed)
        .map_err(|_| Error::Corruption("corrupted compressed block contents".to_string()))
}
