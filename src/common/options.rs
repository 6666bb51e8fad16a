/// Block compression. The discriminant is the type byte stored in each
/// block trailer, so the values are part of the file format.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum CompressionType {
    NoCompression = 0x0,
    SnappyCompression = 0x1,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<CompressionType> {
        match v {
            0 => Some(CompressionType::NoCompression),
            1 => Some(CompressionType::SnappyCompression),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
pub struct ReadOptions {
    /// Verify block checksums on every read.
    pub verify_checksums: bool,
    /// Insert blocks read for this iteration into the block cache.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: true,
            fill_cache: true,
        }
    }
}
