use crate::common::options::{CompressionType, ReadOptions};
use crate::common::{Error, RandomAccessFileReader, Result};
use crate::table::block_based::uncompress_block;
use crate::util::{
    crc_unmask, decode_fixed_uint32, encode_var_uint64, get_var_uint64, put_fixed_uint32,
};
use bytes::Bytes;

/// ⟨offset, size⟩ pointer into a table file, varint-encoded.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

pub const BLOCK_HANDLE_MAX_ENCODED_LENGTH: usize = 20;

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, data: &mut Vec<u8>) {
        let mut tmp = [0u8; BLOCK_HANDLE_MAX_ENCODED_LENGTH];
        let offset = encode_var_uint64(&mut tmp, self.offset);
        let offset = encode_var_uint64(&mut tmp[offset..], self.size) + offset;
        data.extend_from_slice(&tmp[..offset]);
    }

    /// Returns the number of bytes consumed.
    pub fn decode_from(&mut self, data: &[u8]) -> Result<usize> {
        let offset = match get_var_uint64(data) {
            None => return Err(Error::Corruption("bad block handle".to_string())),
            Some((read, val)) => {
                self.offset = val;
                read
            }
        };
        match get_var_uint64(&data[offset..]) {
            None => Err(Error::Corruption("bad block handle".to_string())),
            Some((read, val)) => {
                self.size = val;
                Ok(offset + read)
            }
        }
    }
}

pub const TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57u64;

/// Fixed 48 bytes at the end of every table file: two block handles,
/// zero padding, then the magic number.
pub const FOOTER_ENCODED_LENGTH: usize = 2 * BLOCK_HANDLE_MAX_ENCODED_LENGTH + 8;

/// Every block is followed by a one-byte compression type and a masked
/// crc32c over the block bytes plus that type byte.
pub const BLOCK_TRAILER_SIZE: usize = 5;

#[derive(Default, Clone)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        let origin_size = buf.len();
        self.metaindex_handle.encode_to(buf);
        self.index_handle.encode_to(buf);
        buf.resize(origin_size + 2 * BLOCK_HANDLE_MAX_ENCODED_LENGTH, 0);
        put_fixed_uint32(buf, (TABLE_MAGIC_NUMBER & 0xffffffffu64) as u32);
        put_fixed_uint32(buf, (TABLE_MAGIC_NUMBER >> 32) as u32);
        debug_assert_eq!(buf.len(), origin_size + FOOTER_ENCODED_LENGTH);
    }

    pub fn decode_from(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption(
                "file is too short to be a table".to_string(),
            ));
        }
        let magic_offset = data.len() - 8;
        let magic_lo = decode_fixed_uint32(&data[magic_offset..]);
        let magic_hi = decode_fixed_uint32(&data[magic_offset + 4..]);
        let magic = ((magic_hi as u64) << 32) | (magic_lo as u64);
        if magic != TABLE_MAGIC_NUMBER {
            return Err(Error::Corruption(
                "not a table file (bad magic number)".to_string(),
            ));
        }
        let offset = self.metaindex_handle.decode_from(data)?;
        self.index_handle.decode_from(&data[offset..])?;
        Ok(())
    }
}

/// Reads one framed block: verifies the trailer checksum, strips the
/// trailer, and decompresses if needed.
pub fn read_block(
    file: &RandomAccessFileReader,
    opts: &ReadOptions,
    handle: &BlockHandle,
) -> Result<Bytes> {
    let n = handle.size as usize;
    let mut buf = vec![0u8; n + BLOCK_TRAILER_SIZE];
    let read = file.read(handle.offset as usize, n + BLOCK_TRAILER_SIZE, &mut buf)?;
    if read != n + BLOCK_TRAILER_SIZE {
        return Err(Error::Corruption("truncated block read".to_string()));
    }
    if opts.verify_checksums {
        let expected = crc_unmask(decode_fixed_uint32(&buf[n + 1..]));
        let actual = crc32c::crc32c(&buf[..n + 1]);
        if expected != actual {
            log::warn!(
                "checksum mismatch in {:?} at offset {}",
                file.file_name(),
                handle.offset
            );
            return Err(Error::Corruption("block checksum mismatch".to_string()));
        }
    }
    match CompressionType::from_u8(buf[n]) {
        Some(CompressionType::NoCompression) => {
            buf.truncate(n);
            Ok(Bytes::from(buf))
        }
        Some(CompressionType::SnappyCompression) => {
            let raw = uncompress_block(&buf[..n])?;
            Ok(Bytes::from(raw))
        }
        None => Err(Error::Corruption(
            "unknown block compression type".to_string(),
        )),
    }
}
