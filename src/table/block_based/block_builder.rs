use crate::util::{difference_offset, encode_var_uint32, put_fixed_uint32};

/// Builds a prefix-compressed sorted block:
/// entries of `⟨shared, unshared, value_len⟩` varints followed by the
/// unshared key bytes and the value, then a trailer of restart offsets
/// and the restart count as little-endian u32s. Keys must arrive in
/// strictly ascending order; every `restart_interval`-th entry stores its
/// full key and anchors seeks.
pub struct BlockBuilder {
    buff: Vec<u8>,
    restarts: Vec<u32>,
    last_key: Vec<u8>,
    count: usize,
    restart_interval: usize,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> BlockBuilder {
        assert!(restart_interval >= 1);
        BlockBuilder {
            buff: vec![],
            restarts: vec![0],
            last_key: vec![],
            count: 0,
            restart_interval,
            finished: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buff.is_empty()
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.count <= self.restart_interval);
        let mut shared = 0;
        if self.count < self.restart_interval {
            shared = difference_offset(&self.last_key, key);
        } else {
            // Restart point: store the full key.
            self.restarts.push(self.buff.len() as u32);
            self.count = 0;
        }
        let non_shared = key.len() - shared;
        let mut tmp = [0u8; 15];
        let mut offset = encode_var_uint32(&mut tmp, shared as u32);
        offset += encode_var_uint32(&mut tmp[offset..], non_shared as u32);
        offset += encode_var_uint32(&mut tmp[offset..], value.len() as u32);
        self.buff.extend_from_slice(&tmp[..offset]);
        self.buff.extend_from_slice(&key[shared..]);
        self.buff.extend_from_slice(value);
        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.count += 1;
    }

    /// Appends the restart trailer and returns the finished block bytes.
    pub fn finish(&mut self) -> &[u8] {
        for restart in &self.restarts {
            put_fixed_uint32(&mut self.buff, *restart);
        }
        put_fixed_uint32(&mut self.buff, self.restarts.len() as u32);
        self.finished = true;
        &self.buff
    }

    pub fn clear(&mut self) {
        self.buff.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.last_key.clear();
        self.count = 0;
        self.finished = false;
    }

    pub fn current_size_estimate(&self) -> usize {
        self.buff.len() + self.restarts.len() * std::mem::size_of::<u32>()
            + std::mem::size_of::<u32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::decode_fixed_uint32;

    #[test]
    fn test_empty_block() {
        let mut builder = BlockBuilder::new(16);
        assert!(builder.is_empty());
        let block = builder.finish();
        // Restart zero plus the restart count.
        assert_eq!(block.len(), 8);
        assert_eq!(decode_fixed_uint32(&block[4..]), 1);
    }

    #[test]
    fn test_restart_layout() {
        // With interval 3 the fourth key starts the second restart run.
        let mut builder = BlockBuilder::new(3);
        builder.add(b"apple", b"1");
        builder.add(b"apply", b"2");
        builder.add(b"apricot", b"3");
        let banana_offset = builder.current_size_estimate() - 2 * 4;
        builder.add(b"banana", b"4");
        let block = builder.finish().to_vec();

        let num_restarts = decode_fixed_uint32(&block[block.len() - 4..]) as usize;
        assert_eq!(num_restarts, 2);
        let restart_base = block.len() - 4 - num_restarts * 4;
        assert_eq!(decode_fixed_uint32(&block[restart_base..]), 0);
        assert_eq!(
            decode_fixed_uint32(&block[restart_base + 4..]) as usize,
            banana_offset
        );
        // The restart entry stores the whole key, shared = 0.
        assert_eq!(block[banana_offset], 0);
        assert_eq!(block[banana_offset + 1] as usize, "banana".len());
        assert_eq!(&block[banana_offset + 3..banana_offset + 9], b"banana");
    }

    #[test]
    fn test_prefix_compression_drops_shared_bytes() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"block000", b"v");
        let one_entry = builder.current_size_estimate();
        builder.add(b"block001", b"v");
        let two_entries = builder.current_size_estimate();
        // The second entry shares 7 bytes: 3 varints + 1 key byte + 1 value.
        assert_eq!(two_entries - one_entry, 5);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut builder = BlockBuilder::new(16);
        builder.add(b"k", b"v");
        builder.finish();
        builder.clear();
        assert!(builder.is_empty());
        builder.add(b"a", b"1");
        let block = builder.finish();
        // shared 0, unshared 1, vlen 1, "a", "1" + trailer
        assert_eq!(block.len(), 5 + 8);
    }
}
