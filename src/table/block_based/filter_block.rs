use crate::table::block_based::bloom::FilterPolicy;
use crate::util::{decode_fixed_uint32, put_fixed_uint32};
use bytes::Bytes;
use std::sync::Arc;

// One filter per 2 KiB window of the data-block stream.
const FILTER_BASE_LG: usize = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

/// Accumulates the keys of each 2 KiB file window into one filter.
/// Layout: concatenated filters, u32 offset per filter, u32 offset of the
/// offset array, then the base log byte.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    // Pending keys, flattened, with their start offsets.
    keys: Vec<u8>,
    start: Vec<usize>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        FilterBlockBuilder {
            policy,
            keys: vec![],
            start: vec![],
            result: vec![],
            filter_offsets: vec![],
        }
    }

    /// Announces that the next data block starts at `block_offset`.
    /// Emits filters (possibly empty ones, for windows no block starts
    /// in) until the window of that offset is covered.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.start.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    pub fn finish(&mut self) -> &[u8] {
        if !self.start.is_empty() {
            self.generate_filter();
        }
        let array_offset = self.result.len() as u32;
        for i in 0..self.filter_offsets.len() {
            let offset = self.filter_offsets[i];
            put_fixed_uint32(&mut self.result, offset);
        }
        put_fixed_uint32(&mut self.result, array_offset);
        self.result.push(FILTER_BASE_LG as u8);
        &self.result
    }

    fn generate_filter(&mut self) {
        let num_keys = self.start.len();
        self.filter_offsets.push(self.result.len() as u32);
        if num_keys == 0 {
            // An empty filter never matches; windows without a block
            // starting in them get one.
            return;
        }
        self.start.push(self.keys.len());
        let tmp_keys: Vec<&[u8]> = (0..num_keys)
            .map(|i| &self.keys[self.start[i]..self.start[i + 1]])
            .collect();
        self.policy.create_filter(&tmp_keys, &mut self.result);
        self.keys.clear();
        self.start.clear();
    }
}

/// Fail-open reader over a filter block: any structural anomaly makes
/// every probe report a potential match, so lookups fall through to the
/// data blocks.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Bytes,
    // Offset of the offset array; filters live below it.
    offset_base: usize,
    num_filters: usize,
    base_lg: usize,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Bytes) -> Self {
        let mut reader = FilterBlockReader {
            policy,
            data: Bytes::new(),
            offset_base: 0,
            num_filters: 0,
            base_lg: 0,
        };
        let n = contents.len();
        if n < 5 {
            // One byte base log plus the offset-array offset.
            return reader;
        }
        let base_lg = contents[n - 1] as usize;
        let last_word = decode_fixed_uint32(&contents[n - 5..]) as usize;
        if last_word > n - 5 {
            return reader;
        }
        reader.base_lg = base_lg;
        reader.offset_base = last_word;
        reader.num_filters = (n - 5 - last_word) / 4;
        reader.data = contents;
        reader
    }

    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            // Errors are treated as potential matches.
            return true;
        }
        let start =
            decode_fixed_uint32(&self.data[self.offset_base + index * 4..]) as usize;
        let limit =
            decode_fixed_uint32(&self.data[self.offset_base + index * 4 + 4..]) as usize;
        if start == limit {
            // Empty filters do not match any key.
            return false;
        }
        if start < limit && limit <= self.offset_base {
            return self
                .policy
                .key_may_match(key, &self.data[start..limit]);
        }
        true
    }
}
