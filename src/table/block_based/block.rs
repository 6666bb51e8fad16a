use crate::common::{Error, KeyComparator, Result};
use crate::iterator::InternalIterator;
use crate::util::{decode_fixed_uint32, get_var_uint32};
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;

/// An immutable sorted block as produced by `BlockBuilder`. The data is
/// shared (`Bytes`), so iterators never copy the payload.
pub struct Block {
    pub data: Bytes,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn from_contents(data: Bytes) -> Result<Block> {
        if data.len() < std::mem::size_of::<u32>() {
            return Err(Error::Corruption("block too small".to_string()));
        }
        let num_restarts = decode_fixed_uint32(&data[data.len() - 4..]);
        let trailer = (1 + num_restarts as usize) * std::mem::size_of::<u32>();
        if trailer > data.len() {
            return Err(Error::Corruption(
                "bad restart count in block".to_string(),
            ));
        }
        Ok(Block {
            restart_offset: data.len() - trailer,
            num_restarts,
            data,
        })
    }

    /// The cache charge of a decoded block.
    pub fn charge(&self) -> usize {
        self.data.len()
    }

    pub fn new_iterator(&self, comparator: Arc<dyn KeyComparator>) -> BlockIter {
        BlockIter::new(
            self.data.clone(),
            self.restart_offset,
            self.num_restarts,
            comparator,
        )
    }
}

// Decodes the ⟨shared, unshared, value_len⟩ header of one entry. Returns
// (header_len, shared, unshared, value_len); header_len == 0 signals a
// malformed entry.
fn decode_entry(data: &[u8]) -> (usize, u32, u32, u32) {
    if data.len() >= 3 && (data[0] | data[1] | data[2]) < 128 {
        // Fast path: all three varints are single bytes.
        return (3, data[0] as u32, data[1] as u32, data[2] as u32);
    }
    let (mut offset, shared) = match get_var_uint32(data) {
        Some(v) => v,
        None => return (0, 0, 0, 0),
    };
    let non_shared = match get_var_uint32(&data[offset..]) {
        Some((read, v)) => {
            offset += read;
            v
        }
        None => return (0, 0, 0, 0),
    };
    let value_len = match get_var_uint32(&data[offset..]) {
        Some((read, v)) => {
            offset += read;
            v
        }
        None => return (0, 0, 0, 0),
    };
    (offset, shared, non_shared, value_len)
}

#[derive(Default, Clone, Copy)]
struct ValueSlice {
    offset: usize,
    limit: usize,
}

/// Cursor over one block. Keys are materialized by replaying the shared
/// prefixes; values are views into the shared block data.
///
/// A malformed entry (for example a shared length longer than the key
/// built so far) drives the iterator into an invalid state that reports
/// `Corruption` from `status`.
pub struct BlockIter {
    data: Bytes,
    comparator: Arc<dyn KeyComparator>,
    restart_offset: usize,
    num_restarts: u32,
    // Offset of the entry under the cursor; == restart_offset when the
    // cursor is exhausted.
    current: usize,
    restart_index: u32,
    key: Vec<u8>,
    value: ValueSlice,
    status: Option<Error>,
    cleanup: Vec<Box<dyn FnOnce() + Send>>,
}

impl BlockIter {
    fn new(
        data: Bytes,
        restart_offset: usize,
        num_restarts: u32,
        comparator: Arc<dyn KeyComparator>,
    ) -> Self {
        Self {
            data,
            comparator,
            restart_offset,
            num_restarts,
            current: restart_offset,
            restart_index: 0,
            key: vec![],
            value: ValueSlice::default(),
            status: None,
            cleanup: vec![],
        }
    }

    /// Registers a hook run when the iterator is dropped. Used to pin
    /// cache entries for as long as the iterator lives.
    pub fn register_cleanup(&mut self, hook: Box<dyn FnOnce() + Send>) {
        self.cleanup.push(hook);
    }

    fn get_restart_point(&self, index: u32) -> usize {
        debug_assert!(index < self.num_restarts);
        let offset = self.restart_offset + index as usize * std::mem::size_of::<u32>();
        decode_fixed_uint32(&self.data[offset..]) as usize
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // parse_next_key picks the entry up from the value slice.
        let offset = self.get_restart_point(index);
        self.value = ValueSlice {
            offset,
            limit: offset,
        };
    }

    fn corrupt(&mut self) {
        self.current = self.restart_offset;
        self.restart_index = self.num_restarts;
        self.key.clear();
        if self.status.is_none() {
            self.status = Some(Error::Corruption("bad entry in block".to_string()));
        }
    }

    fn parse_next_key(&mut self) -> bool {
        self.current = self.value.limit;
        if self.current >= self.restart_offset {
            // No more entries.
            self.current = self.restart_offset;
            self.restart_index = self.num_restarts;
            return false;
        }
        let (header, shared, non_shared, value_len) = decode_entry(&self.data[self.current..]);
        let key_offset = self.current + header;
        if header == 0
            || shared as usize > self.key.len()
            || key_offset + non_shared as usize + value_len as usize > self.restart_offset
        {
            self.corrupt();
            return false;
        }
        self.key.truncate(shared as usize);
        self.key
            .extend_from_slice(&self.data[key_offset..key_offset + non_shared as usize]);
        self.value = ValueSlice {
            offset: key_offset + non_shared as usize,
            limit: key_offset + non_shared as usize + value_len as usize,
        };
        while self.restart_index + 1 < self.num_restarts
            && self.get_restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        true
    }

    // Binary-searches the restart array for the last restart whose key is
    // before `target`.
    fn binary_seek_index(&mut self, target: &[u8]) -> Option<u32> {
        let mut left = 0u32;
        let mut right = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.get_restart_point(mid);
            let (header, shared, non_shared, _) = decode_entry(&self.data[region_offset..]);
            if header == 0 || shared != 0 {
                self.corrupt();
                return None;
            }
            let key_offset = region_offset + header;
            if key_offset + non_shared as usize > self.restart_offset {
                self.corrupt();
                return None;
            }
            let mid_key = &self.data[key_offset..key_offset + non_shared as usize];
            match self.comparator.compare_key(mid_key, target) {
                Ordering::Less => left = mid,
                _ => right = mid - 1,
            }
        }
        Some(left)
    }
}

impl InternalIterator for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.restart_offset
    }

    fn seek(&mut self, target: &[u8]) {
        if self.num_restarts == 0 {
            self.current = self.restart_offset;
            return;
        }
        let index = match self.binary_seek_index(target) {
            Some(index) => index,
            None => return,
        };
        self.seek_to_restart_point(index);
        // Linear scan to the first entry >= target.
        while self.parse_next_key() {
            if self.comparator.compare_key(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn seek_to_first(&mut self) {
        if self.num_restarts == 0 {
            self.current = self.restart_offset;
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.num_restarts == 0 {
            self.current = self.restart_offset;
            return;
        }
        self.seek_to_restart_point(self.num_restarts - 1);
        while self.parse_next_key() && self.value.limit < self.restart_offset {}
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;
        // Back up to a restart before the current entry, then walk
        // forward until the entry right before it.
        while self.get_restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.current = self.restart_offset;
                self.restart_index = self.num_restarts;
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.value.limit < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.data[self.value.offset..self.value.limit]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }
}

impl Drop for BlockIter {
    fn drop(&mut self) {
        for hook in self.cleanup.drain(..) {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BytewiseComparator;
    use crate::table::block_based::block_builder::BlockBuilder;

    fn build_block(entries: &[(&[u8], &[u8])], restart_interval: usize) -> Block {
        let mut builder = BlockBuilder::new(restart_interval);
        for (k, v) in entries {
            builder.add(k, v);
        }
        let data = Bytes::from(builder.finish().to_vec());
        Block::from_contents(data).unwrap()
    }

    fn comparator() -> Arc<dyn KeyComparator> {
        Arc::new(BytewiseComparator::default())
    }

    #[test]
    fn test_round_trip() {
        let entries: Vec<(&[u8], &[u8])> = vec![
            (b"apple", b"1"),
            (b"apply", b"2"),
            (b"apricot", b"3"),
            (b"banana", b"4"),
        ];
        for interval in [1, 3, 16] {
            let block = build_block(&entries, interval);
            let mut iter = block.new_iterator(comparator());
            iter.seek_to_first();
            for (k, v) in &entries {
                assert!(iter.valid());
                assert_eq!(iter.key(), *k);
                assert_eq!(iter.value(), *v);
                iter.next();
            }
            assert!(!iter.valid());
            assert!(iter.status().is_ok());
        }
    }

    #[test]
    fn test_seek() {
        let keys: Vec<String> = (0..100).map(|i| format!("key{:03}", i * 2)).collect();
        let entries: Vec<(&[u8], &[u8])> = keys
            .iter()
            .map(|k| (k.as_bytes(), b"v" as &[u8]))
            .collect();
        let block = build_block(&entries, 16);
        let mut iter = block.new_iterator(comparator());

        iter.seek(b"key050");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key050");
        // Between entries: lands on the next one.
        iter.seek(b"key0511");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key052");
        // Before the first entry.
        iter.seek(b"a");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key000");
        // Past the last entry.
        iter.seek(b"z");
        assert!(!iter.valid());
    }

    #[test]
    fn test_backward_iteration() {
        let entries: Vec<(&[u8], &[u8])> =
            vec![(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")];
        let block = build_block(&entries, 2);
        let mut iter = block.new_iterator(comparator());
        iter.seek_to_last();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"d");
        iter.prev();
        assert_eq!(iter.key(), b"c");
        iter.prev();
        assert_eq!(iter.key(), b"b");
        iter.prev();
        assert_eq!(iter.key(), b"a");
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_empty_block_iteration() {
        let block = build_block(&[], 16);
        let mut iter = block.new_iterator(comparator());
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek(b"x");
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_corrupt_entry_sets_status() {
        // A shared length pointing past the previous key is corruption.
        let mut data = vec![];
        data.extend_from_slice(&[9, 1, 1]); // shared=9 with empty prior key
        data.extend_from_slice(b"xv");
        crate::util::put_fixed_uint32(&mut data, 0);
        crate::util::put_fixed_uint32(&mut data, 1);
        let block = Block::from_contents(Bytes::from(data)).unwrap();
        let mut iter = block.new_iterator(comparator());
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(matches!(iter.status(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_truncated_restart_count_rejected() {
        let mut data = vec![];
        crate::util::put_fixed_uint32(&mut data, 1000);
        assert!(Block::from_contents(Bytes::from(data)).is_err());
        assert!(Block::from_contents(Bytes::from(vec![0u8; 2])).is_err());
    }

    #[test]
    fn test_cleanup_hooks_run_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let block = build_block(&[(b"a", b"1")], 16);
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut iter = block.new_iterator(comparator());
            let c = counter.clone();
            iter.register_cleanup(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
            assert_eq!(counter.load(Ordering::SeqCst), 0);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
