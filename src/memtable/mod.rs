mod inline_skiplist;

pub use inline_skiplist::{Comparator, InlineSkipList, SkipListIterator};

use crate::common::format::{
    extract_user_key, extract_value_type, pack_sequence_and_type, ValueType, VALUE_TYPE_FOR_SEEK,
};
use crate::common::{Error, InternalKeyComparator, KeyComparator, Result};
use crate::iterator::InternalIterator;
use crate::util::{encode_var_uint32, get_var_uint32, varint_length};
use std::cmp::Ordering;

/// Probe key for memtable lookups:
/// `varint32(user_key.len() + 8) | user_key | (sequence << 8) | type`.
/// The snapshot is packed into the tag, so the skiplist seek itself skips
/// entries newer than the snapshot.
pub struct LookupKey {
    data: Vec<u8>,
    key_offset: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: u64) -> Self {
        let internal_key_size = user_key.len() + 8;
        let mut data = vec![0u8; varint_length(internal_key_size as u64)];
        let key_offset = encode_var_uint32(&mut data, internal_key_size as u32);
        data.extend_from_slice(user_key);
        data.extend_from_slice(
            &pack_sequence_and_type(sequence, VALUE_TYPE_FOR_SEEK).to_le_bytes(),
        );
        LookupKey { data, key_offset }
    }

    /// The full encoded form probed against the skiplist.
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.key_offset..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.key_offset..self.data.len() - 8]
    }
}

/// Bridges the internal-key comparator onto the skiplist's raw encoded
/// entries (varint length prefix, then the internal key).
pub struct MemKeyComparator {
    comparator: InternalKeyComparator,
}

unsafe fn decode_entry_key<'a>(k: *const u8) -> &'a [u8] {
    let data = std::slice::from_raw_parts(k, 5);
    let (offset, len) = get_var_uint32(data).unwrap();
    std::slice::from_raw_parts(k.add(offset), len as usize)
}

impl Comparator for MemKeyComparator {
    unsafe fn compare_raw_key(&self, k1: *const u8, k2: *const u8) -> Ordering {
        self.comparator
            .compare_key(decode_entry_key(k1), decode_entry_key(k2))
    }
}

/// In-memory write buffer: an arena-backed skiplist of internal keys.
/// Entries are `varint32(klen) | internal_key | varint32(vlen) | value`.
pub struct Memtable {
    list: InlineSkipList<MemKeyComparator>,
    comparator: InternalKeyComparator,
}

impl Memtable {
    pub fn new(comparator: InternalKeyComparator) -> Self {
        Memtable {
            list: InlineSkipList::new(MemKeyComparator {
                comparator: comparator.clone(),
            }),
            comparator,
        }
    }

    /// Inserts one mutation. The caller serializes writers and assigns a
    /// fresh sequence number, so no two entries compare equal.
    pub fn add(&self, sequence: u64, tp: ValueType, key: &[u8], value: &[u8]) {
        let internal_key_size = key.len() + 8;
        let encoded_len = varint_length(internal_key_size as u64)
            + internal_key_size
            + varint_length(value.len() as u64)
            + value.len();
        let (height, addr) = self.list.allocate_entry(encoded_len);
        unsafe {
            let data = std::slice::from_raw_parts_mut(addr, encoded_len);
            let mut offset = encode_var_uint32(data, internal_key_size as u32);
            data[offset..offset + key.len()].copy_from_slice(key);
            offset += key.len();
            data[offset..offset + 8]
                .copy_from_slice(&pack_sequence_and_type(sequence, tp as u8).to_le_bytes());
            offset += 8;
            offset += encode_var_uint32(&mut data[offset..], value.len() as u32);
            data[offset..offset + value.len()].copy_from_slice(value);
            self.list.insert(addr, height);
        }
    }

    /// Looks up the newest entry visible at the key's snapshot.
    ///
    /// `None` means the memtable knows nothing and the caller falls
    /// through to the tables; `Some(Err(NotFound))` means a deletion
    /// shadows the key.
    pub fn get(&self, key: &LookupKey) -> Option<Result<Vec<u8>>> {
        let mut iter = SkipListIterator::new(&self.list);
        iter.seek(key.memtable_key());
        if !iter.valid() {
            return None;
        }
        unsafe {
            let entry_key = decode_entry_key(iter.key());
            if self
                .comparator
                .user_comparator()
                .compare_key(extract_user_key(entry_key), key.user_key())
                != Ordering::Equal
            {
                return None;
            }
            if extract_value_type(entry_key) == ValueType::TypeDeletion as u8 {
                return Some(Err(Error::NotFound));
            }
            let value_ptr = entry_key.as_ptr().add(entry_key.len());
            let value_data = std::slice::from_raw_parts(value_ptr, 5);
            let (offset, value_len) = get_var_uint32(value_data).unwrap();
            let value = std::slice::from_raw_parts(value_ptr.add(offset), value_len as usize);
            Some(Ok(value.to_vec()))
        }
    }

    pub fn contains(&self, key: &LookupKey) -> bool {
        self.list.contains(key.memtable_key())
    }

    pub fn approximate_memory_usage(&self) -> usize {
        self.list.memory_usage()
    }

    pub fn new_iterator(&self) -> MemIterator<'_> {
        MemIterator {
            iter: SkipListIterator::new(&self.list),
            buf: vec![],
        }
    }
}

/// Iterates the memtable as ⟨internal key, value⟩ pairs in comparator
/// order. Key and value are views into arena memory and stay valid for
/// the life of the memtable.
pub struct MemIterator<'a> {
    iter: SkipListIterator<'a, MemKeyComparator>,
    buf: Vec<u8>,
}

impl<'a> MemIterator<'a> {
    fn encode_target(&mut self, target: &[u8]) {
        self.buf.clear();
        let mut tmp = [0u8; 5];
        let offset = encode_var_uint32(&mut tmp, target.len() as u32);
        self.buf.extend_from_slice(&tmp[..offset]);
        self.buf.extend_from_slice(target);
    }
}

impl<'a> InternalIterator for MemIterator<'a> {
    fn valid(&self) -> bool {
        self.iter.valid()
    }

    fn seek(&mut self, target: &[u8]) {
        self.encode_target(target);
        self.iter.seek(&self.buf);
    }

    fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
    }

    fn seek_to_last(&mut self) {
        self.iter.seek_to_last();
    }

    fn next(&mut self) {
        self.iter.next();
    }

    fn prev(&mut self) {
        self.iter.prev();
    }

    fn key(&self) -> &[u8] {
        unsafe { decode_entry_key(self.iter.key()) }
    }

    fn value(&self) -> &[u8] {
        unsafe {
            let entry_key = decode_entry_key(self.iter.key());
            let value_ptr = entry_key.as_ptr().add(entry_key.len());
            let value_data = std::slice::from_raw_parts(value_ptr, 5);
            let (offset, value_len) = get_var_uint32(value_data).unwrap();
            std::slice::from_raw_parts(value_ptr.add(offset), value_len as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memtable() -> Memtable {
        Memtable::new(InternalKeyComparator::default())
    }

    #[test]
    fn test_add_and_get() {
        let m = memtable();
        m.add(1, ValueType::TypeValue, b"foo", b"v1");
        m.add(2, ValueType::TypeValue, b"bar", b"v2");
        assert_eq!(
            m.get(&LookupKey::new(b"foo", 5)).unwrap().unwrap(),
            b"v1".to_vec()
        );
        assert_eq!(
            m.get(&LookupKey::new(b"bar", 5)).unwrap().unwrap(),
            b"v2".to_vec()
        );
        assert!(m.get(&LookupKey::new(b"baz", 5)).is_none());
        assert!(m.approximate_memory_usage() > 0);
    }

    #[test]
    fn test_snapshot_visibility() {
        // Sequence 1: put b -> "B"; sequence 2: put a -> "A";
        // sequence 3: delete b.
        let m = memtable();
        m.add(1, ValueType::TypeValue, b"b", b"B");
        m.add(2, ValueType::TypeValue, b"a", b"A");
        m.add(3, ValueType::TypeDeletion, b"b", b"");

        // At snapshot 3 the deletion wins.
        match m.get(&LookupKey::new(b"b", 3)) {
            Some(Err(Error::NotFound)) => {}
            other => panic!("expected deletion, got {:?}", other.map(|r| r.is_ok())),
        }
        // Snapshots below the deletion still see the old value.
        assert_eq!(m.get(&LookupKey::new(b"b", 2)).unwrap().unwrap(), b"B");
        assert_eq!(m.get(&LookupKey::new(b"b", 1)).unwrap().unwrap(), b"B");
        // A snapshot before b existed sees nothing... sequence 0 finds no
        // entry with sequence <= 0.
        assert!(m.get(&LookupKey::new(b"b", 0)).is_none());
        assert_eq!(m.get(&LookupKey::new(b"a", 3)).unwrap().unwrap(), b"A");
    }

    #[test]
    fn test_contains() {
        let m = memtable();
        m.add(7, ValueType::TypeValue, b"k1", b"v");
        assert!(m.contains(&LookupKey::new(b"k1", 7)));
        assert!(!m.contains(&LookupKey::new(b"k1", 8)));
        assert!(!m.contains(&LookupKey::new(b"k2", 7)));
    }

    #[test]
    fn test_iteration_order() {
        let m = memtable();
        let keys: [&[u8]; 5] = [b"delta", b"alpha", b"echo", b"bravo", b"charlie"];
        for (i, k) in keys.iter().enumerate() {
            m.add(i as u64 + 1, ValueType::TypeValue, k, k);
        }
        let mut iter = m.new_iterator();
        iter.seek_to_first();
        let mut seen = vec![];
        while iter.valid() {
            seen.push(extract_user_key(iter.key()).to_vec());
            iter.next();
        }
        assert_eq!(seen, vec![
            b"alpha".to_vec(),
            b"bravo".to_vec(),
            b"charlie".to_vec(),
            b"delta".to_vec(),
            b"echo".to_vec(),
        ]);

        iter.seek_to_last();
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"echo");
        iter.prev();
        assert_eq!(extract_user_key(iter.key()), b"delta");

        let mut target = vec![];
        crate::common::format::append_internal_key(
            &mut target,
            b"c",
            crate::common::MAX_SEQUENCE_NUMBER,
            ValueType::TypeValue,
        );
        iter.seek(&target);
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"charlie");
        assert_eq!(iter.value(), b"charlie");
    }

    #[test]
    fn test_multiple_versions_iterate_newest_first() {
        let m = memtable();
        m.add(1, ValueType::TypeValue, b"k", b"v1");
        m.add(2, ValueType::TypeValue, b"k", b"v2");
        m.add(3, ValueType::TypeValue, b"k", b"v3");
        let mut iter = m.new_iterator();
        iter.seek_to_first();
        let mut values = vec![];
        while iter.valid() {
            values.push(iter.value().to_vec());
            iter.next();
        }
        assert_eq!(values, vec![b"v3".to_vec(), b"v2".to_vec(), b"v1".to_vec()]);
    }

    #[test]
    fn test_concurrent_readers_during_writes() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let m = Arc::new(memtable());
        let done = Arc::new(AtomicBool::new(false));
        let mut readers = vec![];
        for _ in 0..4 {
            let m = m.clone();
            let done = done.clone();
            readers.push(std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let mut iter = m.new_iterator();
                    iter.seek_to_first();
                    let mut prev: Option<Vec<u8>> = None;
                    let mut count = 0usize;
                    while iter.valid() {
                        let key = iter.key().to_vec();
                        if let Some(p) = &prev {
                            assert!(extract_user_key(p) <= extract_user_key(&key));
                        }
                        prev = Some(key);
                        count += 1;
                        iter.next();
                    }
                    assert!(count <= 1000);
                }
            }));
        }
        for i in 0..1000u64 {
            let key = format!("key{:04}", (i * 37) % 1000);
            m.add(i + 1, ValueType::TypeValue, key.as_bytes(), b"value");
        }
        done.store(true, Ordering::Release);
        for r in readers {
            r.join().unwrap();
        }
    }
}
