//! Core write/read path of an embedded, ordered key-value storage engine:
//! an arena-backed skiplist memtable, an immutable block-based table
//! format with prefix compression and bloom filters, and sharded
//! reference-counted caches over decoded blocks and open tables.

mod common;
mod iterator;
mod memtable;
mod table;
mod util;

pub use common::{
    legacy_table_file_name, table_file_name, BytewiseComparator, Error, FileSystem,
    InMemFileSystem, InternalKeyComparator, KeyComparator, PosixFileSystem, RandomAccessFile,
    RandomAccessFileReader, Result, SequentialFile, ValueType, WritableFile, WritableFileWriter,
    MAX_SEQUENCE_NUMBER,
};
pub use common::options::{CompressionType, ReadOptions};
pub use iterator::{InternalIterator, MergingIterator, TwoLevelIterator};
pub use memtable::{LookupKey, MemIterator, Memtable};
pub use table::block_based::{
    Block, BlockBasedTableBuilder, BlockBasedTableOptions, BloomFilterPolicy, FilterPolicy, Table,
};
pub use table::TableCache;
pub use util::arena::Arena;
pub use util::cache::{new_lru_cache, CachableEntry, LRUCache};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::{append_internal_key, extract_user_key};
    use std::sync::Arc;

    fn ikey(user: &[u8], seq: u64) -> Vec<u8> {
        let mut k = vec![];
        append_internal_key(&mut k, user, seq, ValueType::TypeValue);
        k
    }

    fn build_table_file(
        fs: &Arc<dyn FileSystem>,
        options: &BlockBasedTableOptions,
        path: &str,
        number: u64,
        entries: &[(Vec<u8>, Vec<u8>)],
    ) -> usize {
        let fname = table_file_name(path, number);
        let file = fs.open_writable_file(&fname).unwrap();
        let mut builder =
            BlockBasedTableBuilder::new(options, InternalKeyComparator::default(), file);
        for (k, v) in entries {
            builder.add(k, v).unwrap();
        }
        builder.finish().unwrap();
        builder.file_size() as usize
    }

    /// The end-to-end shape: 256 keys, tiny blocks, snappy, bloom filter,
    /// block cache; read back through a two-level iterator and point gets.
    #[test]
    fn test_table_round_trip() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemFileSystem::default());
        let cache = new_lru_cache(64 << 10);
        let options = BlockBasedTableOptions {
            block_size: 64,
            block_restart_interval: 16,
            compression: CompressionType::SnappyCompression,
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            block_cache: Some(cache.clone()),
            ..Default::default()
        };
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..=255u32)
            .map(|i| {
                let user = format!("key{:03}", i);
                let value: String = user.chars().rev().collect();
                (ikey(user.as_bytes(), 1), value.into_bytes())
            })
            .collect();
        let size = build_table_file(&fs, &options, "/db", 1, &entries);

        let file = fs
            .open_random_access_file(&table_file_name("/db", 1))
            .unwrap();
        let table = Arc::new(
            Table::open(&options, InternalKeyComparator::default(), file, size).unwrap(),
        );

        // Full scan returns every entry in order with identical payloads.
        let mut iter = table.new_iterator(ReadOptions::default());
        iter.seek_to_first();
        for (k, v) in &entries {
            assert!(iter.valid());
            assert_eq!(iter.key(), k.as_slice());
            assert_eq!(iter.value(), v.as_slice());
            iter.next();
        }
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
        assert!(cache.total_charge() > 0);

        // Seek lands exactly, and next() walks on from there.
        iter.seek(&ikey(b"key100", MAX_SEQUENCE_NUMBER));
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"key100");
        assert_eq!(iter.value(), b"001yek");
        for i in 101..=105 {
            iter.next();
            assert_eq!(
                extract_user_key(iter.key()),
                format!("key{:03}", i).as_bytes()
            );
        }

        // Backward from the end.
        iter.seek_to_last();
        assert_eq!(extract_user_key(iter.key()), b"key255");
        iter.prev();
        assert_eq!(extract_user_key(iter.key()), b"key254");

        // Point gets see the stored value.
        let mut result = None;
        table
            .internal_get(
                &ReadOptions::default(),
                &ikey(b"key042", MAX_SEQUENCE_NUMBER),
                &mut |k, v| {
                    result = Some((k.to_vec(), v.to_vec()));
                },
            )
            .unwrap();
        let (k, v) = result.unwrap();
        assert_eq!(extract_user_key(&k), b"key042");
        assert_eq!(v, b"240yek");
    }

    /// A counting file wrapper proves the filter short-circuits reads.
    struct CountingFile {
        inner: Arc<Vec<u8>>,
        reads: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl RandomAccessFile for CountingFile {
        fn read(&self, offset: usize, data: &mut [u8]) -> Result<usize> {
            self.reads
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if offset >= self.inner.len() {
                return Ok(0);
            }
            let n = std::cmp::min(data.len(), self.inner.len() - offset);
            data[..n].copy_from_slice(&self.inner[offset..offset + n]);
            Ok(n)
        }

        fn file_size(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_filter_avoids_data_reads_for_missing_keys() {
        let fs_impl = InMemFileSystem::default();
        let fs: Arc<dyn FileSystem> = Arc::new(fs_impl.clone());
        let options = BlockBasedTableOptions {
            block_size: 64,
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            ..Default::default()
        };
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..=255u32)
            .map(|i| {
                let user = format!("key{:03}", i);
                (ikey(user.as_bytes(), 1), user.into_bytes())
            })
            .collect();
        let size = build_table_file(&fs, &options, "/db", 1, &entries);

        let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let data = Arc::new(fs_impl.read_all(&table_file_name("/db", 1)).unwrap());
        let file = RandomAccessFileReader::new(
            Box::new(CountingFile {
                inner: data,
                reads: reads.clone(),
            }),
            table_file_name("/db", 1),
        );
        let table =
            Table::open(&options, InternalKeyComparator::default(), file, size).unwrap();

        let after_open = reads.load(std::sync::atomic::Ordering::SeqCst);
        let mut hits = 0;
        table
            .internal_get(
                &ReadOptions::default(),
                &ikey(b"key999", MAX_SEQUENCE_NUMBER),
                &mut |_, _| hits += 1,
            )
            .unwrap();
        assert_eq!(hits, 0);
        // The index was already in memory and the filter rejected the
        // key, so the file was never touched.
        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), after_open);

        // A present key does read a block.
        table
            .internal_get(
                &ReadOptions::default(),
                &ikey(b"key123", MAX_SEQUENCE_NUMBER),
                &mut |_, _| hits += 1,
            )
            .unwrap();
        assert_eq!(hits, 1);
        assert!(reads.load(std::sync::atomic::Ordering::SeqCst) > after_open);
    }

    #[test]
    fn test_single_byte_corruption_is_detected() {
        let fs_impl = InMemFileSystem::default();
        let fs: Arc<dyn FileSystem> = Arc::new(fs_impl.clone());
        let options = BlockBasedTableOptions {
            block_size: 4096,
            compression: CompressionType::NoCompression,
            ..Default::default()
        };
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100u32)
            .map(|i| (ikey(format!("key{:03}", i).as_bytes(), 1), vec![b'v'; 20]))
            .collect();
        let size = build_table_file(&fs, &options, "/db", 1, &entries);
        let fname = table_file_name("/db", 1);
        let pristine = fs_impl.read_all(&fname).unwrap();

        // Flip one byte inside the first data block.
        let mut corrupt = pristine.clone();
        corrupt[10] ^= 0x01;
        fs_impl.store(&fname, corrupt);
        let file = fs.open_random_access_file(&fname).unwrap();
        let table = Arc::new(
            Table::open(&options, InternalKeyComparator::default(), file, size).unwrap(),
        );
        let mut iter = table.new_iterator(ReadOptions::default());
        iter.seek_to_first();
        let r = iter.status();
        assert!(
            matches!(r, Err(Error::Corruption(_))),
            "expected corruption, got {:?}",
            r
        );

        // Truncating the footer breaks open() itself.
        let mut truncated = pristine.clone();
        truncated.pop();
        fs_impl.store(&fname, truncated);
        let file = fs.open_random_access_file(&fname).unwrap();
        match Table::open(&options, InternalKeyComparator::default(), file, size) {
            Err(Error::Corruption(_)) => {}
            other => panic!("expected corruption, got {:?}", other.map(|_| ())),
        }
    }

    /// Memtable flush feeding a table build, read back merged with a
    /// second memtable: the write path end to end.
    #[test]
    fn test_flush_then_merge_read() {
        let mem = Memtable::new(InternalKeyComparator::default());
        mem.add(1, ValueType::TypeValue, b"apple", b"red");
        mem.add(2, ValueType::TypeValue, b"banana", b"yellow");
        mem.add(3, ValueType::TypeDeletion, b"cherry", b"");

        let fs: Arc<dyn FileSystem> = Arc::new(InMemFileSystem::default());
        let options = BlockBasedTableOptions::default();
        let fname = table_file_name("/db", 9);
        let file = fs.open_writable_file(&fname).unwrap();
        let mut builder =
            BlockBasedTableBuilder::new(&options, InternalKeyComparator::default(), file);
        let mut flush_iter = mem.new_iterator();
        flush_iter.seek_to_first();
        while flush_iter.valid() {
            builder.add(flush_iter.key(), flush_iter.value()).unwrap();
            flush_iter.next();
        }
        builder.finish().unwrap();
        assert_eq!(builder.num_entries(), 3);

        let file = fs.open_random_access_file(&fname).unwrap();
        let table = Arc::new(
            Table::open(
                &options,
                InternalKeyComparator::default(),
                file,
                builder.file_size() as usize,
            )
            .unwrap(),
        );

        let newer = Memtable::new(InternalKeyComparator::default());
        newer.add(4, ValueType::TypeValue, b"banana", b"green");

        let children: Vec<Box<dyn InternalIterator + '_>> = vec![
            Box::new(newer.new_iterator()),
            Box::new(table.new_iterator(ReadOptions::default())),
        ];
        let mut iter = MergingIterator::new(InternalKeyComparator::default(), children);
        iter.seek_to_first();
        let mut seen = vec![];
        while iter.valid() {
            seen.push((
                extract_user_key(iter.key()).to_vec(),
                iter.value().to_vec(),
            ));
            iter.next();
        }
        // banana appears twice, newest version first.
        assert_eq!(
            seen,
            vec![
                (b"apple".to_vec(), b"red".to_vec()),
                (b"banana".to_vec(), b"green".to_vec()),
                (b"banana".to_vec(), b"yellow".to_vec()),
                (b"cherry".to_vec(), b"".to_vec()),
            ]
        );
    }
}
