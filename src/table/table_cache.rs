use crate::common::options::ReadOptions;
use crate::common::{
    legacy_table_file_name, table_file_name, FileSystem, InternalKeyComparator, Result,
};
use crate::iterator::TwoLevelIterator;
use crate::table::block_based::options::BlockBasedTableOptions;
use crate::table::block_based::table_reader::{Table, TableBlockAccess};
use crate::util::cache::{CachableEntry, LRUCache};
use crate::util::put_fixed_uint64;
use std::sync::Arc;

// Open file descriptors the rest of the process needs.
const RESERVED_FILE_HANDLES: usize = 10;

/// Caches open tables (parsed index + filter + file handle) by file
/// number. A transient open failure is not memoized: the next lookup
/// retries the open.
pub struct TableCache {
    cache: Arc<LRUCache<Arc<Table>>>,
    fs: Arc<dyn FileSystem>,
    db_path: String,
    comparator: InternalKeyComparator,
    options: BlockBasedTableOptions,
}

impl TableCache {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        db_path: String,
        comparator: InternalKeyComparator,
        options: BlockBasedTableOptions,
        max_open_files: usize,
    ) -> Self {
        let entries = max_open_files.saturating_sub(RESERVED_FILE_HANDLES).max(1);
        TableCache {
            cache: Arc::new(LRUCache::new(
                entries,
                crate::util::cache::DEFAULT_CACHE_SHARD_BITS,
            )),
            fs,
            db_path,
            comparator,
            options,
        }
    }

    fn cache_key(file_number: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(8);
        put_fixed_uint64(&mut key, file_number);
        key
    }

    pub fn find_table(
        &self,
        file_number: u64,
        file_size: usize,
    ) -> Result<CachableEntry<Arc<Table>>> {
        let key = Self::cache_key(file_number);
        if let Some(entry) = self.cache.lookup(&key) {
            return Ok(entry);
        }
        let fname = table_file_name(&self.db_path, file_number);
        let file = match self.fs.open_random_access_file(&fname) {
            Ok(file) => file,
            Err(e) => {
                // Tables written before the extension change.
                let old_fname = legacy_table_file_name(&self.db_path, file_number);
                match self.fs.open_random_access_file(&old_fname) {
                    Ok(file) => file,
                    Err(_) => return Err(e),
                }
            }
        };
        log::debug!("opening table {:06} from {:?}", file_number, fname);
        let table = Table::open(&self.options, self.comparator.clone(), file, file_size)?;
        Ok(self.cache.insert(&key, 1, Arc::new(table)))
    }

    /// Iterates the whole table. The iterator keeps the cache entry (and
    /// with it the open file and parsed table) alive until it is dropped.
    pub fn new_iterator(
        &self,
        opts: ReadOptions,
        file_number: u64,
        file_size: usize,
    ) -> Result<TwoLevelIterator<TableBlockAccess>> {
        let entry = self.find_table(file_number, file_size)?;
        let table = entry.value().clone();
        let mut iter = table.new_iterator(opts);
        iter.register_cleanup(Box::new(move || drop(entry)));
        Ok(iter)
    }

    /// Point lookup through the cached table.
    pub fn get<F>(
        &self,
        opts: &ReadOptions,
        file_number: u64,
        file_size: usize,
        internal_key: &[u8],
        found: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let entry = self.find_table(file_number, file_size)?;
        entry.value().internal_get(opts, internal_key, found)
    }

    /// Drops the slot for a deleted file so its handle closes once the
    /// last iterator over it goes away.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&Self::cache_key(file_number));
    }
}
