use crate::common::format::extract_user_key;
use crate::common::options::ReadOptions;
use crate::common::{
    Error, InternalKeyComparator, KeyComparator, RandomAccessFileReader, Result,
};
use crate::iterator::{BlockIterBuilder, InternalIterator, TwoLevelIterator};
use crate::table::block_based::block::{Block, BlockIter};
use crate::table::block_based::filter_block::FilterBlockReader;
use crate::table::block_based::options::BlockBasedTableOptions;
use crate::table::format::{read_block, BlockHandle, Footer, FOOTER_ENCODED_LENGTH};
use crate::util::put_fixed_uint64;
use std::cmp::Ordering;
use std::sync::Arc;

/// An open, immutable table file: parsed footer and index block, plus the
/// filter when the options carry a policy. Safe for concurrent readers;
/// every iterator is single-threaded.
pub struct Table {
    options: BlockBasedTableOptions,
    comparator: InternalKeyComparator,
    file: RandomAccessFileReader,
    index_block: Block,
    filter: Option<FilterBlockReader>,
    // Prefixes this table's block-cache keys.
    cache_id: u64,
}

impl Table {
    pub fn open(
        options: &BlockBasedTableOptions,
        comparator: InternalKeyComparator,
        file: RandomAccessFileReader,
        file_size: usize,
    ) -> Result<Table> {
        if file_size < FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption(
                "file is too short to be a table".to_string(),
            ));
        }
        let mut footer_input = [0u8; FOOTER_ENCODED_LENGTH];
        let read = file.read(
            file_size - FOOTER_ENCODED_LENGTH,
            FOOTER_ENCODED_LENGTH,
            &mut footer_input,
        )?;
        if read != FOOTER_ENCODED_LENGTH {
            return Err(Error::Corruption("truncated table footer".to_string()));
        }
        let mut footer = Footer::default();
        footer.decode_from(&footer_input)?;

        // The index is load-bearing: read it checksum-verified.
        let opts = ReadOptions {
            verify_checksums: true,
            fill_cache: false,
        };
        let index_contents = read_block(&file, &opts, &footer.index_handle)?;
        let index_block = Block::from_contents(index_contents)?;

        let cache_id = options
            .block_cache
            .as_ref()
            .map_or(0, |cache| cache.new_id());
        let mut table = Table {
            options: options.clone(),
            comparator,
            file,
            index_block,
            filter: None,
            cache_id,
        };
        table.read_meta(&footer);
        Ok(table)
    }

    // Loads the filter named by the metaindex. Failures fall open: the
    // table works without a filter, every get just reads a data block.
    fn read_meta(&mut self, footer: &Footer) {
        let policy = match self.options.filter_policy.as_ref() {
            Some(policy) => policy.clone(),
            None => return,
        };
        let opts = ReadOptions {
            verify_checksums: true,
            fill_cache: false,
        };
        let meta_contents = match read_block(&self.file, &opts, &footer.metaindex_handle) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!(
                    "ignoring metaindex of {:?}: {}",
                    self.file.file_name(),
                    e
                );
                return;
            }
        };
        let meta_block = match Block::from_contents(meta_contents) {
            Ok(block) => block,
            Err(_) => return,
        };
        let mut key = b"filter.".to_vec();
        key.extend_from_slice(policy.name().as_bytes());
        let mut iter =
            meta_block.new_iterator(Arc::new(crate::common::BytewiseComparator::default()));
        iter.seek(&key);
        if !iter.valid() || iter.key() != key {
            return;
        }
        let mut handle = BlockHandle::default();
        if handle.decode_from(iter.value()).is_err() {
            return;
        }
        match read_block(&self.file, &opts, &handle) {
            Ok(contents) => {
                self.filter = Some(FilterBlockReader::new(policy, contents));
            }
            Err(e) => {
                log::warn!("ignoring filter block of {:?}: {}", self.file.file_name(), e);
            }
        }
    }

    /// Opens an iterator over one data block, going through the block
    /// cache when one is configured. The returned iterator pins the cache
    /// entry via a cleanup hook.
    fn block_iterator(&self, opts: &ReadOptions, index_value: &[u8]) -> Result<BlockIter> {
        let mut handle = BlockHandle::default();
        handle.decode_from(index_value)?;
        let comparator: Arc<dyn KeyComparator> = Arc::new(self.comparator.clone());

        let cache = match self.options.block_cache.as_ref() {
            Some(cache) => cache,
            None => {
                let contents = read_block(&self.file, opts, &handle)?;
                let block = Block::from_contents(contents)?;
                return Ok(block.new_iterator(comparator));
            }
        };

        let mut cache_key = Vec::with_capacity(16);
        put_fixed_uint64(&mut cache_key, self.cache_id);
        put_fixed_uint64(&mut cache_key, handle.offset);
        if let Some(entry) = cache.lookup(&cache_key) {
            let mut iter = entry.value().new_iterator(comparator);
            iter.register_cleanup(Box::new(move || drop(entry)));
            return Ok(iter);
        }

        let contents = read_block(&self.file, opts, &handle)?;
        let block = Block::from_contents(contents)?;
        if !opts.fill_cache {
            return Ok(block.new_iterator(comparator));
        }
        log::debug!(
            "caching block at {} of {:?}",
            handle.offset,
            self.file.file_name()
        );
        let charge = block.charge();
        let entry = cache.insert(&cache_key, charge, block);
        let mut iter = entry.value().new_iterator(comparator);
        iter.register_cleanup(Box::new(move || drop(entry)));
        Ok(iter)
    }

    pub fn new_iterator(self: &Arc<Self>, opts: ReadOptions) -> TwoLevelIterator<TableBlockAccess> {
        let index_iter = self
            .index_block
            .new_iterator(Arc::new(self.comparator.clone()));
        TwoLevelIterator::new(
            index_iter,
            TableBlockAccess {
                table: self.clone(),
                opts,
            },
        )
    }

    /// Point lookup. Consults the filter first; when it rules the key
    /// out, no data block is read. On a hit, `found` is invoked with the
    /// first entry whose user key equals the query's.
    pub fn internal_get<F>(
        &self,
        opts: &ReadOptions,
        internal_key: &[u8],
        found: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut index_iter = self
            .index_block
            .new_iterator(Arc::new(self.comparator.clone()));
        index_iter.seek(internal_key);
        if !index_iter.valid() {
            return index_iter.status();
        }
        let mut handle = BlockHandle::default();
        handle.decode_from(index_iter.value())?;
        if let Some(filter) = self.filter.as_ref() {
            if !filter.key_may_match(handle.offset, extract_user_key(internal_key)) {
                // Filtered out without touching the data.
                return Ok(());
            }
        }
        let mut block_iter = self.block_iterator(opts, index_iter.value())?;
        block_iter.seek(internal_key);
        if block_iter.valid() {
            let same_user_key = self
                .comparator
                .user_comparator()
                .compare_key(
                    extract_user_key(block_iter.key()),
                    extract_user_key(internal_key),
                )
                == Ordering::Equal;
            if same_user_key {
                found(block_iter.key(), block_iter.value());
            }
        }
        block_iter.status()
    }
}

/// Block access for the two-level iterator.
pub struct TableBlockAccess {
    table: Arc<Table>,
    opts: ReadOptions,
}

impl BlockIterBuilder for TableBlockAccess {
    fn build_iterator(&self, index_value: &[u8]) -> Result<BlockIter> {
        self.table.block_iterator(&self.opts, index_value)
    }
}
