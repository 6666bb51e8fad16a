use crate::common::format::extract_user_key;
use crate::common::options::CompressionType;
use crate::common::{Error, InternalKeyComparator, KeyComparator, Result, WritableFileWriter};
use crate::table::block_based::block_builder::BlockBuilder;
use crate::table::block_based::compression::compress_block;
use crate::table::block_based::filter_block::FilterBlockBuilder;
use crate::table::block_based::meta_block::MetaIndexBuilder;
use crate::table::block_based::options::BlockBasedTableOptions;
use crate::table::format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE};
use crate::util::crc_mask;
use std::cmp::Ordering;

// File-writing state, split from the builder so block writes can borrow
// it while a block builder is being drained.
struct BuilderRep {
    file: WritableFileWriter,
    offset: u64,
    last_key: Vec<u8>,
    num_entries: u64,
    closed: bool,
    status: Option<Error>,
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    compression: CompressionType,
}

impl BuilderRep {
    fn write_raw_block(&mut self, block: &[u8], tp: CompressionType) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, block.len() as u64);
        self.file.append(block)?;
        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = tp as u8;
        let crc = crc32c::crc32c_append(crc32c::crc32c(block), &trailer[..1]);
        trailer[1..].copy_from_slice(&crc_mask(crc).to_le_bytes());
        self.file.append(&trailer)?;
        self.offset += block.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    fn write_block(&mut self, block: &[u8], requested: CompressionType) -> Result<BlockHandle> {
        let (contents, tp) = compress_block(block, requested);
        self.write_raw_block(&contents, tp)
    }
}

/// Assembles one table file: framed data blocks, the filter block, a
/// metaindex block, the index block, and the fixed footer.
///
/// Keys must be added in strictly ascending order. The first error is
/// latched; later calls return it and leave the file untouched.
pub struct BlockBasedTableBuilder {
    comparator: InternalKeyComparator,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    filter_policy_name: Option<&'static str>,
    block_size: usize,
    rep: BuilderRep,
}

impl BlockBasedTableBuilder {
    pub fn new(
        options: &BlockBasedTableOptions,
        comparator: InternalKeyComparator,
        file: WritableFileWriter,
    ) -> Self {
        let mut filter_block = options
            .filter_policy
            .as_ref()
            .map(|policy| FilterBlockBuilder::new(policy.clone()));
        if let Some(filter) = filter_block.as_mut() {
            filter.start_block(0);
        }
        let filter_policy_name = options.filter_policy.as_ref().map(|policy| policy.name());
        BlockBasedTableBuilder {
            comparator,
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(options.index_block_restart_interval),
            filter_block,
            filter_policy_name,
            block_size: options.block_size,
            rep: BuilderRep {
                file,
                offset: 0,
                last_key: vec![],
                num_entries: 0,
                closed: false,
                status: None,
                pending_index_entry: false,
                pending_handle: BlockHandle::default(),
                compression: options.compression,
            },
        }
    }

    fn ok(&self) -> Result<()> {
        match &self.rep.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }

    fn latch<T>(&mut self, r: Result<T>) -> Result<T> {
        if let Err(e) = &r {
            if self.rep.status.is_none() {
                self.rep.status = Some(e.clone());
            }
        }
        r
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(!self.rep.closed);
        self.ok()?;
        if self.rep.num_entries > 0
            && self.comparator.compare_key(key, &self.rep.last_key) != Ordering::Greater
        {
            let e = Error::InvalidArgument(
                "keys must be added in strictly ascending order".to_string(),
            );
            self.rep.status = Some(e.clone());
            return Err(e);
        }

        if self.rep.pending_index_entry {
            // The previous data block's index key is chosen now that the
            // first key of the next block bounds it from above.
            debug_assert!(self.data_block.is_empty());
            let mut separator = std::mem::take(&mut self.rep.last_key);
            self.comparator.find_shortest_separator(&mut separator, key);
            let mut handle_encoding = vec![];
            self.rep.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&separator, &handle_encoding);
            self.rep.pending_index_entry = false;
        }

        if let Some(filter) = self.filter_block.as_mut() {
            filter.add_key(extract_user_key(key));
        }

        self.rep.last_key.clear();
        self.rep.last_key.extend_from_slice(key);
        self.rep.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Forces the current data block out to the file.
    pub fn flush(&mut self) -> Result<()> {
        assert!(!self.rep.closed);
        self.ok()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.rep.pending_index_entry);
        let block = self.data_block.finish();
        let r = self.rep.write_block(block, self.rep.compression);
        self.data_block.clear();
        let handle = self.latch(r)?;
        self.rep.pending_handle = handle;
        self.rep.pending_index_entry = true;
        let r = self.rep.file.flush();
        self.latch(r)?;
        if let Some(filter) = self.filter_block.as_mut() {
            filter.start_block(self.rep.offset);
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        assert!(!self.rep.closed);
        self.rep.closed = true;

        // Filter block, written raw: its layout is not a sorted block and
        // readers locate entries by offset arithmetic.
        let mut meta_index_builder = MetaIndexBuilder::new();
        if let Some(filter) = self.filter_block.as_mut() {
            let block = filter.finish();
            let r = self.rep.write_raw_block(block, CompressionType::NoCompression);
            let filter_handle = self.latch(r)?;
            let mut name = b"filter.".to_vec();
            name.extend_from_slice(self.filter_policy_name.unwrap_or_default().as_bytes());
            meta_index_builder.add(&name, &filter_handle);
        }

        let r = self
            .rep
            .write_block(meta_index_builder.finish(), self.rep.compression);
        let metaindex_handle = self.latch(r)?;

        if self.rep.pending_index_entry {
            let mut successor = std::mem::take(&mut self.rep.last_key);
            self.comparator.find_short_successor(&mut successor);
            let mut handle_encoding = vec![];
            self.rep.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&successor, &handle_encoding);
            self.rep.pending_index_entry = false;
        }
        let block = self.index_block.finish();
        let r = self.rep.write_block(block, self.rep.compression);
        let index_handle = self.latch(r)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let mut footer_encoding = vec![];
        footer.encode_to(&mut footer_encoding);
        let r = self.rep.file.append(&footer_encoding);
        self.latch(r)?;
        self.rep.offset += footer_encoding.len() as u64;
        let r = self.rep.file.sync();
        self.latch(r)
    }

    /// Stops the build; the partial file contents are the caller's to
    /// discard.
    pub fn abandon(&mut self) {
        assert!(!self.rep.closed);
        self.rep.closed = true;
    }

    pub fn num_entries(&self) -> u64 {
        self.rep.num_entries
    }

    pub fn file_size(&self) -> u64 {
        self.rep.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::append_internal_key;
    use crate::common::options::ReadOptions;
    use crate::common::{FileSystem, InMemFileSystem, ValueType};
    use crate::iterator::InternalIterator;
    use crate::table::block_based::block::Block;
    use crate::table::format::{read_block, Footer, FOOTER_ENCODED_LENGTH};
    use std::path::Path;
    use std::sync::Arc;

    fn ikey(user: &[u8], seq: u64) -> Vec<u8> {
        let mut k = vec![];
        append_internal_key(&mut k, user, seq, ValueType::TypeValue);
        k
    }

    fn builder_over(
        fs: &InMemFileSystem,
        options: &BlockBasedTableOptions,
    ) -> BlockBasedTableBuilder {
        let file = fs.open_writable_file(Path::new("/t.ldb")).unwrap();
        BlockBasedTableBuilder::new(options, InternalKeyComparator::default(), file)
    }

    #[test]
    fn test_rejects_out_of_order_keys() {
        let fs = InMemFileSystem::default();
        let mut builder = builder_over(&fs, &BlockBasedTableOptions::default());
        builder.add(&ikey(b"b", 1), b"v").unwrap();
        match builder.add(&ikey(b"a", 1), b"v") {
            Err(Error::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        // The first error is latched: even a well-ordered add now fails.
        assert!(builder.add(&ikey(b"c", 1), b"v").is_err());
        builder.abandon();
    }

    #[test]
    fn test_duplicate_internal_key_rejected() {
        let fs = InMemFileSystem::default();
        let mut builder = builder_over(&fs, &BlockBasedTableOptions::default());
        builder.add(&ikey(b"a", 1), b"v").unwrap();
        assert!(builder.add(&ikey(b"a", 1), b"v").is_err());
        builder.abandon();
    }

    #[test]
    fn test_abandon_writes_no_footer() {
        let fs = InMemFileSystem::default();
        let mut builder = builder_over(&fs, &BlockBasedTableOptions::default());
        builder.add(&ikey(b"a", 1), b"v").unwrap();
        builder.abandon();
        assert_eq!(builder.num_entries(), 1);
        // Nothing was flushed; the data block never hit the file.
        assert_eq!(builder.file_size(), 0);
    }

    #[test]
    fn test_file_layout_and_offsets() {
        let fs = InMemFileSystem::default();
        let options = BlockBasedTableOptions {
            block_size: 64,
            compression: CompressionType::NoCompression,
            ..Default::default()
        };
        let mut builder = builder_over(&fs, &options);
        for i in 0..64u32 {
            builder
                .add(&ikey(format!("key{:03}", i).as_bytes(), 1), b"value")
                .unwrap();
        }
        builder.finish().unwrap();

        let data = fs.read_all(Path::new("/t.ldb")).unwrap();
        // The builder's offset matches what actually hit the file.
        assert_eq!(builder.file_size() as usize, data.len());

        let mut footer = Footer::default();
        footer.decode_from(&data[data.len() - FOOTER_ENCODED_LENGTH..]).unwrap();
        let file = fs.open_random_access_file(Path::new("/t.ldb")).unwrap();
        let opts = ReadOptions::default();

        // Every index entry frames a checksum-clean data block, and index
        // keys are separators, shorter than the 11-byte internal keys.
        let index_contents = read_block(&file, &opts, &footer.index_handle).unwrap();
        let index_block = Block::from_contents(index_contents).unwrap();
        let mut index_iter =
            index_block.new_iterator(Arc::new(InternalKeyComparator::default()));
        index_iter.seek_to_first();
        let mut blocks = 0;
        while index_iter.valid() {
            let mut handle = crate::table::format::BlockHandle::default();
            handle.decode_from(index_iter.value()).unwrap();
            read_block(&file, &opts, &handle).unwrap();
            blocks += 1;
            index_iter.next();
        }
        assert!(blocks > 1, "block_size 64 must split the data");
    }

    #[test]
    fn test_separator_shortens_index_keys() {
        let fs = InMemFileSystem::default();
        let options = BlockBasedTableOptions {
            block_size: 1,
            compression: CompressionType::NoCompression,
            ..Default::default()
        };
        // block_size 1 flushes after every add, so each pair of
        // neighbouring keys produces one separator.
        let mut builder = builder_over(&fs, &options);
        builder
            .add(&ikey(b"the quick brown fox", 7), b"v")
            .unwrap();
        builder.add(&ikey(b"the who", 5), b"v").unwrap();
        builder.finish().unwrap();

        let data = fs.read_all(Path::new("/t.ldb")).unwrap();
        let mut footer = Footer::default();
        footer.decode_from(&data[data.len() - FOOTER_ENCODED_LENGTH..]).unwrap();
        let file = fs.open_random_access_file(Path::new("/t.ldb")).unwrap();
        let index_contents =
            read_block(&file, &ReadOptions::default(), &footer.index_handle).unwrap();
        let index_block = Block::from_contents(index_contents).unwrap();
        let mut iter = index_block.new_iterator(Arc::new(InternalKeyComparator::default()));
        iter.seek_to_first();
        assert!(iter.valid());
        // "the r" separates the two blocks.
        assert_eq!(crate::common::extract_user_key(iter.key()), b"the r");
    }
}
