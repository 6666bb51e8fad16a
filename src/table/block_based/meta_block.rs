use crate::table::block_based::block_builder::BlockBuilder;
use crate::table::format::BlockHandle;

/// Builds the metaindex block: sorted `name -> block handle` entries,
/// one restart per entry.
pub struct MetaIndexBuilder {
    meta_index_block: BlockBuilder,
    meta_block_handles: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MetaIndexBuilder {
    pub fn new() -> MetaIndexBuilder {
        MetaIndexBuilder {
            meta_block_handles: vec![],
            meta_index_block: BlockBuilder::new(1),
        }
    }

    pub fn add(&mut self, key: &[u8], handle: &BlockHandle) {
        let mut handle_encoding = Vec::with_capacity(20);
        handle.encode_to(&mut handle_encoding);
        self.meta_block_handles.push((key.to_vec(), handle_encoding));
    }

    pub fn finish(&mut self) -> &[u8] {
        self.meta_block_handles.sort_by(|x, y| x.0.cmp(&y.0));
        for (k, v) in self.meta_block_handles.iter() {
            self.meta_index_block.add(k.as_slice(), v.as_slice());
        }
        self.meta_index_block.finish()
    }
}

impl Default for MetaIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}
