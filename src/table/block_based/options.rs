use crate::common::options::CompressionType;
use crate::table::block_based::block::Block;
use crate::table::block_based::bloom::FilterPolicy;
use crate::util::cache::LRUCache;
use std::sync::Arc;

#[derive(Clone)]
pub struct BlockBasedTableOptions {
    /// Uncompressed size threshold that closes a data block.
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub index_block_restart_interval: usize,
    pub compression: CompressionType,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub block_cache: Option<Arc<LRUCache<Block>>>,
}

impl Default for BlockBasedTableOptions {
    fn default() -> Self {
        BlockBasedTableOptions {
            block_size: 4096,
            block_restart_interval: 16,
            index_block_restart_interval: 1,
            compression: CompressionType::SnappyCompression,
            filter_policy: None,
            block_cache: None,
        }
    }
}
