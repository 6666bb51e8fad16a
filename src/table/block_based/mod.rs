pub mod block;
pub mod block_builder;
pub mod bloom;
pub mod compression;
pub mod filter_block;
pub mod meta_block;
pub mod options;
pub mod table_builder;
pub mod table_reader;

pub use block::{Block, BlockIter};
pub use block_builder::BlockBuilder;
pub use bloom::{BloomFilterPolicy, FilterPolicy};
pub use compression::{compress_block, uncompress_block};
pub use filter_block::{FilterBlockBuilder, FilterBlockReader};
pub use options::BlockBasedTableOptions;
pub use table_builder::BlockBasedTableBuilder;
pub use table_reader::Table;
