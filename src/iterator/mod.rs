mod merge_iterator;
mod two_level_iterator;

pub use merge_iterator::MergingIterator;
pub use two_level_iterator::{BlockIterBuilder, TwoLevelIterator};

use crate::common::Result;

/// Cursor over ⟨internal key, value⟩ pairs in comparator order.
///
/// After a seek, `valid` reports whether the cursor landed on an entry;
/// an iterator that hit corruption becomes invalid and surfaces the cause
/// through `status`.
pub trait InternalIterator {
    fn valid(&self) -> bool;
    fn seek(&mut self, key: &[u8]);
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    fn next(&mut self);
    fn prev(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()> {
        Ok(())
    }
}
