use crate::common::{Error, Result};
use crate::iterator::InternalIterator;
use crate::table::block_based::block::BlockIter;

/// Produces the inner iterator for one index entry's value (an encoded
/// block handle).
pub trait BlockIterBuilder {
    fn build_iterator(&self, index_value: &[u8]) -> Result<BlockIter>;
}

/// Walks an index block; each index value names a data block that an
/// inner iterator is lazily opened over. Exhausting the inner iterator
/// advances the outer one, skipping empty blocks in either direction.
pub struct TwoLevelIterator<B: BlockIterBuilder> {
    builder: B,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
    // Handle of the block `data_iter` is open over, to avoid reopening it
    // when the index lands on the same entry again.
    data_block_handle: Vec<u8>,
    status: Option<Error>,
    cleanup: Vec<Box<dyn FnOnce() + Send>>,
}

impl<B: BlockIterBuilder> TwoLevelIterator<B> {
    pub fn new(index_iter: BlockIter, builder: B) -> Self {
        TwoLevelIterator {
            builder,
            index_iter,
            data_iter: None,
            data_block_handle: vec![],
            status: None,
            cleanup: vec![],
        }
    }

    /// Registers a hook run when the iterator is dropped; table caches
    /// use this to keep the table pinned while the iterator lives.
    pub fn register_cleanup(&mut self, hook: Box<dyn FnOnce() + Send>) {
        self.cleanup.push(hook);
    }

    fn save_error(&mut self, r: Result<()>) {
        if self.status.is_none() {
            if let Err(e) = r {
                self.status = Some(e);
            }
        }
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.set_data_iterator(None);
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && self.data_block_handle == handle {
            // Still positioned over the right block.
            return;
        }
        let handle = handle.to_vec();
        match self.builder.build_iterator(&handle) {
            Ok(iter) => {
                self.data_block_handle = handle;
                self.set_data_iterator(Some(iter));
            }
            Err(e) => {
                self.save_error(Err(e));
                self.set_data_iterator(None);
            }
        }
    }

    fn set_data_iterator(&mut self, iter: Option<BlockIter>) {
        if let Some(old) = self.data_iter.take() {
            let r = old.status();
            self.save_error(r);
        }
        self.data_iter = iter;
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |di| !di.valid()) {
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(di) = self.data_iter.as_mut() {
                di.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |di| !di.valid()) {
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(di) = self.data_iter.as_mut() {
                di.seek_to_last();
            }
        }
    }
}

impl<B: BlockIterBuilder> InternalIterator for TwoLevelIterator<B> {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |di| di.valid())
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(di) = self.data_iter.as_mut() {
            di.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(di) = self.data_iter.as_mut() {
            di.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(di) = self.data_iter.as_mut() {
            di.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(di) = self.data_iter.as_mut() {
            di.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(di) = self.data_iter.as_mut() {
            di.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().value()
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(di) = self.data_iter.as_ref() {
            di.status()?;
        }
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }
}

impl<B: BlockIterBuilder> Drop for TwoLevelIterator<B> {
    fn drop(&mut self) {
        // Close the inner iterator (and release its cache pin) before the
        // table-level hooks run.
        self.data_iter = None;
        for hook in self.cleanup.drain(..) {
            hook();
        }
    }
}
