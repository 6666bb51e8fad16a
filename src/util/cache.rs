use crate::util::hash::key_hash;
use spin::Mutex;
use std::alloc::Layout;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An entry is a variable-length heap-allocated structure: a fixed header
/// followed by the key bytes in the same allocation. Entries are kept in a
/// circular doubly linked list ordered by access time.
#[repr(C)]
pub struct LRUHandle<T> {
    value: Option<T>,
    next_hash: *mut LRUHandle<T>,
    next: *mut LRUHandle<T>,
    prev: *mut LRUHandle<T>,
    charge: usize,
    key_length: usize,
    hash: u32,
    // References, including the cache's own reference while `in_cache`.
    refs: u32,
    in_cache: bool,
    key_data: [u8; 0],
}

impl<T> LRUHandle<T> {
    fn layout(key_length: usize) -> Layout {
        Layout::new::<LRUHandle<T>>()
            .extend(Layout::array::<u8>(key_length).unwrap())
            .unwrap()
            .0
            .pad_to_align()
    }

    unsafe fn alloc(key: &[u8], hash: u32, value: T, charge: usize) -> *mut LRUHandle<T> {
        let h = std::alloc::alloc(Self::layout(key.len())) as *mut LRUHandle<T>;
        assert!(!h.is_null());
        std::ptr::write(
            h,
            LRUHandle {
                value: Some(value),
                next_hash: null_mut(),
                next: null_mut(),
                prev: null_mut(),
                charge,
                key_length: key.len(),
                hash,
                refs: 0,
                in_cache: false,
                key_data: [],
            },
        );
        std::ptr::copy_nonoverlapping(key.as_ptr(), (*h).key_data.as_mut_ptr(), key.len());
        h
    }

    // Takes the value out (so the caller can drop it outside the shard
    // lock) and frees the allocation.
    unsafe fn free(h: *mut LRUHandle<T>) -> Option<T> {
        let value = (*h).value.take();
        let layout = Self::layout((*h).key_length);
        std::ptr::drop_in_place(h);
        std::alloc::dealloc(h as *mut u8, layout);
        value
    }

    fn dummy_head() -> Box<LRUHandle<T>> {
        let mut head = Box::new(LRUHandle {
            value: None,
            next_hash: null_mut(),
            next: null_mut(),
            prev: null_mut(),
            charge: 0,
            key_length: 0,
            hash: 0,
            refs: 0,
            in_cache: false,
            key_data: [],
        });
        let p: *mut LRUHandle<T> = head.as_mut();
        head.next = p;
        head.prev = p;
        head
    }

    unsafe fn key(&self) -> &[u8] {
        std::slice::from_raw_parts(self.key_data.as_ptr(), self.key_length)
    }
}

/// Bucketed chaining table. `find_pointer` returns the address of the slot
/// (the bucket head or a predecessor's `next_hash`) so unlink and replace
/// are O(1) pointer writes.
struct HandleTable<T> {
    list: Vec<*mut LRUHandle<T>>,
    elems: usize,
}

impl<T> HandleTable<T> {
    fn new() -> Self {
        Self {
            list: vec![null_mut(); 16],
            elems: 0,
        }
    }

    unsafe fn find_pointer(&mut self, key: &[u8], hash: u32) -> *mut *mut LRUHandle<T> {
        let idx = (hash as usize) & (self.list.len() - 1);
        let mut ptr: *mut *mut LRUHandle<T> = &mut self.list[idx];
        while !(*ptr).is_null() && ((**ptr).hash != hash || (**ptr).key() != key) {
            ptr = &mut (**ptr).next_hash;
        }
        ptr
    }

    unsafe fn lookup(&mut self, key: &[u8], hash: u32) -> *mut LRUHandle<T> {
        *self.find_pointer(key, hash)
    }

    // Returns the replaced entry for the same key, if any.
    unsafe fn insert(&mut self, h: *mut LRUHandle<T>) -> *mut LRUHandle<T> {
        let ptr = self.find_pointer((*h).key(), (*h).hash);
        let old = *ptr;
        (*h).next_hash = if old.is_null() {
            null_mut()
        } else {
            (*old).next_hash
        };
        *ptr = h;
        if old.is_null() {
            self.elems += 1;
            if self.elems > self.list.len() {
                self.resize();
            }
        }
        old
    }

    unsafe fn remove(&mut self, key: &[u8], hash: u32) -> *mut LRUHandle<T> {
        let ptr = self.find_pointer(key, hash);
        let result = *ptr;
        if !result.is_null() {
            *ptr = (*result).next_hash;
            self.elems -= 1;
        }
        result
    }

    unsafe fn resize(&mut self) {
        let mut new_length = self.list.len();
        while new_length < self.elems {
            new_length <<= 1;
        }
        new_length <<= 1;
        let mut new_list: Vec<*mut LRUHandle<T>> = vec![null_mut(); new_length];
        let mut count = 0;
        for head in self.list.drain(..) {
            let mut h = head;
            while !h.is_null() {
                let next = (*h).next_hash;
                let idx = (*h).hash as usize & (new_length - 1);
                (*h).next_hash = new_list[idx];
                new_list[idx] = h;
                h = next;
                count += 1;
            }
        }
        assert_eq!(count, self.elems);
        self.list = new_list;
    }
}

/// One mutex-guarded slice of the cache.
///
/// Every entry with `in_cache` is on exactly one of two circular lists:
/// - `lru`: `refs == 1`, no external holder, eligible for eviction;
///   `lru.prev` is the newest entry, `lru.next` the oldest.
/// - `in_use`: `refs >= 2`, held by at least one client, never evicted.
/// Entries erased from the table while still held by a client are on
/// neither list and die when the last handle is released.
struct LRUCacheShard<T> {
    capacity: usize,
    usage: usize,
    lru: Box<LRUHandle<T>>,
    in_use: Box<LRUHandle<T>>,
    table: HandleTable<T>,
}

unsafe impl<T: Send> Send for LRUCacheShard<T> {}

impl<T> LRUCacheShard<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            usage: 0,
            lru: LRUHandle::dummy_head(),
            in_use: LRUHandle::dummy_head(),
            table: HandleTable::new(),
        }
    }

    unsafe fn list_remove(e: *mut LRUHandle<T>) {
        (*(*e).next).prev = (*e).prev;
        (*(*e).prev).next = (*e).next;
    }

    unsafe fn list_append(list: *mut LRUHandle<T>, e: *mut LRUHandle<T>) {
        // Make `e` the newest entry.
        (*e).next = list;
        (*e).prev = (*list).prev;
        (*(*e).prev).next = e;
        (*(*e).next).prev = e;
    }

    unsafe fn ref_entry(&mut self, e: *mut LRUHandle<T>) {
        if (*e).refs == 1 && (*e).in_cache {
            // Gaining its first external holder: move LRU -> in-use.
            Self::list_remove(e);
            Self::list_append(self.in_use.as_mut(), e);
        }
        (*e).refs += 1;
    }

    unsafe fn unref(&mut self, e: *mut LRUHandle<T>, garbage: &mut Vec<T>) {
        assert!((*e).refs > 0);
        (*e).refs -= 1;
        if (*e).refs == 0 {
            assert!(!(*e).in_cache);
            if let Some(value) = LRUHandle::free(e) {
                garbage.push(value);
            }
        } else if (*e).in_cache && (*e).refs == 1 {
            // No more external holders.
            Self::list_remove(e);
            if self.usage > self.capacity {
                // Still over budget from an oversize insert: drop the
                // entry now instead of parking it on the LRU list.
                let removed = self.table.remove((*e).key(), (*e).hash);
                assert_eq!(removed, e);
                (*e).in_cache = false;
                self.usage -= (*e).charge;
                (*e).refs -= 1;
                if let Some(value) = LRUHandle::free(e) {
                    garbage.push(value);
                }
            } else {
                Self::list_append(self.lru.as_mut(), e);
            }
        }
    }

    // Drops the cache's own reference to an entry that is leaving the
    // hash table.
    unsafe fn finish_erase(&mut self, e: *mut LRUHandle<T>, garbage: &mut Vec<T>) {
        if e.is_null() {
            return;
        }
        assert!((*e).in_cache);
        Self::list_remove(e);
        (*e).in_cache = false;
        self.usage -= (*e).charge;
        self.unref(e, garbage);
    }

    unsafe fn lookup(&mut self, key: &[u8], hash: u32) -> *mut LRUHandle<T> {
        let e = self.table.lookup(key, hash);
        if !e.is_null() {
            self.ref_entry(e);
        }
        e
    }

    unsafe fn insert(
        &mut self,
        key: &[u8],
        hash: u32,
        value: T,
        charge: usize,
        garbage: &mut Vec<T>,
    ) -> *mut LRUHandle<T> {
        let e = LRUHandle::alloc(key, hash, value, charge);
        (*e).refs = 1; // for the returned handle
        if self.capacity > 0 {
            (*e).refs += 1; // for the cache's own reference
            (*e).in_cache = true;
            Self::list_append(self.in_use.as_mut(), e);
            self.usage += charge;
            let old = self.table.insert(e);
            self.finish_erase(old, garbage);
        }
        // Usage may transiently exceed capacity by the one entry just
        // inserted; eviction only consumes the idle LRU list.
        while self.usage > self.capacity && !std::ptr::eq(self.lru.next, self.lru.as_ref()) {
            let old = self.lru.next;
            assert_eq!((*old).refs, 1);
            let removed = self.table.remove((*old).key(), (*old).hash);
            assert_eq!(removed, old);
            self.finish_erase(old, garbage);
        }
        e
    }

    unsafe fn release(&mut self, e: *mut LRUHandle<T>, garbage: &mut Vec<T>) {
        self.unref(e, garbage);
    }

    unsafe fn erase(&mut self, key: &[u8], hash: u32, garbage: &mut Vec<T>) {
        let e = self.table.remove(key, hash);
        self.finish_erase(e, garbage);
    }

    unsafe fn prune(&mut self, garbage: &mut Vec<T>) {
        while !std::ptr::eq(self.lru.next, self.lru.as_ref()) {
            let e = self.lru.next;
            assert_eq!((*e).refs, 1);
            let removed = self.table.remove((*e).key(), (*e).hash);
            assert_eq!(removed, e);
            self.finish_erase(e, garbage);
        }
    }
}

impl<T> Drop for LRUCacheShard<T> {
    fn drop(&mut self) {
        // All handles must have been released: entries can only remain on
        // the LRU list.
        assert!(std::ptr::eq(self.in_use.next, self.in_use.as_ref()));
        unsafe {
            let mut e = self.lru.next;
            while !std::ptr::eq(e, self.lru.as_ref()) {
                let next = (*e).next;
                assert_eq!((*e).refs, 1);
                LRUHandle::free(e);
                e = next;
            }
        }
    }
}

pub const DEFAULT_CACHE_SHARD_BITS: usize = 4;

/// Sharded LRU cache. Each operation locks exactly one shard, chosen by
/// the top bits of the key hash.
pub struct LRUCache<T> {
    shards: Vec<Mutex<LRUCacheShard<T>>>,
    num_shard_bits: usize,
    last_id: AtomicU64,
}

impl<T> LRUCache<T> {
    pub fn new(capacity: usize, num_shard_bits: usize) -> Self {
        let num_shards = 1usize << num_shard_bits;
        let per_shard = (capacity + num_shards - 1) / num_shards;
        let mut shards = Vec::with_capacity(num_shards);
        for _ in 0..num_shards {
            shards.push(Mutex::new(LRUCacheShard::new(per_shard)));
        }
        Self {
            shards,
            num_shard_bits,
            last_id: AtomicU64::new(0),
        }
    }

    fn shard(&self, hash: u32) -> usize {
        if self.num_shard_bits > 0 {
            (hash >> (32 - self.num_shard_bits)) as usize
        } else {
            0
        }
    }

    pub fn insert(self: &Arc<Self>, key: &[u8], charge: usize, value: T) -> CachableEntry<T> {
        let hash = key_hash(key);
        let mut garbage = vec![];
        let handle = unsafe {
            let mut shard = self.shards[self.shard(hash)].lock();
            shard.insert(key, hash, value, charge, &mut garbage)
        };
        // Replaced and evicted values are dropped outside the shard lock.
        drop(garbage);
        CachableEntry {
            cache: self.clone(),
            handle,
        }
    }

    pub fn lookup(self: &Arc<Self>, key: &[u8]) -> Option<CachableEntry<T>> {
        let hash = key_hash(key);
        let handle = unsafe {
            let mut shard = self.shards[self.shard(hash)].lock();
            shard.lookup(key, hash)
        };
        if handle.is_null() {
            None
        } else {
            Some(CachableEntry {
                cache: self.clone(),
                handle,
            })
        }
    }

    pub fn erase(&self, key: &[u8]) {
        let hash = key_hash(key);
        let mut garbage = vec![];
        unsafe {
            let mut shard = self.shards[self.shard(hash)].lock();
            shard.erase(key, hash, &mut garbage);
        }
        drop(garbage);
    }

    /// Drops every entry not held by a client.
    pub fn prune(&self) {
        for shard in &self.shards {
            let mut garbage = vec![];
            unsafe {
                shard.lock().prune(&mut garbage);
            }
            drop(garbage);
        }
    }

    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(|s| s.lock().usage).sum()
    }

    /// A unique id, used to partition one cache between clients by key
    /// prefix.
    pub fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self, handle: *mut LRUHandle<T>) {
        let mut garbage = vec![];
        unsafe {
            let hash = (*handle).hash;
            let mut shard = self.shards[self.shard(hash)].lock();
            shard.release(handle, &mut garbage);
        }
        drop(garbage);
    }
}

pub fn new_lru_cache<T>(capacity: usize) -> Arc<LRUCache<T>> {
    Arc::new(LRUCache::new(capacity, DEFAULT_CACHE_SHARD_BITS))
}

/// A reference-counted view of one cache entry. The entry (and the value
/// behind it) outlives every `CachableEntry` pointing at it; dropping the
/// last one after eviction runs the value's destructor exactly once.
pub struct CachableEntry<T> {
    cache: Arc<LRUCache<T>>,
    handle: *mut LRUHandle<T>,
}

unsafe impl<T: Send> Send for CachableEntry<T> {}
unsafe impl<T: Send + Sync> Sync for CachableEntry<T> {}

impl<T> CachableEntry<T> {
    pub fn value(&self) -> &T {
        unsafe { (*self.handle).value.as_ref().unwrap() }
    }
}

impl<T> Drop for CachableEntry<T> {
    fn drop(&mut self) {
        self.cache.release(self.handle);
    }
}
