use crate::util::arena::Arena;
use rand::{thread_rng, RngCore};
use std::cmp::Ordering;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering as MemOrder};

const MAX_HEIGHT: usize = 12;
const BRANCHING_FACTOR: u32 = 4;

/// Compares the encoded entries stored in nodes. Entries carry their own
/// length prefix, so implementations decode before comparing.
pub trait Comparator: Send + Sync {
    unsafe fn compare_raw_key(&self, k1: *const u8, k2: *const u8) -> Ordering;
}

/// A node's forward links live *before* the struct: the allocation is
/// `[levels h-1 .. 1][next_0][entry bytes]`, so a height-1 node pays for a
/// single pointer and the entry trails the header with no indirection.
#[repr(C)]
struct Node {
    next: [AtomicPtr<Node>; 1],
}

impl Node {
    unsafe fn key(&self) -> *const u8 {
        (self.next.as_ptr() as *const u8).add(std::mem::size_of::<AtomicPtr<Node>>())
    }

    unsafe fn get_next(&self, level: usize) -> *mut Node {
        (*(self.next.as_ptr().sub(level))).load(MemOrder::Acquire)
    }

    unsafe fn set_next(&self, level: usize, x: *mut Node) {
        (*(self.next.as_ptr().sub(level))).store(x, MemOrder::Release)
    }

    unsafe fn no_barrier_set_next(&self, level: usize, x: *mut Node) {
        (*(self.next.as_ptr().sub(level))).store(x, MemOrder::Relaxed)
    }
}

/// Ordered map over encoded byte entries, height <= 12, branching 4.
///
/// One externally-serialized writer may insert while any number of
/// readers traverse without locks: links are published with release
/// stores and read with acquire loads. A reader that observes the grown
/// max height before the upper links are installed sees null there and
/// descends a level, which is correct because null sorts after every key.
/// Nodes are never removed; the arena frees everything at drop.
pub struct InlineSkipList<C: Comparator> {
    arena: Arena,
    head: *mut Node,
    max_height: AtomicUsize,
    cmp: C,
}

unsafe impl<C: Comparator> Send for InlineSkipList<C> {}
unsafe impl<C: Comparator> Sync for InlineSkipList<C> {}

impl<C: Comparator> InlineSkipList<C> {
    pub fn new(cmp: C) -> Self {
        let arena = Arena::new();
        let head = unsafe { Self::allocate_node(&arena, MAX_HEIGHT, 0) };
        InlineSkipList {
            arena,
            head,
            max_height: AtomicUsize::new(1),
            cmp,
        }
    }

    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    fn random_height(&self) -> usize {
        // Geometric in the branching factor: each level is kept with
        // probability 1/4.
        let mut height = 1;
        let mut rng = thread_rng();
        while height < MAX_HEIGHT && rng.next_u32() % BRANCHING_FACTOR == 0 {
            height += 1;
        }
        height
    }

    unsafe fn allocate_node(arena: &Arena, height: usize, entry_size: usize) -> *mut Node {
        let prefix = std::mem::size_of::<AtomicPtr<Node>>() * (height - 1);
        let addr = arena.allocate_aligned(prefix + std::mem::size_of::<Node>() + entry_size);
        let node = addr.add(prefix) as *mut Node;
        for level in 0..height {
            (*node).no_barrier_set_next(level, null_mut());
        }
        node
    }

    /// Reserves a node for an entry of `entry_size` bytes. The caller
    /// fills the returned buffer with the encoded entry, then links it
    /// with `insert`.
    pub fn allocate_entry(&self, entry_size: usize) -> (usize, *mut u8) {
        let height = self.random_height();
        unsafe {
            let node = Self::allocate_node(&self.arena, height, entry_size);
            (height, (*node).key() as *mut u8)
        }
    }

    /// Links the node owning `entry` into the list. Requires external
    /// writer serialization; the entry must compare unequal to every live
    /// key.
    pub fn insert(&self, entry: *const u8, height: usize) {
        unsafe {
            let x = entry.sub(std::mem::size_of::<Node>()) as *mut Node;
            let mut prev = [null_mut(); MAX_HEIGHT];
            let next = self.find_greater_or_equal(entry, Some(&mut prev));
            debug_assert!(
                next.is_null() || self.cmp.compare_raw_key((*next).key(), entry) != Ordering::Equal
            );
            let max_height = self.max_height.load(MemOrder::Relaxed);
            if height > max_height {
                for p in prev.iter_mut().take(height).skip(max_height) {
                    *p = self.head;
                }
                // Racing readers that load the new height before the links
                // below are installed find null and drop a level.
                self.max_height.store(height, MemOrder::Relaxed);
            }
            for (level, p) in prev.iter().enumerate().take(height) {
                (*x).no_barrier_set_next(level, (**p).get_next(level));
                (**p).set_next(level, x);
            }
        }
    }

    pub fn contains(&self, entry: &[u8]) -> bool {
        unsafe {
            let x = self.find_greater_or_equal(entry.as_ptr(), None);
            !x.is_null() && self.cmp.compare_raw_key((*x).key(), entry.as_ptr()) == Ordering::Equal
        }
    }

    // Returns the earliest node >= `key`, optionally recording the
    // would-be predecessor at every level.
    unsafe fn find_greater_or_equal(
        &self,
        key: *const u8,
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut x = self.head;
        let mut level = self.max_height.load(MemOrder::Relaxed) - 1;
        loop {
            let next = (*x).get_next(level);
            if self.key_is_after_node(key, next) {
                x = next;
            } else {
                if let Some(p) = prev.as_mut() {
                    p[level] = x;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    // Returns the latest node whose key < `key`, or the head.
    unsafe fn find_less_than(&self, key: *const u8) -> *mut Node {
        let mut x = self.head;
        let mut level = self.max_height.load(MemOrder::Relaxed) - 1;
        loop {
            let next = (*x).get_next(level);
            if self.key_is_after_node(key, next) {
                x = next;
            } else if level == 0 {
                return x;
            } else {
                level -= 1;
            }
        }
    }

    unsafe fn find_last(&self) -> *mut Node {
        let mut x = self.head;
        let mut level = self.max_height.load(MemOrder::Relaxed) - 1;
        loop {
            let next = (*x).get_next(level);
            if !next.is_null() {
                x = next;
            } else if level == 0 {
                return x;
            } else {
                level -= 1;
            }
        }
    }

    unsafe fn key_is_after_node(&self, key: *const u8, x: *const Node) -> bool {
        !x.is_null() && self.cmp.compare_raw_key((*x).key(), key) == Ordering::Less
    }
}

pub struct SkipListIterator<'a, C: Comparator> {
    list: &'a InlineSkipList<C>,
    node: *mut Node,
}

impl<'a, C: Comparator> SkipListIterator<'a, C> {
    pub fn new(list: &'a InlineSkipList<C>) -> Self {
        Self {
            list,
            node: null_mut(),
        }
    }

    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Pointer to the node's encoded entry. Only meaningful while valid.
    pub fn key(&self) -> *const u8 {
        debug_assert!(self.valid());
        unsafe { (*self.node).key() }
    }

    pub fn seek(&mut self, encoded_key: &[u8]) {
        unsafe {
            self.node = self.list.find_greater_or_equal(encoded_key.as_ptr(), None);
        }
    }

    pub fn seek_for_prev(&mut self, encoded_key: &[u8]) {
        unsafe {
            let x = self.list.find_less_than(encoded_key.as_ptr());
            self.node = if std::ptr::eq(x, self.list.head) {
                null_mut()
            } else {
                x
            };
        }
    }

    pub fn seek_to_first(&mut self) {
        unsafe {
            self.node = (*self.list.head).get_next(0);
        }
    }

    pub fn seek_to_last(&mut self) {
        unsafe {
            let x = self.list.find_last();
            self.node = if std::ptr::eq(x, self.list.head) {
                null_mut()
            } else {
                x
            };
        }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        unsafe {
            self.node = (*self.node).get_next(0);
        }
    }

    /// Steps backward by re-searching: nodes only carry forward links.
    pub fn prev(&mut self) {
        debug_assert!(self.valid());
        unsafe {
            let x = self.list.find_less_than((*self.node).key());
            self.node = if std::ptr::eq(x, self.list.head) {
                null_mut()
            } else {
                x
            };
        }
    }
}
