use spin::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const BLOCK_SIZE: usize = 4096;

struct ArenaCore {
    // Bump state for the current block. The tail of an abandoned block is
    // wasted, never reclaimed.
    alloc_ptr: *mut u8,
    alloc_bytes_remaining: usize,
    // u64 backing keeps every block 8-aligned for the pointer-bearing
    // nodes carved out of it.
    blocks: Vec<Vec<u64>>,
}

/// Monotonic bump allocator. All allocations live until the arena itself
/// is dropped; the single writer allocates through `&self` while readers
/// may poll `memory_usage` concurrently.
pub struct Arena {
    core: Mutex<ArenaCore>,
    memory_usage: AtomicUsize,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            core: Mutex::new(ArenaCore {
                alloc_ptr: std::ptr::null_mut(),
                alloc_bytes_remaining: 0,
                blocks: vec![],
            }),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Returns a pointer to `bytes` fresh bytes. `bytes` must be positive.
    pub fn allocate(&self, bytes: usize) -> *mut u8 {
        assert!(bytes > 0);
        let mut core = self.core.lock();
        if bytes <= core.alloc_bytes_remaining {
            let result = core.alloc_ptr;
            core.alloc_ptr = unsafe { core.alloc_ptr.add(bytes) };
            core.alloc_bytes_remaining -= bytes;
            return result;
        }
        self.allocate_fallback(&mut core, bytes)
    }

    /// Like `allocate`, with the result aligned for pointer-sized data.
    pub fn allocate_aligned(&self, bytes: usize) -> *mut u8 {
        let align = std::cmp::max(std::mem::size_of::<*const u8>(), 8);
        debug_assert!(align & (align - 1) == 0);
        let mut core = self.core.lock();
        let current_mod = core.alloc_ptr as usize & (align - 1);
        let slop = if current_mod == 0 { 0 } else { align - current_mod };
        let needed = bytes + slop;
        if needed <= core.alloc_bytes_remaining {
            let result = unsafe { core.alloc_ptr.add(slop) };
            core.alloc_ptr = unsafe { core.alloc_ptr.add(needed) };
            core.alloc_bytes_remaining -= needed;
            result
        } else {
            // Fresh blocks are naturally aligned.
            self.allocate_fallback(&mut core, bytes)
        }
    }

    /// Total memory reserved by the arena. Approximate: each block also
    /// charges one pointer slot for its entry in the block vector.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    fn allocate_fallback(&self, core: &mut ArenaCore, bytes: usize) -> *mut u8 {
        if bytes > BLOCK_SIZE / 4 {
            // Oversized objects get a dedicated block so the tail of the
            // current one is not wasted.
            return self.allocate_new_block(core, bytes);
        }
        let result = self.allocate_new_block(core, BLOCK_SIZE);
        core.alloc_ptr = unsafe { result.add(bytes) };
        core.alloc_bytes_remaining = BLOCK_SIZE - bytes;
        result
    }

    fn allocate_new_block(&self, core: &mut ArenaCore, block_bytes: usize) -> *mut u8 {
        let mut block: Vec<u64> = vec![0u64; (block_bytes + 7) / 8];
        let result = block.as_mut_ptr() as *mut u8;
        core.blocks.push(block);
        self.memory_usage.fetch_add(
            block_bytes + std::mem::size_of::<usize>(),
            Ordering::Relaxed,
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_arena() {
        let arena = Arena::new();
        assert_eq!(arena.memory_usage(), 0);
    }

    #[test]
    fn test_small_allocations_share_block() {
        let arena = Arena::new();
        let a = arena.allocate(16);
        let b = arena.allocate(16);
        assert_eq!(unsafe { a.add(16) }, b);
        assert_eq!(
            arena.memory_usage(),
            BLOCK_SIZE + std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_large_allocation_gets_own_block() {
        let arena = Arena::new();
        let a = arena.allocate(8);
        let before = arena.memory_usage();
        // More than a quarter block: dedicated block, current block untouched.
        arena.allocate(BLOCK_SIZE / 4 + 1);
        assert_eq!(
            arena.memory_usage(),
            before + BLOCK_SIZE / 4 + 1 + std::mem::size_of::<usize>()
        );
        let b = arena.allocate(8);
        assert_eq!(unsafe { a.add(8) }, b);
    }

    #[test]
    fn test_aligned_allocation() {
        let arena = Arena::new();
        arena.allocate(3);
        let p = arena.allocate_aligned(64);
        assert_eq!(p as usize % 8, 0);
    }

    #[test]
    fn test_writes_survive() {
        let arena = Arena::new();
        let mut ptrs = vec![];
        for i in 0..2000usize {
            let n = 1 + i % 97;
            let p = arena.allocate(n);
            unsafe {
                std::ptr::write_bytes(p, (i % 251) as u8, n);
            }
            ptrs.push((p, n, (i % 251) as u8));
        }
        for (p, n, fill) in ptrs {
            let data = unsafe { std::slice::from_raw_parts(p, n) };
            assert!(data.iter().all(|b| *b == fill));
        }
    }
}
