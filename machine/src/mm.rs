//! Physical memory.
//!
//! The virtual-memory core never owns physical memory itself. It asks a
//! [`PageAllocator`] for frames and moves page contents in and out of them
//! through the allocator, which makes the frame pool a single swappable leaf
//! collaborator.

use crate::{
    addressing::{PAGE_SHIFT, PAGE_SIZE, Pa},
    spinlock::SpinLock,
};
use alloc::{boxed::Box, vec, vec::Vec};

/// Hands out and reclaims page-sized physical frames.
pub trait PageAllocator: Send + Sync {
    /// Allocates a zero-filled frame. Returns `None` when the pool is empty.
    fn allocate(&self) -> Option<Pa>;
    /// Returns `pa` to the pool.
    ///
    /// Freeing a frame that is not allocated is a kernel bug and panics.
    fn deallocate(&self, pa: Pa);
    /// Copies the contents of the frame at `pa` into `buf`.
    fn read_page(&self, pa: Pa, buf: &mut [u8; PAGE_SIZE]);
    /// Overwrites the frame at `pa` with `buf`.
    fn write_page(&self, pa: Pa, buf: &[u8; PAGE_SIZE]);
    /// Total number of frames managed by this allocator.
    fn capacity(&self) -> usize;
    /// Number of frames currently free.
    fn free_pages(&self) -> usize;
}

// 0: used, 1: unused
struct Arena {
    bitmap: Vec<u64>,
    frames: Box<[[u8; PAGE_SIZE]]>,
    free: usize,
}

impl Arena {
    fn set_used(&mut self, index: usize) {
        let (pos, ofs) = (index / 64, index % 64);
        debug_assert_ne!(self.bitmap[pos] & (1 << ofs), 0);
        self.bitmap[pos] &= !(1 << ofs);
        self.free -= 1;
    }

    fn set_unused(&mut self, index: usize) {
        let (pos, ofs) = (index / 64, index % 64);
        assert_eq!(
            self.bitmap[pos] & (1 << ofs),
            0,
            "double free of frame #{index}"
        );
        self.bitmap[pos] |= 1 << ofs;
        self.free += 1;
    }

    fn alloc(&mut self) -> Option<usize> {
        let pos = self.bitmap.iter().position(|w| *w != 0)?;
        let index = pos * 64 + self.bitmap[pos].trailing_zeros() as usize;
        if index >= self.frames.len() {
            return None;
        }
        self.set_used(index);
        self.frames[index].fill(0);
        Some(index)
    }
}

/// A fixed pool of physical frames, tracked with a bitmap.
///
/// Frame `n` lives at `Ram::BASE + n * PAGE_SIZE`.
pub struct Ram {
    inner: SpinLock<Arena>,
    capacity: usize,
}

impl Ram {
    /// Physical address of the first managed frame.
    pub const BASE: Pa = match Pa::new(0x10_0000) {
        Some(pa) => pa,
        None => unreachable!(),
    };

    /// Creates a pool of `frame_cnt` frames, all free.
    pub fn new(frame_cnt: usize) -> Self {
        let mut bitmap = vec![u64::MAX; frame_cnt.div_ceil(64)];
        if frame_cnt % 64 != 0 {
            let last = bitmap.len() - 1;
            bitmap[last] = (1u64 << (frame_cnt % 64)) - 1;
        }
        Self {
            inner: SpinLock::new(Arena {
                bitmap,
                frames: vec![[0; PAGE_SIZE]; frame_cnt].into_boxed_slice(),
                free: frame_cnt,
            }),
            capacity: frame_cnt,
        }
    }

    fn index_of(&self, pa: Pa) -> usize {
        assert!(
            pa >= Self::BASE && pa.offset() == 0,
            "{pa:?} is not a frame of this pool"
        );
        let index = (pa - Self::BASE) >> PAGE_SHIFT;
        assert!(index < self.capacity, "{pa:?} is not a frame of this pool");
        index
    }
}

impl PageAllocator for Ram {
    fn allocate(&self) -> Option<Pa> {
        let mut arena = self.inner.lock();
        let index = arena.alloc();
        arena.unlock();
        index.map(|index| Self::BASE + (index << PAGE_SHIFT))
    }

    fn deallocate(&self, pa: Pa) {
        let index = self.index_of(pa);
        let mut arena = self.inner.lock();
        arena.set_unused(index);
        arena.unlock();
    }

    fn read_page(&self, pa: Pa, buf: &mut [u8; PAGE_SIZE]) {
        let index = self.index_of(pa);
        let arena = self.inner.lock();
        buf.copy_from_slice(&arena.frames[index]);
        arena.unlock();
    }

    fn write_page(&self, pa: Pa, buf: &[u8; PAGE_SIZE]) {
        let index = self.index_of(pa);
        let mut arena = self.inner.lock();
        arena.frames[index].copy_from_slice(buf);
        arena.unlock();
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn free_pages(&self) -> usize {
        let arena = self.inner.lock();
        let free = arena.free;
        arena.unlock();
        free
    }
}
