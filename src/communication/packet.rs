//! Packet pool
//!
//! Fixed arena of AX.25 frame buffers shared by the application threads,
//! the dispatcher and the radio manager. Allocation is lock-free through a
//! CAS bitmap freelist; frame contents are guarded per slot. Handles are
//! plain indices with a reference count: queueing a packet for TX or
//! decode retains it, completion releases it. The slot returns to the
//! freelist when the count reaches zero.

use crate::communication::ax25::Ax25Frame;
use core::cell::RefCell;
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Number of packet buffers.
pub const POOL_CAPACITY: usize = 16;

/// Index into the pool. The pool owns the memory; holders own references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketHandle(u8);

impl PacketHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

pub struct PacketPool {
    /// Bit set = slot free
    free_map: AtomicU16,
    refcounts: [AtomicU8; POOL_CAPACITY],
    slots: [Mutex<CriticalSectionRawMutex, RefCell<Ax25Frame>>; POOL_CAPACITY],
}

impl PacketPool {
    pub const fn new() -> Self {
        Self {
            free_map: AtomicU16::new(u16::MAX),
            refcounts: [const { AtomicU8::new(0) }; POOL_CAPACITY],
            slots: [const { Mutex::new(RefCell::new(Ax25Frame::empty())) }; POOL_CAPACITY],
        }
    }

    /// Allocate a buffer with reference count 1. Fails fast when the pool
    /// is exhausted; callers log and drop their transmission.
    pub fn alloc(&self) -> Option<PacketHandle> {
        loop {
            let map = self.free_map.load(Ordering::Acquire);
            if map == 0 {
                return None;
            }
            let idx = map.trailing_zeros() as usize;
            let new_map = map & !(1 << idx);
            if self
                .free_map
                .compare_exchange(map, new_map, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.refcounts[idx].store(1, Ordering::Release);
                self.slots[idx].lock(|cell| *cell.borrow_mut() = Ax25Frame::empty());
                return Some(PacketHandle(idx as u8));
            }
        }
    }

    /// Add a reference (packet queued for TX or decode).
    pub fn retain(&self, handle: PacketHandle) {
        let prev = self.refcounts[handle.index()].fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "retain of freed packet");
    }

    /// Drop a reference; the slot is recycled at zero.
    pub fn release(&self, handle: PacketHandle) {
        let prev = self.refcounts[handle.index()].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "double free of packet");
        if prev == 1 {
            self.free_map
                .fetch_or(1 << handle.index(), Ordering::AcqRel);
        }
    }

    /// Access the frame behind a handle.
    pub fn with<R>(&self, handle: PacketHandle, f: impl FnOnce(&mut Ax25Frame) -> R) -> R {
        self.slots[handle.index()].lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Number of slots currently allocated.
    pub fn in_use(&self) -> usize {
        POOL_CAPACITY - self.free_map.load(Ordering::Acquire).count_ones() as usize
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::ax25::Callsign;

    #[test]
    fn alloc_until_empty_then_fail_fast() {
        let pool = PacketPool::new();
        let mut handles = Vec::new();
        for _ in 0..POOL_CAPACITY {
            handles.push(pool.alloc().expect("pool slot"));
        }
        assert_eq!(pool.in_use(), POOL_CAPACITY);
        assert!(pool.alloc().is_none());
        for h in handles {
            pool.release(h);
        }
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn refcount_keeps_slot_until_last_release() {
        let pool = PacketPool::new();
        let h = pool.alloc().unwrap();
        pool.retain(h);
        pool.release(h);
        assert_eq!(pool.in_use(), 1);
        pool.release(h);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn slot_is_reset_on_alloc() {
        let pool = PacketPool::new();
        let h = pool.alloc().unwrap();
        pool.with(h, |f| {
            f.src = Callsign::parse("DL7AD-12").unwrap();
            f.set_info(b"leftover").unwrap();
        });
        pool.release(h);
        let h2 = pool.alloc().unwrap();
        pool.with(h2, |f| assert!(f.info.is_empty()));
        pool.release(h2);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_asserts_in_debug() {
        let pool = PacketPool::new();
        let h = pool.alloc().unwrap();
        pool.release(h);
        pool.release(h);
    }
}
