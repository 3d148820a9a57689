//! Back-reference pool: a fixed-size array of reference-counted slots,
//! used as an optional optimization by client senders that want to reuse
//! buffers without tearing one down while a reader might still hold it
//! (§4.8).
//!
//! A slot's refcount doubles as its state: `-1` means free, `>= 1` means
//! in use with that many live handles.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::Deref;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use crate::common::{Result, Status};

const FREE: i32 = -1;

pub struct SharedObjectPool<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    refcounts: [AtomicI32; N],
    next: AtomicUsize,
}

unsafe impl<T: Send, const N: usize> Send for SharedObjectPool<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for SharedObjectPool<T, N> {}

impl<T, const N: usize> SharedObjectPool<T, N> {
    pub fn new() -> Self {
        SharedObjectPool {
            slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            refcounts: std::array::from_fn(|_| AtomicI32::new(FREE)),
            next: AtomicUsize::new(0),
        }
    }

    /// Finds a free slot starting from a rotating index, stores `value`
    /// in it with an initial refcount of 1, and returns a handle.
    /// Fails with `OperationFailure` after a full sweep finds nothing free.
    pub fn allocate(&self, value: T) -> Result<SharedObjectHandle<'_, T, N>> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % N;
        for offset in 0..N {
            let index = (start + offset) % N;
            if self.refcounts[index]
                .compare_exchange(FREE, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                unsafe {
                    (*self.slots[index].get()).write(value);
                }
                return Ok(SharedObjectHandle { pool: self, index });
            }
        }
        Err(Status::operation_failure("shared object pool exhausted"))
    }

    /// Increments the refcount of an in-use slot and returns a new
    /// handle to it, or `None` if the slot is currently free.
    pub fn try_start_use(&self, index: usize) -> Option<SharedObjectHandle<'_, T, N>> {
        loop {
            let current = self.refcounts[index].load(Ordering::Acquire);
            if current < 1 {
                return None;
            }
            if self.refcounts[index]
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(SharedObjectHandle { pool: self, index });
            }
        }
    }
}

impl<T, const N: usize> Default for SharedObjectPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SharedObjectHandle<'a, T, const N: usize> {
    pool: &'a SharedObjectPool<T, N>,
    index: usize,
}

impl<T, const N: usize> SharedObjectHandle<'_, T, N> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T, const N: usize> Deref for SharedObjectHandle<'_, T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { (*self.pool.slots[self.index].get()).assume_init_ref() }
    }
}

impl<T, const N: usize> Drop for SharedObjectHandle<'_, T, N> {
    fn drop(&mut self) {
        let previous = self.pool.refcounts[self.index].fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            unsafe {
                (*self.pool.slots[self.index].get()).assume_init_drop();
            }
            self.pool.refcounts[self.index].store(FREE, Ordering::Release);
        }
    }
}
