//! Lock-free single-producer/single-consumer byte ring buffer, laid out
//! directly inside a shared-memory region (§3, §4.8).

use std::sync::atomic::{AtomicU32, Ordering};

/// `{next_written, next_read, capacity}`, placed at the start of the
/// region this ring buffer occupies. `repr(C)` so its layout is stable
/// across the processes that map the same shared-memory segment.
#[repr(C)]
pub struct RingBufferHeader {
    next_written: AtomicU32,
    next_read: AtomicU32,
    capacity: u32,
    _reserved: u32,
}

impl RingBufferHeader {
    pub const fn byte_size() -> usize {
        std::mem::size_of::<RingBufferHeader>()
    }
}

/// A view over a `RingBufferHeader` plus `capacity` data bytes, both
/// living in memory this type does not own (typically a shared-memory
/// mapping). Safe to share across threads and processes: every access
/// to the header goes through atomics, and the writer/reader never
/// touch overlapping byte ranges by construction.
pub struct RingBuffer {
    header: *const RingBufferHeader,
    data: *mut u8,
    capacity: u32,
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Initializes a fresh ring buffer of `capacity` bytes at `base`.
    ///
    /// # Safety
    /// `base` must point to at least `RingBufferHeader::byte_size() + capacity`
    /// writable bytes, correctly aligned for `RingBufferHeader`, not
    /// concurrently accessed by anyone else during this call.
    pub unsafe fn init(base: *mut u8, capacity: usize) -> Self {
        let header_ptr = base as *mut RingBufferHeader;
        std::ptr::write(
            header_ptr,
            RingBufferHeader {
                next_written: AtomicU32::new(0),
                next_read: AtomicU32::new(0),
                capacity: capacity as u32,
                _reserved: 0,
            },
        );
        RingBuffer {
            header: header_ptr,
            data: base.add(RingBufferHeader::byte_size()),
            capacity: capacity as u32,
        }
    }

    /// Attaches to a ring buffer previously initialized by [`RingBuffer::init`]
    /// at `base` by some (possibly different) process.
    ///
    /// # Safety
    /// `base` must point at a region previously initialized with the same
    /// `capacity`, still valid for the lifetime of this value.
    pub unsafe fn attach(base: *mut u8, capacity: usize) -> Self {
        RingBuffer {
            header: base as *const RingBufferHeader,
            data: base.add(RingBufferHeader::byte_size()),
            capacity: capacity as u32,
        }
    }

    fn header(&self) -> &RingBufferHeader {
        unsafe { &*self.header }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Writes as many bytes of `data` as currently fit (one slot is
    /// always reserved so full and empty are distinguishable), returning
    /// the count actually written. May span the wrap point in one call.
    pub fn write_some(&self, data: &[u8]) -> usize {
        let header = self.header();
        let next_written = header.next_written.load(Ordering::Relaxed);
        let next_read = header.next_read.load(Ordering::Acquire);
        let capacity = self.capacity;

        let free = (next_read + capacity - next_written - 1) % capacity;
        let to_write = (data.len() as u32).min(free);
        if to_write == 0 {
            return 0;
        }

        let first_len = (capacity - next_written).min(to_write);
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.data.add(next_written as usize),
                first_len as usize,
            );
            let remaining = to_write - first_len;
            if remaining > 0 {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().add(first_len as usize),
                    self.data,
                    remaining as usize,
                );
            }
        }

        let new_written = (next_written + to_write) % capacity;
        header.next_written.store(new_written, Ordering::Release);
        to_write as usize
    }

    /// Reads as many bytes as are currently available, up to `out.len()`,
    /// returning the count actually read. May span the wrap point.
    pub fn read_some(&self, out: &mut [u8]) -> usize {
        let header = self.header();
        let next_written = header.next_written.load(Ordering::Acquire);
        let next_read = header.next_read.load(Ordering::Relaxed);
        let capacity = self.capacity;

        let available = (next_written + capacity - next_read) % capacity;
        let to_read = (out.len() as u32).min(available);
        if to_read == 0 {
            return 0;
        }

        let first_len = (capacity - next_read).min(to_read);
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.data.add(next_read as usize),
                out.as_mut_ptr(),
                first_len as usize,
            );
            let remaining = to_read - first_len;
            if remaining > 0 {
                std::ptr::copy_nonoverlapping(self.data, out.as_mut_ptr().add(first_len as usize), remaining as usize);
            }
        }

        let new_read = (next_read + to_read) % capacity;
        header.next_read.store(new_read, Ordering::Release);
        to_read as usize
    }

    pub fn is_empty(&self) -> bool {
        let header = self.header();
        header.next_written.load(Ordering::Acquire) == header.next_read.load(Ordering::Acquire)
    }
}
