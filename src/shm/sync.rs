//! Cross-process mutex and condition variable built on POSIX pthread
//! primitives, placed directly inside a shared-memory region (§4.8).
//!
//! Mutexes are process-shared and robust: if the process holding the
//! lock dies, the next locker sees `EOWNERDEAD`, marks the mutex
//! consistent, and proceeds rather than wedging forever. Condition
//! variables are process-shared and bound to the monotonic clock so
//! waits are immune to wall-clock adjustments.

use std::cell::UnsafeCell;
use std::time::Duration;

use crate::common::{Result, Status};

#[repr(C)]
pub struct ShmMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for ShmMutex {}
unsafe impl Sync for ShmMutex {}

impl ShmMutex {
    /// # Safety
    /// Must run exactly once per region, before any other thread or
    /// process attaches to it, and `at` must be valid for
    /// `size_of::<ShmMutex>()` bytes.
    pub unsafe fn init(at: *mut ShmMutex) -> Result<()> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        check(libc::pthread_mutexattr_init(&mut attr))?;
        check(libc::pthread_mutexattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_mutexattr_setrobust(
            &mut attr,
            libc::PTHREAD_MUTEX_ROBUST,
        ))?;
        check(libc::pthread_mutex_init((*at).inner.get(), &attr))?;
        libc::pthread_mutexattr_destroy(&mut attr);
        Ok(())
    }

    /// Locks the mutex. A prior owner's crash surfaces as `EOWNERDEAD`;
    /// this is handled transparently by marking the mutex consistent and
    /// returning a normal guard, per the robust-mutex contract.
    pub fn lock(&self) -> Result<ShmMutexGuard<'_>> {
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        if rc == libc::EOWNERDEAD {
            unsafe {
                libc::pthread_mutex_consistent(self.inner.get());
            }
        } else if rc != 0 {
            return Err(Status::operation_failure(format!(
                "pthread_mutex_lock failed: {rc}"
            )));
        }
        Ok(ShmMutexGuard { mutex: self })
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

pub struct ShmMutexGuard<'a> {
    mutex: &'a ShmMutex,
}

impl Drop for ShmMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.raw());
        }
    }
}

#[repr(C)]
pub struct ShmCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for ShmCondvar {}
unsafe impl Sync for ShmCondvar {}

impl ShmCondvar {
    /// # Safety
    /// Same requirements as [`ShmMutex::init`].
    pub unsafe fn init(at: *mut ShmCondvar) -> Result<()> {
        let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
        check(libc::pthread_condattr_init(&mut attr))?;
        check(libc::pthread_condattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_condattr_setclock(
            &mut attr,
            libc::CLOCK_MONOTONIC,
        ))?;
        check(libc::pthread_cond_init((*at).inner.get(), &attr))?;
        libc::pthread_condattr_destroy(&mut attr);
        Ok(())
    }

    pub fn notify_all(&self) {
        unsafe {
            libc::pthread_cond_broadcast(self.inner.get());
        }
    }

    /// Waits on the condition variable while `mutex` is held by `guard`,
    /// up to `timeout`. Returns the guard (relocked on return, as
    /// `pthread_cond_timedwait` guarantees) plus whether it was woken
    /// before the deadline elapsed.
    pub fn wait_timeout<'a>(
        &self,
        guard: ShmMutexGuard<'a>,
        timeout: Duration,
    ) -> (ShmMutexGuard<'a>, bool) {
        let deadline = monotonic_deadline(timeout);
        let rc = unsafe {
            libc::pthread_cond_timedwait(self.inner.get(), guard.mutex.raw(), &deadline)
        };
        (guard, rc == 0)
    }
}

fn monotonic_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now);
    }
    let mut sec = now.tv_sec + timeout.as_secs() as i64;
    let mut nsec = now.tv_nsec + i64::from(timeout.subsec_nanos());
    if nsec >= 1_000_000_000 {
        sec += 1;
        nsec -= 1_000_000_000;
    }
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}

fn check(rc: i32) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(Status::operation_failure(format!(
            "pthread attribute call failed: {rc}"
        )))
    }
}

/// Changes-count cell: a counter bumped on every send/receive progress,
/// paired with a mutex+condvar so a sleeping reader/writer can be woken
/// rather than busy-polling (§4.8).
#[repr(C)]
pub struct ChangesCell {
    mutex: ShmMutex,
    condvar: ShmCondvar,
    count: std::sync::atomic::AtomicU32,
}

unsafe impl Send for ChangesCell {}
unsafe impl Sync for ChangesCell {}

impl ChangesCell {
    /// # Safety
    /// Same requirements as [`ShmMutex::init`].
    pub unsafe fn init(at: *mut ChangesCell) -> Result<()> {
        ShmMutex::init(std::ptr::addr_of_mut!((*at).mutex))?;
        ShmCondvar::init(std::ptr::addr_of_mut!((*at).condvar))?;
        (*at).count = std::sync::atomic::AtomicU32::new(0);
        Ok(())
    }

    pub fn snapshot(&self) -> u32 {
        self.count.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Advances the counter and wakes anyone waiting on it.
    pub fn bump(&self) {
        self.count.fetch_add(1, std::sync::atomic::Ordering::Release);
        if let Ok(_guard) = self.mutex.lock() {
            self.condvar.notify_all();
        }
    }

    /// Blocks the calling (OS) thread until `snapshot()` differs from
    /// `since`, or `timeout` elapses. Intended to be driven from
    /// `spawn_blocking`, not called directly from async code.
    pub fn wait_for_change(&self, since: u32, timeout: Duration) -> Result<bool> {
        let guard = self.mutex.lock()?;
        if self.snapshot() != since {
            return Ok(true);
        }
        let (_guard, woken) = self.condvar.wait_timeout(guard, timeout);
        Ok(woken || self.snapshot() != since)
    }
}
