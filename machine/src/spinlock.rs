//! Busy-waiting lock.
//!
//! The virtual-memory context keeps all of its tables behind one
//! [`SpinLock`]. Critical sections are short except for swap transfers, so
//! waiters back off exponentially instead of spinning on the cache line.

use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::Backoff;

/// A test-and-set lock around a `T`.
///
/// ```
/// use machine::spinlock::SpinLock;
///
/// let counter = SpinLock::new(0);
/// let mut guard = counter.lock();
/// *guard += 1;
/// guard.unlock();
/// ```
pub struct SpinLock<T: ?Sized> {
    held: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Wraps `value` in an unlocked lock.
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Spins until the lock is free and takes it.
    ///
    /// Taking the lock again from the holder deadlocks.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        // Only retry the swap once the holder has let go.
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
        SpinLockGuard {
            lock: self,
            _pinned: PhantomData,
        }
    }
}

/// Exclusive access to the value of a [`SpinLock`].
///
/// Dropping the guard releases the lock; [`unlock`](Self::unlock) does the
/// same at an explicit point. The guard stays on the thread that took it.
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    _pinned: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the lock.
    pub fn unlock(self) {}
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held, and `&mut self` that no
        // other reference into the value is live.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
