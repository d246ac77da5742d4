//! The lock module.
//!
//! Contains types that provide mutual exclusion.
//!
//! # Kinds of locks
//! * [`Spinlock`]: busy-waits. Critical sections must be short and must never sleep.
//! * [`Sleepablelock`]: a spinlock whose guard may sleep on a wait channel. The lock is
//!   released while sleeping and reacquired on wakeup.
//! * [`Sleeplock`]: parks contending threads on a FIFO wait queue and hands the lock to the
//!   longest waiter on release. Its guard may be held across disk I/O.
//!
//! All three share [`Lock`] and [`Guard`]; they only differ in their [`RawLock`].

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

mod sleepablelock;
mod sleeplock;
mod spinlock;

pub use sleepablelock::{RawSleepablelock, Sleepablelock, SleepablelockGuard};
pub use sleeplock::{RawSleeplock, Sleeplock, SleeplockGuard};
pub use spinlock::{RawSpinlock, Spinlock, SpinlockGuard};

pub trait RawLock {
    /// Acquires the lock.
    fn acquire(&self);
    /// Releases the lock.
    fn release(&self);
    /// Check whether the calling thread is holding the lock.
    fn holding(&self) -> bool;
}

/// Locks that provide mutual exclusion and has its own `RawLock`.
pub struct Lock<R: RawLock, T> {
    lock: R,
    data: UnsafeCell<T>,
}

unsafe impl<R: RawLock, T: Send> Sync for Lock<R, T> {}

/// Guards that guarantee exclusive mutable access to the lock's inner data.
pub struct Guard<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
    _marker: PhantomData<*const ()>,
}

// Do not implement Send; lock must be unlocked by the thread that acquired it.
unsafe impl<'s, R: RawLock, T: Sync> Sync for Guard<'s, R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    /// Acquires the lock and returns the lock guard.
    pub fn lock(&self) -> Guard<'_, R, T> {
        self.lock.acquire();

        Guard {
            lock: self,
            _marker: PhantomData,
        }
    }

    /// Check whether the calling thread is holding the lock.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }

    /// Returns a mutable reference to the inner data.
    /// The returned pointer is valid until this lock is moved or dropped.
    /// The caller must ensure that accessing the pointer does not incur race.
    pub fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    /// Unlock the lock.
    ///
    /// # Safety
    ///
    /// Use this only when we acquired the lock but did `mem::forget()` to the guard.
    pub unsafe fn unlock(&self) {
        self.lock.release();
    }
}

impl<'s, R: RawLock, T> Guard<'s, R, T> {
    /// Temporarily releases the lock and calls function `f`.
    /// After `f` returns, reacquires the lock and returns the result of the function call.
    pub fn reacquire_after<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        self.lock.lock.release();
        let result = f();
        self.lock.lock.acquire();
        result
    }

    pub(crate) fn raw(&self) -> &'s R {
        &self.lock.lock
    }
}

impl<R: RawLock, T> Drop for Guard<'_, R, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<R: RawLock, T> Deref for Guard<'_, R, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<R: RawLock, T> DerefMut for Guard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
