//! Sleeping locks
//!
//! Contending threads queue up in arrival order and park. Release hands the
//! lock directly to the head of the queue and makes only that thread
//! runnable, so a waiter can never be overtaken by a later arrival.
use core::cell::UnsafeCell;

use arrayvec::ArrayVec;

use super::{Guard, Lock, RawLock, Spinlock};
use crate::{
    param::NPROC,
    proc::{self, current_pid, Pid, Proc},
};

struct SleeplockState {
    /// Process holding lock. `None` means unlocked.
    owner: Option<Pid>,

    /// Processes waiting for the lock, oldest first.
    waiters: ArrayVec<Proc, NPROC>,
}

/// Long-term locks for processes
pub struct RawSleeplock {
    /// Name of lock.
    name: &'static str,

    /// spinlock protecting this sleep lock
    inner: Spinlock<SleeplockState>,
}

/// Locks that sleep instead of busy wait.
pub type Sleeplock<T> = Lock<RawSleeplock, T>;
/// Guards of `Sleeplock<T>`.
pub type SleeplockGuard<'s, T> = Guard<'s, RawSleeplock, T>;

impl RawSleeplock {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Spinlock::new(
                "sleep lock",
                SleeplockState {
                    owner: None,
                    waiters: ArrayVec::new_const(),
                },
            ),
        }
    }

    /// Number of threads parked on this lock.
    pub fn waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

impl RawLock for RawSleeplock {
    fn acquire(&self) {
        let me = Proc::current();
        let mut guard = self.inner.lock();
        assert_ne!(guard.owner, Some(me.pid()), "acquire {}", self.name);

        if guard.owner.is_none() {
            guard.owner = Some(me.pid());
            return;
        }

        if guard.waiters.try_push(me.clone()).is_err() {
            panic!("acquire {}: too many waiters", self.name);
        }

        // `release()` sets us as the owner before waking us up.
        while guard.owner != Some(me.pid()) {
            guard.reacquire_after(proc::park);
        }
    }

    fn release(&self) {
        let mut guard = self.inner.lock();
        assert_eq!(guard.owner, Some(current_pid()), "release {}", self.name);

        match guard.waiters.pop_at(0) {
            Some(next) => {
                guard.owner = Some(next.pid());
                drop(guard);
                next.wakeup();
            }
            None => guard.owner = None,
        }
    }

    fn holding(&self) -> bool {
        self.inner.lock().owner == Some(current_pid())
    }
}

impl<T> Sleeplock<T> {
    /// Returns a new `Sleeplock` with name `name` and data `data`.
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: RawSleeplock::new(name),
            data: UnsafeCell::new(data),
        }
    }

    /// Number of threads waiting to acquire this lock.
    pub fn waiters(&self) -> usize {
        self.lock.waiters()
    }
}
