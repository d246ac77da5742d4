use core::cell::UnsafeCell;
use core::hint;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;

use super::{Guard, Lock, RawLock};
use crate::proc::current_pid;

/// Mutual exclusion lock.
pub struct RawSpinlock {
    /// Name of lock.
    name: &'static str,

    /// Is the lock held?
    locked: AtomicBool,

    /// Pid of the holder, 0 if unlocked. For `holding()` and debugging.
    holder: AtomicI32,
}

pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'s, T> = Guard<'s, RawSpinlock, T>;

/// Spins this many times before yielding the processor to the holder.
const SPINS_BEFORE_YIELD: u32 = 64;

impl RawSpinlock {
    /// Mutual exclusion spin locks.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            holder: AtomicI32::new(0),
        }
    }
}

impl RawLock for RawSpinlock {
    /// Acquire the lock.
    /// Loops (spins) until the lock is acquired.
    fn acquire(&self) {
        assert!(!self.holding(), "acquire {}", self.name);

        let mut spins = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins % SPINS_BEFORE_YIELD == 0 {
                thread::yield_now();
            } else {
                hint::spin_loop();
            }
        }

        // Record info about lock acquisition for holding() and debugging.
        self.holder.store(current_pid().as_i32(), Ordering::Relaxed);
    }

    /// Release the lock.
    fn release(&self) {
        assert!(self.holding(), "release {}", self.name);
        self.holder.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }

    /// Check whether this thread is holding the lock.
    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
            && self.holder.load(Ordering::Relaxed) == current_pid().as_i32()
    }
}

impl<T> Spinlock<T> {
    /// Returns a new `Spinlock` with name `name` and data `data`.
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: RawSpinlock::new(name),
            data: UnsafeCell::new(data),
        }
    }
}
