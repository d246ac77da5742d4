//! Sleepable locks
use core::cell::UnsafeCell;

use super::{spinlock::RawSpinlock, Guard, Lock, RawLock};
use crate::proc::WaitChannel;

/// Mutual exclusion spin locks that can sleep.
pub struct RawSleepablelock {
    lock: RawSpinlock,
    /// WaitChannel saying the protected state changed.
    waitchannel: WaitChannel,
}

/// Similar to `Spinlock`, but guards of this lock can sleep.
pub type Sleepablelock<T> = Lock<RawSleepablelock, T>;
pub type SleepablelockGuard<'s, T> = Guard<'s, RawSleepablelock, T>;

impl RawSleepablelock {
    const fn new(name: &'static str) -> Self {
        Self {
            lock: RawSpinlock::new(name),
            waitchannel: WaitChannel::new(),
        }
    }
}

impl RawLock for RawSleepablelock {
    fn acquire(&self) {
        self.lock.acquire();
    }

    fn release(&self) {
        self.lock.release();
    }

    fn holding(&self) -> bool {
        self.lock.holding()
    }
}

impl<T> Sleepablelock<T> {
    /// Returns a new `Sleepablelock` with name `name` and data `data`.
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            lock: RawSleepablelock::new(name),
            data: UnsafeCell::new(data),
        }
    }

    /// Wakes up every thread sleeping on this lock, without holding it.
    pub fn wakeup(&self) {
        self.lock.waitchannel.wakeup();
    }
}

impl<T> SleepablelockGuard<'_, T> {
    /// Releases the lock, sleeps until someone calls `wakeup()`, and reacquires the lock.
    pub fn sleep(&mut self) {
        let raw = self.raw();
        raw.waitchannel.sleep(self);
    }

    pub fn wakeup(&self) {
        self.raw().waitchannel.wakeup();
    }
}
