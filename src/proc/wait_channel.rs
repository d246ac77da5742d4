use std::sync::{Condvar, Mutex, PoisonError};

use crate::lock::{Guard, RawLock};

pub struct WaitChannel {
    /// Bumped by every `wakeup()`. Sleepers wait for it to move.
    seq: Mutex<u64>,
    cond: Condvar,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self {
            seq: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Atomically release lock and sleep on waitchannel.
    /// Reacquires lock when awakened.
    pub fn sleep<R: RawLock, T>(&self, lock_guard: &mut Guard<'_, R, T>) {
        // Once we hold `seq`, we can be guaranteed that we won't miss any
        // wakeup (wakeup locks `seq`), so it's okay to release the lock.
        let seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        let start = *seq;
        lock_guard.reacquire_after(move || {
            let _seq = self
                .cond
                .wait_while(seq, |seq| *seq == start)
                .unwrap_or_else(PoisonError::into_inner);
        });
    }

    /// Wake up all threads sleeping on waitchannel.
    pub fn wakeup(&self) {
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq = seq.wrapping_add(1);
        self.cond.notify_all();
    }
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}
