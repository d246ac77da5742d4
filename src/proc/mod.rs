//! Units of execution.
//!
//! Every kernel thread is a host thread. A thread is given a `Pid` the first
//! time it asks for one, and `Proc` is the handle other threads use to make
//! it runnable again after it parked itself.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::{self, JoinHandle, Thread};

mod wait_channel;

pub use wait_channel::WaitChannel;

/// Process identifier. Never reused within one run.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(i32);

static NEXTPID: AtomicI32 = AtomicI32::new(1);

thread_local! {
    static PID: Cell<Option<Pid>> = Cell::new(None);
}

impl Pid {
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Returns the pid of the calling thread.
pub fn current_pid() -> Pid {
    PID.with(|pid| match pid.get() {
        Some(pid) => pid,
        None => {
            let new = Pid(NEXTPID.fetch_add(1, Ordering::Relaxed));
            pid.set(Some(new));
            new
        }
    })
}

/// A thread that may be parked and made runnable again.
#[derive(Clone)]
pub struct Proc {
    pid: Pid,
    thread: Thread,
}

impl Proc {
    /// Returns the handle of the calling thread.
    pub fn current() -> Self {
        Self {
            pid: current_pid(),
            thread: thread::current(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Makes the process runnable. It does not run until the host schedules it.
    pub fn wakeup(&self) {
        self.thread.unpark();
    }
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proc")
            .field("pid", &self.pid)
            .field("name", &self.thread.name())
            .finish()
    }
}

/// Gives up the processor until some other thread calls `Proc::wakeup` on us.
/// May return spuriously, so callers re-check their condition.
pub fn park() {
    thread::park();
}

/// Starts a long-running kernel thread.
pub fn spawn_kernel_thread<F>(name: &str, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .unwrap_or_else(|e| panic!("spawn_kernel_thread {}: {}", name, e))
}
