//! Checkpoint task.
//!
//! With a checkpointer running, commit only makes a transaction group durable
//! in the log and then hands the installation of its slots to a background
//! thread. Slots stay occupied until the checkpointer has copied them home and
//! erased them from the on-disk header, so `begin_op` may have to wait for it.
//!
//! Stopping the checkpointer installs everything committed before it exits.
//! Commits that happen after that install their slots themselves.

use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info};
use scopeguard::ScopeGuard;

use crate::{fs::Log, lock::Sleepablelock, proc};

/// State shared by commit and the checkpoint task.
pub(crate) struct Handoff {
    /// Is a checkpoint task accepting work?
    running: bool,

    /// Has a commit left slots for the task to install?
    pending: bool,

    /// Should the task exit once nothing is pending?
    stop: bool,
}

impl Handoff {
    pub(crate) const fn new() -> Self {
        Self {
            running: false,
            pending: false,
            stop: false,
        }
    }
}

impl Sleepablelock<Handoff> {
    /// Passes freshly committed slots to the checkpoint task.
    /// Returns false if no task is running; the caller must install them itself.
    pub(crate) fn hand_off(&self) -> bool {
        let mut guard = self.lock();
        if !guard.running {
            return false;
        }
        guard.pending = true;
        guard.wakeup();
        true
    }
}

/// Handle to a running checkpoint task. Dropping it stops the task.
pub struct Checkpointer {
    log: Arc<Log>,
    thread: Option<JoinHandle<()>>,
}

impl Checkpointer {
    /// Starts a checkpoint task for `log`.
    ///
    /// # Panics
    ///
    /// Panics if `log` already has one.
    pub fn start(log: Arc<Log>) -> Self {
        {
            let mut guard = log.handoff().lock();
            assert!(!guard.running, "checkpointer already running");
            guard.running = true;
            guard.pending = false;
            guard.stop = false;
        }

        // Hand commits back to their committers if the thread never starts.
        let running = scopeguard::guard(&log, |log| log.handoff().lock().running = false);
        let thread = proc::spawn_kernel_thread("checkpoint", {
            let log = log.clone();
            move || run(&log)
        });
        ScopeGuard::into_inner(running);

        info!("checkpoint: started");
        Self {
            log,
            thread: Some(thread),
        }
    }

    /// Stops the task after it installed every committed slot.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return,
        };
        {
            let mut guard = self.log.handoff().lock();
            guard.stop = true;
            guard.wakeup();
        }
        if let Err(e) = thread.join() {
            if !thread::panicking() {
                panic::resume_unwind(e);
            }
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(log: &Log) {
    loop {
        {
            let mut guard = log.handoff().lock();
            while !guard.pending && !guard.stop {
                guard.sleep();
            }
            if !guard.pending {
                // Later commits install their own slots.
                guard.running = false;
                break;
            }
            guard.pending = false;
        }
        debug!("checkpoint: installing");
        log.install_trans();
    }
    info!("checkpoint: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::Bcache;
    use crate::disk::MemDisk;
    use crate::param::{BSIZE, FSSIZE, LOGSIZE};

    fn new_log() -> (Arc<Bcache>, Arc<Log>) {
        let bcache = Bcache::new(MemDisk::new(FSSIZE));
        let log = Arc::new(Log::new(bcache.clone(), 2, LOGSIZE as u32 + 1));
        (bcache, log)
    }

    fn commit_one(bcache: &Arc<Bcache>, log: &Log, blockno: u32, byte: u8) {
        log.begin_op();
        let mut buf = bcache.read(blockno);
        buf.data_mut().fill(byte);
        log.log_write(buf);
        log.end_op();
    }

    #[test]
    fn stop_drains() {
        let (bcache, log) = new_log();
        let ckpt = Checkpointer::start(log.clone());
        for b in 0..5 {
            commit_one(&bcache, &log, 100 + b, b as u8 + 1);
        }
        ckpt.stop();

        assert_eq!(log.stat().in_use, 0);
        for b in 0..5 {
            let mut data = [0; BSIZE];
            bcache.disk().read(100 + b, &mut data);
            assert_eq!(data, [b as u8 + 1; BSIZE]);
        }
    }

    #[test]
    fn commits_after_stop_install_inline() {
        let (bcache, log) = new_log();
        drop(Checkpointer::start(log.clone()));
        commit_one(&bcache, &log, 50, 9);
        assert_eq!(log.stat().in_use, 0);
    }

    #[test]
    fn restart_after_stop() {
        let (_bcache, log) = new_log();
        Checkpointer::start(log.clone()).stop();
        Checkpointer::start(log).stop();
    }

    #[test]
    #[should_panic(expected = "checkpointer already running")]
    fn second_checkpointer_panics() {
        let (_bcache, log) = new_log();
        let _first = Checkpointer::start(log.clone());
        let _second = Checkpointer::start(log);
    }
}
