//! Simple logging that allows concurrent FS system calls.
//!
//! A log transaction contains the updates of multiple FS system
//! calls. The logging system only commits when there are
//! no FS system calls active. Thus there is never
//! any reasoning required about whether a commit might
//! write an uncommitted system call's updates to disk.
//!
//! A system call should call begin_op()/end_op() to mark
//! its start and end. Usually begin_op() just increments
//! the count of in-progress FS system calls and returns.
//! But if it thinks the log is close to running out, it
//! sleeps until the last outstanding end_op() commits.
//!
//! The log is a physical re-do log containing disk blocks.
//! The on-disk log format:
//!   header block, containing a bitmap of occupied slots and
//!     the home block # staged in each slot
//!   slot 0
//!   slot 1
//!   ...
//! Log appends are synchronous.
//!
//! Installing committed slots to their home locations may be left to the
//! checkpoint task. Until a slot is installed and erased from the on-disk
//! header it stays occupied, so a later transaction group cannot reuse it.

use core::mem;
use std::sync::Arc;

use array_macro::array;
use arrayvec::ArrayVec;
use bitmaps::Bitmap;
use itertools::Itertools;
use log::{debug, info, trace};
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::{
    bio::{Bcache, Buf, BufUnlocked},
    checkpoint::Handoff,
    lock::{Sleepablelock, Sleeplock},
    param::{BSIZE, LOGSIZE, MAXOPBLOCKS},
};

const HEADER_PAD: usize = (4 - LOGSIZE % 4) % 4;

/// Contents of the header block, used for the on-disk header block.
#[repr(C)]
#[derive(AsBytes, FromBytes)]
struct LogHeader {
    /// Home block # of each slot. Meaningful only where `bitmap` is set.
    block: [u32; LOGSIZE],

    /// Nonzero if the slot holds a committed block.
    bitmap: [u8; LOGSIZE],

    _pad: [u8; HEADER_PAD],
}

const_assert!(mem::size_of::<LogHeader>() <= BSIZE);

impl LogHeader {
    fn empty() -> Self {
        Self {
            block: [0; LOGSIZE],
            bitmap: [0; LOGSIZE],
            _pad: [0; HEADER_PAD],
        }
    }

    fn from_slots<I: IntoIterator<Item = (usize, u32)>>(slots: I) -> Self {
        let mut lh = Self::empty();
        for (tail, blockno) in slots {
            lh.block[tail] = blockno;
            lh.bitmap[tail] = 1;
        }
        lh
    }

    fn slots(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        (0..LOGSIZE)
            .filter(move |&tail| self.bitmap[tail] != 0)
            .map(move |tail| (tail, self.block[tail]))
    }
}

type Slots = ArrayVec<(usize, u32), LOGSIZE>;

struct LogState {
    /// How many FS sys calls are executing?
    outstanding: usize,

    /// In commit(), please wait.
    committing: bool,

    /// Home block # staged in each slot. Meaningful only where `bitmap` is set.
    block: [u32; LOGSIZE],

    /// Occupied slots.
    bitmap: Bitmap<LOGSIZE>,

    /// Slots durably in the log and waiting to be installed.
    commit_bitmap: Bitmap<LOGSIZE>,

    /// Pins the home block of each occupied slot in the cache until it is installed.
    /// Slots loaded by recovery have none.
    diskbuf: [Option<BufUnlocked>; LOGSIZE],
}

impl LogState {
    fn new() -> Self {
        Self {
            outstanding: 0,
            committing: false,
            block: [0; LOGSIZE],
            bitmap: Bitmap::new(),
            commit_bitmap: Bitmap::new(),
            diskbuf: array![_ => None; LOGSIZE],
        }
    }

    /// The slot staging `blockno` for the running transaction group, if any.
    fn staged_slot(&self, blockno: u32) -> Option<usize> {
        (0..LOGSIZE).find(|&tail| {
            self.bitmap.get(tail) && !self.commit_bitmap.get(tail) && self.block[tail] == blockno
        })
    }

    /// Slots written by the running transaction group but not committed yet.
    fn staged_slots(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        (0..LOGSIZE)
            .filter(move |&tail| self.bitmap.get(tail) && !self.commit_bitmap.get(tail))
            .map(move |tail| (tail, self.block[tail]))
    }

    /// Committed slots waiting to be installed.
    fn pending_slots(&self) -> impl Iterator<Item = (usize, u32)> + Clone + '_ {
        (0..LOGSIZE)
            .filter(move |&tail| self.commit_bitmap.get(tail))
            .map(move |tail| (tail, self.block[tail]))
    }
}

/// Snapshot of the log's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogStat {
    /// Operations between `begin_op` and `end_op`.
    pub outstanding: usize,

    /// Is a commit in flight?
    pub committing: bool,

    /// Occupied slots, committed or not.
    pub in_use: usize,

    /// Committed slots not installed yet.
    pub pending: usize,
}

pub struct Log {
    bcache: Arc<Bcache>,

    /// Block # of the header block.
    start: u32,

    state: Sleepablelock<LogState>,

    /// Held while deciding and writing the on-disk header, so that header
    /// writes reach the disk in the order they were decided.
    head: Sleeplock<()>,

    /// Held by whoever is installing committed slots.
    install: Sleeplock<()>,

    /// Commit hands installation off to the checkpoint task through this.
    handoff: Sleepablelock<Handoff>,
}

impl Log {
    /// Opens the log region of `size` blocks at `start` and recovers from it.
    pub fn new(bcache: Arc<Bcache>, start: u32, size: u32) -> Self {
        assert!(size as usize > LOGSIZE, "initlog: too small log region");

        let log = Self {
            bcache,
            start,
            state: Sleepablelock::new("log", LogState::new()),
            head: Sleeplock::new("log header", ()),
            install: Sleeplock::new("log install", ()),
            handoff: Sleepablelock::new("checkpoint", Handoff::new()),
        };
        log.recover_from_log();
        log
    }

    /// Block # of the header block. Slot `i` lives at `start() + 1 + i`.
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn stat(&self) -> LogStat {
        let state = self.state.lock();
        LogStat {
            outstanding: state.outstanding,
            committing: state.committing,
            in_use: state.bitmap.len(),
            pending: state.commit_bitmap.len(),
        }
    }

    pub(crate) fn handoff(&self) -> &Sleepablelock<Handoff> {
        &self.handoff
    }

    fn slot_blockno(&self, tail: usize) -> u32 {
        self.start + tail as u32 + 1
    }

    /// Copy one committed slot from the log to its home location.
    fn install_block(&self, tail: usize, blockno: u32) {
        // Read log block.
        let lbuf = self.bcache.read(self.slot_blockno(tail));

        // Read dst.
        let mut dbuf = self.bcache.read(blockno);

        // With dst locked nobody can stage it, so this tells whether the
        // cached copy already carries a later group's uncommitted changes.
        let newer = self.state.lock().staged_slot(blockno).is_some();
        if newer {
            // Put the committed image on disk, keep the newer one in memory.
            let cached = *dbuf.data();
            dbuf.data_mut().copy_from_slice(lbuf.data());
            self.bcache.write(&mut dbuf);
            *dbuf.data_mut() = cached;
        } else {
            // Copy block to dst, then write dst to disk.
            dbuf.data_mut().copy_from_slice(lbuf.data());
            self.bcache.write(&mut dbuf);
        }
    }

    /// Copy committed blocks from log to their home location, then erase
    /// them from the header and free their slots. Repeats until nothing
    /// committed is left.
    pub(crate) fn install_trans(&self) {
        let _install = self.install.lock();

        loop {
            let pending = self.state.lock().pending_slots().collect::<Slots>();
            if pending.is_empty() {
                break;
            }

            for &(tail, blockno) in &pending {
                self.install_block(tail, blockno);
            }

            // The slots must leave the on-disk header before they can be
            // reused; otherwise recovery could install a later group's
            // half-written log block.
            let head = self.head.lock();
            let lh = {
                let state = self.state.lock();
                LogHeader::from_slots(
                    state
                        .pending_slots()
                        .filter(|(tail, _)| !pending.iter().any(|(t, _)| t == tail)),
                )
            };
            self.write_head(&lh);

            let unpinned = {
                let mut state = self.state.lock();
                let unpinned = pending
                    .iter()
                    .filter_map(|&(tail, _)| {
                        state.bitmap.set(tail, false);
                        state.commit_bitmap.set(tail, false);
                        state.diskbuf[tail].take()
                    })
                    .collect::<ArrayVec<_, LOGSIZE>>();
                // begin_op() may be waiting for log space.
                state.wakeup();
                unpinned
            };
            drop(head);
            drop(unpinned);

            debug!("log: installed {} blocks", pending.len());
        }
    }

    /// Read the log header from disk.
    fn read_head(&self) -> LogHeader {
        let buf = self.bcache.read(self.start);
        let mut lh = LogHeader::empty();
        lh.as_bytes_mut()
            .copy_from_slice(&buf.data()[..mem::size_of::<LogHeader>()]);
        lh
    }

    /// Write `lh` to the header block. Writing a header that lists new slots
    /// is the true point at which the current transaction commits.
    fn write_head(&self, lh: &LogHeader) {
        assert!(self.head.holding(), "write_head");
        let mut buf = self.bcache.read(self.start);
        buf.data_mut()[..mem::size_of::<LogHeader>()].copy_from_slice(lh.as_bytes());
        self.bcache.write(&mut buf);
    }

    /// Installs whatever the on-disk header says is committed, then clears
    /// the header. Must run before any transaction is admitted.
    pub fn recover_from_log(&self) {
        let lh = self.read_head();
        let nblocks = self.bcache.disk().nblocks();

        let n = {
            let mut state = self.state.lock();
            assert!(
                state.outstanding == 0 && state.bitmap.is_empty(),
                "recover_from_log: log in use"
            );
            for (tail, blockno) in lh.slots() {
                assert!(
                    blockno < nblocks,
                    "recover_from_log: slot {} names block {}",
                    tail,
                    blockno
                );
                state.block[tail] = blockno;
                state.bitmap.set(tail, true);
                state.commit_bitmap.set(tail, true);
            }
            state.bitmap.len()
        };
        if n > 0 {
            info!("log: recovering {} committed blocks", n);
        }

        // If committed, copy from log to disk.
        self.install_trans();

        // Clear the log.
        let _head = self.head.lock();
        self.write_head(&LogHeader::empty());
    }

    /// Copy modified blocks from cache to log. Returns the slots written.
    fn write_log(&self) -> Slots {
        let staged = self.state.lock().staged_slots().collect::<Slots>();

        for &(tail, blockno) in &staged {
            // Log block.
            let mut to = self.bcache.read(self.slot_blockno(tail));

            // Cache block.
            let from = self.bcache.read(blockno);

            to.data_mut().copy_from_slice(from.data());

            // Write the log.
            self.bcache.write(&mut to);
        }
        staged
    }

    fn commit(&self) {
        // Write modified blocks from cache to log.
        let staged = self.write_log();
        if staged.is_empty() {
            return;
        }

        // If an older committed image of a staged block is still waiting,
        // install it first so recovery never sees two images of one block.
        let restaged = {
            let state = self.state.lock();
            let restaged = staged
                .iter()
                .cartesian_product(state.pending_slots())
                .any(|(&(_, b), (_, p))| b == p);
            restaged
        };
        if restaged {
            self.install_trans();
        }

        // Write header to disk -- the real commit.
        let head = self.head.lock();
        let lh = {
            let state = self.state.lock();
            LogHeader::from_slots(state.pending_slots().chain(staged.iter().copied()))
        };
        self.write_head(&lh);
        {
            let mut state = self.state.lock();
            for &(tail, _) in &staged {
                state.commit_bitmap.set(tail, true);
            }
        }
        drop(head);
        debug!("log: committed {} blocks", staged.len());

        // Now install writes to home locations, here or in the checkpoint task.
        if !self.handoff.hand_off() {
            self.install_trans();
        }
    }

    /// Called at the start of each FS system call.
    pub fn begin_op(&self) {
        let mut guard = self.state.lock();
        loop {
            if guard.committing ||
                // This op might exhaust log space; wait for commit or checkpoint.
                guard.bitmap.len() + (guard.outstanding + 1) * MAXOPBLOCKS > LOGSIZE
            {
                guard.sleep();
            } else {
                guard.outstanding += 1;
                break;
            }
        }
    }

    /// Called at the end of each FS system call.
    /// Commits if this was the last outstanding operation.
    pub fn end_op(&self) {
        let mut guard = self.state.lock();
        assert!(guard.outstanding >= 1, "end_op outside of trans");
        guard.outstanding -= 1;
        assert!(!guard.committing, "log.committing");

        if guard.outstanding == 0 {
            // Since outstanding is 0, no ongoing transaction exists.
            // The lock is still held, so new transactions cannot start.
            guard.committing = true;
            // Committing is true, so new transactions cannot start even after releasing the lock.

            // Call commit w/o holding the lock, since commit sleeps on disk I/O.
            guard.reacquire_after(|| self.commit());

            guard.committing = false;
        }

        // begin_op() may be waiting for log space, and decrementing outstanding has decreased
        // the amount of reserved space.
        guard.wakeup();
    }

    /// Caller has modified b.data and is done with the buffer.
    /// Record the block # and keep the block pinned in the cache.
    /// commit()/write_log() will do the disk write.
    ///
    /// log_write() replaces Bcache::write(); a typical use is:
    ///   bp = bcache.read(...)
    ///   modify bp.data_mut()
    ///   log.log_write(bp)
    pub fn log_write(&self, b: Buf) {
        let blockno = b.blockno();
        let mut state = self.state.lock();
        assert!(state.outstanding >= 1, "log_write outside of trans");

        // Log absorption.
        if let Some(tail) = state.staged_slot(blockno) {
            drop(state);
            trace!("log: block {} absorbed into slot {}", blockno, tail);
            return;
        }

        let tail = (0..LOGSIZE)
            .find(|&tail| !state.bitmap.get(tail))
            .unwrap_or_else(|| panic!("too big a transaction"));
        assert!(
            !state.commit_bitmap.get(tail),
            "log_write: slot {} is committing",
            tail
        );
        state.bitmap.set(tail, true);
        state.block[tail] = blockno;
        state.diskbuf[tail] = Some(b.unlock());
        drop(state);
        trace!("log: block {} staged in slot {}", blockno, tail);
    }
}
