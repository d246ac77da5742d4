//! Buffer cache.
//!
//! The buffer cache holds cached copies of disk block contents. Caching disk
//! blocks in memory reduces the number of disk reads and also provides a
//! synchronization point for disk blocks used by multiple threads.
//!
//! Interface:
//! * To get a buffer for a particular disk block, call read.
//! * After changing buffer data, call write to write it to disk.
//! * When done with the buffer, drop it.
//! * Only one thread at a time can use a locked buffer, so do not keep them longer than necessary.
//!
//! A [`BufUnlocked`] is a reference-counted pin: while one exists, its block
//! stays in the cache. A [`Buf`] is a pinned buffer whose sleep lock is held.

use core::mem::ManuallyDrop;
use core::ptr;
use std::fmt;
use std::sync::Arc;

use array_macro::array;

use crate::{
    disk::Disk,
    lock::{Sleeplock, Spinlock},
    param::{BSIZE, NBUF},
};

pub type BufData = [u8; BSIZE];

pub struct BufInner {
    /// Has data been read from disk?
    valid: bool,

    pub data: BufData,
}

#[derive(Clone, Copy)]
struct BufMeta {
    blockno: u32,

    /// Number of `BufUnlocked`s referring to this buffer.
    refcnt: u32,

    /// Time of last release. The least recently used free buffer is recycled first.
    last_used: u64,

    /// Has this buffer ever held a block?
    used: bool,
}

struct BcacheMeta {
    entries: [BufMeta; NBUF],
    ticks: u64,
}

pub struct Bcache {
    disk: Box<dyn Disk>,
    meta: Spinlock<BcacheMeta>,

    /// Lives on the heap; `NBUF` blocks of data are too big to pass around by value.
    bufs: Box<[Sleeplock<BufInner>]>,
}

impl Bcache {
    pub fn new<D: Disk + 'static>(disk: D) -> Arc<Self> {
        Arc::new(Self {
            disk: Box::new(disk),
            meta: Spinlock::new(
                "bcache",
                BcacheMeta {
                    entries: array![_ => BufMeta {
                        blockno: 0,
                        refcnt: 0,
                        last_used: 0,
                        used: false,
                    }; NBUF],
                    ticks: 0,
                },
            ),
            bufs: (0..NBUF)
                .map(|_| {
                    Sleeplock::new(
                        "buffer",
                        BufInner {
                            valid: false,
                            data: [0; BSIZE],
                        },
                    )
                })
                .collect(),
        })
    }

    pub fn disk(&self) -> &dyn Disk {
        &*self.disk
    }

    /// Return an unlocked buf for the indicated block, pinned in the cache.
    pub fn get_buf(self: &Arc<Self>, blockno: u32) -> BufUnlocked {
        let mut meta = self.meta.lock();

        // Is the block already cached?
        if let Some(idx) = meta
            .entries
            .iter()
            .position(|e| e.used && e.blockno == blockno)
        {
            meta.entries[idx].refcnt += 1;
            return BufUnlocked {
                cache: self.clone(),
                idx,
                blockno,
            };
        }

        // Not cached. Recycle the least recently used unpinned buffer.
        let idx = meta
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.refcnt == 0)
            .min_by_key(|(_, e)| (e.used, e.last_used))
            .map(|(idx, _)| idx)
            .expect("bget: no buffers");
        let entry = &mut meta.entries[idx];
        entry.blockno = blockno;
        entry.refcnt = 1;
        entry.used = true;
        // SAFETY: refcnt was 0, so nobody holds or waits for the buffer's lock.
        unsafe { (*self.bufs[idx].get_mut_raw()).valid = false };

        BufUnlocked {
            cache: self.clone(),
            idx,
            blockno,
        }
    }

    /// Return a locked buf with the contents of the indicated block.
    pub fn read(self: &Arc<Self>, blockno: u32) -> Buf {
        self.get_buf(blockno).lock()
    }

    /// Write b's contents to disk. Must be locked.
    pub fn write(&self, b: &mut Buf) {
        assert!(self.bufs[b.inner.idx].holding(), "bwrite");
        self.disk.write(b.blockno(), b.data());
    }

    /// Number of handles pinning `blockno` in the cache.
    pub fn pins(&self, blockno: u32) -> u32 {
        self.meta
            .lock()
            .entries
            .iter()
            .find(|e| e.used && e.blockno == blockno)
            .map_or(0, |e| e.refcnt)
    }

    fn release(&self, idx: usize) {
        let mut meta = self.meta.lock();
        meta.ticks += 1;
        let now = meta.ticks;
        let entry = &mut meta.entries[idx];
        assert!(entry.refcnt > 0, "brelse");
        entry.refcnt -= 1;
        if entry.refcnt == 0 {
            entry.last_used = now;
        }
    }
}

/// A cached block that is pinned but not locked.
pub struct BufUnlocked {
    cache: Arc<Bcache>,
    idx: usize,
    blockno: u32,
}

impl BufUnlocked {
    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    /// Lock the buffer, reading it from disk first if needed.
    pub fn lock(self) -> Buf {
        let lock = &self.cache.bufs[self.idx];
        // Held until `Buf` is unlocked or dropped.
        core::mem::forget(lock.lock());

        // SAFETY: we hold the buffer's lock.
        let inner = unsafe { &mut *lock.get_mut_raw() };
        if !inner.valid {
            self.cache.disk.read(self.blockno, &mut inner.data);
            inner.valid = true;
        }

        Buf { inner: self }
    }
}

impl Drop for BufUnlocked {
    fn drop(&mut self) {
        self.cache.release(self.idx);
    }
}

impl fmt::Debug for BufUnlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufUnlocked")
            .field("blockno", &self.blockno)
            .finish()
    }
}

/// A locked, pinned buffer. Dropping it unlocks and unpins it.
pub struct Buf {
    inner: BufUnlocked,
}

impl Buf {
    pub fn blockno(&self) -> u32 {
        self.inner.blockno
    }

    pub fn data(&self) -> &BufData {
        // SAFETY: we hold the buffer's lock.
        unsafe { &(*self.inner.cache.bufs[self.inner.idx].get_mut_raw()).data }
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        // SAFETY: we hold the buffer's lock.
        unsafe { &mut (*self.inner.cache.bufs[self.inner.idx].get_mut_raw()).data }
    }

    /// Unlock the buffer but keep it pinned.
    pub fn unlock(self) -> BufUnlocked {
        let this = ManuallyDrop::new(self);
        // SAFETY: we acquired the lock in `BufUnlocked::lock` and forgot its guard.
        unsafe { this.inner.cache.bufs[this.inner.idx].unlock() };
        // SAFETY: `this` is never dropped, so `inner` is moved out exactly once.
        unsafe { ptr::read(&this.inner) }
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        // SAFETY: we acquired the lock in `BufUnlocked::lock` and forgot its guard.
        unsafe { self.inner.cache.bufs[self.inner.idx].unlock() };
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("blockno", &self.inner.blockno)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::disk::MemDisk;

    #[test]
    fn read_modify_write() {
        let bcache = Bcache::new(MemDisk::new(8));
        let mut buf = bcache.read(3);
        buf.data_mut()[0] = 42;
        bcache.write(&mut buf);
        drop(buf);

        let mut data = [0; BSIZE];
        bcache.disk().read(3, &mut data);
        assert_eq!(data[0], 42);
    }

    #[test]
    fn pins_are_counted() {
        let bcache = Bcache::new(MemDisk::new(8));
        let buf = bcache.read(5);
        assert_eq!(bcache.pins(5), 1);
        let pinned = buf.unlock();
        assert_eq!(bcache.pins(5), 1);
        let again = bcache.get_buf(5);
        assert_eq!(bcache.pins(5), 2);
        drop(pinned);
        drop(again);
        assert_eq!(bcache.pins(5), 0);
    }

    #[test]
    fn pinned_block_survives_pressure() {
        let bcache = Bcache::new(MemDisk::new(NBUF as u32 * 2));
        let mut buf = bcache.read(0);
        buf.data_mut()[0] = 9;
        // Modified in memory only.
        let pinned = buf.unlock();

        for b in 1..NBUF as u32 * 2 {
            drop(bcache.read(b));
        }

        let buf = pinned.lock();
        assert_eq!(buf.data()[0], 9);
    }

    #[test]
    fn builds_on_a_small_stack() {
        let handle = thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let bcache = Bcache::new(MemDisk::new(8));
                let byte = bcache.read(1).data()[0];
                byte
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    #[should_panic(expected = "no buffers")]
    fn all_pinned_panics() {
        let bcache = Bcache::new(MemDisk::new(NBUF as u32 + 1));
        let _pins = (0..=NBUF as u32)
            .map(|b| bcache.get_buf(b))
            .collect::<Vec<_>>();
    }
}
