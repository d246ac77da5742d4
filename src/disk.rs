//! Block devices.
//!
//! Block I/O is synchronous: `write` returns once the block is durable.
//! A device that cannot complete a request halts the system by panicking.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::{
    bio::BufData,
    lock::{Sleeplock, Spinlock},
    param::BSIZE,
};

pub trait Disk: Send + Sync {
    /// Reads block `blockno` into `data`.
    fn read(&self, blockno: u32, data: &mut BufData);

    /// Writes `data` to block `blockno`. Durable on return.
    fn write(&self, blockno: u32, data: &BufData);

    /// Size of the device in blocks.
    fn nblocks(&self) -> u32;
}

/// Lets the owner of a shared disk keep a handle after mounting it.
impl<D: Disk + ?Sized> Disk for Arc<D> {
    fn read(&self, blockno: u32, data: &mut BufData) {
        (**self).read(blockno, data)
    }

    fn write(&self, blockno: u32, data: &BufData) {
        (**self).write(blockno, data)
    }

    fn nblocks(&self) -> u32 {
        (**self).nblocks()
    }
}

struct MemDiskInner {
    blocks: Vec<BufData>,

    /// Number of writes that reached the medium.
    writes: usize,

    /// Once `writes` reaches this, the power is gone and writes are dropped.
    budget: Option<usize>,
}

/// A RAM disk. Can simulate a power failure after a given number of writes.
pub struct MemDisk {
    inner: Spinlock<MemDiskInner>,
}

impl MemDisk {
    pub fn new(nblocks: u32) -> Self {
        Self::from_image(vec![[0; BSIZE]; nblocks as usize])
    }

    /// Boots a disk from the blocks that survived on another one.
    pub fn from_image(blocks: Vec<BufData>) -> Self {
        Self {
            inner: Spinlock::new(
                "memdisk",
                MemDiskInner {
                    blocks,
                    writes: 0,
                    budget: None,
                },
            ),
        }
    }

    /// Lets `n` more writes reach the medium and drops every write after them.
    pub fn crash_after(&self, n: usize) {
        let mut inner = self.inner.lock();
        inner.budget = Some(inner.writes + n);
    }

    /// Returns whether the simulated power failure happened.
    pub fn crashed(&self) -> bool {
        let inner = self.inner.lock();
        matches!(inner.budget, Some(budget) if inner.writes >= budget)
    }

    /// Number of writes that reached the medium so far.
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    /// Copy of what is on the medium.
    pub fn image(&self) -> Vec<BufData> {
        self.inner.lock().blocks.clone()
    }

    /// Copy of a single block on the medium.
    pub fn block(&self, blockno: u32) -> BufData {
        self.inner.lock().blocks[blockno as usize]
    }
}

impl Disk for MemDisk {
    fn read(&self, blockno: u32, data: &mut BufData) {
        let inner = self.inner.lock();
        let block = inner
            .blocks
            .get(blockno as usize)
            .unwrap_or_else(|| panic!("memdisk: read of block {} out of range", blockno));
        data.copy_from_slice(block);
    }

    fn write(&self, blockno: u32, data: &BufData) {
        let mut inner = self.inner.lock();
        if matches!(inner.budget, Some(budget) if inner.writes >= budget) {
            return;
        }
        inner.writes += 1;
        let block = inner
            .blocks
            .get_mut(blockno as usize)
            .unwrap_or_else(|| panic!("memdisk: write of block {} out of range", blockno));
        block.copy_from_slice(data);
    }

    fn nblocks(&self) -> u32 {
        self.inner.lock().blocks.len() as u32
    }
}

/// A disk image file.
pub struct FileDisk {
    file: Sleeplock<File>,
    nblocks: u32,
}

impl FileDisk {
    /// Opens an existing image. Its length must be a multiple of `BSIZE`.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % BSIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image size {} is not a multiple of {}", len, BSIZE),
            ));
        }
        Ok(Self {
            file: Sleeplock::new("filedisk", file),
            nblocks: (len / BSIZE as u64) as u32,
        })
    }

    /// Creates a zero-filled image of `nblocks` blocks, replacing any existing file.
    pub fn create<P: AsRef<Path>>(path: P, nblocks: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(nblocks as u64 * BSIZE as u64)?;
        file.sync_all()?;
        Ok(Self {
            file: Sleeplock::new("filedisk", file),
            nblocks,
        })
    }

    fn offset(&self, blockno: u32) -> u64 {
        assert!(blockno < self.nblocks, "filedisk: block {} out of range", blockno);
        blockno as u64 * BSIZE as u64
    }
}

impl Disk for FileDisk {
    fn read(&self, blockno: u32, data: &mut BufData) {
        let offset = self.offset(blockno);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(data))
            .unwrap_or_else(|e| panic!("filedisk: read of block {}: {}", blockno, e));
    }

    fn write(&self, blockno: u32, data: &BufData) {
        let offset = self.offset(blockno);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data))
            .and_then(|_| file.sync_data())
            .unwrap_or_else(|e| panic!("filedisk: write of block {}: {}", blockno, e));
    }

    fn nblocks(&self) -> u32 {
        self.nblocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_past_budget_are_lost() {
        let disk = MemDisk::new(4);
        disk.write(0, &[1; BSIZE]);
        disk.crash_after(1);
        disk.write(1, &[2; BSIZE]);
        assert!(disk.crashed());
        disk.write(2, &[3; BSIZE]);

        assert_eq!(disk.block(0), [1; BSIZE]);
        assert_eq!(disk.block(1), [2; BSIZE]);
        assert_eq!(disk.block(2), [0; BSIZE]);
        assert_eq!(disk.writes(), 2);
    }

    #[test]
    fn image_boots_another_disk() {
        let disk = MemDisk::new(2);
        disk.write(1, &[7; BSIZE]);
        let rebooted = MemDisk::from_image(disk.image());
        let mut data = [0; BSIZE];
        rebooted.read(1, &mut data);
        assert_eq!(data, [7; BSIZE]);
        assert_eq!(rebooted.nblocks(), 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn read_out_of_range_panics() {
        let disk = MemDisk::new(1);
        let mut data = [0; BSIZE];
        disk.read(1, &mut data);
    }
}
