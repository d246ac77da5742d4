#![allow(dead_code)]

use std::sync::{Condvar, Mutex, PoisonError};

use ckptlog::bio::BufData;
use ckptlog::param::FSSIZE;
use ckptlog::{format, Disk, MemDisk};

/// A formatted RAM disk of `FSSIZE` blocks.
pub fn formatted() -> MemDisk {
    let disk = MemDisk::new(FSSIZE);
    format(&disk);
    disk
}

/// A disk whose writes to data blocks wait until the gate is opened.
/// Log and super block writes go through.
pub struct GatedDisk {
    pub inner: MemDisk,
    datastart: u32,
    open: Mutex<bool>,
    cond: Condvar,
}

impl GatedDisk {
    pub fn new(inner: MemDisk, datastart: u32) -> Self {
        Self {
            inner,
            datastart,
            open: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }
}

impl Disk for GatedDisk {
    fn read(&self, blockno: u32, data: &mut BufData) {
        self.inner.read(blockno, data);
    }

    fn write(&self, blockno: u32, data: &BufData) {
        if blockno >= self.datastart {
            let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            drop(
                self.cond
                    .wait_while(open, |open| !*open)
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
        self.inner.write(blockno, data);
    }

    fn nblocks(&self) -> u32 {
        self.inner.nblocks()
    }
}
