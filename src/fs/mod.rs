//! File system layer: a mounted disk with a write-ahead log in front of it.
//!
//! Every update goes through a transaction:
//!
//! ```ignore
//! let tx = fs.begin_tx();
//! let mut buf = tx.read(blockno);
//! buf.data_mut()[0] = 1;
//! tx.write(buf);
//! drop(tx); // commits if this was the last operation in the group
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::{
    bio::{Bcache, Buf},
    checkpoint::Checkpointer,
    disk::{Disk, FileDisk},
    param::BSIZE,
};

mod log;
mod superblock;

pub use self::log::{Log, LogStat};
pub use superblock::{Superblock, FSMAGIC, SBLOCK};

#[derive(Debug, Error)]
pub enum MountError {
    #[error("bad superblock magic {0:#x}")]
    BadMagic(u32),

    #[error("log region of {nlog} blocks is smaller than the {need} needed")]
    LogTooSmall { nlog: u32, need: u32 },

    #[error("file system of {size} blocks does not fit in a disk of {nblocks} blocks")]
    BadLayout { size: u32, nblocks: u32 },

    #[error("cannot open disk image")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MountOptions {
    checkpoint: bool,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install committed transactions from a background checkpoint task
    /// instead of inside the committing `end_op`.
    pub fn checkpoint(mut self, enable: bool) -> Self {
        self.checkpoint = enable;
        self
    }
}

/// Writes an empty file system covering the whole of `disk`.
pub fn format(disk: &dyn Disk) -> Superblock {
    let sb = Superblock::new(disk.nblocks());
    assert!(sb.datastart <= sb.size, "format: disk too small");

    let zeroes = [0; BSIZE];
    for blockno in sb.logstart..sb.logstart + sb.nlog {
        disk.write(blockno, &zeroes);
    }
    sb.write(disk);
    sb
}

pub struct FileSystem {
    superblock: Superblock,
    bcache: Arc<Bcache>,
    log: Arc<Log>,
    checkpointer: Option<Checkpointer>,
}

impl FileSystem {
    /// Reads the super block, recovers from the log, and starts the
    /// checkpoint task if asked to.
    pub fn mount<D: Disk + 'static>(disk: D, options: MountOptions) -> Result<Self, MountError> {
        let bcache = Bcache::new(disk);
        let superblock = Superblock::read(&bcache)?;
        let log = Arc::new(Log::new(
            bcache.clone(),
            superblock.logstart,
            superblock.nlog,
        ));
        let checkpointer = options
            .checkpoint
            .then(|| Checkpointer::start(log.clone()));

        ::log::info!(
            "fs: mounted {} blocks, log at {}, data at {}",
            superblock.size,
            superblock.logstart,
            superblock.datastart
        );
        Ok(Self {
            superblock,
            bcache,
            log,
            checkpointer,
        })
    }

    /// Mounts the disk image at `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: MountOptions) -> Result<Self, MountError> {
        Self::mount(FileDisk::open(path)?, options)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn bcache(&self) -> &Arc<Bcache> {
        &self.bcache
    }

    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    pub fn checkpointing(&self) -> bool {
        self.checkpointer.is_some()
    }

    /// Reads a block outside of any transaction.
    pub fn read(&self, blockno: u32) -> Buf {
        self.bcache.read(blockno)
    }

    /// Starts an operation. It joins the running transaction group and ends
    /// when the returned `Tx` is dropped.
    pub fn begin_tx(&self) -> Tx<'_> {
        self.log.begin_op();
        Tx { fs: self }
    }

    /// Stops the checkpoint task once it has installed everything committed.
    pub fn unmount(mut self) {
        if let Some(checkpointer) = self.checkpointer.take() {
            checkpointer.stop();
        }
        ::log::info!("fs: unmounted");
    }
}

/// An operation in the running transaction group.
pub struct Tx<'s> {
    fs: &'s FileSystem,
}

impl Tx<'_> {
    pub fn read(&self, blockno: u32) -> Buf {
        self.fs.bcache.read(blockno)
    }

    /// Caller has modified `b` and is done with it.
    /// The block reaches the disk when the group commits.
    pub fn write(&self, b: Buf) {
        self.fs.log.log_write(b);
    }

    /// Zero a block.
    pub fn bzero(&self, blockno: u32) {
        let mut buf = self.read(blockno);
        buf.data_mut().fill(0);
        self.write(buf);
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        self.fs.log.end_op();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::param::{FSSIZE, LOGSIZE};

    fn formatted() -> MemDisk {
        let disk = MemDisk::new(FSSIZE);
        format(&disk);
        disk
    }

    #[test]
    fn format_then_mount() {
        let fs = FileSystem::mount(formatted(), MountOptions::new()).unwrap();
        assert_eq!(fs.superblock().size, FSSIZE);
        assert_eq!(fs.superblock().nlog, LOGSIZE as u32 + 1);
        assert!(!fs.checkpointing());
    }

    #[test]
    fn blank_disk_does_not_mount() {
        let err = FileSystem::mount(MemDisk::new(FSSIZE), MountOptions::new())
            .err()
            .unwrap();
        assert!(matches!(err, MountError::BadMagic(0)));
        assert_eq!(err.to_string(), "bad superblock magic 0x0");
    }

    #[test]
    fn tx_commits_on_drop() {
        let fs = FileSystem::mount(formatted(), MountOptions::new()).unwrap();
        let blockno = fs.superblock().datastart;
        {
            let tx = fs.begin_tx();
            let mut buf = tx.read(blockno);
            buf.data_mut()[7] = 7;
            tx.write(buf);
            assert_eq!(fs.log().stat().outstanding, 1);
        }
        let mut data = [0; BSIZE];
        fs.bcache().disk().read(blockno, &mut data);
        assert_eq!(data[7], 7);
        assert_eq!(fs.log().stat().outstanding, 0);
    }

    #[test]
    fn bzero_is_logged() {
        let disk = formatted();
        let blockno = FSSIZE - 1;
        disk.write(blockno, &[0xff; BSIZE]);
        let fs = FileSystem::mount(disk, MountOptions::new()).unwrap();
        fs.begin_tx().bzero(blockno);
        assert_eq!(*fs.read(blockno).data(), [0; BSIZE]);
        let mut data = [0xff; BSIZE];
        fs.bcache().disk().read(blockno, &mut data);
        assert_eq!(data, [0; BSIZE]);
    }

    #[test]
    fn unmount_stops_checkpointer() {
        let fs = FileSystem::mount(formatted(), MountOptions::new().checkpoint(true)).unwrap();
        assert!(fs.checkpointing());
        let log = fs.log().clone();
        fs.begin_tx().bzero(FSSIZE - 1);
        fs.unmount();
        assert_eq!(log.stat().in_use, 0);
    }
}
