use core::mem;
use std::sync::Arc;

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use super::MountError;
use crate::{
    bio::Bcache,
    disk::Disk,
    param::{BSIZE, LOGSIZE},
};

pub const FSMAGIC: u32 = 0x10203040;

/// Block number of the super block. Block 0 is the boot block.
pub const SBLOCK: u32 = 1;

/// Disk layout:
/// [ boot block | super block | log | data blocks ]
///
/// `format` computes the super block and builds an initial file system. The
/// super block describes the disk layout:
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct Superblock {
    /// Must be FSMAGIC
    magic: u32,

    /// Size of file system image (blocks)
    pub size: u32,

    /// Number of log blocks, header included
    pub nlog: u32,

    /// Block number of first log block
    pub logstart: u32,

    /// Block number of first data block
    pub datastart: u32,
}

const_assert!(mem::size_of::<Superblock>() <= BSIZE);

impl Superblock {
    /// Lays out a file system of `size` blocks with a log just big enough for `LOGSIZE` slots.
    pub const fn new(size: u32) -> Self {
        let logstart = SBLOCK + 1;
        let nlog = LOGSIZE as u32 + 1;
        Self {
            magic: FSMAGIC,
            size,
            nlog,
            logstart,
            datastart: logstart + nlog,
        }
    }

    /// Read the super block.
    pub fn read(bcache: &Arc<Bcache>) -> Result<Self, MountError> {
        let buf = bcache.read(SBLOCK);
        let mut sb = Self::default();
        sb.as_bytes_mut()
            .copy_from_slice(&buf.data()[..mem::size_of::<Self>()]);
        drop(buf);

        if sb.magic != FSMAGIC {
            return Err(MountError::BadMagic(sb.magic));
        }
        if (sb.nlog as usize) < LOGSIZE + 1 {
            return Err(MountError::LogTooSmall {
                nlog: sb.nlog,
                need: LOGSIZE as u32 + 1,
            });
        }
        let nblocks = bcache.disk().nblocks();
        let log_fits = sb.logstart > SBLOCK
            && matches!(sb.logstart.checked_add(sb.nlog), Some(end) if end <= sb.datastart);
        if sb.size > nblocks || sb.datastart > sb.size || !log_fits {
            return Err(MountError::BadLayout {
                size: sb.size,
                nblocks,
            });
        }
        Ok(sb)
    }

    /// Write the super block straight to the disk, bypassing any cache.
    pub fn write(&self, disk: &dyn Disk) {
        let mut data = [0; BSIZE];
        data[..mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
        disk.write(SBLOCK, &data);
    }
}
