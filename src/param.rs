/// maximum number of threads that may queue on a single lock
pub const NPROC: usize = 64;

/// block size
pub const BSIZE: usize = 1024;

/// max # of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;

/// max data blocks in on-disk log
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 6;

/// size of file system in blocks
pub const FSSIZE: u32 = 1000;
