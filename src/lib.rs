//! A crash-consistent write-ahead log for a block device.
//!
//! File system operations group their block updates into transactions with
//! [`Log::begin_op`] and [`Log::end_op`] (or [`FileSystem::begin_tx`]). The
//! last operation of a group to end commits the whole group: its blocks are
//! written to the log region, the log header is written, and only then are
//! the blocks copied to their home locations. After a crash,
//! [`Log::recover_from_log`] replays whatever the header says was committed.
//!
//! Copying committed blocks home can be left to a background [`Checkpointer`].

#![warn(rust_2018_idioms, unsafe_op_in_unsafe_fn)]

pub mod bio;
pub mod checkpoint;
pub mod disk;
pub mod fs;
pub mod lock;
pub mod param;
pub mod proc;

pub use checkpoint::Checkpointer;
pub use disk::{Disk, FileDisk, MemDisk};
pub use fs::{format, FileSystem, Log, LogStat, MountError, MountOptions, Tx};
