//! A single-volume file system with one flat root directory, layered on a
//! fixed-size block device.
//!
//! # Layout
//! ==========================================================
//! | SuperBlock | Inodes (16 per block) | Data / free list |
//! ==========================================================
//!
//! The root directory is itself a file stored through inode 0.
#[macro_use]
extern crate log;

mod alloc;
mod dir;
mod fs;
pub mod io;
mod node;
mod sb;
mod table;

pub use crate::dir::{Directory, NameError};
pub use crate::fs::{FileSystem, FileSystemBuilder, FsError, Whence};
pub use crate::node::{Inode, RegisterError, UsedState};
pub use crate::sb::Superblock;
pub use crate::table::{FileTableEntry, Handle, Mode};

/// Bytes per device block.
pub const BLOCK_SIZE: usize = 512;
/// Bytes per on-disk inode record.
pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
/// Block pointers held directly in an inode.
pub const DIRECT_POINTERS: usize = 11;
/// Block pointers held by one indirect index block (2 bytes each).
pub const INDIRECT_POINTERS: usize = BLOCK_SIZE / 2;
pub const MAX_FILE_SIZE: usize = (DIRECT_POINTERS + INDIRECT_POINTERS) * BLOCK_SIZE;
pub const MAX_NAME_BYTES: usize = 30;
/// Inodes provisioned when a volume is found unformatted at mount.
pub const DEFAULT_INODE_COUNT: u32 = 64;
/// Block pointers are signed 16 bit values on disk.
pub const MAX_BLOCKS: usize = i16::MAX as usize + 1;
/// The serialized directory must fit in a single file.
pub const MAX_FILES: u32 = (MAX_FILE_SIZE / (4 + MAX_NAME_BYTES)) as u32;

/// Name of the root directory, always bound to inode 0.
pub const ROOT: &str = "/";

pub type Block = [u8; BLOCK_SIZE];
