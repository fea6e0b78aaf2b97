use std::convert::TryInto;

use crate::fs::FsError;
use crate::io::{BlockStorage, Disk};
use crate::node::Inode;
use crate::{Block, BLOCK_SIZE, INODES_PER_BLOCK, INODE_SIZE, MAX_FILES};

/// Marks the end of the free list (stored on disk as -1).
pub(crate) const FREE_LIST_END: u32 = u32::MAX;

pub(crate) const SUPERBLOCK_INDEX: usize = 0;

/// The first block of the file system storing information critical for mounting
/// the file system and locating free space.
///
/// Free blocks form a singly linked list threaded through the blocks themselves:
/// the first four bytes of a free block hold the number of the next free block.
/// Only the head of that list lives here. The allocator writes it back on
/// every change; blocks popped for a file whose inode never reached the disk
/// are leaked.
#[derive(Debug, PartialEq, Clone)]
pub struct Superblock {
    /// Number of blocks on the volume, including the superblock itself.
    pub total_blocks: u32,
    /// Number of inodes provisioned at format time. This is also the number of
    /// directory slots.
    pub total_inodes: u32,
    /// Head of the free list or [`FREE_LIST_END`].
    pub free_list: u32,
}

/// Block holding inode `inumber` and the byte offset of its record.
pub(crate) fn inode_position(inumber: u16) -> (usize, usize) {
    let inumber = inumber as usize;
    (
        1 + inumber / INODES_PER_BLOCK,
        (inumber % INODES_PER_BLOCK) * INODE_SIZE,
    )
}

/// First block past the inode region for a volume holding `inodes` inodes.
pub(crate) fn first_data_block(inodes: u32) -> u32 {
    let inode_bytes = inodes as usize * INODE_SIZE;
    ((inode_bytes + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32 + 1
}

impl Superblock {
    /// Reads the superblock fields from the leading bytes of block 0. The
    /// encoding is a series of big endian `u32` values.
    pub fn parse(buf: &[u8]) -> Self {
        assert!(buf.len() >= 12, "superblock buffer must hold 12 bytes");
        Self {
            total_blocks: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            total_inodes: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            free_list: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
        }
    }

    /// Serializes the superblock into a zero padded block for writing to disk.
    pub fn serialize(&self) -> Block {
        let mut block = [0; BLOCK_SIZE];
        block[0..4].copy_from_slice(&self.total_blocks.to_be_bytes());
        block[4..8].copy_from_slice(&self.total_inodes.to_be_bytes());
        block[8..12].copy_from_slice(&self.free_list.to_be_bytes());
        block
    }

    pub fn first_data_block(&self) -> u32 {
        first_data_block(self.total_inodes)
    }

    /// Loads the superblock of a mounted device. A volume whose stored geometry
    /// disagrees with the device, or whose free list head points outside the
    /// data region, is considered unformatted and gets formatted with
    /// `default_inodes` inodes. All data on such a volume is lost.
    pub(crate) fn open<T: BlockStorage>(disk: &Disk<T>, default_inodes: u32) -> Result<Self, FsError> {
        let device_blocks = disk.block_count() as u32;
        let mut sb = Superblock::parse(&disk.read(SUPERBLOCK_INDEX)?);
        if !sb.is_consistent(device_blocks) {
            warn!(
                "volume is not formatted (found {:?}), formatting with {} inodes",
                sb, default_inodes
            );
            sb.total_blocks = device_blocks;
            sb.format(disk, default_inodes)?;
        }
        Ok(sb)
    }

    fn is_consistent(&self, device_blocks: u32) -> bool {
        if self.total_blocks != device_blocks || self.total_inodes == 0 {
            return false;
        }
        if self.total_inodes > MAX_FILES || self.first_data_block() > self.total_blocks {
            return false;
        }
        self.free_list == FREE_LIST_END
            || (self.free_list >= self.first_data_block() && self.free_list < self.total_blocks)
    }

    /// Writes `inodes` fresh unused inodes, threads every remaining block into
    /// the free list and persists the result.
    pub(crate) fn format<T: BlockStorage>(&mut self, disk: &Disk<T>, inodes: u32) -> Result<(), FsError> {
        if inodes == 0 || inodes > MAX_FILES {
            return Err(FsError::InvalidArgument(format!(
                "inode count must be between 1 and {}, got {}",
                MAX_FILES, inodes
            )));
        }
        let first_data = first_data_block(inodes);
        if first_data > self.total_blocks {
            return Err(FsError::InvalidArgument(format!(
                "{} inodes do not fit on a volume of {} blocks",
                inodes, self.total_blocks
            )));
        }

        let mut inode_block = [0; BLOCK_SIZE];
        let fresh = Inode::default().encode();
        for record in inode_block.chunks_mut(INODE_SIZE) {
            record.copy_from_slice(&fresh);
        }
        for blocknr in 1..first_data as usize {
            disk.write(blocknr, &inode_block)?;
        }

        for blocknr in first_data..self.total_blocks {
            let next = if blocknr + 1 == self.total_blocks {
                FREE_LIST_END
            } else {
                blocknr + 1
            };
            let mut block = [0; BLOCK_SIZE];
            block[0..4].copy_from_slice(&next.to_be_bytes());
            disk.write(blocknr as usize, &block)?;
        }

        self.total_inodes = inodes;
        self.free_list = if first_data < self.total_blocks {
            first_data
        } else {
            FREE_LIST_END
        };
        info!(
            "formatted {} blocks with {} inodes, data starts at block {}",
            self.total_blocks, inodes, first_data
        );
        self.sync(disk)?;
        Ok(())
    }

    /// Persists the superblock fields to block 0.
    pub(crate) fn sync<T: BlockStorage>(&self, disk: &Disk<T>) -> std::io::Result<()> {
        disk.write(SUPERBLOCK_INDEX, &self.serialize())?;
        debug!("superblock synchronized: {:?}", self);
        Ok(())
    }
}
