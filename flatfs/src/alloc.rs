use std::convert::TryInto;

use crate::fs::FsError;
use crate::io::{BlockStorage, Disk};
use crate::sb::{Superblock, FREE_LIST_END, SUPERBLOCK_INDEX};
use crate::BLOCK_SIZE;

fn next_link(block: &[u8]) -> u32 {
    u32::from_be_bytes(block[0..4].try_into().unwrap())
}

/// Allocation policy: the free list is a stack. Released blocks are pushed on
/// the head and are the first to be handed out again.
impl Superblock {
    /// Pops the head of the free list. Returns `None` when the disk is full.
    ///
    /// The popped block is zeroed before it is handed out.
    pub(crate) fn allocate_block<T: BlockStorage>(
        &mut self,
        disk: &Disk<T>,
    ) -> Result<Option<u16>, FsError> {
        if self.free_list == FREE_LIST_END {
            debug!("free list exhausted");
            return Ok(None);
        }
        let blocknr = self.free_list;
        let next = next_link(&disk.read(blocknr as usize)?);
        if next != FREE_LIST_END && !self.is_data_block(next) {
            return Err(FsError::CorruptFreeList(next));
        }
        self.free_list = next;
        self.persist_head(disk)?;
        disk.write(blocknr as usize, &[0; BLOCK_SIZE])?;
        trace!("allocated block {}", blocknr);
        Ok(Some(blocknr as u16))
    }

    /// Pushes `blocknr` on the head of the free list. Block numbers outside
    /// the data region are rejected.
    pub(crate) fn release_block<T: BlockStorage>(
        &mut self,
        disk: &Disk<T>,
        blocknr: u16,
    ) -> Result<bool, FsError> {
        if !self.is_data_block(blocknr as u32) {
            warn!("refusing to release block {} outside the data region", blocknr);
            return Ok(false);
        }
        let mut block = [0; BLOCK_SIZE];
        block[0..4].copy_from_slice(&self.free_list.to_be_bytes());
        disk.write(blocknr as usize, &block)?;
        self.free_list = blocknr as u32;
        self.persist_head(disk)?;
        trace!("released block {}", blocknr);
        Ok(true)
    }

    /// Writes the superblock after every push and pop, so a block handed out
    /// before a crash is at worst leaked and never handed out again.
    fn persist_head<T: BlockStorage>(&self, disk: &Disk<T>) -> std::io::Result<()> {
        disk.write(SUPERBLOCK_INDEX, &self.serialize())
    }

    pub(crate) fn is_data_block(&self, blocknr: u32) -> bool {
        blocknr >= self.first_data_block() && blocknr < self.total_blocks
    }

    /// Walks the free list from its head without modifying it.
    pub(crate) fn free_blocks<'a, T: BlockStorage>(&self, disk: &'a Disk<T>) -> FreeBlocks<'a, T> {
        FreeBlocks {
            disk,
            next: self.free_list,
            first_data: self.first_data_block(),
            total_blocks: self.total_blocks,
            budget: self.total_blocks,
        }
    }
}

/// Iterator over the free list. A link leaving the data region, or a list
/// longer than the volume (a cycle), yields [`FsError::CorruptFreeList`] and
/// ends the walk.
pub(crate) struct FreeBlocks<'a, T: BlockStorage> {
    disk: &'a Disk<T>,
    next: u32,
    first_data: u32,
    total_blocks: u32,
    /// Upper bound on the number of links left to follow.
    budget: u32,
}

impl<'a, T: BlockStorage> Iterator for FreeBlocks<'a, T> {
    type Item = Result<u16, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == FREE_LIST_END {
            return None;
        }
        let current = self.next;
        if current < self.first_data || current >= self.total_blocks || self.budget == 0 {
            self.next = FREE_LIST_END;
            return Some(Err(FsError::CorruptFreeList(current)));
        }
        self.budget -= 1;
        match self.disk.read(current as usize) {
            Ok(block) => {
                self.next = next_link(&block);
                Some(Ok(current as u16))
            }
            Err(e) => {
                self.next = FREE_LIST_END;
                Some(Err(e.into()))
            }
        }
    }
}
