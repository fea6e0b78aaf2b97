use std::io::{Error, ErrorKind, Result};
use std::sync::{Mutex, MutexGuard};

use crate::io::{BlockNumber, BlockStorage};
use crate::{Block, BLOCK_SIZE};

/// Shares one block device between every component of a mounted volume.
///
/// Each call holds the device lock for exactly one transfer, except
/// [`Disk::modify`] which holds it across the read and the write back.
pub(crate) struct Disk<T: BlockStorage> {
    dev: Mutex<T>,
    block_count: usize,
}

impl<T: BlockStorage> Disk<T> {
    pub fn new(dev: T) -> Self {
        let block_count = dev.block_count();
        Self {
            dev: Mutex::new(dev),
            block_count,
        }
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn read(&self, blocknr: BlockNumber) -> Result<Block> {
        let mut block = [0; BLOCK_SIZE];
        self.lock()?.read_block(blocknr, &mut block)?;
        Ok(block)
    }

    pub fn write(&self, blocknr: BlockNumber, block: &Block) -> Result<()> {
        self.lock()?.write_block(blocknr, block)
    }

    /// Reads a block, hands it to `f` and writes it back without releasing the
    /// device in between.
    pub fn modify<R>(&self, blocknr: BlockNumber, f: impl FnOnce(&mut Block) -> R) -> Result<R> {
        let mut dev = self.lock()?;
        let mut block = [0; BLOCK_SIZE];
        dev.read_block(blocknr, &mut block)?;
        let out = f(&mut block);
        dev.write_block(blocknr, &block)?;
        Ok(out)
    }

    pub fn sync(&self) -> Result<()> {
        self.lock()?.sync_disk()
    }

    fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.dev
            .lock()
            .map_err(|_| Error::new(ErrorKind::Other, "block device lock poisoned"))
    }
}
