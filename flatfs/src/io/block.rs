/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// A fixed array of equally sized blocks that can only be accessed one whole
/// block at a time. Block 0 is reserved for the file system superblock.
///
/// Retry policy for failed transfers, if any, belongs to implementors. The file
/// system treats every error returned here as fatal to the operation in progress.
pub trait BlockStorage: Send {
    /// The total number of blocks on the device, including block 0.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
