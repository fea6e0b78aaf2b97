use crate::io::{BlockNumber, BlockStorage};
use crate::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Opens an existing disk image without touching its contents. The image
    /// must already be at least `nblocks` blocks long.
    pub fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize) -> std::io::Result<Self> {
        // Return error if the file does not exist rather than create one.
        let fd = OpenOptions::new().read(true).write(true).open(dest)?;
        let len = fd.metadata()?.len();
        if len < (nblocks * BLOCK_SIZE) as u64 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "disk image is smaller than the requested block count",
            ));
        }
        Ok(FileBlockEmulator {
            fd,
            block_count: nblocks,
        })
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber, buf_len: usize) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }
        if buf_len < BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space for a block",
            ));
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr, buf.len())?;
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        // Limit the read to just the block specified.
        self.fd.read_exact(&mut buf[..BLOCK_SIZE])
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr, buf.len())?;
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        self.fd.write_all(&buf[..BLOCK_SIZE])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            // A better default here might be the size of the file rounded down
            // to the nearest block.
            block_count: 0,
            clear_medium: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether to zero the medium on build. Defaults to true; turn it off to
    /// reattach a device to an already initialized image.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and does
    /// destructive things to prepare the file for use. Additionally, ownership
    /// of the file is transfered to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block count must be greater than zero",
            ));
        }
        if self.clear_medium {
            self.zero_blocks()?;
        } else if self.fd.metadata()?.len() < (self.block_count * BLOCK_SIZE) as u64 {
            self.fd.set_len((self.block_count * BLOCK_SIZE) as u64)?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive writes.
        let zeroes = [0x00; BLOCK_SIZE];
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(blocks: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let mut disk_emu = emulator(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(
            disk_emu.into_file().metadata().unwrap().len(),
            4 * BLOCK_SIZE as u64
        );
    }

    #[test]
    fn can_read_and_write_blocks() {
        let mut disk_emu = emulator(4);

        // Allocate a block with a non-zero character.
        let block = vec![0x55; BLOCK_SIZE];
        disk_emu.write_block(2, &block).unwrap();
        disk_emu.sync_disk().unwrap();

        let mut read_block = vec![0x00; BLOCK_SIZE];
        // Read a different block.
        disk_emu.read_block(3, &mut read_block).unwrap();
        assert_eq!(read_block, vec![0x00; BLOCK_SIZE]);

        // Read the block with data.
        let mut filled_block = vec![0x00; BLOCK_SIZE];
        disk_emu.read_block(2, &mut filled_block).unwrap();
        assert_eq!(filled_block, vec![0x55; BLOCK_SIZE]);
    }

    #[test]
    fn can_read_and_write_start_and_end_blocks() {
        let mut disk_emu = emulator(2);

        disk_emu.write_block(0, &[0x55; BLOCK_SIZE]).unwrap();
        disk_emu.write_block(1, &[0x66; BLOCK_SIZE]).unwrap();

        let mut read_block = [0x00; BLOCK_SIZE];
        disk_emu.read_block(0, &mut read_block).unwrap();
        assert_eq!(read_block, [0x55; BLOCK_SIZE]);
        disk_emu.read_block(1, &mut read_block).unwrap();
        assert_eq!(read_block, [0x66; BLOCK_SIZE]);
    }

    #[test]
    fn access_beyond_range_returns_error() {
        let mut disk_emu = emulator(1);

        let err = disk_emu.write_block(1, &[0x55; BLOCK_SIZE]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let mut buf = [0; BLOCK_SIZE];
        assert!(disk_emu.read_block(1, &mut buf).is_err());
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut disk_emu = emulator(1);

        let err = disk_emu.write_block(0, &[0x55; 256]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn reattaching_without_clearing_keeps_contents() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let mut dev = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(8)
            .build()
            .unwrap();
        dev.write_block(5, &[0x42; BLOCK_SIZE]).unwrap();
        dev.sync_disk().unwrap();

        let mut dev = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_block_count(8)
            // Don't reset initialized disk.
            .clear_medium(false)
            .build()
            .unwrap();
        let mut buf = [0; BLOCK_SIZE];
        dev.read_block(5, &mut buf).unwrap();
        assert_eq!(buf, [0x42; BLOCK_SIZE]);

        let mut dev = FileBlockEmulator::open_disk(disk.path(), 8).unwrap();
        dev.read_block(5, &mut buf).unwrap();
        assert_eq!(buf, [0x42; BLOCK_SIZE]);
    }

    #[test]
    fn open_disk_rejects_undersized_images() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        assert!(FileBlockEmulator::open_disk(disk.path(), 4).is_err());
    }
}
