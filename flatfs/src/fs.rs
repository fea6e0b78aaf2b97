use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::dir::{Directory, NameError};
use crate::io::{BlockStorage, Disk};
use crate::node::{Inode, RegisterError};
use crate::sb::Superblock;
use crate::table::{FileTable, Handle, Mode};
use crate::{BLOCK_SIZE, DEFAULT_INODE_COUNT, MAX_BLOCKS, MAX_FILE_SIZE, ROOT};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("found no file named {0:?}")]
    DoesNotExist(String),
    #[error("block device error")]
    Device(#[from] std::io::Error),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error("invalid open mode {0:?}")]
    InvalidMode(String),
    #[error("a file opened in mode \"{mode}\" does not allow {op}")]
    BadMode { mode: Mode, op: &'static str },
    #[error("file handle is closed")]
    Closed,
    #[error("no free blocks left on the volume")]
    DiskFull,
    #[error("file would exceed the maximum size of {} bytes", MAX_FILE_SIZE)]
    FileTooLarge,
    #[error("free list links to block {0} outside the data region")]
    CorruptFreeList(u32),
    #[error("corrupt directory: {0}")]
    CorruptDirectory(String),
    #[error("volume of {0} blocks is larger than block pointers can address")]
    VolumeTooLarge(usize),
    #[error("a file system lock was poisoned by a panicking thread")]
    Poisoned,
}

impl FsError {
    /// Errors that cut a write short without affecting the bytes already
    /// written.
    fn is_capacity(&self) -> bool {
        matches!(self, FsError::DiskFull | FsError::FileTooLarge)
    }
}

impl<T> From<PoisonError<T>> for FsError {
    fn from(_: PoisonError<T>) -> Self {
        FsError::Poisoned
    }
}

/// Reference point of [`FileSystem::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Mount options for a [`FileSystem`].
pub struct FileSystemBuilder<T: BlockStorage> {
    dev: T,
    default_inodes: u32,
}

impl<T: BlockStorage> From<T> for FileSystemBuilder<T> {
    fn from(dev: T) -> Self {
        Self {
            dev,
            default_inodes: DEFAULT_INODE_COUNT,
        }
    }
}

impl<T: BlockStorage> FileSystemBuilder<T> {
    /// Number of inodes used if the volume has to be formatted at mount.
    pub fn with_default_inodes(mut self, inodes: u32) -> Self {
        self.default_inodes = inodes;
        self
    }

    pub fn mount(self) -> Result<FileSystem<T>, FsError> {
        let blocks = self.dev.block_count();
        if blocks > MAX_BLOCKS {
            return Err(FsError::VolumeTooLarge(blocks));
        }
        let disk = Arc::new(Disk::new(self.dev));
        let super_block = Superblock::open(&disk, self.default_inodes)?;
        let directory = Directory::new(super_block.total_inodes);
        let fs = FileSystem {
            file_table: FileTable::new(Arc::clone(&disk), directory),
            super_block: Mutex::new(super_block),
            disk,
        };
        fs.load_directory()?;
        info!("mounted volume of {} blocks", blocks);
        Ok(fs)
    }
}

/// A mounted volume: one flat directory of files addressed by name.
///
/// Every operation may be called from any number of threads through a shared
/// reference. Opens of a single file are arbitrated per inode: any number of
/// readers or a single writer.
pub struct FileSystem<T: BlockStorage> {
    disk: Arc<Disk<T>>,
    super_block: Mutex<Superblock>,
    file_table: FileTable<T>,
}

impl<T: BlockStorage> FileSystem<T> {
    /// Mounts `dev`, formatting it with the default inode count if it does not
    /// hold a valid volume.
    pub fn mount(dev: T) -> Result<Self, FsError> {
        FileSystemBuilder::from(dev).mount()
    }

    fn load_directory(&self) -> Result<(), FsError> {
        let root = self.open(ROOT, Mode::Read)?;
        let loaded = self.read_directory(&root);
        self.close(&root)?;
        loaded
    }

    fn read_directory(&self, root: &Handle) -> Result<(), FsError> {
        let size = self.file_size(root)? as usize;
        if size == 0 {
            return Ok(());
        }
        let mut data = vec![0; size];
        let read = self.read(root, &mut data)?;
        self.file_table.load_directory(&data[..read])
    }

    /// Erases the volume and provisions `files` inodes.
    ///
    /// Handles open at this point are forgotten. Using them afterwards is
    /// undefined.
    pub fn format(&self, files: u32) -> Result<(), FsError> {
        if !self.file_table.is_empty()? {
            warn!("formatting a volume with open files");
        }
        let total_inodes = {
            let mut sb = self.super_block.lock()?;
            sb.format(&self.disk, files)?;
            sb.total_inodes
        };
        self.file_table.reset(Directory::new(total_inodes))
    }

    /// Opens `name` in `mode` ("r", "w", "w+" or "a"). Files are created on
    /// first open for writing. Blocks while the file is held by an
    /// incompatible opener.
    pub fn open(&self, name: &str, mode: Mode) -> Result<Handle, FsError> {
        self.file_table.allocate(name, mode)
    }

    /// Drops one reference to `handle`. The file is released once the last
    /// reference is gone, which this call reports by returning true.
    pub fn close(&self, handle: &Handle) -> Result<bool, FsError> {
        {
            let mut cursor = handle.cursor.lock()?;
            if cursor.count == 0 {
                return Ok(false);
            }
            cursor.count -= 1;
            if cursor.count > 0 {
                return Ok(false);
            }
        }
        self.file_table.release(handle)
    }

    /// Adds a reference to `handle`. Both references share the seek pointer
    /// and each one needs its own [`FileSystem::close`].
    pub fn dup(&self, handle: &Handle) -> Result<Handle, FsError> {
        let mut cursor = handle.cursor.lock()?;
        if cursor.count == 0 {
            return Err(FsError::Closed);
        }
        cursor.count += 1;
        Ok(Arc::clone(handle))
    }

    /// Reads from the seek pointer into `buf`, stopping at end of file.
    /// Returns the number of bytes read.
    pub fn read(&self, handle: &Handle, buf: &mut [u8]) -> Result<usize, FsError> {
        if !handle.mode().can_read() {
            return Err(FsError::BadMode {
                mode: handle.mode(),
                op: "reading",
            });
        }
        let mut cursor = handle.cursor.lock()?;
        if cursor.count == 0 {
            return Err(FsError::Closed);
        }
        let inode = handle.inode.read()?;

        let available = inode.size.saturating_sub(cursor.seek) as usize;
        let wanted = buf.len().min(available);
        let mut read = 0;
        while read < wanted {
            let blocknr = match inode.locate(cursor.seek, &self.disk)? {
                Some(blocknr) => blocknr,
                None => {
                    warn!(
                        "inode {} has no block for offset {} below its size {}",
                        handle.inumber(),
                        cursor.seek,
                        inode.size
                    );
                    break;
                }
            };
            let offset = cursor.seek as usize % BLOCK_SIZE;
            let len = (BLOCK_SIZE - offset).min(wanted - read);
            let block = self.disk.read(blocknr as usize)?;
            buf[read..read + len].copy_from_slice(&block[offset..offset + len]);
            read += len;
            cursor.seek += len as u32;
        }
        Ok(read)
    }

    /// Writes `buf` at the seek pointer, growing the file as needed.
    ///
    /// Running out of blocks or reaching the maximum file size after some
    /// bytes went out returns the short count; the error is only reported
    /// when nothing could be written.
    pub fn write(&self, handle: &Handle, buf: &[u8]) -> Result<usize, FsError> {
        if !handle.mode().can_write() {
            return Err(FsError::BadMode {
                mode: handle.mode(),
                op: "writing",
            });
        }
        let mut cursor = handle.cursor.lock()?;
        if cursor.count == 0 {
            return Err(FsError::Closed);
        }
        let mut inode = handle.inode.write()?;

        let mut written = 0;
        let mut stopped = None;
        while written < buf.len() {
            let blocknr = match inode.locate(cursor.seek, &self.disk)? {
                Some(blocknr) => blocknr,
                None => match self.grow(&mut inode, cursor.seek) {
                    Ok(blocknr) => blocknr,
                    Err(e) if e.is_capacity() => {
                        stopped = Some(e);
                        break;
                    }
                    Err(e) => return Err(e),
                },
            };
            let offset = cursor.seek as usize % BLOCK_SIZE;
            let len = (BLOCK_SIZE - offset).min(buf.len() - written);
            let chunk = &buf[written..written + len];
            self.disk.modify(blocknr as usize, |block| {
                block[offset..offset + len].copy_from_slice(chunk)
            })?;
            written += len;
            cursor.seek += len as u32;
        }

        if cursor.seek > inode.size {
            inode.size = cursor.seek;
        }
        inode.store_data(&self.disk, handle.inumber())?;

        match stopped {
            Some(e) if written == 0 => Err(e),
            Some(e) => {
                debug!("short write of {} of {} bytes: {}", written, buf.len(), e);
                Ok(written)
            }
            None => Ok(written),
        }
    }

    /// Assigns a fresh block to the file position `offset`, installing the
    /// index block first when the position is the first indirect one.
    fn grow(&self, inode: &mut Inode, offset: u32) -> Result<u16, FsError> {
        if offset as usize >= MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        let mut sb = self.super_block.lock()?;
        let blocknr = sb.allocate_block(&self.disk)?.ok_or(FsError::DiskFull)?;

        let registered = match inode.register(offset, blocknr, &self.disk) {
            Err(RegisterError::MissingIndexBlock(_)) => {
                match self.install_index_block(&mut sb, inode) {
                    Ok(()) => inode.register(offset, blocknr, &self.disk).map_err(FsError::from),
                    Err(e) => Err(e),
                }
            }
            other => other.map_err(FsError::from),
        };
        match registered {
            Ok(()) => Ok(blocknr),
            Err(e) => {
                sb.release_block(&self.disk, blocknr)?;
                Err(e)
            }
        }
    }

    fn install_index_block(&self, sb: &mut Superblock, inode: &mut Inode) -> Result<(), FsError> {
        let index_block = sb.allocate_block(&self.disk)?.ok_or(FsError::DiskFull)?;
        if inode.register_index_block(index_block, &self.disk)? {
            debug!("installed index block {}", index_block);
            return Ok(());
        }
        sb.release_block(&self.disk, index_block)?;
        Err(FsError::InvalidArgument(
            "index block requested while direct pointers are unassigned".to_string(),
        ))
    }

    /// Moves the seek pointer of `handle` and returns its new value, clamped
    /// to the file bounds.
    pub fn seek(&self, handle: &Handle, offset: i64, whence: Whence) -> Result<u32, FsError> {
        let mut cursor = handle.cursor.lock()?;
        if cursor.count == 0 {
            return Err(FsError::Closed);
        }
        let size = i64::from(handle.inode.read()?.size);
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => i64::from(cursor.seek),
            Whence::End => size,
        };
        cursor.seek = base.saturating_add(offset).max(0).min(size) as u32;
        Ok(cursor.seek)
    }

    /// Removes `name` and returns its blocks to the free list. Waits until
    /// every other opener of the file is gone. Returns false when there is no
    /// such file.
    pub fn delete(&self, name: &str) -> Result<bool, FsError> {
        if name == ROOT {
            return Ok(false);
        }
        let handle = match self.file_table.admit(name, Mode::Write, false) {
            Ok(handle) => handle,
            Err(FsError::DoesNotExist(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match self.release_blocks(&handle) {
            Ok(released) => {
                let retired = self.file_table.retire(&handle)?;
                info!("deleted {:?}", name);
                Ok(released && retired)
            }
            Err(e) => {
                self.file_table.release(&handle)?;
                Err(e)
            }
        }
    }

    fn release_blocks(&self, handle: &Handle) -> Result<bool, FsError> {
        let mut inode = handle.inode.write()?;
        let owned = inode.owned_blocks(&self.disk)?;
        let mut released = true;
        {
            let mut sb = self.super_block.lock()?;
            for blocknr in owned {
                released &= sb.release_block(&self.disk, blocknr)?;
            }
        }
        inode.truncate();
        inode.store_data(&self.disk, handle.inumber())?;
        Ok(released)
    }

    /// Persists the directory and the superblock, then flushes the device.
    pub fn sync(&self) -> Result<(), FsError> {
        let root = self.open(ROOT, Mode::Write)?;
        let written = self
            .file_table
            .directory_bytes()
            .and_then(|data| Ok((self.write(&root, &data)?, data.len())));
        self.close(&root)?;
        let (written, expected) = written?;
        if written < expected {
            return Err(FsError::DiskFull);
        }
        self.super_block.lock()?.sync(&self.disk)?;
        self.disk.sync()?;
        debug!("volume synchronized");
        Ok(())
    }

    pub fn file_size(&self, handle: &Handle) -> Result<u32, FsError> {
        Ok(handle.inode.read()?.size)
    }

    /// Names of every file, in inode order.
    pub fn list(&self) -> Result<Vec<String>, FsError> {
        self.file_table.names()
    }

    /// Length of the free list. Walks the whole list on disk.
    pub fn free_block_count(&self) -> Result<usize, FsError> {
        let sb = self.super_block.lock()?;
        let mut count = 0;
        for blocknr in sb.free_blocks(&self.disk) {
            blocknr?;
            count += 1;
        }
        Ok(count)
    }

    /// True iff no file is open.
    pub fn is_idle(&self) -> Result<bool, FsError> {
        self.file_table.is_empty()
    }

    /// A copy of the in-memory superblock.
    pub fn superblock(&self) -> Result<Superblock, FsError> {
        Ok(self.super_block.lock()?.clone())
    }
}
