use thiserror::Error;
use zerocopy::byteorder::{BigEndian, I16, U16, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::io::{BlockStorage, Disk};
use crate::sb::inode_position;
use crate::{Block, BLOCK_SIZE, DIRECT_POINTERS, INDIRECT_POINTERS, INODE_SIZE};

/// Admission state of an inode, gating concurrent opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsedState {
    Unused = 0,
    Unshared = 1,
    SharedRead = 2,
    ExclusiveWrite = 3,
}

impl UsedState {
    fn from_raw(raw: u16) -> Self {
        match raw {
            0 => UsedState::Unused,
            1 => UsedState::Unshared,
            2 => UsedState::SharedRead,
            3 => UsedState::ExclusiveWrite,
            // Unknown flags are treated as a plain, idle file.
            _ => UsedState::Unshared,
        }
    }
}

/// On-disk inode record. This structure __must be exactly 32 bytes.__
#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned, Clone, Copy)]
struct DiskInode {
    size: U32<BigEndian>,
    count: U16<BigEndian>,
    flag: U16<BigEndian>,
    direct: [I16<BigEndian>; DIRECT_POINTERS],
    indirect: I16<BigEndian>,
}

/// Byte range of `count` and `flag` inside a record.
const ADMISSION: std::ops::Range<usize> = 4..8;

fn encode_pointer(ptr: Option<u16>) -> I16<BigEndian> {
    I16::new(ptr.map_or(-1, |blocknr| blocknr as i16))
}

/// Block 0 holds the superblock, so zero doubles as "unassigned" next to -1.
fn decode_pointer(raw: i16) -> Option<u16> {
    if raw > 0 {
        Some(raw as u16)
    } else {
        None
    }
}

fn index_slot(block: &Block, slot: usize) -> Option<u16> {
    decode_pointer(i16::from_be_bytes([block[slot * 2], block[slot * 2 + 1]]))
}

fn set_index_slot(block: &mut Block, slot: usize, ptr: Option<u16>) {
    block[slot * 2..slot * 2 + 2].copy_from_slice(encode_pointer(ptr).as_bytes());
}

/// Why a block could not be registered into an inode.
#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("block pointer {0} is already assigned")]
    Occupied(usize),
    #[error("block pointer {0} would leave an unassigned pointer before it")]
    Gap(usize),
    /// The caller has to register an index block and retry.
    #[error("block pointer {0} needs an indirect index block")]
    MissingIndexBlock(usize),
    #[error("block pointer {0} is past the largest addressable file")]
    BeyondIndex(usize),
    #[error("block device error")]
    Device(#[from] std::io::Error),
}

/// File metadata: size, admission state and block pointers. Pointers are
/// assigned contiguously from direct slot 0; the indirect index block is only
/// assigned once every direct slot is filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// The total size of the file in bytes.
    pub size: u32,
    /// Number of open file table entries referencing this inode. Like
    /// `state`, only meaningful as loaded; the file table tracks both on its
    /// own while the inode is open.
    pub count: u16,
    pub state: UsedState,
    pub direct: [Option<u16>; DIRECT_POINTERS],
    /// Block holding up to [`INDIRECT_POINTERS`] further pointers.
    pub indirect: Option<u16>,
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            size: 0,
            count: 0,
            state: UsedState::Unused,
            direct: [None; DIRECT_POINTERS],
            indirect: None,
        }
    }
}

impl Inode {
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let mut direct = [I16::new(-1); DIRECT_POINTERS];
        for (raw, &ptr) in direct.iter_mut().zip(self.direct.iter()) {
            *raw = encode_pointer(ptr);
        }
        let record = DiskInode {
            size: U32::new(self.size),
            count: U16::new(self.count),
            flag: U16::new(self.state as u16),
            direct,
            indirect: encode_pointer(self.indirect),
        };
        let mut out = [0; INODE_SIZE];
        out.copy_from_slice(record.as_bytes());
        out
    }

    /// Decodes a record from the first [`INODE_SIZE`] bytes of `buf`. Returns
    /// `None` if `buf` is shorter than a record.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let record = DiskInode::read_from(buf.get(..INODE_SIZE)?)?;
        let mut direct = [None; DIRECT_POINTERS];
        for (ptr, raw) in direct.iter_mut().zip(record.direct.iter()) {
            *ptr = decode_pointer(raw.get());
        }
        Some(Self {
            size: record.size.get(),
            count: record.count.get(),
            state: UsedState::from_raw(record.flag.get()),
            direct,
            indirect: decode_pointer(record.indirect.get()),
        })
    }

    pub(crate) fn load<T: BlockStorage>(disk: &Disk<T>, inumber: u16) -> std::io::Result<Self> {
        let (blocknr, offset) = inode_position(inumber);
        let block = disk.read(blocknr)?;
        Ok(Self::decode(&block[offset..offset + INODE_SIZE]).unwrap_or_default())
    }

    /// Writes size and block pointers, leaving the admission fields on disk
    /// as the file table last stored them.
    pub(crate) fn store_data<T: BlockStorage>(
        &self,
        disk: &Disk<T>,
        inumber: u16,
    ) -> std::io::Result<()> {
        let (blocknr, offset) = inode_position(inumber);
        let record = self.encode();
        disk.modify(blocknr, |block| {
            block[offset..offset + ADMISSION.start].copy_from_slice(&record[..ADMISSION.start]);
            block[offset + ADMISSION.end..offset + INODE_SIZE]
                .copy_from_slice(&record[ADMISSION.end..]);
        })
    }

    /// Writes only the reference count and state of inode `inumber`.
    pub(crate) fn store_admission<T: BlockStorage>(
        disk: &Disk<T>,
        inumber: u16,
        state: UsedState,
        count: u16,
    ) -> std::io::Result<()> {
        let (blocknr, offset) = inode_position(inumber);
        disk.modify(blocknr, |block| {
            let field = &mut block[offset + ADMISSION.start..offset + ADMISSION.end];
            field[..2].copy_from_slice(&count.to_be_bytes());
            field[2..].copy_from_slice(&(state as u16).to_be_bytes());
        })
    }

    /// True when the inode owns no blocks and holds no data.
    pub fn is_empty(&self) -> bool {
        self.size == 0 && self.indirect.is_none() && self.direct.iter().all(Option::is_none)
    }

    /// Finds the block holding byte `offset` of the file, if one is assigned.
    pub(crate) fn locate<T: BlockStorage>(
        &self,
        offset: u32,
        disk: &Disk<T>,
    ) -> std::io::Result<Option<u16>> {
        let index = offset as usize / BLOCK_SIZE;
        if index < DIRECT_POINTERS {
            return Ok(self.direct[index]);
        }
        let slot = index - DIRECT_POINTERS;
        match self.indirect {
            Some(index_block) if slot < INDIRECT_POINTERS => {
                Ok(index_slot(&disk.read(index_block as usize)?, slot))
            }
            _ => Ok(None),
        }
    }

    /// Records `blocknr` as the block holding byte `offset`. Never overwrites
    /// an assigned pointer and never leaves an unassigned pointer behind the
    /// new one.
    pub(crate) fn register<T: BlockStorage>(
        &mut self,
        offset: u32,
        blocknr: u16,
        disk: &Disk<T>,
    ) -> Result<(), RegisterError> {
        let index = offset as usize / BLOCK_SIZE;
        if index < DIRECT_POINTERS {
            if self.direct[index].is_some() {
                return Err(RegisterError::Occupied(index));
            }
            if index > 0 && self.direct[index - 1].is_none() {
                return Err(RegisterError::Gap(index));
            }
            self.direct[index] = Some(blocknr);
            return Ok(());
        }

        let slot = index - DIRECT_POINTERS;
        if slot >= INDIRECT_POINTERS {
            return Err(RegisterError::BeyondIndex(index));
        }
        let index_block = self
            .indirect
            .ok_or(RegisterError::MissingIndexBlock(index))?;
        disk.modify(index_block as usize, |block| {
            if index_slot(block, slot).is_some() {
                Err(RegisterError::Occupied(index))
            } else if slot > 0 && index_slot(block, slot - 1).is_none() {
                Err(RegisterError::Gap(index))
            } else {
                set_index_slot(block, slot, Some(blocknr));
                Ok(())
            }
        })?
    }

    /// Installs `blocknr` as the indirect index block with every slot
    /// unassigned. Only allowed once all direct pointers are assigned and no
    /// index block exists yet.
    pub(crate) fn register_index_block<T: BlockStorage>(
        &mut self,
        blocknr: u16,
        disk: &Disk<T>,
    ) -> std::io::Result<bool> {
        if self.indirect.is_some() || self.direct.iter().any(Option::is_none) {
            return Ok(false);
        }
        // Every slot -1.
        disk.write(blocknr as usize, &[0xff; BLOCK_SIZE])?;
        self.indirect = Some(blocknr);
        Ok(true)
    }

    /// Every block the file owns: data blocks first, the index block last.
    pub(crate) fn owned_blocks<T: BlockStorage>(&self, disk: &Disk<T>) -> std::io::Result<Vec<u16>> {
        let mut blocks: Vec<u16> = self.direct.iter().filter_map(|&ptr| ptr).collect();
        if let Some(index_block) = self.indirect {
            let block = disk.read(index_block as usize)?;
            blocks.extend((0..INDIRECT_POINTERS).filter_map(|slot| index_slot(&block, slot)));
            blocks.push(index_block);
        }
        Ok(blocks)
    }

    /// Drops every pointer and the file size. The blocks themselves are the
    /// caller's to release.
    pub(crate) fn truncate(&mut self) {
        self.size = 0;
        self.direct = [None; DIRECT_POINTERS];
        self.indirect = None;
    }
}
