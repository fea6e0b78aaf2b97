use std::collections::HashSet;
use std::convert::TryInto;

use thiserror::Error;

use crate::fs::FsError;
use crate::{MAX_NAME_BYTES, ROOT};

#[derive(Error, Debug, PartialEq)]
pub enum NameError {
    #[error("a file named {0:?} already exists")]
    AlreadyExists(String),
    #[error("every directory slot is in use")]
    Full,
    #[error("invalid file name {0:?}: names are 1 to 30 bytes without NUL")]
    Invalid(String),
}

/// The flat root directory: one slot per inode number, each either free or
/// bound to a unique name. Slot 0 is permanently bound to "/".
///
/// # Layout
/// The serialized form is `count` big endian `u32` name lengths (0 marks a free
/// slot) followed by `count` name fields of [`MAX_NAME_BYTES`] bytes, zero
/// padded. Names are matched byte for byte, so lookups are case sensitive.
#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    slots: Vec<Option<String>>,
}

fn validate(name: &str) -> Result<(), NameError> {
    if name.is_empty() || name.len() > MAX_NAME_BYTES || name.contains('\0') {
        return Err(NameError::Invalid(name.to_string()));
    }
    Ok(())
}

impl Directory {
    /// Creates a directory with `max_inumber` slots, all free except the root.
    pub fn new(max_inumber: u32) -> Self {
        let mut slots = vec![None; max_inumber.max(1) as usize];
        slots[0] = Some(ROOT.to_string());
        Self { slots }
    }

    /// Binds `name` to the first free slot and returns its inode number.
    pub fn allocate(&mut self, name: &str) -> Result<u16, NameError> {
        validate(name)?;
        if self.resolve(name).is_some() {
            return Err(NameError::AlreadyExists(name.to_string()));
        }
        let inumber = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(NameError::Full)?;
        self.slots[inumber] = Some(name.to_string());
        Ok(inumber as u16)
    }

    /// Frees the slot of `inumber`. Returns false for out of range or already
    /// free slots. The root slot can not be released.
    pub fn release(&mut self, inumber: u16) -> bool {
        match self.slots.get_mut(inumber as usize) {
            Some(slot) if inumber != 0 && slot.is_some() => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn resolve(&self, name: &str) -> Option<u16> {
        self.slots
            .iter()
            .position(|slot| slot.as_deref() == Some(name))
            .map(|inumber| inumber as u16)
    }

    /// Occupied slots in inode order, root included.
    pub fn entries(&self) -> impl Iterator<Item = (u16, &str)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(inumber, slot)| Some((inumber as u16, slot.as_deref()?)))
    }

    pub fn serialized_len(&self) -> usize {
        self.slots.len() * (4 + MAX_NAME_BYTES)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.serialized_len());
        for slot in self.slots.iter() {
            let size = slot.as_ref().map_or(0, String::len) as u32;
            data.extend_from_slice(&size.to_be_bytes());
        }
        for slot in self.slots.iter() {
            let mut field = [0; MAX_NAME_BYTES];
            if let Some(name) = slot {
                field[..name.len()].copy_from_slice(name.as_bytes());
            }
            data.extend_from_slice(&field);
        }
        data
    }

    /// Replaces the contents of this directory with the serialized form in
    /// `data`. Nothing changes when `data` is malformed.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), FsError> {
        let count = self.slots.len();
        if data.len() < self.serialized_len() {
            return Err(FsError::CorruptDirectory(format!(
                "expected {} bytes, found {}",
                self.serialized_len(),
                data.len()
            )));
        }
        let (sizes, names) = data.split_at(count * 4);

        let mut slots = Vec::with_capacity(count);
        let mut seen = HashSet::new();
        for (inumber, (size, field)) in sizes
            .chunks(4)
            .zip(names.chunks(MAX_NAME_BYTES))
            .enumerate()
        {
            let size = u32::from_be_bytes(size.try_into().unwrap()) as usize;
            if size == 0 {
                slots.push(None);
                continue;
            }
            let name = field
                .get(..size)
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .filter(|name| validate(name).is_ok())
                .ok_or_else(|| {
                    FsError::CorruptDirectory(format!("slot {} holds an invalid name", inumber))
                })?;
            if !seen.insert(name) {
                return Err(FsError::CorruptDirectory(format!(
                    "name {:?} is bound twice",
                    name
                )));
            }
            slots.push(Some(name.to_string()));
        }
        if slots[0].as_deref() != Some(ROOT) {
            return Err(FsError::CorruptDirectory(
                "slot 0 is not the root directory".to_string(),
            ));
        }
        self.slots = slots;
        Ok(())
    }
}
