mod block;
mod disk;
mod diskemu;

pub use block::{BlockNumber, BlockStorage};
pub(crate) use disk::Disk;
pub use diskemu::{FileBlockEmulator, FileBlockEmulatorBuilder};
