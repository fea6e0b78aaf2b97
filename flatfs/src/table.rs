use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::dir::Directory;
use crate::fs::FsError;
use crate::io::{BlockStorage, Disk};
use crate::node::{Inode, UsedState};

/// Access mode of an open file. Fixed for the life of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// "r"
    Read,
    /// "w"
    Write,
    /// "w+"
    ReadWrite,
    /// "a": like "w", but the seek pointer starts at the end of the file.
    Append,
}

impl Mode {
    pub fn can_read(self) -> bool {
        matches!(self, Mode::Read | Mode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        self != Mode::Read
    }
}

impl FromStr for Mode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(Mode::Read),
            "w" => Ok(Mode::Write),
            "w+" => Ok(Mode::ReadWrite),
            "a" => Ok(Mode::Append),
            other => Err(FsError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            Mode::Read => "r",
            Mode::Write => "w",
            Mode::ReadWrite => "w+",
            Mode::Append => "a",
        };
        f.write_str(mode)
    }
}

/// A shared reference to one open file session.
pub type Handle = Arc<FileTableEntry>;

#[derive(Debug)]
pub(crate) struct Cursor {
    pub seek: u32,
    /// Number of holders sharing this entry. The entry leaves the file table
    /// when it drops to zero.
    pub count: u32,
}

/// One open file session: seek pointer, mode and the inode it works on.
///
/// Every handle open on the same inode shares one in-memory copy of it.
#[derive(Debug)]
pub struct FileTableEntry {
    id: u64,
    inumber: u16,
    mode: Mode,
    pub(crate) inode: Arc<RwLock<Inode>>,
    pub(crate) cursor: Mutex<Cursor>,
}

impl FileTableEntry {
    pub fn inumber(&self) -> u16 {
        self.inumber
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

/// In-memory state of an inode with live handles or waiting openers.
///
/// `state` and `count` are owned by the registry and persisted on their own,
/// so admission never waits on the data lock held across block transfers.
struct Slot {
    inode: Arc<RwLock<Inode>>,
    state: UsedState,
    count: u16,
    /// Openers blocked on this inode wait here.
    admission: Arc<Condvar>,
    waiters: usize,
}

struct Registry {
    directory: Directory,
    slots: HashMap<u16, Slot>,
    open: HashSet<u64>,
    next_id: u64,
}

impl Registry {
    /// Returns the slot of `inumber`, loading the inode from disk if nobody
    /// holds it yet. A `created` file drops any pointers found on disk.
    fn slot<T: BlockStorage>(
        &mut self,
        inumber: u16,
        created: bool,
        disk: &Disk<T>,
    ) -> Result<&mut Slot, FsError> {
        let vacant = match self.slots.entry(inumber) {
            Entry::Occupied(slot) => return Ok(slot.into_mut()),
            Entry::Vacant(vacant) => vacant,
        };
        let mut inode = Inode::load(disk, inumber)?;
        let mut state = inode.state;
        // Nobody in this process holds the inode, so any recorded sharing is
        // left over from an unclean shutdown.
        if inode.count != 0 || matches!(state, UsedState::SharedRead | UsedState::ExclusiveWrite) {
            warn!(
                "inode {} was left {:?} with {} references, resetting admission state",
                inumber, state, inode.count
            );
            state = UsedState::Unshared;
        }
        if created && !inode.is_empty() {
            // The directory entry that owned these blocks was never synced.
            // Leak them rather than share them.
            warn!("new file reuses inode {} holding stale blocks", inumber);
            inode.truncate();
            inode.store_data(disk, inumber)?;
        }
        Ok(vacant.insert(Slot {
            inode: Arc::new(RwLock::new(inode)),
            state,
            count: 0,
            admission: Arc::new(Condvar::new()),
            waiters: 0,
        }))
    }

    fn evict_if_idle(&mut self, inumber: u16) {
        let idle = match self.slots.get(&inumber) {
            Some(slot) => slot.waiters == 0 && slot.count == 0,
            None => false,
        };
        if idle {
            self.slots.remove(&inumber);
        }
    }
}

enum Admission {
    Granted(Arc<RwLock<Inode>>),
    Wait(Arc<Condvar>),
}

/// The table of open files. Arbitrates concurrent opens of one inode: any
/// number of readers, or a single writer.
///
/// | state          | open("r")         | open("w", "w+", "a") |
/// |----------------|-------------------|----------------------|
/// | Unused         | SharedRead        | ExclusiveWrite       |
/// | Unshared       | SharedRead        | ExclusiveWrite       |
/// | SharedRead     | SharedRead        | wait                 |
/// | ExclusiveWrite | wait              | wait                 |
///
/// Waiting openers sleep on a condition variable of the inode and re-evaluate
/// from the name lookup on when woken. The last reader leaving wakes one waiter;
/// a writer leaving wakes all of them.
pub(crate) struct FileTable<T: BlockStorage> {
    disk: Arc<Disk<T>>,
    registry: Mutex<Registry>,
}

impl<T: BlockStorage> FileTable<T> {
    pub(crate) fn new(disk: Arc<Disk<T>>, directory: Directory) -> Self {
        Self {
            disk,
            registry: Mutex::new(Registry {
                directory,
                slots: HashMap::new(),
                open: HashSet::new(),
                next_id: 0,
            }),
        }
    }

    /// Opens `name`, creating it unless `mode` is read only. Blocks until the
    /// inode admits `mode`.
    pub(crate) fn allocate(&self, name: &str, mode: Mode) -> Result<Handle, FsError> {
        self.admit(name, mode, true)
    }

    pub(crate) fn admit(&self, name: &str, mode: Mode, create: bool) -> Result<Handle, FsError> {
        let mut registry = self.registry.lock()?;
        loop {
            let (inumber, created) = match registry.directory.resolve(name) {
                Some(inumber) => (inumber, false),
                None if mode == Mode::Read || !create => {
                    return Err(FsError::DoesNotExist(name.to_string()))
                }
                None => (registry.directory.allocate(name)?, true),
            };

            let admission = match self.try_admit(&mut registry, inumber, created, mode) {
                Ok(admission) => admission,
                Err(e) => {
                    if created {
                        registry.directory.release(inumber);
                    }
                    registry.evict_if_idle(inumber);
                    return Err(e);
                }
            };

            let admission = match admission {
                Admission::Granted(inode) => inode,
                Admission::Wait(admission) => {
                    trace!("open of {:?} in mode {} waits on inode {}", name, mode, inumber);
                    registry = admission.wait(registry)?;
                    if let Some(slot) = registry.slots.get_mut(&inumber) {
                        slot.waiters -= 1;
                    }
                    registry.evict_if_idle(inumber);
                    continue;
                }
            };

            let id = registry.next_id;
            registry.next_id += 1;
            registry.open.insert(id);
            drop(registry);
            debug!("opened {:?} (inode {}) in mode {}", name, inumber, mode);

            let entry = Arc::new(FileTableEntry {
                id,
                inumber,
                mode,
                inode: admission,
                cursor: Mutex::new(Cursor { seek: 0, count: 1 }),
            });
            if mode == Mode::Append {
                // Exclusive admission, so nobody else holds the data lock.
                let size = match entry.inode.read() {
                    Ok(inode) => inode.size,
                    Err(_) => {
                        self.release(&entry)?;
                        return Err(FsError::Poisoned);
                    }
                };
                entry.cursor.lock()?.seek = size;
            }
            return Ok(entry);
        }
    }

    /// Applies the admission table to `inumber` for one attempt. Admission is
    /// persisted before it is granted.
    fn try_admit(
        &self,
        registry: &mut Registry,
        inumber: u16,
        created: bool,
        mode: Mode,
    ) -> Result<Admission, FsError> {
        let slot = registry.slot(inumber, created, &self.disk)?;
        let next = match (mode, slot.state) {
            (Mode::Read, UsedState::ExclusiveWrite) => None,
            (Mode::Read, _) => Some(UsedState::SharedRead),
            (_, UsedState::Unused) | (_, UsedState::Unshared) => Some(UsedState::ExclusiveWrite),
            _ => None,
        };
        match next {
            Some(state) => {
                let count = slot.count + 1;
                Inode::store_admission(&self.disk, inumber, state, count)?;
                slot.state = state;
                slot.count = count;
                Ok(Admission::Granted(Arc::clone(&slot.inode)))
            }
            None => {
                slot.waiters += 1;
                Ok(Admission::Wait(Arc::clone(&slot.admission)))
            }
        }
    }

    /// Removes `entry` from the table and applies the release rule to its
    /// inode. Returns false if the entry was not open.
    pub(crate) fn release(&self, entry: &FileTableEntry) -> Result<bool, FsError> {
        let mut registry = self.registry.lock()?;
        if !registry.open.remove(&entry.id) {
            return Ok(false);
        }
        if let Some(slot) = registry.slots.get_mut(&entry.inumber) {
            let (state, wake) = match slot.state {
                UsedState::SharedRead if slot.count <= 1 => (UsedState::Unshared, Wake::One),
                UsedState::ExclusiveWrite => (UsedState::Unshared, Wake::All),
                other => (other, Wake::None),
            };
            let count = slot.count.saturating_sub(1);
            Inode::store_admission(&self.disk, entry.inumber, state, count)?;
            slot.state = state;
            slot.count = count;
            match wake {
                Wake::One => slot.admission.notify_one(),
                Wake::All => slot.admission.notify_all(),
                Wake::None => {}
            }
        }
        debug!("released handle on inode {}", entry.inumber);
        registry.evict_if_idle(entry.inumber);
        Ok(true)
    }

    /// Releases the exclusive `entry` of a file being deleted, whose data the
    /// caller already truncated: the inode goes back to unused and its
    /// directory slot is freed in the same critical section. Returns false if
    /// the entry was not open or the slot was already free.
    pub(crate) fn retire(&self, entry: &FileTableEntry) -> Result<bool, FsError> {
        let mut registry = self.registry.lock()?;
        if !registry.open.remove(&entry.id) {
            return Ok(false);
        }
        if let Some(slot) = registry.slots.get_mut(&entry.inumber) {
            let count = slot.count.saturating_sub(1);
            let state = if count > 0 {
                UsedState::Unshared
            } else {
                UsedState::Unused
            };
            Inode::store_admission(&self.disk, entry.inumber, state, count)?;
            slot.state = state;
            slot.count = count;
            slot.admission.notify_all();
        }
        let freed = registry.directory.release(entry.inumber);
        registry.evict_if_idle(entry.inumber);
        debug!("retired inode {}", entry.inumber);
        Ok(freed)
    }

    /// True iff no handle is open.
    pub(crate) fn is_empty(&self) -> Result<bool, FsError> {
        Ok(self.registry.lock()?.open.is_empty())
    }

    #[cfg(test)]
    fn resolve(&self, name: &str) -> Result<Option<u16>, FsError> {
        Ok(self.registry.lock()?.directory.resolve(name))
    }

    /// Occupied directory entries, root excluded.
    pub(crate) fn names(&self) -> Result<Vec<String>, FsError> {
        let registry = self.registry.lock()?;
        Ok(registry
            .directory
            .entries()
            .filter(|&(inumber, _)| inumber != 0)
            .map(|(_, name)| name.to_string())
            .collect())
    }

    pub(crate) fn directory_bytes(&self) -> Result<Vec<u8>, FsError> {
        Ok(self.registry.lock()?.directory.serialize())
    }

    pub(crate) fn load_directory(&self, data: &[u8]) -> Result<(), FsError> {
        self.registry.lock()?.directory.deserialize(data)
    }

    /// Forgets every handle and installs `directory`. Openers still waiting
    /// are woken and start over against the new directory.
    pub(crate) fn reset(&self, directory: Directory) -> Result<(), FsError> {
        let mut registry = self.registry.lock()?;
        for slot in registry.slots.values() {
            slot.admission.notify_all();
        }
        registry.slots.clear();
        registry.open.clear();
        registry.directory = directory;
        Ok(())
    }
}

enum Wake {
    None,
    One,
    All,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::sb::Superblock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn table() -> Arc<FileTable<FileBlockEmulator>> {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(64)
            .build()
            .unwrap();
        let disk = Arc::new(Disk::new(dev));
        let sb = Superblock::open(&disk, 8).unwrap();
        Arc::new(FileTable::new(disk, Directory::new(sb.total_inodes)))
    }

    /// Fails every write once `failing` is set.
    struct WriteFault {
        inner: FileBlockEmulator,
        failing: Arc<AtomicBool>,
    }

    impl BlockStorage for WriteFault {
        fn block_count(&self) -> usize {
            self.inner.block_count()
        }

        fn read_block(&mut self, blocknr: usize, buf: &mut [u8]) -> std::io::Result<()> {
            self.inner.read_block(blocknr, buf)
        }

        fn write_block(&mut self, blocknr: usize, buf: &[u8]) -> std::io::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "write fault"));
            }
            self.inner.write_block(blocknr, buf)
        }

        fn sync_disk(&mut self) -> std::io::Result<()> {
            self.inner.sync_disk()
        }
    }

    /// Stalls reads of blocks at or past `slow_from` while `slow` is set.
    struct SlowReads {
        inner: FileBlockEmulator,
        slow_from: usize,
        delay: Duration,
        slow: Arc<AtomicBool>,
    }

    impl BlockStorage for SlowReads {
        fn block_count(&self) -> usize {
            self.inner.block_count()
        }

        fn read_block(&mut self, blocknr: usize, buf: &mut [u8]) -> std::io::Result<()> {
            if blocknr >= self.slow_from && self.slow.load(Ordering::SeqCst) {
                thread::sleep(self.delay);
            }
            self.inner.read_block(blocknr, buf)
        }

        fn write_block(&mut self, blocknr: usize, buf: &[u8]) -> std::io::Result<()> {
            self.inner.write_block(blocknr, buf)
        }

        fn sync_disk(&mut self) -> std::io::Result<()> {
            self.inner.sync_disk()
        }
    }

    fn state(table: &FileTable<FileBlockEmulator>, inumber: u16) -> (UsedState, u16) {
        let inode = Inode::load(&table.disk, inumber).unwrap();
        (inode.state, inode.count)
    }

    #[test]
    fn mode_strings_parse() {
        assert_eq!("r".parse::<Mode>().unwrap(), Mode::Read);
        assert_eq!("w".parse::<Mode>().unwrap(), Mode::Write);
        assert_eq!("w+".parse::<Mode>().unwrap(), Mode::ReadWrite);
        assert_eq!("a".parse::<Mode>().unwrap(), Mode::Append);
        assert!(matches!("rw".parse::<Mode>(), Err(FsError::InvalidMode(_))));
        assert_eq!(Mode::ReadWrite.to_string(), "w+");
    }

    #[test]
    fn reading_a_missing_file_fails_without_creating_it() {
        let table = table();
        assert!(matches!(
            table.allocate("missing", Mode::Read),
            Err(FsError::DoesNotExist(_))
        ));
        assert_eq!(table.resolve("missing").unwrap(), None);
    }

    #[test]
    fn writers_create_files_and_hold_them_exclusively() {
        let table = table();
        let entry = table.allocate("foo", Mode::Write).unwrap();
        assert_eq!(entry.inumber(), 1);
        assert_eq!(table.resolve("foo").unwrap(), Some(1));
        assert_eq!(state(&table, 1), (UsedState::ExclusiveWrite, 1));
        assert!(!table.is_empty().unwrap());

        assert!(table.release(&entry).unwrap());
        assert_eq!(state(&table, 1), (UsedState::Unshared, 0));
        assert!(table.is_empty().unwrap());
        // Double release.
        assert!(!table.release(&entry).unwrap());
    }

    #[test]
    fn readers_share_an_inode() {
        let table = table();
        table.release(&table.allocate("foo", Mode::Write).unwrap()).unwrap();

        let first = table.allocate("foo", Mode::Read).unwrap();
        let second = table.allocate("foo", Mode::Read).unwrap();
        assert!(Arc::ptr_eq(&first.inode, &second.inode));
        assert_eq!(state(&table, 1), (UsedState::SharedRead, 2));

        table.release(&first).unwrap();
        assert_eq!(state(&table, 1), (UsedState::SharedRead, 1));
        table.release(&second).unwrap();
        assert_eq!(state(&table, 1), (UsedState::Unshared, 0));
    }

    #[test]
    fn writer_waits_for_every_reader() {
        let table = table();
        table.release(&table.allocate("foo", Mode::Write).unwrap()).unwrap();
        let first = table.allocate("foo", Mode::Read).unwrap();
        let second = table.allocate("foo", Mode::Read).unwrap();

        let (tx, rx) = mpsc::channel();
        let writer = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let entry = table.allocate("foo", Mode::Write).unwrap();
                tx.send(()).unwrap();
                table.release(&entry).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        table.release(&first).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        table.release(&second).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
        assert!(table.is_empty().unwrap());
    }

    #[test]
    fn writer_release_wakes_every_reader() {
        let table = table();
        let writer = table.allocate("foo", Mode::Append).unwrap();

        let (tx, rx) = mpsc::channel();
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let table = Arc::clone(&table);
                let tx = tx.clone();
                thread::spawn(move || {
                    let entry = table.allocate("foo", Mode::Read).unwrap();
                    tx.send(entry).unwrap();
                })
            })
            .collect();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        table.release(&writer).unwrap();
        let entries: Vec<Handle> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(state(&table, 1), (UsedState::SharedRead, 3));
        for entry in entries.iter() {
            table.release(entry).unwrap();
        }
        assert_eq!(state(&table, 1), (UsedState::Unshared, 0));
    }

    #[test]
    fn waiting_on_one_inode_does_not_block_another() {
        let table = table();
        let foo = table.allocate("foo", Mode::Write).unwrap();
        let bar = table.allocate("bar", Mode::Write).unwrap();
        table.release(&bar).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let entry = table.allocate("foo", Mode::Read).unwrap();
                tx.send(()).unwrap();
                table.release(&entry).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        let bar = table.allocate("bar", Mode::ReadWrite).unwrap();
        table.release(&bar).unwrap();

        table.release(&foo).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn append_starts_at_end_of_file() {
        let table = table();
        let entry = table.allocate("log", Mode::Write).unwrap();
        {
            let mut inode = entry.inode.write().unwrap();
            inode.size = 1234;
            inode.store_data(&table.disk, entry.inumber()).unwrap();
        }
        table.release(&entry).unwrap();

        let entry = table.allocate("log", Mode::Append).unwrap();
        assert_eq!(entry.cursor.lock().unwrap().seek, 1234);
        let other = table.allocate("other", Mode::ReadWrite).unwrap();
        assert_eq!(other.cursor.lock().unwrap().seek, 0);
    }

    #[test]
    fn stale_admission_state_is_reset_on_load() {
        let table = table();
        Inode::store_admission(&table.disk, 0, UsedState::ExclusiveWrite, 1).unwrap();

        let root = table.allocate("/", Mode::Read).unwrap();
        assert_eq!(state(&table, 0), (UsedState::SharedRead, 1));
        table.release(&root).unwrap();
    }

    #[test]
    fn failed_create_leaves_the_name_unbound() {
        let failing = Arc::new(AtomicBool::new(false));
        let dev = WriteFault {
            inner: FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
                .with_block_count(64)
                .build()
                .unwrap(),
            failing: Arc::clone(&failing),
        };
        let disk = Arc::new(Disk::new(dev));
        let sb = Superblock::open(&disk, 8).unwrap();
        let table = FileTable::new(disk, Directory::new(sb.total_inodes));

        failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            table.allocate("new", Mode::Write),
            Err(FsError::Device(_))
        ));
        assert_eq!(table.resolve("new").unwrap(), None);
        assert!(table.is_empty().unwrap());

        failing.store(false, Ordering::SeqCst);
        let entry = table.allocate("new", Mode::Write).unwrap();
        assert_eq!(entry.inumber(), 1);
        assert!(table.release(&entry).unwrap());
    }

    #[test]
    fn admission_does_not_wait_on_the_data_lock() {
        let table = table();
        table.release(&table.allocate("busy", Mode::Write).unwrap()).unwrap();
        let reader = table.allocate("busy", Mode::Read).unwrap();
        // Held the way a read holds it across block transfers.
        let _transfer = reader.inode.read().unwrap();

        let (tx, rx) = mpsc::channel();
        let opener = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let second = table.allocate("busy", Mode::Read).unwrap();
                let other = table.allocate("other", Mode::Write).unwrap();
                table.release(&other).unwrap();
                table.release(&second).unwrap();
                tx.send(()).unwrap();
            })
        };
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        opener.join().unwrap();
        assert_eq!(state(&table, reader.inumber()), (UsedState::SharedRead, 1));
    }

    #[test]
    fn opens_proceed_during_slow_transfers() {
        let slow = Arc::new(AtomicBool::new(false));
        let dev = SlowReads {
            inner: FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
                .with_block_count(64)
                .build()
                .unwrap(),
            // Eight inodes fit in block 1.
            slow_from: 2,
            delay: Duration::from_millis(100),
            slow: Arc::clone(&slow),
        };
        let disk = Arc::new(Disk::new(dev));
        let sb = Superblock::open(&disk, 8).unwrap();
        let table = Arc::new(FileTable::new(disk, Directory::new(sb.total_inodes)));
        table.release(&table.allocate("busy", Mode::Write).unwrap()).unwrap();
        let reader = table.allocate("busy", Mode::Read).unwrap();
        slow.store(true, Ordering::SeqCst);

        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let transfer = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                {
                    let _inode = reader.inode.read().unwrap();
                    started_tx.send(()).unwrap();
                    for blocknr in 10..20 {
                        table.disk.read(blocknr).unwrap();
                        thread::sleep(Duration::from_millis(20));
                    }
                }
                done_tx.send(()).unwrap();
                table.release(&reader).unwrap();
            })
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = table.allocate("busy", Mode::Read).unwrap();
        let other = table.allocate("other", Mode::Write).unwrap();
        // Both opens only waited for single block transfers.
        assert!(done_rx.try_recv().is_err());
        table.release(&other).unwrap();
        table.release(&second).unwrap();

        transfer.join().unwrap();
        slow.store(false, Ordering::SeqCst);
        assert!(table.is_empty().unwrap());
    }

    #[test]
    fn retire_frees_the_directory_slot() {
        let table = table();
        let entry = table.allocate("doomed", Mode::Write).unwrap();
        assert!(table.retire(&entry).unwrap());
        assert_eq!(table.resolve("doomed").unwrap(), None);
        assert_eq!(state(&table, entry.inumber()), (UsedState::Unused, 0));
        assert!(table.is_empty().unwrap());
        assert!(!table.release(&entry).unwrap());
    }

    #[test]
    fn reset_forgets_open_handles() {
        let table = table();
        let entry = table.allocate("foo", Mode::Write).unwrap();
        table.reset(Directory::new(8)).unwrap();
        assert!(table.is_empty().unwrap());
        assert_eq!(table.resolve("foo").unwrap(), None);
        assert!(!table.release(&entry).unwrap());
    }
}
