//! File descriptor table.
//!
//! A single process-global table (the kernel has one address space).
//! Descriptors 0/1/2 are reserved at init for the standard streams and
//! can never be closed; allocation hands out the lowest free slot from 3
//! up.

use alloc::string::String;
use alloc::sync::Arc;

use bitflags::bitflags;
use sys7_core::id::Fd;
use sys7_core::kprintln;
use sys7_core::sync::SpinLock;

use crate::vfs::Volume;
use crate::FsError;

/// Table capacity.
pub const FD_MAX: usize = 64;

bitflags! {
    /// Flags for opening a file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ = 0b0001;
        /// Open for writing.
        const WRITE = 0b0010;
        /// Create the file if it does not exist.
        const CREATE = 0b0100;
        /// Truncate to zero length on open.
        const TRUNCATE = 0b1000;
    }
}

/// An open file.
#[derive(Clone)]
pub struct FileDescriptor {
    /// Open flags.
    pub flags: OpenFlags,
    /// Descriptor-level flags (close-on-exec and friends; opaque here).
    pub fd_flags: u32,
    /// Volume serving the file.
    pub volume: Arc<Volume>,
    /// Node id within the volume.
    pub inode: u64,
    /// Byte position for the next read/write. Seeking past the end is
    /// legal: writes fill, reads return 0.
    pub position: u64,
    /// Path the descriptor was opened with.
    pub path: String,
}

/// One table slot.
#[derive(Clone)]
pub enum FdEntry {
    /// Reserved standard stream (`stdin`, `stdout`, `stderr`).
    Std(&'static str),
    /// An open file.
    File(FileDescriptor),
}

/// The descriptor table.
pub struct FdTable {
    slots: [Option<FdEntry>; FD_MAX],
}

impl FdTable {
    /// Creates an empty table (standard fds not yet reserved).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; FD_MAX],
        }
    }

    /// Reserves fds 0/1/2 for the standard streams.
    pub fn init_std(&mut self) {
        self.slots[0] = Some(FdEntry::Std("/dev/stdin"));
        self.slots[1] = Some(FdEntry::Std("/dev/stdout"));
        self.slots[2] = Some(FdEntry::Std("/dev/stderr"));
    }

    /// Allocates the lowest free fd >= 3.
    pub fn alloc(&mut self, desc: FileDescriptor) -> Option<Fd> {
        for (i, slot) in self.slots.iter_mut().enumerate().skip(3) {
            if slot.is_none() {
                *slot = Some(FdEntry::File(desc));
                return Some(Fd::new(i as u32));
            }
        }
        None
    }

    /// Returns the slot for `fd`.
    #[must_use]
    pub fn get(&self, fd: Fd) -> Option<&FdEntry> {
        self.slots.get(fd.as_usize())?.as_ref()
    }

    /// Returns the file behind `fd`, if it is an open file.
    #[must_use]
    pub fn file(&self, fd: Fd) -> Option<&FileDescriptor> {
        match self.get(fd)? {
            FdEntry::File(f) => Some(f),
            FdEntry::Std(_) => None,
        }
    }

    /// Mutable access to the file behind `fd`.
    pub fn file_mut(&mut self, fd: Fd) -> Option<&mut FileDescriptor> {
        match self.slots.get_mut(fd.as_usize())?.as_mut()? {
            FdEntry::File(f) => Some(f),
            FdEntry::Std(_) => None,
        }
    }

    /// Closes `fd`. The standard fds cannot be closed.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidArgument`] for fds 0..=2 and unknown/free slots.
    pub fn free(&mut self, fd: Fd) -> Result<(), FsError> {
        if fd.as_usize() <= 2 {
            return Err(FsError::InvalidArgument);
        }
        let slot = self
            .slots
            .get_mut(fd.as_usize())
            .ok_or(FsError::InvalidArgument)?;
        if slot.take().is_none() {
            return Err(FsError::InvalidArgument);
        }
        Ok(())
    }

    /// Duplicates `fd` onto the lowest free slot, sharing path, inode,
    /// flags, and position.
    pub fn dup(&mut self, fd: Fd) -> Option<Fd> {
        let desc = self.file(fd)?.clone();
        self.alloc(desc)
    }

    /// Duplicates `old` onto `new`, closing `new` first if it is open.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidArgument`] when `old` is not an open file or
    /// `new` addresses a reserved/out-of-range slot.
    pub fn dup2(&mut self, old: Fd, new: Fd) -> Result<Fd, FsError> {
        if new.as_usize() <= 2 || new.as_usize() >= FD_MAX {
            return Err(FsError::InvalidArgument);
        }
        let desc = self.file(old).cloned().ok_or(FsError::InvalidArgument)?;
        self.slots[new.as_usize()] = Some(FdEntry::File(desc));
        Ok(new)
    }

    /// Whether `fd` names a live slot.
    #[must_use]
    pub fn is_valid(&self, fd: Fd) -> bool {
        self.get(fd).is_some()
    }

    /// Current position of `fd`.
    #[must_use]
    pub fn tell(&self, fd: Fd) -> Option<u64> {
        Some(self.file(fd)?.position)
    }

    /// Sets descriptor-level flags.
    pub fn set_fd_flags(&mut self, fd: Fd, fd_flags: u32) -> bool {
        match self.file_mut(fd) {
            Some(f) => {
                f.fd_flags = fd_flags;
                true
            }
            None => false,
        }
    }

    /// Descriptor-level flags.
    #[must_use]
    pub fn fd_flags(&self, fd: Fd) -> Option<u32> {
        Some(self.file(fd)?.fd_flags)
    }

    /// Number of live slots.
    #[must_use]
    pub fn count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Runs a closure over every live slot.
    pub fn for_each(&self, mut f: impl FnMut(Fd, &FdEntry)) {
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = slot {
                f(Fd::new(i as u32), entry);
            }
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

static FD_TABLE: SpinLock<FdTable> = SpinLock::new(FdTable::new());

/// Initializes the global table (reserves the standard fds). Idempotent.
pub fn init() {
    let mut table = FD_TABLE.lock();
    if table.get(Fd::STDIN).is_none() {
        table.init_std();
        sys7_core::kinfo!("fd: table initialized ({FD_MAX} max fds)");
    }
}

/// Runs a closure against the global table.
pub fn with_table<R>(f: impl FnOnce(&mut FdTable) -> R) -> R {
    f(&mut FD_TABLE.lock())
}

/// Prints every open descriptor.
pub fn list_fds() {
    let table = FD_TABLE.lock();
    kprintln!("open file descriptors:");
    table.for_each(|fd, entry| match entry {
        FdEntry::Std(name) => kprintln!("  fd={fd}: {name} (std)"),
        FdEntry::File(f) => kprintln!(
            "  fd={fd}: '{}' (inode={}, pos={}, flags={:?})",
            f.path,
            f.inode,
            f.position,
            f.flags
        ),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs;

    fn table_with_std() -> FdTable {
        let mut t = FdTable::new();
        t.init_std();
        t
    }

    fn descriptor() -> FileDescriptor {
        // A real volume keeps the Arc honest; mounted once per test run.
        static NULL_FS: crate::devfs::DevFs = crate::devfs::DevFs::new();
        static VOL: std::sync::OnceLock<alloc::sync::Arc<vfs::Volume>> =
            std::sync::OnceLock::new();
        let volume = VOL
            .get_or_init(|| {
                vfs::mount_virtual(&NULL_FS, "fd-test-vol", false).expect("mount")
            })
            .clone();
        FileDescriptor {
            flags: OpenFlags::READ,
            fd_flags: 0,
            volume,
            inode: 1,
            position: 0,
            path: String::from("/Volumes/fd-test-vol/x"),
        }
    }

    #[test]
    fn alloc_returns_lowest_free_fd_from_three() {
        let mut t = table_with_std();
        let a = t.alloc(descriptor()).unwrap();
        let b = t.alloc(descriptor()).unwrap();
        assert_eq!(a.as_u32(), 3);
        assert_eq!(b.as_u32(), 4);

        t.free(a).unwrap();
        let c = t.alloc(descriptor()).unwrap();
        assert_eq!(c.as_u32(), 3, "freed slot is reused first");
    }

    #[test]
    fn std_fds_cannot_be_closed() {
        let mut t = table_with_std();
        assert_eq!(t.free(Fd::STDIN), Err(FsError::InvalidArgument));
        assert_eq!(t.free(Fd::STDERR), Err(FsError::InvalidArgument));
        assert!(t.is_valid(Fd::STDOUT));
    }

    #[test]
    fn double_close_is_an_error() {
        let mut t = table_with_std();
        let fd = t.alloc(descriptor()).unwrap();
        t.free(fd).unwrap();
        assert_eq!(t.free(fd), Err(FsError::InvalidArgument));
    }

    #[test]
    fn dup_copies_position() {
        let mut t = table_with_std();
        let fd = t.alloc(descriptor()).unwrap();
        t.file_mut(fd).unwrap().position = 99;
        let dup = t.dup(fd).unwrap();
        assert_eq!(t.tell(dup), Some(99));
    }

    #[test]
    fn dup2_closes_target_then_replicates() {
        let mut t = table_with_std();
        let a = t.alloc(descriptor()).unwrap();
        let b = t.alloc(descriptor()).unwrap();
        t.file_mut(a).unwrap().position = 55;

        let target = t.dup2(a, b).unwrap();
        assert_eq!(target, b);
        assert_eq!(t.tell(b), Some(55));
    }

    #[test]
    fn dup2_rejects_reserved_targets() {
        let mut t = table_with_std();
        let a = t.alloc(descriptor()).unwrap();
        assert!(t.dup2(a, Fd::STDOUT).is_err());
    }

    #[test]
    fn fd_flags_roundtrip() {
        let mut t = table_with_std();
        let fd = t.alloc(descriptor()).unwrap();
        assert!(t.set_fd_flags(fd, 1));
        assert_eq!(t.fd_flags(fd), Some(1));
    }

    #[test]
    fn table_exhaustion_returns_none() {
        let mut t = table_with_std();
        for _ in 3..FD_MAX {
            assert!(t.alloc(descriptor()).is_some());
        }
        assert!(t.alloc(descriptor()).is_none());
        assert_eq!(t.count(), FD_MAX);
    }
}
