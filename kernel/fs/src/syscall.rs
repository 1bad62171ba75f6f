//! POSIX-compatible syscall shim.
//!
//! Thin translation layer between POSIX conventions and the VFS: paths
//! resolve through the mount table and `/Volumes` namespace, descriptors
//! live in the global [`fd`](crate::fd) table, and every call either
//! returns its positive result or `-1` with [`errno`] set.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicI32, Ordering};

use sys7_core::id::Fd;
use sys7_core::kprint;

use crate::fd::{self, FdEntry, FileDescriptor, OpenFlags};
use crate::path::{self, ResolvedPath};
use crate::{FsError, vfs};

// ── errno ───────────────────────────────────────────────────────────────

/// No such file or directory.
pub const ENOENT: i32 = 2;
/// I/O error.
pub const EIO: i32 = 5;
/// Bad file descriptor.
pub const EBADF: i32 = 9;
/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Permission denied.
pub const EACCES: i32 = 13;
/// File exists.
pub const EEXIST: i32 = 17;
/// Not a directory.
pub const ENOTDIR: i32 = 20;
/// Is a directory.
pub const EISDIR: i32 = 21;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Too many open files.
pub const EMFILE: i32 = 24;
/// Read-only filesystem.
pub const EROFS: i32 = 30;
/// Function not implemented.
pub const ENOSYS: i32 = 38;

static ERRNO: AtomicI32 = AtomicI32::new(0);

/// Last error set by a syscall.
#[must_use]
pub fn errno() -> i32 {
    ERRNO.load(Ordering::Relaxed)
}

fn set_errno(value: i32) {
    ERRNO.store(value, Ordering::Relaxed);
}

fn fs_errno(err: FsError) -> i32 {
    match err {
        FsError::NotFound => ENOENT,
        FsError::InvalidArgument => EINVAL,
        FsError::NotADirectory => ENOTDIR,
        FsError::IsADirectory => EISDIR,
        FsError::NotSupported => ENOSYS,
        FsError::Io => EIO,
        FsError::ReadOnly => EROFS,
        FsError::AlreadyExists => EEXIST,
        FsError::TableFull => EMFILE,
    }
}

fn fail(err: i32) -> isize {
    set_errno(err);
    -1
}

// ── stat ────────────────────────────────────────────────────────────────

/// Directory mode bits for [`Stat::st_mode`].
pub const S_IFDIR: u32 = 0o040_000;
/// Regular-file mode bits for [`Stat::st_mode`].
pub const S_IFREG: u32 = 0o100_000;

/// POSIX `stat` result.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Stat {
    /// Inode number (the VFS `file_id`).
    pub st_ino: u64,
    /// Type and permission bits.
    pub st_mode: u32,
    /// Link count (always 1).
    pub st_nlink: u32,
    /// Size in bytes.
    pub st_size: i64,
    /// Modification time.
    pub st_mtime: i64,
    /// Access time.
    pub st_atime: i64,
    /// Change time.
    pub st_ctime: i64,
}

/// Seek from the start of the file.
pub const SEEK_SET: i32 = 0;
/// Seek from the current position.
pub const SEEK_CUR: i32 = 1;
/// Seek from the end of the file.
pub const SEEK_END: i32 = 2;

fn resolve_existing(pathname: &str) -> Result<ResolvedPath, i32> {
    let resolved = path::resolve_path(pathname).map_err(fs_errno)?;
    if !resolved.exists {
        return Err(ENOENT);
    }
    Ok(resolved)
}

// ── file syscalls ───────────────────────────────────────────────────────

/// Opens `pathname`, returning the lowest free fd (>= 3) or `-1`.
pub fn sys_open(pathname: &str, flags: OpenFlags) -> isize {
    let resolved = match resolve_existing(pathname) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    let desc = FileDescriptor {
        flags,
        fd_flags: 0,
        volume: resolved.volume,
        inode: resolved.inode,
        position: 0,
        path: resolved.normalized,
    };

    match fd::with_table(|t| t.alloc(desc)) {
        Some(fd) => {
            set_errno(0);
            fd.as_u32() as isize
        }
        None => fail(EMFILE),
    }
}

/// Reads up to `buf.len()` bytes from `fd`, advancing the position.
pub fn sys_read(fd: i32, buf: &mut [u8]) -> isize {
    let fd = match checked_fd(fd) {
        Ok(fd) => fd,
        Err(e) => return fail(e),
    };

    // Standard input has no backing device.
    let file = match fd::with_table(|t| t.get(fd).cloned()) {
        Some(FdEntry::Std(_)) => {
            set_errno(0);
            return 0;
        }
        Some(FdEntry::File(f)) => f,
        None => return fail(EBADF),
    };

    if !file.flags.contains(OpenFlags::READ) {
        return fail(EBADF);
    }

    match vfs::read_file(&file.volume, file.inode, file.position, buf) {
        Ok(n) => {
            fd::with_table(|t| {
                if let Some(f) = t.file_mut(fd) {
                    f.position += n as u64;
                }
            });
            set_errno(0);
            n as isize
        }
        Err(e) => fail(fs_errno(e)),
    }
}

/// Writes `buf` to `fd`, advancing the position.
pub fn sys_write(fd: i32, buf: &[u8]) -> isize {
    let fd = match checked_fd(fd) {
        Ok(fd) => fd,
        Err(e) => return fail(e),
    };

    let file = match fd::with_table(|t| t.get(fd).cloned()) {
        Some(FdEntry::Std(name)) => {
            // stdout/stderr go to the kernel console.
            if name == "/dev/stdin" {
                return fail(EBADF);
            }
            match core::str::from_utf8(buf) {
                Ok(s) => kprint!("{s}"),
                Err(_) => {
                    for &b in buf {
                        kprint!("{}", b as char);
                    }
                }
            }
            set_errno(0);
            return buf.len() as isize;
        }
        Some(FdEntry::File(f)) => f,
        None => return fail(EBADF),
    };

    if !file.flags.contains(OpenFlags::WRITE) {
        return fail(EBADF);
    }

    match vfs::write_file(&file.volume, file.inode, file.position, buf) {
        Ok(n) => {
            fd::with_table(|t| {
                if let Some(f) = t.file_mut(fd) {
                    f.position += n as u64;
                }
            });
            set_errno(0);
            n as isize
        }
        Err(e) => fail(fs_errno(e)),
    }
}

/// Repositions `fd`, returning the new offset or `-1`.
///
/// Seeking past the end is legal: reads there return 0, writes fill.
pub fn sys_lseek(fd: i32, offset: i64, whence: i32) -> i64 {
    let fd = match checked_fd(fd) {
        Ok(fd) => fd,
        Err(e) => return i64::from(fail(e) as i32),
    };

    let file = match fd::with_table(|t| t.file(fd).cloned()) {
        Some(f) => f,
        None => return i64::from(fail(EBADF) as i32),
    };

    let new_pos = match whence {
        SEEK_SET => offset,
        SEEK_CUR => file.position as i64 + offset,
        SEEK_END => {
            let info = match vfs::get_file_info(&file.volume, file.inode) {
                Ok(info) => info,
                Err(e) => return i64::from(fail(fs_errno(e)) as i32),
            };
            if info.is_dir {
                return i64::from(fail(EINVAL) as i32);
            }
            info.size as i64 + offset
        }
        _ => return i64::from(fail(EINVAL) as i32),
    };

    if new_pos < 0 {
        return i64::from(fail(EINVAL) as i32);
    }

    fd::with_table(|t| {
        if let Some(f) = t.file_mut(fd) {
            f.position = new_pos as u64;
        }
    });
    set_errno(0);
    new_pos
}

/// Closes `fd`. The standard fds cannot be closed.
pub fn sys_close(fd: i32) -> isize {
    let fd = match checked_fd(fd) {
        Ok(fd) => fd,
        Err(e) => return fail(e),
    };
    match fd::with_table(|t| t.free(fd)) {
        Ok(()) => {
            set_errno(0);
            0
        }
        Err(_) => fail(EBADF),
    }
}

fn fill_stat(buf: &mut Stat, inode: u64, info: crate::FileInfo) {
    *buf = Stat {
        st_ino: inode,
        st_mode: if info.is_dir {
            S_IFDIR | 0o755
        } else {
            S_IFREG | 0o644
        },
        st_nlink: 1,
        st_size: info.size as i64,
        st_mtime: info.mod_time as i64,
        st_atime: info.mod_time as i64,
        st_ctime: info.mod_time as i64,
    };
}

/// Fills `buf` with metadata for `pathname`.
pub fn sys_stat(pathname: &str, buf: &mut Stat) -> isize {
    let resolved = match resolve_existing(pathname) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    // Fall back to what resolution learned when the driver cannot
    // provide metadata.
    let info = vfs::get_file_info(&resolved.volume, resolved.inode).unwrap_or(crate::FileInfo {
        size: 0,
        is_dir: resolved.is_directory,
        mod_time: 0,
    });

    fill_stat(buf, resolved.inode, info);
    set_errno(0);
    0
}

/// Fills `buf` with metadata for an open descriptor.
pub fn sys_fstat(fd: i32, buf: &mut Stat) -> isize {
    let fd = match checked_fd(fd) {
        Ok(fd) => fd,
        Err(e) => return fail(e),
    };
    let file = match fd::with_table(|t| t.file(fd).cloned()) {
        Some(f) => f,
        None => return fail(EBADF),
    };

    let info = vfs::get_file_info(&file.volume, file.inode).unwrap_or_default();
    fill_stat(buf, file.inode, info);
    set_errno(0);
    0
}

/// Duplicates `fd` onto the lowest free descriptor.
pub fn sys_dup(fd: i32) -> isize {
    let fd = match checked_fd(fd) {
        Ok(fd) => fd,
        Err(e) => return fail(e),
    };
    match fd::with_table(|t| t.dup(fd)) {
        Some(new) => {
            set_errno(0);
            new.as_u32() as isize
        }
        None => fail(EBADF),
    }
}

/// Duplicates `oldfd` onto `newfd`, closing `newfd` first if open.
pub fn sys_dup2(oldfd: i32, newfd: i32) -> isize {
    let (old, new) = match (checked_fd(oldfd), checked_fd(newfd)) {
        (Ok(o), Ok(n)) => (o, n),
        _ => return fail(EBADF),
    };
    match fd::with_table(|t| t.dup2(old, new)) {
        Ok(fd) => {
            set_errno(0);
            fd.as_u32() as isize
        }
        Err(_) => fail(EBADF),
    }
}

fn checked_fd(fd: i32) -> Result<Fd, i32> {
    u32::try_from(fd).map(Fd::new).map_err(|_| EBADF)
}

// ── directory syscalls ──────────────────────────────────────────────────

/// Cached entries per open directory.
pub const DIR_CACHE_MAX: usize = 64;

/// Directory entry type for directories.
pub const DT_DIR: u8 = 4;
/// Directory entry type for regular files.
pub const DT_REG: u8 = 8;

/// One `readdir` result.
#[derive(Debug, Clone)]
pub struct DirEnt {
    /// Entry id.
    pub d_ino: u64,
    /// Position of the next entry.
    pub d_off: u64,
    /// `DT_DIR` or `DT_REG`.
    pub d_type: u8,
    /// Entry name.
    pub d_name: String,
}

/// An open directory stream.
pub struct Dir {
    volume: alloc::sync::Arc<vfs::Volume>,
    dir_inode: u64,
    position: usize,
    enumerated: bool,
    entries: Vec<DirEnt>,
}

/// Opens a directory stream.
///
/// Returns `None` with [`errno`] set on failure.
pub fn sys_opendir(pathname: &str) -> Option<Box<Dir>> {
    let resolved = match resolve_existing(pathname) {
        Ok(r) => r,
        Err(e) => {
            set_errno(e);
            return None;
        }
    };
    if !resolved.is_directory {
        set_errno(ENOTDIR);
        return None;
    }

    set_errno(0);
    Some(Box::new(Dir {
        volume: resolved.volume,
        dir_inode: resolved.inode,
        position: 0,
        enumerated: false,
        entries: Vec::new(),
    }))
}

/// Returns the next entry, or `None` at end of directory.
///
/// The first call enumerates the directory once into a bounded cache;
/// later calls walk the cache.
pub fn sys_readdir(dir: &mut Dir) -> Option<DirEnt> {
    if !dir.enumerated {
        let mut entries = Vec::new();
        let result = vfs::enumerate(&dir.volume, dir.dir_inode, &mut |name, id, is_dir| {
            if entries.len() >= DIR_CACHE_MAX {
                return false;
            }
            entries.push(DirEnt {
                d_ino: id,
                d_off: entries.len() as u64 + 1,
                d_type: if is_dir { DT_DIR } else { DT_REG },
                d_name: String::from(name),
            });
            true
        });
        dir.enumerated = true;
        match result {
            Ok(()) => dir.entries = entries,
            Err(e) => {
                set_errno(fs_errno(e));
                return None;
            }
        }
    }

    if dir.position >= dir.entries.len() {
        set_errno(0);
        return None;
    }
    let entry = dir.entries[dir.position].clone();
    dir.position += 1;
    set_errno(0);
    Some(entry)
}

/// Closes a directory stream.
pub fn sys_closedir(dir: Box<Dir>) -> isize {
    drop(dir);
    set_errno(0);
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::create_memory_block_device;
    use crate::ramfs::{self, RAMFS};
    use crate::vfs;

    /// Mounts the shared test volume exactly once across test threads.
    fn boot_volume(_name: &str) -> alloc::sync::Arc<vfs::Volume> {
        static VOL: std::sync::OnceLock<alloc::sync::Arc<vfs::Volume>> =
            std::sync::OnceLock::new();
        VOL.get_or_init(|| {
            fd::init();
            vfs::register_filesystem(&RAMFS);
            let image = ramfs::build_image(&[
                ("hello.txt", b"Hello, World!\n"),
                ("notes", b"0123456789"),
            ]);
            let dev = create_memory_block_device(image);
            vfs::mount(dev, Some("SYSVOL")).expect("mount ramfs")
        })
        .clone()
    }

    #[test]
    fn open_read_close_lifecycle() {
        boot_volume("SYSVOL");

        let fd = sys_open("/Volumes/SYSVOL/hello.txt", OpenFlags::READ);
        assert!(fd >= 3, "expected fd >= 3, got {fd} (errno {})", errno());

        let mut buf = [0u8; 5];
        assert_eq!(sys_read(fd as i32, &mut buf), 5);
        assert_eq!(&buf, b"Hello");

        // Position advanced by the read.
        let mut rest = [0u8; 64];
        let n = sys_read(fd as i32, &mut rest);
        assert_eq!(n, 9);
        assert_eq!(&rest[..9], b", World!\n");

        assert_eq!(sys_close(fd as i32), 0);

        // Closed fd is rejected.
        assert_eq!(sys_read(fd as i32, &mut buf), -1);
        assert_eq!(errno(), EBADF);
    }

    #[test]
    fn open_missing_file_sets_enoent() {
        boot_volume("SYSVOL");
        assert_eq!(
            sys_open("/Volumes/SYSVOL/missing.txt", OpenFlags::READ),
            -1
        );
        assert_eq!(errno(), ENOENT);
    }

    #[test]
    fn read_requires_read_access() {
        boot_volume("SYSVOL");
        let fd = sys_open("/Volumes/SYSVOL/hello.txt", OpenFlags::WRITE);
        assert!(fd >= 3);
        let mut buf = [0u8; 4];
        assert_eq!(sys_read(fd as i32, &mut buf), -1);
        assert_eq!(errno(), EBADF);
        sys_close(fd as i32);
    }

    #[test]
    fn lseek_set_cur_end() {
        boot_volume("SYSVOL");
        let fd = sys_open("/Volumes/SYSVOL/notes", OpenFlags::READ) as i32;
        assert!(fd >= 3);

        assert_eq!(sys_lseek(fd, 4, SEEK_SET), 4);
        let mut buf = [0u8; 2];
        assert_eq!(sys_read(fd, &mut buf), 2);
        assert_eq!(&buf, b"45");

        assert_eq!(sys_lseek(fd, -2, SEEK_CUR), 4);
        assert_eq!(sys_lseek(fd, -3, SEEK_END), 7);
        let mut tail = [0u8; 8];
        assert_eq!(sys_read(fd, &mut tail), 3);
        assert_eq!(&tail[..3], b"789");

        // Past-the-end seeks are legal; reads there return 0.
        assert_eq!(sys_lseek(fd, 5, SEEK_END), 15);
        assert_eq!(sys_read(fd, &mut tail), 0);

        // Negative positions are not.
        assert_eq!(sys_lseek(fd, -100, SEEK_SET), -1);
        assert_eq!(errno(), EINVAL);

        sys_close(fd);
    }

    #[test]
    fn stat_reports_type_and_size() {
        boot_volume("SYSVOL");
        let mut st = Stat::default();
        assert_eq!(sys_stat("/Volumes/SYSVOL/hello.txt", &mut st), 0);
        assert_eq!(st.st_size, 14);
        assert_eq!(st.st_mode & S_IFREG, S_IFREG);

        assert_eq!(sys_stat("/Volumes/SYSVOL", &mut st), 0);
        assert_eq!(st.st_mode & S_IFDIR, S_IFDIR);
    }

    #[test]
    fn fstat_matches_open_file() {
        boot_volume("SYSVOL");
        let fd = sys_open("/Volumes/SYSVOL/notes", OpenFlags::READ) as i32;
        let mut st = Stat::default();
        assert_eq!(sys_fstat(fd, &mut st), 0);
        assert_eq!(st.st_size, 10);
        sys_close(fd);
    }

    #[test]
    fn readdir_walks_cached_entries() {
        boot_volume("SYSVOL");
        let mut dir = sys_opendir("/Volumes/SYSVOL").expect("opendir");

        let mut names = Vec::new();
        while let Some(entry) = sys_readdir(&mut dir) {
            assert_eq!(entry.d_type, DT_REG);
            names.push(entry.d_name);
        }
        assert!(names.contains(&String::from("hello.txt")));
        assert!(names.contains(&String::from("notes")));
        assert_eq!(sys_closedir(dir), 0);
    }

    #[test]
    fn opendir_on_file_is_enotdir() {
        boot_volume("SYSVOL");
        assert!(sys_opendir("/Volumes/SYSVOL/hello.txt").is_none());
        assert_eq!(errno(), ENOTDIR);
    }

    #[test]
    fn dup2_replicates_descriptor() {
        boot_volume("SYSVOL");
        let a = sys_open("/Volumes/SYSVOL/notes", OpenFlags::READ) as i32;
        let b = sys_open("/Volumes/SYSVOL/hello.txt", OpenFlags::READ) as i32;
        assert!(a >= 3 && b > a);

        sys_lseek(a, 6, SEEK_SET);
        assert_eq!(sys_dup2(a, b), b as isize);

        let mut buf = [0u8; 4];
        assert_eq!(sys_read(b, &mut buf), 4);
        assert_eq!(&buf, b"6789");

        sys_close(a);
        sys_close(b);
    }

    #[test]
    fn write_to_stdout_is_accepted() {
        fd::init();
        assert_eq!(sys_write(1, b"console test\n"), 13);
        assert_eq!(sys_write(0, b"nope"), -1);
        assert_eq!(errno(), EBADF);
    }

    #[test]
    fn write_to_readonly_driver_fails() {
        boot_volume("SYSVOL");
        let fd = sys_open("/Volumes/SYSVOL/notes", OpenFlags::WRITE) as i32;
        assert!(fd >= 3);
        assert_eq!(sys_write(fd, b"xx"), -1);
        assert_eq!(errno(), EROFS);
        sys_close(fd);
    }
}
