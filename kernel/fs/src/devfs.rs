//! Device filesystem (`/dev`).
//!
//! Fixed device nodes:
//! - `null` — reads return EOF, writes are discarded
//! - `zero` — reads zero-fill, writes fail
//! - `random` — reads from an LCG, writes fail
//! - `console` / `tty` — no input, writes go to the kernel console

use core::sync::atomic::{AtomicU32, Ordering};

use sys7_core::kprint;

use crate::block::BlockDevice;
use crate::mount::{self, MountBacking, MountFlags};
use crate::vfs::{self, EnumerateCallback, FileSystemOps, FsPrivate, Volume};
use crate::{FileInfo, FsError};

const DEV_NULL: u64 = 1;
const DEV_ZERO: u64 = 2;
const DEV_RANDOM: u64 = 3;
const DEV_CONSOLE: u64 = 4;
const DEV_TTY: u64 = 5;

const ENTRIES: [(&str, u64); 5] = [
    ("null", DEV_NULL),
    ("zero", DEV_ZERO),
    ("random", DEV_RANDOM),
    ("console", DEV_CONSOLE),
    ("tty", DEV_TTY),
];

/// The `/dev` filesystem.
pub struct DevFs {
    seed: AtomicU32,
}

impl DevFs {
    /// Creates the filesystem with the default PRNG seed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            seed: AtomicU32::new(0x1234_5678),
        }
    }

    fn next_random(&self) -> u8 {
        // Classic LCG; good enough for a device node, not for secrets.
        let mut seed = self.seed.load(Ordering::Relaxed);
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        self.seed.store(seed, Ordering::Relaxed);
        (seed >> 16) as u8
    }
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemOps for DevFs {
    fn fs_name(&self) -> &'static str {
        "devfs"
    }

    fn probe(&self, _dev: &dyn BlockDevice) -> bool {
        false
    }

    fn mount(&self, _dev: &dyn BlockDevice) -> Result<FsPrivate, FsError> {
        Err(FsError::NotSupported)
    }

    fn read(
        &self,
        _vol: &Volume,
        file_id: u64,
        _offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        match file_id {
            DEV_NULL => Ok(0),
            DEV_ZERO => {
                buf.fill(0);
                Ok(buf.len())
            }
            DEV_RANDOM => {
                for b in buf.iter_mut() {
                    *b = self.next_random();
                }
                Ok(buf.len())
            }
            DEV_CONSOLE | DEV_TTY => Ok(0),
            _ => Err(FsError::NotFound),
        }
    }

    fn write(
        &self,
        _vol: &Volume,
        file_id: u64,
        _offset: u64,
        buf: &[u8],
    ) -> Result<usize, FsError> {
        match file_id {
            DEV_NULL => Ok(buf.len()),
            DEV_CONSOLE | DEV_TTY => {
                match core::str::from_utf8(buf) {
                    Ok(s) => kprint!("{s}"),
                    Err(_) => {
                        for &b in buf {
                            kprint!("{}", b as char);
                        }
                    }
                }
                Ok(buf.len())
            }
            DEV_ZERO | DEV_RANDOM => Err(FsError::NotSupported),
            _ => Err(FsError::NotFound),
        }
    }

    fn enumerate(
        &self,
        _vol: &Volume,
        dir_id: u64,
        cb: EnumerateCallback<'_>,
    ) -> Result<(), FsError> {
        if dir_id != vfs::ROOT_DIR_ID {
            return Err(FsError::NotADirectory);
        }
        for (name, id) in ENTRIES {
            if !cb(name, id, false) {
                break;
            }
        }
        Ok(())
    }

    fn lookup(&self, _vol: &Volume, dir_id: u64, name: &str) -> Result<(u64, bool), FsError> {
        if dir_id != vfs::ROOT_DIR_ID {
            return Err(FsError::NotADirectory);
        }
        ENTRIES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, id)| (id, false))
            .ok_or(FsError::NotFound)
    }

    fn get_file_info(&self, _vol: &Volume, file_id: u64) -> Result<FileInfo, FsError> {
        if file_id == vfs::ROOT_DIR_ID {
            return Ok(FileInfo {
                size: 0,
                is_dir: true,
                mod_time: 0,
            });
        }
        if ENTRIES.iter().any(|&(_, id)| id == file_id) {
            Ok(FileInfo::default())
        } else {
            Err(FsError::NotFound)
        }
    }
}

static DEVFS: DevFs = DevFs::new();

/// Mounts `/dev`: registers a virtual volume and a mount-table entry.
///
/// # Errors
///
/// Table-full / duplicate-mount errors from the volume and mount tables.
pub fn mount_devfs() -> Result<(), FsError> {
    let volume = vfs::mount_virtual(&DEVFS, "devfs", false)?;
    mount::add(
        "devfs",
        "/dev",
        "devfs",
        MountFlags::VIRTUAL,
        MountBacking::Volume(volume.id()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devfs_volume() -> alloc::sync::Arc<Volume> {
        static VOL: std::sync::OnceLock<alloc::sync::Arc<Volume>> = std::sync::OnceLock::new();
        VOL.get_or_init(|| vfs::mount_virtual(&DEVFS, "devfs-test", false).expect("mount"))
            .clone()
    }

    #[test]
    fn null_reads_eof_and_swallows_writes() {
        let vol = devfs_volume();
        let mut buf = [0xFFu8; 16];
        assert_eq!(DEVFS.read(&vol, DEV_NULL, 0, &mut buf), Ok(0));
        assert_eq!(DEVFS.write(&vol, DEV_NULL, 0, b"gone"), Ok(4));
    }

    #[test]
    fn zero_fills_and_rejects_writes() {
        let vol = devfs_volume();
        let mut buf = [0xFFu8; 32];
        assert_eq!(DEVFS.read(&vol, DEV_ZERO, 0, &mut buf), Ok(32));
        assert!(buf.iter().all(|&b| b == 0));
        assert!(matches!(
            DEVFS.write(&vol, DEV_ZERO, 0, b"x"),
            Err(FsError::NotSupported)
        ));
    }

    #[test]
    fn random_fills_with_lcg_stream() {
        let vol = devfs_volume();
        let mut buf = [0u8; 64];
        assert_eq!(DEVFS.read(&vol, DEV_RANDOM, 0, &mut buf), Ok(64));
        // A 64-byte run of a single value would mean the LCG is broken.
        assert!(buf.windows(2).any(|w| w[0] != w[1]));
        assert!(matches!(
            DEVFS.write(&vol, DEV_RANDOM, 0, b"x"),
            Err(FsError::NotSupported)
        ));
    }

    #[test]
    fn lookup_finds_all_nodes() {
        let vol = devfs_volume();
        for (name, id) in ENTRIES {
            assert_eq!(DEVFS.lookup(&vol, vfs::ROOT_DIR_ID, name), Ok((id, false)));
        }
        assert!(matches!(
            DEVFS.lookup(&vol, vfs::ROOT_DIR_ID, "missing"),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn enumerate_lists_fixed_nodes() {
        let vol = devfs_volume();
        let mut names = alloc::vec::Vec::new();
        DEVFS
            .enumerate(&vol, vfs::ROOT_DIR_ID, &mut |name, _, is_dir| {
                assert!(!is_dir);
                names.push(alloc::string::String::from(name));
                true
            })
            .unwrap();
        assert_eq!(names, ["null", "zero", "random", "console", "tty"]);
    }
}
