//! Process filesystem (`/proc`).
//!
//! Synthetic read-only text files regenerated on every read:
//! `version`, `mounts`, `meminfo`, `cpuinfo`, `uptime`.

use alloc::format;
use alloc::string::String;

use sys7_mm::pmm;

use crate::block::BlockDevice;
use crate::mount::{self, MountBacking, MountFlags};
use crate::vfs::{self, EnumerateCallback, FileSystemOps, FsPrivate, Volume};
use crate::{FileInfo, FsError};

const PROC_VERSION: u64 = 1;
const PROC_MOUNTS: u64 = 2;
const PROC_MEMINFO: u64 = 3;
const PROC_CPUINFO: u64 = 4;
const PROC_UPTIME: u64 = 5;

const ENTRIES: [(&str, u64); 5] = [
    ("version", PROC_VERSION),
    ("mounts", PROC_MOUNTS),
    ("meminfo", PROC_MEMINFO),
    ("cpuinfo", PROC_CPUINFO),
    ("uptime", PROC_UPTIME),
];

/// The `/proc` filesystem.
pub struct ProcFs;

fn render(entry: u64) -> Option<String> {
    match entry {
        PROC_VERSION => Some(String::from(
            "sys7 nanokernel v0.1\narchitecture: x86\n",
        )),
        PROC_MOUNTS => {
            let mut out = String::from("# mount table\n");
            for e in mount::entries() {
                let kind = if e.flags.contains(MountFlags::NETWORK) {
                    "network"
                } else if e.flags.contains(MountFlags::VIRTUAL) {
                    "virtual"
                } else {
                    "local"
                };
                out.push_str(&format!(
                    "{} {} {} {kind}{}\n",
                    e.source,
                    e.mount_point,
                    e.fs_type,
                    if e.flags.contains(MountFlags::RDONLY) {
                        " ro"
                    } else {
                        ""
                    }
                ));
            }
            Some(out)
        }
        PROC_MEMINFO => {
            let (total_kb, free_kb) = if pmm::is_initialized() {
                pmm::with_pmm(|p| (p.total_pages() * 4, p.free_pages() * 4))
            } else {
                (0, 0)
            };
            let heap_kb = sys7_mm::heap::used_bytes() / 1024;
            Some(format!(
                "MemTotal: {total_kb} kB\nMemFree: {free_kb} kB\nHeapUsed: {heap_kb} kB\n"
            ))
        }
        PROC_CPUINFO => Some(String::from(
            "processor: 0\nmodel name: sys7 x86\n",
        )),
        PROC_UPTIME => {
            let ms = sys7_sched::timer::ticks();
            Some(format!("{}.{:02}\n", ms / 1000, (ms % 1000) / 10))
        }
        _ => None,
    }
}

impl FileSystemOps for ProcFs {
    fn fs_name(&self) -> &'static str {
        "proc"
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
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        let content = render(file_id).ok_or(FsError::NotFound)?;
        let bytes = content.as_bytes();
        let offset = usize::try_from(offset).map_err(|_| FsError::InvalidArgument)?;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn write(
        &self,
        _vol: &Volume,
        _file_id: u64,
        _offset: u64,
        _buf: &[u8],
    ) -> Result<usize, FsError> {
        Err(FsError::ReadOnly)
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
        let content = render(file_id).ok_or(FsError::NotFound)?;
        Ok(FileInfo {
            size: content.len() as u64,
            is_dir: false,
            mod_time: 0,
        })
    }
}

static PROCFS: ProcFs = ProcFs;

/// Mounts `/proc`: registers a virtual read-only volume and a mount-table
/// entry.
///
/// # Errors
///
/// Table-full / duplicate-mount errors from the volume and mount tables.
pub fn mount_procfs() -> Result<(), FsError> {
    let volume = vfs::mount_virtual(&PROCFS, "proc", true)?;
    mount::add(
        "proc",
        "/proc",
        "proc",
        MountFlags::VIRTUAL | MountFlags::RDONLY,
        MountBacking::Volume(volume.id()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procfs_volume() -> alloc::sync::Arc<Volume> {
        static VOL: std::sync::OnceLock<alloc::sync::Arc<Volume>> = std::sync::OnceLock::new();
        VOL.get_or_init(|| vfs::mount_virtual(&PROCFS, "procfs-test", true).expect("mount"))
            .clone()
    }

    #[test]
    fn version_reads_with_offset() {
        let vol = procfs_volume();
        let full = render(PROC_VERSION).unwrap();

        let mut buf = [0u8; 256];
        let n = PROCFS.read(&vol, PROC_VERSION, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], full.as_bytes());

        let mut tail = [0u8; 256];
        let n = PROCFS.read(&vol, PROC_VERSION, 5, &mut tail).unwrap();
        assert_eq!(&tail[..n], &full.as_bytes()[5..]);

        // Reading past the end is EOF, not an error.
        assert_eq!(
            PROCFS.read(&vol, PROC_VERSION, 10_000, &mut buf).unwrap(),
            0
        );
    }

    #[test]
    fn writes_are_rejected() {
        let vol = procfs_volume();
        assert!(matches!(
            PROCFS.write(&vol, PROC_VERSION, 0, b"nope"),
            Err(FsError::ReadOnly)
        ));
    }

    #[test]
    fn lookup_maps_names_to_entry_ids() {
        let vol = procfs_volume();
        assert_eq!(
            PROCFS.lookup(&vol, vfs::ROOT_DIR_ID, "meminfo"),
            Ok((PROC_MEMINFO, false))
        );
        assert!(matches!(
            PROCFS.lookup(&vol, vfs::ROOT_DIR_ID, "nonsense"),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn file_info_reports_rendered_size() {
        let vol = procfs_volume();
        let info = PROCFS.get_file_info(&vol, PROC_CPUINFO).unwrap();
        assert_eq!(info.size, render(PROC_CPUINFO).unwrap().len() as u64);
        assert!(!info.is_dir);
    }

    #[test]
    fn uptime_renders_seconds() {
        let s = render(PROC_UPTIME).unwrap();
        assert!(s.contains('.'));
        assert!(s.ends_with('\n'));
    }
}
