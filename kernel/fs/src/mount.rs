//! The unified mount table.
//!
//! One table binds paths to local volumes, network drivers, and virtual
//! filesystems. Path resolution asks for the entry whose mount point is
//! the longest proper prefix of the path (`/dev` matches `/dev/null` but
//! not `/device`; the root mount matches everything).

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;
use sys7_core::id::VolumeId;
use sys7_core::sync::SpinLock;
use sys7_core::{kerr, kinfo, kprintln};

use crate::FsError;
use crate::netfs::VfsNetDriver;

/// Maximum mount entries.
pub const VFS_MOUNT_MAX: usize = 32;

bitflags! {
    /// Mount entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        /// Writes are rejected at the mount layer.
        const RDONLY = 0x1;
        /// Backed by a network filesystem driver.
        const NETWORK = 0x2;
        /// Virtual filesystem (no block device).
        const VIRTUAL = 0x4;
    }
}

/// What serves the files under a mount point.
#[derive(Clone, Copy)]
pub enum MountBacking {
    /// A volume in the VFS volume table (local or virtual).
    Volume(VolumeId),
    /// A network filesystem driver.
    Net(&'static dyn VfsNetDriver),
}

/// One mount table entry.
#[derive(Clone)]
pub struct MountEntry {
    /// Absolute path the namespace is attached under.
    pub mount_point: String,
    /// Device, daemon, or remote the mount came from.
    pub source: String,
    /// Filesystem type string (e.g. `HFS`, `proc`, `webdav`).
    pub fs_type: String,
    /// Entry flags.
    pub flags: MountFlags,
    /// Operation target.
    pub backing: MountBacking,
}

/// Mount table with longest-prefix path lookup.
pub struct MountTable {
    entries: [Option<MountEntry>; VFS_MOUNT_MAX],
    count: usize,
}

impl MountTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [const { None }; VFS_MOUNT_MAX],
            count: 0,
        }
    }

    /// Adds an entry. Duplicate mount points and a full table are
    /// rejected.
    ///
    /// # Errors
    ///
    /// [`FsError::AlreadyExists`] or [`FsError::TableFull`].
    pub fn add(&mut self, entry: MountEntry) -> Result<(), FsError> {
        if self.find_by_mount_point(&entry.mount_point).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .entries
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TableFull)?;
        self.entries[slot] = Some(entry);
        self.count += 1;
        Ok(())
    }

    /// Removes the entry at `mount_point`.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] for an unknown mount point.
    pub fn remove(&mut self, mount_point: &str) -> Result<(), FsError> {
        for slot in &mut self.entries {
            if slot
                .as_ref()
                .is_some_and(|e| e.mount_point == mount_point)
            {
                *slot = None;
                self.count -= 1;
                return Ok(());
            }
        }
        Err(FsError::NotFound)
    }

    /// Longest-proper-prefix lookup: among active entries whose mount
    /// point is a prefix of `path` followed by end-of-string or `/`,
    /// returns the longest.
    #[must_use]
    pub fn find_by_path(&self, path: &str) -> Option<MountEntry> {
        let mut best: Option<&MountEntry> = None;
        for entry in self.entries.iter().flatten() {
            let mp = entry.mount_point.as_str();
            let matches = if mp == "/" {
                path.starts_with('/')
            } else {
                path == mp
                    || (path.starts_with(mp) && path.as_bytes().get(mp.len()) == Some(&b'/'))
            };
            if matches && best.is_none_or(|b| mp.len() > b.mount_point.len()) {
                best = Some(entry);
            }
        }
        best.cloned()
    }

    /// Exact mount-point lookup.
    #[must_use]
    pub fn find_by_mount_point(&self, mount_point: &str) -> Option<MountEntry> {
        self.entries
            .iter()
            .flatten()
            .find(|e| e.mount_point == mount_point)
            .cloned()
    }

    /// Active entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no entries are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `(total, local, network, virtual)` entry counts.
    #[must_use]
    pub fn stats(&self) -> (usize, usize, usize, usize) {
        let mut local = 0;
        let mut network = 0;
        let mut virt = 0;
        for e in self.entries.iter().flatten() {
            if e.flags.contains(MountFlags::NETWORK) {
                network += 1;
            } else if e.flags.contains(MountFlags::VIRTUAL) {
                virt += 1;
            } else {
                local += 1;
            }
        }
        (self.count, local, network, virt)
    }

    /// Copies out every active entry.
    #[must_use]
    pub fn entries(&self) -> Vec<MountEntry> {
        self.entries.iter().flatten().cloned().collect()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

static MOUNTS: SpinLock<MountTable> = SpinLock::new(MountTable::new());

/// Adds an entry to the global mount table.
///
/// # Errors
///
/// See [`MountTable::add`].
pub fn add(
    source: &str,
    mount_point: &str,
    fs_type: &str,
    flags: MountFlags,
    backing: MountBacking,
) -> Result<(), FsError> {
    let result = MOUNTS.lock().add(MountEntry {
        mount_point: String::from(mount_point),
        source: String::from(source),
        fs_type: String::from(fs_type),
        flags,
        backing,
    });
    match &result {
        Ok(()) => kinfo!("mount: {source} on {mount_point} type {fs_type} ({flags:?})"),
        Err(e) => kerr!("mount: {source} on {mount_point} failed: {e}"),
    }
    result
}

/// Removes an entry from the global mount table.
///
/// # Errors
///
/// See [`MountTable::remove`].
pub fn remove(mount_point: &str) -> Result<(), FsError> {
    MOUNTS.lock().remove(mount_point)
}

/// Longest-prefix lookup in the global mount table.
#[must_use]
pub fn find_by_path(path: &str) -> Option<MountEntry> {
    MOUNTS.lock().find_by_path(path)
}

/// Exact lookup in the global mount table.
#[must_use]
pub fn find_by_mount_point(mount_point: &str) -> Option<MountEntry> {
    MOUNTS.lock().find_by_mount_point(mount_point)
}

/// `(total, local, network, virtual)` counts for the global table.
#[must_use]
pub fn stats() -> (usize, usize, usize, usize) {
    MOUNTS.lock().stats()
}

/// Copies out the global table's entries.
#[must_use]
pub fn entries() -> Vec<MountEntry> {
    MOUNTS.lock().entries()
}

/// Prints the global mount table.
pub fn list_mounts() {
    let entries = entries();
    kprintln!("mount table:");
    if entries.is_empty() {
        kprintln!("  (no mounts)");
        return;
    }
    for e in entries {
        let kind = if e.flags.contains(MountFlags::NETWORK) {
            "network"
        } else if e.flags.contains(MountFlags::VIRTUAL) {
            "virtual"
        } else {
            "local"
        };
        kprintln!(
            "  {} on {} type {} ({kind}){}",
            e.source,
            e.mount_point,
            e.fs_type,
            if e.flags.contains(MountFlags::RDONLY) {
                " [RO]"
            } else {
                ""
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mount_point: &str) -> MountEntry {
        MountEntry {
            mount_point: String::from(mount_point),
            source: String::from("src"),
            fs_type: String::from("test"),
            flags: MountFlags::empty(),
            backing: MountBacking::Volume(VolumeId::new(1)),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let mut t = MountTable::new();
        t.add(entry("/")).unwrap();
        t.add(entry("/Volumes")).unwrap();
        t.add(entry("/Volumes/BOOT")).unwrap();

        let hit = t.find_by_path("/Volumes/BOOT/System/X").expect("match");
        assert_eq!(hit.mount_point, "/Volumes/BOOT");
    }

    #[test]
    fn prefix_must_be_proper() {
        let mut t = MountTable::new();
        t.add(entry("/dev")).unwrap();
        assert!(t.find_by_path("/dev/null").is_some());
        assert!(t.find_by_path("/dev").is_some());
        assert!(t.find_by_path("/device").is_none());
    }

    #[test]
    fn root_matches_everything() {
        let mut t = MountTable::new();
        t.add(entry("/")).unwrap();
        assert_eq!(
            t.find_by_path("/anything/at/all").unwrap().mount_point,
            "/"
        );
    }

    #[test]
    fn duplicate_mount_point_rejected() {
        let mut t = MountTable::new();
        t.add(entry("/proc")).unwrap();
        assert_eq!(t.add(entry("/proc")), Err(FsError::AlreadyExists));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_frees_the_slot() {
        let mut t = MountTable::new();
        t.add(entry("/proc")).unwrap();
        t.remove("/proc").unwrap();
        assert!(t.find_by_mount_point("/proc").is_none());
        assert_eq!(t.remove("/proc"), Err(FsError::NotFound));
        t.add(entry("/proc")).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn stats_count_by_kind() {
        let mut t = MountTable::new();
        t.add(entry("/Volumes/A")).unwrap();
        let mut virt = entry("/proc");
        virt.flags = MountFlags::VIRTUAL | MountFlags::RDONLY;
        t.add(virt).unwrap();

        let (total, local, network, virtual_) = t.stats();
        assert_eq!((total, local, network, virtual_), (2, 1, 0, 1));
    }

    #[test]
    fn table_full_is_reported() {
        let mut t = MountTable::new();
        for i in 0..VFS_MOUNT_MAX {
            t.add(entry(&alloc::format!("/m{i}"))).unwrap();
        }
        assert_eq!(t.add(entry("/overflow")), Err(FsError::TableFull));
    }
}
