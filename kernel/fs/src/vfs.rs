//! VFS core: filesystem-driver registry, volume table, and the
//! probe-then-mount pipeline.
//!
//! Drivers register a `&'static dyn FileSystemOps`. Mounting probes every
//! registered driver against the block device; the first driver that
//! recognizes it wins and its `mount` produces per-volume private state.
//! A volume can instead be backed by a user-space filesystem daemon, in
//! which case every operation round-trips the [`daemon`](crate::daemon)
//! bridge.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicU32, Ordering};

use planck_noalloc::vec::ArrayVec;
use sys7_core::id::VolumeId;
use sys7_core::sync::SpinLock;
use sys7_core::{kerr, kinfo, kprintln};

use crate::block::BlockDevice;
use crate::{FileInfo, FsError, daemon};

/// Maximum registered filesystem drivers.
pub const VFS_MAX_FILESYSTEMS: usize = 8;

/// Maximum mounted volumes.
pub const VFS_MAX_VOLUMES: usize = 16;

/// Directory id conventionally denoting a volume's root.
pub const ROOT_DIR_ID: u64 = 0;

/// Per-volume driver state; drivers downcast it back in their methods.
pub type FsPrivate = Box<dyn Any + Send + Sync>;

/// Callback for directory enumeration: `(name, entry_id, is_dir)`;
/// returning `false` stops the walk.
pub type EnumerateCallback<'a> = &'a mut dyn FnMut(&str, u64, bool) -> bool;

/// Contract every in-kernel filesystem driver satisfies.
///
/// `file_id`s are opaque 64-bit values whose interpretation is private to
/// the driver (catalog node id, inode number, cluster, ...).
pub trait FileSystemOps: Send + Sync {
    /// Driver name, e.g. `"HFS"`.
    fn fs_name(&self) -> &'static str;

    /// Driver version.
    fn fs_version(&self) -> u32 {
        1
    }

    /// Returns `true` when the device carries this filesystem.
    fn probe(&self, dev: &dyn BlockDevice) -> bool;

    /// Builds per-volume private state from the device.
    ///
    /// # Errors
    ///
    /// Any [`FsError`]; the mount pipeline releases the volume slot.
    fn mount(&self, dev: &dyn BlockDevice) -> Result<FsPrivate, FsError>;

    /// Tears down per-volume state.
    fn unmount(&self, _vol: &Volume) {}

    /// Reads from a file, returning bytes read.
    ///
    /// # Errors
    ///
    /// Any [`FsError`].
    fn read(&self, vol: &Volume, file_id: u64, offset: u64, buf: &mut [u8])
    -> Result<usize, FsError>;

    /// Writes to a file, returning bytes written.
    ///
    /// # Errors
    ///
    /// [`FsError::ReadOnly`] unless the driver supports writes.
    fn write(
        &self,
        _vol: &Volume,
        _file_id: u64,
        _offset: u64,
        _buf: &[u8],
    ) -> Result<usize, FsError> {
        Err(FsError::ReadOnly)
    }

    /// Enumerates a directory through `cb`.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn enumerate(
        &self,
        _vol: &Volume,
        _dir_id: u64,
        _cb: EnumerateCallback<'_>,
    ) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Finds `name` in directory `dir_id`, returning `(entry_id, is_dir)`.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] when absent.
    fn lookup(&self, vol: &Volume, dir_id: u64, name: &str) -> Result<(u64, bool), FsError>;

    /// Returns `(total_bytes, free_bytes)`.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn get_stats(&self, _vol: &Volume) -> Result<(u64, u64), FsError> {
        Err(FsError::NotSupported)
    }

    /// Returns metadata for one entry.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn get_file_info(&self, _vol: &Volume, _file_id: u64) -> Result<FileInfo, FsError> {
        Err(FsError::NotSupported)
    }

    // Optional operations; read-only drivers leave the defaults.

    /// Creates a fresh filesystem on the device.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn format(&self, _dev: &dyn BlockDevice, _volume_name: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Creates a directory, returning its id.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn mkdir(&self, _vol: &Volume, _parent: u64, _name: &str) -> Result<u64, FsError> {
        Err(FsError::NotSupported)
    }

    /// Creates a file, returning its id.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn create_file(&self, _vol: &Volume, _parent: u64, _name: &str) -> Result<u64, FsError> {
        Err(FsError::NotSupported)
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn delete(&self, _vol: &Volume, _entry_id: u64) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Renames an entry.
    ///
    /// # Errors
    ///
    /// [`FsError::NotSupported`] by default.
    fn rename(&self, _vol: &Volume, _entry_id: u64, _new_name: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }
}

/// What serves a volume's operations.
pub enum VolumeBacking {
    /// An in-kernel driver.
    Kernel(&'static dyn FileSystemOps),
    /// A user-space daemon, addressed by name through the FSD bridge.
    Daemon(String),
}

/// A mounted filesystem instance.
pub struct Volume {
    name: String,
    id: VolumeId,
    backing: VolumeBacking,
    dev: Option<&'static dyn BlockDevice>,
    fs_private: Option<FsPrivate>,
    read_only: bool,
}

impl Volume {
    /// Volume name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Volume id.
    #[must_use]
    pub fn id(&self) -> VolumeId {
        self.id
    }

    /// Name of the serving filesystem (driver or daemon).
    #[must_use]
    pub fn fs_name(&self) -> &str {
        match &self.backing {
            VolumeBacking::Kernel(ops) => ops.fs_name(),
            VolumeBacking::Daemon(name) => name,
        }
    }

    /// The block device, when one backs this volume.
    #[must_use]
    pub fn block_device(&self) -> Option<&'static dyn BlockDevice> {
        self.dev
    }

    /// Downcasts the driver's private state.
    #[must_use]
    pub fn private<T: 'static>(&self) -> Option<&T> {
        self.fs_private.as_ref()?.downcast_ref::<T>()
    }

    /// Whether the volume was mounted read-only.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }
}

struct VfsState {
    filesystems: ArrayVec<&'static dyn FileSystemOps, VFS_MAX_FILESYSTEMS>,
    volumes: [Option<Arc<Volume>>; VFS_MAX_VOLUMES],
    next_volume_id: u32,
}

static VFS: SpinLock<VfsState> = SpinLock::new(VfsState {
    filesystems: ArrayVec::new(),
    volumes: [const { None }; VFS_MAX_VOLUMES],
    next_volume_id: 1,
});

/// Registers a filesystem driver. Duplicate names and a full table are
/// rejected with `false`.
pub fn register_filesystem(ops: &'static dyn FileSystemOps) -> bool {
    let mut vfs = VFS.lock();
    if vfs.filesystems.is_full() {
        kerr!("vfs: driver table full, rejecting '{}'", ops.fs_name());
        return false;
    }
    if vfs.filesystems.iter().any(|f| f.fs_name() == ops.fs_name()) {
        kerr!("vfs: driver '{}' already registered", ops.fs_name());
        return false;
    }
    kinfo!(
        "vfs: registered driver {} (version {})",
        ops.fs_name(),
        ops.fs_version()
    );
    vfs.filesystems.push(ops);
    true
}

fn probe_filesystems(dev: &'static dyn BlockDevice) -> Option<&'static dyn FileSystemOps> {
    let drivers: Vec<&'static dyn FileSystemOps> =
        VFS.lock().filesystems.iter().copied().collect();
    drivers.into_iter().find(|ops| ops.probe(dev))
}

fn alloc_slot(
    vfs: &mut VfsState,
    name: Option<&str>,
    backing: VolumeBacking,
    dev: Option<&'static dyn BlockDevice>,
    fs_private: Option<FsPrivate>,
    read_only: bool,
) -> Result<(usize, Arc<Volume>), FsError> {
    let slot = vfs
        .volumes
        .iter()
        .position(Option::is_none)
        .ok_or(FsError::TableFull)?;

    let id = VolumeId::new(vfs.next_volume_id);
    vfs.next_volume_id += 1;

    let name = match name {
        Some(n) => String::from(n),
        None => format!("Volume_{id}"),
    };

    let volume = Arc::new(Volume {
        name,
        id,
        backing,
        dev,
        fs_private,
        read_only,
    });
    vfs.volumes[slot] = Some(volume.clone());
    Ok((slot, volume))
}

/// Mounts a block device: probe registered drivers, allocate a volume
/// slot, and run the winning driver's `mount`.
///
/// # Errors
///
/// [`FsError::NotFound`] when no driver recognizes the device,
/// [`FsError::TableFull`] when the volume table is exhausted, or the
/// driver's own mount error (the slot is released).
pub fn mount(dev: &'static dyn BlockDevice, name: Option<&str>) -> Result<Arc<Volume>, FsError> {
    let ops = probe_filesystems(dev).ok_or_else(|| {
        kerr!("vfs: no filesystem detected on device");
        FsError::NotFound
    })?;

    let fs_private = ops.mount(dev)?;

    let volume = {
        let mut vfs = VFS.lock();
        let (_, volume) = alloc_slot(
            &mut vfs,
            name,
            VolumeBacking::Kernel(ops),
            Some(dev),
            Some(fs_private),
            false,
        )?;
        volume
    };

    kinfo!(
        "vfs: mounted '{}' (type {}, id {})",
        volume.name(),
        volume.fs_name(),
        volume.id()
    );
    Ok(volume)
}

/// Mounts a volume served by a registered filesystem daemon.
///
/// # Errors
///
/// [`FsError::NotFound`] when the daemon is not registered;
/// [`FsError::TableFull`] when the volume table is exhausted.
pub fn mount_daemon(daemon_name: &str, volume_name: &str) -> Result<Arc<Volume>, FsError> {
    if !daemon::is_registered(daemon_name) {
        return Err(FsError::NotFound);
    }

    let volume = {
        let mut vfs = VFS.lock();
        let (_, volume) = alloc_slot(
            &mut vfs,
            Some(volume_name),
            VolumeBacking::Daemon(String::from(daemon_name)),
            None,
            None,
            false,
        )?;
        volume
    };

    kinfo!("vfs: mounted '{volume_name}' via daemon {daemon_name}");
    Ok(volume)
}

/// Registers a virtual filesystem (no block device, no probe) as a
/// volume.
///
/// # Errors
///
/// [`FsError::TableFull`] when the volume table is exhausted.
pub fn mount_virtual(
    ops: &'static dyn FileSystemOps,
    name: &str,
    read_only: bool,
) -> Result<Arc<Volume>, FsError> {
    let mut vfs = VFS.lock();
    let (_, volume) = alloc_slot(
        &mut vfs,
        Some(name),
        VolumeBacking::Kernel(ops),
        None,
        None,
        read_only,
    )?;
    Ok(volume)
}

/// Unmounts a volume: runs the driver's unmount and clears the slot.
///
/// # Errors
///
/// [`FsError::NotFound`] for an unknown id.
pub fn unmount(id: VolumeId) -> Result<(), FsError> {
    let volume = {
        let mut vfs = VFS.lock();
        let slot = vfs
            .volumes
            .iter()
            .position(|v| v.as_ref().is_some_and(|v| v.id == id))
            .ok_or(FsError::NotFound)?;
        vfs.volumes[slot].take().ok_or(FsError::NotFound)?
    };

    if let VolumeBacking::Kernel(ops) = &volume.backing {
        ops.unmount(&volume);
    }
    kinfo!("vfs: unmounted '{}'", volume.name());
    Ok(())
}

/// Looks up a mounted volume by id.
#[must_use]
pub fn get_volume_by_id(id: VolumeId) -> Option<Arc<Volume>> {
    VFS.lock()
        .volumes
        .iter()
        .flatten()
        .find(|v| v.id == id)
        .cloned()
}

/// Looks up a mounted volume by name.
#[must_use]
pub fn get_volume_by_name(name: &str) -> Option<Arc<Volume>> {
    VFS.lock()
        .volumes
        .iter()
        .flatten()
        .find(|v| v.name == name)
        .cloned()
}

/// Prints all mounted volumes.
pub fn list_volumes() {
    let volumes: Vec<Arc<Volume>> = VFS.lock().volumes.iter().flatten().cloned().collect();
    kprintln!("mounted volumes:");
    if volumes.is_empty() {
        kprintln!("  (none)");
        return;
    }
    for v in volumes {
        let (total, free) = get_stats(&v).unwrap_or((0, 0));
        kprintln!(
            "  [{}] {} ({}) - {} bytes ({} free){}",
            v.id(),
            v.name(),
            v.fs_name(),
            total,
            free,
            if v.read_only() { " [RO]" } else { "" }
        );
    }
}

// ── Operation routing (in-kernel driver or daemon bridge) ───────────────

/// Reads from a file on `vol`.
///
/// # Errors
///
/// Any [`FsError`] from the driver or the daemon bridge.
pub fn read_file(vol: &Volume, file_id: u64, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
    match &vol.backing {
        VolumeBacking::Kernel(ops) => ops.read(vol, file_id, offset, buf),
        VolumeBacking::Daemon(name) => daemon::read_file(name, file_id, offset, buf),
    }
}

/// Writes to a file on `vol`.
///
/// # Errors
///
/// [`FsError::ReadOnly`] on read-only volumes, plus driver/bridge errors.
pub fn write_file(vol: &Volume, file_id: u64, offset: u64, buf: &[u8]) -> Result<usize, FsError> {
    if vol.read_only {
        return Err(FsError::ReadOnly);
    }
    match &vol.backing {
        VolumeBacking::Kernel(ops) => ops.write(vol, file_id, offset, buf),
        VolumeBacking::Daemon(name) => daemon::write_file(name, file_id, offset, buf),
    }
}

/// Enumerates a directory on `vol`.
///
/// # Errors
///
/// Any [`FsError`] from the driver or the daemon bridge.
pub fn enumerate(vol: &Volume, dir_id: u64, cb: EnumerateCallback<'_>) -> Result<(), FsError> {
    match &vol.backing {
        VolumeBacking::Kernel(ops) => ops.enumerate(vol, dir_id, cb),
        VolumeBacking::Daemon(name) => {
            for entry in daemon::list_dir(name, dir_id)? {
                if !cb(&entry.name, entry.id, entry.is_dir) {
                    break;
                }
            }
            Ok(())
        }
    }
}

/// Looks up `name` under `dir_id` on `vol`.
///
/// # Errors
///
/// Any [`FsError`] from the driver or the daemon bridge.
pub fn lookup(vol: &Volume, dir_id: u64, name: &str) -> Result<(u64, bool), FsError> {
    match &vol.backing {
        VolumeBacking::Kernel(ops) => ops.lookup(vol, dir_id, name),
        VolumeBacking::Daemon(daemon_name) => daemon::lookup(daemon_name, dir_id, name),
    }
}

/// Returns `(total_bytes, free_bytes)` for `vol`.
///
/// # Errors
///
/// Any [`FsError`] from the driver or the daemon bridge.
pub fn get_stats(vol: &Volume) -> Result<(u64, u64), FsError> {
    match &vol.backing {
        VolumeBacking::Kernel(ops) => ops.get_stats(vol),
        VolumeBacking::Daemon(name) => daemon::get_stats(name),
    }
}

/// Returns metadata for one entry on `vol`.
///
/// # Errors
///
/// Any [`FsError`] from the driver or the daemon bridge.
pub fn get_file_info(vol: &Volume, file_id: u64) -> Result<FileInfo, FsError> {
    match &vol.backing {
        VolumeBacking::Kernel(ops) => ops.get_file_info(vol, file_id),
        VolumeBacking::Daemon(name) => daemon::get_file_info(name, file_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDeviceKind, create_memory_block_device, register};

    /// Driver that recognizes devices whose first byte is a magic value.
    struct MagicFs {
        magic: u8,
        name: &'static str,
    }

    impl FileSystemOps for MagicFs {
        fn fs_name(&self) -> &'static str {
            self.name
        }

        fn probe(&self, dev: &dyn BlockDevice) -> bool {
            let mut block = [0u8; 512];
            dev.read_block(0, &mut block).is_ok() && block[0] == self.magic
        }

        fn mount(&self, _dev: &dyn BlockDevice) -> Result<FsPrivate, FsError> {
            Ok(Box::new(()))
        }

        fn read(
            &self,
            _vol: &Volume,
            _file_id: u64,
            _offset: u64,
            _buf: &mut [u8],
        ) -> Result<usize, FsError> {
            Ok(0)
        }

        fn lookup(&self, _vol: &Volume, _dir_id: u64, _name: &str) -> Result<(u64, bool), FsError> {
            Err(FsError::NotFound)
        }

        fn get_stats(&self, _vol: &Volume) -> Result<(u64, u64), FsError> {
            Ok((4096, 1024))
        }
    }

    static MAGIC_A: MagicFs = MagicFs {
        magic: 0xA1,
        name: "magicA",
    };
    static MAGIC_B: MagicFs = MagicFs {
        magic: 0xB2,
        name: "magicB",
    };

    fn image_with_magic(magic: u8) -> Vec<u8> {
        let mut image = vec![0u8; 4 * 512];
        image[0] = magic;
        image
    }

    #[test]
    fn probe_first_match_wins_and_mount_assigns_ids() {
        register_filesystem(&MAGIC_A);
        register_filesystem(&MAGIC_B);

        let dev_a = create_memory_block_device(image_with_magic(0xA1));
        let dev_b = create_memory_block_device(image_with_magic(0xB2));
        register(dev_a, BlockDeviceKind::Memory, "vfs-ram-a");
        register(dev_b, BlockDeviceKind::Memory, "vfs-ram-b");

        let vol_a = mount(dev_a, Some("VOLA")).expect("mount A");
        let vol_b = mount(dev_b, Some("VOLB")).expect("mount B");

        assert_eq!(vol_a.fs_name(), "magicA");
        assert_eq!(vol_b.fs_name(), "magicB");
        assert!(vol_b.id().as_u32() > vol_a.id().as_u32());

        assert!(get_volume_by_name("VOLA").is_some());
        assert!(get_volume_by_id(vol_b.id()).is_some());

        unmount(vol_a.id()).unwrap();
        unmount(vol_b.id()).unwrap();
        assert!(get_volume_by_name("VOLA").is_none());
    }

    #[test]
    fn mount_unknown_filesystem_fails() {
        register_filesystem(&MAGIC_A);
        let dev = create_memory_block_device(image_with_magic(0x00));
        assert!(matches!(mount(dev, None), Err(FsError::NotFound)));
    }

    #[test]
    fn duplicate_driver_name_rejected() {
        static DUP: MagicFs = MagicFs {
            magic: 0xC3,
            name: "dupfs",
        };
        static DUP2: MagicFs = MagicFs {
            magic: 0xC4,
            name: "dupfs",
        };
        assert!(register_filesystem(&DUP));
        assert!(!register_filesystem(&DUP2));
    }

    #[test]
    fn stats_route_through_driver() {
        register_filesystem(&MAGIC_A);
        let dev = create_memory_block_device(image_with_magic(0xA1));
        let vol = mount(dev, Some("STATVOL")).expect("mount");
        assert_eq!(get_stats(&vol), Ok((4096, 1024)));
        unmount(vol.id()).unwrap();
    }
}
