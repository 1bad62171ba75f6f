//! Block devices: contract, registry, adapters, and byte-level I/O.
//!
//! Drivers hand the registry a `&'static dyn BlockDevice`; the registry
//! owns the entry for the lifetime of the system and entries are never
//! removed. The VFS layers above deal only in whole blocks through the
//! trait and use [`read_bytes`] / [`write_bytes`] when they need
//! byte-granular access (read-modify-write over whole blocks).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use planck_noalloc::vec::ArrayVec;
use sys7_core::sync::SpinLock;
use sys7_core::{kinfo, kprintln, kwarn};

/// Maximum number of registered block devices.
pub const BLOCK_MAX_DEVICES: usize = 16;

/// Block I/O failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The requested block lies beyond the device.
    OutOfRange,
    /// The device reported a hardware error.
    DeviceError,
    /// The buffer does not match the block size.
    InvalidBuffer,
    /// The device is not ready.
    NotReady,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => f.write_str("block out of range"),
            Self::DeviceError => f.write_str("device error"),
            Self::InvalidBuffer => f.write_str("invalid buffer size"),
            Self::NotReady => f.write_str("device not ready"),
        }
    }
}

/// Whole-block I/O contract provided by storage drivers.
pub trait BlockDevice: Send + Sync {
    /// Block size in bytes (typically 512 or 2048).
    fn block_size(&self) -> usize;

    /// Total number of blocks on the device.
    fn total_blocks(&self) -> u64;

    /// Reads one block into `buf` (`buf.len() >= block_size`).
    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<(), IoError>;

    /// Writes one block from `buf` (`buf.len() >= block_size`).
    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<(), IoError>;

    /// Flushes device caches.
    fn flush(&self) -> Result<(), IoError> {
        Ok(())
    }
}

/// Broad device categories used for registry listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDeviceKind {
    /// ATA/IDE disk.
    Ata,
    /// RAM-backed device.
    Memory,
    /// SCSI disk.
    Scsi,
    /// USB mass storage.
    Usb,
    /// Optical/ISO image.
    Iso,
    /// Synthetic device (partitions, loopbacks).
    Virtual,
}

impl BlockDeviceKind {
    /// Short name for listings.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ata => "ATA",
            Self::Memory => "MEMORY",
            Self::Scsi => "SCSI",
            Self::Usb => "USB",
            Self::Iso => "ISO",
            Self::Virtual => "VIRTUAL",
        }
    }
}

/// One registry slot.
#[derive(Clone)]
pub struct BlockDeviceEntry {
    /// The device; the registry borrows it for the system's lifetime.
    pub device: &'static dyn BlockDevice,
    /// Device category.
    pub kind: BlockDeviceKind,
    /// Registry name (e.g. `ata0`, `ram0`).
    pub name: String,
    /// Total size in bytes.
    pub total_size: u64,
    /// Removable media flag.
    pub removable: bool,
}

static REGISTRY: SpinLock<ArrayVec<BlockDeviceEntry, BLOCK_MAX_DEVICES>> =
    SpinLock::new(ArrayVec::new());

/// Registers a block device under `name`.
///
/// Duplicate registrations of the same device object and a full table are
/// rejected with `false`.
pub fn register(device: &'static dyn BlockDevice, kind: BlockDeviceKind, name: &str) -> bool {
    let mut registry = REGISTRY.lock();

    if registry.is_full() {
        kwarn!("block: registry full, rejecting '{name}'");
        return false;
    }
    let dev_ptr = core::ptr::from_ref(device).cast::<u8>();
    if registry
        .iter()
        .any(|e| core::ptr::from_ref(e.device).cast::<u8>() == dev_ptr)
    {
        kwarn!("block: device '{name}' already registered");
        return false;
    }

    let total_size = device.total_blocks() * device.block_size() as u64;
    registry.push(BlockDeviceEntry {
        device,
        kind,
        name: String::from(name),
        total_size,
        removable: false,
    });

    kinfo!(
        "block: registered {name} ({}, {} bytes, block {})",
        kind.name(),
        total_size,
        device.block_size()
    );
    true
}

/// Returns copies of all registry entries (up to `max`).
#[must_use]
pub fn enumerate(max: usize) -> Vec<BlockDeviceEntry> {
    REGISTRY.lock().iter().take(max).cloned().collect()
}

/// Looks up a device by registry name.
#[must_use]
pub fn get_by_name(name: &str) -> Option<BlockDeviceEntry> {
    REGISTRY.lock().iter().find(|e| e.name == name).cloned()
}

/// Looks up a device by registry index.
#[must_use]
pub fn get_by_index(index: usize) -> Option<BlockDeviceEntry> {
    REGISTRY.lock().as_slice().get(index).cloned()
}

/// Number of registered devices.
#[must_use]
pub fn count() -> usize {
    REGISTRY.lock().len()
}

/// Prints the registry.
pub fn list_devices() {
    let registry = REGISTRY.lock();
    kprintln!("block devices:");
    for e in registry.iter() {
        kprintln!(
            "  {:<8} {:<8} {:>12} bytes{}",
            e.name,
            e.kind.name(),
            e.total_size,
            if e.removable { " [removable]" } else { "" }
        );
    }
    if registry.is_empty() {
        kprintln!("  (none)");
    }
}

// ── Byte-level I/O over whole blocks ────────────────────────────────────

/// Reads `buf.len()` bytes starting at byte `offset`, sector-aligning
/// through a scratch block.
///
/// Returns the number of bytes read (short at end of device).
///
/// # Errors
///
/// Propagates device errors.
pub fn read_bytes(dev: &dyn BlockDevice, offset: u64, buf: &mut [u8]) -> Result<usize, IoError> {
    let bs = dev.block_size();
    let total = dev.total_blocks() * bs as u64;
    if offset >= total {
        return Ok(0);
    }

    let mut scratch = vec![0u8; bs];
    let mut done = 0usize;
    let end = total.min(offset + buf.len() as u64);

    let mut pos = offset;
    while pos < end {
        let lba = pos / bs as u64;
        let in_block = (pos % bs as u64) as usize;
        let take = (bs - in_block).min((end - pos) as usize);

        dev.read_block(lba, &mut scratch)?;
        buf[done..done + take].copy_from_slice(&scratch[in_block..in_block + take]);

        done += take;
        pos += take as u64;
    }

    Ok(done)
}

/// Writes `buf.len()` bytes at byte `offset` using read-modify-write on
/// partial blocks. Returns the number of bytes written (short at end of
/// device).
///
/// # Errors
///
/// Propagates device errors.
pub fn write_bytes(dev: &dyn BlockDevice, offset: u64, buf: &[u8]) -> Result<usize, IoError> {
    let bs = dev.block_size();
    let total = dev.total_blocks() * bs as u64;
    if offset >= total {
        return Ok(0);
    }

    let mut scratch = vec![0u8; bs];
    let mut done = 0usize;
    let end = total.min(offset + buf.len() as u64);

    let mut pos = offset;
    while pos < end {
        let lba = pos / bs as u64;
        let in_block = (pos % bs as u64) as usize;
        let take = (bs - in_block).min((end - pos) as usize);

        if take != bs {
            dev.read_block(lba, &mut scratch)?;
        }
        scratch[in_block..in_block + take].copy_from_slice(&buf[done..done + take]);
        dev.write_block(lba, &scratch)?;

        done += take;
        pos += take as u64;
    }

    Ok(done)
}

// ── Memory block device ─────────────────────────────────────────────────

/// RAM-backed block device with 512-byte blocks.
pub struct MemoryBlockDevice {
    data: SpinLock<Box<[u8]>>,
    block_size: usize,
}

impl MemoryBlockDevice {
    /// Wraps a byte buffer; the trailing partial block (if any) is
    /// inaccessible.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: SpinLock::new(data.into_boxed_slice()),
            block_size: 512,
        }
    }

    /// Copies out the backing bytes (test support).
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().to_vec()
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        (self.data.lock().len() / self.block_size) as u64
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<(), IoError> {
        if buf.len() < self.block_size {
            return Err(IoError::InvalidBuffer);
        }
        let data = self.data.lock();
        let start = lba as usize * self.block_size;
        if start + self.block_size > data.len() {
            return Err(IoError::OutOfRange);
        }
        buf[..self.block_size].copy_from_slice(&data[start..start + self.block_size]);
        Ok(())
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<(), IoError> {
        if buf.len() < self.block_size {
            return Err(IoError::InvalidBuffer);
        }
        let mut data = self.data.lock();
        let start = lba as usize * self.block_size;
        if start + self.block_size > data.len() {
            return Err(IoError::OutOfRange);
        }
        data[start..start + self.block_size].copy_from_slice(&buf[..self.block_size]);
        Ok(())
    }
}

/// Leaks a [`MemoryBlockDevice`] so it can live in the registry.
#[must_use]
pub fn create_memory_block_device(data: Vec<u8>) -> &'static MemoryBlockDevice {
    Box::leak(Box::new(MemoryBlockDevice::new(data)))
}

// ── Partition view ──────────────────────────────────────────────────────

/// A window onto a parent device, offsetting every LBA by the partition
/// start and bounding it by the partition length.
pub struct PartitionBlockDevice {
    parent: &'static dyn BlockDevice,
    start_lba: u64,
    num_blocks: u64,
}

impl PartitionBlockDevice {
    /// Creates a partition view.
    #[must_use]
    pub fn new(parent: &'static dyn BlockDevice, start_lba: u64, num_blocks: u64) -> Self {
        Self {
            parent,
            start_lba,
            num_blocks,
        }
    }
}

impl BlockDevice for PartitionBlockDevice {
    fn block_size(&self) -> usize {
        self.parent.block_size()
    }

    fn total_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<(), IoError> {
        if lba >= self.num_blocks {
            return Err(IoError::OutOfRange);
        }
        self.parent.read_block(self.start_lba + lba, buf)
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<(), IoError> {
        if lba >= self.num_blocks {
            return Err(IoError::OutOfRange);
        }
        self.parent.write_block(self.start_lba + lba, buf)
    }

    fn flush(&self) -> Result<(), IoError> {
        self.parent.flush()
    }
}

// ── ATA adapter ─────────────────────────────────────────────────────────

/// Sector-level contract the platform ATA driver exposes.
pub trait RawSectorDevice: Send + Sync {
    /// Reads `count` 512-byte sectors starting at `lba`.
    fn read_sectors(&self, lba: u32, count: u8, buf: &mut [u8]) -> Result<(), IoError>;

    /// Writes `count` 512-byte sectors starting at `lba`.
    fn write_sectors(&self, lba: u32, count: u8, buf: &[u8]) -> Result<(), IoError>;

    /// Total sectors on the device.
    fn sector_count(&self) -> u64;
}

/// Adapts a platform [`RawSectorDevice`] to the [`BlockDevice`] contract.
pub struct AtaBlockDevice {
    ctrl: &'static dyn RawSectorDevice,
}

impl AtaBlockDevice {
    /// Wraps a platform ATA device.
    #[must_use]
    pub fn new(ctrl: &'static dyn RawSectorDevice) -> Self {
        Self { ctrl }
    }
}

impl BlockDevice for AtaBlockDevice {
    fn block_size(&self) -> usize {
        512
    }

    fn total_blocks(&self) -> u64 {
        self.ctrl.sector_count()
    }

    fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<(), IoError> {
        let lba = u32::try_from(lba).map_err(|_| IoError::OutOfRange)?;
        self.ctrl.read_sectors(lba, 1, buf)
    }

    fn write_block(&self, lba: u64, buf: &[u8]) -> Result<(), IoError> {
        let lba = u32::try_from(lba).map_err(|_| IoError::OutOfRange)?;
        self.ctrl.write_sectors(lba, 1, buf)
    }
}
