//! Boot-time filesystem autodetection.
//!
//! For every registered block device: parse sector 0 as an MBR; when the
//! signature checks out, probe-and-mount each valid partition as its own
//! device named `<dev>p<n>`; otherwise try the raw device. Individual
//! mount failures are logged and skipped.

use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;

use sys7_core::{kdebug, kinfo, kwarn};

use crate::block::{self, BlockDevice, BlockDeviceEntry, BlockDeviceKind, PartitionBlockDevice};
use crate::vfs;

/// MBR boot signature at bytes 510..512.
pub const MBR_SIGNATURE: u16 = 0xAA55;

const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;

/// One MBR partition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrPartition {
    /// Bootable flag byte.
    pub boot_indicator: u8,
    /// Partition type code.
    pub type_code: u8,
    /// First LBA of the partition.
    pub start_lba: u32,
    /// Partition length in sectors.
    pub num_sectors: u32,
}

impl MbrPartition {
    /// A partition is usable when it has a type and a size.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.type_code != 0 && self.num_sectors != 0
    }
}

/// Parsed MBR partition table.
#[derive(Debug, Clone, Copy)]
pub struct Mbr {
    /// The four primary partition records.
    pub partitions: [MbrPartition; 4],
}

impl Mbr {
    /// Parses a 512-byte sector; `None` without the boot signature.
    #[must_use]
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if sector.len() < 512 {
            return None;
        }
        let signature = u16::from_le_bytes([sector[510], sector[511]]);
        if signature != MBR_SIGNATURE {
            return None;
        }

        let mut partitions = [MbrPartition {
            boot_indicator: 0,
            type_code: 0,
            start_lba: 0,
            num_sectors: 0,
        }; 4];

        for (i, part) in partitions.iter_mut().enumerate() {
            let base = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            let entry = &sector[base..base + PARTITION_ENTRY_SIZE];
            *part = MbrPartition {
                boot_indicator: entry[0],
                type_code: entry[4],
                start_lba: u32::from_le_bytes(entry[8..12].try_into().ok()?),
                num_sectors: u32::from_le_bytes(entry[12..16].try_into().ok()?),
            };
        }

        Some(Self { partitions })
    }
}

/// Human-readable partition type for recognized codes. Unknown types are
/// still probed.
#[must_use]
pub fn partition_type_name(type_code: u8) -> &'static str {
    match type_code {
        0x00 => "Empty",
        0x05 => "Extended",
        0x06 => "FAT16",
        0x07 => "NTFS",
        0x0B => "FAT32",
        0x0C => "FAT32-LBA",
        0x0E => "FAT16-LBA",
        0x83 => "Linux",
        0xAF => "HFS",
        _ => "Unknown",
    }
}

fn read_mbr(dev: &dyn BlockDevice) -> Option<Mbr> {
    let mut sector = alloc::vec![0u8; dev.block_size().max(512)];
    dev.read_block(0, &mut sector).ok()?;
    Mbr::parse(&sector[..512])
}

/// Probes one registered device, mounting whatever filesystems are
/// found. Returns the number of volumes mounted.
pub fn probe_device(entry: &BlockDeviceEntry) -> usize {
    kinfo!("automount: probing {}", entry.name);

    let Some(mbr) = read_mbr(entry.device) else {
        // No partition table; the whole device may be a filesystem.
        kdebug!("automount: no MBR on {}, trying raw mount", entry.name);
        return match vfs::mount(entry.device, Some(&entry.name)) {
            Ok(_) => 1,
            Err(e) => {
                kwarn!("automount: raw mount of {} failed: {e}", entry.name);
                0
            }
        };
    };

    let mut mounted = 0;
    for (i, part) in mbr.partitions.iter().enumerate() {
        if !part.is_valid() {
            continue;
        }

        let part_name = format!("{}p{}", entry.name, i + 1);
        kinfo!(
            "automount: partition {}: type {:#04x} ({}), start {}, {} sectors",
            i + 1,
            part.type_code,
            partition_type_name(part.type_code),
            part.start_lba,
            part.num_sectors
        );

        let part_dev: &'static PartitionBlockDevice = Box::leak(Box::new(
            PartitionBlockDevice::new(entry.device, u64::from(part.start_lba), u64::from(part.num_sectors)),
        ));
        block::register(part_dev, BlockDeviceKind::Virtual, &part_name);

        match vfs::mount(part_dev, Some(&part_name)) {
            Ok(_) => mounted += 1,
            Err(e) => kwarn!("automount: mount of {part_name} failed: {e}"),
        }
    }
    mounted
}

/// Probes every registered block device and mounts what it can.
pub fn autodetect_mount() {
    kinfo!("automount: starting filesystem detection");

    let devices: Vec<BlockDeviceEntry> = block::enumerate(block::BLOCK_MAX_DEVICES);
    if devices.is_empty() {
        kwarn!("automount: no block devices registered");
        return;
    }

    let mut mounted = 0;
    for entry in &devices {
        mounted += probe_device(entry);
    }

    kinfo!("automount: complete, {mounted} volume(s) mounted");
    vfs::list_volumes();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::create_memory_block_device;
    use crate::hfs::{self, HFS};

    fn mbr_sector(partitions: &[(u8, u32, u32)]) -> [u8; 512] {
        let mut sector = [0u8; 512];
        for (i, &(type_code, start, len)) in partitions.iter().enumerate() {
            let base = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            sector[base + 4] = type_code;
            sector[base + 8..base + 12].copy_from_slice(&start.to_le_bytes());
            sector[base + 12..base + 16].copy_from_slice(&len.to_le_bytes());
        }
        sector[510..512].copy_from_slice(&MBR_SIGNATURE.to_le_bytes());
        sector
    }

    #[test]
    fn parse_requires_signature() {
        let mut sector = mbr_sector(&[(0x83, 100, 50)]);
        assert!(Mbr::parse(&sector).is_some());
        sector[510] = 0;
        assert!(Mbr::parse(&sector).is_none());
    }

    #[test]
    fn parse_reads_little_endian_fields() {
        let sector = mbr_sector(&[(0xAF, 2048, 4096), (0x0B, 8192, 1024)]);
        let mbr = Mbr::parse(&sector).unwrap();
        assert_eq!(mbr.partitions[0].type_code, 0xAF);
        assert_eq!(mbr.partitions[0].start_lba, 2048);
        assert_eq!(mbr.partitions[0].num_sectors, 4096);
        assert_eq!(mbr.partitions[1].type_code, 0x0B);
        assert!(!mbr.partitions[2].is_valid());
    }

    #[test]
    fn recognized_type_names() {
        assert_eq!(partition_type_name(0xAF), "HFS");
        assert_eq!(partition_type_name(0x83), "Linux");
        assert_eq!(partition_type_name(0x42), "Unknown");
    }

    #[test]
    fn hfs_partition_autodetects_end_to_end() {
        // Device: MBR with one type-0xAF partition at LBA 2048 of 4096
        // sectors; absolute sector 2050 (partition sector 2) carries an
        // HFS MDB. Autodetect must mount one volume named <dev>p1 with
        // the HFS driver.
        vfs::register_filesystem(&HFS);

        let mut image = alloc::vec![0u8; (2048 + 64) * 512];
        image[..512].copy_from_slice(&mbr_sector(&[(0xAF, 2048, 4096)]));
        image[2050 * 512..2051 * 512]
            .copy_from_slice(&hfs::build_mdb("AutoVol", 1, 4096, 0));

        let dev = create_memory_block_device(image);
        assert!(block::register(
            dev,
            BlockDeviceKind::Memory,
            "adtest0"
        ));

        let entry = block::get_by_name("adtest0").unwrap();
        assert_eq!(probe_device(&entry), 1);

        let vol = vfs::get_volume_by_name("adtest0p1").expect("partition volume");
        assert_eq!(vol.fs_name(), "HFS");
        vfs::unmount(vol.id()).unwrap();
    }

    #[test]
    fn raw_device_without_mbr_is_probed_directly() {
        vfs::register_filesystem(&crate::ramfs::RAMFS);
        let image = crate::ramfs::build_image(&[("boot.txt", b"raw")]);
        let dev = create_memory_block_device(image);
        assert!(block::register(dev, BlockDeviceKind::Memory, "adraw0"));

        let entry = block::get_by_name("adraw0").unwrap();
        assert_eq!(probe_device(&entry), 1);

        let vol = vfs::get_volume_by_name("adraw0").expect("raw volume");
        assert_eq!(vol.fs_name(), "ramfs");
        vfs::unmount(vol.id()).unwrap();
    }

    #[test]
    fn unmountable_device_is_nonfatal() {
        let dev = create_memory_block_device(alloc::vec![0u8; 4 * 512]);
        assert!(block::register(dev, BlockDeviceKind::Memory, "adjunk0"));
        let entry = block::get_by_name("adjunk0").unwrap();
        assert_eq!(probe_device(&entry), 0);
    }
}
