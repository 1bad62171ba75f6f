//! HFS volume recognition.
//!
//! Enough of HFS to autodetect a volume: probe the Master Directory
//! Block at absolute sector 2 (signature `0x4244`, big-endian fields)
//! and expose volume totals and the root directory. File access goes
//! through the HFS daemon; this driver only claims the volume.

use alloc::boxed::Box;
use alloc::string::String;

use crate::block::BlockDevice;
use crate::vfs::{self, FileSystemOps, FsPrivate, Volume};
use crate::{FileInfo, FsError};

/// MDB signature (`BD`).
pub const HFS_MDB_SIGNATURE: u16 = 0x4244;

/// Sector holding the MDB.
pub const HFS_MDB_SECTOR: u64 = 2;

struct HfsPrivate {
    volume_name: String,
    total_bytes: u64,
    free_bytes: u64,
}

fn be16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn be32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_mdb(dev: &dyn BlockDevice) -> Option<[u8; 512]> {
    if dev.block_size() != 512 || dev.total_blocks() <= HFS_MDB_SECTOR {
        return None;
    }
    let mut sector = [0u8; 512];
    dev.read_block(HFS_MDB_SECTOR, &mut sector).ok()?;
    Some(sector)
}

/// The HFS driver.
pub struct HfsFs;

/// Driver singleton for registration.
pub static HFS: HfsFs = HfsFs;

impl FileSystemOps for HfsFs {
    fn fs_name(&self) -> &'static str {
        "HFS"
    }

    fn probe(&self, dev: &dyn BlockDevice) -> bool {
        read_mdb(dev).is_some_and(|mdb| be16(&mdb, 0) == HFS_MDB_SIGNATURE)
    }

    fn mount(&self, dev: &dyn BlockDevice) -> Result<FsPrivate, FsError> {
        let mdb = read_mdb(dev).ok_or(FsError::Io)?;
        if be16(&mdb, 0) != HFS_MDB_SIGNATURE {
            return Err(FsError::InvalidArgument);
        }

        // drNmAlBlks @18, drAlBlkSiz @20, drFreeBks @34, drVN @36
        // (Pascal string, 27 bytes max).
        let alloc_blocks = u64::from(be16(&mdb, 18));
        let alloc_block_size = u64::from(be32(&mdb, 20));
        let free_blocks = u64::from(be16(&mdb, 34));
        let name_len = (mdb[36] as usize).min(27);
        let volume_name = String::from_utf8_lossy(&mdb[37..37 + name_len]).into_owned();

        Ok(Box::new(HfsPrivate {
            volume_name,
            total_bytes: alloc_blocks * alloc_block_size,
            free_bytes: free_blocks * alloc_block_size,
        }))
    }

    fn read(
        &self,
        _vol: &Volume,
        _file_id: u64,
        _offset: u64,
        _buf: &mut [u8],
    ) -> Result<usize, FsError> {
        // Catalog access lives in the HFS daemon.
        Err(FsError::NotSupported)
    }

    fn lookup(&self, _vol: &Volume, _dir_id: u64, _name: &str) -> Result<(u64, bool), FsError> {
        Err(FsError::NotSupported)
    }

    fn get_stats(&self, vol: &Volume) -> Result<(u64, u64), FsError> {
        let private = vol.private::<HfsPrivate>().ok_or(FsError::Io)?;
        Ok((private.total_bytes, private.free_bytes))
    }

    fn get_file_info(&self, _vol: &Volume, file_id: u64) -> Result<FileInfo, FsError> {
        if file_id == vfs::ROOT_DIR_ID {
            return Ok(FileInfo {
                size: 0,
                is_dir: true,
                mod_time: 0,
            });
        }
        Err(FsError::NotSupported)
    }
}

/// Name stored in the MDB, for mount diagnostics.
#[must_use]
pub fn mdb_volume_name(vol: &Volume) -> Option<&str> {
    Some(vol.private::<HfsPrivate>()?.volume_name.as_str())
}

/// Builds a minimal valid MDB sector (test support).
#[must_use]
pub fn build_mdb(name: &str, alloc_blocks: u16, alloc_block_size: u32, free_blocks: u16) -> [u8; 512] {
    let mut mdb = [0u8; 512];
    mdb[0..2].copy_from_slice(&HFS_MDB_SIGNATURE.to_be_bytes());
    mdb[18..20].copy_from_slice(&alloc_blocks.to_be_bytes());
    mdb[20..24].copy_from_slice(&alloc_block_size.to_be_bytes());
    mdb[34..36].copy_from_slice(&free_blocks.to_be_bytes());
    let n = name.len().min(27);
    mdb[36] = n as u8;
    mdb[37..37 + n].copy_from_slice(&name.as_bytes()[..n]);
    mdb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::create_memory_block_device;

    fn hfs_image() -> alloc::vec::Vec<u8> {
        let mut image = alloc::vec![0u8; 16 * 512];
        image[2 * 512..3 * 512].copy_from_slice(&build_mdb("Macintosh HD", 100, 4096, 25));
        image
    }

    #[test]
    fn probe_recognizes_mdb_signature() {
        let good = create_memory_block_device(hfs_image());
        let empty = create_memory_block_device(alloc::vec![0u8; 16 * 512]);
        assert!(HFS.probe(good));
        assert!(!HFS.probe(empty));
    }

    #[test]
    fn mount_parses_mdb_totals() {
        vfs::register_filesystem(&HFS);
        let dev = create_memory_block_device(hfs_image());
        let vol = vfs::mount(dev, Some("HFSTEST")).expect("mount");

        assert_eq!(vol.fs_name(), "HFS");
        assert_eq!(vfs::get_stats(&vol), Ok((100 * 4096, 25 * 4096)));
        assert_eq!(mdb_volume_name(&vol), Some("Macintosh HD"));
        vfs::unmount(vol.id()).unwrap();
    }

    #[test]
    fn tiny_device_does_not_probe() {
        let dev = create_memory_block_device(alloc::vec![0u8; 512]);
        assert!(!HFS.probe(dev));
    }
}
