//! Flat in-memory archive filesystem.
//!
//! The boot path uses this for RAM-disk images: a tiny read-only format
//! with a magic header, a fixed directory of files, and raw data
//! extents. Layout (all little-endian):
//!
//! ```text
//! offset 0   magic "S7RAMFS1" (8 bytes)
//! offset 8   file count (u32)
//! offset 16  directory: one 40-byte record per file
//!            name[32] (NUL-padded), data offset (u32), size (u32)
//! ```
//!
//! File ids are `1 + directory index`; id 0 is the root directory.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::block::{self, BlockDevice};
use crate::vfs::{self, EnumerateCallback, FileSystemOps, FsPrivate, Volume};
use crate::{FileInfo, FsError};

/// Archive magic.
pub const RAMFS_MAGIC: &[u8; 8] = b"S7RAMFS1";

const DIR_START: usize = 16;
const RECORD_SIZE: usize = 40;
const NAME_CAP: usize = 32;

struct RamFile {
    name: String,
    offset: u32,
    size: u32,
}

struct RamFsPrivate {
    files: Vec<RamFile>,
    total_bytes: u64,
}

/// The archive filesystem driver.
pub struct RamFs;

/// Driver singleton for registration.
pub static RAMFS: RamFs = RamFs;

impl FileSystemOps for RamFs {
    fn fs_name(&self) -> &'static str {
        "ramfs"
    }

    fn probe(&self, dev: &dyn BlockDevice) -> bool {
        let mut block = [0u8; 512];
        if dev.read_block(0, &mut block).is_err() {
            return false;
        }
        &block[..8] == RAMFS_MAGIC
    }

    fn mount(&self, dev: &dyn BlockDevice) -> Result<FsPrivate, FsError> {
        let mut header = [0u8; 512];
        dev.read_block(0, &mut header).map_err(|_| FsError::Io)?;
        if &header[..8] != RAMFS_MAGIC {
            return Err(FsError::InvalidArgument);
        }

        let count = u32::from_le_bytes(header[8..12].try_into().unwrap_or_default()) as usize;
        let mut dir = alloc::vec![0u8; count * RECORD_SIZE];
        block::read_bytes(dev, DIR_START as u64, &mut dir).map_err(|_| FsError::Io)?;

        let mut files = Vec::with_capacity(count);
        for record in dir.chunks_exact(RECORD_SIZE) {
            let name_len = record[..NAME_CAP]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(NAME_CAP);
            files.push(RamFile {
                name: String::from_utf8_lossy(&record[..name_len]).into_owned(),
                offset: u32::from_le_bytes(record[32..36].try_into().unwrap_or_default()),
                size: u32::from_le_bytes(record[36..40].try_into().unwrap_or_default()),
            });
        }

        Ok(Box::new(RamFsPrivate {
            files,
            total_bytes: dev.total_blocks() * dev.block_size() as u64,
        }))
    }

    fn read(
        &self,
        vol: &Volume,
        file_id: u64,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        if file_id == vfs::ROOT_DIR_ID {
            return Err(FsError::IsADirectory);
        }
        let private = vol.private::<RamFsPrivate>().ok_or(FsError::Io)?;
        let dev = vol.block_device().ok_or(FsError::Io)?;
        let file = private
            .files
            .get(file_id as usize - 1)
            .ok_or(FsError::NotFound)?;

        if offset >= u64::from(file.size) {
            return Ok(0);
        }
        let n = buf.len().min((u64::from(file.size) - offset) as usize);
        block::read_bytes(dev, u64::from(file.offset) + offset, &mut buf[..n])
            .map_err(|_| FsError::Io)
    }

    fn enumerate(
        &self,
        vol: &Volume,
        dir_id: u64,
        cb: EnumerateCallback<'_>,
    ) -> Result<(), FsError> {
        if dir_id != vfs::ROOT_DIR_ID {
            return Err(FsError::NotADirectory);
        }
        let private = vol.private::<RamFsPrivate>().ok_or(FsError::Io)?;
        for (i, file) in private.files.iter().enumerate() {
            if !cb(&file.name, i as u64 + 1, false) {
                break;
            }
        }
        Ok(())
    }

    fn lookup(&self, vol: &Volume, dir_id: u64, name: &str) -> Result<(u64, bool), FsError> {
        if dir_id != vfs::ROOT_DIR_ID {
            return Err(FsError::NotADirectory);
        }
        let private = vol.private::<RamFsPrivate>().ok_or(FsError::Io)?;
        private
            .files
            .iter()
            .position(|f| f.name == name)
            .map(|i| (i as u64 + 1, false))
            .ok_or(FsError::NotFound)
    }

    fn get_stats(&self, vol: &Volume) -> Result<(u64, u64), FsError> {
        let private = vol.private::<RamFsPrivate>().ok_or(FsError::Io)?;
        Ok((private.total_bytes, 0))
    }

    fn get_file_info(&self, vol: &Volume, file_id: u64) -> Result<FileInfo, FsError> {
        if file_id == vfs::ROOT_DIR_ID {
            return Ok(FileInfo {
                size: 0,
                is_dir: true,
                mod_time: 0,
            });
        }
        let private = vol.private::<RamFsPrivate>().ok_or(FsError::Io)?;
        let file = private
            .files
            .get(file_id as usize - 1)
            .ok_or(FsError::NotFound)?;
        Ok(FileInfo {
            size: u64::from(file.size),
            is_dir: false,
            mod_time: 0,
        })
    }
}

/// Builds an archive image from `(name, contents)` pairs (test and
/// RAM-disk support). The image is 512-padded.
#[must_use]
pub fn build_image(files: &[(&str, &[u8])]) -> Vec<u8> {
    let dir_bytes = files.len() * RECORD_SIZE;
    let mut data_offset = DIR_START + dir_bytes;
    // Data starts on a block boundary.
    data_offset = data_offset.div_ceil(512) * 512;

    let mut image = alloc::vec![0u8; data_offset];
    image[..8].copy_from_slice(RAMFS_MAGIC);
    image[8..12].copy_from_slice(&(files.len() as u32).to_le_bytes());

    let mut cursor = data_offset;
    for (i, (name, contents)) in files.iter().enumerate() {
        let record = DIR_START + i * RECORD_SIZE;
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(NAME_CAP - 1);
        image[record..record + n].copy_from_slice(&name_bytes[..n]);
        image[record + 32..record + 36].copy_from_slice(&(cursor as u32).to_le_bytes());
        image[record + 36..record + 40].copy_from_slice(&(contents.len() as u32).to_le_bytes());
        image.extend_from_slice(contents);
        cursor += contents.len();
    }

    let padded = image.len().div_ceil(512) * 512;
    image.resize(padded, 0);
    image
}
