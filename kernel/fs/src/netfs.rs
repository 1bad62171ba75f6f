//! Network filesystem mounts (`/net`).
//!
//! Paths under a mount flagged `NETWORK` delegate their file operations
//! to a [`VfsNetDriver`]. The WebDAV and SFTP drivers here are transport
//! stubs: they pin down the surface (`open/read/write/close/lseek/stat`)
//! without speaking the protocols yet.

use sys7_core::kwarn;

use crate::mount::{self, MountBacking, MountFlags};
use crate::{FileInfo, FsError};

/// Seek anchors for [`VfsNetDriver::lseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetSeek {
    /// From the start of the file.
    Set,
    /// From the current position.
    Current,
    /// From the end of the file.
    End,
}

/// File-operation surface a network filesystem driver provides.
pub trait VfsNetDriver: Send + Sync {
    /// Protocol name (`webdav`, `sftp`).
    fn name(&self) -> &'static str;

    /// Opens a remote path, returning a driver-private handle.
    ///
    /// # Errors
    ///
    /// Any [`FsError`].
    fn open(&self, path: &str) -> Result<u64, FsError>;

    /// Reads from an open handle.
    ///
    /// # Errors
    ///
    /// Any [`FsError`].
    fn read(&self, handle: u64, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Writes to an open handle.
    ///
    /// # Errors
    ///
    /// Any [`FsError`].
    fn write(&self, handle: u64, buf: &[u8]) -> Result<usize, FsError>;

    /// Repositions an open handle.
    ///
    /// # Errors
    ///
    /// Any [`FsError`].
    fn lseek(&self, handle: u64, offset: i64, whence: NetSeek) -> Result<u64, FsError>;

    /// Metadata for an open handle.
    ///
    /// # Errors
    ///
    /// Any [`FsError`].
    fn stat(&self, handle: u64) -> Result<FileInfo, FsError>;

    /// Closes an open handle.
    ///
    /// # Errors
    ///
    /// Any [`FsError`].
    fn close(&self, handle: u64) -> Result<(), FsError>;
}

macro_rules! stub_net_driver {
    ($ty:ident, $name:literal) => {
        /// Transport stub; every operation reports the missing protocol
        /// support.
        pub struct $ty;

        impl VfsNetDriver for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn open(&self, path: &str) -> Result<u64, FsError> {
                kwarn!(concat!($name, ": no transport, cannot open {}"), path);
                Err(FsError::NotSupported)
            }

            fn read(&self, _handle: u64, _buf: &mut [u8]) -> Result<usize, FsError> {
                Err(FsError::NotSupported)
            }

            fn write(&self, _handle: u64, _buf: &[u8]) -> Result<usize, FsError> {
                Err(FsError::NotSupported)
            }

            fn lseek(&self, _handle: u64, _offset: i64, _whence: NetSeek) -> Result<u64, FsError> {
                Err(FsError::NotSupported)
            }

            fn stat(&self, _handle: u64) -> Result<FileInfo, FsError> {
                Err(FsError::NotSupported)
            }

            fn close(&self, _handle: u64) -> Result<(), FsError> {
                Err(FsError::NotSupported)
            }
        }
    };
}

stub_net_driver!(WebDavDriver, "webdav");
stub_net_driver!(SftpDriver, "sftp");

/// WebDAV driver singleton.
pub static WEBDAV: WebDavDriver = WebDavDriver;

/// SFTP driver singleton.
pub static SFTP: SftpDriver = SftpDriver;

/// Attaches a network driver under `mount_point`.
///
/// # Errors
///
/// Duplicate-mount / table-full errors from the mount table.
pub fn mount_net(
    source: &str,
    mount_point: &str,
    driver: &'static dyn VfsNetDriver,
) -> Result<(), FsError> {
    mount::add(
        source,
        mount_point,
        driver.name(),
        MountFlags::NETWORK,
        MountBacking::Net(driver),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_drivers_expose_surface_without_transport() {
        assert_eq!(WEBDAV.name(), "webdav");
        assert_eq!(SFTP.name(), "sftp");
        assert!(matches!(
            WEBDAV.open("/remote/file"),
            Err(FsError::NotSupported)
        ));
        assert!(matches!(SFTP.read(1, &mut [0u8; 4]), Err(FsError::NotSupported)));
        assert!(matches!(
            SFTP.lseek(1, 0, NetSeek::End),
            Err(FsError::NotSupported)
        ));
    }

    #[test]
    fn net_mounts_carry_the_network_flag() {
        mount_net("dav://host/share", "/net/dav-test", &WEBDAV).unwrap();
        let entry = mount::find_by_path("/net/dav-test/some/file").expect("entry");
        assert!(entry.flags.contains(MountFlags::NETWORK));
        assert!(matches!(entry.backing, MountBacking::Net(_)));
        mount::remove("/net/dav-test").unwrap();
    }
}
