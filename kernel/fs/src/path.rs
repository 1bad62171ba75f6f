//! Path normalization, splitting, and resolution.
//!
//! Resolution first consults the mount table (longest-prefix match), then
//! falls back to the `/Volumes/NAME/...` convention: absolute paths
//! outside `/Volumes` resolve against the default boot volume, relative
//! paths against the global working directory (single global until tasks
//! gain their own).
//!
//! Descent below a volume's root walks `lookup(dir_id, component)` one
//! component at a time. Drivers without lookup support resolve to the
//! volume root, matching the original surface.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use sys7_core::sync::SpinLock;

use crate::mount::{self, MountBacking};
use crate::vfs::{self, ROOT_DIR_ID, Volume};
use crate::FsError;

/// Volume used for absolute paths outside `/Volumes`.
pub const DEFAULT_BOOT_VOLUME: &str = "BOOT";

const DEFAULT_CWD: &str = "/Volumes/BOOT";

static CWD: SpinLock<String> = SpinLock::new(String::new());

/// A path resolved to its volume and node.
pub struct ResolvedPath {
    /// The volume serving the path.
    pub volume: Arc<Volume>,
    /// Node id within the volume ([`ROOT_DIR_ID`] for the root).
    pub inode: u64,
    /// The normalized absolute path.
    pub normalized: String,
    /// Whether the node is a directory.
    pub is_directory: bool,
    /// Whether every component resolved.
    pub exists: bool,
}

/// Returns `true` for absolute paths.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Normalizes a path: collapses `.`, pops on `..` (bounded at the root),
/// and squeezes repeated separators. Idempotent.
#[must_use]
pub fn normalize(path: &str) -> String {
    let absolute = is_absolute(path);
    let mut parts: Vec<&str> = Vec::new();

    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            c => parts.push(c),
        }
    }

    if absolute {
        let mut out = String::from("/");
        out.push_str(&parts.join("/"));
        out
    } else if parts.is_empty() {
        String::from(".")
    } else {
        parts.join("/")
    }
}

/// Joins `base` and `rel` with a single separator.
#[must_use]
pub fn join(base: &str, rel: &str) -> String {
    let mut out = String::from(base);
    if !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(rel);
    out
}

/// Final component of a path (`.` for empty paths).
#[must_use]
pub fn basename(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Everything before the final component (`.` when there is none, `/`
/// for entries directly under the root).
#[must_use]
pub fn dirname(path: &str) -> String {
    match path.rfind('/') {
        None => String::from("."),
        Some(0) => String::from("/"),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Converts a possibly-relative path to a normalized absolute one.
#[must_use]
pub fn make_absolute(path: &str, cwd: &str) -> String {
    if is_absolute(path) {
        normalize(path)
    } else {
        normalize(&join(cwd, path))
    }
}

/// The global working directory.
#[must_use]
pub fn cwd() -> String {
    let cwd = CWD.lock();
    if cwd.is_empty() {
        String::from(DEFAULT_CWD)
    } else {
        cwd.clone()
    }
}

/// Replaces the global working directory (normalized).
pub fn set_cwd(path: &str) {
    *CWD.lock() = normalize(path);
}

/// Splits a normalized absolute path into `(volume_name, relative_path)`
/// following the `/Volumes/NAME/...` convention. Paths outside
/// `/Volumes` map to the boot volume.
#[must_use]
pub fn split_path(path: &str) -> Option<(String, String)> {
    if let Some(rest) = path.strip_prefix("/Volumes/") {
        let (name, rel) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        if name.is_empty() {
            return None;
        }
        return Some((name.to_string(), rel.to_string()));
    }

    if let Some(rest) = path.strip_prefix('/') {
        return Some((String::from(DEFAULT_BOOT_VOLUME), rest.to_string()));
    }

    None
}

fn descend(volume: &Arc<Volume>, rel: &str, resolved: &mut ResolvedPath) {
    for comp in rel.split('/').filter(|c| !c.is_empty()) {
        match vfs::lookup(volume, resolved.inode, comp) {
            Ok((id, is_dir)) => {
                resolved.inode = id;
                resolved.is_directory = is_dir;
            }
            Err(FsError::NotSupported) => {
                // Driver has no lookup; everything resolves to the root.
                return;
            }
            Err(_) => {
                resolved.exists = false;
                resolved.is_directory = false;
                return;
            }
        }
    }
}

/// Resolves a path to `(volume, inode)`.
///
/// # Errors
///
/// [`FsError::NotFound`] when no volume serves the path, or
/// [`FsError::NotSupported`] for network mounts (those route through the
/// net driver at the file surface, not through volumes).
pub fn resolve_path(path: &str) -> Result<ResolvedPath, FsError> {
    let normalized = make_absolute(path, &cwd());

    // The mount table wins; /Volumes splitting is the fallback for
    // volumes nobody bothered to attach a mount point to.
    let (volume, rel) = if let Some(entry) = mount::find_by_path(&normalized) {
        match entry.backing {
            MountBacking::Net(_) => return Err(FsError::NotSupported),
            MountBacking::Volume(id) => {
                let volume = vfs::get_volume_by_id(id).ok_or(FsError::NotFound)?;
                let rel = strip_mount_point(&normalized, &entry.mount_point);
                (volume, rel)
            }
        }
    } else {
        let (volume_name, rel) = split_path(&normalized).ok_or(FsError::InvalidArgument)?;
        let volume = vfs::get_volume_by_name(&volume_name).ok_or(FsError::NotFound)?;
        (volume, rel)
    };

    let mut resolved = ResolvedPath {
        volume,
        inode: ROOT_DIR_ID,
        normalized,
        is_directory: true,
        exists: true,
    };
    let volume = resolved.volume.clone();
    descend(&volume, &rel, &mut resolved);
    Ok(resolved)
}

fn strip_mount_point(path: &str, mount_point: &str) -> String {
    if mount_point == "/" {
        return path.trim_start_matches('/').to_string();
    }
    path.strip_prefix(mount_point)
        .map(|rest| rest.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_and_dotdot() {
        assert_eq!(normalize("/a/b/../c/./d"), "/a/c/d");
    }

    #[test]
    fn normalize_root_cases() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/.."), "/");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("//a///b"), "/a/b");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["/a/b/../c/./d", "/", "/..", "a/./b", "../x", ""] {
            let once = normalize(p);
            assert_eq!(normalize(&once), once, "not idempotent for {p:?}");
        }
    }

    #[test]
    fn normalize_relative_paths() {
        assert_eq!(normalize("a/./b"), "a/b");
        assert_eq!(normalize(""), ".");
        assert_eq!(normalize("."), ".");
    }

    #[test]
    fn split_recognizes_volumes_prefix() {
        assert_eq!(
            split_path("/Volumes/BOOT/System/Finder"),
            Some(("BOOT".to_string(), "System/Finder".to_string()))
        );
        assert_eq!(
            split_path("/Volumes/DATA"),
            Some(("DATA".to_string(), String::new()))
        );
    }

    #[test]
    fn split_defaults_to_boot_volume() {
        assert_eq!(
            split_path("/System/Finder"),
            Some(("BOOT".to_string(), "System/Finder".to_string()))
        );
    }

    #[test]
    fn basename_and_dirname() {
        assert_eq!(basename("/a/b/c.txt"), "c.txt");
        assert_eq!(basename("plain"), "plain");
        assert_eq!(dirname("/a/b/c.txt"), "/a/b");
        assert_eq!(dirname("/top"), "/");
        assert_eq!(dirname("plain"), ".");
    }

    #[test]
    fn make_absolute_uses_cwd() {
        assert_eq!(
            make_absolute("b/../c", "/Volumes/BOOT"),
            "/Volumes/BOOT/c"
        );
        assert_eq!(make_absolute("/x/y", "/Volumes/BOOT"), "/x/y");
    }

    #[test]
    fn resolve_normalizes_and_finds_volume() {
        use crate::vfs::{FileSystemOps, FsPrivate, Volume};
        use crate::block::BlockDevice;

        struct RootOnlyFs;

        impl FileSystemOps for RootOnlyFs {
            fn fs_name(&self) -> &'static str {
                "rootonly"
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
                _file_id: u64,
                _offset: u64,
                _buf: &mut [u8],
            ) -> Result<usize, FsError> {
                Ok(0)
            }
            fn lookup(
                &self,
                _vol: &Volume,
                dir_id: u64,
                name: &str,
            ) -> Result<(u64, bool), FsError> {
                // Root contains one directory "b" (id 7).
                if dir_id == ROOT_DIR_ID && name == "b" {
                    Ok((7, true))
                } else {
                    Err(FsError::NotFound)
                }
            }
        }

        static ROOT_ONLY: RootOnlyFs = RootOnlyFs;
        let vol = vfs::mount_virtual(&ROOT_ONLY, "BOOT", false).expect("mount");

        let resolved = resolve_path("/Volumes/BOOT/./a/../b").expect("resolve");
        assert_eq!(resolved.normalized, "/Volumes/BOOT/b");
        assert_eq!(resolved.volume.id(), vol.id());
        assert!(resolved.exists);
        assert!(resolved.is_directory);
        assert_eq!(resolved.inode, 7);

        let missing = resolve_path("/Volumes/BOOT/nope").expect("volume resolves");
        assert!(!missing.exists);

        vfs::unmount(vol.id()).unwrap();
    }

    #[test]
    fn resolve_unknown_volume_fails() {
        assert!(matches!(
            resolve_path("/Volumes/NO_SUCH_VOL/file"),
            Err(FsError::NotFound)
        ));
    }
}
