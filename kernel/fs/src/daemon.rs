//! Filesystem-daemon bridge.
//!
//! User-space filesystem daemons register a request and a response port;
//! the kernel routes VFS operations to them as [`FsRequest`] messages and
//! block-receives the correlated [`FsResponse`]. Correlation ids come
//! from a per-daemon counter. A dead or missing daemon surfaces as
//! [`FsError::Io`], which the syscall layer turns into `EIO`.
//!
//! The daemon side of the contract is [`event_loop`] (or [`serve_one`]
//! for driving it step by step): receive a request, dispatch it against a
//! mounted volume, reply, repeat until `Shutdown`.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use sys7_core::sync::SpinLock;
use sys7_core::{kerr, kinfo, kprintln};
use sys7_ipc::{MAX_MESSAGE_SIZE, Port};

use crate::vfs::{self, Volume};
use crate::{FileInfo, FsError};

/// Maximum registered daemons.
pub const FSD_MAX_DAEMONS: usize = 8;

/// Path capacity inside a request.
pub const FSD_MAX_PATH: usize = 256;

/// Inline data capacity inside a response.
pub const FSD_MAX_DATA: usize = 4096;

/// Encoded request size.
pub const REQUEST_SIZE: usize = 36 + FSD_MAX_PATH;

/// Encoded response size.
pub const RESPONSE_SIZE: usize = 28 + FSD_MAX_DATA;

const _: () = assert!(REQUEST_SIZE <= MAX_MESSAGE_SIZE);
const _: () = assert!(RESPONSE_SIZE <= MAX_MESSAGE_SIZE);

/// Operations a daemon serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FsMessageKind {
    /// Read file bytes (response carries them inline).
    ReadFile = 0,
    /// Write file bytes (inline transport; small writes only).
    WriteFile = 1,
    /// List a directory (response data carries packed entries).
    ListDir = 2,
    /// Look up a name in a directory.
    Lookup = 3,
    /// Create a file.
    CreateFile = 4,
    /// Delete an entry.
    DeleteFile = 5,
    /// Volume totals.
    GetStats = 6,
    /// Entry metadata.
    GetFileInfo = 7,
    /// Mount notification.
    Mount = 8,
    /// Unmount notification.
    Unmount = 9,
    /// Stop the daemon loop.
    Shutdown = 10,
}

impl FsMessageKind {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::ReadFile,
            1 => Self::WriteFile,
            2 => Self::ListDir,
            3 => Self::Lookup,
            4 => Self::CreateFile,
            5 => Self::DeleteFile,
            6 => Self::GetStats,
            7 => Self::GetFileInfo,
            8 => Self::Mount,
            9 => Self::Unmount,
            10 => Self::Shutdown,
            _ => return None,
        })
    }
}

/// On-wire request from kernel to daemon.
#[derive(Debug, Clone)]
pub struct FsRequest {
    /// Operation.
    pub kind: FsMessageKind,
    /// Correlation id echoed by the response.
    pub request_id: u32,
    /// File or directory id.
    pub file_id: u64,
    /// Read/write offset.
    pub offset: u64,
    /// Read/write length.
    pub length: u32,
    /// Generic parameter.
    pub param1: u32,
    /// Generic parameter.
    pub param2: u32,
    /// Path or name operand (truncated at [`FSD_MAX_PATH`]).
    pub path: String,
}

impl FsRequest {
    /// New request of `kind`, everything else zeroed.
    #[must_use]
    pub fn new(kind: FsMessageKind) -> Self {
        Self {
            kind,
            request_id: 0,
            file_id: 0,
            offset: 0,
            length: 0,
            param1: 0,
            param2: 0,
            path: String::new(),
        }
    }

    /// Encodes into the fixed wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; REQUEST_SIZE] {
        let mut out = [0u8; REQUEST_SIZE];
        out[0..4].copy_from_slice(&(self.kind as u32).to_le_bytes());
        out[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        out[8..16].copy_from_slice(&self.file_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.offset.to_le_bytes());
        out[24..28].copy_from_slice(&self.length.to_le_bytes());
        out[28..32].copy_from_slice(&self.param1.to_le_bytes());
        out[32..36].copy_from_slice(&self.param2.to_le_bytes());
        let path = self.path.as_bytes();
        let n = path.len().min(FSD_MAX_PATH - 1);
        out[36..36 + n].copy_from_slice(&path[..n]);
        out
    }

    /// Decodes the fixed wire layout.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != REQUEST_SIZE {
            return None;
        }
        let kind = FsMessageKind::from_u32(u32::from_le_bytes(buf[0..4].try_into().ok()?))?;
        let path_bytes = &buf[36..];
        let path_len = path_bytes.iter().position(|&b| b == 0).unwrap_or(path_bytes.len());
        Some(Self {
            kind,
            request_id: u32::from_le_bytes(buf[4..8].try_into().ok()?),
            file_id: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            offset: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            length: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            param1: u32::from_le_bytes(buf[28..32].try_into().ok()?),
            param2: u32::from_le_bytes(buf[32..36].try_into().ok()?),
            path: String::from_utf8_lossy(&path_bytes[..path_len]).into_owned(),
        })
    }
}

/// On-wire response from daemon to kernel.
#[derive(Debug, Clone)]
pub struct FsResponse {
    /// Correlation id copied from the request.
    pub request_id: u32,
    /// 0 on success, negative error code otherwise.
    pub result: i32,
    /// Valid bytes in `data`.
    pub data_length: u32,
    /// Generic return parameter.
    pub param1: u64,
    /// Generic return parameter.
    pub param2: u64,
    /// Inline payload (small reads, packed listings).
    pub data: Vec<u8>,
}

impl FsResponse {
    /// Success response for `request_id`.
    #[must_use]
    pub fn ok(request_id: u32) -> Self {
        Self {
            request_id,
            result: 0,
            data_length: 0,
            param1: 0,
            param2: 0,
            data: Vec::new(),
        }
    }

    /// Error response for `request_id`.
    #[must_use]
    pub fn error(request_id: u32, result: i32) -> Self {
        Self {
            result,
            ..Self::ok(request_id)
        }
    }

    /// Encodes into the fixed wire layout (payload truncated at
    /// [`FSD_MAX_DATA`]).
    #[must_use]
    pub fn encode(&self) -> [u8; RESPONSE_SIZE] {
        let mut out = [0u8; RESPONSE_SIZE];
        let n = self.data.len().min(FSD_MAX_DATA);
        out[0..4].copy_from_slice(&self.request_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.result.to_le_bytes());
        out[8..12].copy_from_slice(&(n as u32).to_le_bytes());
        out[12..20].copy_from_slice(&self.param1.to_le_bytes());
        out[20..28].copy_from_slice(&self.param2.to_le_bytes());
        out[28..28 + n].copy_from_slice(&self.data[..n]);
        out
    }

    /// Decodes the fixed wire layout.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != RESPONSE_SIZE {
            return None;
        }
        let data_length =
            u32::from_le_bytes(buf[8..12].try_into().ok()?).min(FSD_MAX_DATA as u32);
        Some(Self {
            request_id: u32::from_le_bytes(buf[0..4].try_into().ok()?),
            result: i32::from_le_bytes(buf[4..8].try_into().ok()?),
            data_length,
            param1: u64::from_le_bytes(buf[12..20].try_into().ok()?),
            param2: u64::from_le_bytes(buf[20..28].try_into().ok()?),
            data: buf[28..28 + data_length as usize].to_vec(),
        })
    }
}

/// One directory entry decoded from a `ListDir` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// Entry name.
    pub name: String,
    /// Entry id.
    pub id: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Packs directory entries into a response payload. Entries that no
/// longer fit are dropped.
#[must_use]
pub fn pack_dir_entries(entries: &[DirEntryInfo]) -> Vec<u8> {
    let mut out = Vec::new();
    for e in entries {
        let name = e.name.as_bytes();
        let name_len = name.len().min(255);
        if out.len() + 10 + name_len > FSD_MAX_DATA {
            break;
        }
        out.extend_from_slice(&e.id.to_le_bytes());
        out.push(u8::from(e.is_dir));
        out.push(name_len as u8);
        out.extend_from_slice(&name[..name_len]);
    }
    out
}

/// Reverses [`pack_dir_entries`].
#[must_use]
pub fn unpack_dir_entries(mut data: &[u8]) -> Vec<DirEntryInfo> {
    let mut out = Vec::new();
    while data.len() >= 10 {
        let id = u64::from_le_bytes(data[0..8].try_into().unwrap_or_default());
        let is_dir = data[8] != 0;
        let name_len = data[9] as usize;
        if data.len() < 10 + name_len {
            break;
        }
        let name = String::from_utf8_lossy(&data[10..10 + name_len]).into_owned();
        out.push(DirEntryInfo { name, id, is_dir });
        data = &data[10 + name_len..];
    }
    out
}

// ── Daemon table ────────────────────────────────────────────────────────

struct FsDaemon {
    name: String,
    pid: u32,
    request_port: Port,
    response_port: Port,
    next_request_id: u32,
}

static DAEMONS: SpinLock<[Option<FsDaemon>; FSD_MAX_DAEMONS]> =
    SpinLock::new([const { None }; FSD_MAX_DAEMONS]);

/// Registers a filesystem daemon. Duplicate names and a full table are
/// rejected with `false`.
pub fn register(name: &str, pid: u32, request_port: Port, response_port: Port) -> bool {
    let mut daemons = DAEMONS.lock();

    if daemons
        .iter()
        .flatten()
        .any(|d| d.name == name)
    {
        kerr!("fsd: daemon '{name}' already registered");
        return false;
    }

    let Some(slot) = daemons.iter().position(Option::is_none) else {
        kerr!("fsd: daemon table full, rejecting '{name}'");
        return false;
    };

    daemons[slot] = Some(FsDaemon {
        name: String::from(name),
        pid,
        request_port,
        response_port,
        next_request_id: 1,
    });
    kinfo!("fsd: registered {name} (pid {pid})");
    true
}

/// Unregisters a daemon by name.
pub fn unregister(name: &str) {
    let mut daemons = DAEMONS.lock();
    for slot in daemons.iter_mut() {
        if slot.as_ref().is_some_and(|d| d.name == name) {
            *slot = None;
            kinfo!("fsd: unregistered {name}");
            return;
        }
    }
}

/// Whether `name` is a registered daemon.
#[must_use]
pub fn is_registered(name: &str) -> bool {
    DAEMONS.lock().iter().flatten().any(|d| d.name == name)
}

/// Number of registered daemons.
#[must_use]
pub fn daemon_count() -> usize {
    DAEMONS.lock().iter().flatten().count()
}

/// Prints the daemon table.
pub fn list_daemons() {
    let daemons = DAEMONS.lock();
    kprintln!("registered daemons:");
    let mut any = false;
    for d in daemons.iter().flatten() {
        kprintln!(
            "  {} (pid {}, req {}, resp {})",
            d.name,
            d.pid,
            d.request_port,
            d.response_port
        );
        any = true;
    }
    if !any {
        kprintln!("  (none)");
    }
}

/// Claims the next request id and returns the daemon's ports.
fn begin_request(name: &str) -> Result<(Port, Port, u32), FsError> {
    let mut daemons = DAEMONS.lock();
    let daemon = daemons
        .iter_mut()
        .flatten()
        .find(|d| d.name == name)
        .ok_or(FsError::NotFound)?;
    let id = daemon.next_request_id;
    daemon.next_request_id = daemon.next_request_id.wrapping_add(1);
    Ok((daemon.request_port, daemon.response_port, id))
}

/// Sends `req` to the daemon and block-receives the correlated response.
///
/// # Errors
///
/// [`FsError::NotFound`] for an unknown daemon; [`FsError::Io`] on
/// transport failure, size mismatch, or a correlation id mismatch.
pub fn send_request(name: &str, req: &mut FsRequest) -> Result<FsResponse, FsError> {
    let (req_port, resp_port, id) = begin_request(name)?;
    req.request_id = id;

    sys7_ipc::send(req_port, &req.encode()).map_err(|_| {
        kerr!("fsd: failed to send request to {name}");
        FsError::Io
    })?;

    let mut buf = [0u8; RESPONSE_SIZE];
    let len = sys7_ipc::recv(resp_port, &mut buf).map_err(|_| {
        kerr!("fsd: failed to receive response from {name}");
        FsError::Io
    })?;
    if len != RESPONSE_SIZE {
        kerr!("fsd: invalid response size from {name} ({len} != {RESPONSE_SIZE})");
        return Err(FsError::Io);
    }

    let resp = FsResponse::decode(&buf).ok_or(FsError::Io)?;
    if resp.request_id != id {
        kerr!(
            "fsd: response correlation mismatch from {name} ({} != {id})",
            resp.request_id
        );
        return Err(FsError::Io);
    }
    Ok(resp)
}

/// Sends a request without waiting for a response.
///
/// # Errors
///
/// [`FsError::NotFound`] or [`FsError::Io`].
pub fn post_request(name: &str, req: &mut FsRequest) -> Result<(), FsError> {
    let (req_port, _, id) = begin_request(name)?;
    req.request_id = id;
    sys7_ipc::send(req_port, &req.encode()).map_err(|_| FsError::Io)
}

// ── High-level operations ───────────────────────────────────────────────

/// Reads through a daemon; inline responses carry at most
/// [`FSD_MAX_DATA`] bytes per round-trip.
///
/// # Errors
///
/// [`FsError::Io`] on daemon failure.
pub fn read_file(name: &str, file_id: u64, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
    let mut req = FsRequest::new(FsMessageKind::ReadFile);
    req.file_id = file_id;
    req.offset = offset;
    req.length = buf.len().min(FSD_MAX_DATA) as u32;

    let resp = send_request(name, &mut req)?;
    if resp.result != 0 {
        return Err(FsError::Io);
    }
    let n = (resp.data_length as usize).min(buf.len());
    buf[..n].copy_from_slice(&resp.data[..n]);
    Ok(n)
}

/// Writes through a daemon. The inline transport carries no payload
/// larger than [`FSD_MAX_DATA`]; larger writes are rejected here.
///
/// # Errors
///
/// [`FsError::InvalidArgument`] for oversized writes; [`FsError::Io`] on
/// daemon failure.
pub fn write_file(name: &str, file_id: u64, offset: u64, buf: &[u8]) -> Result<usize, FsError> {
    if buf.len() > FSD_MAX_DATA {
        return Err(FsError::InvalidArgument);
    }
    let mut req = FsRequest::new(FsMessageKind::WriteFile);
    req.file_id = file_id;
    req.offset = offset;
    req.length = buf.len() as u32;

    let resp = send_request(name, &mut req)?;
    if resp.result != 0 {
        return Err(FsError::Io);
    }
    Ok(resp.param1 as usize)
}

/// Lists a directory through a daemon.
///
/// # Errors
///
/// [`FsError::Io`] on daemon failure.
pub fn list_dir(name: &str, dir_id: u64) -> Result<Vec<DirEntryInfo>, FsError> {
    let mut req = FsRequest::new(FsMessageKind::ListDir);
    req.file_id = dir_id;

    let resp = send_request(name, &mut req)?;
    if resp.result != 0 {
        return Err(FsError::Io);
    }
    Ok(unpack_dir_entries(&resp.data))
}

/// Looks up `entry_name` under `dir_id` through a daemon.
///
/// # Errors
///
/// [`FsError::NotFound`] when the daemon reports failure.
pub fn lookup(name: &str, dir_id: u64, entry_name: &str) -> Result<(u64, bool), FsError> {
    let mut req = FsRequest::new(FsMessageKind::Lookup);
    req.file_id = dir_id;
    req.path = String::from(entry_name);

    let resp = send_request(name, &mut req)?;
    if resp.result != 0 {
        return Err(FsError::NotFound);
    }
    Ok((resp.param1, resp.param2 != 0))
}

/// Volume totals `(total_bytes, free_bytes)` through a daemon.
///
/// # Errors
///
/// [`FsError::Io`] on daemon failure.
pub fn get_stats(name: &str) -> Result<(u64, u64), FsError> {
    let mut req = FsRequest::new(FsMessageKind::GetStats);
    let resp = send_request(name, &mut req)?;
    if resp.result != 0 {
        return Err(FsError::Io);
    }
    Ok((resp.param1, resp.param2))
}

/// Entry metadata through a daemon.
///
/// # Errors
///
/// [`FsError::Io`] on daemon failure.
pub fn get_file_info(name: &str, entry_id: u64) -> Result<FileInfo, FsError> {
    let mut req = FsRequest::new(FsMessageKind::GetFileInfo);
    req.file_id = entry_id;

    let resp = send_request(name, &mut req)?;
    if resp.result != 0 {
        return Err(FsError::Io);
    }
    let mod_time = if resp.data_length as usize >= 8 {
        u64::from_le_bytes(resp.data[..8].try_into().unwrap_or_default())
    } else {
        0
    };
    Ok(FileInfo {
        size: resp.param1,
        is_dir: resp.param2 != 0,
        mod_time,
    })
}

// ── Daemon-side event loop ──────────────────────────────────────────────

const FSD_ERR: i32 = -1;

fn dispatch(volume: &Arc<Volume>, req: &FsRequest) -> FsResponse {
    let id = req.request_id;
    match req.kind {
        FsMessageKind::ReadFile => {
            let mut data = alloc::vec![0u8; (req.length as usize).min(FSD_MAX_DATA)];
            match vfs::read_file(volume, req.file_id, req.offset, &mut data) {
                Ok(n) => {
                    data.truncate(n);
                    let mut resp = FsResponse::ok(id);
                    resp.data_length = n as u32;
                    resp.data = data;
                    resp
                }
                Err(_) => FsResponse::error(id, FSD_ERR),
            }
        }
        FsMessageKind::WriteFile => {
            // The inline transport carries no write payload; a shared
            // memory transport is the planned follow-up.
            FsResponse::error(id, FSD_ERR)
        }
        FsMessageKind::ListDir => {
            let mut entries = Vec::new();
            let result = vfs::enumerate(volume, req.file_id, &mut |name, entry_id, is_dir| {
                entries.push(DirEntryInfo {
                    name: String::from(name),
                    id: entry_id,
                    is_dir,
                });
                true
            });
            match result {
                Ok(()) => {
                    let data = pack_dir_entries(&entries);
                    let mut resp = FsResponse::ok(id);
                    resp.data_length = data.len() as u32;
                    resp.data = data;
                    resp
                }
                Err(_) => FsResponse::error(id, FSD_ERR),
            }
        }
        FsMessageKind::Lookup => match vfs::lookup(volume, req.file_id, &req.path) {
            Ok((entry_id, is_dir)) => {
                let mut resp = FsResponse::ok(id);
                resp.param1 = entry_id;
                resp.param2 = u64::from(is_dir);
                resp
            }
            Err(_) => FsResponse::error(id, FSD_ERR),
        },
        FsMessageKind::GetStats => match vfs::get_stats(volume) {
            Ok((total, free)) => {
                let mut resp = FsResponse::ok(id);
                resp.param1 = total;
                resp.param2 = free;
                resp
            }
            Err(_) => FsResponse::error(id, FSD_ERR),
        },
        FsMessageKind::GetFileInfo => match vfs::get_file_info(volume, req.file_id) {
            Ok(info) => {
                let mut resp = FsResponse::ok(id);
                resp.param1 = info.size;
                resp.param2 = u64::from(info.is_dir);
                resp.data = info.mod_time.to_le_bytes().to_vec();
                resp.data_length = 8;
                resp
            }
            Err(_) => FsResponse::error(id, FSD_ERR),
        },
        FsMessageKind::CreateFile | FsMessageKind::DeleteFile => FsResponse::error(id, FSD_ERR),
        FsMessageKind::Mount | FsMessageKind::Unmount => FsResponse::ok(id),
        FsMessageKind::Shutdown => FsResponse::ok(id),
    }
}

/// Serves one request from `req_port`. Returns `false` after a
/// `Shutdown` request (the shutdown is acknowledged first).
pub fn serve_one(req_port: Port, resp_port: Port, volume: &Arc<Volume>) -> bool {
    let mut buf = [0u8; REQUEST_SIZE];
    let Ok(len) = sys7_ipc::recv(req_port, &mut buf) else {
        return false;
    };
    if len != REQUEST_SIZE {
        kerr!("fsd: invalid request size ({len} != {REQUEST_SIZE})");
        return true;
    }
    let Some(req) = FsRequest::decode(&buf) else {
        kerr!("fsd: undecodable request");
        return true;
    };

    let resp = dispatch(volume, &req);
    let _ = sys7_ipc::send(resp_port, &resp.encode());
    req.kind != FsMessageKind::Shutdown
}

/// Daemon event loop: serve requests until shutdown.
pub fn event_loop(name: &str, req_port: Port, resp_port: Port, volume: &Arc<Volume>) {
    kinfo!("fsd: {name} event loop started");
    while serve_one(req_port, resp_port, volume) {}
    kinfo!("fsd: {name} event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_through_wire_layout() {
        let mut req = FsRequest::new(FsMessageKind::Lookup);
        req.request_id = 42;
        req.file_id = 0xDEAD_BEEF_u64;
        req.offset = 12345;
        req.length = 77;
        req.path = String::from("System/Finder");

        let decoded = FsRequest::decode(&req.encode()).expect("decode");
        assert_eq!(decoded.kind, FsMessageKind::Lookup);
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.file_id, 0xDEAD_BEEF);
        assert_eq!(decoded.offset, 12345);
        assert_eq!(decoded.length, 77);
        assert_eq!(decoded.path, "System/Finder");
    }

    #[test]
    fn response_roundtrips_with_payload() {
        let mut resp = FsResponse::ok(7);
        resp.param1 = 1_048_576;
        resp.param2 = 524_288;
        resp.data = b"hello".to_vec();
        resp.data_length = 5;

        let decoded = FsResponse::decode(&resp.encode()).expect("decode");
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.result, 0);
        assert_eq!(decoded.data_length, 5);
        assert_eq!(&decoded.data, b"hello");
        assert_eq!(decoded.param1, 1_048_576);
        assert_eq!(decoded.param2, 524_288);
    }

    #[test]
    fn bad_sizes_are_rejected() {
        assert!(FsRequest::decode(&[0u8; 10]).is_none());
        assert!(FsResponse::decode(&[0u8; 10]).is_none());
    }

    #[test]
    fn dir_entries_pack_and_unpack() {
        let entries = vec![
            DirEntryInfo {
                name: String::from("System"),
                id: 2,
                is_dir: true,
            },
            DirEntryInfo {
                name: String::from("hello.txt"),
                id: 9,
                is_dir: false,
            },
        ];
        let packed = pack_dir_entries(&entries);
        assert_eq!(unpack_dir_entries(&packed), entries);
    }

    #[test]
    fn register_rejects_duplicates() {
        let req = sys7_ipc::create_queue("fsd-test-req").unwrap();
        let resp = sys7_ipc::create_queue("fsd-test-resp").unwrap();
        assert!(register("dup-test-d", 100, req, resp));
        assert!(!register("dup-test-d", 101, req, resp));
        assert!(is_registered("dup-test-d"));
        unregister("dup-test-d");
        assert!(!is_registered("dup-test-d"));
        sys7_ipc::destroy_queue(req);
        sys7_ipc::destroy_queue(resp);
    }

    #[test]
    fn get_stats_roundtrip_through_a_daemon_thread() {
        // A daemon named HFSd serves GetStats with canned totals; the
        // kernel-side bridge must see exactly those numbers.
        unsafe { sys7_ipc::set_yield_fn(std::thread::yield_now) };
        let req_port = sys7_ipc::create_queue("hfsd-req").unwrap();
        let resp_port = sys7_ipc::create_queue("hfsd-resp").unwrap();
        assert!(register("HFSd", 42, req_port, resp_port));

        let server = std::thread::spawn(move || {
            let mut buf = [0u8; REQUEST_SIZE];
            let len = sys7_ipc::recv(req_port, &mut buf).unwrap();
            assert_eq!(len, REQUEST_SIZE);
            let req = FsRequest::decode(&buf).unwrap();
            assert_eq!(req.kind, FsMessageKind::GetStats);

            let mut resp = FsResponse::ok(req.request_id);
            resp.param1 = 1_048_576;
            resp.param2 = 524_288;
            sys7_ipc::send(resp_port, &resp.encode()).unwrap();
        });

        let (total, free) = get_stats("HFSd").expect("stats");
        assert_eq!(total, 1_048_576);
        assert_eq!(free, 524_288);

        server.join().unwrap();
        unregister("HFSd");
        sys7_ipc::destroy_queue(req_port);
        sys7_ipc::destroy_queue(resp_port);
    }

    #[test]
    fn missing_daemon_surfaces_as_error() {
        assert!(matches!(
            get_stats("no-such-daemon"),
            Err(FsError::NotFound)
        ));
    }
}
