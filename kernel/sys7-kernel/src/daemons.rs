//! Filesystem daemon hosting.
//!
//! Daemons are the user-space side of the FSD bridge; until address
//! spaces land they run as kernel threads speaking the same IPC
//! protocol. [`spawn_fs_daemon`] wires the queues, registers the daemon,
//! and starts a thread running the shared event loop against a mounted
//! volume.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use sys7_core::kerr;
use sys7_fs::{FsError, daemon, vfs};
use sys7_ipc::Port;
use sys7_sched::{DEFAULT_STACK_SIZE, scheduler, task};

struct DaemonArgs {
    name: String,
    request_port: Port,
    response_port: Port,
    volume: Arc<vfs::Volume>,
}

extern "C" fn daemon_thread_entry(arg: usize) {
    // SAFETY: The argument is the Box<DaemonArgs> leaked by
    // spawn_fs_daemon, handed to exactly one thread.
    let args = unsafe { Box::from_raw(arg as *mut DaemonArgs) };
    daemon::event_loop(&args.name, args.request_port, args.response_port, &args.volume);
}

/// Starts a filesystem daemon serving `volume_name` under `daemon_name`.
///
/// Creates the request/response queues, registers the daemon with the
/// bridge, and spawns the serving thread.
///
/// # Errors
///
/// [`FsError::NotFound`] for an unknown volume; [`FsError::TableFull`]
/// when queues, the daemon table, or thread creation fail.
pub fn spawn_fs_daemon(daemon_name: &str, volume_name: &str) -> Result<(), FsError> {
    let volume = vfs::get_volume_by_name(volume_name).ok_or(FsError::NotFound)?;

    let request_port = sys7_ipc::create_queue(daemon_name).map_err(|_| FsError::TableFull)?;
    let response_port = sys7_ipc::create_queue(daemon_name).map_err(|_| FsError::TableFull)?;

    let daemon_task = task::task_create();
    if !daemon::register(
        daemon_name,
        daemon_task.pid().as_u32(),
        request_port,
        response_port,
    ) {
        sys7_ipc::destroy_queue(request_port);
        sys7_ipc::destroy_queue(response_port);
        return Err(FsError::TableFull);
    }

    let args = Box::new(DaemonArgs {
        name: String::from(daemon_name),
        request_port,
        response_port,
        volume,
    });

    let arg_ptr = Box::into_raw(args) as usize;
    match scheduler::spawn(
        &daemon_task,
        daemon_thread_entry as usize,
        arg_ptr,
        DEFAULT_STACK_SIZE,
        20,
    ) {
        Some(_) => Ok(()),
        None => {
            // SAFETY: The thread never started; reclaim the args.
            drop(unsafe { Box::from_raw(arg_ptr as *mut DaemonArgs) });
            daemon::unregister(daemon_name);
            kerr!("fsd: failed to spawn thread for {daemon_name}");
            Err(FsError::TableFull)
        }
    }
}
