//! Inter-process communication: fixed-slot named message queues.
//!
//! A port is a handle to one queue in a fixed table. Each queue is a ring
//! of [`QUEUE_DEPTH`] slots of up to [`MAX_MESSAGE_SIZE`] bytes. Blocking
//! [`send`] and [`recv`] spin on a cooperative yield while the queue is
//! full or empty — safe under this kernel's cooperative producers and
//! consumers, and explicitly not a preemption-grade primitive.
//!
//! The yield is a registered function pointer ([`set_yield_fn`]) so the
//! crate stays free of a scheduler dependency; the kernel registers
//! `thread_yield` at boot, and hosted tests register
//! `std::thread::yield_now`.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod queue;

pub use queue::MessageQueue;

use core::fmt;
use core::sync::atomic::{AtomicPtr, Ordering};

use alloc::boxed::Box;

use sys7_core::sync::SpinLock;

/// Largest message a queue slot can carry.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Messages a queue can hold before senders block.
pub const QUEUE_DEPTH: usize = 16;

/// Maximum number of live queues.
pub const MAX_QUEUES: usize = 32;

/// Handle to a message queue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Port(u32);

impl Port {
    /// Returns the raw slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port{}", self.0)
    }
}

/// IPC failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// The port does not name a live queue.
    BadPort,
    /// The message exceeds [`MAX_MESSAGE_SIZE`].
    MessageTooLarge,
    /// The receive buffer is smaller than the queued message.
    BufferTooSmall,
    /// The queue table is full.
    TooManyQueues,
    /// Non-blocking send on a full queue.
    QueueFull,
    /// Non-blocking receive on an empty queue.
    QueueEmpty,
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPort => f.write_str("invalid message port"),
            Self::MessageTooLarge => f.write_str("message exceeds slot size"),
            Self::BufferTooSmall => f.write_str("receive buffer too small"),
            Self::TooManyQueues => f.write_str("queue table full"),
            Self::QueueFull => f.write_str("queue full"),
            Self::QueueEmpty => f.write_str("queue empty"),
        }
    }
}

// ── Cooperative yield hook ──────────────────────────────────────────────

fn default_yield() {
    core::hint::spin_loop();
}

static YIELD_FN: AtomicPtr<()> = AtomicPtr::new(default_yield as *mut ());

/// Registers the cooperative yield used while blocking.
///
/// # Safety
///
/// `f` must be callable from any thread context and must eventually allow
/// queue counterparties to make progress.
pub unsafe fn set_yield_fn(f: fn()) {
    YIELD_FN.store(f as *mut (), Ordering::Release);
}

fn yield_now() {
    let ptr = YIELD_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `fn()` pointers are stored in YIELD_FN.
    let f: fn() = unsafe { core::mem::transmute(ptr) };
    f();
}

// ── Queue table ─────────────────────────────────────────────────────────

struct QueueTable {
    slots: [Option<Box<MessageQueue>>; MAX_QUEUES],
    count: usize,
}

impl QueueTable {
    const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_QUEUES],
            count: 0,
        }
    }
}

static QUEUES: SpinLock<QueueTable> = SpinLock::new(QueueTable::new());

/// Creates a named queue, returning its port.
///
/// # Errors
///
/// Returns [`IpcError::TooManyQueues`] when all slots are live.
pub fn create_queue(name: &str) -> Result<Port, IpcError> {
    let mut table = QUEUES.lock();
    if table.count >= MAX_QUEUES {
        return Err(IpcError::TooManyQueues);
    }
    for (i, slot) in table.slots.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(Box::new(MessageQueue::new(name)));
            table.count += 1;
            sys7_core::kdebug!("ipc: created queue '{name}' (port{i})");
            return Ok(Port(i as u32));
        }
    }
    Err(IpcError::TooManyQueues)
}

/// Destroys a queue, dropping any unread messages.
pub fn destroy_queue(port: Port) {
    let mut table = QUEUES.lock();
    if let Some(slot) = table.slots.get_mut(port.index()) {
        if slot.take().is_some() {
            table.count -= 1;
        }
    }
}

fn with_queue<R>(port: Port, f: impl FnOnce(&mut MessageQueue) -> R) -> Result<R, IpcError> {
    let mut table = QUEUES.lock();
    let queue = table
        .slots
        .get_mut(port.index())
        .and_then(Option::as_mut)
        .ok_or(IpcError::BadPort)?;
    Ok(f(queue))
}

/// Sends a message, yielding cooperatively while the queue is full.
///
/// # Errors
///
/// [`IpcError::BadPort`] or [`IpcError::MessageTooLarge`]; a full queue
/// blocks instead of failing.
pub fn send(port: Port, message: &[u8]) -> Result<(), IpcError> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge);
    }
    loop {
        match try_send(port, message) {
            Err(IpcError::QueueFull) => yield_now(),
            other => return other,
        }
    }
}

/// Receives a message into `buf`, yielding cooperatively while the queue
/// is empty. Returns the message length.
///
/// # Errors
///
/// [`IpcError::BadPort`] or [`IpcError::BufferTooSmall`]; an empty queue
/// blocks instead of failing.
pub fn recv(port: Port, buf: &mut [u8]) -> Result<usize, IpcError> {
    loop {
        match try_recv(port, buf) {
            Err(IpcError::QueueEmpty) => yield_now(),
            other => return other,
        }
    }
}

/// Non-blocking send.
///
/// # Errors
///
/// [`IpcError::QueueFull`] when no slot is free, plus the [`send`] errors.
pub fn try_send(port: Port, message: &[u8]) -> Result<(), IpcError> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge);
    }
    with_queue(port, |q| q.push(message))?
}

/// Non-blocking receive.
///
/// # Errors
///
/// [`IpcError::QueueEmpty`] when nothing is queued, plus the [`recv`]
/// errors.
pub fn try_recv(port: Port, buf: &mut [u8]) -> Result<usize, IpcError> {
    with_queue(port, |q| q.pop(buf))?
}

/// Number of queued messages, or 0 for a dead port.
#[must_use]
pub fn queue_len(port: Port) -> usize {
    with_queue(port, |q| q.len()).unwrap_or(0)
}

/// Whether the queue is empty (dead ports count as empty).
#[must_use]
pub fn is_empty(port: Port) -> bool {
    queue_len(port) == 0
}

/// Whether the queue is full (dead ports count as not full).
#[must_use]
pub fn is_full(port: Port) -> bool {
    with_queue(port, |q| q.len() >= QUEUE_DEPTH).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_port(name: &str) -> Port {
        unsafe { set_yield_fn(std::thread::yield_now) };
        create_queue(name).expect("queue slot")
    }

    #[test]
    fn send_recv_roundtrip() {
        let port = test_port("rt");
        send(port, b"hello nanokernel").unwrap();
        let mut buf = [0u8; 64];
        let n = recv(port, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello nanokernel");
        destroy_queue(port);
    }

    #[test]
    fn fifo_order_per_port() {
        let port = test_port("fifo");
        for i in 0u8..5 {
            send(port, &[i]).unwrap();
        }
        for i in 0u8..5 {
            let mut buf = [0u8; 1];
            assert_eq!(recv(port, &mut buf).unwrap(), 1);
            assert_eq!(buf[0], i);
        }
        destroy_queue(port);
    }

    #[test]
    fn oversize_message_rejected() {
        let port = test_port("big");
        let big = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert_eq!(send(port, &big), Err(IpcError::MessageTooLarge));
        destroy_queue(port);
    }

    #[test]
    fn try_send_full_queue_fails_fast() {
        let port = test_port("full");
        for _ in 0..QUEUE_DEPTH {
            try_send(port, b"x").unwrap();
        }
        assert!(is_full(port));
        assert_eq!(try_send(port, b"x"), Err(IpcError::QueueFull));
        destroy_queue(port);
    }

    #[test]
    fn try_recv_empty_queue_fails_fast() {
        let port = test_port("empty");
        let mut buf = [0u8; 8];
        assert_eq!(try_recv(port, &mut buf), Err(IpcError::QueueEmpty));
        destroy_queue(port);
    }

    #[test]
    fn small_buffer_rejected_without_losing_message() {
        let port = test_port("small");
        send(port, b"0123456789").unwrap();
        let mut tiny = [0u8; 4];
        assert_eq!(try_recv(port, &mut tiny), Err(IpcError::BufferTooSmall));
        // Message still queued.
        let mut buf = [0u8; 16];
        assert_eq!(recv(port, &mut buf).unwrap(), 10);
        destroy_queue(port);
    }

    #[test]
    fn dead_port_is_rejected() {
        let port = test_port("dead");
        destroy_queue(port);
        assert_eq!(try_send(port, b"x"), Err(IpcError::BadPort));
        let mut buf = [0u8; 1];
        assert_eq!(try_recv(port, &mut buf), Err(IpcError::BadPort));
    }

    #[test]
    fn blocking_send_completes_when_drained() {
        let port = test_port("drain");
        for _ in 0..QUEUE_DEPTH {
            try_send(port, b"fill").unwrap();
        }

        let consumer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let mut buf = [0u8; 16];
            recv(port, &mut buf).unwrap()
        });

        // Blocks until the consumer frees a slot.
        send(port, b"late").unwrap();
        assert_eq!(consumer.join().unwrap(), 4);
        destroy_queue(port);
    }

    #[test]
    fn each_message_delivered_exactly_once() {
        let port = test_port("once");
        for i in 0u8..8 {
            send(port, &[i, i, i]).unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..8 {
            let mut buf = [0u8; 3];
            recv(port, &mut buf).unwrap();
            assert!(seen.insert(buf[0]));
        }
        assert!(is_empty(port));
        destroy_queue(port);
    }
}
