//! Growable byte FIFO shared between the protocol driver and the shell reader.
//!
//! Decrypted `SSH_MSG_CHANNEL_DATA` payload is appended by the connection and
//! drained by [`ShellReader`](super::stream::ShellReader). The queue is a ring
//! buffer that grows on demand, so writes never fail and reads never block.
//!
//! # Example
//!
//! ```rust
//! use cellsh_proto::ssh::ByteQueue;
//!
//! let queue = ByteQueue::with_capacity(8);
//! queue.write(b"hello world");
//! assert_eq!(queue.available(), 11);
//!
//! let mut buf = [0u8; 5];
//! assert_eq!(queue.read(&mut buf), 5);
//! assert_eq!(&buf, b"hello");
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Initial capacity of a connection's channel queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Extra room reserved on growth so a run of small writes does not resize
/// every time.
const GROWTH_SLACK: usize = 256;

/// Ring storage. One slot always stays empty so that `head == tail` means
/// the queue holds nothing.
#[derive(Debug)]
struct Ring {
    data: Vec<u8>,
    head: usize,
    tail: usize,
}

impl Ring {
    fn available(&self) -> usize {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            self.data.len() - (self.head - self.tail)
        }
    }

    fn free(&self) -> usize {
        self.data.len() - self.available() - 1
    }

    /// Moves the contents into a larger buffer starting at index 0.
    fn grow(&mut self, new_len: usize) {
        let count = self.available();
        let mut data = vec![0u8; new_len];

        if self.tail >= self.head {
            data[..count].copy_from_slice(&self.data[self.head..self.tail]);
        } else {
            let first = self.data.len() - self.head;
            data[..first].copy_from_slice(&self.data[self.head..]);
            data[first..count].copy_from_slice(&self.data[..self.tail]);
        }

        self.data = data;
        self.head = 0;
        self.tail = count;
    }

    fn write(&mut self, bytes: &[u8]) {
        if bytes.len() > self.free() {
            let needed = self.available() + bytes.len() + GROWTH_SLACK;
            self.grow(needed.max(self.data.len() * 2));
        }

        let cap = self.data.len();
        let first = bytes.len().min(cap - self.tail);
        self.data[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        self.data[..rest].copy_from_slice(&bytes[first..]);
        self.tail = (self.tail + bytes.len()) % cap;
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.available());
        let cap = self.data.len();
        let first = count.min(cap - self.head);
        out[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        out[first..count].copy_from_slice(&self.data[..count - first]);
        self.head = (self.head + count) % cap;
        count
    }
}

/// Thread-safe FIFO of bytes.
///
/// All methods take `&self`; the queue is meant to be shared through an
/// `Arc` between the task driving the connection and the task reading the
/// shell output.
#[derive(Debug)]
pub struct ByteQueue {
    ring: Mutex<Ring>,
}

impl ByteQueue {
    /// Creates an empty queue with [`DEFAULT_QUEUE_CAPACITY`] bytes of storage.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates an empty queue able to hold `capacity - 1` bytes before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                data: vec![0u8; capacity.max(2)],
                head: 0,
                tail: 0,
            }),
        }
    }

    // A panic while holding the lock cannot leave the ring half-updated in a
    // way that breaks the index invariants, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `bytes`, growing the storage if needed. Always succeeds.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.lock().write(bytes);
    }

    /// Pops up to `out.len()` bytes in FIFO order and returns how many were
    /// copied. Returns 0 when the queue is empty.
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.lock().read(out)
    }

    /// Number of bytes waiting to be read.
    pub fn available(&self) -> usize {
        self.lock().available()
    }

    /// Returns true if no bytes are waiting.
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Current size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.lock().data.len()
    }
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}
