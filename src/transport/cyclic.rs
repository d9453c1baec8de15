//! Fixed-capacity byte ring shared between the firmware and interrupt contexts
//!
//! One slot is always kept free, so a buffer of capacity `n` holds at most
//! `n - 1` bytes and "full" means exactly `n - 1` unread bytes. The ring is
//! self-locking: producers and consumers on different threads block on the
//! buffer's own condition variables, never on the card register lock.

use std::time::Duration;

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use crate::{MfcError, Result};

bitflags! {
    /// Sticky error conditions attached to a data path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferFlags: u8 {
        /// A transport read failed (framing or overrun on the UART).
        const READ_ERROR = 0x01;
        /// A push timed out and the buffer was reset.
        const OVERFLOW = 0x02;
        /// The remote end stopped sending keep-alive traffic.
        const OFFLINE = 0x04;
    }
}

/// Smallest usable capacity (one byte plus the reserved slot).
pub const MIN_CAPACITY: usize = 2;

#[derive(Debug)]
struct Ring {
    data: Vec<u8>,
    read: usize,
    write: usize,
    flags: BufferFlags,
}

impl Ring {
    fn len(&self) -> usize {
        let cap = self.data.len();
        (self.write + cap - self.read) % cap
    }

    fn is_full(&self) -> bool {
        self.len() == self.data.len() - 1
    }

    fn push(&mut self, byte: u8) {
        let cap = self.data.len();
        self.data[self.write] = byte;
        self.write = (self.write + 1) % cap;
    }

    fn pop(&mut self) -> u8 {
        let cap = self.data.len();
        let byte = self.data[self.read];
        self.read = (self.read + 1) % cap;
        byte
    }
}

/// Cyclic buffer for one of the card's four data paths.
#[derive(Debug)]
pub struct CyclicBuffer {
    name: &'static str,
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl CyclicBuffer {
    /// Create a buffer with `capacity` slots (`capacity - 1` usable).
    ///
    /// # Errors
    ///
    /// Returns [`MfcError::ConfigError`] if `capacity` is below [`MIN_CAPACITY`].
    pub fn new(name: &'static str, capacity: usize) -> Result<Self> {
        if capacity < MIN_CAPACITY {
            return Err(MfcError::ConfigError(format!(
                "{name} buffer capacity {capacity} is below {MIN_CAPACITY}"
            )));
        }
        Ok(Self {
            name,
            ring: Mutex::new(Ring {
                data: vec![0; capacity],
                read: 0,
                write: 0,
                flags: BufferFlags::empty(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    /// Name used in log output.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of slots including the reserved one.
    pub fn capacity(&self) -> usize {
        self.ring.lock().data.len()
    }

    /// Unread bytes.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// No unread bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exactly `capacity - 1` unread bytes.
    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }

    /// Append a byte unless the buffer is full.
    pub fn try_push(&self, byte: u8) -> bool {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            return false;
        }
        ring.push(byte);
        drop(ring);
        self.not_empty.notify_all();
        true
    }

    /// Append a byte, waiting up to `timeout` for space.
    pub fn push_timeout(&self, byte: u8, timeout: Duration) -> bool {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            let _ = self
                .not_full
                .wait_while_for(&mut ring, |r| r.is_full(), timeout);
            if ring.is_full() {
                return false;
            }
        }
        ring.push(byte);
        drop(ring);
        self.not_empty.notify_all();
        true
    }

    /// Remove the oldest byte, if any.
    pub fn try_pop(&self) -> Option<u8> {
        let mut ring = self.ring.lock();
        if ring.len() == 0 {
            return None;
        }
        let byte = ring.pop();
        drop(ring);
        self.not_full.notify_all();
        Some(byte)
    }

    /// Remove the oldest byte, waiting up to `timeout` for one to arrive.
    ///
    /// [`wake_all`](Self::wake_all) ends the wait early with `None`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<u8> {
        let mut ring = self.ring.lock();
        if ring.len() == 0 {
            let _ = self.not_empty.wait_for(&mut ring, timeout);
            if ring.len() == 0 {
                return None;
            }
        }
        let byte = ring.pop();
        drop(ring);
        self.not_full.notify_all();
        Some(byte)
    }

    /// Discard all unread bytes. Flags are kept.
    pub fn reset(&self) {
        let mut ring = self.ring.lock();
        ring.read = 0;
        ring.write = 0;
        drop(ring);
        self.not_full.notify_all();
    }

    /// Current sticky flags.
    pub fn flags(&self) -> BufferFlags {
        self.ring.lock().flags
    }

    /// Raise sticky flags.
    pub fn set_flags(&self, flags: BufferFlags) {
        self.ring.lock().flags |= flags;
    }

    /// Clear sticky flags.
    pub fn clear_flags(&self, flags: BufferFlags) {
        self.ring.lock().flags &= !flags;
    }

    /// Return and clear every sticky flag.
    pub fn take_flags(&self) -> BufferFlags {
        std::mem::take(&mut self.ring.lock().flags)
    }

    /// Wake every waiter, used on shutdown.
    pub fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_tiny_capacity() {
        assert!(CyclicBuffer::new("t", 1).is_err());
        assert!(CyclicBuffer::new("t", 2).is_ok());
    }

    #[test]
    fn full_means_capacity_minus_one() {
        for cap in 2..12 {
            let buf = CyclicBuffer::new("t", cap).unwrap();
            for i in 0..cap - 1 {
                assert!(!buf.is_full(), "cap {cap} full after {i}");
                assert!(buf.try_push(i as u8));
            }
            assert!(buf.is_full());
            assert_eq!(buf.len(), cap - 1);
            assert!(!buf.try_push(0xFF));
            assert_eq!(buf.try_pop(), Some(0));
            assert!(!buf.is_full());
        }
    }

    #[test]
    fn wraps_around_in_order() {
        let buf = CyclicBuffer::new("t", 4).unwrap();
        let mut out = Vec::new();
        for i in 0..10u8 {
            assert!(buf.try_push(i));
            if i % 2 == 1 {
                out.push(buf.try_pop().unwrap());
                out.push(buf.try_pop().unwrap());
            }
        }
        assert_eq!(out, (0..10).collect::<Vec<u8>>());
        assert!(buf.is_empty());
    }

    #[test]
    fn push_timeout_expires_when_full() {
        let buf = CyclicBuffer::new("t", 2).unwrap();
        assert!(buf.try_push(1));
        assert!(!buf.push_timeout(2, Duration::from_millis(5)));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn blocked_pop_wakes_on_push() {
        let buf = Arc::new(CyclicBuffer::new("t", 8).unwrap());
        let consumer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.pop_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(buf.try_push(0x42));
        assert_eq!(consumer.join().unwrap(), Some(0x42));
    }

    #[test]
    fn wake_all_releases_a_blocked_pop() {
        let buf = Arc::new(CyclicBuffer::new("t", 8).unwrap());
        let consumer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let started = std::time::Instant::now();
                (buf.pop_timeout(Duration::from_secs(5)), started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        buf.wake_all();
        let (byte, waited) = consumer.join().unwrap();
        assert_eq!(byte, None);
        assert!(waited < Duration::from_secs(4));
    }

    #[test]
    fn flags_are_sticky_until_taken() {
        let buf = CyclicBuffer::new("t", 4).unwrap();
        buf.set_flags(BufferFlags::READ_ERROR);
        buf.set_flags(BufferFlags::OFFLINE);
        buf.reset();
        assert_eq!(buf.flags(), BufferFlags::READ_ERROR | BufferFlags::OFFLINE);
        assert_eq!(
            buf.take_flags(),
            BufferFlags::READ_ERROR | BufferFlags::OFFLINE
        );
        assert!(buf.flags().is_empty());
    }
}
