//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Fixed-capacity byte ring between the transport's receive thread and a
//! notification dispatcher.
//!
//! The producer writes whole notification streams, all-or-nothing and without
//! blocking. The consumer reads typed little-endian values and blocks until
//! enough bytes have arrived or the ring is closed. Only one thread may
//! consume at a time; the ring does not enforce this.

use parking_lot::{Condvar, Mutex};
use thiserror::Error;


/// Default capacity of a per-connection ring.
pub const DEFAULT_RING_CAPACITY : usize = 4 * 1024 * 1024;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("ring buffer is closed")]
    Closed,
    #[error("ring buffer full: {needed} bytes needed, {free} free")]
    Full { needed : usize, free : usize },
}


struct RingState {
    data : Box<[u8]>,
    /// Index of the oldest unread byte.
    read : usize,
    /// Number of unread bytes.
    len : usize,
    closed : bool
}

impl RingState {

    fn free(&self) -> usize {
        self.data.len() - self.len
    }

    fn push(&mut self, bytes : &[u8]) {
        let cap = self.data.len();
        let write = (self.read + self.len) % cap;
        let first = bytes.len().min(cap - write);
        self.data[write..write + first].copy_from_slice(&bytes[..first]);
        self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.len += bytes.len();
    }

    /// Move up to `out.len()` bytes out of the ring. Returns the count moved.
    fn pop_into(&mut self, out : &mut [u8]) -> usize {
        let cap = self.data.len();
        let n = out.len().min(self.len);
        let first = n.min(cap - self.read);
        out[..first].copy_from_slice(&self.data[self.read..self.read + first]);
        out[first..n].copy_from_slice(&self.data[..n - first]);
        self.read = (self.read + n) % cap;
        self.len -= n;
        return n;
    }

    fn discard(&mut self, count : usize) -> usize {
        let n = count.min(self.len);
        self.read = (self.read + n) % self.data.len();
        self.len -= n;
        return n;
    }
}


pub struct RingBuffer {
    state : Mutex<RingState>,
    readable : Condvar
}

impl RingBuffer {

    pub fn new(capacity : usize) -> Self {
        Self {
            state : Mutex::new(RingState {
                data : vec![0u8; capacity.max(1)].into_boxed_slice(),
                read : 0,
                len : 0,
                closed : false
            }),
            readable : Condvar::new()
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append `bytes` entirely or not at all. Never blocks.
    pub fn write(&self, bytes : &[u8]) -> Result<(), RingError> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(RingError::Closed);
        }

        let free = state.free();
        if bytes.len() > free {
            return Err(RingError::Full { needed : bytes.len(), free });
        }

        state.push(bytes);
        drop(state);

        self.readable.notify_all();
        return Ok(());
    }

    /// Fill `out` completely, blocking until the bytes arrive.
    pub fn read_exact(&self, out : &mut [u8]) -> Result<(), RingError> {
        let mut filled = 0;
        let mut state = self.state.lock();

        while filled < out.len() {
            if state.closed {
                return Err(RingError::Closed);
            }
            if state.len == 0 {
                self.readable.wait(&mut state);
                continue;
            }
            filled += state.pop_into(&mut out[filled..]);
        }

        return Ok(());
    }

    /// Discard exactly `count` bytes, blocking until they arrive.
    pub fn skip(&self, count : usize) -> Result<(), RingError> {
        let mut remaining = count;
        let mut state = self.state.lock();

        while remaining > 0 {
            if state.closed {
                return Err(RingError::Closed);
            }
            if state.len == 0 {
                self.readable.wait(&mut state);
                continue;
            }
            remaining -= state.discard(remaining);
        }

        return Ok(());
    }

    pub fn read_u32(&self) -> Result<u32, RingError> {
        let mut raw = [0u8; 4];
        self.read_exact(&mut raw)?;
        return Ok(u32::from_le_bytes(raw));
    }

    pub fn read_u64(&self) -> Result<u64, RingError> {
        let mut raw = [0u8; 8];
        self.read_exact(&mut raw)?;
        return Ok(u64::from_le_bytes(raw));
    }

    /// Wake every blocked reader. Pending and later reads fail with `Closed`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}
