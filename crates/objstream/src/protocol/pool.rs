//! Pool of reusable byte buffers keyed by power-of-two size class.
//!
//! Frame encoding and the read-side pending buffer take buffers from the pool
//! and give them back when a read or write cycle completes, so sustained
//! traffic does not allocate per frame.
//!
//! # Design
//!
//! - Class `n` holds buffers whose capacity is at least `2^n` bytes
//! - Each class keeps at most [`BufferPool::MAX_PER_CLASS`] idle buffers
//! - Buffers larger than [`BufferPool::MAX_POOLED_CAPACITY`] are dropped on
//!   release instead of being kept alive, so one huge frame cannot pin
//!   memory for the lifetime of the stream

use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const MIN_CLASS: u32 = 10; // 1KB
const MAX_CLASS: u32 = 20; // 1MB
const CLASS_COUNT: usize = (MAX_CLASS - MIN_CLASS + 1) as usize;

/// Pool usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquisitions served from an idle buffer.
    pub hits: u64,
    /// Acquisitions that had to allocate.
    pub misses: u64,
    /// Buffers dropped on release (too large or class full).
    pub discarded: u64,
}

/// Thread-safe pool of `BytesMut` buffers.
#[derive(Debug)]
pub struct BufferPool {
    classes: [Mutex<Vec<BytesMut>>; CLASS_COUNT],
    hits: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
}

impl BufferPool {
    pub const MAX_PER_CLASS: usize = 8;
    pub const MAX_POOLED_CAPACITY: usize = 1 << MAX_CLASS;

    pub fn new() -> Self {
        Self {
            classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Take an empty buffer with at least `min_capacity` bytes of capacity.
    pub fn acquire(&self, min_capacity: usize) -> BytesMut {
        let Some(class) = class_for_request(min_capacity) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return BytesMut::with_capacity(min_capacity);
        };

        let pooled = self.classes[class]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        match pooled {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(1 << (class as u32 + MIN_CLASS))
            }
        }
    }

    /// Give a buffer back. Its contents are cleared.
    pub fn release(&self, mut buf: BytesMut) {
        let Some(class) = class_for_capacity(buf.capacity()) else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };

        buf.clear();
        let mut idle = self.classes[class]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < Self::MAX_PER_CLASS {
            idle.push(buf);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of idle buffers across all classes.
    pub fn idle(&self) -> usize {
        self.classes
            .iter()
            .map(|class| class.lock().unwrap_or_else(|p| p.into_inner()).len())
            .sum()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest class whose buffers can hold `len` bytes.
fn class_for_request(len: usize) -> Option<usize> {
    let bits = len.max(1).next_power_of_two().trailing_zeros().max(MIN_CLASS);
    (bits <= MAX_CLASS).then(|| (bits - MIN_CLASS) as usize)
}

/// Largest class a buffer of `capacity` bytes satisfies.
fn class_for_capacity(capacity: usize) -> Option<usize> {
    if capacity < (1 << MIN_CLASS) || capacity > BufferPool::MAX_POOLED_CAPACITY {
        return None;
    }
    let bits = usize::BITS - 1 - capacity.leading_zeros();
    Some((bits - MIN_CLASS) as usize)
}
