//! # Recycle Pool - Buffer Reuse Across Frames
//!
//! A decode loop asks for the same few buffer sizes over and over (one per
//! plane layout). The pool keeps released buffers in free lists keyed by size
//! class so the next frame reuses them instead of hitting the allocator.
//!
//! ## Retention policy
//!
//! - Each size class is an LRU list: `acquire` takes the most recently
//!   released buffer, and once a class holds more than
//!   `max_buffers_per_class` buffers the least recently released one is freed.
//! - Across classes, retained bytes are capped at `max_retained_bytes`;
//!   excess is freed starting from the largest size class.
//!
//! ```text
//! ┌──────────┐ acquire  ┌─────────────┐  drop   ┌──────────┐
//! │ Decoder  │◄─────────│ RecyclePool │◄────────│ Consumer │
//! └──────────┘          └─────────────┘         └──────────┘
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::buffer::SampleBuffer;
use crate::config::PoolConfig;
use crate::error::{MediaError, Result};

#[derive(Default)]
struct FreeLists {
    /// size class -> buffers, oldest release at the front
    classes: BTreeMap<usize, VecDeque<SampleBuffer<u8>>>,
    retained_bytes: usize,
    available: usize,
}

/// Shared cache of byte buffers keyed by allocation size.
pub struct RecyclePool {
    config: PoolConfig,
    free: Mutex<FreeLists>,
    allocated: AtomicU64,
    recycled: AtomicU64,
    dropped: AtomicU64,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub size_classes: usize,
    pub retained_bytes: usize,
    pub total_allocated: u64,
    pub total_recycled: u64,
    pub total_dropped: u64,
}

impl RecyclePool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            free: Mutex::new(FreeLists::default()),
            allocated: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get a buffer of exactly `size` bytes with capacity for its size class.
    /// Contents are unspecified.
    pub fn acquire(&self, size: usize) -> Result<SampleBuffer<u8>> {
        let class = self
            .config
            .size_class(size)
            .ok_or(MediaError::OutOfMemory { bytes: size })?;

        let reused = {
            let mut free = self.free.lock();
            let popped = free.classes.get_mut(&class).and_then(|list| list.pop_back());
            if popped.is_some() {
                free.retained_bytes -= class;
                free.available -= 1;
                if free.classes.get(&class).is_some_and(|list| list.is_empty()) {
                    free.classes.remove(&class);
                }
            }
            popped
        };

        let mut buffer = match reused {
            Some(buffer) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                let buffer = SampleBuffer::with_length(class)?;
                self.allocated.fetch_add(1, Ordering::Relaxed);
                buffer
            }
        };
        buffer.set_length(size)?;
        Ok(buffer)
    }

    /// Like [`acquire`](Self::acquire), but the buffer finds its own way back
    /// to the pool when dropped.
    pub fn acquire_pooled(self: &Arc<Self>, size: usize) -> Result<PooledBuffer> {
        let buffer = self.acquire(size)?;
        Ok(PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        })
    }

    /// Return a buffer to the free list of the largest size class its
    /// capacity can serve. Buffers smaller than one class are freed.
    pub fn release(&self, mut buffer: SampleBuffer<u8>) {
        let class = self.config.class_for_capacity(buffer.capacity());
        if class == 0 {
            if buffer.capacity() > 0 {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }
        buffer.clear();

        let mut free = self.free.lock();
        free.classes.entry(class).or_default().push_back(buffer);
        free.retained_bytes += class;
        free.available += 1;

        let mut evicted = 0u64;
        if let Some(list) = free.classes.get_mut(&class) {
            while list.len() > self.config.max_buffers_per_class {
                list.pop_front();
                evicted += 1;
            }
        }
        free.retained_bytes -= class * evicted as usize;
        free.available -= evicted as usize;

        while free.retained_bytes > self.config.max_retained_bytes {
            let Some((&largest, _)) = free.classes.iter().next_back() else {
                break;
            };
            let emptied = {
                let list = free.classes.get_mut(&largest).map(|list| {
                    list.pop_front();
                    list.is_empty()
                });
                list.unwrap_or(true)
            };
            if emptied {
                free.classes.remove(&largest);
            }
            free.retained_bytes -= largest;
            free.available -= 1;
            evicted += 1;
        }
        free.classes.retain(|_, list| !list.is_empty());

        if evicted > 0 {
            self.dropped.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(
                "Recycle pool dropped {} buffer(s), {} bytes retained",
                evicted,
                free.retained_bytes
            );
        }
    }

    /// Free every retained buffer.
    pub fn clear(&self) {
        let mut free = self.free.lock();
        let count = free.available as u64;
        *free = FreeLists::default();
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PoolStats {
        let free = self.free.lock();
        PoolStats {
            available: free.available,
            size_classes: free.classes.len(),
            retained_bytes: free.retained_bytes,
            total_allocated: self.allocated.load(Ordering::Relaxed),
            total_recycled: self.recycled.load(Ordering::Relaxed),
            total_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for RecyclePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecyclePool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Buffer on loan from a [`RecyclePool`]; returned when dropped.
pub struct PooledBuffer {
    buffer: Option<SampleBuffer<u8>>,
    pool: Arc<RecyclePool>,
}

impl PooledBuffer {
    /// Allocation size including size-class slack.
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.capacity())
    }

    pub fn pool(&self) -> &Arc<RecyclePool> {
        &self.pool
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_ref().map(|b| b.as_slice()).unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self.buffer.as_mut() {
            Some(b) => b.as_mut_slice(),
            None => &mut [][..],
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max_retained_bytes: usize, max_buffers_per_class: usize) -> Arc<RecyclePool> {
        Arc::new(
            RecyclePool::new(PoolConfig {
                max_retained_bytes,
                max_buffers_per_class,
                size_class_granularity: 64,
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_acquire_reuses_released_buffer() {
        let pool = pool(1 << 20, 4);
        let first = pool.acquire(100).unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(first.capacity(), 128);
        let addr = first.as_slice().as_ptr();
        pool.release(first);

        // Same size class, different request size.
        let second = pool.acquire(120).unwrap();
        assert_eq!(second.len(), 120);
        assert_eq!(second.as_slice().as_ptr(), addr);

        let stats = pool.stats();
        assert_eq!(stats.total_allocated, 1);
        assert_eq!(stats.total_recycled, 1);
        assert_eq!(stats.available, 0);
    }

    #[test]
    fn test_different_class_allocates() {
        let pool = pool(1 << 20, 4);
        pool.release(pool.acquire(64).unwrap());
        let big = pool.acquire(4096).unwrap();
        assert_eq!(big.len(), 4096);
        let stats = pool.stats();
        assert_eq!(stats.total_allocated, 2);
        assert_eq!(stats.available, 1);
    }

    #[test]
    fn test_per_class_cap_drops_oldest() {
        let pool = pool(1 << 20, 2);
        let buffers: Vec<_> = (0..3).map(|_| pool.acquire(64).unwrap()).collect();
        let newest = buffers[2].as_slice().as_ptr();
        for b in buffers {
            pool.release(b);
        }
        let stats = pool.stats();
        assert_eq!(stats.available, 2);
        assert_eq!(stats.total_dropped, 1);
        assert_eq!(stats.retained_bytes, 128);
        // Most recently released comes back first.
        assert_eq!(pool.acquire(64).unwrap().as_slice().as_ptr(), newest);
    }

    #[test]
    fn test_byte_cap_evicts_largest_class() {
        crate::init_test_logging();
        let pool = pool(1024, 8);
        let small = pool.acquire(64).unwrap();
        let large = pool.acquire(1024).unwrap();
        pool.release(small);
        pool.release(large);

        let stats = pool.stats();
        assert_eq!(stats.retained_bytes, 64);
        assert_eq!(stats.size_classes, 1);
        assert_eq!(stats.total_dropped, 1);
    }

    #[test]
    fn test_foreign_capacity_is_filed_under_servable_class() {
        let pool = pool(1 << 20, 4);
        let foreign = SampleBuffer::<u8>::with_length(96).unwrap();
        let addr = foreign.as_slice().as_ptr();
        pool.release(foreign);
        assert_eq!(pool.stats().retained_bytes, 64);

        let reused = pool.acquire(60).unwrap();
        assert_eq!(reused.as_slice().as_ptr(), addr);
        assert_eq!(reused.len(), 60);
        let stats = pool.stats();
        assert_eq!(stats.total_recycled, 1);
        assert_eq!(stats.total_allocated, 0);
        assert_eq!(stats.available, 0);
    }

    #[test]
    fn test_buffer_below_one_class_is_dropped() {
        let pool = pool(1 << 20, 4);
        pool.release(SampleBuffer::with_length(32).unwrap());
        let stats = pool.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.retained_bytes, 0);
        assert_eq!(stats.total_dropped, 1);
    }

    #[test]
    fn test_huge_request_is_out_of_memory() {
        let pool = pool(1 << 20, 4);
        let err = pool.acquire(usize::MAX - 10).unwrap_err();
        assert_eq!(err, MediaError::OutOfMemory { bytes: usize::MAX - 10 });
        assert!(matches!(pool.acquire_pooled(usize::MAX / 2), Err(MediaError::OutOfMemory { .. })));
        assert_eq!(pool.stats().total_allocated, 0);
    }

    #[test]
    fn test_pooled_buffer_returns_on_drop() {
        let pool = pool(1 << 20, 4);
        {
            let mut loan = pool.acquire_pooled(10).unwrap();
            loan[0] = 42;
            assert_eq!(loan.len(), 10);
            assert_eq!(pool.stats().available, 0);
        }
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().retained_bytes, 64);
    }

    #[test]
    fn test_clear_and_stats_json() {
        let pool = pool(1 << 20, 4);
        pool.release(pool.acquire(64).unwrap());
        pool.clear();
        let stats = pool.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.total_dropped, 1);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["retained_bytes"], 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = pool(1 << 20, 16);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let b = pool.acquire(256).unwrap();
                        pool.release(b);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.total_allocated + stats.total_recycled, 400);
        assert!(stats.available <= 4);
    }
}
