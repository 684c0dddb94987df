use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::models::error::AudioError;

/// Logical stream offsets. They only ever grow; wrapping is applied when
/// indexing the physical storage.
#[derive(Debug, Clone, Copy, Default)]
struct Positions {
    write: u64,
    read: u64,
    /// Pending flush target, applied by the next `read`.
    flush: Option<u64>,
}

impl Positions {
    fn read_base(&self) -> u64 {
        self.flush.unwrap_or(self.read)
    }

    fn occupied(&self) -> u64 {
        self.write.saturating_sub(self.read_base())
    }
}

/// Single-producer/single-consumer byte ring shared between a real-time
/// hardware callback and one client thread.
///
/// The mutex guards the three position fields only. Every operation takes it
/// twice at most, for O(1) bookkeeping: once to compute bounds and once to
/// commit. The bulk copy in between runs unlocked, so the real-time thread's
/// lock hold time does not depend on the transfer size.
///
/// Physical storage is `allocated_size` bytes, the next power of two at or
/// above `capacity + extra_bytes`. The slack beyond `capacity` is what lets an
/// overrunning writer (`prevent_overflow == false`) advance without touching
/// the region a concurrent reader is copying.
pub struct RingBuffer {
    storage: Box<[AtomicU8]>,
    capacity: usize,
    mask: usize,
    positions: Mutex<Positions>,
}

impl RingBuffer {
    /// Allocate a ring with `capacity` readable bytes and `extra_bytes` of
    /// overrun slack.
    pub fn allocate(capacity: usize, extra_bytes: usize) -> Result<Self, AudioError> {
        if capacity == 0 {
            return Err(AudioError::AllocationFailed("capacity must be positive".into()));
        }

        let allocated_size = capacity
            .checked_add(extra_bytes)
            .and_then(usize::checked_next_power_of_two)
            .ok_or_else(|| {
                AudioError::AllocationFailed(format!(
                    "{} + {} bytes overflows the address space",
                    capacity, extra_bytes
                ))
            })?;

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(allocated_size)
            .map_err(|e| AudioError::AllocationFailed(format!("{} bytes: {}", allocated_size, e)))?;
        storage.resize_with(allocated_size, || AtomicU8::new(0));

        log::debug!(
            "ring buffer allocated: capacity {} extra {} physical {}",
            capacity,
            extra_bytes,
            allocated_size
        );

        Ok(Self {
            storage: storage.into_boxed_slice(),
            capacity,
            mask: allocated_size - 1,
            positions: Mutex::new(Positions::default()),
        })
    }

    /// Release the backing storage.
    ///
    /// Taking `self` by value means no callback can still reach the ring.
    pub fn deallocate(self) {
        log::debug!("ring buffer released: {} bytes", self.storage.len());
        drop(self);
    }

    /// Logical capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Physical size of the backing storage (always a power of two).
    pub fn allocated_size(&self) -> usize {
        self.storage.len()
    }

    /// Write `data` at the write frontier.
    ///
    /// With `prevent_overflow` the write is clamped to free space and returns
    /// 0 when the ring is full. Without it the full length is always accepted
    /// and unread data may be overwritten; the reader then skips what was
    /// lost. Only the newest `capacity` bytes of an oversized write are kept.
    ///
    /// Returns the number of bytes accepted.
    pub fn write(&self, data: &[u8], prevent_overflow: bool) -> usize {
        if data.is_empty() {
            return 0;
        }

        let (write_pos, len) = {
            let pos = self.positions.lock();
            if prevent_overflow {
                let occupied = pos.occupied();
                let capacity = self.capacity as u64;
                if occupied >= capacity {
                    return 0;
                }
                (pos.write, data.len().min((capacity - occupied) as usize))
            } else {
                (pos.write, data.len())
            }
        };

        let skip = len.saturating_sub(self.capacity);
        self.store(write_pos + skip as u64, &data[skip..len]);

        self.positions.lock().write = write_pos + len as u64;
        len
    }

    /// Read up to `buf.len()` bytes from the read frontier without blocking.
    ///
    /// A pending flush is applied first. If another flush lands while the
    /// bytes are being copied, the copy is discarded and 0 is returned so the
    /// caller never sees a mix of pre- and post-flush data.
    ///
    /// Returns the number of bytes read; 0 means underrun.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let (read_pos, len) = {
            let mut pos = self.positions.lock();
            if let Some(flush) = pos.flush.take() {
                pos.read = flush;
            }
            let capacity = self.capacity as u64;
            if pos.write.saturating_sub(pos.read) > capacity {
                // Writer lapped us: the oldest bytes are gone.
                pos.read = pos.write - capacity;
            }
            let available = pos.write.saturating_sub(pos.read) as usize;
            (pos.read, buf.len().min(available))
        };

        if len == 0 {
            return 0;
        }

        self.load(read_pos, &mut buf[..len]);

        let mut pos = self.positions.lock();
        if pos.flush.is_some() {
            return 0;
        }
        pos.read = read_pos + len as u64;
        len
    }

    /// Discard everything written so far. The current write frontier becomes
    /// the read frontier on the next `read`.
    ///
    /// Returns the number of readable bytes discarded.
    pub fn flush(&self) -> usize {
        let mut pos = self.positions.lock();
        let discarded = pos.occupied().min(self.capacity as u64) as usize;
        pos.flush = Some(pos.write);
        discarded
    }

    /// Bytes currently readable, honouring a not-yet-applied flush.
    pub fn valid_byte_count(&self) -> usize {
        let pos = self.positions.lock();
        pos.occupied().min(self.capacity as u64) as usize
    }

    /// Bytes a non-overflowing write could accept right now.
    pub fn free_byte_count(&self) -> usize {
        self.capacity - self.valid_byte_count()
    }

    fn store(&self, pos: u64, data: &[u8]) {
        let offset = pos as usize & self.mask;
        let (head, tail) = data.split_at(data.len().min(self.storage.len() - offset));
        for (cell, &byte) in self.storage[offset..].iter().zip(head) {
            cell.store(byte, Ordering::Relaxed);
        }
        for (cell, &byte) in self.storage.iter().zip(tail) {
            cell.store(byte, Ordering::Relaxed);
        }
    }

    fn load(&self, pos: u64, buf: &mut [u8]) {
        let offset = pos as usize & self.mask;
        let split = buf.len().min(self.storage.len() - offset);
        let (head, tail) = buf.split_at_mut(split);
        for (byte, cell) in head.iter_mut().zip(&self.storage[offset..]) {
            *byte = cell.load(Ordering::Relaxed);
        }
        for (byte, cell) in tail.iter_mut().zip(self.storage.iter()) {
            *byte = cell.load(Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pos = *self.positions.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("allocated_size", &self.storage.len())
            .field("write_pos", &pos.write)
            .field("read_pos", &pos.read)
            .field("flush_pos", &pos.flush)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::thread;

    fn ramp(start: usize, len: usize) -> Vec<u8> {
        (start..start + len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn allocation_rounds_up_to_power_of_two() {
        for (capacity, extra) in [(1, 0), (1000, 0), (1024, 0), (1000, 100), (4096, 1), (3, 5)] {
            let ring = RingBuffer::allocate(capacity, extra).unwrap();
            let size = ring.allocated_size();
            assert!(size.is_power_of_two(), "{} not a power of two", size);
            assert!(size >= capacity + extra);
            assert_eq!(ring.capacity(), capacity);
            assert_eq!(ring.valid_byte_count(), 0);
        }
    }

    #[test]
    fn allocation_rejects_bad_sizes() {
        assert!(matches!(
            RingBuffer::allocate(0, 16),
            Err(AudioError::AllocationFailed(_))
        ));
        assert!(RingBuffer::allocate(usize::MAX, 1).is_err());
        assert!(RingBuffer::allocate(usize::MAX / 2 + 2, 0).is_err());
    }

    #[test]
    fn bounded_write_clamps_to_free_space() {
        let ring = RingBuffer::allocate(1000, 0).unwrap();
        let data = ramp(0, 1200);

        assert_eq!(ring.write(&data[..600], true), 600);
        let second = ring.write(&data[600..], true);
        assert_eq!(second, 400);
        assert_eq!(ring.write(&data[1000..], true), 0);

        let mut out = vec![0u8; 1000];
        assert_eq!(ring.read(&mut out), 1000);
        assert_eq!(out, data[..1000]);
    }

    #[test]
    fn partial_read_then_wraparound() {
        let ring = RingBuffer::allocate(8, 0).unwrap();
        ring.write(&[1, 2, 3, 4, 5, 6], true);

        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // Write spans the physical end of storage.
        assert_eq!(ring.write(&[7, 8, 9, 10, 11, 12], true), 6);

        let mut out = [0u8; 16];
        assert_eq!(ring.read(&mut out), 8);
        assert_eq!(&out[..8], &[5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn underrun_returns_what_is_available() {
        let ring = RingBuffer::allocate(64, 0).unwrap();
        ring.write(&[9, 8, 7], true);

        let mut out = [0u8; 10];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(&out[..3], &[9, 8, 7]);
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn overrun_skips_oldest_bytes() {
        let ring = RingBuffer::allocate(8, 0).unwrap();
        let data = ramp(0, 12);

        assert_eq!(ring.write(&data[..6], false), 6);
        assert_eq!(ring.write(&data[6..], false), 6);
        assert_eq!(ring.valid_byte_count(), 8);

        let mut out = [0u8; 12];
        assert_eq!(ring.read(&mut out), 8);
        assert_eq!(&out[..8], &data[4..]);
    }

    #[test]
    fn oversized_overflowing_write_keeps_newest() {
        let ring = RingBuffer::allocate(16, 16).unwrap();
        let data = ramp(0, 100);

        assert_eq!(ring.write(&data, false), 100);

        let mut out = [0u8; 32];
        assert_eq!(ring.read(&mut out), 16);
        assert_eq!(&out[..16], &data[84..]);
    }

    #[test]
    fn flush_discards_unread_data() {
        let ring = RingBuffer::allocate(256, 0).unwrap();
        ring.write(&ramp(0, 100), false);

        assert_eq!(ring.flush(), 100);
        assert_eq!(ring.valid_byte_count(), 0);

        let mut out = [0u8; 50];
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn data_after_flush_is_readable() {
        let ring = RingBuffer::allocate(64, 0).unwrap();
        ring.write(&[1; 40], true);
        ring.flush();

        // Free space is measured against the pending flush target.
        assert_eq!(ring.free_byte_count(), 64);
        assert_eq!(ring.write(&[2; 30], true), 30);
        assert_eq!(ring.valid_byte_count(), 30);

        let mut out = [0u8; 64];
        assert_eq!(ring.read(&mut out), 30);
        assert!(out[..30].iter().all(|&b| b == 2));
    }

    #[test]
    fn flush_count_is_clamped_to_capacity() {
        let ring = RingBuffer::allocate(32, 0).unwrap();
        ring.write(&ramp(0, 80), false);
        assert_eq!(ring.flush(), 32);
        assert_eq!(ring.flush(), 0);
    }

    #[test]
    fn empty_operations() {
        let ring = RingBuffer::allocate(16, 0).unwrap();
        assert_eq!(ring.write(&[], true), 0);
        assert_eq!(ring.read(&mut []), 0);
        assert_eq!(ring.free_byte_count(), 16);
    }

    #[test]
    fn concurrent_round_trip_is_exact() {
        const CHUNK: usize = 64;
        const ITERATIONS: usize = 10_000;
        const TOTAL: usize = CHUNK * ITERATIONS;

        let ring = Arc::new(RingBuffer::allocate(256, 0).unwrap());

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..ITERATIONS {
                    let chunk = ramp(i * CHUNK, CHUNK);
                    let mut offset = 0;
                    while offset < CHUNK {
                        let written = ring.write(&chunk[offset..], true);
                        if written == 0 {
                            thread::yield_now();
                        }
                        offset += written;
                    }
                }
            })
        };

        let mut received = Vec::with_capacity(TOTAL);
        let mut chunk = [0u8; CHUNK];
        while received.len() < TOTAL {
            let n = ring.read(&mut chunk);
            if n == 0 {
                thread::yield_now();
            }
            received.extend_from_slice(&chunk[..n]);
        }

        producer.join().unwrap();
        assert_eq!(received.len(), TOTAL);
        assert_eq!(received, ramp(0, TOTAL));
        assert_eq!(ring.valid_byte_count(), 0);
    }

    #[test]
    fn flushed_bytes_never_reappear() {
        let ring = RingBuffer::allocate(64, 0).unwrap();
        ring.write(&[1; 24], true);

        let mut out = [0u8; 8];
        assert_eq!(ring.read(&mut out), 8);

        ring.flush();
        ring.write(&[2; 10], true);

        let mut out = [0u8; 64];
        assert_eq!(ring.read(&mut out), 10);
        assert!(out[..10].iter().all(|&b| b == 2));
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn flush_after_overrun_discards_everything_before_it() {
        let ring = RingBuffer::allocate(16, 16).unwrap();
        ring.write(&ramp(0, 40), false);
        ring.flush();
        ring.write(&ramp(200, 4), false);

        let mut out = [0u8; 32];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(&out[..4], &ramp(200, 4)[..]);
    }

    #[test]
    fn concurrent_overrun_and_flush_yield_contiguous_chunks() {
        const WRITES: usize = 20_000;
        const WRITE_LEN: usize = 48;

        let ring = Arc::new(RingBuffer::allocate(256, 64).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..WRITES {
                    assert_eq!(ring.write(&ramp(i * WRITE_LEN, WRITE_LEN), false), WRITE_LEN);
                    thread::yield_now();
                }
                done.store(true, AtomicOrdering::SeqCst);
            })
        };

        let flusher = {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut flushes = 0u64;
                while !done.load(AtomicOrdering::SeqCst) {
                    ring.flush();
                    flushes += 1;
                    thread::yield_now();
                }
                flushes
            })
        };

        let mut chunk = [0u8; 100];
        while !done.load(AtomicOrdering::SeqCst) {
            let n = ring.read(&mut chunk);
            assert!(n <= chunk.len());
            for pair in chunk[..n].windows(2) {
                assert_eq!(pair[1], ((pair[0] as usize + 1) % 251) as u8, "chunk {:?}", &chunk[..n]);
            }
        }

        writer.join().unwrap();
        assert!(flusher.join().unwrap() > 0);
        assert!(ring.valid_byte_count() <= ring.capacity());
    }
}
