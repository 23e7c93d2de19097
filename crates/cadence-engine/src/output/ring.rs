//! Lock-free single-producer, single-consumer ring buffer.
//!
//! The sink writer is the producer; whatever plays the audio (a device
//! callback or the virtual drain) is the consumer. Discarding buffered data
//! is a consumer-side operation.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct RingBuffer<T> {
    buffer: Box<[UnsafeCell<T>]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    /// Power of two.
    capacity: usize,
    mask: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer holding at least `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let buffer = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();

        Self {
            buffer,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items ready for the consumer.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    fn slot(&self, index: usize) -> *mut T {
        UnsafeCell::raw_get(self.buffer[index & self.mask..].as_ptr())
    }

    /// Append items. Producer only.
    ///
    /// Returns how many items fit.
    #[allow(unsafe_code)]
    pub fn write(&self, items: &[T]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        let space = self.capacity - write_pos.wrapping_sub(read_pos);
        let count = items.len().min(space);
        if count == 0 {
            return 0;
        }

        let start = write_pos & self.mask;
        let first = count.min(self.capacity - start);
        // SAFETY: the slots in [write_pos, write_pos + count) are not visible
        // to the consumer until write_pos is published below, and `first`
        // never runs past the end of the allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(items.as_ptr(), self.slot(start), first);
            std::ptr::copy_nonoverlapping(items.as_ptr().add(first), self.slot(0), count - first);
        }

        self.write_pos
            .store(write_pos.wrapping_add(count), Ordering::Release);
        count
    }

    /// Take items into `output`. Consumer only.
    ///
    /// Returns how many items were copied.
    #[allow(unsafe_code)]
    pub fn read(&self, output: &mut [T]) -> usize {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        let count = output.len().min(write_pos.wrapping_sub(read_pos));
        if count == 0 {
            return 0;
        }

        let start = read_pos & self.mask;
        let first = count.min(self.capacity - start);
        // SAFETY: the slots in [read_pos, read_pos + count) were published by
        // the producer and are not reused until read_pos advances below.
        unsafe {
            std::ptr::copy_nonoverlapping(self.slot(start), output.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(
                self.slot(0),
                output.as_mut_ptr().add(first),
                count - first,
            );
        }

        self.read_pos
            .store(read_pos.wrapping_add(count), Ordering::Release);
        count
    }

    /// Drop up to `count` items without copying them. Consumer only.
    pub fn skip(&self, count: usize) -> usize {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        let skipped = count.min(write_pos.wrapping_sub(read_pos));
        self.read_pos
            .store(read_pos.wrapping_add(skipped), Ordering::Release);
        skipped
    }

    /// Drop everything currently buffered. Consumer only.
    pub fn discard_all(&self) -> usize {
        self.skip(usize::MAX)
    }
}

// SAFETY: producer and consumer touch disjoint slots, coordinated through the
// acquire/release positions above.
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for RingBuffer<T> {}
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for RingBuffer<T> {}

/// Thread-safe reference to a ring buffer.
pub type SharedRingBuffer<T> = Arc<RingBuffer<T>>;

pub fn shared_ring_buffer<T: Copy + Default>(capacity: usize) -> SharedRingBuffer<T> {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_up() {
        let ring = RingBuffer::<u8>::new(1000);
        assert_eq!(ring.capacity(), 1024);
        assert_eq!(ring.free(), 1024);
        assert_eq!(RingBuffer::<u8>::new(0).capacity(), 1);
    }

    #[test]
    fn test_bytes_wrap_around() {
        let ring = RingBuffer::<u8>::new(8);
        assert_eq!(ring.write(&[1, 2, 3, 4, 5, 6]), 6);

        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        assert_eq!(ring.write(&[7, 8, 9, 10, 11]), 5);
        let mut rest = [0u8; 8];
        assert_eq!(ring.read(&mut rest), 7);
        assert_eq!(&rest[..7], &[5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_full_buffer_rejects_extra() {
        let ring = RingBuffer::<f32>::new(4);
        assert_eq!(ring.write(&[1.0; 6]), 4);
        assert_eq!(ring.free(), 0);
        assert_eq!(ring.write(&[2.0]), 0);

        assert_eq!(ring.skip(1), 1);
        assert_eq!(ring.write(&[2.0]), 1);
    }

    #[test]
    fn test_discard_all_empties() {
        let ring = RingBuffer::<u8>::new(64);
        ring.write(&[9u8; 40]);
        assert_eq!(ring.discard_all(), 40);
        assert!(ring.is_empty());
        assert_eq!(ring.discard_all(), 0);
    }

    #[test]
    fn test_spsc_preserves_order() {
        let ring = shared_ring_buffer::<u32>(256);
        let producer = ring.clone();

        let writer = std::thread::spawn(move || {
            let mut next = 0u32;
            while next < 10_000 {
                let batch: Vec<u32> = (next..(next + 64).min(10_000)).collect();
                let written = producer.write(&batch);
                next += written as u32;
                if written == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0u32;
        let mut out = [0u32; 50];
        while expected < 10_000 {
            let n = ring.read(&mut out);
            for value in &out[..n] {
                assert_eq!(*value, expected);
                expected += 1;
            }
            if n == 0 {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();
    }
}
