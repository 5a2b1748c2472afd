//! SPSC audio ring buffer of stereo frames.
//!
//! Adapted from the reference streaming module's `f32`-sample ring buffer:
//! the same `Arc<Mutex<Vec<T>>>` backing store with separate atomic write/
//! read cursors, a power-of-two capacity for mask-based modulo, and
//! TOCTOU-safe availability checks taken while holding the lock. Here the
//! element type is a stereo [`Frame`] rather than a raw `f32`, and a
//! monotonic `played_frames` counter is exposed so callers can prove §3's
//! "sample-time is a strictly non-decreasing 64-bit counter" invariant.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::partial::Frame;

const MAX_CAPACITY: usize = 64 * 1024 * 1024; // frames; generous upper bound

fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// A bounded single-producer/single-consumer ring buffer of stereo frames.
/// The renderer writes, a mixer callback reads; both may run on different
/// threads without further synchronization beyond what this type provides.
#[derive(Clone)]
pub struct RingBuffer {
    buffer: Arc<Mutex<Vec<Frame>>>,
    write_pos: Arc<AtomicUsize>,
    read_pos: Arc<AtomicUsize>,
    played_frames: Arc<AtomicU64>,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Construct a ring buffer holding at least `requested_capacity`
    /// frames, rounded up to the next power of two and capped at 64Mi
    /// frames.
    pub fn new(requested_capacity: usize) -> Self {
        let capacity = next_power_of_two(requested_capacity.min(MAX_CAPACITY));
        Self {
            buffer: Arc::new(Mutex::new(vec![Frame::default(); capacity])),
            write_pos: Arc::new(AtomicUsize::new(0)),
            read_pos: Arc::new(AtomicUsize::new(0)),
            played_frames: Arc::new(AtomicU64::new(0)),
            capacity,
            mask: capacity - 1,
        }
    }

    /// Total capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames available to read right now.
    pub fn available_read(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// Number of frames of free space available to write right now.
    pub fn available_write(&self) -> usize {
        self.capacity - self.available_read()
    }

    /// True if there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// True if there is no room to write.
    pub fn is_full(&self) -> bool {
        self.available_write() == 0
    }

    /// How full the buffer is, as a fraction in `0.0..=1.0`.
    pub fn fill_percentage(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }

    /// Monotonically non-decreasing count of frames ever consumed via
    /// [`Self::read`], including zero-filled underrun frames.
    pub fn played_frames(&self) -> u64 {
        self.played_frames.load(Ordering::Acquire)
    }

    /// Write as many of `frames` as fit; never overwrites unplayed frames.
    /// Returns the number of frames actually written.
    pub fn write(&self, frames: &[Frame]) -> usize {
        let mut buffer = self.buffer.lock();
        let available = self.capacity - self.available_read();
        let to_write = frames.len().min(available);
        let w = self.write_pos.load(Ordering::Relaxed);
        for (i, &frame) in frames.iter().take(to_write).enumerate() {
            buffer[(w.wrapping_add(i)) & self.mask] = frame;
        }
        drop(buffer);
        self.write_pos.store(w.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read up to `dest.len()` frames into `dest`, zero-filling and
    /// reporting an underrun via the returned count being less than
    /// `dest.len()` if the buffer ran dry. The caller is responsible for
    /// reporting [`crate::report::ReportEvent::RendererUnderrun`] when
    /// that happens; this type only guarantees a monotonic play cursor.
    pub fn read(&self, dest: &mut [Frame]) -> usize {
        let buffer = self.buffer.lock();
        let available = self.available_read();
        let to_read = dest.len().min(available);
        let r = self.read_pos.load(Ordering::Relaxed);
        for (i, slot) in dest.iter_mut().take(to_read).enumerate() {
            *slot = buffer[(r.wrapping_add(i)) & self.mask];
        }
        drop(buffer);
        self.read_pos.store(r.wrapping_add(to_read), Ordering::Release);
        for slot in dest.iter_mut().skip(to_read) {
            *slot = Frame::default();
        }
        self.played_frames.fetch_add(dest.len() as u64, Ordering::AcqRel);
        to_read
    }

    /// Discard all buffered, unplayed frames (used on `close`/reset).
    pub fn flush(&self) {
        let r = self.read_pos.load(Ordering::Acquire);
        let w = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(w, Ordering::Release);
        let _ = r;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: i16) -> Frame {
        Frame { left: n, right: -n }
    }

    #[test]
    fn rounds_capacity_to_next_power_of_two() {
        let rb = RingBuffer::new(1000);
        assert_eq!(rb.capacity(), 1024);
    }

    #[test]
    fn write_then_read_round_trips() {
        let rb = RingBuffer::new(16);
        let frames: Vec<Frame> = (0..8).map(frame).collect();
        assert_eq!(rb.write(&frames), 8);
        let mut out = vec![Frame::default(); 8];
        assert_eq!(rb.read(&mut out), 8);
        assert_eq!(out, frames);
    }

    #[test]
    fn write_never_exceeds_available_space() {
        let rb = RingBuffer::new(4);
        let frames: Vec<Frame> = (0..10).map(frame).collect();
        let written = rb.write(&frames);
        assert_eq!(written, 4);
        assert!(rb.is_full());
    }

    #[test]
    fn read_past_available_zero_fills_and_reports_short_count() {
        let rb = RingBuffer::new(8);
        rb.write(&[frame(1), frame(2)]);
        let mut out = vec![Frame { left: 9, right: 9 }; 5];
        let read = rb.read(&mut out);
        assert_eq!(read, 2);
        assert_eq!(out[2], Frame::default());
        assert_eq!(out[4], Frame::default());
    }

    #[test]
    fn wraps_around_correctly_across_the_capacity_boundary() {
        let rb = RingBuffer::new(4);
        rb.write(&[frame(1), frame(2), frame(3)]);
        let mut out = vec![Frame::default(); 2];
        rb.read(&mut out);
        rb.write(&[frame(4), frame(5)]);
        let mut rest = vec![Frame::default(); 3];
        let read = rb.read(&mut rest);
        assert_eq!(read, 3);
        assert_eq!(rest, vec![frame(3), frame(4), frame(5)]);
    }

    #[test]
    fn played_frames_counter_is_monotonic() {
        let rb = RingBuffer::new(8);
        rb.write(&[frame(1); 4]);
        let mut out = vec![Frame::default(); 4];
        rb.read(&mut out);
        let first = rb.played_frames();
        rb.read(&mut out);
        assert!(rb.played_frames() >= first);
    }
}
