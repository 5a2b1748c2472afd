//! Producer/consumer glue: a render thread owning a [`Synth`], fed by a
//! [`MidiIngress`] queue and drained through a [`RingBuffer`].
//!
//! Mirrors the reference streaming module's `RealtimePlayer`: a background
//! thread renders into a shared ring buffer with blocking backpressure, a
//! `PlaybackStats`-style struct tracks overrun/underrun health, and a
//! `StreamConfig`-style struct picks the latency/chunk tradeoff. Here the
//! producer side also drains a MIDI queue before each render chunk, since
//! the synth (unlike the PSG) takes live input instead of pre-sequenced
//! register writes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::INTERNAL_SAMPLE_RATE;
use crate::error::Result;
use crate::partial::Frame;
use crate::report::{ReportEvent, ReportHandler};
use crate::synth::Synth;

use super::{RingBuffer, BUFFER_BACKOFF_MICROS};

/// Latency/throughput tradeoff for a [`RealtimeScheduler`]'s ring buffer and
/// render chunk size, in internal-rate (32 kHz) frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Ring buffer capacity, in frames (rounded up to a power of two by
    /// [`RingBuffer::new`]).
    pub ring_buffer_frames: usize,
    /// How many frames the render thread produces per wake-up.
    pub render_chunk_frames: usize,
}

impl SchedulerConfig {
    /// Construct a config from explicit frame counts.
    pub fn new(ring_buffer_frames: usize, render_chunk_frames: usize) -> Self {
        Self {
            ring_buffer_frames,
            render_chunk_frames,
        }
    }

    /// Small buffer, small chunks: lowest latency, least tolerance for a
    /// stalled render thread.
    pub fn low_latency() -> Self {
        Self::new(2048, 64)
    }

    /// Generously sized buffer: higher latency, absorbs scheduling jitter
    /// without underrunning.
    pub fn stable() -> Self {
        Self::new(16_384, 512)
    }

    /// Approximate buffered latency in milliseconds at the internal sample
    /// rate.
    pub fn latency_ms(&self) -> f32 {
        self.ring_buffer_frames as f32 * 1000.0 / INTERNAL_SAMPLE_RATE as f32
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::stable()
    }
}

enum IngressEvent {
    Short(u32, Option<u64>),
    Sysex(Vec<u8>, Option<u64>),
}

/// A thread-safe queue of MIDI short messages and SysEx bodies waiting to be
/// applied by a [`RealtimeScheduler`]'s render thread. Clone to hand a
/// producer (a MIDI input callback, a sequencer thread) its own handle onto
/// the same queue.
#[derive(Clone)]
pub struct MidiIngress {
    queue: Arc<Mutex<VecDeque<IngressEvent>>>,
}

impl MidiIngress {
    /// Construct an empty ingress queue.
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue a packed short message, optionally timestamped against the
    /// render-frame clock (see [`Synth::play_msg`]).
    pub fn push_msg(&self, packed: u32, timestamp: Option<u64>) {
        self.queue.lock().push_back(IngressEvent::Short(packed, timestamp));
    }

    /// Queue a raw SysEx body (see [`Synth::play_sysex`]).
    pub fn push_sysex(&self, bytes: Vec<u8>, timestamp: Option<u64>) {
        self.queue.lock().push_back(IngressEvent::Sysex(bytes, timestamp));
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True if no events are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn drain_into(&self, synth: &mut Synth) -> Result<()> {
        let drained: Vec<IngressEvent> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        for event in drained {
            match event {
                IngressEvent::Short(packed, ts) => synth.play_msg(packed, ts)?,
                IngressEvent::Sysex(bytes, ts) => synth.play_sysex(&bytes, ts)?,
            }
        }
        Ok(())
    }
}

impl Default for MidiIngress {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer-health counters, analogous to the reference player's playback
/// stats, refreshed on every [`RealtimeScheduler::read`] and render chunk.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Number of times the consumer found the buffer empty mid-stream.
    pub underrun_count: usize,
    /// Total frames handed to the consumer, including zero-filled ones.
    pub frames_played: u64,
    /// Current buffer fill, as a fraction in `0.0..=1.0`.
    pub fill_percentage: f32,
}

struct SharedReportHandler(Arc<Mutex<Box<dyn ReportHandler>>>);

impl ReportHandler for SharedReportHandler {
    fn report(&mut self, event: ReportEvent) {
        self.0.lock().report(event);
    }
}

/// Owns a render thread driving a [`Synth`], fed by a [`MidiIngress`] and
/// drained through a [`RingBuffer`]. Dropping or calling [`Self::stop`] signals
/// the render thread to close the synth and exit at the next chunk boundary.
pub struct RealtimeScheduler {
    buffer: RingBuffer,
    ingress: MidiIngress,
    config: SchedulerConfig,
    stats: Arc<Mutex<SchedulerStats>>,
    report: Arc<Mutex<Box<dyn ReportHandler>>>,
    terminate: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RealtimeScheduler {
    /// Spawn the render thread, taking ownership of `synth`. Any report
    /// handler already installed on `synth` is replaced so that both
    /// render-thread-side events (a bad SysEx checksum) and consumer-side
    /// events (a ring-buffer underrun, reported by [`Self::read`]) reach the
    /// same sink.
    pub fn start(mut synth: Synth, config: SchedulerConfig, report: Box<dyn ReportHandler>) -> Self {
        let buffer = RingBuffer::new(config.ring_buffer_frames);
        let ingress = MidiIngress::new();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let report = Arc::new(Mutex::new(report));
        let terminate = Arc::new(AtomicBool::new(false));

        synth.set_report_handler(Box::new(SharedReportHandler(Arc::clone(&report))));

        let thread_buffer = buffer.clone();
        let thread_ingress = ingress.clone();
        let thread_terminate = Arc::clone(&terminate);
        let chunk_frames = config.render_chunk_frames;

        let handle = std::thread::spawn(move || {
            let mut scratch = vec![Frame::default(); chunk_frames];
            while !thread_terminate.load(Ordering::Acquire) {
                if thread_ingress.drain_into(&mut synth).is_err() {
                    break;
                }
                if synth.render(&mut scratch).is_err() {
                    break;
                }
                let mut written = 0;
                while written < scratch.len() {
                    if thread_terminate.load(Ordering::Acquire) {
                        break;
                    }
                    written += thread_buffer.write(&scratch[written..]);
                    if written < scratch.len() {
                        std::thread::sleep(Duration::from_micros(BUFFER_BACKOFF_MICROS));
                    }
                }
            }
            synth.close();
        });

        Self {
            buffer,
            ingress,
            config,
            stats,
            report,
            terminate,
            handle: Some(handle),
        }
    }

    /// A clone of this scheduler's MIDI ingress queue, for a producer
    /// thread to push onto.
    pub fn ingress(&self) -> MidiIngress {
        self.ingress.clone()
    }

    /// The config this scheduler was started with.
    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Read up to `dest.len()` frames, zero-filling and counting an
    /// underrun if the buffer ran dry while still running. A short read
    /// after [`Self::stop`] is ordinary end-of-stream silence, not an
    /// underrun.
    pub fn read(&self, dest: &mut [Frame]) -> usize {
        let read = self.buffer.read(dest);
        let mut stats = self.stats.lock();
        stats.frames_played = self.buffer.played_frames();
        stats.fill_percentage = self.buffer.fill_percentage();
        if read < dest.len() && !self.terminate.load(Ordering::Acquire) {
            stats.underrun_count += 1;
            drop(stats);
            self.report.lock().report(ReportEvent::RendererUnderrun);
        }
        read
    }

    /// Current buffer-health snapshot.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    /// Signal the render thread to close the synth and exit, then block
    /// until it has. Safe to call more than once.
    pub fn stop(&mut self) {
        self.terminate.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RealtimeScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
