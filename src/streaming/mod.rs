//! Producer/consumer real-time scheduling support (§5's optional mode).
//!
//! A renderer thread runs [`crate::synth::Synth::render`] into a shared
//! [`ring_buffer::RingBuffer`]; a mixer callback drains it; MIDI arrives on
//! a third thread via [`scheduler::MidiIngress`]. This module only supplies
//! the plumbing — the mandatory single-threaded mode in `synth.rs` needs
//! none of it.

pub mod ring_buffer;
pub mod scheduler;

pub use ring_buffer::RingBuffer;
pub use scheduler::{MidiIngress, RealtimeScheduler, SchedulerConfig};

/// Busy-wait backoff between ring-buffer poll attempts, in microseconds,
/// used by a blocking producer waiting for space (consumers never block).
pub const BUFFER_BACKOFF_MICROS: u64 = 100;
