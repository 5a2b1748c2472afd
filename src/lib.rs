//! MT-32 / CM-32L synthesis engine
//!
//! A software re-implementation of the MT-32/CM-32L LA (linear arithmetic)
//! synthesizer: nine parts (eight melodic, one rhythm), a fixed pool of
//! partials combining synthesized and PCM-ROM waveforms through three
//! envelope generators (TVP/TVF/TVA), ring modulation, and one of four
//! reverb models, all addressed and configured through the documented
//! SysEx memory map.
//!
//! # Features
//! - Cycle-accurate partial/envelope emulation (`synth`, `partial`, `tva`,
//!   `tvf`, `tvp`)
//! - Full SysEx address-space protocol with checksum validation (`sysex`,
//!   `memory`)
//! - Four reverb models (`reverb`)
//! - Real-time producer/consumer scheduling (`streaming`, opt-in)
//!
//! # Crate feature flags
//! - `streaming` (default): real-time render-thread/ring-buffer/MIDI-ingress
//!   scheduling support (`streaming`)
//!
//! # Quick start
//! ```no_run
//! use mt32synth::{AnalogOutputMode, Synth};
//! use mt32synth::midi::encode;
//!
//! let control_rom = std::fs::read("MT32_CONTROL.ROM").unwrap();
//! let pcm_rom = std::fs::read("MT32_PCM.ROM").unwrap();
//! let mut synth = Synth::open(control_rom, pcm_rom, 32, AnalogOutputMode::Accurate, false).unwrap();
//!
//! // note-on, channel 0, key 60, velocity 64
//! synth.play_msg(encode(0x90, 60, 64), None).unwrap();
//! let mut buf = vec![Default::default(); 1024];
//! synth.render(&mut buf).unwrap();
//! ```
//!
//! ## Real-time streaming
//! ```no_run
//! # #[cfg(feature = "streaming")]
//! # {
//! use mt32synth::{AnalogOutputMode, Synth};
//! use mt32synth::midi::encode;
//! use mt32synth::streaming::{RealtimeScheduler, SchedulerConfig};
//!
//! let control_rom = std::fs::read("MT32_CONTROL.ROM").unwrap();
//! let pcm_rom = std::fs::read("MT32_PCM.ROM").unwrap();
//! let synth = Synth::open(control_rom, pcm_rom, 32, AnalogOutputMode::Accurate, false).unwrap();
//!
//! let mut scheduler = RealtimeScheduler::start(
//!     synth,
//!     SchedulerConfig::low_latency(),
//!     Box::new(mt32synth::report::NullReportHandler),
//! );
//! let ingress = scheduler.ingress();
//! ingress.push_msg(encode(0x90, 60, 64), None);
//! let mut out = vec![Default::default(); 256];
//! scheduler.read(&mut out);
//! # }
//! ```

#![warn(missing_docs)]

// Core domain modules
pub mod constants; // Engine-wide sizing and timing constants
pub mod envelope; // Shared TVP/TVF/TVA envelope-shape machinery
pub mod error; // Synchronous error type
pub mod memory; // Emulated SysEx-addressable memory map
pub mod midi; // Short-message decoding and RPN tracking
pub mod part; // One of the nine MIDI parts
pub mod partial; // One voice in the fixed partial pool
pub mod partial_manager; // The fixed partial pool and stealing policy
pub mod poly; // One sounding note within a part
pub mod report; // Structured diagnostic event channel
pub mod resampler; // Internal-rate to analog-output-rate conversion
pub mod reverb; // The four reverb models
pub mod rom; // Control/PCM ROM loading and digest verification
pub mod synth; // The Synth façade
pub mod sysex; // SysEx address-space write protocol
pub mod tables; // ROM-derived lookup tables (pan, keyfollow, ...)
pub mod timbre; // Timbre/patch decoding
pub mod tva; // Time-variant amplitude envelope
pub mod tvf; // Time-variant filter envelope
pub mod tvp; // Time-variant pitch envelope
pub mod wave; // Waveform generation (synthesized + PCM playback)

#[cfg(feature = "streaming")]
pub mod streaming; // Real-time producer/consumer scheduling support

// Public API exports
pub use error::{Mt32Error, Result};
pub use partial::Frame;
pub use report::{CollectingReportHandler, NullReportHandler, ReportEvent, ReportHandler};
pub use resampler::AnalogOutputMode;
pub use reverb::ReverbMode;
pub use synth::{DacInputMode, Synth};

#[cfg(feature = "streaming")]
pub use streaming::{MidiIngress, RealtimeScheduler, RingBuffer, SchedulerConfig};
