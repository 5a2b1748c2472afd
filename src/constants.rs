//! Fixed constants describing the emulated hardware's shape.

/// Internal synthesis sample rate in Hz. Every envelope and wave table in
/// the control ROM is defined against this rate; [`crate::resampler`]
/// converts to the selected [`crate::resampler::AnalogOutputMode`] rate at
/// the render boundary.
pub const INTERNAL_SAMPLE_RATE: u32 = 32_000;

/// Number of MIDI channels the device can address (8 melodic parts plus
/// the rhythm part occupy 9 of these; the remaining channel is unused).
pub const MIDI_CHANNEL_COUNT: usize = 16;

/// Number of active synthesizer parts: 8 melodic channels plus 1 rhythm
/// channel.
pub const PART_COUNT: usize = 9;

/// Index of the rhythm part within the part array.
pub const RHYTHM_PART_INDEX: usize = 8;

/// Default partial pool size, matching the original MT-32 hardware.
pub const DEFAULT_PARTIAL_COUNT: usize = 32;

/// Partial pool size matching the CM-32L's expanded polyphony.
pub const CM32L_PARTIAL_COUNT: usize = 32;

/// Maximum partials a single timbre structure can claim for one poly.
pub const MAX_PARTIALS_PER_POLY: usize = 4;

/// Width of the emulated address space in bits (24-bit addressing).
pub const ADDRESS_SPACE_BITS: u32 = 24;

/// Number of characters on the emulated LCD.
pub const LCD_WIDTH: usize = 20;

/// SysEx device ID accepted as the broadcast/default MT-32 id.
pub const DEFAULT_DEVICE_ID: u8 = 0x10;

/// Number of 7-phase envelope phases, including the terminal phase.
pub const ENVELOPE_PHASE_COUNT: usize = 7;

/// The terminal envelope phase: once reached, the generator is finished.
pub const ENVELOPE_PHASE_FINISHED: u8 = ENVELOPE_PHASE_COUNT as u8;

/// Bit set in a phase's `time_to_target` byte to indicate downward motion.
pub const TIME_DIRECTION_DOWN_BIT: u8 = 0x80;

/// Base frequency, in Hz, of MIDI key 60 (middle C) with no key-follow,
/// pitch-bend, or TVP offset applied.
pub const MIDDLE_C_HZ: f32 = 261.625_55;

/// Default pitch-bend range in semitones when no RPN 0 has been received.
pub const DEFAULT_BEND_RANGE_SEMITONES: u8 = 2;

/// Number of samples in one rendered audio block consumed internally by
/// the scheduler between MIDI-event checkpoints; render() itself handles
/// arbitrary block sizes, this only bounds internal batching.
pub const RENDER_CHECKPOINT_FRAMES: usize = 64;
