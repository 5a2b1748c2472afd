//! The shared 7-phase envelope state machine driving TVP, TVF and TVA.
//!
//! The reference implementation lets each envelope reach into its owning
//! partial, poly and part for the handful of values it actually needs
//! (key, velocity, expression, resonance, the rhythm-temp block). Per the
//! re-architecture this system calls for, that mutual friendship is
//! replaced by a small capability struct, [`EnvelopeContext`], captured
//! once at `reset` — an envelope never reaches past it.

use crate::constants::{ENVELOPE_PHASE_COUNT, ENVELOPE_PHASE_FINISHED, TIME_DIRECTION_DOWN_BIT};
use crate::tables::env_logarithmic_time;

/// The small set of live values an envelope generator needs at `reset`,
/// snapshotted from the owning partial/poly/part so the envelope never
/// holds a pointer back into them.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeContext {
    /// MIDI key number (0..127) that triggered the note.
    pub key: u8,
    /// MIDI velocity (1..127).
    pub velocity: u8,
    /// The owning part's current expression (0..127).
    pub expression: u8,
    /// The partial's filter resonance setting, as used by TVA's target-amp
    /// correction.
    pub resonance: u8,
    /// True if this partial belongs to the rhythm part.
    pub is_rhythm: bool,
}

/// The four non-sustain/release phase target levels and five phase
/// durations configured by a timbre for one envelope.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeShape {
    /// Target levels for phases 0..3.
    pub level: [i8; 4],
    /// Phase durations for phases 0..4 (`time[4]` is the release duration).
    pub time: [u8; 5],
    /// Envelope time key-follow amount (0 disables key-follow entirely).
    pub time_keyfollow: u8,
}

/// The shared 7-phase engine. Phases 0..4 are the configured attack/decay
/// phases, phase 5 is sustain, phase 6 is release; phase 7 is terminal.
#[derive(Debug, Clone, Copy)]
pub struct PhaseEnvelope {
    shape: EnvelopeShape,
    phase: u8,
    current: i32,
    target: i32,
    time_to_target: i8,
    increment: i32,
    key_time_subtraction: i32,
    playing: bool,
}

impl PhaseEnvelope {
    /// Compute the key-follow time subtraction shared by TVP/TVF/TVA:
    /// `(key - 60) >> (5 - keyfollow)` when keyfollow is nonzero.
    pub fn key_time_subtraction(key: u8, time_keyfollow: u8) -> i32 {
        if time_keyfollow == 0 {
            0
        } else {
            (key as i32 - 60) >> (5 - time_keyfollow.min(5) as i32)
        }
    }

    /// Reset the engine for a new note, given the configured phase shape,
    /// the live context, and the initial target amplitude/cutoff/pitch
    /// value the owning envelope (TVA/TVF/TVP) computed for phase 0.
    pub fn reset(shape: EnvelopeShape, ctx: &EnvelopeContext, mut initial_target: i32) -> Self {
        let key_time_subtraction = Self::key_time_subtraction(ctx.key, shape.time_keyfollow);
        let mut phase = 0u8;
        if shape.time[0] == 0 {
            // Zero time for phase 0: start already in phase 1, having
            // applied phase 0's level jump instantaneously.
            initial_target += shape.level[0] as i32;
            phase = 1;
        }
        let mut env = Self {
            shape,
            phase,
            current: initial_target,
            target: initial_target,
            time_to_target: 0,
            increment: 0,
            key_time_subtraction,
            playing: true,
        };
        env.arm_phase(phase, initial_target);
        env
    }

    /// The configured target level for `phase` (0 for sustain/release,
    /// which compute their own targets in [`Self::next_phase`]).
    pub fn configured_level(&self, phase: u8) -> i32 {
        match phase {
            0..=3 => self.shape.level[phase as usize] as i32,
            _ => 0,
        }
    }

    fn phase_time(&self, phase: u8) -> u8 {
        match phase {
            0..=4 => self.shape.time[phase as usize],
            _ => 0,
        }
    }

    /// True once the generator has reached phase 7.
    pub fn is_finished(&self) -> bool {
        self.phase >= ENVELOPE_PHASE_FINISHED
    }

    /// True while the generator is still producing nonzero output
    /// (equivalent to the reference `play` flag).
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Current phase index (0..=7, 7 meaning finished).
    pub fn phase(&self) -> u8 {
        self.phase
    }

    /// Copy of the configured phase shape, for callers that need to
    /// compute per-kind phase targets without holding a borrow of the
    /// engine itself (see [`crate::tva::Tva::next_amp`]).
    pub fn shape(&self) -> EnvelopeShape {
        self.shape
    }

    /// Current interpolated value.
    pub fn current(&self) -> i32 {
        self.current
    }

    fn arm_phase(&mut self, phase: u8, new_target: i32) {
        self.target = new_target;
        let velocity_correction = 0; // folded into the per-kind target by the caller
        let env_time_setting =
            self.phase_time(phase) as i32 - self.key_time_subtraction - velocity_correction;
        let diff = (new_target - self.current).unsigned_abs().min(155) as u8;
        if env_time_setting > 0 {
            let mut time_to_target = env_logarithmic_time(diff) as i32 - env_time_setting;
            if time_to_target < 1 {
                time_to_target = 1;
            }
            let down = new_target < self.current;
            self.time_to_target = if down {
                -(time_to_target.min(127) as i8)
            } else {
                time_to_target.min(127) as i8
            };
        } else {
            // Snap: reach target in one frame.
            self.time_to_target = if new_target < self.current { -1 } else { 1 };
        }
        let frames = self.time_to_target.unsigned_abs().max(1) as i32;
        self.increment = (new_target - self.current) / frames;
    }

    /// Override `current`/`target` in place to `value`, without touching
    /// `phase` or re-arming the phase timer. Used for a live parameter push
    /// (a CC11 expression change, say) that should retarget a sounding
    /// voice instantly rather than wait for the next phase transition —
    /// unlike [`Self::reset`], the envelope's position in its phase
    /// sequence is untouched.
    pub fn set_current_and_target(&mut self, value: i32) {
        self.current = value;
        self.target = value;
        self.time_to_target = 0;
        self.increment = 0;
    }

    /// Force phase 5 (sustain) to release immediately, as happens when a
    /// poly's sustain pedal is released or a note-off arrives while not
    /// held.
    pub fn start_decay(&mut self) {
        if self.phase < 5 {
            self.phase = 5;
        }
        self.force_release();
    }

    fn force_release(&mut self) {
        self.target = 0;
        self.time_to_target = -(self.phase_time(4).max(1) as i8);
        let frames = self.time_to_target.unsigned_abs().max(1) as i32;
        self.increment = (self.target - self.current) / frames;
        self.phase = 6;
    }

    /// Advance to the next phase once `current` has reached `target`.
    /// A no-op (with no diagnostic of its own; callers should check
    /// [`Self::is_finished`] first) once the generator is already
    /// finished.
    pub fn next_phase(&mut self, sustain_held: bool, next_target_for: impl Fn(u8) -> i32) {
        if self.is_finished() {
            return;
        }
        let next_phase = self.phase + 1;
        if next_phase >= 5 && self.shape.level[3] == 0 {
            self.playing = false;
            self.phase = ENVELOPE_PHASE_FINISHED;
            return;
        }
        if next_phase == 5 {
            if !sustain_held {
                self.phase = 5;
                self.force_release();
                return;
            }
            self.phase = 5;
            self.target = self.current;
            self.time_to_target = 0;
            self.increment = 0;
            return;
        }
        if next_phase == 6 {
            self.force_release();
            return;
        }
        if next_phase >= ENVELOPE_PHASE_FINISHED {
            self.playing = false;
            self.phase = ENVELOPE_PHASE_FINISHED;
            return;
        }
        let new_target = next_target_for(next_phase);
        self.phase = next_phase;
        self.arm_phase(next_phase, new_target);
    }

    /// Advance one sample and return the updated value. Internally moves
    /// `current` toward `target` by `increment`; when they meet, the
    /// caller is expected to invoke [`Self::next_phase`] next.
    pub fn step(&mut self) -> i32 {
        if self.is_finished() {
            return self.current;
        }
        if self.increment == 0 {
            return self.current;
        }
        self.current += self.increment;
        let overshot = if self.increment > 0 {
            self.current >= self.target
        } else {
            self.current <= self.target
        };
        if overshot {
            self.current = self.target;
        }
        self.current
    }

    /// True once `current` has caught up to `target` for the active
    /// phase, signalling the caller should call [`Self::next_phase`].
    pub fn reached_target(&self) -> bool {
        self.current == self.target
    }

    /// Encode the current `time_to_target` as the reference byte form:
    /// magnitude OR'ed with [`TIME_DIRECTION_DOWN_BIT`] when moving down.
    pub fn time_to_target_byte(&self) -> u8 {
        if self.time_to_target < 0 {
            (self.time_to_target.unsigned_abs()) | TIME_DIRECTION_DOWN_BIT
        } else {
            self.time_to_target as u8
        }
    }
}

/// The configured target level for `phase` within `shape` (0 for
/// sustain/release phases, which compute their own targets).
pub fn configured_level_for(shape: &EnvelopeShape, phase: u8) -> i32 {
    match phase {
        0..=3 => shape.level[phase as usize] as i32,
        _ => 0,
    }
}

const _: () = assert!(ENVELOPE_PHASE_COUNT == 7);

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EnvelopeContext {
        EnvelopeContext {
            key: 60,
            velocity: 100,
            expression: 100,
            resonance: 0,
            is_rhythm: false,
        }
    }

    fn shape() -> EnvelopeShape {
        EnvelopeShape {
            level: [50, 30, 20, 0],
            time: [10, 10, 10, 10, 10],
            time_keyfollow: 0,
        }
    }

    #[test]
    fn zero_phase0_time_jumps_immediately_to_phase1() {
        let mut s = shape();
        s.time[0] = 0;
        let env = PhaseEnvelope::reset(s, &ctx(), 0);
        assert_eq!(env.phase(), 1);
    }

    #[test]
    fn step_moves_monotonically_toward_target() {
        let mut env = PhaseEnvelope::reset(shape(), &ctx(), 100);
        let start = env.current();
        env.arm_phase(0, 0);
        let mut last = start;
        for _ in 0..50 {
            let v = env.step();
            assert!(v <= last);
            last = v;
            if env.reached_target() {
                break;
            }
        }
    }

    #[test]
    fn finished_generator_refuses_further_phase_advance() {
        let mut env = PhaseEnvelope::reset(shape(), &ctx(), 0);
        env.phase = ENVELOPE_PHASE_FINISHED;
        env.playing = false;
        let before = env.phase();
        env.next_phase(false, |_| 0);
        assert_eq!(env.phase(), before);
    }

    #[test]
    fn key_time_subtraction_is_zero_without_keyfollow() {
        assert_eq!(PhaseEnvelope::key_time_subtraction(90, 0), 0);
    }

    #[test]
    fn key_time_subtraction_follows_key_above_60() {
        assert_eq!(PhaseEnvelope::key_time_subtraction(92, 5), (92 - 60) >> 0);
    }

    #[test]
    fn set_current_and_target_retargets_without_moving_phase() {
        let mut env = PhaseEnvelope::reset(shape(), &ctx(), 100);
        let phase_before = env.phase();
        env.set_current_and_target(40);
        assert_eq!(env.phase(), phase_before);
        assert_eq!(env.current(), 40);
        assert!(env.reached_target());
    }
}
