//! Time-Variant Pitch envelope.
//!
//! Shares the [`crate::envelope::PhaseEnvelope`] engine with TVF and TVA;
//! unlike TVA's clamped 0..155 amplitude, TVP's output is a signed pitch
//! offset in cents, added to a partial's base pitch alongside pitch-bend
//! and LFO before the wave generator's phase accumulator advances.

use crate::envelope::{configured_level_for, EnvelopeContext, EnvelopeShape, PhaseEnvelope};

/// Static per-note parameters for a TVP, from the patch cache.
#[derive(Debug, Clone, Copy)]
pub struct TvpParams {
    /// Envelope phase shape. Levels are signed cents offsets.
    pub shape: EnvelopeShape,
    /// Pitch key-follow amount in 1/8-semitone units per key (0 disables).
    pub pitch_keyfollow: u8,
}

/// Time-Variant Pitch envelope generator.
pub struct Tvp {
    engine: Option<PhaseEnvelope>,
    params: TvpParams,
    key_follow_offset: i32,
}

impl Tvp {
    /// Construct an unarmed TVP; call [`Self::reset`] before use.
    pub fn new(params: TvpParams) -> Self {
        Self {
            engine: None,
            params,
            key_follow_offset: 0,
        }
    }

    /// Reset for a new note.
    pub fn reset(&mut self, ctx: &EnvelopeContext) {
        self.key_follow_offset = if self.params.pitch_keyfollow == 0 {
            0
        } else {
            (ctx.key as i32 - 60) * self.params.pitch_keyfollow as i32
        };
        let initial_target = configured_level_for(&self.params.shape, 0) as i32;
        self.engine = Some(PhaseEnvelope::reset(self.params.shape, ctx, initial_target));
    }

    /// Advance one sample, returning the current pitch offset in cents,
    /// including the static key-follow contribution.
    pub fn next_pitch(&mut self, sustain_held: bool) -> i32 {
        let key_follow = self.key_follow_offset;
        let Some(engine) = self.engine.as_mut() else {
            return key_follow;
        };
        let value = engine.step();
        if engine.reached_target() && !engine.is_finished() {
            let shape = engine.shape();
            engine.next_phase(sustain_held, |phase| configured_level_for(&shape, phase));
        }
        value + key_follow
    }

    /// True once the pitch envelope has finished.
    pub fn is_finished(&self) -> bool {
        self.engine.as_ref().map(|e| e.is_finished()).unwrap_or(true)
    }

    /// Force the envelope into its release phase.
    pub fn start_decay(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.start_decay();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TvpParams {
        TvpParams {
            shape: EnvelopeShape {
                level: [10, 5, 0, 0],
                time: [5, 10, 10, 10, 20],
                time_keyfollow: 0,
            },
            pitch_keyfollow: 0,
        }
    }

    fn ctx(key: u8) -> EnvelopeContext {
        EnvelopeContext {
            key,
            velocity: 100,
            expression: 100,
            resonance: 0,
            is_rhythm: false,
        }
    }

    #[test]
    fn key_follow_adds_static_offset() {
        let mut tvp = Tvp::new(TvpParams {
            pitch_keyfollow: 2,
            ..params()
        });
        tvp.reset(&ctx(72));
        assert_eq!(tvp.key_follow_offset, (72 - 60) * 2);
    }

    #[test]
    fn pitch_settles_and_envelope_finishes() {
        let mut tvp = Tvp::new(params());
        tvp.reset(&ctx(60));
        for _ in 0..10_000 {
            tvp.next_pitch(false);
            if tvp.is_finished() {
                break;
            }
        }
        assert!(tvp.is_finished());
    }
}
