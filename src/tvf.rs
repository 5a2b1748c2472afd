//! Time-Variant Filter envelope.
//!
//! Field shape (`baseCutoff`, `keyTimeSubtraction`, `levelMult`) follows
//! the reference `TVF` structure; the reference's own cutoff-update
//! arithmetic lived in a translation unit not carried into this pass, so
//! the per-phase target here is reconstructed from the documented shape:
//! a base cutoff corrected by key-follow, modulated by each phase's
//! configured level scaled by `levelMult`.

use crate::envelope::{configured_level_for, EnvelopeContext, EnvelopeShape, PhaseEnvelope};

/// Static per-note parameters for a TVF, from the patch cache.
#[derive(Debug, Clone, Copy)]
pub struct TvfParams {
    /// Envelope phase shape.
    pub shape: EnvelopeShape,
    /// Base cutoff frequency, in the same 0..255 unit as TVA levels.
    pub base_cutoff: u8,
    /// Cutoff key-follow amount (0 disables).
    pub cutoff_keyfollow: u8,
    /// Scales each phase's configured level before adding to the cutoff.
    pub level_mult: u8,
}

/// Time-Variant Filter envelope generator. Produces a cutoff-offset value
/// consumed by [`crate::wave::WaveGenerator`]'s low-pass stage.
pub struct Tvf {
    engine: Option<PhaseEnvelope>,
    params: TvfParams,
    cutoff_baseline: i32,
}

impl Tvf {
    /// Construct an unarmed TVF; call [`Self::reset`] before use.
    pub fn new(params: TvfParams) -> Self {
        Self {
            engine: None,
            params,
            cutoff_baseline: 0,
        }
    }

    /// Reset for a new note.
    pub fn reset(&mut self, ctx: &EnvelopeContext) {
        let key_follow = if self.params.cutoff_keyfollow == 0 {
            0
        } else {
            (ctx.key as i32 - 60) * self.params.cutoff_keyfollow as i32 / 8
        };
        let baseline = (self.params.base_cutoff as i32 + key_follow).clamp(0, 255);
        self.cutoff_baseline = baseline;
        let initial_target = baseline
            + configured_level_for(&self.params.shape, 0) * self.params.level_mult as i32 / 100;
        self.engine = Some(PhaseEnvelope::reset(
            self.params.shape,
            ctx,
            initial_target.clamp(0, 255),
        ));
    }

    /// Advance one sample, returning the current cutoff offset (0..255).
    pub fn next_filt(&mut self, sustain_held: bool) -> i32 {
        let baseline = self.cutoff_baseline;
        let level_mult = self.params.level_mult as i32;
        let Some(engine) = self.engine.as_mut() else {
            return 0;
        };
        let value = engine.step();
        if engine.reached_target() && !engine.is_finished() {
            let shape = engine.shape();
            engine.next_phase(sustain_held, |phase| {
                (baseline + configured_level_for(&shape, phase) * level_mult / 100).clamp(0, 255)
            });
        }
        value
    }

    /// True once the filter envelope has finished.
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

    fn params() -> TvfParams {
        TvfParams {
            shape: EnvelopeShape {
                level: [80, 60, 40, 0],
                time: [5, 10, 10, 10, 20],
                time_keyfollow: 0,
            },
            base_cutoff: 128,
            cutoff_keyfollow: 0,
            level_mult: 50,
        }
    }

    fn ctx() -> EnvelopeContext {
        EnvelopeContext {
            key: 60,
            velocity: 100,
            expression: 100,
            resonance: 0,
            is_rhythm: false,
        }
    }

    #[test]
    fn cutoff_stays_within_byte_range() {
        let mut tvf = Tvf::new(params());
        tvf.reset(&ctx());
        for _ in 0..500 {
            let v = tvf.next_filt(false);
            assert!((0..=255).contains(&v));
            if tvf.is_finished() {
                break;
            }
        }
    }

    #[test]
    fn key_follow_raises_cutoff_above_key_60() {
        let mut high = Tvf::new(TvfParams {
            cutoff_keyfollow: 4,
            ..params()
        });
        high.reset(&EnvelopeContext {
            key: 84,
            ..ctx()
        });
        assert!(high.cutoff_baseline > params().base_cutoff as i32);
    }
}
