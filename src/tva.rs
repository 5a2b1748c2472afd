//! Time-Variant Amplitude envelope.
//!
//! Arithmetic ported from the reference `calcBiasAmpSubtraction`,
//! `calcVeloAmpSubtraction`, `calcBasicAmp` and `calcKeyTimeSubtraction`
//! routines. `calcBasicAmp` starts from a fixed ceiling of 155 and
//! subtracts a cascade of ROM-table lookups (master volume, output level,
//! expression, rhythm level, bias, partial level, velocity), clamping to 0
//! after each subtraction and to 155 at the end — this implementation
//! keeps that exact subtraction-from-155 shape rather than a linear sum,
//! using the reconstructed tables in [`crate::tables`]. One detail needed
//! a judgment call: the reference's bias-point direction test reads
//! `biasPoint & 0x40 == 0`, which in C parses as `biasPoint & (0x40 == 0)`
//! — always zero — because `==` binds tighter than `&`. The ROM's bias
//! tables clearly intend bit 6 of `biasPoint` as a below/above-key
//! direction flag, so this implementation evaluates `(biasPoint & 0x40) ==
//! 0` instead. See [`Tva::take_bug_diagnostic`].

use crate::envelope::{configured_level_for, EnvelopeContext, EnvelopeShape, PhaseEnvelope};
use crate::report::ReportEvent;
use crate::tables::{
    level_to_amp_subtraction, master_vol_to_amp_subtraction, BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF,
};

/// Static (per-note) parameters a timbre's partial structure supplies to
/// its TVA, captured into the patch cache at note-on.
#[derive(Debug, Clone, Copy)]
pub struct TvaParams {
    /// Envelope phase shape (levels/times/keyfollow).
    pub shape: EnvelopeShape,
    /// This partial's static output level (0..100).
    pub partial_level: u8,
    /// First bias point (bit 6 = direction, bits 0..5 = key).
    pub bias_point_1: u8,
    /// First bias level (0..12, indexes the subtraction coefficient table).
    pub bias_level_1: u8,
    /// Second bias point, or 0x40 (no effect) if unused.
    pub bias_point_2: u8,
    /// Second bias level.
    pub bias_level_2: u8,
    /// Velocity sensitivity (0..100, 50 = no velocity effect), per
    /// `calcVeloAmpSubtraction`'s `veloSensitivity` parameter.
    pub velo_follow: u8,
}

/// Live synth-wide/part-wide values TVA needs at reset, beyond the shared
/// [`EnvelopeContext`].
#[derive(Debug, Clone, Copy)]
pub struct TvaLiveInputs {
    /// System-area master volume (0..100).
    pub master_volume: u8,
    /// Part's patch output level (0..100).
    pub output_level: u8,
    /// Rhythm-temp output level, applicable only when `ctx.is_rhythm`.
    pub rhythm_output_level: u8,
}

/// Time-Variant Amplitude envelope generator.
pub struct Tva {
    engine: Option<PhaseEnvelope>,
    params: TvaParams,
    /// Whether this voice is a ring-modulation slave — `calcBasicAmp`
    /// skips the master-volume/output-level/expression/rhythm-level
    /// subtractions entirely for a slave, since its amplitude is carried
    /// by the master it multiplies.
    is_ring_mod_slave: bool,
    master_volume: u8,
    output_level: u8,
    rhythm_output_level: Option<u8>,
    bias_amp_subtraction: i32,
    velo_amp_subtraction: i32,
    resonance: u8,
    /// Live expression, re-read at every phase transition (and pushed
    /// externally by [`Self::update_expression`]) the way the reference's
    /// `TVA::nextPhase` re-reads `part->getExpression()` fresh each time.
    expression: u8,
    bug_diagnostic_pending: bool,
}

fn calc_bias_amp_subtraction(bias_point: u8, bias_level: u8, key: u8) -> u8 {
    let direction_below = (bias_point & 0x40) == 0;
    let pivot = bias_point & 0x3f;
    let distance = if direction_below {
        pivot.saturating_sub(key)
    } else {
        key.saturating_sub(pivot)
    };
    let coeff = BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF[bias_level.min(12) as usize] as u32;
    (((distance as u32) * coeff) >> 5).min(255) as u8
}

/// What the pre-precedence-fix reading of the bias-point direction test
/// would have evaluated to: always "below", since `0x40 == 0` is false and
/// ANDing with `false` is always zero in the buggy C expression.
fn calc_bias_amp_subtraction_buggy(bias_point: u8, bias_level: u8, key: u8) -> u8 {
    let pivot = bias_point & 0x3f;
    let distance = pivot.saturating_sub(key);
    let coeff = BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF[bias_level.min(12) as usize] as u32;
    (((distance as u32) * coeff) >> 5).min(255) as u8
}

/// Ported from the reference's `calcVeloAmpSubtraction(veloSensitivity,
/// velocity)`: centers sensitivity on 50 (no effect), then scales the
/// velocity's distance from 64 by that offset. Note the asymmetry this
/// produces is intentional and matches the reference bit-for-bit: the
/// magnitude term uses the *unscaled* sensitivity offset while the
/// velocity-dependent term is shifted left by 2 before being shifted right
/// by 8, so low-velocity notes are *louder* than high-velocity ones when
/// `velo_sensitivity` is below 50, and vice versa above it.
fn calc_velo_amp_subtraction(velo_sensitivity: u8, velocity: u8) -> i32 {
    let velocity_mult = velo_sensitivity as i32 - 50;
    let abs_velocity_mult = velocity_mult.abs();
    let velocity_mult = (velocity_mult * (velocity as i32 - 64)) << 2;
    abs_velocity_mult - (velocity_mult >> 8)
}

/// Ported from the reference's `calcBasicAmp`: starts from a ceiling of
/// 155 and subtracts each ROM-table lookup in turn, returning 0 the moment
/// any subtraction would take the running amplitude negative, and clamping
/// the final result to 155. A ring-modulation slave skips the
/// master-volume/output-level/expression/rhythm-level terms, matching
/// `!partial->isRingModulatingSlave()` in the reference.
#[allow(clippy::too_many_arguments)]
fn calc_basic_amp(
    is_ring_mod_slave: bool,
    master_volume: u8,
    output_level: u8,
    expression: u8,
    rhythm_output_level: Option<u8>,
    bias_amp_subtraction: i32,
    partial_level: u8,
    velo_amp_subtraction: i32,
) -> i32 {
    let mut amp: i32 = 155;

    if !is_ring_mod_slave {
        amp -= master_vol_to_amp_subtraction(master_volume) as i32;
        if amp < 0 {
            return 0;
        }
        amp -= level_to_amp_subtraction(output_level) as i32;
        if amp < 0 {
            return 0;
        }
        amp -= level_to_amp_subtraction(expression) as i32;
        if amp < 0 {
            return 0;
        }
        if let Some(rhythm_level) = rhythm_output_level {
            amp -= level_to_amp_subtraction(rhythm_level) as i32;
            if amp < 0 {
                return 0;
            }
        }
    }

    amp -= bias_amp_subtraction;
    if amp < 0 {
        return 0;
    }
    amp -= level_to_amp_subtraction(partial_level) as i32;
    if amp < 0 {
        return 0;
    }
    amp -= velo_amp_subtraction;
    if amp < 0 {
        return 0;
    }

    amp.min(155)
}

impl Tva {
    /// Construct an unarmed TVA; call [`Self::reset`] before use.
    pub fn new(params: TvaParams) -> Self {
        Self {
            engine: None,
            params,
            is_ring_mod_slave: false,
            master_volume: 0,
            output_level: 0,
            rhythm_output_level: None,
            bias_amp_subtraction: 0,
            velo_amp_subtraction: 0,
            resonance: 0,
            expression: 0,
            bug_diagnostic_pending: false,
        }
    }

    /// Reset for a new note, per §4.1's reset contract. `is_ring_mod_slave`
    /// selects the reduced `calcBasicAmp` cascade a ring-modulation slave
    /// uses (see [`calc_basic_amp`]).
    pub fn reset(&mut self, ctx: &EnvelopeContext, live: &TvaLiveInputs, is_ring_mod_slave: bool) {
        let bias_1 =
            calc_bias_amp_subtraction(self.params.bias_point_1, self.params.bias_level_1, ctx.key);
        let bias_2 =
            calc_bias_amp_subtraction(self.params.bias_point_2, self.params.bias_level_2, ctx.key);
        let bias_amp_subtraction = (bias_1 as u32 + bias_2 as u32).min(255) as i32;

        let buggy_1 = calc_bias_amp_subtraction_buggy(
            self.params.bias_point_1,
            self.params.bias_level_1,
            ctx.key,
        );
        let buggy_2 = calc_bias_amp_subtraction_buggy(
            self.params.bias_point_2,
            self.params.bias_level_2,
            ctx.key,
        );
        let buggy_total = (buggy_1 as u32 + buggy_2 as u32).min(255) as i32;
        if buggy_total != bias_amp_subtraction {
            self.bug_diagnostic_pending = true;
        }

        self.is_ring_mod_slave = is_ring_mod_slave;
        self.master_volume = live.master_volume;
        self.output_level = live.output_level;
        self.rhythm_output_level = ctx.is_rhythm.then_some(live.rhythm_output_level);
        self.bias_amp_subtraction = bias_amp_subtraction;
        self.velo_amp_subtraction = calc_velo_amp_subtraction(self.params.velo_follow, ctx.velocity);
        self.resonance = ctx.resonance;
        self.expression = ctx.expression;

        let target_amp = self.baseline().clamp(0, 155);
        self.engine = Some(PhaseEnvelope::reset(self.params.shape, ctx, target_amp));
    }

    /// `calcBasicAmp` evaluated against this voice's current stored
    /// inputs, minus the resonance correction — recomputed fresh rather
    /// than cached, since expression (and, via `update_expression`, any
    /// live CC push) can change between phase transitions.
    fn baseline(&self) -> i32 {
        let basic_amp = calc_basic_amp(
            self.is_ring_mod_slave,
            self.master_volume,
            self.output_level,
            self.expression,
            self.rhythm_output_level,
            self.bias_amp_subtraction,
            self.params.partial_level,
            self.velo_amp_subtraction,
        );
        basic_amp - (self.resonance as i32 / 2)
    }

    /// Advance one sample, returning the current linear amplitude (0..155).
    /// `sustain_held` reflects the poly's sustain-pedal state and is
    /// consulted only at the phase-4 → phase-5 transition.
    pub fn next_amp(&mut self, sustain_held: bool) -> i32 {
        let baseline = self.baseline();
        let Some(engine) = self.engine.as_mut() else {
            return 0;
        };
        let value = engine.step();
        if engine.reached_target() && !engine.is_finished() {
            let shape = engine.shape();
            engine.next_phase(sustain_held, |phase| {
                (baseline + configured_level_for(&shape, phase)).clamp(0, 155)
            });
        }
        value
    }

    /// Push a live CC11 (expression) change into this voice without
    /// restarting its envelope phase — the reference already re-reads
    /// expression fresh inside `calcBasicAmp` at every phase transition;
    /// this retargets the *current* phase immediately instead of waiting
    /// for the next one. A no-op once the voice has entered release
    /// (phase 6+), since release always heads toward silence regardless of
    /// expression.
    pub fn update_expression(&mut self, expression: u8) {
        self.expression = expression;
        let baseline = self.baseline();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.is_finished() || engine.phase() >= 6 {
            return;
        }
        let shape = engine.shape();
        let phase = engine.phase();
        let new_target = (baseline + configured_level_for(&shape, phase)).clamp(0, 155);
        engine.set_current_and_target(new_target);
    }

    /// True once the amplitude envelope has finished (phase 7).
    pub fn is_finished(&self) -> bool {
        self.engine.as_ref().map(|e| e.is_finished()).unwrap_or(true)
    }

    /// Called by a poly on note-off without sustain pedal held, or on
    /// pedal release: forces the envelope into its release phase.
    pub fn start_decay(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.start_decay();
        }
    }

    /// Drain the one-shot diagnostic for the bias-point precedence
    /// correction, if this reset's bias points would have produced a
    /// different subtraction under the original (buggy) precedence.
    pub fn take_bug_diagnostic(&mut self) -> Option<ReportEvent> {
        if std::mem::take(&mut self.bug_diagnostic_pending) {
            Some(ReportEvent::DebugMessage(
                "TVA bias-point direction evaluated with corrected operator precedence \
                 (biasPoint & 0x40) == 0; original expression would have differed for this note"
                    .to_string(),
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TvaParams {
        TvaParams {
            shape: EnvelopeShape {
                level: [100, 80, 50, 0],
                time: [5, 10, 10, 10, 20],
                time_keyfollow: 0,
            },
            partial_level: 20,
            bias_point_1: 0x40, // direction "above", pivot 0
            bias_level_1: 0,
            bias_point_2: 0x40,
            bias_level_2: 0,
            velo_follow: 0,
        }
    }

    fn ctx(key: u8, velocity: u8) -> EnvelopeContext {
        EnvelopeContext {
            key,
            velocity,
            expression: 100,
            resonance: 0,
            is_rhythm: false,
        }
    }

    fn live() -> TvaLiveInputs {
        TvaLiveInputs {
            master_volume: 100,
            output_level: 50,
            rhythm_output_level: 0,
        }
    }

    #[test]
    fn amplitude_never_exceeds_155() {
        let mut tva = Tva::new(params());
        tva.reset(&ctx(60, 127), &live(), false);
        for _ in 0..1000 {
            let amp = tva.next_amp(false);
            assert!((0..=155).contains(&amp));
            if tva.is_finished() {
                break;
            }
        }
    }

    #[test]
    fn bias_subtraction_is_zero_at_the_pivot_key() {
        // Distance from the pivot is zero regardless of the bias level's
        // coefficient, since the subtraction is distance * coeff.
        assert_eq!(calc_bias_amp_subtraction(0x40 | 60, 0, 60), 0);
        assert_eq!(calc_bias_amp_subtraction(0x40 | 60, 5, 60), 0);
    }

    #[test]
    fn bias_subtraction_grows_with_distance_from_pivot() {
        let near = calc_bias_amp_subtraction(0x00 | 40, 6, 50);
        let far = calc_bias_amp_subtraction(0x00 | 40, 6, 10);
        assert!(far >= near);
    }

    #[test]
    fn velo_amp_subtraction_is_neutral_at_sensitivity_50() {
        // veloSensitivity == 50 zeroes the velocity-dependent term, leaving
        // only the (zero) magnitude term regardless of velocity.
        assert_eq!(calc_velo_amp_subtraction(50, 1), 0);
        assert_eq!(calc_velo_amp_subtraction(50, 127), 0);
    }

    #[test]
    fn velo_amp_subtraction_is_nonzero_away_from_sensitivity_50() {
        assert_ne!(calc_velo_amp_subtraction(100, 1), 0);
        assert_ne!(calc_velo_amp_subtraction(0, 127), 0);
    }

    #[test]
    fn basic_amp_clamped_to_valid_range() {
        // Zero subtraction at every stage (max master volume/output
        // level/expression, no rhythm level, no bias/velocity subtraction,
        // max partial level) leaves the 155 ceiling untouched.
        let amp = calc_basic_amp(false, 100, 127, 127, None, 0, 127, 0);
        assert_eq!(amp, 155);
        // A large bias subtraction alone drives the running amplitude
        // negative, clamping to 0.
        let amp = calc_basic_amp(false, 100, 127, 127, None, 1000, 127, 0);
        assert_eq!(amp, 0);
    }

    #[test]
    fn basic_amp_skips_level_subtractions_for_a_ring_mod_slave() {
        // A slave ignores master volume/output level/expression/rhythm
        // level entirely, so even harsh settings there leave it unaffected
        // by anything but bias/partial-level/velocity.
        let amp = calc_basic_amp(true, 0, 0, 0, Some(0), 0, 127, 0);
        assert_eq!(amp, 155);
    }

    #[test]
    fn start_decay_moves_engine_toward_zero() {
        let mut tva = Tva::new(params());
        tva.reset(&ctx(60, 100), &live(), false);
        tva.start_decay();
        for _ in 0..10_000 {
            tva.next_amp(false);
            if tva.is_finished() {
                break;
            }
        }
        assert!(tva.is_finished());
    }
}
