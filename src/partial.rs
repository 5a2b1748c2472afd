//! Partial: one voice among the synthesizer's fixed pool.
//!
//! Fuses a [`crate::wave::WaveGenerator`] with its three envelopes
//! (TVP/TVF/TVA), optionally paired with a sibling partial for ring
//! modulation, and produces one stereo frame per call to
//! [`Partial::next_sample`].

use crate::envelope::{EnvelopeContext, EnvelopeShape};
use crate::rom::{PcmRom, PcmSampleSlot};
use crate::tables::PAN_SETTINGS;
use crate::tva::{Tva, TvaLiveInputs, TvaParams};
use crate::tvf::{Tvf, TvfParams};
use crate::tvp::{Tvp, TvpParams};
use crate::wave::{WaveGenerator, WaveformKind};

/// This partial's role in a ring-modulation pair, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingModRole {
    /// Not paired; mixes normally.
    None,
    /// Drives a sibling slave partial; still mixes its own output.
    Master,
    /// Multiplies a master's raw output instead of mixing independently.
    Slave,
}

/// Immutable snapshot of a timbre's partial-structure parameters, taken at
/// note-on so a later SysEx edit to the timbre does not retroactively
/// alter a sounding note.
#[derive(Debug, Clone, Copy)]
pub struct PatchCache {
    /// TVA (amplitude envelope) parameters.
    pub tva: TvaParams,
    /// TVF (filter envelope) parameters.
    pub tvf: TvfParams,
    /// TVP (pitch envelope) parameters.
    pub tvp: TvpParams,
    /// Waveform source: synthesized or a PCM ROM slot.
    pub waveform: WaveformKind,
    /// This partial's own pan bias, added to the part's pan setting.
    pub pan_bias: i8,
    /// Ring-modulation role.
    pub ring_mod: RingModRole,
}

/// One rendered stereo sample, signed 16-bit per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    /// Left channel sample.
    pub left: i16,
    /// Right channel sample.
    pub right: i16,
}

/// One voice: wave generator + three envelopes + lifecycle bookkeeping.
pub struct Partial {
    index: usize,
    owner: Option<PartialOwner>,
    patch: Option<PatchCache>,
    tva: Option<Tva>,
    tvf: Option<Tvf>,
    tvp: Option<Tvp>,
    wave: WaveGenerator,
    pan_index: usize,
    age: u64,
    last_raw: i32,
}

/// Identifies which poly (by pool handle) and which part owns a partial,
/// without the partial holding an actual reference back — avoiding the
/// reference cycle the reference implementation has between Part, Poly
/// and Partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialOwner {
    /// Index of the owning part (0..9).
    pub part_index: usize,
    /// Pool handle of the owning poly.
    pub poly_handle: u32,
}

impl Partial {
    /// Construct a free partial at `index` within the pool.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            owner: None,
            patch: None,
            tva: None,
            tvf: None,
            tvp: None,
            wave: WaveGenerator::new(WaveformKind::Synthesized),
            pan_index: 5,
            age: 0,
            last_raw: 0,
        }
    }

    /// This partial's index in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// True if this partial is not currently assigned to a poly.
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// The owning poly/part, if assigned.
    pub fn owner(&self) -> Option<PartialOwner> {
        self.owner
    }

    /// This partial's waveform source, if assigned, so a caller can resolve
    /// the PCM ROM slot to pass into [`Self::next_sample`] without holding
    /// its own copy of the patch.
    pub fn waveform_kind(&self) -> Option<WaveformKind> {
        self.patch.map(|p| p.waveform)
    }

    /// This partial's ring-modulation role, if assigned.
    pub fn ring_mod_role(&self) -> Option<RingModRole> {
        self.patch.map(|p| p.ring_mod)
    }

    /// The rendered-time frame this partial was allocated at, used as the
    /// stealing tie-break ("oldest partial").
    pub fn age(&self) -> u64 {
        self.age
    }

    /// Assign this partial to a new note. `now` is the current render
    /// frame counter, captured for age-based stealing.
    pub fn note_on(
        &mut self,
        owner: PartialOwner,
        patch: PatchCache,
        ctx: &EnvelopeContext,
        tva_live: &TvaLiveInputs,
        pan_setting: u8,
        now: u64,
    ) {
        self.owner = Some(owner);
        self.patch = Some(patch);
        self.age = now;
        self.pan_index = (pan_setting as usize + patch.pan_bias.max(0) as usize)
            .min(PAN_SETTINGS.len() - 1);
        self.wave = WaveGenerator::new(patch.waveform);
        self.wave.reset();

        let mut tva = Tva::new(patch.tva);
        tva.reset(ctx, tva_live, patch.ring_mod == RingModRole::Slave);
        self.tva = Some(tva);

        let mut tvf = Tvf::new(patch.tvf);
        tvf.reset(ctx);
        self.tvf = Some(tvf);

        let mut tvp = Tvp::new(patch.tvp);
        tvp.reset(ctx);
        self.tvp = Some(tvp);
    }

    /// Produce one stereo sample. `pitch_hz` is the partial's base pitch
    /// before TVP/pitch-bend/LFO; `ring_input`, when this partial is a
    /// ring-mod slave, is the master's raw (pre-TVA, pre-pan) sample for
    /// this same frame, multiplied in instead of an independent carrier.
    pub fn next_sample(
        &mut self,
        sample_rate: u32,
        pcm_rom: Option<(&PcmRom, &PcmSampleSlot)>,
        base_pitch_hz: f32,
        sustain_held: bool,
        ring_input: Option<i32>,
    ) -> Frame {
        let Some(patch) = self.patch else {
            return Frame::default();
        };
        let (Some(tvp), Some(tvf), Some(tva)) =
            (self.tvp.as_mut(), self.tvf.as_mut(), self.tva.as_mut())
        else {
            return Frame::default();
        };

        let pitch_offset_cents = tvp.next_pitch(sustain_held);
        let pitch_hz = base_pitch_hz * 2f32.powf(pitch_offset_cents as f32 / 1200.0);
        let cutoff = tvf.next_filt(sustain_held);
        let raw = self.wave.next_sample(pitch_hz, sample_rate, cutoff, pcm_rom);
        self.last_raw = raw;

        let carrier = match patch.ring_mod {
            RingModRole::Slave => {
                let master = ring_input.unwrap_or(0);
                (raw * master) >> 15
            }
            _ => raw,
        };

        let amp = tva.next_amp(sustain_held);
        let scaled = (carrier * amp) >> 7; // amp in 0..155, keep headroom below i16::MAX
        let (pan_l, pan_r) = PAN_SETTINGS[self.pan_index];
        let left = (scaled * pan_l as i32) >> 7;
        let right = (scaled * pan_r as i32) >> 7;

        Frame {
            left: left.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            right: right.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        }
    }

    /// This partial's raw (pre-TVA, pre-pan) sample from the last
    /// [`Self::next_sample`] call, for a ring-mod master to hand to its
    /// paired slave.
    pub fn last_raw_sample(&self) -> i32 {
        self.last_raw
    }

    /// True once this partial has finished its release (TVA reached phase
    /// 7) and is eligible to return to the free pool.
    pub fn is_finished(&self) -> bool {
        match &self.tva {
            Some(tva) => tva.is_finished(),
            None => true,
        }
    }

    /// Force immediate release of all three envelopes (note-off without
    /// sustain, or sustain-pedal release).
    pub fn release(&mut self) {
        if let Some(tva) = self.tva.as_mut() {
            tva.start_decay();
        }
        if let Some(tvf) = self.tvf.as_mut() {
            tvf.start_decay();
        }
        if let Some(tvp) = self.tvp.as_mut() {
            tvp.start_decay();
        }
    }

    /// Return this partial to the free pool immediately, whether stolen
    /// or naturally finished.
    pub fn free(&mut self) {
        self.owner = None;
        self.patch = None;
        self.tva = None;
        self.tvf = None;
        self.tvp = None;
    }

    /// Drain the TVA bias-point bug diagnostic armed at the last
    /// `note_on`, if any.
    pub fn take_bug_diagnostic(&mut self) -> Option<crate::report::ReportEvent> {
        self.tva.as_mut().and_then(|tva| tva.take_bug_diagnostic())
    }

    /// Live CC11 (expression) update: push the new value into this
    /// partial's TVA without restarting its envelope, per §4.4.
    pub fn update_expression(&mut self, expression: u8) {
        if let Some(tva) = self.tva.as_mut() {
            tva.update_expression(expression);
        }
    }

    /// Live CC10 (pan) update: recompute this partial's pan index from the
    /// part's new pan setting, keeping its own pan bias, per §4.4.
    pub fn update_pan(&mut self, pan_setting: u8) {
        if let Some(patch) = self.patch {
            self.pan_index = (pan_setting as usize + patch.pan_bias.max(0) as usize)
                .min(PAN_SETTINGS.len() - 1);
        }
    }
}

/// Derive a pitch shape for TVA/TVF/TVP from ROM-provided levels/times —
/// a small helper shared by timbre decoding, kept here since it only
/// operates on the shape type these envelopes share.
pub fn shape_from_raw(level: [i8; 4], time: [u8; 5], time_keyfollow: u8) -> EnvelopeShape {
    EnvelopeShape {
        level,
        time,
        time_keyfollow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch() -> PatchCache {
        PatchCache {
            tva: TvaParams {
                shape: shape_from_raw([100, 80, 50, 0], [5, 10, 10, 10, 20], 0),
                partial_level: 20,
                bias_point_1: 0x40,
                bias_level_1: 0,
                bias_point_2: 0x40,
                bias_level_2: 0,
                velo_follow: 0,
            },
            tvf: TvfParams {
                shape: shape_from_raw([80, 60, 40, 0], [5, 10, 10, 10, 20], 0),
                base_cutoff: 200,
                cutoff_keyfollow: 0,
                level_mult: 50,
            },
            tvp: TvpParams {
                shape: shape_from_raw([0, 0, 0, 0], [1, 1, 1, 1, 1], 0),
                pitch_keyfollow: 0,
            },
            waveform: WaveformKind::Synthesized,
            pan_bias: 0,
            ring_mod: RingModRole::None,
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

    fn live() -> TvaLiveInputs {
        TvaLiveInputs {
            master_volume: 100,
            output_level: 50,
            rhythm_output_level: 0,
        }
    }

    #[test]
    fn fresh_partial_is_free() {
        let p = Partial::new(0);
        assert!(p.is_free());
    }

    #[test]
    fn note_on_claims_partial_and_produces_bounded_samples() {
        let mut p = Partial::new(0);
        p.note_on(
            PartialOwner {
                part_index: 0,
                poly_handle: 1,
            },
            patch(),
            &ctx(),
            &live(),
            7,
            0,
        );
        assert!(!p.is_free());
        for _ in 0..100 {
            let frame = p.next_sample(32_000, None, 261.63, false, None);
            assert!((i16::MIN..=i16::MAX).contains(&frame.left));
            assert!((i16::MIN..=i16::MAX).contains(&frame.right));
        }
    }

    #[test]
    fn release_then_render_eventually_finishes() {
        let mut p = Partial::new(0);
        p.note_on(
            PartialOwner {
                part_index: 0,
                poly_handle: 1,
            },
            patch(),
            &ctx(),
            &live(),
            7,
            0,
        );
        p.release();
        for _ in 0..20_000 {
            p.next_sample(32_000, None, 261.63, false, None);
            if p.is_finished() {
                break;
            }
        }
        assert!(p.is_finished());
    }

    #[test]
    fn free_clears_ownership() {
        let mut p = Partial::new(0);
        p.note_on(
            PartialOwner {
                part_index: 0,
                poly_handle: 1,
            },
            patch(),
            &ctx(),
            &live(),
            7,
            0,
        );
        p.free();
        assert!(p.is_free());
        assert!(p.is_finished());
    }
}
