//! Part: per-MIDI-channel state, routing note on/off and control changes
//! to its owned polys.

use crate::constants::PART_COUNT;
use crate::envelope::EnvelopeContext;
use crate::partial::PatchCache;
use crate::partial_manager::{AllocationResult, PartialManager};
use crate::poly::Poly;
use crate::tva::TvaLiveInputs;

/// Per-channel mutable state the reference implementation stores on
/// `Part`: program, expression, pitch bend, RPN-derived bend range,
/// sustain pedal, modulation, volume and pan.
#[derive(Debug, Clone)]
pub struct Part {
    /// Index of this part (0..9; 8 is the rhythm part).
    pub index: usize,
    /// Currently selected program (0..127), which timbre the part plays.
    pub program: u8,
    /// Expression controller value (0..127).
    pub expression: u8,
    /// Pitch bend, 14-bit centered at 8192.
    pub pitch_bend: u16,
    /// Pitch bend range in semitones, from RPN 0.
    pub bend_range_semitones: u8,
    /// Sustain pedal state (CC 64).
    pub sustain_pedal: bool,
    /// Modulation wheel (CC 1).
    pub modulation: u8,
    /// Channel volume (CC 7).
    pub volume: u8,
    /// Pan (CC 10), 0..127 mapped onto the 15-entry pan table.
    pub pan: u8,
    /// Stealing priority for this part's partials (0 = protected, 1 =
    /// fully eligible for reclamation).
    pub steal_priority: f32,
    /// Handles of the polys this part currently owns.
    pub polys: Vec<Poly>,
    next_poly_handle: u32,
}

impl Part {
    /// Construct a part in its post-reset default state.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            program: 0,
            expression: 127,
            pitch_bend: 8192,
            bend_range_semitones: 2,
            sustain_pedal: false,
            modulation: 0,
            volume: 100,
            pan: 64,
            steal_priority: 0.5,
            polys: Vec::new(),
            next_poly_handle: 0,
        }
    }

    /// True if this is the rhythm part.
    pub fn is_rhythm(&self) -> bool {
        self.index == crate::constants::RHYTHM_PART_INDEX
    }

    /// Reset this part to its post-`open`/post-reset-region defaults.
    pub fn reset(&mut self) {
        let index = self.index;
        *self = Self::new(index);
    }

    fn next_handle(&mut self) -> u32 {
        self.next_poly_handle = self.next_poly_handle.wrapping_add(1);
        self.next_poly_handle
    }

    /// Handle a note-on: ask the partial manager for the partials the
    /// selected timbre's structures need, and on success instantiate a
    /// poly. Returns `false` (and emits no poly) if allocation failed,
    /// per §4.3's "note-on is dropped" contract.
    #[allow(clippy::too_many_arguments)]
    pub fn note_on(
        &mut self,
        key: u8,
        velocity: u8,
        structures_needed: usize,
        patches: &[PatchCache],
        partial_manager: &mut PartialManager,
        tva_live: &TvaLiveInputs,
        part_priorities: &[f32; PART_COUNT],
        now: u64,
    ) -> bool {
        let allocation =
            partial_manager.allocate(structures_needed, self.steal_priority, part_priorities, now);
        let AllocationResult::Granted(indices) = allocation else {
            return false;
        };

        let handle = self.next_handle();
        let ctx = EnvelopeContext {
            key,
            velocity,
            expression: self.expression,
            resonance: 0,
            is_rhythm: self.is_rhythm(),
        };
        for (&partial_index, patch) in indices.iter().zip(patches.iter()) {
            if let Some(partial) = partial_manager.partial_mut(partial_index) {
                partial.note_on(
                    crate::partial::PartialOwner {
                        part_index: self.index,
                        poly_handle: handle,
                    },
                    *patch,
                    &ctx,
                    tva_live,
                    self.pan_table_index(),
                    now,
                );
            }
        }

        self.polys
            .push(Poly::new(handle, key, velocity, indices, now));
        true
    }

    fn pan_table_index(&self) -> u8 {
        ((self.pan as u32 * 14) / 127) as u8
    }

    /// Handle a note-off: locate the matching poly (most recent first, so
    /// retriggered keys release the newest voice) and either mark it
    /// pedal-held or start its release.
    pub fn note_off(&mut self, key: u8, partial_manager: &mut PartialManager) {
        if let Some(poly) = self
            .polys
            .iter_mut()
            .rev()
            .find(|p| p.key == key && p.is_active() && !p.pedal_hold)
        {
            poly.note_off(self.sustain_pedal);
            if !self.sustain_pedal {
                for &partial_index in &poly.partials {
                    if let Some(partial) = partial_manager.partial_mut(partial_index) {
                        partial.release();
                    }
                }
            }
        }
    }

    /// Handle a sustain-pedal (CC 64) transition.
    pub fn set_sustain_pedal(&mut self, down: bool, partial_manager: &mut PartialManager) {
        let was_down = self.sustain_pedal;
        self.sustain_pedal = down;
        if was_down && !down {
            for poly in self.polys.iter_mut() {
                poly.pedal_released();
            }
            for poly in self.polys.iter() {
                if !poly.pedal_hold {
                    for &partial_index in &poly.partials {
                        if let Some(partial) = partial_manager.partial_mut(partial_index) {
                            partial.release();
                        }
                    }
                }
            }
        }
    }

    /// "All notes off": release every active poly gracefully (fast
    /// release, not an immediate kill).
    pub fn all_notes_off(&mut self, partial_manager: &mut PartialManager) {
        for poly in self.polys.iter_mut() {
            poly.note_off(false);
            for &partial_index in &poly.partials {
                if let Some(partial) = partial_manager.partial_mut(partial_index) {
                    partial.release();
                }
            }
        }
    }

    /// "All sound off": kill every poly and reclaim its partials
    /// immediately, with no release tail.
    pub fn all_sound_off(&mut self, partial_manager: &mut PartialManager) {
        for poly in self.polys.iter_mut() {
            poly.kill();
            for &partial_index in &poly.partials {
                if let Some(partial) = partial_manager.partial_mut(partial_index) {
                    partial.free();
                }
            }
        }
        self.polys.clear();
    }

    /// Live CC11 (expression) update, per §4.4: push the part's new
    /// expression into every currently active partial's TVA without
    /// restarting its envelope. Call this after updating `self.expression`.
    pub fn update_expression(&mut self, partial_manager: &mut PartialManager) {
        for poly in self.polys.iter() {
            for &partial_index in &poly.partials {
                if let Some(partial) = partial_manager.partial_mut(partial_index) {
                    partial.update_expression(self.expression);
                }
            }
        }
    }

    /// Live CC10 (pan) update, per §4.4: recompute every active partial's
    /// pan index from the part's new pan setting. Call this after updating
    /// `self.pan`.
    pub fn update_pan(&mut self, partial_manager: &mut PartialManager) {
        let pan_setting = self.pan_table_index();
        for poly in self.polys.iter() {
            for &partial_index in &poly.partials {
                if let Some(partial) = partial_manager.partial_mut(partial_index) {
                    partial.update_pan(pan_setting);
                }
            }
        }
    }

    /// Drop polys whose partials have all been reaped, after the
    /// renderer's per-frame partial-manager sweep. A partial counts as
    /// done for a poly not only once freed but also once the pool has
    /// reassigned it to a different owner via stealing — otherwise a
    /// stolen-from poly would never see `is_free()` turn true again and
    /// would linger in `self.polys` forever.
    pub fn prune_finished_polys(&mut self, partial_manager: &PartialManager) {
        for poly in self.polys.iter_mut() {
            let owner = crate::partial::PartialOwner {
                part_index: self.index,
                poly_handle: poly.handle,
            };
            let all_done = poly
                .partials
                .iter()
                .all(|&i| partial_manager.partial(i).map(|p| p.owner() != Some(owner)).unwrap_or(true));
            poly.mark_finished_if_all_partials_done(all_done);
        }
        self.polys.retain(|p| p.is_active());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partial::{shape_from_raw, RingModRole};
    use crate::tva::TvaParams;
    use crate::tvf::TvfParams;
    use crate::tvp::TvpParams;
    use crate::wave::WaveformKind;

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

    fn live() -> TvaLiveInputs {
        TvaLiveInputs {
            master_volume: 100,
            output_level: 50,
            rhythm_output_level: 0,
        }
    }

    #[test]
    fn note_on_grants_a_poly_and_claims_partials() {
        let mut part = Part::new(0);
        let mut mgr = PartialManager::new(4);
        let patches = [patch(), patch()];
        let ok = part.note_on(60, 100, 2, &patches, &mut mgr, &live(), &[0.5; PART_COUNT], 0);
        assert!(ok);
        assert_eq!(part.polys.len(), 1);
        assert_eq!(mgr.free_count(), 2);
    }

    #[test]
    fn note_off_releases_matching_poly_without_pedal() {
        let mut part = Part::new(0);
        let mut mgr = PartialManager::new(4);
        let patches = [patch()];
        part.note_on(60, 100, 1, &patches, &mut mgr, &live(), &[0.5; PART_COUNT], 0);
        part.note_off(60, &mut mgr);
        assert!(!part.polys[0].pedal_hold);
    }

    #[test]
    fn note_off_with_pedal_down_holds_poly() {
        let mut part = Part::new(0);
        part.sustain_pedal = true;
        let mut mgr = PartialManager::new(4);
        let patches = [patch()];
        part.note_on(60, 100, 1, &patches, &mut mgr, &live(), &[0.5; PART_COUNT], 0);
        part.note_off(60, &mut mgr);
        assert!(part.polys[0].pedal_hold);
    }

    #[test]
    fn all_sound_off_clears_every_poly_immediately() {
        let mut part = Part::new(0);
        let mut mgr = PartialManager::new(4);
        let patches = [patch()];
        part.note_on(60, 100, 1, &patches, &mut mgr, &live(), &[0.5; PART_COUNT], 0);
        part.all_sound_off(&mut mgr);
        assert!(part.polys.is_empty());
        assert_eq!(mgr.free_count(), 4);
    }

    #[test]
    fn note_on_fails_when_allocation_is_exhausted() {
        let mut part = Part::new(0);
        let mut mgr = PartialManager::new(1);
        let patches = [patch(), patch()];
        let ok = part.note_on(60, 100, 2, &patches, &mut mgr, &live(), &[0.5; PART_COUNT], 0);
        assert!(!ok);
        assert!(part.polys.is_empty());
    }
}
