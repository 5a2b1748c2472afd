//! Poly: a single pressed key and the partials it owns.
//!
//! Field set follows the reference `Poly` structure (`isPlaying`, `key`,
//! `freqnum`, `vel`, `isDecay`, `pedalhold`, `sustain`, up to four owned
//! partials) with the cyclic Part↔Poly↔Partial pointer graph replaced by
//! pool-index handles, per the re-architecture this system calls for.

use crate::constants::MAX_PARTIALS_PER_POLY;

/// A poly's lifecycle, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyState {
    /// Key is down, envelopes running toward sustain.
    Playing,
    /// Note-off received while the sustain pedal is held; envelopes are
    /// still in their sustain phase, waiting for pedal release.
    Held,
    /// Releasing: all partials have been told to decay.
    Releasing,
    /// All owned partials have finished; eligible for reuse.
    Finished,
}

/// A pressed key and the (up to four) partials synthesizing it.
#[derive(Debug, Clone)]
pub struct Poly {
    /// Generation-tagged handle identifying this poly instance, so a
    /// partial's back-reference (see [`crate::partial::PartialOwner`])
    /// cannot silently alias a different, later poly at the same slot.
    pub handle: u32,
    /// MIDI key number.
    pub key: u8,
    /// MIDI velocity.
    pub velocity: u8,
    /// Indices into the partial pool this poly currently owns.
    pub partials: Vec<usize>,
    /// True if a sustain-pedal hold is keeping this poly's envelopes in
    /// their sustain phase past note-off.
    pub pedal_hold: bool,
    /// Current lifecycle state.
    pub state: PolyState,
    /// Render-frame counter at the time of note-on, used as the stealing
    /// age tie-break.
    pub born_at: u64,
}

impl Poly {
    /// Construct a new poly for a freshly pressed key.
    pub fn new(handle: u32, key: u8, velocity: u8, partials: Vec<usize>, born_at: u64) -> Self {
        debug_assert!(partials.len() <= MAX_PARTIALS_PER_POLY);
        Self {
            handle,
            key,
            velocity,
            partials,
            pedal_hold: false,
            state: PolyState::Playing,
            born_at,
        }
    }

    /// True if this poly still has at least one sounding partial.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, PolyState::Finished)
    }

    /// Note-off arrived. If the sustain pedal is held, the poly moves to
    /// `Held` and its envelopes keep sustaining; otherwise it starts
    /// releasing immediately.
    pub fn note_off(&mut self, sustain_pedal_down: bool) {
        if sustain_pedal_down {
            self.pedal_hold = true;
            self.state = PolyState::Held;
        } else {
            self.state = PolyState::Releasing;
        }
    }

    /// The sustain pedal was released. A poly in `Held` moves to
    /// `Releasing`; any other state is unaffected.
    pub fn pedal_released(&mut self) {
        if self.state == PolyState::Held {
            self.pedal_hold = false;
            self.state = PolyState::Releasing;
        }
    }

    /// All sound off: force this poly to finish immediately regardless of
    /// pedal state, without waiting for envelope release.
    pub fn kill(&mut self) {
        self.state = PolyState::Finished;
    }

    /// Called once per render frame after checking whether every owned
    /// partial has finished; transitions `Releasing -> Finished`.
    pub fn mark_finished_if_all_partials_done(&mut self, all_done: bool) {
        if all_done && self.state != PolyState::Finished {
            self.state = PolyState::Finished;
        }
    }

    /// True while this poly's envelopes should be treated as sustain-held
    /// for the purposes of the TVA/TVF/TVP phase-5 transition.
    pub fn sustain_held(&self) -> bool {
        matches!(self.state, PolyState::Playing) || self.pedal_hold
    }

    /// How many render frames old this poly is, given the current frame.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.born_at)
    }
}
