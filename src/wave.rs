//! Wave generator: produces one partial's raw waveform samples.
//!
//! Two waveform kinds, selected per partial structure: a synthesized
//! sawtooth-family oscillator driven purely by the phase accumulator, or
//! a PCM sample lookup into a [`crate::rom::PcmRom`] slot. Both are
//! filtered by a simple one-pole low-pass whose cutoff tracks the owning
//! [`crate::tvf::Tvf`] output.

use crate::rom::{PcmRom, PcmSampleSlot};

/// Which kind of waveform a partial structure selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformKind {
    /// Synthesized sawtooth-family oscillator.
    Synthesized,
    /// Looked up from a PCM ROM sample slot.
    Pcm {
        /// Index into the PCM ROM's slot table.
        slot_index: usize,
    },
}

/// Fixed-point phase accumulator resolution: 16 fractional bits.
const PHASE_FRAC_BITS: u32 = 16;

/// Produces one partial's raw (pre-TVF, pre-TVA) waveform samples.
pub struct WaveGenerator {
    kind: WaveformKind,
    phase_accumulator: u32,
    lowpass_state: i32,
    pcm_cursor: u32,
}

impl WaveGenerator {
    /// Construct a wave generator for the given waveform kind.
    pub fn new(kind: WaveformKind) -> Self {
        Self {
            kind,
            phase_accumulator: 0,
            lowpass_state: 0,
            pcm_cursor: 0,
        }
    }

    /// Reset the oscillator/cursor state for a new note.
    pub fn reset(&mut self) {
        self.phase_accumulator = 0;
        self.lowpass_state = 0;
        self.pcm_cursor = 0;
    }

    fn phase_increment(pitch_hz: f32, sample_rate: u32) -> u32 {
        let ratio = pitch_hz / sample_rate as f32;
        (ratio * (1u64 << PHASE_FRAC_BITS) as f32).max(0.0) as u32
    }

    fn raw_sample(&mut self, pcm_rom: Option<(&PcmRom, &PcmSampleSlot)>) -> i32 {
        match (&self.kind, pcm_rom) {
            (WaveformKind::Synthesized, _) => {
                // Band-limited-ish sawtooth via a normalized phase ramp.
                let normalized = self.phase_accumulator >> PHASE_FRAC_BITS.min(16);
                let frac = (normalized & 0xffff) as i32;
                (frac - 0x8000) / 2
            }
            (WaveformKind::Pcm { .. }, Some((rom, slot))) => {
                let offset = self.pcm_cursor >> PHASE_FRAC_BITS;
                self.pcm_cursor = self.pcm_cursor.wrapping_add(1 << (PHASE_FRAC_BITS - 8));
                rom.sample_at(slot, offset).unwrap_or(0) as i32
            }
            (WaveformKind::Pcm { .. }, None) => 0,
        }
    }

    /// Produce one sample, advancing the phase accumulator by the pitch
    /// for this sample and applying a one-pole low-pass at `cutoff`
    /// (0..255, from TVF).
    pub fn next_sample(
        &mut self,
        pitch_hz: f32,
        sample_rate: u32,
        cutoff: i32,
        pcm_rom: Option<(&PcmRom, &PcmSampleSlot)>,
    ) -> i32 {
        self.phase_accumulator = self
            .phase_accumulator
            .wrapping_add(Self::phase_increment(pitch_hz, sample_rate));
        let raw = self.raw_sample(pcm_rom);
        let alpha = cutoff.clamp(1, 255);
        self.lowpass_state += ((raw - self.lowpass_state) * alpha) >> 8;
        self.lowpass_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_waveform_stays_in_signed_16bit_range() {
        let mut gen = WaveGenerator::new(WaveformKind::Synthesized);
        for _ in 0..1000 {
            let s = gen.next_sample(440.0, 32_000, 255, None);
            assert!((-32768..=32767).contains(&s));
        }
    }

    #[test]
    fn higher_cutoff_tracks_raw_signal_more_closely() {
        let mut tight = WaveGenerator::new(WaveformKind::Synthesized);
        let mut loose = WaveGenerator::new(WaveformKind::Synthesized);
        let mut tight_total = 0i64;
        let mut loose_total = 0i64;
        for _ in 0..200 {
            tight_total += tight.next_sample(440.0, 32_000, 255, None) as i64;
            loose_total += loose.next_sample(440.0, 32_000, 4, None) as i64;
        }
        assert_ne!(tight_total, loose_total);
    }

    #[test]
    fn pcm_waveform_reads_through_rom_slot() {
        let slot = PcmSampleSlot {
            start: 0,
            len: 4,
            loop_start: 0,
        };
        let bytes: Vec<u8> = [100i16, 200, 300, 400]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        // Build a minimal PcmRom-compatible byte buffer via the public
        // loader so this test stays honest about the on-disk format.
        let mut rom_bytes = Vec::new();
        rom_bytes.extend_from_slice(&1u16.to_le_bytes());
        rom_bytes.extend_from_slice(&14u32.to_le_bytes());
        rom_bytes.extend_from_slice(&4u32.to_le_bytes());
        rom_bytes.extend_from_slice(&0u32.to_le_bytes());
        rom_bytes.extend_from_slice(&bytes);
        let rom = PcmRom::load(rom_bytes, true).unwrap();
        let rom_slot = rom.slot(0).unwrap();
        let mut gen = WaveGenerator::new(WaveformKind::Pcm { slot_index: 0 });
        let s = gen.next_sample(440.0, 32_000, 255, Some((&rom, rom_slot)));
        assert!(s != i32::MIN);
        let _ = slot;
    }
}
