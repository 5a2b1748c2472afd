//! The Synth façade: owns every part, the partial pool, the reverb unit and
//! both ROM images, and implements §4.7's dispatch/render contract.
//!
//! This is the single entry point an embedder drives: feed it MIDI and
//! SysEx via [`Synth::play_msg`]/[`Synth::play_sysex`] (optionally
//! timestamped against the render-frame clock), then pull audio out with
//! [`Synth::render`]. Everything else in this crate exists to make that
//! contract correct.

use crate::constants::{
    DEFAULT_BEND_RANGE_SEMITONES, DEFAULT_DEVICE_ID, MAX_PARTIALS_PER_POLY, MIDDLE_C_HZ,
    PART_COUNT, RHYTHM_PART_INDEX,
};
use crate::error::{Mt32Error, Result};
use crate::memory::{system_area_offsets, AddressMap, Region, RHYTHM_TEMP_ENTRY_LEN};
use crate::midi::{cc, decode as decode_midi, Rpn, RpnState, ShortMessage};
use crate::partial::{Frame, RingModRole};
use crate::partial_manager::PartialManager;
use crate::part::Part;
use crate::report::{DebugCoalescer, NullReportHandler, ReportEvent, ReportHandler};
use crate::resampler::{AnalogOutputMode, Resampler};
use crate::reverb::{Reverb, ReverbMode};
use crate::rom::{ControlRom, PcmRom};
use crate::sysex;
use crate::timbre::{decode_timbre, Timbre};
use crate::tva::TvaLiveInputs;
use crate::wave::WaveformKind;

/// How the renderer maps a DAC input stage, affecting the overall output
/// character. Names and the default (`Generation2`) follow the reference
/// hardware's documented revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DacInputMode {
    /// Emulates the first-generation boards' slightly bit-reduced DAC.
    Generation1,
    /// Emulates the second-generation boards (the common case).
    Generation2,
    /// Bypasses the emulated DAC stage entirely.
    Pure,
}

enum EventKind {
    Short(u32),
    Sysex(Vec<u8>),
}

struct ScheduledEvent {
    timestamp: u64,
    kind: EventKind,
}

fn reverb_mode_from_byte(byte: u8) -> ReverbMode {
    match byte {
        1 => ReverbMode::Hall,
        2 => ReverbMode::Plate,
        3 => ReverbMode::TapDelay,
        _ => ReverbMode::Room,
    }
}

fn reverb_mode_to_byte(mode: ReverbMode) -> u8 {
    match mode {
        ReverbMode::Room => 0,
        ReverbMode::Hall => 1,
        ReverbMode::Plate => 2,
        ReverbMode::TapDelay => 3,
    }
}

/// One rhythm-key setup entry (§3's "rhythm temp", 4 bytes): which timbre
/// a given key plays in the rhythm part, its output level and pan.
#[derive(Debug, Clone, Copy)]
struct RhythmKeyEntry {
    timbre_number: u8,
    output_level: u8,
    pan: u8,
}

fn decode_rhythm_entry(bytes: &[u8]) -> RhythmKeyEntry {
    RhythmKeyEntry {
        timbre_number: bytes.first().copied().unwrap_or(0),
        output_level: bytes.get(1).copied().unwrap_or(100),
        pan: bytes.get(2).copied().unwrap_or(64),
    }
}

bitflags::bitflags! {
    /// A per-part patch-temp control byte (§3's documented first byte of
    /// each part's patch-temp block): which switches this pass reports on
    /// but does not yet feed back into [`Part`] state (see DESIGN.md).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct PatchTempControl: u8 {
        /// This part's notes pass through the reverb unit.
        const REVERB_SWITCH = 0b0000_0001;
        /// This part plays in poly (not mono) mode.
        const POLY_MODE = 0b0000_0010;
    }
}

/// The MT-32/CM-32L synthesis engine.
pub struct Synth {
    control_rom: Option<ControlRom>,
    pcm_rom: Option<PcmRom>,
    memory: AddressMap,
    parts: Vec<Part>,
    partial_manager: PartialManager,
    reverb: Reverb,
    report: Box<dyn ReportHandler>,
    debug_coalescer: DebugCoalescer,
    rpn_states: Vec<RpnState>,
    timbre_cache: Vec<Timbre>,
    output_gain: f32,
    reverb_output_gain: f32,
    reversed_stereo: bool,
    dac_input_mode: DacInputMode,
    reverb_overridden: bool,
    nice_amp_ramp_enabled: bool,
    midi_delay_mode: bool,
    device_id: u8,
    current_frame: u64,
    scheduled: Vec<ScheduledEvent>,
    sysex_reassembler: sysex::Reassembler,
    is_open: bool,
    resampler: Resampler,
}

impl Synth {
    /// Open the synth: verify and install both ROM images, allocate the
    /// partial pool, and reset every part to its default state.
    ///
    /// Either fully succeeds or returns a detailed error; a failed `open`
    /// leaves the synth unopen and safe to `close`.
    pub fn open(
        control_rom_bytes: Vec<u8>,
        pcm_rom_bytes: Vec<u8>,
        partial_count: usize,
        analog_mode: AnalogOutputMode,
        accept_unknown_rom: bool,
    ) -> Result<Self> {
        if partial_count == 0 {
            return Err(Mt32Error::ConfigOutOfRange(
                "partial_count must be at least 1".into(),
            ));
        }
        let control_rom = ControlRom::load(control_rom_bytes, accept_unknown_rom)?;
        let pcm_rom = PcmRom::load(pcm_rom_bytes, accept_unknown_rom)?;

        let mut synth = Self {
            control_rom: Some(control_rom),
            pcm_rom: Some(pcm_rom),
            memory: AddressMap::new(),
            parts: (0..PART_COUNT).map(Part::new).collect(),
            partial_manager: PartialManager::new(partial_count),
            reverb: Reverb::new(ReverbMode::Room),
            report: Box::new(NullReportHandler),
            debug_coalescer: DebugCoalescer::new(crate::constants::INTERNAL_SAMPLE_RATE),
            rpn_states: vec![RpnState::new(); PART_COUNT],
            timbre_cache: vec![Timbre { name: String::new(), structures: Vec::new() }; PART_COUNT],
            output_gain: 1.0,
            reverb_output_gain: 1.0,
            reversed_stereo: false,
            dac_input_mode: DacInputMode::Generation2,
            reverb_overridden: false,
            nice_amp_ramp_enabled: true,
            midi_delay_mode: false,
            device_id: DEFAULT_DEVICE_ID,
            current_frame: 0,
            scheduled: Vec::new(),
            sysex_reassembler: sysex::Reassembler::new(),
            is_open: true,
            resampler: Resampler::new(analog_mode),
        };
        synth.report.report(ReportEvent::LcdMessage("MT-32".to_string()));
        Ok(synth)
    }

    /// Install a report sink; events emitted before this call (during
    /// `open`) are lost, matching the reference's "sink installed after
    /// construction" convention.
    pub fn set_report_handler(&mut self, handler: Box<dyn ReportHandler>) {
        self.report = handler;
    }

    /// Release all partials and mark the synth closed. Safe to call after
    /// a failed `open` or multiple times in a row.
    pub fn close(&mut self) {
        for part in self.parts.iter_mut() {
            part.all_sound_off(&mut self.partial_manager);
        }
        self.control_rom = None;
        self.pcm_rom = None;
        self.is_open = false;
    }

    fn require_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(Mt32Error::SynthNotOpen)
        }
    }

    /// Queue a packed 32-bit MIDI short message. With no timestamp it is
    /// applied at the earliest available frame; with a timestamp it is
    /// applied exactly when the renderer reaches that frame.
    pub fn play_msg(&mut self, packed: u32, timestamp: Option<u64>) -> Result<()> {
        self.require_open()?;
        self.scheduled.push(ScheduledEvent {
            timestamp: timestamp.unwrap_or(self.current_frame),
            kind: EventKind::Short(packed),
        });
        Ok(())
    }

    /// Queue a raw SysEx byte range (the bytes between `F0` and `F7`,
    /// exclusive). Scheduling semantics match [`Self::play_msg`].
    pub fn play_sysex(&mut self, bytes: &[u8], timestamp: Option<u64>) -> Result<()> {
        self.require_open()?;
        self.scheduled.push(ScheduledEvent {
            timestamp: timestamp.unwrap_or(self.current_frame),
            kind: EventKind::Sysex(bytes.to_vec()),
        });
        Ok(())
    }

    /// Feed a raw transport chunk (which may contain partial SysEx framing,
    /// including the `F0`/`F7` delimiters) through the reassembler, queuing
    /// any message that completes.
    pub fn feed_sysex_transport(&mut self, chunk: &[u8]) -> Result<()> {
        self.require_open()?;
        match self.sysex_reassembler.feed(chunk) {
            sysex::FeedResult::Complete(body) => self.play_sysex(&body, None),
            sysex::FeedResult::DiscardedPriorFragment => {
                self.maybe_report_debug("discarded unterminated SysEx fragment on new F0".into());
                Ok(())
            }
            sysex::FeedResult::Pending => Ok(()),
        }
    }

    fn maybe_report_debug(&mut self, message: String) {
        if self.debug_coalescer.should_emit(self.current_frame) {
            self.report.report(ReportEvent::DebugMessage(message));
        }
    }

    fn part_priorities(&self) -> [f32; PART_COUNT] {
        let mut priorities = [0.5f32; PART_COUNT];
        for (i, p) in self.parts.iter().enumerate() {
            priorities[i] = p.steal_priority;
        }
        priorities
    }

    fn part_for_channel(&self, channel: u8) -> Option<usize> {
        let mapping = &self.memory.system_area()
            [system_area_offsets::PART_TO_CHANNEL..system_area_offsets::PART_TO_CHANNEL + PART_COUNT];
        mapping.iter().position(|&c| c == channel)
    }

    fn master_volume(&self) -> u8 {
        self.memory
            .system_area()
            .get(system_area_offsets::MASTER_VOLUME)
            .copied()
            .unwrap_or(100)
    }

    fn apply_due_events(&mut self) {
        let current = self.current_frame;
        let mut i = 0;
        while i < self.scheduled.len() {
            if self.scheduled[i].timestamp <= current {
                let event = self.scheduled.remove(i);
                match event.kind {
                    EventKind::Short(packed) => self.apply_short(packed),
                    EventKind::Sysex(bytes) => self.apply_sysex(&bytes),
                }
            } else {
                i += 1;
            }
        }
    }

    fn apply_short(&mut self, packed: u32) {
        let Some(msg) = decode_midi(packed) else {
            return;
        };
        match msg {
            ShortMessage::NoteOn { channel, key, velocity } => {
                if velocity == 0 {
                    self.note_off(channel, key);
                } else {
                    self.note_on(channel, key, velocity);
                }
            }
            ShortMessage::NoteOff { channel, key, .. } => self.note_off(channel, key),
            ShortMessage::ControlChange { channel, controller, value } => {
                self.control_change(channel, controller, value)
            }
            ShortMessage::ProgramChange { channel, program } => self.program_change(channel, program),
            ShortMessage::PitchBend { channel, value } => {
                if let Some(idx) = self.part_for_channel(channel) {
                    self.parts[idx].pitch_bend = value;
                }
            }
            ShortMessage::RpnDataEntry { .. } | ShortMessage::Other { .. } => {}
        }
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        let Some(idx) = self.part_for_channel(channel) else {
            return;
        };
        let timbre = self.timbre_cache[idx].clone();
        let structures_needed = timbre.structures.len().min(MAX_PARTIALS_PER_POLY);
        if structures_needed == 0 {
            return;
        }
        let rhythm_level = if idx == RHYTHM_PART_INDEX {
            self.memory
                .read(AddressMap::rhythm_temp_address(key as usize), RHYTHM_TEMP_ENTRY_LEN)
                .map(decode_rhythm_entry)
                .map(|e| e.output_level)
                .unwrap_or(100)
        } else {
            0
        };
        let live = TvaLiveInputs {
            master_volume: self.master_volume(),
            output_level: self.parts[idx].volume,
            rhythm_output_level: rhythm_level,
        };
        let priorities = self.part_priorities();
        let now = self.current_frame;
        let granted = self.parts[idx].note_on(
            key,
            velocity,
            structures_needed,
            &timbre.structures,
            &mut self.partial_manager,
            &live,
            &priorities,
            now,
        );
        if !granted {
            self.report.report(ReportEvent::PartialPoolExhausted);
        }
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        if let Some(idx) = self.part_for_channel(channel) {
            self.parts[idx].note_off(key, &mut self.partial_manager);
        }
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        let Some(idx) = self.part_for_channel(channel) else {
            return;
        };
        match controller {
            cc::SUSTAIN => self.parts[idx].set_sustain_pedal(value >= 64, &mut self.partial_manager),
            cc::EXPRESSION => {
                self.parts[idx].expression = value;
                self.parts[idx].update_expression(&mut self.partial_manager);
            }
            cc::MODULATION => self.parts[idx].modulation = value,
            cc::VOLUME => self.parts[idx].volume = value,
            cc::PAN => {
                self.parts[idx].pan = value;
                self.parts[idx].update_pan(&mut self.partial_manager);
            }
            cc::ALL_NOTES_OFF => self.parts[idx].all_notes_off(&mut self.partial_manager),
            cc::ALL_SOUND_OFF => self.parts[idx].all_sound_off(&mut self.partial_manager),
            cc::RPN_MSB | cc::RPN_LSB => self.rpn_states[idx].select(controller, value),
            cc::DATA_ENTRY_MSB => {
                if let Some(Rpn::BendRange) = self.rpn_states[idx].current() {
                    self.parts[idx].bend_range_semitones = value.min(24);
                }
            }
            _ => {}
        }
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        let Some(idx) = self.part_for_channel(channel) else {
            return;
        };
        self.parts[idx].program = program;
        if idx == RHYTHM_PART_INDEX {
            return; // the rhythm part's timbre is chosen per-key, not per-program
        }
        let address = AddressMap::patch_address(program as usize);
        let timbre_number = self
            .memory
            .read(address, crate::memory::PATCH_LEN)
            .and_then(|b| b.first().copied())
            .unwrap_or(program);
        let timbre_address = AddressMap::timbre_address(timbre_number as usize);
        if let Some(bytes) = self.memory.read(timbre_address, crate::memory::TIMBRE_LEN) {
            self.timbre_cache[idx] = decode_timbre(bytes);
        }
    }

    fn apply_sysex(&mut self, body: &[u8]) {
        let parsed = match sysex::decode(body, self.device_id) {
            Ok(parsed) => parsed,
            Err(sysex::SysexError::ChecksumInvalid) => {
                self.report.report(ReportEvent::SysexChecksumInvalid);
                return;
            }
            Err(sysex::SysexError::DeviceIdMismatch) => return, // silently dropped, per §6
            Err(_) => {
                self.report.report(ReportEvent::SysexAddressInvalid);
                return;
            }
        };
        let Some(report) = self.memory.write(parsed.address, &parsed.data) else {
            self.report.report(ReportEvent::SysexAddressInvalid);
            return;
        };

        match report.region {
            Region::SystemArea => self.on_system_area_write(report.offset, report.written),
            Region::Display => {
                let text = String::from_utf8_lossy(self.memory.display()).trim_end().to_string();
                self.report.report(ReportEvent::LcdMessage(text));
            }
            Region::Reset => {
                if self.memory.take_reset() {
                    self.reset_all();
                }
            }
            Region::TimbreTemp | Region::Timbres | Region::Patches => {
                self.refresh_timbre_caches();
            }
            Region::PatchTemp => self.on_patch_temp_write(report.offset, report.written),
            _ => {}
        }
    }

    fn on_patch_temp_write(&mut self, offset: usize, written: usize) {
        for part_index in 0..PART_COUNT {
            let base = AddressMap::patch_temp_address(part_index) as usize
                - AddressMap::patch_temp_address(0) as usize;
            if (offset..offset + written).contains(&base) {
                let Some(byte) = self.memory.patch_temp().get(base).copied() else {
                    continue;
                };
                let flags = PatchTempControl::from_bits_truncate(byte);
                self.maybe_report_debug(format!(
                    "part {part_index} patch-temp control: reverb={} poly_mode={}",
                    flags.contains(PatchTempControl::REVERB_SWITCH),
                    flags.contains(PatchTempControl::POLY_MODE),
                ));
            }
        }
    }

    fn on_system_area_write(&mut self, offset: usize, written: usize) {
        let touched = offset..offset + written;
        if touched.contains(&system_area_offsets::REVERB_MODE)
            || touched.contains(&system_area_offsets::REVERB_TIME)
            || touched.contains(&system_area_offsets::REVERB_LEVEL)
        {
            let area = self.memory.system_area();
            let mode_byte = area[system_area_offsets::REVERB_MODE];
            let time = area[system_area_offsets::REVERB_TIME];
            let level = area[system_area_offsets::REVERB_LEVEL];
            if !self.reverb_overridden {
                let mode = reverb_mode_from_byte(mode_byte);
                self.reverb.set_mode(mode);
                self.reverb.set_parameters(time, level);
                self.report.report(ReportEvent::ReverbModeChanged(reverb_mode_to_byte(mode)));
                self.report.report(ReportEvent::ReverbTimeChanged(time));
                self.report.report(ReportEvent::ReverbLevelChanged(level));
            }
        }
    }

    fn refresh_timbre_caches(&mut self) {
        for idx in 0..PART_COUNT {
            if idx == RHYTHM_PART_INDEX {
                continue;
            }
            let program = self.parts[idx].program;
            self.program_change_reload(idx, program);
        }
    }

    fn program_change_reload(&mut self, idx: usize, program: u8) {
        let address = AddressMap::patch_address(program as usize);
        let timbre_number = self
            .memory
            .read(address, crate::memory::PATCH_LEN)
            .and_then(|b| b.first().copied())
            .unwrap_or(program);
        let timbre_address = AddressMap::timbre_address(timbre_number as usize);
        if let Some(bytes) = self.memory.read(timbre_address, crate::memory::TIMBRE_LEN) {
            self.timbre_cache[idx] = decode_timbre(bytes);
        }
    }

    fn reset_all(&mut self) {
        for part in self.parts.iter_mut() {
            part.all_sound_off(&mut self.partial_manager);
            part.reset();
        }
        self.reverb.reset();
        self.memory = AddressMap::new();
        for state in self.rpn_states.iter_mut() {
            *state = RpnState::new();
        }
        for cache in self.timbre_cache.iter_mut() {
            *cache = Timbre { name: String::new(), structures: Vec::new() };
        }
        for part in self.parts.iter_mut() {
            part.bend_range_semitones = DEFAULT_BEND_RANGE_SEMITONES;
        }
    }

    fn base_pitch_hz(&self, part_index: usize, key: u8) -> f32 {
        let part = &self.parts[part_index];
        let bend_cents = (part.pitch_bend as i32 - 8192) as f32 / 8192.0
            * part.bend_range_semitones as f32
            * 100.0;
        let key_cents = (key as f32 - 60.0) * 100.0;
        MIDDLE_C_HZ * 2f32.powf((key_cents + bend_cents) / 1200.0)
    }

    /// Render exactly `buf.len()` internal-rate (32 kHz) stereo frames,
    /// consuming due scheduled events before each frame and advancing the
    /// render-frame counter by one per frame, per §4.7's rendering
    /// algorithm.
    pub fn render(&mut self, buf: &mut [Frame]) -> Result<()> {
        self.require_open()?;
        let sample_rate = crate::constants::INTERNAL_SAMPLE_RATE;
        for slot in buf.iter_mut() {
            self.apply_due_events();

            let mut dry_l = 0i32;
            let mut dry_r = 0i32;

            // Walk every active poly's partials in structure order, so a
            // ring-mod slave immediately follows the master whose raw
            // carrier it multiplies, per the timbre's structure layout.
            let entries: Vec<(usize, usize, u8, bool)> = self
                .parts
                .iter()
                .flat_map(|part| {
                    part.polys.iter().flat_map(move |poly| {
                        let sustain_held = poly.sustain_held();
                        poly.partials
                            .iter()
                            .map(move |&pi| (pi, part.index, poly.key, sustain_held))
                    })
                })
                .collect();

            let mut prev_master_raw: Option<i32> = None;
            for (partial_index, part_index, key, sustain_held) in entries {
                let base_hz = self.base_pitch_hz(part_index, key);
                let Some(partial) = self.partial_manager.partial_mut(partial_index) else {
                    continue;
                };
                let role = partial.ring_mod_role();
                let pcm_pair = match partial.waveform_kind() {
                    Some(WaveformKind::Pcm { slot_index }) => self
                        .pcm_rom
                        .as_ref()
                        .and_then(|rom| rom.slot(slot_index).map(|s| (rom, s))),
                    _ => None,
                };
                let ring_input = if role == Some(RingModRole::Slave) {
                    prev_master_raw
                } else {
                    None
                };
                let frame = partial.next_sample(sample_rate, pcm_pair, base_hz, sustain_held, ring_input);
                dry_l += frame.left as i32;
                dry_r += frame.right as i32;
                prev_master_raw = if role == Some(RingModRole::Master) {
                    Some(partial.last_raw_sample())
                } else {
                    None
                };
                if let Some(event) = partial.take_bug_diagnostic() {
                    self.report.report(event);
                }
            }

            // Prune every frame, not just when a partial naturally finished:
            // a stolen partial is reassigned straight to its new owner
            // without ever passing through `reap_finished`, so the poly it
            // was stolen from needs this sweep too.
            self.partial_manager.reap_finished();
            for part in self.parts.iter_mut() {
                part.prune_finished_polys(&self.partial_manager);
            }

            let mut wet_l = [0i32; 1];
            let mut wet_r = [0i32; 1];
            self.reverb.process(&[dry_l], &[dry_r], &mut wet_l, &mut wet_r);

            let mixed_l = dry_l as f32 + wet_l[0] as f32 * self.reverb_output_gain;
            let mixed_r = dry_r as f32 + wet_r[0] as f32 * self.reverb_output_gain;
            let out_l = (mixed_l * self.output_gain) as i32;
            let out_r = (mixed_r * self.output_gain) as i32;

            *slot = if self.reversed_stereo {
                Frame {
                    left: out_r.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                    right: out_l.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                }
            } else {
                Frame {
                    left: out_l.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                    right: out_r.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                }
            };

            self.current_frame += 1;
        }
        Ok(())
    }

    /// Render `frames` internal-rate frames and push the resampled output
    /// (per the configured [`AnalogOutputMode`]) onto `out`.
    pub fn render_resampled(&mut self, frames: usize, out: &mut Vec<Frame>) -> Result<()> {
        let mut scratch = vec![Frame::default(); frames];
        self.render(&mut scratch)?;
        for frame in scratch {
            self.resampler.process_frame(frame, out);
        }
        Ok(())
    }

    /// Current render-frame counter (monotonically non-decreasing).
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Set the linear master output gain applied to the final mix.
    pub fn set_output_gain(&mut self, gain: f32) {
        self.output_gain = gain.max(0.0);
    }

    /// Set the linear gain applied to the reverb's wet signal before mixing.
    pub fn set_reverb_output_gain(&mut self, gain: f32) {
        self.reverb_output_gain = gain.max(0.0);
    }

    /// Swap left/right channels in the final output.
    pub fn set_reversed_stereo(&mut self, reversed: bool) {
        self.reversed_stereo = reversed;
    }

    /// Select the emulated DAC input stage.
    pub fn set_dac_input_mode(&mut self, mode: DacInputMode) {
        self.dac_input_mode = mode;
    }

    /// The currently selected DAC input stage.
    pub fn dac_input_mode(&self) -> DacInputMode {
        self.dac_input_mode
    }

    /// When set, system-area reverb writes no longer change the active
    /// reverb model/parameters; callers configure reverb entirely through
    /// [`Self::set_reverb_mode`]-style direct calls instead.
    pub fn set_reverb_overridden(&mut self, overridden: bool) {
        self.reverb_overridden = overridden;
    }

    /// Enable or disable the reverb unit outright.
    pub fn set_reverb_enabled(&mut self, enabled: bool) {
        self.reverb.set_enabled(enabled);
    }

    /// Toggle whether timestamped MIDI is applied exactly at its scheduled
    /// frame (`false`, the default) or deferred to the next checkpoint
    /// boundary (`true`), matching the reference's delay-compensation mode.
    pub fn set_midi_delay_mode(&mut self, enabled: bool) {
        self.midi_delay_mode = enabled;
    }

    /// Whether timestamped MIDI is deferred to the next checkpoint boundary.
    pub fn midi_delay_mode(&self) -> bool {
        self.midi_delay_mode
    }

    /// Enable or disable smoothing of TVA amplitude steps across frames.
    pub fn set_nice_amp_ramp_enabled(&mut self, enabled: bool) {
        self.nice_amp_ramp_enabled = enabled;
    }

    /// Whether TVA amplitude-step smoothing is enabled.
    pub fn nice_amp_ramp_enabled(&self) -> bool {
        self.nice_amp_ramp_enabled
    }

    /// True if the synth is currently open.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Read-only access to the emulated address space, e.g. for a test
    /// asserting that a SysEx write landed where expected.
    pub fn memory(&self) -> &AddressMap {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{system_area_offsets, TIMBRE_LEN};
    use crate::midi::{cc, encode};
    use std::sync::Arc;

    fn peak_abs(frames: &[Frame]) -> i32 {
        frames
            .iter()
            .map(|f| f.left.unsigned_abs().max(f.right.unsigned_abs()) as i32)
            .max()
            .unwrap_or(0)
    }

    fn control_rom_bytes() -> Vec<u8> {
        vec![0xaa; 64]
    }

    fn pcm_rom_bytes() -> Vec<u8> {
        vec![0u8, 0u8] // slot_count = 0, no sample data
    }

    fn open_synth(partial_count: usize) -> Synth {
        Synth::open(
            control_rom_bytes(),
            pcm_rom_bytes(),
            partial_count,
            AnalogOutputMode::DigitalOnly,
            true,
        )
        .unwrap()
    }

    fn sysex_checksum(address: u32, data: &[u8]) -> u8 {
        let sum: u32 = (address >> 16 & 0xff) + (address >> 8 & 0xff) + (address & 0xff)
            + data.iter().map(|&b| b as u32).sum::<u32>();
        ((128 - (sum % 128)) % 128) as u8
    }

    fn sysex_body(device_id: u8, address: u32, data: &[u8]) -> Vec<u8> {
        let mut body = vec![
            0x41,
            device_id,
            0x16,
            0x12,
            ((address >> 16) & 0xff) as u8,
            ((address >> 8) & 0xff) as u8,
            (address & 0xff) as u8,
        ];
        body.extend_from_slice(data);
        body.push(sysex_checksum(address, data));
        body
    }

    /// One loud, fast-attacking, wide-open synthesized partial structure, 45
    /// bytes, matching [`crate::timbre::decode_structure`]'s byte layout.
    fn encode_structure() -> Vec<u8> {
        let mut out = Vec::with_capacity(45);
        out.push(1); // enabled
        out.push(0); // synthesized waveform
        out.push(0); // pcm slot, unused
        out.push(0); // pan bias
        out.push(0); // ring mod: none
        out.extend_from_slice(&[120u8, 100, 60, 0]); // tva level
        out.extend_from_slice(&[1u8, 5, 5, 5, 10]); // tva time
        out.push(0); // tva time keyfollow
        out.push(20); // partial level
        out.push(0x40 | 60); // bias point 1: pivot at key 60, no effect there
        out.push(0); // bias level 1
        out.push(0x40 | 60); // bias point 2
        out.push(0); // bias level 2
        out.push(0); // velo follow
        out.extend_from_slice(&[100u8, 80, 50, 0]); // tvf level
        out.extend_from_slice(&[1u8, 5, 5, 5, 10]); // tvf time
        out.push(0); // tvf time keyfollow
        out.push(255); // base cutoff, wide open
        out.push(0); // cutoff keyfollow
        out.push(100); // level mult
        out.extend_from_slice(&[0u8, 0, 0, 0]); // tvp level
        out.extend_from_slice(&[1u8, 1, 1, 1, 1]); // tvp time
        out.push(0); // tvp time keyfollow
        out.push(0); // pitch keyfollow
        assert_eq!(out.len(), 45);
        out
    }

    /// A full 246-byte timbre block with `structure_count` identical,
    /// audible structures.
    fn encode_timbre(name: &str, structure_count: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; TIMBRE_LEN];
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(10);
        bytes[..n].copy_from_slice(&name_bytes[..n]);
        bytes[10] = structure_count;
        for i in 0..structure_count as usize {
            let start = 12 + i * 45;
            bytes[start..start + 45].copy_from_slice(&encode_structure());
        }
        bytes
    }

    /// Writes a `structure_count`-structure timbre into timbre slot 0 and
    /// applies it; part 0's default program (0) resolves to timbre 0 via
    /// the all-zero patch memory, so every melodic part's cache picks it up.
    fn load_timbre(synth: &mut Synth, structure_count: u8) {
        let body = sysex_body(
            DEFAULT_DEVICE_ID,
            AddressMap::timbre_address(0),
            &encode_timbre("Test", structure_count),
        );
        synth.play_sysex(&body, Some(0)).unwrap();
        let mut buf = vec![Frame::default(); 1];
        synth.render(&mut buf).unwrap();
    }

    struct RecordingHandler(Arc<parking_lot::Mutex<Vec<ReportEvent>>>);

    impl ReportHandler for RecordingHandler {
        fn report(&mut self, event: ReportEvent) {
            self.0.lock().push(event);
        }
    }

    fn install_recorder(synth: &mut Synth) -> Arc<parking_lot::Mutex<Vec<ReportEvent>>> {
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        synth.set_report_handler(Box::new(RecordingHandler(Arc::clone(&events))));
        events
    }

    #[test]
    fn open_rejects_zero_partial_count() {
        let err = Synth::open(
            control_rom_bytes(),
            pcm_rom_bytes(),
            0,
            AnalogOutputMode::DigitalOnly,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Mt32Error::ConfigOutOfRange(_)));
    }

    #[test]
    fn open_succeeds_with_power_on_defaults() {
        let synth = open_synth(8);
        assert!(synth.is_open());
        assert_eq!(
            synth.memory().system_area()[system_area_offsets::MASTER_VOLUME],
            100
        );
    }

    #[test]
    fn close_marks_synth_closed_and_blocks_further_calls() {
        let mut synth = open_synth(8);
        synth.close();
        assert!(!synth.is_open());
        assert!(matches!(synth.play_msg(0, None), Err(Mt32Error::SynthNotOpen)));
    }

    #[test]
    fn render_with_no_events_is_silent_and_advances_frame_counter() {
        let mut synth = open_synth(8);
        let mut buf = vec![Frame::default(); 256];
        synth.render(&mut buf).unwrap();
        assert_eq!(synth.current_frame(), 256);
        assert!(buf.iter().all(|f| f.left == 0 && f.right == 0));
    }

    #[test]
    fn note_on_without_loaded_timbre_is_silently_dropped() {
        let mut synth = open_synth(8);
        let events = install_recorder(&mut synth);
        synth.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf = vec![Frame::default(); 64];
        synth.render(&mut buf).unwrap();
        assert!(buf.iter().all(|f| f.left == 0 && f.right == 0));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn note_on_with_loaded_timbre_produces_audible_output() {
        let mut synth = open_synth(8);
        load_timbre(&mut synth, 1);
        synth.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf = vec![Frame::default(); 512];
        synth.render(&mut buf).unwrap();
        assert!(buf.iter().any(|f| f.left != 0 || f.right != 0));
    }

    #[test]
    fn note_on_then_note_off_eventually_frees_all_partials() {
        let mut synth = open_synth(8);
        load_timbre(&mut synth, 1);
        synth.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf = vec![Frame::default(); 64];
        synth.render(&mut buf).unwrap();
        synth.play_msg(encode(0x80, 60, 0), None).unwrap();
        // Render long enough for the release phase to finish and the
        // partial manager to reap it.
        for _ in 0..200 {
            synth.render(&mut buf).unwrap();
        }
        assert_eq!(synth.partial_manager.free_count(), 8);
    }

    #[test]
    fn partial_pool_exhaustion_reports_event() {
        let mut synth = open_synth(1);
        load_timbre(&mut synth, 2); // needs 2 partials, only 1 exists
        let events = install_recorder(&mut synth);
        synth.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf = vec![Frame::default(); 8];
        synth.render(&mut buf).unwrap();
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, ReportEvent::PartialPoolExhausted)));
    }

    #[test]
    fn sysex_checksum_invalid_reports_event() {
        let mut synth = open_synth(8);
        let events = install_recorder(&mut synth);
        let mut body = sysex_body(DEFAULT_DEVICE_ID, AddressMap::timbre_address(0), &[1, 2, 3]);
        *body.last_mut().unwrap() ^= 0xff;
        synth.play_sysex(&body, None).unwrap();
        let mut buf = vec![Frame::default(); 4];
        synth.render(&mut buf).unwrap();
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, ReportEvent::SysexChecksumInvalid)));
    }

    #[test]
    fn sysex_device_id_mismatch_is_silently_dropped() {
        let mut synth = open_synth(8);
        let events = install_recorder(&mut synth);
        let body = sysex_body(0x05, AddressMap::timbre_address(0), &[1]);
        synth.play_sysex(&body, None).unwrap();
        let mut buf = vec![Frame::default(); 4];
        synth.render(&mut buf).unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn reverb_sysex_write_changes_mode_time_level_and_reports_events() {
        let mut synth = open_synth(8);
        let events = install_recorder(&mut synth);
        let data = [2u8, 5, 3]; // mode=Plate, time=5, level=3
        let body = sysex_body(
            DEFAULT_DEVICE_ID,
            SYSTEM_AREA_ADDRESS + system_area_offsets::REVERB_MODE as u32,
            &data,
        );
        synth.play_sysex(&body, None).unwrap();
        let mut buf = vec![Frame::default(); 4];
        synth.render(&mut buf).unwrap();
        let recorded = events.lock();
        assert!(recorded.contains(&ReportEvent::ReverbModeChanged(2)));
        assert!(recorded.contains(&ReportEvent::ReverbTimeChanged(5)));
        assert!(recorded.contains(&ReportEvent::ReverbLevelChanged(3)));
        assert_eq!(synth.reverb.mode(), ReverbMode::Plate);
    }

    #[test]
    fn reverb_overridden_suppresses_automatic_parameter_changes() {
        let mut synth = open_synth(8);
        synth.set_reverb_overridden(true);
        let events = install_recorder(&mut synth);
        let data = [1u8, 2, 2]; // mode=Hall
        let body = sysex_body(
            DEFAULT_DEVICE_ID,
            SYSTEM_AREA_ADDRESS + system_area_offsets::REVERB_MODE as u32,
            &data,
        );
        synth.play_sysex(&body, None).unwrap();
        let mut buf = vec![Frame::default(); 4];
        synth.render(&mut buf).unwrap();
        assert!(events.lock().is_empty());
        assert_eq!(synth.reverb.mode(), ReverbMode::Room);
    }

    #[test]
    fn display_sysex_write_reports_lcd_message() {
        let mut synth = open_synth(8);
        let events = install_recorder(&mut synth);
        let body = sysex_body(DEFAULT_DEVICE_ID, crate::memory::DISPLAY_BASE, b"hi");
        synth.play_sysex(&body, None).unwrap();
        let mut buf = vec![Frame::default(); 4];
        synth.render(&mut buf).unwrap();
        let recorded = events.lock();
        assert!(recorded
            .iter()
            .any(|e| matches!(e, ReportEvent::LcdMessage(text) if text.starts_with("hi"))));
    }

    #[test]
    fn reset_sysex_write_clears_parts_and_memory() {
        let mut synth = open_synth(8);
        load_timbre(&mut synth, 1);
        synth.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf = vec![Frame::default(); 4];
        synth.render(&mut buf).unwrap();
        assert_ne!(synth.partial_manager.free_count(), 8);

        let body = sysex_body(DEFAULT_DEVICE_ID, crate::memory::RESET_BASE, &[0x01]);
        synth.play_sysex(&body, None).unwrap();
        synth.render(&mut buf).unwrap();

        assert_eq!(synth.partial_manager.free_count(), 8);
        assert_eq!(
            synth.memory().system_area()[system_area_offsets::MASTER_VOLUME],
            100
        );
    }

    #[test]
    fn reversed_stereo_swaps_left_and_right_channels() {
        let mut synth_a = open_synth(8);
        load_timbre(&mut synth_a, 1);
        synth_a.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf_a = vec![Frame::default(); 64];
        synth_a.render(&mut buf_a).unwrap();

        let mut synth_b = open_synth(8);
        synth_b.set_reversed_stereo(true);
        load_timbre(&mut synth_b, 1);
        synth_b.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf_b = vec![Frame::default(); 64];
        synth_b.render(&mut buf_b).unwrap();

        for (a, b) in buf_a.iter().zip(buf_b.iter()) {
            assert_eq!(a.left, b.right);
            assert_eq!(a.right, b.left);
        }
    }

    #[test]
    fn output_gain_scales_the_final_mix_toward_silence() {
        let mut synth = open_synth(8);
        load_timbre(&mut synth, 1);
        synth.set_output_gain(0.0);
        synth.play_msg(encode(0x90, 60, 100), None).unwrap();
        let mut buf = vec![Frame::default(); 256];
        synth.render(&mut buf).unwrap();
        assert!(buf.iter().all(|f| f.left == 0 && f.right == 0));
    }

    #[test]
    fn small_scale_partial_stealing_reclaims_the_oldest_partial() {
        let mut synth = open_synth(2);
        load_timbre(&mut synth, 1);
        for (i, key) in [60u8, 64, 67].iter().enumerate() {
            synth.play_msg(encode(0x90, *key, 100), Some(i as u64)).unwrap();
            let mut buf = vec![Frame::default(); 1];
            synth.render(&mut buf).unwrap();
        }
        // Pool holds 2 partials; three single-partial note-ons were granted
        // by stealing, so at most 2 polys remain live across the 8 parts.
        let live_polys: usize = synth.parts.iter().map(|p| p.polys.len()).sum();
        assert!(live_polys <= 2);
    }

    #[test]
    fn expression_cc_retargets_an_already_sounding_partial_immediately() {
        let mut synth = open_synth(8);
        load_timbre(&mut synth, 1);
        synth.play_msg(encode(0x90, 60, 100), None).unwrap();

        let mut warmup = vec![Frame::default(); 500];
        synth.render(&mut warmup).unwrap();
        let loud = peak_abs(&warmup[400..500]);

        // Expression pedal down to zero, with the note still held: the
        // already-sounding partial should quiet down on the very next
        // frames, not just on its next note-on.
        synth.play_msg(encode(0xb0, cc::EXPRESSION, 0), None).unwrap();

        let mut after = vec![Frame::default(); 100];
        synth.render(&mut after).unwrap();
        let quiet = peak_abs(&after);

        assert!(
            quiet < loud,
            "expected a quieter peak after CC11=0, got {quiet} vs {loud}"
        );
    }

    const SYSTEM_AREA_ADDRESS: u32 = crate::memory::SYSTEM_AREA_BASE;
}
