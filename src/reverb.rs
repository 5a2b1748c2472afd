//! Reverb: four interchangeable models sharing one interface.
//!
//! Each model implements [`ReverbModel`]; the active model and its time/
//! level parameters are controlled only by system-area SysEx writes (see
//! [`crate::sysex`]) or the explicit override path, never directly by the
//! renderer.

/// Which of the four reverb algorithms is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbMode {
    /// Small room, short dense tail.
    Room,
    /// Larger hall, longer tail with more diffusion.
    Hall,
    /// Metallic plate-style reverb.
    Plate,
    /// A single discrete tap delay rather than a diffuse tail.
    TapDelay,
}

/// Shared interface every reverb model implements.
pub trait ReverbModel: Send {
    /// Process `frames` dry stereo samples into `out_l`/`out_r`, replacing
    /// their contents with the wet signal.
    fn process(&mut self, in_l: &[i32], in_r: &[i32], out_l: &mut [i32], out_r: &mut [i32]);

    /// Update the time/level parameters (0..7 each, per the system area's
    /// valid range).
    fn set_parameters(&mut self, time: u8, level: u8);

    /// Clear all internal delay-line state (used on synth reset).
    fn reset(&mut self);
}

const MAX_DELAY_SAMPLES: usize = 32_000 * 3; // up to 3s tail at 32kHz

struct CombFilter {
    buffer: Vec<i32>,
    pos: usize,
    feedback: f32,
}

impl CombFilter {
    fn new(delay_samples: usize, feedback: f32) -> Self {
        Self {
            buffer: vec![0; delay_samples.max(1)],
            pos: 0,
            feedback,
        }
    }

    fn process(&mut self, input: i32) -> i32 {
        let delayed = self.buffer[self.pos];
        let out = delayed;
        self.buffer[self.pos] = input + ((delayed as f32 * self.feedback) as i32);
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }

    fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0);
        self.pos = 0;
    }
}

/// A diffuse, multi-comb-filter reverb shared by Room/Hall/Plate; they
/// differ only in their comb delay lengths and feedback curve, matching
/// the reference's "same interface, different coefficients" design.
struct DiffuseReverb {
    mode: ReverbMode,
    combs_l: Vec<CombFilter>,
    combs_r: Vec<CombFilter>,
    time: u8,
    level: u8,
}

fn base_delays_ms(mode: ReverbMode) -> [f32; 4] {
    match mode {
        ReverbMode::Room => [13.0, 17.0, 19.0, 23.0],
        ReverbMode::Hall => [29.0, 37.0, 41.0, 47.0],
        ReverbMode::Plate => [9.0, 11.0, 14.0, 16.0],
        ReverbMode::TapDelay => [0.0; 4],
    }
}

impl DiffuseReverb {
    fn new(mode: ReverbMode) -> Self {
        let delays = base_delays_ms(mode);
        let make = |stereo_offset_ms: f32| -> Vec<CombFilter> {
            delays
                .iter()
                .map(|ms| {
                    let samples =
                        (((ms + stereo_offset_ms) / 1000.0) * 32_000.0) as usize;
                    CombFilter::new(samples.clamp(1, MAX_DELAY_SAMPLES), 0.6)
                })
                .collect()
        };
        Self {
            mode,
            combs_l: make(0.0),
            combs_r: make(0.7),
            time: 3,
            level: 3,
        }
    }

    fn feedback_for_time(time: u8) -> f32 {
        0.25 + (time.min(7) as f32 / 7.0) * 0.65
    }
}

impl ReverbModel for DiffuseReverb {
    fn process(&mut self, in_l: &[i32], in_r: &[i32], out_l: &mut [i32], out_r: &mut [i32]) {
        let feedback = Self::feedback_for_time(self.time);
        for c in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            c.feedback = feedback;
        }
        let gain = self.level.min(7) as f32 / 7.0;
        let n = in_l.len().min(in_r.len()).min(out_l.len()).min(out_r.len());
        for i in 0..n {
            let mut wet_l = 0i64;
            for c in self.combs_l.iter_mut() {
                wet_l += c.process(in_l[i]) as i64;
            }
            let mut wet_r = 0i64;
            for c in self.combs_r.iter_mut() {
                wet_r += c.process(in_r[i]) as i64;
            }
            let count = self.combs_l.len().max(1) as i64;
            out_l[i] = ((wet_l / count) as f32 * gain) as i32;
            out_r[i] = ((wet_r / count) as f32 * gain) as i32;
        }
    }

    fn set_parameters(&mut self, time: u8, level: u8) {
        self.time = time.min(7);
        self.level = level.min(7);
    }

    fn reset(&mut self) {
        self.combs_l.iter_mut().for_each(CombFilter::reset);
        self.combs_r.iter_mut().for_each(CombFilter::reset);
    }
}

/// A single discrete echo rather than a diffuse tail.
struct TapDelayReverb {
    buffer_l: Vec<i32>,
    buffer_r: Vec<i32>,
    pos: usize,
    time: u8,
    level: u8,
}

impl TapDelayReverb {
    fn new() -> Self {
        let len = MAX_DELAY_SAMPLES / 4;
        Self {
            buffer_l: vec![0; len],
            buffer_r: vec![0; len],
            pos: 0,
            time: 3,
            level: 3,
        }
    }

    fn delay_samples(&self) -> usize {
        let len = self.buffer_l.len();
        let frac = (self.time.min(7) as usize + 1) * len / 8;
        frac.clamp(1, len)
    }
}

impl ReverbModel for TapDelayReverb {
    fn process(&mut self, in_l: &[i32], in_r: &[i32], out_l: &mut [i32], out_r: &mut [i32]) {
        let delay = self.delay_samples();
        let gain = self.level.min(7) as f32 / 7.0;
        let len = self.buffer_l.len();
        let n = in_l.len().min(in_r.len()).min(out_l.len()).min(out_r.len());
        for i in 0..n {
            let tap_pos = (self.pos + len - delay) % len;
            out_l[i] = (self.buffer_l[tap_pos] as f32 * gain) as i32;
            out_r[i] = (self.buffer_r[tap_pos] as f32 * gain) as i32;
            self.buffer_l[self.pos] = in_l[i];
            self.buffer_r[self.pos] = in_r[i];
            self.pos = (self.pos + 1) % len;
        }
    }

    fn set_parameters(&mut self, time: u8, level: u8) {
        self.time = time.min(7);
        self.level = level.min(7);
    }

    fn reset(&mut self) {
        self.buffer_l.iter_mut().for_each(|s| *s = 0);
        self.buffer_r.iter_mut().for_each(|s| *s = 0);
        self.pos = 0;
    }
}

/// Owns the active reverb model and swaps it out when the system area
/// selects a different mode.
pub struct Reverb {
    mode: ReverbMode,
    model: Box<dyn ReverbModel>,
    enabled: bool,
}

impl Reverb {
    /// Construct with the given initial mode.
    pub fn new(mode: ReverbMode) -> Self {
        Self {
            mode,
            model: make_model(mode),
            enabled: true,
        }
    }

    /// Switch to a new model, preserving time/level by re-applying them
    /// via a subsequent [`Self::set_parameters`] call from the caller.
    pub fn set_mode(&mut self, mode: ReverbMode) {
        if mode != self.mode {
            self.mode = mode;
            self.model = make_model(mode);
        }
    }

    /// The currently active mode.
    pub fn mode(&self) -> ReverbMode {
        self.mode
    }

    /// Update time/level.
    pub fn set_parameters(&mut self, time: u8, level: u8) {
        self.model.set_parameters(time, level);
    }

    /// Enable or disable the reverb unit entirely; when disabled,
    /// [`Self::process`] writes silence regardless of input.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Process the dry mix into a wet stereo signal.
    pub fn process(&mut self, in_l: &[i32], in_r: &[i32], out_l: &mut [i32], out_r: &mut [i32]) {
        if !self.enabled {
            out_l.iter_mut().for_each(|s| *s = 0);
            out_r.iter_mut().for_each(|s| *s = 0);
            return;
        }
        self.model.process(in_l, in_r, out_l, out_r);
    }

    /// Clear all delay-line state.
    pub fn reset(&mut self) {
        self.model.reset();
    }
}

fn make_model(mode: ReverbMode) -> Box<dyn ReverbModel> {
    match mode {
        ReverbMode::TapDelay => Box::new(TapDelayReverb::new()),
        other => Box::new(DiffuseReverb::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_converges_to_silence_out() {
        let mut reverb = Reverb::new(ReverbMode::Hall);
        reverb.set_parameters(2, 3);
        let zeros = vec![0i32; 32_000];
        let mut out_l = vec![0i32; 32_000];
        let mut out_r = vec![0i32; 32_000];
        reverb.process(&zeros, &zeros, &mut out_l, &mut out_r);
        let tail_energy: i64 = out_l[31_000..].iter().map(|s| (*s as i64).abs()).sum();
        assert_eq!(tail_energy, 0);
    }

    #[test]
    fn disabled_reverb_is_always_silent() {
        let mut reverb = Reverb::new(ReverbMode::Room);
        reverb.set_enabled(false);
        let input = vec![10_000i32; 100];
        let mut out_l = vec![1i32; 100];
        let mut out_r = vec![1i32; 100];
        reverb.process(&input, &input, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|&s| s == 0));
        assert!(out_r.iter().all(|&s| s == 0));
    }

    #[test]
    fn tap_delay_echoes_the_input_after_its_delay() {
        let mut reverb = Reverb::new(ReverbMode::TapDelay);
        reverb.set_parameters(0, 7);
        let mut input = vec![0i32; 20_000];
        input[0] = 10_000;
        let mut out_l = vec![0i32; 20_000];
        let mut out_r = vec![0i32; 20_000];
        reverb.process(&input, &input, &mut out_l, &mut out_r);
        assert!(out_l.iter().any(|&s| s != 0));
    }

    #[test]
    fn switching_mode_replaces_the_model() {
        let mut reverb = Reverb::new(ReverbMode::Room);
        reverb.set_mode(ReverbMode::Plate);
        assert_eq!(reverb.mode(), ReverbMode::Plate);
    }
}
