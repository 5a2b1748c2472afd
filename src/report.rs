//! The report channel: structured diagnostic events, not a logging stream.
//!
//! The engine never writes to stdout/stderr or a `log` facade on the audio
//! path. Instead every recoverable condition — a dropped note-on, a bad
//! SysEx checksum, a display write, a reverb parameter change — is emitted
//! as a [`ReportEvent`] to whatever sink the caller installed.

use std::time::Duration;

/// One structured diagnostic event emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    /// The control ROM failed to load or parse.
    ControlRomError(String),
    /// The PCM ROM failed to load or parse.
    PcmRomError(String),
    /// A display-area SysEx write updated the 20-character LCD line.
    LcdMessage(String),
    /// A system-area write changed the active reverb model.
    ReverbModeChanged(u8),
    /// A system-area write changed the reverb time parameter.
    ReverbTimeChanged(u8),
    /// A system-area write changed the reverb level parameter.
    ReverbLevelChanged(u8),
    /// A note-on could not allocate any partials; it was silently dropped.
    PartialPoolExhausted,
    /// A SysEx message's checksum did not match its payload.
    SysexChecksumInvalid,
    /// A SysEx message addressed a location outside the emulated memory map.
    SysexAddressInvalid,
    /// The consumer read from an empty ring buffer; frames were zero-filled.
    RendererUnderrun,
    /// Developer diagnostics, opt-in and otherwise free-form.
    DebugMessage(String),
}

/// A sink that receives [`ReportEvent`]s from the engine.
///
/// Implementations typically forward to a UI, a counter, or a test
/// collector; the engine places no constraint on what happens to an event
/// beyond requiring that `report` not block for long, since it may be
/// called from the render loop.
pub trait ReportHandler: Send {
    /// Receive one event.
    fn report(&mut self, event: ReportEvent);
}

/// A [`ReportHandler`] that discards every event. The default sink for a
/// [`crate::synth::Synth`] that was opened without one installed.
#[derive(Debug, Default)]
pub struct NullReportHandler;

impl ReportHandler for NullReportHandler {
    fn report(&mut self, _event: ReportEvent) {}
}

/// A [`ReportHandler`] that appends every event to an in-memory vector.
/// Useful for tests and for callers that want to drain events on their own
/// schedule rather than react to them inline.
#[derive(Debug, Default)]
pub struct CollectingReportHandler {
    events: Vec<ReportEvent>,
}

impl CollectingReportHandler {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the events collected so far.
    pub fn events(&self) -> &[ReportEvent] {
        &self.events
    }

    /// Drain and return all collected events.
    pub fn drain(&mut self) -> Vec<ReportEvent> {
        std::mem::take(&mut self.events)
    }
}

impl ReportHandler for CollectingReportHandler {
    fn report(&mut self, event: ReportEvent) {
        self.events.push(event);
    }
}

/// Debug-level events repeated within this window of rendered time are
/// coalesced to at most one report, per §7's propagation policy.
pub const DEBUG_COALESCE_WINDOW: Duration = Duration::from_secs(1);

/// Tracks the last time (in rendered sample frames) each debug-class event
/// kind was reported, so identical events within [`DEBUG_COALESCE_WINDOW`]
/// produce at most one report.
#[derive(Debug, Default)]
pub(crate) struct DebugCoalescer {
    last_frame: Option<u64>,
    sample_rate: u32,
}

impl DebugCoalescer {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            last_frame: None,
            sample_rate,
        }
    }

    /// Returns true if an event of this class should be emitted now, and
    /// records that it was.
    pub(crate) fn should_emit(&mut self, current_frame: u64) -> bool {
        let window_frames = self.sample_rate as u64; // 1 second of frames
        match self.last_frame {
            Some(last) if current_frame.saturating_sub(last) < window_frames => false,
            _ => {
                self.last_frame = Some(current_frame);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_handler_records_events() {
        let mut handler = CollectingReportHandler::new();
        handler.report(ReportEvent::LcdMessage("hello".into()));
        handler.report(ReportEvent::PartialPoolExhausted);
        assert_eq!(handler.events().len(), 2);
        let drained = handler.drain();
        assert_eq!(drained.len(), 2);
        assert!(handler.events().is_empty());
    }

    #[test]
    fn null_handler_discards() {
        let mut handler = NullReportHandler;
        handler.report(ReportEvent::DebugMessage("ignored".into()));
    }

    #[test]
    fn coalescer_suppresses_within_window() {
        let mut c = DebugCoalescer::new(32_000);
        assert!(c.should_emit(0));
        assert!(!c.should_emit(1_000));
        assert!(!c.should_emit(31_999));
        assert!(c.should_emit(32_000));
    }
}
