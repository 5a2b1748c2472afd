//! Error types returned synchronously from the public API.
//!
//! Most failure modes in the engine are *recoverable* and never unwind the
//! audio path — those surface as [`crate::report::ReportEvent`]s instead.
//! Only the handful of kinds that genuinely prevent the caller from
//! proceeding (a failed [`crate::synth::Synth::open`], an out-of-range
//! configuration argument) are returned through [`Result`].

/// Errors returned synchronously from the public API.
#[derive(thiserror::Error, Debug)]
pub enum Mt32Error {
    /// The control or PCM ROM could not be read or is structurally invalid.
    #[error("ROM load failed: {0}")]
    RomLoadFailed(String),

    /// The ROM's SHA-1 digest is not in the known (model, version) table.
    #[error("ROM digest not recognized: {0}")]
    RomDigestUnknown(String),

    /// An API call was made before `open` or after `close`.
    #[error("synth is not open")]
    SynthNotOpen,

    /// An API argument fell outside its documented range.
    #[error("configuration value out of range: {0}")]
    ConfigOutOfRange(String),

    /// Generic error, used for string conversions.
    #[error("{0}")]
    Other(String),
}

impl From<String> for Mt32Error {
    /// Converts a String into `Mt32Error::Other`.
    ///
    /// Prefer the specific variant constructors (`RomLoadFailed`,
    /// `ConfigOutOfRange`, ...) when the failure kind is known; this exists
    /// for call sites that only have a formatted message.
    fn from(msg: String) -> Self {
        Mt32Error::Other(msg)
    }
}

impl From<&str> for Mt32Error {
    /// Converts a string slice into `Mt32Error::Other`. See [`From<String>`].
    fn from(msg: &str) -> Self {
        Mt32Error::Other(msg.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Mt32Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_embed_the_detail_string() {
        assert_eq!(
            Mt32Error::RomLoadFailed("truncated".to_string()).to_string(),
            "ROM load failed: truncated"
        );
        assert_eq!(
            Mt32Error::RomDigestUnknown("deadbeef".to_string()).to_string(),
            "ROM digest not recognized: deadbeef"
        );
        assert_eq!(Mt32Error::SynthNotOpen.to_string(), "synth is not open");
        assert_eq!(
            Mt32Error::ConfigOutOfRange("partial_count must be nonzero".to_string()).to_string(),
            "configuration value out of range: partial_count must be nonzero"
        );
    }

    #[test]
    fn string_conversions_land_in_other() {
        let from_owned: Mt32Error = "boom".to_string().into();
        assert!(matches!(from_owned, Mt32Error::Other(ref s) if s == "boom"));
        let from_slice: Mt32Error = "bang".into();
        assert!(matches!(from_slice, Mt32Error::Other(ref s) if s == "bang"));
        assert_eq!(from_slice.to_string(), "bang");
    }

    #[test]
    fn question_mark_operator_converts_a_string_error() {
        fn fails() -> Result<()> {
            Err("missing control ROM path".to_string())?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, Mt32Error::Other(_)));
    }
}
