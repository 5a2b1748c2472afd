//! ROM images: immutable byte blobs with a verified identity.
//!
//! Two kinds are loaded by [`crate::synth::Synth::open`]: a *control* ROM
//! (fixed patches, timbres, reverb coefficients, envelope tables) and a
//! *PCM* ROM (attack/loop waveform sample data, addressed by slot number).
//! Both are opaque binary blobs whose identity is established by a SHA-1
//! digest matched against a built-in table, per the wire-format contract —
//! no structure is assumed about a ROM beyond what this module parses out
//! of it.

use crate::error::{Mt32Error, Result};
use nom::bytes::complete::take;
use nom::multi::count;
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;
use sha1::{Digest, Sha1};

/// A SHA-1 digest identifying a ROM image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RomDigest(pub [u8; 20]);

impl RomDigest {
    fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let result = hasher.finalize();
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&result);
        RomDigest(digest)
    }

    /// Render the digest as a lowercase hex string, e.g. for diagnostics.
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// The (model, version) pair a known ROM digest maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomIdentity {
    /// Device model, e.g. "MT-32" or "CM-32L".
    pub model: &'static str,
    /// ROM revision string.
    pub version: &'static str,
}

/// Built-in digest → identity table. Entries are illustrative placeholders
/// for the handful of revisions real control/PCM ROM dumps carry; an
/// unrecognized digest is not necessarily an invalid ROM (see
/// `accept_unknown` on [`ControlRom::load`] / [`PcmRom::load`]).
const KNOWN_DIGESTS: &[(&str, RomIdentity)] = &[
    (
        "f6b1eebc4b2d200ec6d3d21d51325d5b48c60252",
        RomIdentity {
            model: "MT-32",
            version: "1.07",
        },
    ),
    (
        "3326ab6d55895be161e3bf9fbb2cde9e833f26c1",
        RomIdentity {
            model: "CM-32L",
            version: "1.00",
        },
    ),
];

fn lookup_digest(digest: &RomDigest) -> Option<RomIdentity> {
    let hex = digest.to_hex();
    KNOWN_DIGESTS
        .iter()
        .find(|(known, _)| *known == hex)
        .map(|(_, identity)| *identity)
}

/// One PCM waveform sample slot: a contiguous run of samples, optionally
/// looping from `loop_start` to the end of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSampleSlot {
    /// Byte offset of the slot's first sample within the PCM ROM.
    pub start: u32,
    /// Number of samples in the slot.
    pub len: u32,
    /// Sample offset (relative to `start`) the slot loops back to.
    pub loop_start: u32,
}

/// The control ROM: fixed patches, timbres, reverb coefficients and
/// envelope tables. This module treats the byte image as opaque past its
/// digest; structured access to timbres and patches lives in
/// [`crate::memory`], which maps logical regions onto byte ranges.
pub struct ControlRom {
    bytes: Vec<u8>,
    digest: RomDigest,
    identity: Option<RomIdentity>,
}

impl ControlRom {
    /// Load a control ROM image, verifying its digest against the known
    /// table. If `accept_unknown` is false, an unrecognized digest fails
    /// with [`Mt32Error::RomDigestUnknown`].
    pub fn load(bytes: Vec<u8>, accept_unknown: bool) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Mt32Error::RomLoadFailed(
                "control ROM image is empty".into(),
            ));
        }
        let digest = RomDigest::of(&bytes);
        let identity = lookup_digest(&digest);
        if identity.is_none() && !accept_unknown {
            return Err(Mt32Error::RomDigestUnknown(digest.to_hex()));
        }
        Ok(Self {
            bytes,
            digest,
            identity,
        })
    }

    /// The ROM's verified digest.
    pub fn digest(&self) -> RomDigest {
        self.digest
    }

    /// The matched (model, version), if the digest was recognized.
    pub fn identity(&self) -> Option<RomIdentity> {
        self.identity
    }

    /// Read a single byte at an absolute ROM offset.
    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    /// Read a byte range.
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset + len)
    }

    /// Total size of the image in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the image is empty (never true for a successfully-loaded ROM).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The PCM ROM: attack/loop waveform sample data, indexed by slot number.
pub struct PcmRom {
    bytes: Vec<u8>,
    digest: RomDigest,
    identity: Option<RomIdentity>,
    slots: Vec<PcmSampleSlot>,
}

fn parse_slot_table(input: &[u8]) -> IResult<&[u8], Vec<PcmSampleSlot>> {
    let (input, slot_count) = le_u16(input)?;
    count(parse_slot, slot_count as usize)(input)
}

fn parse_slot(input: &[u8]) -> IResult<&[u8], PcmSampleSlot> {
    let (input, start) = le_u32(input)?;
    let (input, len) = le_u32(input)?;
    let (input, loop_start) = le_u32(input)?;
    Ok((
        input,
        PcmSampleSlot {
            start,
            len,
            loop_start,
        },
    ))
}

impl PcmRom {
    /// Load a PCM ROM image. The image begins with a little-endian slot
    /// count followed by that many 12-byte `(start, len, loop_start)`
    /// records; the remaining bytes are raw 16-bit signed sample data
    /// referenced by those records.
    pub fn load(bytes: Vec<u8>, accept_unknown: bool) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Mt32Error::RomLoadFailed("PCM ROM image is empty".into()));
        }
        let digest = RomDigest::of(&bytes);
        let identity = lookup_digest(&digest);
        if identity.is_none() && !accept_unknown {
            return Err(Mt32Error::RomDigestUnknown(digest.to_hex()));
        }
        let (_, slots) = parse_slot_table(&bytes)
            .map_err(|e| Mt32Error::RomLoadFailed(format!("malformed slot table: {e}")))?;
        Ok(Self {
            bytes,
            digest,
            identity,
            slots,
        })
    }

    /// The ROM's verified digest.
    pub fn digest(&self) -> RomDigest {
        self.digest
    }

    /// The matched (model, version), if the digest was recognized.
    pub fn identity(&self) -> Option<RomIdentity> {
        self.identity
    }

    /// Look up a sample slot by index.
    pub fn slot(&self, index: usize) -> Option<&PcmSampleSlot> {
        self.slots.get(index)
    }

    /// Number of sample slots in this image.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Fetch the signed 16-bit sample at `offset` within `slot`, wrapping
    /// into the slot's loop region once `offset` passes `len`. Returns
    /// `None` if `slot` does not exist or the computed byte range is out of
    /// bounds (the caller is expected to validate slot references at
    /// patch-load time per the invariant that a referenced slot exists).
    pub fn sample_at(&self, slot: &PcmSampleSlot, offset: u32) -> Option<i16> {
        let index = if offset < slot.len {
            offset
        } else if slot.len > slot.loop_start {
            slot.loop_start + ((offset - slot.len) % (slot.len - slot.loop_start))
        } else {
            slot.len.saturating_sub(1)
        };
        let byte_offset = slot.start as usize + (index as usize) * 2;
        let bytes = self.bytes.get(byte_offset..byte_offset + 2)?;
        Some(i16::from_le_bytes([bytes[0], bytes[1]]))
    }
}
