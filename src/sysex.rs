//! SysEx decoding: checksum validation, 24-bit address decoding, and
//! transport-independent fragment reassembly.
//!
//! Wire format (§6): `F0 41 dd 16 12 aH aM aL d0…dN cs F7`. This module
//! only concerns itself with the bytes between the leading `F0` and
//! trailing `F7`; reassembly of fragments delivered across separate calls
//! is handled by [`Reassembler`], independent of whatever transport
//! delivered them, per §9's "single state machine, independent of
//! transport" redesign note.

use nom::bytes::complete::{tag, take};
use nom::number::complete::u8 as take_u8;
use nom::IResult;

/// Roland's manufacturer ID byte.
const ROLAND_MANUFACTURER_ID: u8 = 0x41;
/// Model ID byte identifying the MT-32 family.
const MT32_MODEL_ID: u8 = 0x16;
/// "Data set" command byte (the only command this engine accepts).
const DATA_SET_COMMAND: u8 = 0x12;

/// A successfully parsed and checksum-verified data-set message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSet {
    /// The device ID the message was addressed to.
    pub device_id: u8,
    /// Decoded 24-bit absolute address (three bytes concatenated as hex
    /// digit-pairs, matching the documented memory map in [`crate::memory`]).
    pub address: u32,
    /// Payload bytes, between the address and the checksum.
    pub data: Vec<u8>,
}

/// Why a SysEx message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysexError {
    /// The message was too short to contain a header, address and checksum.
    Malformed,
    /// Not addressed to Roland / the MT-32 model ID / the data-set command.
    NotRecognized,
    /// The device ID did not match the accepted range (see [`decode`]).
    DeviceIdMismatch,
    /// The trailing checksum byte did not match the computed value.
    ChecksumInvalid,
}

fn parse_header(input: &[u8]) -> IResult<&[u8], (u8,)> {
    let (input, _) = tag([ROLAND_MANUFACTURER_ID])(input)?;
    let (input, device_id) = take_u8(input)?;
    let (input, _) = tag([MT32_MODEL_ID])(input)?;
    let (input, _) = tag([DATA_SET_COMMAND])(input)?;
    Ok((input, (device_id,)))
}

fn parse_address(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, bytes) = take(3usize)(input)?;
    // Each transmitted byte is one hex digit-pair of the 24-bit address
    // (aH aM aL, as Roland's documented memory map writes it: System Area
    // is "10 00 00" for base address 0x100000), not a packed 7-bit triple.
    let address = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
    Ok((input, address))
}

fn checksum(address_bytes: &[u8], data: &[u8]) -> u8 {
    let sum: u32 = address_bytes.iter().chain(data.iter()).map(|&b| b as u32).sum();
    ((128 - (sum % 128)) % 128) as u8
}

/// Decode a complete SysEx body (the bytes strictly between `F0` and `F7`,
/// both exclusive) into a validated [`DataSet`]. `min_device_id` is the
/// lowest device ID accepted (the spec fixes this at `0x10`); IDs below it
/// are rejected with [`SysexError::DeviceIdMismatch`] and should be dropped
/// silently by the caller, per §6.
pub fn decode(body: &[u8], min_device_id: u8) -> Result<DataSet, SysexError> {
    let (rest, (device_id,)) = parse_header(body).map_err(|_| SysexError::NotRecognized)?;
    if device_id < min_device_id {
        return Err(SysexError::DeviceIdMismatch);
    }
    if rest.len() < 4 {
        // 3 address bytes + at least a checksum byte.
        return Err(SysexError::Malformed);
    }
    let (rest, address) = parse_address(rest).map_err(|_| SysexError::Malformed)?;
    if rest.is_empty() {
        return Err(SysexError::Malformed);
    }
    let (data, checksum_byte) = rest.split_at(rest.len() - 1);
    // Header is manufacturer + device id + model id + command, 4 bytes;
    // the address triple immediately follows it.
    const HEADER_LEN: usize = 4;
    let address_bytes = &body[HEADER_LEN..HEADER_LEN + 3]; // aH, aM, aL as transmitted
    let expected = checksum(address_bytes, data);
    if checksum_byte[0] != expected {
        return Err(SysexError::ChecksumInvalid);
    }
    Ok(DataSet {
        device_id,
        address,
        data: data.to_vec(),
    })
}

/// Reassembly state for SysEx fragments arriving across separate
/// transport reads. A fragment starting with `F0` begins a new message,
/// continuing without a start byte; `F7` terminates it. Per §9's state
/// machine, an `F0` arriving while a message is in progress discards the
/// prior fragment rather than appending to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyState {
    /// No message in progress.
    Idle,
    /// Accumulating bytes of an in-progress message (header/address/data,
    /// not including the leading `F0` or the trailing `F7`).
    InMessage(Vec<u8>),
}

impl Default for ReassemblyState {
    fn default() -> Self {
        ReassemblyState::Idle
    }
}

/// Outcome of feeding one transport chunk to the [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResult {
    /// No complete message yet; still accumulating.
    Pending,
    /// A complete message body (between `F0` and `F7`, exclusive) is ready.
    Complete(Vec<u8>),
    /// A new `F0` arrived while a message was already in progress; the
    /// prior fragment was discarded. The caller should emit a debug event.
    DiscardedPriorFragment,
}

/// Reassembles SysEx fragments independent of how many transport reads
/// they arrived across.
#[derive(Debug, Default)]
pub struct Reassembler {
    state: ReassemblyState,
}

const SYSEX_START: u8 = 0xf0;
const SYSEX_END: u8 = 0xf7;

impl Reassembler {
    /// Construct a fresh reassembler with no message in progress.
    pub fn new() -> Self {
        Self {
            state: ReassemblyState::Idle,
        }
    }

    /// Feed one chunk of bytes as received from the transport. A chunk may
    /// contain a bare `F0`-prefixed start, a continuation with no prefix,
    /// or a complete `F0 … F7` message in one call.
    pub fn feed(&mut self, chunk: &[u8]) -> FeedResult {
        let mut discarded = false;
        for &byte in chunk {
            match byte {
                SYSEX_START => {
                    if matches!(self.state, ReassemblyState::InMessage(_)) {
                        discarded = true;
                    }
                    self.state = ReassemblyState::InMessage(Vec::new());
                }
                SYSEX_END => {
                    if let ReassemblyState::InMessage(buf) = std::mem::take(&mut self.state) {
                        self.state = ReassemblyState::Idle;
                        return FeedResult::Complete(buf);
                    }
                    // F7 with no message in progress: ignore.
                }
                other => {
                    if let ReassemblyState::InMessage(buf) = &mut self.state {
                        buf.push(other);
                    }
                    // Bytes arriving with no message in progress (no F0
                    // ever seen) are not part of any SysEx and are dropped.
                }
            }
        }
        if discarded {
            FeedResult::DiscardedPriorFragment
        } else {
            FeedResult::Pending
        }
    }

    /// True if a message is currently being accumulated.
    pub fn in_progress(&self) -> bool {
        matches!(self.state, ReassemblyState::InMessage(_))
    }
}
