//! The emulated 24-bit address space: a typed view over non-overlapping
//! regions, written to exclusively via [`crate::sysex`].
//!
//! Base addresses match the documented MT-32 memory map so that SysEx
//! dumps captured from real hardware or sequencer software land in the
//! regions a reader would expect.

use crate::constants::{LCD_WIDTH, PART_COUNT};

/// Length, in bytes, of one patch-temp block (one per part).
pub const PATCH_TEMP_BLOCK_LEN: usize = 16;
/// Length, in bytes, of one timbre-temp block (one per melodic part).
pub const TIMBRE_TEMP_BLOCK_LEN: usize = 246;
/// Number of rhythm-key setup entries.
pub const RHYTHM_TEMP_COUNT: usize = 85;
/// Length, in bytes, of one rhythm-temp entry.
pub const RHYTHM_TEMP_ENTRY_LEN: usize = 4;
/// Number of addressable patch memory slots.
pub const PATCH_COUNT: usize = 128;
/// Length, in bytes, of one patch memory entry.
pub const PATCH_LEN: usize = 8;
/// Number of addressable timbre memory slots.
pub const TIMBRE_COUNT: usize = 64;
/// Length, in bytes, of one timbre memory entry.
pub const TIMBRE_LEN: usize = 246;
/// Length, in bytes, of the system area.
pub const SYSTEM_AREA_LEN: usize = 23;

/// Base address of the patch-temp region (9 blocks, one per part).
pub const PATCH_TEMP_BASE: u32 = 0x030000;
/// Base address of the timbre-temp region (8 blocks, one per melodic part).
pub const TIMBRE_TEMP_BASE: u32 = 0x040000;
/// Base address of the addressable patch memory.
pub const PATCH_BASE: u32 = 0x050000;
/// Base address of the addressable timbre memory.
pub const TIMBRE_BASE: u32 = 0x080000;
/// Base address of the system area.
pub const SYSTEM_AREA_BASE: u32 = 0x100000;
/// Base address of the 20-character display.
pub const DISPLAY_BASE: u32 = 0x200000;
/// Address of the write-only reset trigger.
pub const RESET_BASE: u32 = 0x7f0000;

/// One of the emulated address space's non-overlapping regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Master tune, reverb mode/time/level, part-to-channel mapping, master volume.
    SystemArea,
    /// Per-part patch parameters (9 blocks).
    PatchTemp,
    /// Per-melodic-part timbre parameters (8 blocks).
    TimbreTemp,
    /// Rhythm key setup (85 entries).
    RhythmTemp,
    /// Addressable patch memory.
    Patches,
    /// Addressable timbre memory.
    Timbres,
    /// The 20-character LCD line.
    Display,
    /// Write-only reset trigger.
    Reset,
}

struct Span {
    region: Region,
    base: u32,
    len: u32,
}

fn spans() -> [Span; 8] {
    [
        Span {
            region: Region::SystemArea,
            base: SYSTEM_AREA_BASE,
            len: SYSTEM_AREA_LEN as u32,
        },
        Span {
            region: Region::PatchTemp,
            base: PATCH_TEMP_BASE,
            len: (PATCH_TEMP_BLOCK_LEN * PART_COUNT) as u32,
        },
        Span {
            region: Region::TimbreTemp,
            base: TIMBRE_TEMP_BASE,
            len: (TIMBRE_TEMP_BLOCK_LEN * (PART_COUNT - 1)) as u32,
        },
        Span {
            region: Region::RhythmTemp,
            base: PATCH_TEMP_BASE + (PATCH_TEMP_BLOCK_LEN * PART_COUNT) as u32,
            len: (RHYTHM_TEMP_ENTRY_LEN * RHYTHM_TEMP_COUNT) as u32,
        },
        Span {
            region: Region::Patches,
            base: PATCH_BASE,
            len: (PATCH_LEN * PATCH_COUNT) as u32,
        },
        Span {
            region: Region::Timbres,
            base: TIMBRE_BASE,
            len: (TIMBRE_LEN * TIMBRE_COUNT) as u32,
        },
        Span {
            region: Region::Display,
            base: DISPLAY_BASE,
            len: LCD_WIDTH as u32,
        },
        Span {
            region: Region::Reset,
            base: RESET_BASE,
            len: 1,
        },
    ]
}

/// The outcome of a successful [`AddressMap::write`]: which region was
/// touched, at what offset within it, and how many bytes actually landed
/// (a write spanning past the region's end is clipped, never split across
/// regions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// The region the write landed in.
    pub region: Region,
    /// Offset within the region the write started at.
    pub offset: usize,
    /// Number of bytes actually written (may be less than requested if
    /// the write would have overrun the region).
    pub written: usize,
}

/// Typed view over the emulated 24-bit address space.
pub struct AddressMap {
    system_area: Vec<u8>,
    patch_temp: Vec<u8>,
    timbre_temp: Vec<u8>,
    rhythm_temp: Vec<u8>,
    patches: Vec<u8>,
    timbres: Vec<u8>,
    display: Vec<u8>,
    reset_pending: bool,
}

impl AddressMap {
    /// Construct a fresh address space with every region zeroed except the
    /// system area, which takes the documented power-on defaults (parts 1-8
    /// mapped to MIDI channels 1-8, the rhythm part to channel 10, reverb
    /// room/3/3, master volume 100) so routing and mixing work before any
    /// SysEx has been received.
    pub fn new() -> Self {
        let mut system_area = vec![0; SYSTEM_AREA_LEN];
        for part_index in 0..PART_COUNT - 1 {
            system_area[system_area_offsets::PART_TO_CHANNEL + part_index] = part_index as u8;
        }
        system_area[system_area_offsets::PART_TO_CHANNEL + PART_COUNT - 1] = 9;
        system_area[system_area_offsets::REVERB_TIME] = 3;
        system_area[system_area_offsets::REVERB_LEVEL] = 3;
        system_area[system_area_offsets::MASTER_VOLUME] = 100;
        Self {
            system_area,
            patch_temp: vec![0; PATCH_TEMP_BLOCK_LEN * PART_COUNT],
            timbre_temp: vec![0; TIMBRE_TEMP_BLOCK_LEN * (PART_COUNT - 1)],
            rhythm_temp: vec![0; RHYTHM_TEMP_ENTRY_LEN * RHYTHM_TEMP_COUNT],
            patches: vec![0; PATCH_LEN * PATCH_COUNT],
            timbres: vec![0; TIMBRE_LEN * TIMBRE_COUNT],
            display: vec![0; LCD_WIDTH],
            reset_pending: false,
        }
    }

    fn region_storage_mut(&mut self, region: Region) -> &mut Vec<u8> {
        match region {
            Region::SystemArea => &mut self.system_area,
            Region::PatchTemp => &mut self.patch_temp,
            Region::TimbreTemp => &mut self.timbre_temp,
            Region::RhythmTemp => &mut self.rhythm_temp,
            Region::Patches => &mut self.patches,
            Region::Timbres => &mut self.timbres,
            Region::Display => &mut self.display,
            Region::Reset => unreachable!("reset region has no backing storage"),
        }
    }

    fn region_storage(&self, region: Region) -> &[u8] {
        match region {
            Region::SystemArea => &self.system_area,
            Region::PatchTemp => &self.patch_temp,
            Region::TimbreTemp => &self.timbre_temp,
            Region::RhythmTemp => &self.rhythm_temp,
            Region::Patches => &self.patches,
            Region::Timbres => &self.timbres,
            Region::Display => &self.display,
            Region::Reset => &[],
        }
    }

    /// Decode an absolute address into the region it falls within and an
    /// offset inside that region. Returns `None` if the address is outside
    /// every known region.
    pub fn decode(address: u32) -> Option<(Region, usize)> {
        for span in spans() {
            if address >= span.base && address < span.base + span.len {
                return Some((span.region, (address - span.base) as usize));
            }
        }
        None
    }

    /// Write `data` starting at `address`. The write is clipped to the
    /// target region's remaining length; it is never split across region
    /// boundaries. Returns `None` if `address` does not fall within any
    /// region.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Option<WriteReport> {
        let (region, offset) = Self::decode(address)?;
        if region == Region::Reset {
            self.reset_pending = true;
            return Some(WriteReport {
                region,
                offset,
                written: data.len().min(1),
            });
        }
        let storage = self.region_storage_mut(region);
        let available = storage.len().saturating_sub(offset);
        let written = data.len().min(available);
        storage[offset..offset + written].copy_from_slice(&data[..written]);
        Some(WriteReport {
            region,
            offset,
            written,
        })
    }

    /// Read `len` bytes starting at `address`, clipped to the region's
    /// remaining length. Returns `None` if `address` is outside every
    /// region.
    pub fn read(&self, address: u32, len: usize) -> Option<&[u8]> {
        let (region, offset) = Self::decode(address)?;
        let storage = self.region_storage(region);
        let end = (offset + len).min(storage.len());
        storage.get(offset..end)
    }

    /// True if a reset write has been observed since the last
    /// [`Self::take_reset`].
    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Consume the pending reset flag, returning whether one was set.
    pub fn take_reset(&mut self) -> bool {
        std::mem::replace(&mut self.reset_pending, false)
    }

    /// Borrow the system area's raw bytes (master tune, reverb mode/time/
    /// level, part-to-channel mapping, master volume).
    pub fn system_area(&self) -> &[u8] {
        &self.system_area
    }

    /// Borrow the display's current 20-character contents.
    pub fn display(&self) -> &[u8] {
        &self.display
    }

    /// Absolute address of the patch-temp block for `part_index` (0..9).
    pub fn patch_temp_address(part_index: usize) -> u32 {
        PATCH_TEMP_BASE + (part_index * PATCH_TEMP_BLOCK_LEN) as u32
    }

    /// Absolute address of the timbre-temp block for `part_index` (0..8;
    /// the rhythm part has no timbre-temp block of its own).
    pub fn timbre_temp_address(part_index: usize) -> u32 {
        TIMBRE_TEMP_BASE + (part_index * TIMBRE_TEMP_BLOCK_LEN) as u32
    }

    /// Absolute address of patch memory entry `index` (0..128).
    pub fn patch_address(index: usize) -> u32 {
        PATCH_BASE + (index * PATCH_LEN) as u32
    }

    /// Absolute address of timbre memory entry `index` (0..64).
    pub fn timbre_address(index: usize) -> u32 {
        TIMBRE_BASE + (index * TIMBRE_LEN) as u32
    }

    /// Absolute address of rhythm-temp entry `index` (0..85).
    pub fn rhythm_temp_address(index: usize) -> u32 {
        PATCH_TEMP_BASE + (PATCH_TEMP_BLOCK_LEN * PART_COUNT) as u32
            + (index * RHYTHM_TEMP_ENTRY_LEN) as u32
    }
}

impl Default for AddressMap {
    fn default() -> Self {
        Self::new()
    }
}

/// System-area field offsets, per the documented memory map.
pub mod system_area_offsets {
    /// Master tune, 1 byte.
    pub const MASTER_TUNE: usize = 0x00;
    /// Reverb mode, 1 byte.
    pub const REVERB_MODE: usize = 0x01;
    /// Reverb time, 1 byte.
    pub const REVERB_TIME: usize = 0x02;
    /// Reverb level, 1 byte.
    pub const REVERB_LEVEL: usize = 0x03;
    /// Part-to-channel mapping, 9 bytes starting here.
    pub const PART_TO_CHANNEL: usize = 0x04;
    /// Master volume, 1 byte.
    pub const MASTER_VOLUME: usize = 0x0e;
}
