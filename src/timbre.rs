//! Timbre decoding: turns a raw 246-byte timbre-temp/timbre-bank block into
//! up to four [`crate::partial::PatchCache`] entries, one per partial
//! structure.
//!
//! spec.md describes the timbre byte layout only abstractly ("parameters
//! for up to four partial structures, plus ring-mod layout"); the retained
//! `original_source/` files don't carry `Timbre.h`, so the exact field
//! offsets below are this pass's own byte map rather than a hardware-exact
//! one. It follows the documented shape (a short name, a partial-structure
//! count, then one fixed-size block per structure holding TVA/TVF/TVP plus
//! waveform/pan/ring-mod selectors) and leaves room in the 246-byte block
//! for fields this pass doesn't model (see DESIGN.md).

use crate::partial::{shape_from_raw, PatchCache, RingModRole};
use crate::tva::TvaParams;
use crate::tvf::TvfParams;
use crate::tvp::TvpParams;
use crate::wave::WaveformKind;

/// Length of the timbre name field, in bytes.
pub const TIMBRE_NAME_LEN: usize = 10;
const HEADER_LEN: usize = TIMBRE_NAME_LEN + 2; // name + partial_count + reserved
const STRUCTURE_LEN: usize = 45;

/// Maximum number of partial structures a timbre can define.
pub const MAX_STRUCTURES: usize = 4;

/// One decoded timbre: a display name and up to four partial structures.
#[derive(Debug, Clone)]
pub struct Timbre {
    /// The timbre's 10-character name, trimmed of trailing NULs.
    pub name: String,
    /// Decoded partial-structure patch caches, in structure order. Only
    /// structures marked enabled in the source bytes are included.
    pub structures: Vec<PatchCache>,
}

fn read_name(bytes: &[u8]) -> String {
    let raw = &bytes[..TIMBRE_NAME_LEN.min(bytes.len())];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim_end().to_string()
}

fn decode_structure(bytes: &[u8]) -> Option<PatchCache> {
    if bytes.len() < STRUCTURE_LEN {
        return None;
    }
    let enabled = bytes[0] != 0;
    if !enabled {
        return None;
    }
    let waveform = if bytes[1] == 0 {
        WaveformKind::Synthesized
    } else {
        WaveformKind::Pcm {
            slot_index: bytes[2] as usize,
        }
    };
    let pan_bias = bytes[3] as i8;
    let ring_mod = match bytes[4] {
        1 => RingModRole::Master,
        2 => RingModRole::Slave,
        _ => RingModRole::None,
    };

    let mut o = 5;
    let tva_level = [
        bytes[o] as i8,
        bytes[o + 1] as i8,
        bytes[o + 2] as i8,
        bytes[o + 3] as i8,
    ];
    o += 4;
    let tva_time = [bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3], bytes[o + 4]];
    o += 5;
    let tva_time_keyfollow = bytes[o];
    o += 1;
    let partial_level = bytes[o];
    o += 1;
    let bias_point_1 = bytes[o];
    o += 1;
    let bias_level_1 = bytes[o];
    o += 1;
    let bias_point_2 = bytes[o];
    o += 1;
    let bias_level_2 = bytes[o];
    o += 1;
    let velo_follow = bytes[o];
    o += 1;

    let tvf_level = [
        bytes[o] as i8,
        bytes[o + 1] as i8,
        bytes[o + 2] as i8,
        bytes[o + 3] as i8,
    ];
    o += 4;
    let tvf_time = [bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3], bytes[o + 4]];
    o += 5;
    let tvf_time_keyfollow = bytes[o];
    o += 1;
    let base_cutoff = bytes[o];
    o += 1;
    let cutoff_keyfollow = bytes[o];
    o += 1;
    let level_mult = bytes[o];
    o += 1;

    let tvp_level = [
        bytes[o] as i8,
        bytes[o + 1] as i8,
        bytes[o + 2] as i8,
        bytes[o + 3] as i8,
    ];
    o += 4;
    let tvp_time = [bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3], bytes[o + 4]];
    o += 5;
    let tvp_time_keyfollow = bytes[o];
    o += 1;
    let pitch_keyfollow = bytes[o];

    Some(PatchCache {
        tva: TvaParams {
            shape: shape_from_raw(tva_level, tva_time, tva_time_keyfollow),
            partial_level,
            bias_point_1,
            bias_level_1,
            bias_point_2,
            bias_level_2,
            velo_follow,
        },
        tvf: TvfParams {
            shape: shape_from_raw(tvf_level, tvf_time, tvf_time_keyfollow),
            base_cutoff,
            cutoff_keyfollow,
            level_mult,
        },
        tvp: TvpParams {
            shape: shape_from_raw(tvp_level, tvp_time, tvp_time_keyfollow),
            pitch_keyfollow,
        },
        waveform,
        pan_bias,
        ring_mod,
    })
}

/// Decode a raw timbre block (246 bytes, per [`crate::memory::TIMBRE_LEN`])
/// into its name and enabled partial structures. Bytes past what a
/// partial's structures occupy are reserved/unused by this pass.
pub fn decode_timbre(bytes: &[u8]) -> Timbre {
    let name = read_name(bytes);
    let declared_count = bytes.get(TIMBRE_NAME_LEN).copied().unwrap_or(0).min(MAX_STRUCTURES as u8);
    let mut structures = Vec::with_capacity(MAX_STRUCTURES);
    for i in 0..declared_count as usize {
        let start = HEADER_LEN + i * STRUCTURE_LEN;
        let end = start + STRUCTURE_LEN;
        if let Some(slice) = bytes.get(start..end) {
            if let Some(patch) = decode_structure(slice) {
                structures.push(patch);
            }
        }
    }
    Timbre { name, structures }
}

/// Number of raw bytes [`decode_timbre`] can make use of; timbre blocks
/// shorter than this decode using only the bytes available.
pub const ENCODED_LEN: usize = HEADER_LEN + MAX_STRUCTURES * STRUCTURE_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_structure(out: &mut Vec<u8>, waveform_pcm: bool, ring_mod: u8) {
        out.push(1); // enabled
        out.push(if waveform_pcm { 1 } else { 0 });
        out.push(0); // pcm slot
        out.push(0); // pan bias
        out.push(ring_mod);
        out.extend_from_slice(&[100u8, 80, 50, 0]); // tva level
        out.extend_from_slice(&[5u8, 10, 10, 10, 20]); // tva time
        out.push(0); // tva keyfollow
        out.push(20); // partial level
        out.push(0x40); // bias point 1
        out.push(0); // bias level 1
        out.push(0x40); // bias point 2
        out.push(0); // bias level 2
        out.push(0); // velo follow
        out.extend_from_slice(&[80u8, 60, 40, 0]); // tvf level
        out.extend_from_slice(&[5u8, 10, 10, 10, 20]); // tvf time
        out.push(0); // tvf keyfollow
        out.push(128); // base cutoff
        out.push(0); // cutoff keyfollow
        out.push(50); // level mult
        out.extend_from_slice(&[0u8, 0, 0, 0]); // tvp level
        out.extend_from_slice(&[1u8, 1, 1, 1, 1]); // tvp time
        out.push(0); // tvp time keyfollow
        out.push(0); // pitch keyfollow
    }

    fn encode_timbre(name: &str, structure_count: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; ENCODED_LEN];
        let name_bytes = name.as_bytes();
        bytes[..name_bytes.len().min(TIMBRE_NAME_LEN)]
            .copy_from_slice(&name_bytes[..name_bytes.len().min(TIMBRE_NAME_LEN)]);
        bytes[TIMBRE_NAME_LEN] = structure_count;
        for i in 0..structure_count as usize {
            let start = HEADER_LEN + i * STRUCTURE_LEN;
            let mut structure = Vec::new();
            encode_structure(&mut structure, false, 0);
            bytes[start..start + STRUCTURE_LEN].copy_from_slice(&structure);
        }
        bytes
    }

    #[test]
    fn decodes_name_trimmed_of_nuls() {
        let bytes = encode_timbre("Piano 1", 1);
        let timbre = decode_timbre(&bytes);
        assert_eq!(timbre.name, "Piano 1");
    }

    #[test]
    fn decodes_declared_structure_count() {
        let bytes = encode_timbre("Strings", 2);
        let timbre = decode_timbre(&bytes);
        assert_eq!(timbre.structures.len(), 2);
    }

    #[test]
    fn disabled_structure_is_skipped() {
        let mut bytes = encode_timbre("Lead", 1);
        bytes[HEADER_LEN] = 0; // mark structure disabled
        let timbre = decode_timbre(&bytes);
        assert!(timbre.structures.is_empty());
    }

    #[test]
    fn short_buffer_decodes_without_panicking() {
        let timbre = decode_timbre(&[0u8; 4]);
        assert!(timbre.structures.is_empty());
    }
}
