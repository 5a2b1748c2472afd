//! Static tables normally baked into the control ROM image.
//!
//! A handful of these are reproduced here verbatim because their values are
//! load-bearing for envelope arithmetic (`BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF`
//! comes directly from the reference hardware's bias-point subtraction
//! logic). `env_logarithmic_time` is a reconstruction: the retained
//! reference sources name the table and its use but do not carry its raw
//! ROM bytes, so it is expressed here as a monotonically decreasing
//! logarithmic curve over the amplitude-difference domain, matching the
//! documented shape (`timeToTarget = envLogarithmicTime[|delta|] -
//! envTimeSetting`) rather than hardware-exact byte values.

/// Per-bias-point subtraction coefficients, indexed 0..=12, used by
/// [`crate::tva`]'s bias amplitude calculation. Verbatim from the
/// reference TVA implementation.
pub const BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF: [u8; 13] =
    [255, 187, 137, 100, 74, 54, 40, 29, 21, 15, 10, 5, 0];

/// `tables->masterVolToAmpSubtraction[masterVol]` and
/// `tables->levelToAmpSubtraction[level]` from the reference TVA's
/// `calcBasicAmp`: both are monotonically decreasing subtraction curves
/// over a 0-ceilinged control value, reaching 0 subtraction at the
/// control's maximum. Like `env_logarithmic_time` above, the retained
/// reference source names and uses these tables but does not carry their
/// raw ROM bytes, so both are reconstructed here as linear ramps from 155
/// (silence) down to 0 (no subtraction) rather than hardware-exact values.

/// Amplitude subtraction for a system-area master volume setting
/// (0..=100).
pub fn master_vol_to_amp_subtraction(master_vol: u8) -> u8 {
    const TABLE_LEN: usize = 101;
    static TABLE: [u8; TABLE_LEN] = build_linear_amp_subtraction::<TABLE_LEN>();
    TABLE[master_vol.min(100) as usize]
}

/// Amplitude subtraction for a patch/partial/rhythm output-level setting
/// (0..=127), also used for TVA's own `partialParam.tva.level`.
pub fn level_to_amp_subtraction(level: u8) -> u8 {
    const TABLE_LEN: usize = 128;
    static TABLE: [u8; TABLE_LEN] = build_linear_amp_subtraction::<TABLE_LEN>();
    TABLE[level.min(127) as usize]
}

const fn build_linear_amp_subtraction<const LEN: usize>() -> [u8; LEN] {
    let mut table = [0u8; LEN];
    let max = (LEN - 1) as u32;
    let mut i = 0;
    while i < LEN {
        table[i] = (155 - (155 * i as u32) / max) as u8;
        i += 1;
    }
    table
}

/// Looks up the logarithmic time contribution for an amplitude jump of
/// `diff` (0..=155, the valid TVA amplitude range). Larger jumps take
/// proportionally longer to traverse at a fixed phase rate.
pub fn env_logarithmic_time(diff: u8) -> u8 {
    const TABLE_LEN: usize = 156;
    static TABLE: [u8; TABLE_LEN] = build_env_logarithmic_time();

    TABLE[diff as usize % TABLE_LEN]
}

const fn build_env_logarithmic_time() -> [u8; 156] {
    let mut table = [0u8; 156];
    let mut i = 0;
    while i < 156 {
        // log2-ish growth, clamped into a byte; i=0 maps to the minimum
        // nonzero time so a zero-delta transition still takes one frame.
        let mut v = 1u32;
        let mut n = i as u32;
        while n > 0 {
            v += 1;
            n >>= 1;
        }
        table[i] = (v * 2) as u8;
        i += 1;
    }
    table
}

/// Stereo pan-position gain pairs (left, right) for the 15 pan settings
/// (0 = hard left .. 14 = hard right) addressable from a part's pan
/// parameter and a partial's own pan bias.
pub const PAN_SETTINGS: [(u8, u8); 15] = [
    (127, 0),
    (118, 27),
    (108, 45),
    (98, 59),
    (89, 71),
    (79, 79),
    (71, 89),
    (59, 98),
    (45, 108),
    (27, 118),
    (0, 127),
    (0, 127),
    (0, 127),
    (0, 127),
    (0, 127),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bias_table_is_monotonically_decreasing() {
        for pair in BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn env_logarithmic_time_is_nondecreasing_and_nonzero() {
        let mut prev = 0u8;
        for diff in 0..156u32 {
            let v = env_logarithmic_time(diff as u8);
            assert!(v >= 1);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn pan_settings_cover_full_stereo_field() {
        assert_eq!(PAN_SETTINGS[0], (127, 0));
        assert_eq!(PAN_SETTINGS[5], (79, 79));
    }

    #[test]
    fn master_vol_to_amp_subtraction_runs_from_155_down_to_0() {
        assert_eq!(master_vol_to_amp_subtraction(0), 155);
        assert_eq!(master_vol_to_amp_subtraction(100), 0);
        assert!(master_vol_to_amp_subtraction(50) < 155);
    }

    #[test]
    fn level_to_amp_subtraction_runs_from_155_down_to_0() {
        assert_eq!(level_to_amp_subtraction(0), 155);
        assert_eq!(level_to_amp_subtraction(127), 0);
        let mut prev = 255u16;
        for level in 0..=127u8 {
            let v = level_to_amp_subtraction(level) as u16;
            assert!(v <= prev);
            prev = v;
        }
    }
}
