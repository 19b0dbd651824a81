// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::max;
use std::f64;

use lazy_static::lazy_static;

use crate::common::*;

use super::{BlockType, Granule};

/// The invalid intensity position for MPEG1 bitstreams. Ratios are only defined for positions
/// 0..7; a band transmitted with position 7 is not intensity coded and is left as decoded.
const INTENSITY_INV_POS_MPEG1: u8 = 7;

/// The invalid intensity position for MPEG2 and MPEG2.5 bitstreams, where positions run 0..31.
const INTENSITY_INV_POS_MPEG2: u8 = 31;

lazy_static! {
    /// (Left, right) channel coefficients for decoding intensity stereo in MPEG1 bitstreams,
    /// derived from section 2.4.3.4.9.3 of ISO/IEC 11172-3. For an intensity position is_pos
    /// (0 <= is_pos < 7):
    ///
    /// ```text
    /// is_ratio = tan(is_pos * PI/12)
    /// k_l = is_ratio / (1 + is_ratio)
    /// k_r =        1 / (1 + is_ratio)
    /// ```
    ///
    /// Position 6 would make is_ratio infinite; all signal goes left.
    static ref INTENSITY_RATIOS_MPEG1: [(f32, f32); 7] = {
        const PI_12: f64 = f64::consts::PI / 12.0;

        let mut ratios = [(0.0, 0.0); 7];

        for (is_pos, ratio) in ratios.iter_mut().enumerate().take(6) {
            let is_ratio = (PI_12 * is_pos as f64).tan();
            *ratio = ((is_ratio / (1.0 + is_ratio)) as f32, (1.0 / (1.0 + is_ratio)) as f32);
        }

        ratios[6] = (1.0, 0.0);

        ratios
    };

    /// (Left, right) channel coefficients for decoding intensity stereo in MPEG2 and MPEG2.5
    /// bitstreams, derived from section 2.4.3.2 of ISO/IEC 13818-3:
    ///
    /// ```text
    /// is_pos     == 0  =>  k_l = 1.0                      k_r = 1.0
    /// is_pos & 1 == 1  =>  k_l = i0 ^ [(is_pos + 1) / 2]  k_r = 1.0
    /// is_pos & 1 == 0  =>  k_l = 1.0                      k_r = i0 ^ (is_pos / 2)
    /// ```
    ///
    /// where i0 is 2^(-1/4) or 2^(-1/2) as selected by the least-significant bit of
    /// scalefac_compress (the first index of this table).
    static ref INTENSITY_RATIOS_MPEG2: [[(f32, f32); 32]; 2] = {
        let i0: [f64; 2] = [1.0 / f64::sqrt(f64::consts::SQRT_2), f64::consts::FRAC_1_SQRT_2];

        let mut ratios = [[(0.0, 0.0); 32]; 2];

        for k in 0..2 {
            for is_pos in 0..32 {
                ratios[k][is_pos] = if is_pos & 1 != 0 {
                    (i0[k].powf(((is_pos + 1) / 2) as f64) as f32, 1.0)
                }
                else {
                    (1.0, i0[k].powf((is_pos / 2) as f64) as f32)
                };
            }
        }

        ratios
    };
}

/// Decorrelate mid and side channels into left and right channels.
///
/// The 1/sqrt(2) normalization of `l = (m + s)/sqrt(2)`, `r = (m - s)/sqrt(2)` was already folded
/// into requantization, so only the sum and difference remain.
fn process_mid_side(mid: &mut [f32], side: &mut [f32]) {
    debug_assert!(mid.len() == side.len());

    for (m, s) in mid.iter_mut().zip(side) {
        let left = *m + *s;
        let right = *m - *s;
        *m = left;
        *s = right;
    }
}

/// Reconstruct one intensity coded band: `l = ch0 * k_l`, `r = ch0 * k_r`. An invalid intensity
/// position leaves the band exactly as previously decoded, whether that was mid-side or
/// independent coding.
fn process_intensity(
    is_pos: u8,
    is_table: &[(f32, f32)],
    is_inv_pos: u8,
    ch0: &mut [f32],
    ch1: &mut [f32],
) {
    if is_pos < is_inv_pos {
        let (ratio_l, ratio_r) = is_table[usize::from(is_pos)];

        for (l, r) in ch0.iter_mut().zip(ch1) {
            let is = *l;
            *l = ratio_l * is;
            *r = ratio_r * is;
        }
    }
}

/// Select the intensity ratio table and invalid position for the bitstream version.
fn intensity_table<'a>(header: &FrameHeader, granule: &Granule) -> (&'a [(f32, f32)], u8) {
    if header.is_mpeg1() {
        (&INTENSITY_RATIOS_MPEG1[..], INTENSITY_INV_POS_MPEG1)
    }
    else {
        let is_scale = granule.channels[1].scalefac_compress & 1;
        (&INTENSITY_RATIOS_MPEG2[usize::from(is_scale)][..], INTENSITY_INV_POS_MPEG2)
    }
}

/// The index of the first band interval at or above the rzero sample index: every interval from
/// here on holds only zero samples in the transmitted channel.
fn first_zero_interval(bands: &[usize], rzero: usize) -> usize {
    let n_intervals = bands.len() - 1;
    let mut i = n_intervals;
    while i > 0 && bands[i - 1] >= rzero {
        i -= 1;
    }
    i
}

/// Decode the intensity coded bands of a long block.
fn process_intensity_long_block(
    header: &FrameHeader,
    granule: &Granule,
    ch0: &mut [f32; 576],
    ch1: &mut [f32; 576],
) {
    // All bands beyond the last non-zero band of channel 1 may be intensity coded. The intensity
    // positions are transmitted as the channel 1 scale factors of those bands.
    let bands = &SFB_LONG_BANDS[header.sample_rate_idx];
    let (is_table, is_inv_pos) = intensity_table(header, granule);

    let start = first_zero_interval(bands, granule.channels[1].rzero);

    for sfb in start..22 {
        // The intensity position of the final band is not transmitted; it copies band 20.
        let is_pos = granule.channels[1].scalefacs[sfb.min(20)];

        process_intensity(
            is_pos,
            is_table,
            is_inv_pos,
            &mut ch0[bands[sfb]..bands[sfb + 1]],
            &mut ch1[bands[sfb]..bands[sfb + 1]],
        );
    }
}

/// Decode the intensity coded bands of a short or mixed block.
///
/// Every window of a short band is a logically separate signal, so each of the three windows has
/// its own intensity bound: the first interval of that window at or above which channel 1 is
/// all-zero. Samples are still in transmission order here (reordering runs after stereo
/// processing), so the interval `k` of the band table is contiguous and its intensity position is
/// the channel 1 scale factor with the same index.
fn process_intensity_short_block(
    header: &FrameHeader,
    granule: &Granule,
    is_mixed: bool,
    ch0: &mut [f32; 576],
    ch1: &mut [f32; 576],
) {
    let (bands, first_short) = if is_mixed {
        let switch = SFB_MIXED_SWITCH_POINT[header.sample_rate_idx];
        (SFB_MIXED_BANDS[header.sample_rate_idx], switch)
    }
    else {
        (&SFB_SHORT_BANDS[header.sample_rate_idx][..], 0)
    };

    let (is_table, is_inv_pos) = intensity_table(header, granule);

    let n_intervals = bands.len() - 1;
    let rzero = granule.channels[1].rzero;

    // The long prefix of a mixed block behaves like a long block.
    let long_start = first_zero_interval(&bands[..first_short + 1], rzero);
    for sfb in long_start..first_short {
        let is_pos = granule.channels[1].scalefacs[sfb];

        process_intensity(
            is_pos,
            is_table,
            is_inv_pos,
            &mut ch0[bands[sfb]..bands[sfb + 1]],
            &mut ch1[bands[sfb]..bands[sfb + 1]],
        );
    }

    // The short windows. For each window, find the highest interval of that window holding a
    // non-zero channel 1 sample; intensity decoding applies to every interval of the window above
    // it.
    debug_assert!((n_intervals - first_short) % 3 == 0);

    for w in 0..3 {
        let mut start = first_short + w;

        // Walk window w downwards from its highest interval to the first non-zero one.
        let mut k = n_intervals - 3 + w;
        loop {
            let is_zero =
                bands[k] >= rzero || ch1[bands[k]..bands[k + 1]].iter().all(|&s| s == 0.0);
            if !is_zero {
                start = k + 3;
                break;
            }
            if k < first_short + 3 {
                break;
            }
            k -= 3;
        }

        let mut k = start;
        while k < n_intervals {
            // The final band's intensity positions are not transmitted; they copy the previous
            // band's.
            let is_pos_idx = if k >= n_intervals - 3 { k - 3 } else { k };
            let is_pos = granule.channels[1].scalefacs[is_pos_idx];

            process_intensity(
                is_pos,
                is_table,
                is_inv_pos,
                &mut ch0[bands[k]..bands[k + 1]],
                &mut ch1[bands[k]..bands[k + 1]],
            );

            k += 3;
        }
    }
}

/// Perform joint stereo decoding on the channel pair.
pub(super) fn stereo(
    header: &FrameHeader,
    granule: &mut Granule,
    ch0: &mut [f32; 576],
    ch1: &mut [f32; 576],
) {
    let (mid_side, intensity) = match header.channel_mode {
        ChannelMode::JointStereo(Mode::Layer3 { mid_side, intensity }) => (mid_side, intensity),
        ChannelMode::JointStereo(Mode::Intensity { .. }) => {
            // This function only decodes layer 3 stereo encodings. It is a fundamental error in
            // the decoder logic if a layer 1 or 2 mode extension reaches this point.
            panic!("invalid mode extension for layer 3 stereo decoding")
        }
        _ => return,
    };

    if !mid_side && !intensity {
        return;
    }

    let end = max(granule.channels[0].rzero, granule.channels[1].rzero);

    // Mid-side decoding applies to the whole spectrum up-to the joint non-zero extent. Inside the
    // intensity region the side channel is zero, so this leaves both channels carrying the mid
    // signal, which the intensity pass below then re-weights.
    if mid_side {
        process_mid_side(&mut ch0[..end], &mut ch1[..end]);
    }

    // Intensity decoding requires both channels to agree on the block layout. If they do not, the
    // encoding is non-conformant: fall back to treating the channels as independent.
    if intensity && granule.channels[0].block_type == granule.channels[1].block_type {
        match granule.channels[1].block_type {
            BlockType::Short { is_mixed } => {
                process_intensity_short_block(header, granule, is_mixed, ch0, ch1);
            }
            _ => process_intensity_long_block(header, granule, ch0, ch1),
        }
    }

    // After joint stereo decoding both channels span the same number of samples. Update rzero so
    // the downstream stages process the full joint extent.
    granule.channels[0].rzero = end;
    granule.channels[1].rzero = end;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_intensity_ratio_tables() {
        // MPEG1 position 3 splits the signal evenly: tan(45 deg) == 1.
        let (kl, kr) = INTENSITY_RATIOS_MPEG1[3];
        assert!((kl - 0.5).abs() < 1e-6);
        assert!((kr - 0.5).abs() < 1e-6);

        // Position 0 sends everything right, position 6 everything left.
        assert_eq!(INTENSITY_RATIOS_MPEG1[0], (0.0, 1.0));
        assert_eq!(INTENSITY_RATIOS_MPEG1[6], (1.0, 0.0));

        // MPEG2 position 0 leaves both channels at unity.
        assert_eq!(INTENSITY_RATIOS_MPEG2[0][0], (1.0, 1.0));
        // Odd positions scale the left channel by powers of i0.
        let (kl, kr) = INTENSITY_RATIOS_MPEG2[1][1];
        assert!((kl - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(kr, 1.0);
    }

    #[test]
    fn verify_invalid_position_leaves_band_untouched() {
        let mut ch0 = [0.25f32; 8];
        let mut ch1 = [0.5f32; 8];

        process_intensity(
            INTENSITY_INV_POS_MPEG1,
            &INTENSITY_RATIOS_MPEG1[..],
            INTENSITY_INV_POS_MPEG1,
            &mut ch0,
            &mut ch1,
        );

        assert!(ch0.iter().all(|&s| s == 0.25));
        assert!(ch1.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn verify_first_zero_interval() {
        let bands = [0usize, 4, 8, 12, 16];
        assert_eq!(first_zero_interval(&bands, 0), 0);
        assert_eq!(first_zero_interval(&bands, 1), 1);
        assert_eq!(first_zero_interval(&bands, 4), 1);
        assert_eq!(first_zero_interval(&bands, 5), 2);
        assert_eq!(first_zero_interval(&bands, 16), 4);
    }
}
