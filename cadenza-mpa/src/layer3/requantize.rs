// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use lazy_static::lazy_static;

use crate::common::*;

use super::{BlockType, GranuleChannel};

lazy_static! {
    /// Lookup table for computing x(i) = s(i)^(4/3) where s(i) is a decoded Huffman sample. The
    /// value of s(i) is bound between 0..8207 (15 + 2^13 - 1 after the widest linbits extension).
    pub(super) static ref REQUANTIZE_POW43: [f32; 8207] = {
        let mut pow43 = [0f32; 8207];
        for (i, p) in pow43.iter_mut().enumerate() {
            *p = f32::powf(i as f32, 4.0 / 3.0);
        }
        pow43
    };
}

/// Zero the entire sample buffer of a granule channel.
pub(super) fn zero(buf: &mut [f32; 576]) {
    for sample in buf.iter_mut() {
        *sample = 0.0;
    }
}

/// Requantize long block samples in `buf`.
///
/// Dequantization of long blocks is governed by the following equation:
///
/// ```text
/// xr(i) = s(i)^(4/3) * 2^(0.25*A) * 2^(-B)
/// where:
///     A = global_gain[gr] - 210 - (2 if mid-side stereo)
///     B = scalefac_multiplier * (scalefacs[gr][ch][sfb] + preflag[gr] * pretab[sfb])
/// ```
///
/// The mid-side term folds the 1/sqrt(2) normalization of mid-side stereo decoding into the
/// requantization step, so the stereo processor works with plain sums and differences. The
/// samples in `buf` already carry the s(i)^(4/3) factor from the Huffman decode.
fn requantize_long(channel: &GranuleChannel, a: i32, bands: &[usize], buf: &mut [f32; 576]) {
    // The preemphasis table from table B.6 of ISO/IEC 11172-3.
    const PRE_EMPHASIS: [u8; 22] = [
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        1, 1, 1, 1, 2, 2, 3, 3, 3, 2, 0,
    ];

    debug_assert!(bands.len() <= 23);

    let scalefac_shift = if channel.scalefac_scale { 2 } else { 1 };

    for (i, (start, end)) in bands.iter().zip(&bands[1..]).enumerate() {
        // Bands beyond the rzero sample are entirely zero; nothing left to scale.
        if *start >= channel.rzero {
            break;
        }

        let pre_emphasis = if channel.preflag { PRE_EMPHASIS[i] } else { 0 };

        // B, pre-multiplied by 4 (scalefac_shift doubles as the multiplier) so that A and B share
        // one power-of-two evaluation: 2^(0.25*A) * 2^(-B) == 2^{0.25 * (A - 4B)}.
        let b = i32::from((channel.scalefacs[i] + pre_emphasis) << scalefac_shift);

        let pow2ab = f64::powf(2.0, 0.25 * f64::from(a - b)) as f32;

        let band_end = min(*end, channel.rzero);

        for sample in &mut buf[*start..band_end] {
            *sample *= pow2ab;
        }
    }
}

/// Requantize short block samples in `buf`, starting at scale factor index `switch`.
///
/// Dequantization of short blocks follows the long block equation with two changes: each window
/// carries an additional gain, `A = ... - 8 * subblock_gain[win]`, and the scale factors are per
/// window with no preemphasis.
fn requantize_short(
    channel: &GranuleChannel,
    gain: i32,
    bands: &[usize],
    switch: usize,
    buf: &mut [f32; 576],
) {
    debug_assert!(bands.len() <= 40);

    let a = [
        gain - 8 * i32::from(channel.subblock_gain[0]),
        gain - 8 * i32::from(channel.subblock_gain[1]),
        gain - 8 * i32::from(channel.subblock_gain[2]),
    ];

    let scalefac_shift = if channel.scalefac_scale { 2 } else { 1 };

    for (i, (start, end)) in bands.iter().zip(&bands[1..]).enumerate() {
        if *start > channel.rzero {
            break;
        }

        let b = i32::from(channel.scalefacs[switch + i] << scalefac_shift);

        let pow2ab = f64::powf(2.0, 0.25 * f64::from(a[i % 3] - b)) as f32;

        let win_end = min(*end, channel.rzero);

        for sample in &mut buf[*start..win_end] {
            *sample *= pow2ab;
        }
    }
}

/// Requantize the samples in `buf` regardless of block type.
pub(super) fn requantize(header: &FrameHeader, channel: &GranuleChannel, buf: &mut [f32; 576]) {
    // A is constant for the granule (up-to the per-window sub-block gain of short blocks).
    let mut a = i32::from(channel.global_gain) - 210;

    // Fold the 1/sqrt(2) of mid-side stereo into the gain: 2^(0.25 * -2) = 2^(-0.5).
    if header.is_mid_side_stereo() {
        a -= 2;
    }

    match channel.block_type {
        BlockType::Short { is_mixed: false } => {
            requantize_short(channel, a, &SFB_SHORT_BANDS[header.sample_rate_idx], 0, buf);
        }
        BlockType::Short { is_mixed: true } => {
            // A mixed block splits into a long block prefix and short blocks after the switch
            // point, so its requantization decomposes the same way.
            let bands = SFB_MIXED_BANDS[header.sample_rate_idx];
            let switch = SFB_MIXED_SWITCH_POINT[header.sample_rate_idx];

            requantize_long(channel, a, &bands[..switch + 1], buf);
            requantize_short(channel, a, &bands[switch..], switch, buf);
        }
        _ => {
            requantize_long(channel, a, &SFB_LONG_BANDS[header.sample_rate_idx], buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_pow43_table() {
        let pow43: &[f32; 8207] = &REQUANTIZE_POW43;

        assert_eq!(pow43[0], 0.0);
        assert_eq!(pow43[1], 1.0);
        assert!((pow43[2] - 2.0f32.powf(4.0 / 3.0)).abs() < 1e-4);
        assert!((pow43[8206] - 8206.0f32.powf(4.0 / 3.0)).abs() < 1.0);
    }

    #[test]
    fn verify_requantize_long_gain() {
        // With global_gain == 210, no scaling, and a unit sample, requantization is the identity.
        let header = crate::header::parse_frame_header(
            0xffe0_0000 | (0b11 << 19) | (0b01 << 17) | (1 << 16) | (9 << 12),
        )
        .unwrap();

        let mut channel = GranuleChannel::default();
        channel.global_gain = 210;
        channel.rzero = 1;

        let mut buf = [0f32; 576];
        buf[0] = 1.0;

        requantize(&header, &channel, &mut buf);
        assert!((buf[0] - 1.0).abs() < 1e-6);

        // Raising global_gain by 4 doubles the output.
        channel.global_gain = 214;
        buf[0] = 1.0;
        requantize(&header, &channel, &mut buf);
        assert!((buf[0] - 2.0).abs() < 1e-6);

        // A scale factor of 1 with scalefac_scale == false multiplies by 2^(-0.5).
        channel.global_gain = 210;
        channel.scalefacs[0] = 1;
        buf[0] = 1.0;
        requantize(&header, &channel, &mut buf);
        assert!((buf[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        // With scalefac_scale == true the same scale factor multiplies by 2^(-1).
        channel.scalefac_scale = true;
        buf[0] = 1.0;
        requantize(&header, &channel, &mut buf);
        assert!((buf[0] - 0.5).abs() < 1e-6);
    }
}
