// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `layer12` module holds the quantization support shared by the Layer I and Layer II
//! decoders: the scale factor table and the linear dequantization of sub-band samples.

use lazy_static::lazy_static;

lazy_static! {
    /// Scale factors for layers 1 & 2, from ISO/IEC 11172-3 table B.1: `2^(1 - i/3)`. Index 63 is
    /// reserved and never transmitted by a conformant encoder; it decodes to a vanishing scale
    /// factor here.
    pub static ref LAYER12_SCALEFACTORS: [f32; 64] = {
        let mut scalefactors = [0f32; 64];
        for (i, sf) in scalefactors.iter_mut().enumerate() {
            *sf = (2.0f64 * f64::powf(2.0, -(i as f64) / 3.0)) as f32;
        }
        scalefactors
    };

    /// Dequantization factors for nb-bit linear quantization classes, nb = 2..16.
    ///
    /// As per ISO/IEC 11172-3, given the nb-bit raw sample `val`, dequantization is:
    ///
    /// ```text
    /// fractional  = val / 2^(nb - 1)
    /// dequantized = (2^nb) / (2^nb - 1) * (fractional + 2^(-nb + 1))
    /// ```
    ///
    /// After expanding and simplifying, the calculation reduces to a single multiplication by the
    /// factor tabulated here and an addition (see [`dequantize`]).
    pub static ref FACTOR: [f32; 17] = {
        let mut factor = [0f32; 17];

        for (i, factor) in factor.iter_mut().enumerate().skip(2) {
            let a = 1u32 << i;
            let b = 1u32 << (i - 1);

            *factor = (a as f32 / (a - 1) as f32) * (b as f32).recip();
        }

        factor
    };
}

/// Sign-extend a `width`-bit value to a 32-bit signed integer.
#[inline(always)]
fn sign_extend_leq32_to_i32(value: u32, width: u32) -> i32 {
    ((value << (32 - width)) as i32) >> (32 - width)
}

/// Dequantize a raw sub-band sample of a linear quantization class of length `bits` bits.
#[inline(always)]
pub fn dequantize(bits: u32, factor: f32, raw: u32) -> f32 {
    // Invert the most significant bit.
    let inv = raw ^ (1 << (bits - 1));

    // Sign extend the sample.
    let a = sign_extend_leq32_to_i32(inv, bits);

    // Dequantize the sample.
    factor * (a + 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_scalefactor_table() {
        let sf: &[f32; 64] = &LAYER12_SCALEFACTORS;

        assert!((sf[0] - 2.0).abs() < 1e-6);
        assert!((sf[3] - 1.0).abs() < 1e-6);
        assert!((sf[6] - 0.5).abs() < 1e-6);
        // Each step divides by the cube root of two.
        assert!((sf[1] / sf[2] - sf[4] / sf[5]).abs() < 1e-6);
    }

    #[test]
    fn verify_dequantize_3_levels() {
        // A 2-bit class has 3 levels (the all-ones code is never transmitted), reconstructing to
        // -2/3, 0, and +2/3.
        let factor = FACTOR[2];

        assert!((dequantize(2, factor, 0b00) - (-2.0 / 3.0)).abs() < 1e-6);
        assert!(dequantize(2, factor, 0b01).abs() < 1e-6);
        assert!((dequantize(2, factor, 0b10) - (2.0 / 3.0)).abs() < 1e-6);
    }
}
