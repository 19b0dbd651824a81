// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::audio::{OutputBuffer, PcmSink};
use cadenza_core::errors::Result;
use cadenza_core::io::BitReader;

use crate::common::*;
use crate::layer12::{dequantize, FACTOR, LAYER12_SCALEFACTORS};
use crate::synthesis::{self, SynthesisState};

/// A run of sub-bands sharing one allocation table region: the offset of the region's class codes
/// in [`ALLOC_CLASSES`], the width in bits of an allocation code, and the number of sub-bands the
/// region covers.
struct SubbandAlloc {
    class_offset: u8,
    code_width: u8,
    band_count: u8,
}

macro_rules! sba {
    ($class_offset:expr, $code_width:expr, $band_count:expr) => {
        SubbandAlloc {
            class_offset: $class_offset,
            code_width: $code_width,
            band_count: $band_count,
        }
    };
}

/// Quantization class codes of the layer 2 allocation tables, by table region. Classes 2..=16
/// are linear classes of that many bits; 17, 18, and 19 are the grouped 3-, 5-, and 9-level
/// classes; 0 is "no allocation".
#[rustfmt::skip]
const ALLOC_CLASSES: [u8; 92] = [
    0, 17,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15, 16,
    0, 17, 18,  3, 19,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 16,
    0, 17, 18,  3, 19,  4,  5, 16,
    0, 17, 18, 16,
    0, 17, 18, 19,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
    0, 17, 18,  3, 19,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14,
    0,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15, 16,
];

/// The grouped quantization classes 17..=19: the number of levels, the width of the grouped code,
/// and the dequantization constant C from ISO/IEC 11172-3 table B.4.
const GROUPED_CLASSES: [(u32, u32, f32); 3] = [
    (3, 5, 4.0 / 3.0),
    (5, 7, 8.0 / 5.0),
    (9, 10, 16.0 / 9.0),
];

/// Select the allocation table partition and the sub-band limit for a frame, as specified by
/// ISO/IEC 11172-3 table B.2a-d (MPEG1) and ISO/IEC 13818-3 (MPEG2/2.5).
fn subband_alloc(header: &FrameHeader) -> (&'static [SubbandAlloc], usize) {
    static ALLOC_L2M1: [SubbandAlloc; 4] =
        [sba!(0, 4, 3), sba!(16, 4, 8), sba!(32, 3, 12), sba!(40, 2, 7)];

    static ALLOC_L2M1_LOWRATE: [SubbandAlloc; 2] = [sba!(44, 4, 2), sba!(44, 3, 10)];

    static ALLOC_L2M2: [SubbandAlloc; 3] = [sba!(60, 4, 4), sba!(44, 3, 7), sba!(44, 2, 19)];

    if !header.is_mpeg1() {
        // MPEG2 and 2.5 use a single allocation table with 30 sub-bands.
        return (&ALLOC_L2M2, 30);
    }

    // MPEG1 selects the table from the per-channel bit-rate and the sample rate.
    let kbps = header.bitrate / 1000 / header.n_channels() as u32;

    if kbps < 56 {
        let sb_limit = if header.sample_rate == 32_000 { 12 } else { 8 };
        (&ALLOC_L2M1_LOWRATE, sb_limit)
    }
    else if kbps >= 96 && header.sample_rate != 48_000 {
        (&ALLOC_L2M1, 30)
    }
    else {
        (&ALLOC_L2M1, 27)
    }
}

/// Decode the three samples of one granule slot triplet for a single quantization class.
fn read_samples(bs: &mut BitReader<'_>, class: u8, factor: &[f32; 17]) -> [f32; 3] {
    let mut samples = [0f32; 3];

    if class >= 17 {
        // Grouped classes transmit all three samples as a single base-n code.
        let (n, width, c) = GROUPED_CLASSES[usize::from(class) - 17];

        // nb is the bit width a linear class of n levels would have used.
        let nb = match n {
            3 => 2,
            5 => 3,
            _ => 4,
        };

        let mut code = bs.read_bits(width);

        for sample in samples.iter_mut() {
            let v = code % n;
            code /= n;

            // s = C * (s''' + D) with s''' = v * 2^(1-nb) - 1 and D = 0.5.
            *sample = c * ((v << (32 - nb)) as f32 / 2147483648.0 - 0.5);
        }
    }
    else {
        // Linear classes transmit three independent class-width codes.
        let bits = u32::from(class);

        for sample in samples.iter_mut() {
            let raw = bs.read_bits(bits);
            *sample = dequantize(bits, factor[class as usize], raw);
        }
    }

    samples
}

/// The Layer II decoder.
pub(crate) struct Layer2 {
    synthesis: [SynthesisState; 2],
}

impl Layer2 {
    pub fn new() -> Self {
        Layer2 { synthesis: Default::default() }
    }

    /// Decode one frame. `body` holds the frame bytes following the 4-byte header word.
    pub fn decode_frame(
        &mut self,
        header: &FrameHeader,
        body: &[u8],
        out: &mut OutputBuffer,
        sink: &mut dyn PcmSink,
    ) -> Result<()> {
        // The CRC word is not verified; skip it.
        let body = if header.has_crc { &body[2..] } else { body };

        let mut bs = BitReader::new(body);

        let num_channels = header.n_channels();
        let (alloc_regions, sb_limit) = subband_alloc(header);

        // The first sub-band using intensity coding; sub-bands below it are independently coded.
        let bound = match header.channel_mode {
            ChannelMode::JointStereo(Mode::Intensity { bound }) => (bound as usize).min(sb_limit),
            ChannelMode::JointStereo(Mode::Layer3 { .. }) => {
                // This mode extension is exclusive to layer 3. It is a fundamental error in the
                // decoder logic if it reaches a layer 2 frame.
                panic!("invalid mode extension for layer 2 decoding")
            }
            _ => sb_limit,
        };

        // Read the quantization class of each coded sub-band: the allocation code width and the
        // code-to-class table vary across the table regions.
        let mut class = [[0u8; 32]; 2];

        {
            let mut region_iter = alloc_regions.iter();
            let mut region = region_iter.next().unwrap();
            let mut region_end = usize::from(region.band_count);

            for sb in 0..sb_limit {
                if sb == region_end {
                    region = region_iter.next().unwrap();
                    region_end += usize::from(region.band_count);
                }

                let classes = &ALLOC_CLASSES[usize::from(region.class_offset)..];
                let width = u32::from(region.code_width);

                class[0][sb] = classes[bs.read_bits(width) as usize];

                if num_channels == 2 {
                    class[1][sb] = if sb < bound {
                        classes[bs.read_bits(width) as usize]
                    }
                    else {
                        // Intensity coded sub-bands share one allocation.
                        class[0][sb]
                    };
                }
            }
        }

        // Read the scale factor share information of each allocated sub-band.
        let mut scfsi = [[0u8; 32]; 2];

        for sb in 0..sb_limit {
            for ch in 0..num_channels {
                if class[ch][sb] != 0 {
                    scfsi[ch][sb] = bs.read_bits(2) as u8;
                }
            }
        }

        // Read the scale factors. A frame spans three scale factor parts of 12 slots each; the
        // share information transmits between one and three scale factors per sub-band and
        // spreads them over the parts.
        let mut scalefacs = [[[0f32; 3]; 32]; 2];

        for sb in 0..sb_limit {
            for ch in 0..num_channels {
                if class[ch][sb] == 0 {
                    continue;
                }

                let read_scalefac = |bs: &mut BitReader<'_>| {
                    let index = bs.read_bits(6) as usize;
                    LAYER12_SCALEFACTORS[index]
                };

                scalefacs[ch][sb] = match scfsi[ch][sb] {
                    0 => {
                        let a = read_scalefac(&mut bs);
                        let b = read_scalefac(&mut bs);
                        let c = read_scalefac(&mut bs);
                        [a, b, c]
                    }
                    1 => {
                        let a = read_scalefac(&mut bs);
                        let c = read_scalefac(&mut bs);
                        [a, a, c]
                    }
                    2 => {
                        let a = read_scalefac(&mut bs);
                        [a, a, a]
                    }
                    _ => {
                        let a = read_scalefac(&mut bs);
                        let b = read_scalefac(&mut bs);
                        [a, b, b]
                    }
                };
            }
        }

        let factor: &[f32; 17] = &FACTOR;

        // Decode the sub-band samples: 12 granules of 3 slots each, per sub-band and channel.
        let mut samples = [[0f32; 36 * 32]; 2];

        for gr in 0..12 {
            let part = gr >> 2;
            let slot = 3 * gr;

            for sb in 0..sb_limit {
                if sb < bound {
                    for ch in 0..num_channels {
                        if class[ch][sb] != 0 {
                            let triplet = read_samples(&mut bs, class[ch][sb], factor);
                            let scalefac = scalefacs[ch][sb][part];

                            for (s, sample) in triplet.iter().enumerate() {
                                samples[ch][36 * sb + slot + s] = scalefac * sample;
                            }
                        }
                    }
                }
                else if class[0][sb] != 0 {
                    // Intensity coded sub-bands transmit one sample triplet, scaled per channel.
                    let triplet = read_samples(&mut bs, class[0][sb], factor);

                    for ch in 0..num_channels {
                        let scalefac = scalefacs[ch][sb][part];

                        for (s, sample) in triplet.iter().enumerate() {
                            samples[ch][36 * sb + slot + s] = scalefac * sample;
                        }
                    }
                }
            }
        }

        // Polyphase synthesis, then 1152 PCM samples per channel to the output buffer.
        let mut pcm = [0f32; 36 * 32];

        for (ch, samples) in samples.iter().enumerate().take(num_channels) {
            synthesis::synthesis(&mut self.synthesis[ch], 36, samples, &mut pcm);
            out.append(ch, &pcm);
        }

        out.write_done(sink)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_grouped_class_reconstruction() {
        // The grouped 3-level class must reconstruct to -2/3, 0, +2/3, matching the linear
        // 3-level class of the shared dequantizer.
        let buf = [0u8; 4];
        let mut bs = BitReader::new(&buf);

        // Code 0 packs v = (0, 0, 0).
        let samples = read_samples(&mut bs, 17, &FACTOR);
        for s in samples {
            assert!((s - (-2.0 / 3.0)).abs() < 1e-6);
        }

        // Code 13 packs v = (1, 1, 1) in base 3: all three samples are zero.
        let buf = [13u8 << 3, 0, 0, 0];
        let mut bs = BitReader::new(&buf);
        let samples = read_samples(&mut bs, 17, &FACTOR);
        for s in samples {
            assert!(s.abs() < 1e-6);
        }

        // Code 26 packs v = (2, 2, 2).
        let buf = [26u8 << 3, 0, 0, 0];
        let mut bs = BitReader::new(&buf);
        let samples = read_samples(&mut bs, 17, &FACTOR);
        for s in samples {
            assert!((s - (2.0 / 3.0)).abs() < 1e-6);
        }
    }

    #[test]
    fn verify_allocation_regions_cover_limits() {
        // Every allocation table must cover its sub-band limit exactly or beyond.
        let word = 0xffe0_0000u32 | (0b11 << 19) | (0b10 << 17) | (1 << 16) | (12 << 12);
        let header = crate::header::parse_frame_header(word).unwrap();
        let (regions, sb_limit) = subband_alloc(&header);

        let total: usize = regions.iter().map(|r| usize::from(r.band_count)).sum();
        assert!(total >= sb_limit);
    }
}
