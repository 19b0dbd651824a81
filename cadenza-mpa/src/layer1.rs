// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cadenza_core::audio::{OutputBuffer, PcmSink};
use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::BitReader;

use crate::common::*;
use crate::layer12::{dequantize, FACTOR, LAYER12_SCALEFACTORS};
use crate::synthesis::{self, SynthesisState};

/// The Layer I decoder.
pub(crate) struct Layer1 {
    synthesis: [SynthesisState; 2],
}

impl Layer1 {
    pub fn new() -> Self {
        Layer1 { synthesis: Default::default() }
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

        let mut alloc = [[0u8; 32]; 2];
        let mut scalefacs = [[0f32; 32]; 2];

        let num_channels = header.n_channels();

        // The first sub-band using intensity coding, or 32 if intensity coding is unused.
        let bound = match header.channel_mode {
            ChannelMode::JointStereo(Mode::Intensity { bound }) => bound as usize,
            ChannelMode::JointStereo(Mode::Layer3 { .. }) => {
                // This mode extension is exclusive to layer 3. It is a fundamental error in the
                // decoder logic if it reaches a layer 1 frame.
                panic!("invalid mode extension for layer 1 decoding")
            }
            _ => 32,
        };

        // Read the bit allocation of each independently coded sub-band.
        for sb in 0..bound {
            for chan in alloc[..num_channels].iter_mut() {
                let bits = bs.read_bits(4) as u8;

                if bits > 0xe {
                    return decode_error("mpa: invalid layer 1 bit allocation");
                }

                chan[sb] = if bits != 0 { bits + 1 } else { 0 };
            }
        }

        // Read the shared bit allocation of the intensity coded sub-bands.
        for sb in bound..32 {
            let bits = bs.read_bits(4) as u8;

            if bits > 0xe {
                return decode_error("mpa: invalid layer 1 bit allocation");
            }

            let ba = if bits != 0 { bits + 1 } else { 0 };

            alloc[0][sb] = ba;
            alloc[1][sb] = ba;
        }

        // Read the scale factor of each allocated sub-band.
        for sb in 0..32 {
            for ch in 0..num_channels {
                if alloc[ch][sb] != 0 {
                    let index = bs.read_bits(6) as usize;

                    scalefacs[ch][sb] = LAYER12_SCALEFACTORS[index];
                }
            }
        }

        let factor: &[f32; 17] = &FACTOR;

        // Decode the sub-band samples: 12 slots of one sample per sub-band, per channel.
        let mut samples = [[0f32; 384]; 2];

        for s in 0..12 {
            // Independently coded sub-bands.
            for sb in 0..bound {
                for ch in 0..num_channels {
                    let bits = u32::from(alloc[ch][sb]);

                    if bits != 0 {
                        let raw = bs.read_bits(bits);
                        let sample = dequantize(bits, factor[bits as usize], raw);

                        samples[ch][12 * sb + s] = scalefacs[ch][sb] * sample;
                    }
                }
            }

            // Intensity coded sub-bands: one transmitted sample scaled per channel.
            for sb in bound..32 {
                let bits = u32::from(alloc[0][sb]);

                if bits != 0 {
                    let raw = bs.read_bits(bits);
                    let sample = dequantize(bits, factor[bits as usize], raw);

                    for ch in 0..num_channels {
                        samples[ch][12 * sb + s] = scalefacs[ch][sb] * sample;
                    }
                }
            }
        }

        // Polyphase synthesis, then 384 PCM samples per channel to the output buffer.
        let mut pcm = [0f32; 384];

        for (ch, samples) in samples.iter().enumerate().take(num_channels) {
            synthesis::synthesis(&mut self.synthesis[ch], 12, samples, &mut pcm);
            out.append(ch, &pcm);
        }

        out.write_done(sink)?;

        Ok(())
    }
}
