// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use cadenza_core::audio::{OutputBuffer, PcmSink};
use cadenza_core::errors::{decode_error, Result};
use cadenza_core::io::BitReader;

use crate::common::*;
use crate::worker::{SynthesisJob, SynthesisWorker};

mod bitstream;
mod huffman;
mod hybrid_synthesis;
mod requantize;
mod stereo;

/// Indicates the block type (type of window) for a channel in a granule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum BlockType {
    /// The default case when window switching is off.
    Long,
    Start,
    Short { is_mixed: bool },
    End,
}

/// `FrameData` contains the side_info and main_data portions of a MPEG audio frame.
#[derive(Default, Debug)]
struct FrameData {
    /// The byte offset into the bit reservoir indicating the location of the first bit of
    /// main_data. If 0, main_data begins after the side_info of this frame.
    main_data_begin: u16,
    /// Scale factor share information, per channel. Each channel has 4 ranges of long bands whose
    /// scale factors the second granule may re-use from the first; shared ranges are flagged true.
    scfsi: [[bool; 4]; 2],
    /// The granules.
    granules: [Granule; 2],
}

impl FrameData {
    /// Get the granule(s) of the frame: 2 for MPEG1, 1 for MPEG2/2.5.
    #[inline(always)]
    fn granules_mut(&mut self, version: MpegVersion) -> &mut [Granule] {
        match version {
            MpegVersion::Mpeg1 => &mut self.granules[..2],
            _ => &mut self.granules[..1],
        }
    }
}

#[derive(Default, Debug)]
struct Granule {
    /// Channels in the granule.
    channels: [GranuleChannel; 2],
}

struct GranuleChannel {
    /// Total number of bits used for scale factors (part2) and Huffman encoded data (part3).
    part2_3_length: u16,
    /// HALF the number of samples in the big_values partition (sum of all samples in
    /// `region[0..3]`).
    big_values: u16,
    /// Logarithmic quantization step size.
    global_gain: u8,
    /// Depending on the MPEG version, `scalefac_compress` determines how many bits are allocated
    /// per scale factor: for MPEG1 it is a 4-bit index into a (slen1, slen2) pair table, for
    /// MPEG2/2.5 it is a 9-bit value decoding into four partition bit lengths.
    scalefac_compress: u16,
    /// The block type of the channel in this granule.
    block_type: BlockType,
    /// Additional gain per short block window.
    subblock_gain: [u8; 3],
    /// The Huffman table to use for decoding `region[0..3]` of big_values.
    table_select: [u8; 3],
    /// The index of the first sample in region1 of big_values.
    region1_start: usize,
    /// The index of the first sample in region2 of big_values.
    region2_start: usize,
    /// Whether the preemphasis amounts should be added to the scale factors before
    /// requantization.
    preflag: bool,
    /// A 0.5x (false) or 1x (true) multiplier for scale factors.
    scalefac_scale: bool,
    /// Use Huffman Quads table A (0) or B (1) for decoding the count1 partition.
    count1table_select: u8,
    /// Long and short window scale factors, in transmission order. The layout depends on the
    /// block type; short windows follow any long prefix. Intensity positions of an intensity
    /// coded channel 1 are transmitted through this same array.
    scalefacs: [u8; 39],
    /// The starting sample index of the rzero partition: every sample from here on is zero.
    rzero: usize,
}

impl Default for GranuleChannel {
    fn default() -> Self {
        GranuleChannel {
            part2_3_length: 0,
            big_values: 0,
            global_gain: 0,
            scalefac_compress: 0,
            block_type: BlockType::Long,
            subblock_gain: [0; 3],
            table_select: [0; 3],
            region1_start: 0,
            region2_start: 0,
            preflag: false,
            scalefac_scale: false,
            count1table_select: 0,
            scalefacs: [0; 39],
            rzero: 0,
        }
    }
}

impl fmt::Debug for GranuleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GranuleChannel {{")?;
        writeln!(f, "\tpart2_3_length={}", self.part2_3_length)?;
        writeln!(f, "\tbig_values={}", self.big_values)?;
        writeln!(f, "\tglobal_gain={}", self.global_gain)?;
        writeln!(f, "\tscalefac_compress={}", self.scalefac_compress)?;
        writeln!(f, "\tblock_type={:?}", self.block_type)?;
        writeln!(f, "\tsubblock_gain={:?}", self.subblock_gain)?;
        writeln!(f, "\ttable_select={:?}", self.table_select)?;
        writeln!(f, "\tregion1_start={}", self.region1_start)?;
        writeln!(f, "\tregion2_start={}", self.region2_start)?;
        writeln!(f, "\tpreflag={}", self.preflag)?;
        writeln!(f, "\tscalefac_scale={}", self.scalefac_scale)?;
        writeln!(f, "\tcount1table_select={}", self.count1table_select)?;

        write!(f, "\tscalefacs=[ ")?;
        for sf in &self.scalefacs[..] {
            write!(f, "{}, ", sf)?;
        }
        writeln!(f, "]")?;
        writeln!(f, "\trzero={}", self.rzero)?;
        writeln!(f, "}}")
    }
}

/// One channel's double-buffered synthesis pipeline: the worker thread, the buffer set currently
/// being filled by the decode thread, and the spare set the first submission swaps in.
struct ChannelPipeline {
    worker: SynthesisWorker,
    fill: Option<SynthesisJob>,
    spare: Option<SynthesisJob>,
    /// True when the worker holds buffers from a previous frame whose PCM must be collected
    /// before anything else may be submitted.
    pending: bool,
}

/// The Layer III decoder.
pub(crate) struct Layer3 {
    reservoir: BitReservoir,
    /// IMDCT overlap-add state, per channel and sub-band.
    overlap: [[[f32; 18]; 32]; 2],
    pipelines: Vec<ChannelPipeline>,
    n_granules: usize,
}

impl Layer3 {
    pub fn new(header: &FrameHeader) -> Self {
        let n_granules = header.n_granules();

        let pipelines = (0..header.n_channels())
            .map(|ch| {
                let (fill, spare) = SynthesisWorker::allocate_buffers(n_granules);
                ChannelPipeline {
                    worker: SynthesisWorker::spawn(ch),
                    fill: Some(fill),
                    spare: Some(spare),
                    pending: false,
                }
            })
            .collect();

        Layer3 {
            reservoir: BitReservoir::new(),
            overlap: [[[0.0; 18]; 32]; 2],
            pipelines,
            n_granules,
        }
    }

    /// Decode one frame. `body` holds the frame bytes following the 4-byte header word.
    pub fn decode_frame(
        &mut self,
        header: &FrameHeader,
        body: &[u8],
        out: &mut OutputBuffer,
        sink: &mut dyn PcmSink,
    ) -> Result<()> {
        let mut frame_data = FrameData::default();

        // The CRC word is not verified; skip it.
        let body = if header.has_crc { &body[2..] } else { body };

        let side_info_len = header.side_info_len();
        if body.len() < side_info_len {
            return decode_error("mpa: frame truncated within side_info");
        }

        let mut bs = BitReader::new(&body[..side_info_len]);

        if let Err(e) = bitstream::read_side_info(&mut bs, header, &mut frame_data) {
            // A rejected frame breaks the main data continuity, so the reservoir contents cannot
            // be trusted by the next frame either.
            self.reservoir.clear();
            return Err(e);
        }

        // Buffer this frame's main data into the bit reservoir. If fewer history bytes are
        // available than main_data_begin reaches back to, the affected granules decode to
        // silence below, but the fresh bytes stay buffered for future frames.
        let underflow = self
            .reservoir
            .fill(&body[side_info_len..], frame_data.main_data_begin as usize)?;

        match self.read_main_data(header, 8 * underflow, &mut frame_data) {
            Ok(consumed) => {
                self.reservoir.consume(consumed);
            }
            Err(e) => {
                // The reservoir was likely filled with invalid data. Clear it for the next frame.
                self.reservoir.clear();
                return Err(e);
            }
        }

        for gr in 0..self.n_granules {
            let granule = &mut frame_data.granules[gr];

            if self.pipelines.len() == 2 {
                let (p0, p1) = self.pipelines.split_at_mut(1);
                let xr0 = &mut p0[0].fill.as_mut().unwrap().bufs.xr[gr];
                let xr1 = &mut p1[0].fill.as_mut().unwrap().bufs.xr[gr];

                requantize::requantize(header, &granule.channels[0], xr0);
                requantize::requantize(header, &granule.channels[1], xr1);

                // Reconstruct left/right from any joint stereo encoding.
                stereo::stereo(header, granule, xr0, xr1);
            }
            else {
                let xr0 = &mut self.pipelines[0].fill.as_mut().unwrap().bufs.xr[gr];
                requantize::requantize(header, &granule.channels[0], xr0);
            }

            // The remaining stages are per-channel.
            for (ch, pipeline) in self.pipelines.iter_mut().enumerate() {
                let channel = &granule.channels[ch];
                let xr = &mut pipeline.fill.as_mut().unwrap().bufs.xr[gr];

                // Reorder the short block samples into sub-band order.
                hybrid_synthesis::reorder(header, channel, xr);

                // Apply the anti-aliasing filter to all block types other than short.
                hybrid_synthesis::antialias(channel, xr);

                // IMDCT and windowing with overlap-add.
                hybrid_synthesis::hybrid_synthesis(channel, &mut self.overlap[ch], xr);
            }
        }

        // Hand the granule set to the synthesis workers. Collecting the previous frame's PCM
        // first is the decode thread's only wait, bounding the pipeline depth to one frame and
        // keeping the PCM ordering deterministic.
        let n_samples = self.n_granules * SAMPLES_PER_GRANULE;

        for (ch, pipeline) in self.pipelines.iter_mut().enumerate() {
            if pipeline.pending {
                let done = pipeline.worker.collect();
                out.append(ch, &done.pcm[..n_samples]);
                pipeline.spare = Some(done);
            }

            let job = pipeline.fill.take().unwrap();
            pipeline.worker.submit(job);
            pipeline.fill = pipeline.spare.take();
            pipeline.pending = true;
        }

        out.write_done(sink)?;

        Ok(())
    }

    /// Collect the final in-flight frame from the synthesis workers.
    pub fn finish(&mut self, out: &mut OutputBuffer, sink: &mut dyn PcmSink) -> Result<()> {
        let n_samples = self.n_granules * SAMPLES_PER_GRANULE;

        for (ch, pipeline) in self.pipelines.iter_mut().enumerate() {
            if pipeline.pending {
                let done = pipeline.worker.collect();
                out.append(ch, &done.pcm[..n_samples]);
                pipeline.spare = Some(done);
                pipeline.pending = false;
            }
        }

        out.write_done(sink)?;

        Ok(())
    }

    /// Reads the main data portion of the frame (scale factors and spectral samples) from the bit
    /// reservoir. Returns the number of reservoir bytes consumed.
    fn read_main_data(
        &mut self,
        header: &FrameHeader,
        underflow_bits: u32,
        frame_data: &mut FrameData,
    ) -> Result<usize> {
        // Split the borrow: the reservoir is read while the pipelines' buffers are written.
        let Layer3 { reservoir, pipelines, n_granules, .. } = self;

        let main_data = reservoir.bytes_ref();
        let pow43: &[f32; 8207] = &requantize::REQUANTIZE_POW43;

        let mut part2_3_begin = 0usize;
        let mut part2_3_skipped = 0u32;

        for gr in 0..*n_granules {
            // If the reservoir underflowed (main_data_begin reached back past the available
            // history), the granules covered by the missing bytes decode to silence.
            if part2_3_skipped < underflow_bits {
                for (ch, pipeline) in pipelines.iter_mut().enumerate() {
                    let channel = &mut frame_data.granules[gr].channels[ch];
                    requantize::zero(&mut pipeline.fill.as_mut().unwrap().bufs.xr[gr]);
                    channel.rzero = 0;
                    part2_3_skipped += u32::from(channel.part2_3_length);
                }

                // Position the next granule after the bits that were skipped.
                if part2_3_skipped > underflow_bits {
                    part2_3_begin = (part2_3_skipped - underflow_bits) as usize;
                }

                continue;
            }

            for (ch, pipeline) in pipelines.iter_mut().enumerate() {
                let part2_3_length = u32::from(frame_data.granules[gr].channels[ch].part2_3_length);

                let byte_index = part2_3_begin >> 3;
                if byte_index >= main_data.len() && part2_3_length > 0 {
                    return decode_error("mpa: invalid main_data offset");
                }

                // A bit reader positioned at the first bit of this channel's part2_3 data.
                let mut bs = BitReader::new(&main_data[byte_index.min(main_data.len())..]);

                let bit_index = (part2_3_begin & 0x7) as u32;
                if bit_index > 0 {
                    bs.ignore_bits(bit_index);
                }

                // Read the scale factors (part2), counting the bits consumed by them.
                let part2_start = bs.position();

                if header.is_mpeg1() {
                    bitstream::read_scale_factors_mpeg1(&mut bs, gr, ch, frame_data);
                }
                else {
                    bitstream::read_scale_factors_mpeg2(
                        &mut bs,
                        ch > 0 && header.is_intensity_stereo(),
                        &mut frame_data.granules[gr].channels[ch],
                    );
                }

                let part2_len = (bs.position() - part2_start) as u32;

                // The scale factors may not consume more bits than the whole of part2_3.
                if part2_len > part2_3_length {
                    return decode_error("mpa: part2_3_length is not valid");
                }

                // The remaining bits hold the Huffman coded samples (part3).
                let part3_len = part2_3_length - part2_len;

                let channel_data = &frame_data.granules[gr].channels[ch];
                let xr = &mut pipeline.fill.as_mut().unwrap().bufs.xr[gr];

                let rzero = huffman::read_huffman_samples(&mut bs, channel_data, part3_len, pow43, xr);

                frame_data.granules[gr].channels[ch].rzero = rzero;

                part2_3_begin += part2_3_length as usize;
            }
        }

        Ok((part2_3_begin + 7) >> 3)
    }
}
