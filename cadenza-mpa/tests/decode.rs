// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end decoding tests over synthesized bitstreams.
//!
//! The streams below are valid, minimal frames: correct headers and frame sizes with silent
//! payloads. They exercise synchronization, frame sizing, the decode pipeline, and the error
//! recovery policy without needing fixture files.

use std::io;

use cadenza_core::audio::VecSink;
use cadenza_core::io::{ByteSource, MemorySource};
use cadenza_mpa::{Decoder, MpegLayer};

/// MPEG1 Layer III, 128 kbps, 44.1 kHz, stereo, no CRC: 417 byte frames, 1152 samples each.
const L3_STEREO_44K1_128K: u32 = 0xfffb_9000;

/// MPEG1 Layer III, 128 kbps, 44.1 kHz, mono.
const L3_MONO_44K1_128K: u32 = 0xfffb_90c0;

/// MPEG1 Layer II, 256 kbps, 44.1 kHz, stereo.
const L2_STEREO_44K1_256K: u32 = 0xfffd_c000;

/// MPEG1 Layer I, 32 kbps, 44.1 kHz, mono.
const L1_MONO_44K1_32K: u32 = 0xffff_10c0;

/// Frame length in bytes for a header word, per the ISO size formulas.
fn frame_len(word: u32) -> usize {
    let bitrate_idx = ((word >> 12) & 0xf) as usize;
    match (word >> 17) & 0x3 {
        // Layer I
        0b11 => {
            const KBPS: [usize; 15] =
                [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
            4 * (12 * KBPS[bitrate_idx] * 1000 / 44100)
        }
        // Layer II
        0b10 => {
            const KBPS: [usize; 15] =
                [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
            144 * KBPS[bitrate_idx] * 1000 / 44100
        }
        // Layer III
        _ => {
            const KBPS: [usize; 15] =
                [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
            144 * KBPS[bitrate_idx] * 1000 / 44100
        }
    }
}

/// Build a stream of `n` silent frames for the given header word.
fn silent_stream(word: u32, n: usize) -> Vec<u8> {
    let len = frame_len(word);
    let mut stream = Vec::with_capacity(n * len);

    for _ in 0..n {
        stream.extend_from_slice(&word.to_be_bytes());
        stream.resize(stream.len() + len - 4, 0);
    }

    stream
}

/// A byte source that serves reads in fixed-size chunks, exercising arbitrary read boundaries.
struct ChunkedSource {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl ByteSource for ChunkedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let len = remaining.len().min(buf.len()).min(self.chunk);
        buf[..len].copy_from_slice(&remaining[..len]);
        self.pos += len;
        Ok(len)
    }

    fn seek(&mut self, _pos: u64) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn decode_all<S: ByteSource>(source: S) -> (u64, Vec<u8>) {
    let mut decoder = Decoder::new(source).expect("open stream");
    let mut sink = VecSink::new();
    decoder.decode(&mut sink).expect("decode stream");
    (decoder.frame_index(), sink.into_inner())
}

#[test]
fn decode_silent_layer3_stereo_stream() {
    let stream = silent_stream(L3_STEREO_44K1_128K, 10);
    assert_eq!(stream.len(), 10 * 417);

    let source = MemorySource::new(stream);
    let mut decoder = Decoder::new(source).expect("open stream");

    let header = decoder.header();
    assert_eq!(header.layer, MpegLayer::Layer3);
    assert_eq!(header.sample_rate, 44_100);
    assert_eq!(header.bitrate, 128_000);
    assert_eq!(header.n_channels(), 2);
    assert_eq!(header.frame_size, 417);
    assert_eq!(header.samples_per_frame(), 1152);

    let mut sink = VecSink::new();
    decoder.decode(&mut sink).expect("decode stream");

    // 10 frames of 1152 samples, 2 channels, 2 bytes per sample, all silent.
    assert_eq!(decoder.frame_index(), 10);
    assert_eq!(sink.data().len(), 10 * 1152 * 2 * 2);
    assert!(sink.data().iter().all(|&b| b == 0));
}

#[test]
fn decode_silent_layer3_mono_stream() {
    let stream = silent_stream(L3_MONO_44K1_128K, 6);
    let (frames, pcm) = decode_all(MemorySource::new(stream));

    assert_eq!(frames, 6);
    assert_eq!(pcm.len(), 6 * 1152 * 2);
}

#[test]
fn decode_silent_layer2_stream() {
    let stream = silent_stream(L2_STEREO_44K1_256K, 5);
    let source = MemorySource::new(stream);
    let mut decoder = Decoder::new(source).expect("open stream");

    assert_eq!(decoder.header().layer, MpegLayer::Layer2);
    assert_eq!(decoder.header().samples_per_frame(), 1152);

    let mut sink = VecSink::new();
    decoder.decode(&mut sink).expect("decode stream");

    assert_eq!(decoder.frame_index(), 5);
    assert_eq!(sink.data().len(), 5 * 1152 * 2 * 2);
}

#[test]
fn decode_silent_layer1_stream() {
    let stream = silent_stream(L1_MONO_44K1_32K, 5);
    let source = MemorySource::new(stream);
    let mut decoder = Decoder::new(source).expect("open stream");

    assert_eq!(decoder.header().layer, MpegLayer::Layer1);
    assert_eq!(decoder.header().samples_per_frame(), 384);

    let mut sink = VecSink::new();
    decoder.decode(&mut sink).expect("decode stream");

    assert_eq!(decoder.frame_index(), 5);
    assert_eq!(sink.data().len(), 5 * 384 * 2);
}

#[test]
fn synchronization_is_chunking_invariant() {
    // Feeding the same bytes with arbitrary read-chunk boundaries must produce the identical
    // frame sequence and PCM.
    let stream = silent_stream(L3_STEREO_44K1_128K, 8);

    let (frames_whole, pcm_whole) = decode_all(MemorySource::new(stream.clone()));

    for chunk in [1, 7, 417, 1000] {
        let source = ChunkedSource { data: stream.clone(), pos: 0, chunk };
        let (frames, pcm) = decode_all(source);

        assert_eq!(frames, frames_whole, "chunk size {}", chunk);
        assert_eq!(pcm, pcm_whole, "chunk size {}", chunk);
    }
}

#[test]
fn decoding_is_deterministic() {
    // Two decodes of the same input, each spinning up its own synthesis workers, must produce
    // byte-identical PCM regardless of scheduling.
    let stream = silent_stream(L3_STEREO_44K1_128K, 16);

    let (_, pcm_a) = decode_all(MemorySource::new(stream.clone()));
    let (_, pcm_b) = decode_all(MemorySource::new(stream));

    assert_eq!(pcm_a, pcm_b);
}

#[test]
fn corrupt_middle_frame_is_skipped() {
    // Corrupt one frame in the middle of the stream. The decoder must resynchronize within the
    // skip budget and decode every valid frame before and after: at least total - 1 frames, and
    // it must terminate.
    let mut stream = silent_stream(L3_STEREO_44K1_128K, 20);

    let corrupt_start = 10 * 417;
    for b in stream[corrupt_start..corrupt_start + 417].iter_mut() {
        *b = 0xaa;
    }

    let (frames, _) = decode_all(MemorySource::new(stream));
    assert!(frames >= 19, "decoded only {} frames", frames);
}

#[test]
fn garbage_prefix_is_scanned_past() {
    let mut stream = vec![0x55u8; 300];
    stream.extend_from_slice(&silent_stream(L3_STEREO_44K1_128K, 4));

    let (frames, _) = decode_all(MemorySource::new(stream));
    assert_eq!(frames, 4);
}

#[test]
fn pure_garbage_stream_is_rejected_within_budget() {
    // A stream with no valid frames must be rejected, not spun on forever. 0xff bytes look like
    // eternal sync words, which is the worst case for the scanner.
    let stream = vec![0xffu8; 200_000];

    assert!(Decoder::new(MemorySource::new(stream)).is_err());
}

#[test]
fn id3v2_tag_is_skipped() {
    // A 2000-byte ID3v2 tag precedes the audio. The tag is skipped by its declared size, not
    // scanned through.
    let payload_len = 2000u32;
    let mut stream = vec![b'I', b'D', b'3', 3, 0, 0];
    for shift in [21, 14, 7, 0] {
        stream.push(((payload_len >> shift) & 0x7f) as u8);
    }
    stream.resize(10 + payload_len as usize, 0x01);
    stream.extend_from_slice(&silent_stream(L3_STEREO_44K1_128K, 4));

    let (frames, pcm) = decode_all(MemorySource::new(stream));
    assert_eq!(frames, 4);
    assert_eq!(pcm.len(), 4 * 1152 * 2 * 2);
}

#[test]
fn reservoir_underflow_decodes_to_silence() {
    // The first frame claims its main data begins 100 bytes before the stream start. The decoder
    // must decode the affected granules as silence and keep going, not abort.
    let mut stream = silent_stream(L3_STEREO_44K1_128K, 4);

    // main_data_begin is the first 9 bits of the side information.
    stream[4] = 100 >> 1;
    stream[5] = (100 & 0x1) << 7;

    let (frames, pcm) = decode_all(MemorySource::new(stream));
    assert_eq!(frames, 4);
    assert!(pcm.iter().all(|&b| b == 0));
}

#[test]
fn xing_tag_overrides_track_totals() {
    let mut stream = silent_stream(L3_STEREO_44K1_128K, 4);

    // Write a Xing header into the first frame: all-zero side info (already true), tag at
    // 4 + 32 bytes, frames flag set.
    let off = 4 + 32;
    stream[off..off + 4].copy_from_slice(b"Xing");
    stream[off + 4..off + 8].copy_from_slice(&1u32.to_be_bytes());
    stream[off + 8..off + 12].copy_from_slice(&1234u32.to_be_bytes());

    let decoder = Decoder::new(MemorySource::new(stream)).expect("open stream");

    let track = decoder.track_info();
    assert_eq!(track.track_frames, 1234);
    assert!(decoder.vbr_info().is_some());
    assert!((track.duration - 1234.0 * 1152.0 / 44100.0).abs() < 1e-6);
}

#[test]
fn track_totals_from_length_without_tag() {
    let stream = silent_stream(L3_STEREO_44K1_128K, 25);
    let decoder = Decoder::new(MemorySource::new(stream)).expect("open stream");

    let track = decoder.track_info();
    assert_eq!(track.track_frames, 25);
    assert!((track.frame_duration - 1152.0 / 44100.0).abs() < 1e-9);
    assert!(decoder.vbr_info().is_none());
}

#[test]
fn stop_handle_interrupts_decoding() {
    let stream = silent_stream(L3_STEREO_44K1_128K, 1000);
    let mut decoder = Decoder::new(MemorySource::new(stream)).expect("open stream");

    // Fire the stop before decoding starts: the loop must exit almost immediately.
    decoder.stop_handle().stop();

    let mut sink = VecSink::new();
    decoder.decode(&mut sink).expect("stopped decode is not an error");

    assert!(decoder.frame_index() < 2);
}
