// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decode an MPEG audio file to a WAV file:
//!
//! ```text
//! cargo run --example decode-wav -- input.mp3 output.wav
//! ```

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

use cadenza_core::audio::PcmSink;
use cadenza_mpa::Decoder;

/// A PCM sink writing a WAV file. The RIFF sizes are patched in on close.
struct WavSink {
    file: File,
    data_len: u32,
}

impl WavSink {
    fn create(path: &str, sample_rate: u32, channels: u16) -> io::Result<WavSink> {
        let mut file = File::create(path)?;

        let block_align = 2 * channels;
        let byte_rate = sample_rate * u32::from(block_align);

        file.write_all(b"RIFF\0\0\0\0WAVEfmt ")?;
        file.write_all(&16u32.to_le_bytes())?;
        file.write_all(&1u16.to_le_bytes())?; // PCM
        file.write_all(&channels.to_le_bytes())?;
        file.write_all(&sample_rate.to_le_bytes())?;
        file.write_all(&byte_rate.to_le_bytes())?;
        file.write_all(&block_align.to_le_bytes())?;
        file.write_all(&16u16.to_le_bytes())?; // bits per sample
        file.write_all(b"data\0\0\0\0")?;

        Ok(WavSink { file, data_len: 0 })
    }
}

impl PcmSink for WavSink {
    fn write(&mut self, pcm: &[u8]) -> io::Result<usize> {
        self.file.write_all(pcm)?;
        self.data_len += pcm.len() as u32;
        Ok(pcm.len())
    }

    fn drain(&mut self) {
        let _ = self.file.flush();
    }

    fn close(&mut self) {
        let riff_len = 36 + self.data_len;
        let _ = self.file.seek(SeekFrom::Start(4));
        let _ = self.file.write_all(&riff_len.to_le_bytes());
        let _ = self.file.seek(SeekFrom::Start(40));
        let _ = self.file.write_all(&self.data_len.to_le_bytes());
    }
}

fn main() {
    let mut args = std::env::args().skip(1);
    let (input, output) = match (args.next(), args.next()) {
        (Some(input), Some(output)) => (input, output),
        _ => {
            eprintln!("usage: decode-wav <input.mp3> <output.wav>");
            std::process::exit(1);
        }
    };

    let source = File::open(&input).expect("failed to open input");
    let mut decoder = Decoder::new(source).expect("failed to open stream");

    let header = decoder.header();
    eprintln!(
        "{:?} layer {:?}, {} Hz, {} kbps, {} channel(s), ~{:.1}s",
        header.version,
        header.layer,
        header.sample_rate,
        header.bitrate / 1000,
        header.n_channels(),
        decoder.track_info().duration,
    );

    if let Some(vbr) = decoder.vbr_info() {
        eprintln!("vbr: {:?} header, {:?} frames, {:?}", vbr.tag, vbr.frames, vbr.bitrate_mode);
    }

    let mut sink = WavSink::create(&output, header.sample_rate, header.n_channels() as u16)
        .expect("failed to create output");

    decoder.decode(&mut sink).expect("decode failed");
    sink.close();

    eprintln!("decoded {} frames ({:.1}s)", decoder.frame_index(), decoder.elapsed());
}
