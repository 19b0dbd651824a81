// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `vbr` module reads the optional variable bit-rate metadata stored in the first frame of a
//! stream: the Xing/Info and VBRI headers, and the LAME extension trailing a Xing/Info header.
//!
//! Everything here is advisory. A frame carrying a VBR tag has an all-zero side information
//! region, so even a decoder that ignores the tag decodes it as a silent frame; conversely, a
//! malformed tag must never fail frame decoding. All parse failures therefore degrade to `None`
//! or to partially filled metadata.

use bitflags::bitflags;
use log::debug;

use crate::common::FrameHeader;

bitflags! {
    /// Field-presence flags of the Xing/Info header.
    struct XingFlags: u32 {
        const FRAMES  = 0x1;
        const BYTES   = 0x2;
        const TOC     = 0x4;
        const QUALITY = 0x8;
    }
}

/// The tag signature a VBR header was recognized by.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VbrTag {
    /// "Xing": written by VBR encodes.
    Xing,
    /// "Info": the same layout as Xing, written by CBR encodes.
    Info,
    /// "VBRI": written by the Fraunhofer encoder.
    Vbri,
}

/// The bit-rate discipline reported by the LAME extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitrateMode {
    /// Constant bit-rate at the given bits per second.
    Cbr(u32),
    /// Average bit-rate targeting the given bits per second.
    Abr(u32),
    /// Variable bit-rate; the minimum bit-rate is given if the encoder recorded one.
    Vbr(Option<u32>),
    Unknown,
}

/// Variable bit-rate metadata parsed from the first frame.
#[derive(Debug)]
pub struct VbrInfo {
    pub tag: VbrTag,
    /// Total number of frames in the track.
    pub frames: Option<u64>,
    /// Total number of audio bytes in the track.
    pub bytes: Option<u64>,
    /// The table of contents for proportional seeking: `toc_entries` entries of `toc_entry_len`
    /// bytes each, scaled by `toc_factor`.
    pub toc: Option<Box<[u8]>>,
    pub toc_entries: u16,
    pub toc_entry_len: u16,
    pub toc_factor: u16,
    /// Encoder quality indicator, 0..100.
    pub quality: Option<u32>,
    /// The encoder version string of the LAME extension, e.g. "LAME3.100".
    pub encoder: Option<String>,
    pub bitrate_mode: BitrateMode,
    /// Lowpass filter cutoff in Hz.
    pub lowpass: Option<u32>,
    /// Peak signal amplitude relative to full scale.
    pub peak: Option<f32>,
}

fn read_be_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_be_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Probe the first frame of a stream for a VBR header. `frame` must hold the frame's full
/// `header.frame_size` bytes, starting at the header word. Returns `None` if the frame is a
/// regular audio frame.
pub fn try_read(header: &FrameHeader, frame: &[u8]) -> Option<VbrInfo> {
    if frame.len() < header.frame_size {
        return None;
    }

    // A frame carrying a VBR tag has an all-zero side information region. A regular audio frame
    // virtually never does, so a single non-zero byte rules the tag out cheaply.
    let crc_len = if header.has_crc { 2 } else { 0 };
    let side_info_start = 4 + crc_len;
    let side_info_end = side_info_start + header.side_info_len();

    if frame.len() < side_info_end + 4 {
        return None;
    }
    if frame[side_info_start..side_info_end].iter().any(|&b| b != 0) {
        return None;
    }

    let body = &frame[..header.frame_size];
    let mut off = side_info_end;

    let mut info = match &body[off..off + 4] {
        b"Xing" | b"Info" => {
            let tag = if &body[off..off + 4] == b"Xing" { VbrTag::Xing } else { VbrTag::Info };
            read_xing(tag, body, &mut off)?
        }
        b"VBRI" => read_vbri(body, &mut off)?,
        _ => return None,
    };

    debug!(
        "mpa: {:?} header, frames={:?}, bytes={:?}, toc={}",
        info.tag,
        info.frames,
        info.bytes,
        info.toc.is_some()
    );

    // A Xing/Info header may be followed by the 36-byte LAME extension. It is purely
    // informational; when absent or malformed the bit-rate discipline is simply left unknown.
    if info.tag != VbrTag::Vbri {
        read_lame_extension(header, body, off, &mut info);
    }

    Some(info)
}

fn read_xing(tag: VbrTag, body: &[u8], off: &mut usize) -> Option<VbrInfo> {
    // Tag (4) + flags (4) + up-to four optional fields.
    if body.len() < *off + 8 {
        return None;
    }

    let flags = XingFlags::from_bits_truncate(read_be_u32(body, *off + 4));
    *off += 8;

    let mut info = VbrInfo {
        tag,
        frames: None,
        bytes: None,
        toc: None,
        toc_entries: 0,
        toc_entry_len: 0,
        toc_factor: 0,
        quality: None,
        encoder: None,
        bitrate_mode: BitrateMode::Unknown,
        lowpass: None,
        peak: None,
    };

    if flags.contains(XingFlags::FRAMES) {
        if body.len() < *off + 4 {
            return Some(info);
        }
        info.frames = Some(u64::from(read_be_u32(body, *off)));
        *off += 4;
    }

    if flags.contains(XingFlags::BYTES) {
        if body.len() < *off + 4 {
            return Some(info);
        }
        info.bytes = Some(u64::from(read_be_u32(body, *off)));
        *off += 4;
    }

    if flags.contains(XingFlags::TOC) {
        if body.len() < *off + 100 {
            return Some(info);
        }
        // 100 single-byte entries spanning the track proportionally.
        info.toc = Some(Box::from(&body[*off..*off + 100]));
        info.toc_entries = 100;
        info.toc_entry_len = 1;
        info.toc_factor = 1;
        *off += 100;
    }

    if flags.contains(XingFlags::QUALITY) {
        if body.len() < *off + 4 {
            return Some(info);
        }
        info.quality = Some(read_be_u32(body, *off));
        *off += 4;
    }

    Some(info)
}

fn read_vbri(body: &[u8], off: &mut usize) -> Option<VbrInfo> {
    // Tag (4) + version (2) + delay (2) + quality (2) + bytes (4) + frames (4)
    // + toc entries (2) + toc scale factor (2) + toc entry size (2) + frames per entry (2).
    if body.len() < *off + 26 {
        return None;
    }

    let quality = u32::from(read_be_u16(body, *off + 8));
    let bytes = u64::from(read_be_u32(body, *off + 10));
    let frames = u64::from(read_be_u32(body, *off + 14));
    let toc_entries = read_be_u16(body, *off + 18);
    let toc_factor = read_be_u16(body, *off + 20);
    let toc_entry_len = read_be_u16(body, *off + 22);

    *off += 26;

    let toc_len = usize::from(toc_entries) * usize::from(toc_entry_len);
    let toc = if toc_len > 0 && body.len() >= *off + toc_len {
        let toc = Box::from(&body[*off..*off + toc_len]);
        *off += toc_len;
        Some(toc)
    }
    else {
        None
    };

    Some(VbrInfo {
        tag: VbrTag::Vbri,
        frames: Some(frames),
        bytes: Some(bytes),
        toc,
        toc_entries,
        toc_entry_len,
        toc_factor,
        quality: Some(quality),
        encoder: None,
        bitrate_mode: BitrateMode::Unknown,
        lowpass: None,
        peak: None,
    })
}

/// Probe for the 36-byte LAME extension following a Xing/Info header:
/// encoder version (9) + revision/method (1) + lowpass (1) + replay gain (8) + flags (1)
/// + bit-rate (1) + delays (3) + misc (1) + mp3 gain (1) + surround (2) + length (4) + CRCs (4).
fn read_lame_extension(header: &FrameHeader, body: &[u8], mut off: usize, info: &mut VbrInfo) {
    if body.len() < off + 36 || body[off] == 0 {
        info.bitrate_mode = BitrateMode::Vbr(None);
        return;
    }

    let encoder: String = body[off..off + 9].iter().map(|&b| char::from(b)).collect();
    info.encoder = Some(encoder);
    off += 9;

    // 'Info Tag' revision (4 bits) + VBR method (4 bits).
    let vbr_method = body[off] & 0xf;
    off += 1;

    // Lowpass filter cutoff in units of 100 Hz.
    info.lowpass = Some(u32::from(body[off]) * 100);
    off += 1;

    // Replay gain: peak signal amplitude (4) + radio gain (2) + audiophile gain (2).
    let peak = f32::from_bits(read_be_u32(body, off));
    if peak.is_finite() {
        info.peak = Some(peak);
    }
    off += 8;

    // Encoding flags + ATH type.
    off += 1;

    // The ABR/CBR bit-rate, or the minimum bit-rate for VBR, in kbps. Saturated at 255.
    let kbps = u32::from(body[off]) * 1000;

    info.bitrate_mode = match vbr_method {
        1 | 8 => BitrateMode::Cbr(header.bitrate),
        2 | 9 => BitrateMode::Abr(kbps),
        _ if kbps == 0 => BitrateMode::Vbr(None),
        _ => BitrateMode::Vbr(Some(kbps)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_frame_header;

    fn stereo_mpeg1_frame() -> (FrameHeader, Vec<u8>) {
        // MPEG1 Layer III, 128 kbps, 44.1 kHz, stereo, no CRC: 417 bytes, 32 bytes side info.
        let word = 0xffe0_0000u32 | (0b11 << 19) | (0b01 << 17) | (1 << 16) | (9 << 12);
        let header = parse_frame_header(word).unwrap();
        let mut frame = vec![0u8; header.frame_size];
        frame[..4].copy_from_slice(&word.to_be_bytes());
        (header, frame)
    }

    #[test]
    fn verify_xing_header() {
        let (header, mut frame) = stereo_mpeg1_frame();
        let off = 4 + header.side_info_len();

        frame[off..off + 4].copy_from_slice(b"Xing");
        frame[off + 4..off + 8].copy_from_slice(&0x7u32.to_be_bytes()); // frames | bytes | toc
        frame[off + 8..off + 12].copy_from_slice(&1000u32.to_be_bytes());
        frame[off + 12..off + 16].copy_from_slice(&417_000u32.to_be_bytes());
        for (i, b) in frame[off + 16..off + 116].iter_mut().enumerate() {
            *b = i as u8;
        }

        let info = try_read(&header, &frame).expect("xing tag");
        assert_eq!(info.tag, VbrTag::Xing);
        assert_eq!(info.frames, Some(1000));
        assert_eq!(info.bytes, Some(417_000));
        assert_eq!(info.toc.as_ref().map(|toc| toc.len()), Some(100));
        // No LAME extension present.
        assert_eq!(info.bitrate_mode, BitrateMode::Vbr(None));
        assert_eq!(info.encoder, None);
    }

    #[test]
    fn verify_vbri_header() {
        let (header, mut frame) = stereo_mpeg1_frame();
        let off = 4 + header.side_info_len();

        frame[off..off + 4].copy_from_slice(b"VBRI");
        frame[off + 8..off + 10].copy_from_slice(&80u16.to_be_bytes());
        frame[off + 10..off + 14].copy_from_slice(&417_000u32.to_be_bytes());
        frame[off + 14..off + 18].copy_from_slice(&1000u32.to_be_bytes());

        let info = try_read(&header, &frame).expect("vbri tag");
        assert_eq!(info.tag, VbrTag::Vbri);
        assert_eq!(info.frames, Some(1000));
        assert_eq!(info.bytes, Some(417_000));
        assert_eq!(info.quality, Some(80));
        assert!(info.toc.is_none());
    }

    #[test]
    fn verify_audio_frame_is_not_a_tag() {
        let (header, mut frame) = stereo_mpeg1_frame();
        // A single non-zero side info byte disqualifies the frame.
        frame[10] = 0x40;
        frame[40..44].copy_from_slice(b"Xing");
        assert!(try_read(&header, &frame).is_none());
    }

    #[test]
    fn verify_lame_extension() {
        let (header, mut frame) = stereo_mpeg1_frame();
        let off = 4 + header.side_info_len();

        frame[off..off + 4].copy_from_slice(b"Info");
        frame[off + 4..off + 8].copy_from_slice(&0x1u32.to_be_bytes()); // frames only
        frame[off + 8..off + 12].copy_from_slice(&500u32.to_be_bytes());

        let lame = off + 12;
        frame[lame..lame + 9].copy_from_slice(b"LAME3.100");
        frame[lame + 9] = 0x01; // rev 0, method 1 (CBR)
        frame[lame + 10] = 180; // lowpass, x100 Hz

        let info = try_read(&header, &frame).expect("info tag");
        assert_eq!(info.encoder.as_deref(), Some("LAME3.100"));
        assert_eq!(info.bitrate_mode, BitrateMode::Cbr(128_000));
        assert_eq!(info.lowpass, Some(18_000));
    }

    #[test]
    fn verify_truncated_tag_is_harmless() {
        let (header, mut frame) = stereo_mpeg1_frame();
        let off = 4 + header.side_info_len();

        // Claim a TOC but truncate the frame before it: the parser must degrade, not fail.
        frame[off..off + 4].copy_from_slice(b"Xing");
        frame[off + 4..off + 8].copy_from_slice(&0x4u32.to_be_bytes());
        let truncated = &frame[..off + 20];

        assert!(try_read(&header, truncated).is_none());

        let info = try_read(&header, &frame).expect("toc fits in a full frame");
        assert_eq!(info.toc.as_ref().map(|toc| toc.len()), Some(100));
    }
}
