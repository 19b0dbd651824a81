// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cadenza_core::audio::{OutputBuffer, PcmSink};
use cadenza_core::errors::{end_of_stream_error, Result};
use cadenza_core::io::ByteSource;

use log::{debug, warn};

use crate::common::FrameHeader;
use crate::header::{
    FrameSync, SyncOutcome, TrackInfo, MAX_MPEG_FRAME_LEN, MAX_RESYNC_BYTES, MPEG_HEADER_LEN,
};
use crate::layer1::Layer1;
use crate::layer2::Layer2;
use crate::layer3::Layer3;
use crate::vbr;
use crate::vbr::VbrInfo;
use crate::MpegLayer;

/// The scan buffer length. Must hold at least one maximum-length frame plus the following frame
/// header for the synchronization cross-check.
const SCAN_BUF_LEN: usize = 8192;

const _: () = assert!(SCAN_BUF_LEN >= MAX_MPEG_FRAME_LEN + 2 * MPEG_HEADER_LEN);

/// The number of PCM frames buffered before a write to the sink.
const OUTPUT_BUF_FRAMES: usize = 4;

/// A cloneable handle that requests a running [`Decoder`] to stop decoding. The decoder checks
/// the flag between frames, so a stop takes effect promptly without interrupting a write.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request the decoder to stop after the current frame.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The per-layer decode state, selected once per track from the first confirmed frame header.
enum LayerDecoder {
    Layer1(Layer1),
    Layer2(Layer2),
    Layer3(Box<Layer3>),
}

impl LayerDecoder {
    fn new(header: &FrameHeader) -> LayerDecoder {
        match header.layer {
            MpegLayer::Layer1 => LayerDecoder::Layer1(Layer1::new()),
            MpegLayer::Layer2 => LayerDecoder::Layer2(Layer2::new()),
            MpegLayer::Layer3 => LayerDecoder::Layer3(Box::new(Layer3::new(header))),
        }
    }

    fn decode_frame(
        &mut self,
        header: &FrameHeader,
        body: &[u8],
        out: &mut OutputBuffer,
        sink: &mut dyn PcmSink,
    ) -> Result<()> {
        match self {
            LayerDecoder::Layer1(layer) => layer.decode_frame(header, body, out, sink),
            LayerDecoder::Layer2(layer) => layer.decode_frame(header, body, out, sink),
            LayerDecoder::Layer3(layer) => layer.decode_frame(header, body, out, sink),
        }
    }

    fn finish(&mut self, out: &mut OutputBuffer, sink: &mut dyn PcmSink) -> Result<()> {
        match self {
            // Layers 1 and 2 synthesize inline and hold no in-flight frames.
            LayerDecoder::Layer1(_) | LayerDecoder::Layer2(_) => Ok(()),
            LayerDecoder::Layer3(layer) => layer.finish(out, sink),
        }
    }
}

/// A streaming MPEG-1/2/2.5 audio Layer I/II/III decoder.
///
/// The decoder pulls compressed bytes from a [`ByteSource`], synchronizes to frame boundaries,
/// and decodes frame-by-frame into a [`PcmSink`]. A leading ID3v2 tag is skipped by its declared
/// size without being parsed. The first confirmed frame fixes the track parameters (version,
/// layer, sample rate) and is probed for a VBR header.
pub struct Decoder<S: ByteSource> {
    source: S,
    buf: Box<[u8]>,
    /// Offset of the current frame header within `buf`.
    pos: usize,
    /// End of the valid bytes within `buf`.
    end: usize,
    sync: FrameSync,
    header: FrameHeader,
    track: TrackInfo,
    frame_index: u64,
    stop: Arc<AtomicBool>,
}

impl<S: ByteSource> Decoder<S> {
    /// Open a stream: locate and confirm the first audio frame and derive the track totals from
    /// the source length.
    pub fn new(source: S) -> Result<Decoder<S>> {
        Decoder::with_duration_hint(source, None)
    }

    /// Open a stream as [`Decoder::new`], with an externally known play time in seconds to fall
    /// back on when the source length is unknown (for example, a radio stream of known program
    /// length).
    pub fn with_duration_hint(mut source: S, duration_hint: Option<f64>) -> Result<Decoder<S>> {
        let mut buf = vec![0u8; SCAN_BUF_LEN].into_boxed_slice();

        let mut end = fill(&mut source, &mut buf, 0)?;
        if end <= MPEG_HEADER_LEN {
            return end_of_stream_error();
        }

        // Skip a leading ID3v2 tag by its declared size. The tag contents are not parsed; they
        // are a collaborator's concern. Skipping matters because large tags (embedded artwork)
        // can exceed the resynchronization byte budget.
        let mut pos = 0;
        let mut tag_len = 0u64;

        if let Some(id3v2_len) = id3v2_tag_len(&buf[..end]) {
            tag_len = id3v2_len;
            debug!("mpa: skipping {} byte ID3v2 tag", id3v2_len);

            if (id3v2_len as usize) < end {
                pos = id3v2_len as usize;
            }
            else {
                // The tag extends past the buffer: reposition the source just after it.
                let mut remaining = id3v2_len - end as u64;
                if !source.seek(id3v2_len) {
                    // Non-seekable source: discard forward.
                    while remaining > 0 {
                        let len = remaining.min(buf.len() as u64) as usize;
                        let read = source.read(&mut buf[..len])?;
                        if read == 0 {
                            return end_of_stream_error();
                        }
                        remaining -= read as u64;
                    }
                }
                end = fill(&mut source, &mut buf, 0)?;
                pos = 0;
            }
        }

        // Locate and confirm the first frame.
        let mut sync = FrameSync::new();

        let header =
            match advance_to_frame(&mut source, &mut sync, &mut buf, &mut pos, &mut end)? {
                Some(header) => header,
                None => return end_of_stream_error(),
            };

        // Probe the first frame for a VBR header and derive the track totals.
        let vbr = vbr::try_read(&header, &buf[pos..pos + header.frame_size]);

        let media_len = source.byte_len().map(|len| len.saturating_sub(tag_len));
        let track = TrackInfo::compute(&header, media_len, duration_hint, vbr);

        Ok(Decoder {
            source,
            buf,
            pos,
            end,
            sync,
            header,
            track,
            frame_index: 0,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The header of the first confirmed frame: the track's version, layer, sample rate, and
    /// channel configuration.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The track totals derived from the first frame, the source length, and the VBR tag.
    pub fn track_info(&self) -> &TrackInfo {
        &self.track
    }

    /// The VBR metadata of the stream, if the first frame carried a VBR header.
    pub fn vbr_info(&self) -> Option<&VbrInfo> {
        self.track.vbr.as_ref()
    }

    /// The number of frames decoded so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The play time decoded so far, in seconds.
    pub fn elapsed(&self) -> f64 {
        self.frame_index as f64 * self.track.frame_duration
    }

    /// A handle that can stop a running [`Decoder::decode`] from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Decode the whole track into `sink`.
    ///
    /// Decoding runs until end-of-stream or until a [`StopHandle`] fires. Frames that fail to
    /// decode are skipped and logged; only I/O failures abort the run. The sink is flushed and
    /// drained before returning, but not closed.
    pub fn decode<W: PcmSink>(&mut self, sink: &mut W) -> Result<()> {
        let mut layer = LayerDecoder::new(&self.header);
        let mut out =
            OutputBuffer::new(self.header.n_channels(), OUTPUT_BUF_FRAMES * self.header.pcm_frame_len());

        loop {
            if self.stop.load(Ordering::Acquire) {
                debug!("mpa: decode stopped at frame {}", self.frame_index);
                break;
            }

            let header = self.header.clone();
            let frame_end = self.pos + header.frame_size;
            let body = &self.buf[self.pos + MPEG_HEADER_LEN..frame_end];

            // A rejected frame (reserved field combination, reservoir inconsistency) is skipped
            // in its entirety; scanning resumes at the next header.
            if let Err(e) = layer.decode_frame(&header, body, &mut out, &mut *sink) {
                warn!("mpa: dropping frame {}: {}", self.frame_index, e);
            }

            self.frame_index += 1;
            self.pos = frame_end;

            match self.next_frame()? {
                Some(header) => self.header = header,
                None => break,
            }
        }

        layer.finish(&mut out, &mut *sink)?;
        out.flush(&mut *sink)?;

        Ok(())
    }

    /// Advance to the next frame header, refilling the scan buffer from the source as needed.
    /// Returns `None` at end-of-stream, including when the resynchronization byte budget is
    /// exhausted without finding a valid frame.
    fn next_frame(&mut self) -> Result<Option<FrameHeader>> {
        advance_to_frame(&mut self.source, &mut self.sync, &mut self.buf, &mut self.pos, &mut self.end)
    }
}

/// Scan for the next frame starting at `buf[*pos..*end]`, refilling the buffer from `source`
/// whenever the synchronizer runs out of bytes. On success `*pos` addresses the frame header and
/// the entire frame is buffered. Returns `None` at end-of-stream or once the resynchronization
/// byte budget is spent without locating a valid frame.
fn advance_to_frame<S: ByteSource>(
    source: &mut S,
    sync: &mut FrameSync,
    buf: &mut [u8],
    pos: &mut usize,
    end: &mut usize,
) -> Result<Option<FrameHeader>> {
    // Counts the bytes pulled from the source while synchronization is failing. The hunt is
    // bounded at 64 KiB before the stream is declared exhausted.
    let mut hunted = 0usize;

    loop {
        match sync.find(buf, *pos, *end) {
            SyncOutcome::Frame(frame) => {
                *pos = frame.pos;
                return Ok(Some(frame.header));
            }
            SyncOutcome::NeedData { restart } => {
                // Preserve the unconsumed tail, then refill behind it.
                let tail = *end - restart;
                buf.copy_within(restart..*end, 0);
                *pos = 0;
                *end = tail;

                let read = fill(source, buf, tail)? - tail;

                if read == 0 {
                    // A truncated trailing frame cannot be completed; the stream ends here.
                    return Ok(None);
                }

                *end += read;

                hunted += read;
                if hunted > MAX_RESYNC_BYTES {
                    warn!("mpa: no frame within the resync byte budget, stream exhausted");
                    return Ok(None);
                }
            }
        }
    }
}

/// Read from `source` until `buf` is full or the source is exhausted. Returns the new end of
/// valid data given that `buf[..from]` already holds valid bytes.
fn fill<S: ByteSource>(source: &mut S, buf: &mut [u8], from: usize) -> Result<usize> {
    let mut end = from;

    while end < buf.len() {
        let read = source.read(&mut buf[end..])?;
        if read == 0 {
            break;
        }
        end += read;
    }

    Ok(end)
}

/// If `buf` starts with an ID3v2 tag, returns the total tag length in bytes: the 10-byte header,
/// the sync-safe payload size, and the optional 10-byte footer.
fn id3v2_tag_len(buf: &[u8]) -> Option<u64> {
    if buf.len() < 10 || &buf[..3] != b"ID3" {
        return None;
    }

    // Sync-safe size: 4 bytes of 7 bits each.
    if buf[6..10].iter().any(|&b| b & 0x80 != 0) {
        return None;
    }

    let size = buf[6..10].iter().fold(0u64, |size, &b| (size << 7) | u64::from(b & 0x7f));

    // Bit 4 of the flags byte indicates a footer.
    let footer = if buf[5] & 0x10 != 0 { 10 } else { 0 };

    Some(10 + size + footer)
}

#[cfg(test)]
mod tests {
    use super::id3v2_tag_len;

    #[test]
    fn verify_id3v2_tag_len() {
        // "ID3", v2.4.0, no flags, sync-safe size 0x0153 = 211 bytes.
        let tag = [b'I', b'D', b'3', 4, 0, 0, 0x00, 0x00, 0x01, 0x53];
        assert_eq!(id3v2_tag_len(&tag), Some(10 + 211));

        // With the footer flag set, 10 more bytes trail the payload.
        let tag = [b'I', b'D', b'3', 4, 0, 0x10, 0x00, 0x00, 0x01, 0x53];
        assert_eq!(id3v2_tag_len(&tag), Some(10 + 211 + 10));

        // A non-sync-safe size byte disqualifies the header.
        let tag = [b'I', b'D', b'3', 4, 0, 0, 0x80, 0x00, 0x00, 0x00];
        assert_eq!(id3v2_tag_len(&tag), None);

        assert_eq!(id3v2_tag_len(b"not an id3 tag"), None);
    }
}
