//! Deterministic in-memory media, used by tests and the demo CLI.
//!
//! Frames and chunks are pattern-filled with their own unit index, so a
//! receiver can verify ordering and seek behavior from payload content
//! alone. The video "codec" tags each encoded frame with the active
//! quality level in its first byte; audio passes through untouched.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
use crate::media::{
    MediaDescriptor, MediaLibrary, MediaSource, PlaybackSink, Quality, UnitDecoder, UnitEncoder,
};

/// Sequentially-read video frame source.
pub struct SyntheticVideoSource {
    frames: u64,
    fps: u32,
    frame_len: usize,
    cursor: u64,
}

impl SyntheticVideoSource {
    pub fn new(frames: u64, fps: u32, frame_len: usize) -> Self {
        Self {
            frames,
            fps,
            frame_len,
            cursor: 0,
        }
    }
}

impl MediaSource for SyntheticVideoSource {
    fn total_units(&self) -> u64 {
        self.frames
    }

    fn frame_rate(&self) -> f64 {
        self.fps as f64
    }

    fn read_next(&mut self) -> Option<Vec<u8>> {
        if self.cursor >= self.frames {
            return None;
        }
        let frame = vec![(self.cursor % 251) as u8; self.frame_len];
        self.cursor += 1;
        Some(frame)
    }

    fn seek_to(&mut self, unit: u64) {
        self.cursor = unit.min(self.frames);
    }
}

/// Randomly-accessed audio chunk source; one chunk per video frame
/// period.
pub struct SyntheticAudioSource {
    chunks: u64,
    chunk_rate: f64,
    chunk_len: usize,
    cursor: u64,
}

impl SyntheticAudioSource {
    pub fn new(chunks: u64, chunk_rate: f64, chunk_len: usize) -> Self {
        Self {
            chunks,
            chunk_rate,
            chunk_len,
            cursor: 0,
        }
    }
}

impl MediaSource for SyntheticAudioSource {
    fn total_units(&self) -> u64 {
        self.chunks
    }

    fn frame_rate(&self) -> f64 {
        self.chunk_rate
    }

    fn read_next(&mut self) -> Option<Vec<u8>> {
        if self.cursor >= self.chunks {
            return None;
        }
        let chunk = vec![(self.cursor % 251) as u8; self.chunk_len];
        self.cursor += 1;
        Some(chunk)
    }

    fn seek_to(&mut self, unit: u64) {
        self.cursor = unit.min(self.chunks);
    }
}

/// Video "encoder" that prefixes each frame with the active quality
/// level, so tests can observe quality switches in the output.
pub struct TagEncoder {
    quality: Quality,
}

impl TagEncoder {
    pub fn new() -> Self {
        Self {
            quality: Quality::Hd,
        }
    }
}

impl Default for TagEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitEncoder for TagEncoder {
    fn encode(&mut self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + raw.len());
        out.push(self.quality.level());
        out.extend_from_slice(raw);
        Ok(out)
    }

    fn set_quality(&mut self, quality: Quality) {
        self.quality = quality;
    }
}

/// Counterpart of [`TagEncoder`]: strips the quality byte. Rejects
/// empty payloads as corrupt.
pub struct TagDecoder;

impl UnitDecoder for TagDecoder {
    fn decode(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        payload.split_first().map(|(_, rest)| rest.to_vec())
    }
}

/// Identity encoder for audio chunks.
pub struct PassthroughEncoder;

impl UnitEncoder for PassthroughEncoder {
    fn encode(&mut self, raw: &[u8]) -> Result<Vec<u8>> {
        if raw.is_empty() {
            return Err(StreamError::Encode("empty chunk".into()));
        }
        Ok(raw.to_vec())
    }
}

/// Identity decoder for audio chunks.
pub struct PassthroughDecoder;

impl UnitDecoder for PassthroughDecoder {
    fn decode(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        (!payload.is_empty()).then(|| payload.to_vec())
    }
}

/// Sink that retains every presented unit, for assertions.
#[derive(Clone, Default)]
pub struct CollectSink {
    units: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> Vec<Vec<u8>> {
        self.units.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }
}

impl PlaybackSink for CollectSink {
    fn present(&mut self, unit: &[u8]) {
        self.units.lock().push(unit.to_vec());
    }
}

/// Sink that drops everything.
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn present(&mut self, _unit: &[u8]) {}
}

/// Fixed catalog of identical synthetic resources.
pub struct SyntheticLibrary {
    catalog: Vec<String>,
    frames: u64,
    fps: u32,
    audio_rate: u32,
    frame_len: usize,
    chunk_len: usize,
}

impl SyntheticLibrary {
    pub fn new(catalog: Vec<String>, frames: u64, fps: u32) -> Self {
        Self {
            catalog,
            frames,
            fps,
            audio_rate: 44100,
            frame_len: 2048,
            chunk_len: 1024,
        }
    }

    /// Override the synthetic frame payload size (e.g. to force
    /// multi-fragment frames).
    pub fn with_frame_len(mut self, frame_len: usize) -> Self {
        self.frame_len = frame_len;
        self
    }

    fn check(&self, resource: &str) -> Result<()> {
        if self.catalog.iter().any(|name| name == resource) {
            Ok(())
        } else {
            Err(StreamError::ResourceUnavailable(format!(
                "no such resource: {resource}"
            )))
        }
    }
}

impl MediaLibrary for SyntheticLibrary {
    fn describe(&self, resource: &str) -> Result<MediaDescriptor> {
        self.check(resource)?;
        Ok(MediaDescriptor {
            resource: resource.to_string(),
            video_frames: self.frames,
            video_fps: self.fps,
            audio_rate: self.audio_rate,
        })
    }

    fn open_video(&self, resource: &str) -> Result<(Box<dyn MediaSource>, Box<dyn UnitEncoder>)> {
        self.check(resource)?;
        Ok((
            Box::new(SyntheticVideoSource::new(
                self.frames,
                self.fps,
                self.frame_len,
            )),
            Box::new(TagEncoder::new()),
        ))
    }

    fn open_audio(&self, resource: &str) -> Result<(Box<dyn MediaSource>, Box<dyn UnitEncoder>)> {
        self.check(resource)?;
        Ok((
            Box::new(SyntheticAudioSource::new(
                self.frames,
                self.fps as f64,
                self.chunk_len,
            )),
            Box::new(PassthroughEncoder),
        ))
    }

    fn list(&self, query: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .catalog
            .iter()
            .filter(|name| name.contains(query))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_source_reads_and_seeks() {
        let mut source = SyntheticVideoSource::new(3, 30, 8);
        assert_eq!(source.read_next().unwrap()[0], 0);
        assert_eq!(source.read_next().unwrap()[0], 1);
        source.seek_to(0);
        assert_eq!(source.read_next().unwrap()[0], 0);
        source.seek_to(3);
        assert!(source.read_next().is_none());
    }

    #[test]
    fn tag_codec_roundtrips_quality() {
        let mut enc = TagEncoder::new();
        enc.set_quality(Quality::Blur);
        let encoded = enc.encode(b"frame").unwrap();
        assert_eq!(encoded[0], 0);
        assert_eq!(TagDecoder.decode(&encoded).unwrap(), b"frame");
    }

    #[test]
    fn tag_decoder_rejects_empty() {
        assert!(TagDecoder.decode(&[]).is_none());
    }

    #[test]
    fn library_describe_and_list() {
        let lib = SyntheticLibrary::new(vec!["a.mp4".into(), "b.mkv".into()], 300, 30);
        let desc = lib.describe("a.mp4").unwrap();
        assert_eq!(desc.video_frames, 300);
        assert_eq!(desc.video_fps, 30);

        assert!(lib.describe("missing.avi").is_err());
        assert_eq!(lib.list(""), vec!["a.mp4", "b.mkv"]);
        assert_eq!(lib.list("mkv"), vec!["b.mkv"]);
    }
}
