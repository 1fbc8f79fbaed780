//! Media collaborator interfaces.
//!
//! The streaming engines treat codecs, sources, and output devices as
//! opaque collaborators behind small traits. Real deployments plug in
//! file readers and hardware sinks; tests and the demo CLI use the
//! deterministic implementations in [`synthetic`].
//!
//! Audio is modeled as fixed-duration chunks: one chunk spans
//! `1 / video_fps` seconds, so a stream has exactly as many audio
//! chunks as video frames and both engines can be seeked with the same
//! unit index.

pub mod synthetic;

use crate::error::Result;

/// Video quality level carried by the `level` control parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Reduced resolution (`level: 0`).
    Blur,
    /// Full resolution (`level: 1`).
    Hd,
}

impl Quality {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Blur),
            1 => Some(Self::Hd),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Self::Blur => 0,
            Self::Hd => 1,
        }
    }
}

/// Playback speed carried by the `speed` control parameter. Double
/// speed discards every other source unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Normal,
    Double,
}

impl Speed {
    pub fn from_multiplier(multiplier: u8) -> Option<Self> {
        match multiplier {
            1 => Some(Self::Normal),
            2 => Some(Self::Double),
            _ => None,
        }
    }

    pub fn multiplier(self) -> u8 {
        match self {
            Self::Normal => 1,
            Self::Double => 2,
        }
    }

    /// Cursor advance per emitted unit.
    pub fn stride(self) -> u64 {
        self.multiplier() as u64
    }
}

/// Immutable description of one streamable resource, produced by the
/// DESCRIBE exchange and shared read-only between the video and audio
/// engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub resource: String,
    /// Total video frame count.
    pub video_frames: u64,
    /// Video frame rate in frames per second.
    pub video_fps: u32,
    /// Audio sample rate in Hz.
    pub audio_rate: u32,
}

impl MediaDescriptor {
    /// Total stream duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.video_fps == 0 {
            return 0.0;
        }
        self.video_frames as f64 / self.video_fps as f64
    }

    /// Duration of one audio chunk (one video frame period) in seconds.
    pub fn chunk_duration(&self) -> f64 {
        if self.video_fps == 0 {
            return 0.0;
        }
        1.0 / self.video_fps as f64
    }

    /// Total audio chunk count; chunks are frame-aligned.
    pub fn audio_chunks(&self) -> u64 {
        self.video_frames
    }
}

/// A seekable sequence of raw media units (video frames or audio
/// chunks). `read_next` returning `None` means end-of-stream or a read
/// failure; both silently end the sending run.
pub trait MediaSource: Send + 'static {
    fn total_units(&self) -> u64;
    /// Source unit rate (frames per second, or chunks per second for
    /// audio — which equals the video frame rate).
    fn frame_rate(&self) -> f64;
    fn read_next(&mut self) -> Option<Vec<u8>>;
    fn seek_to(&mut self, unit: u64);
}

/// Opaque per-unit encoder. Video encoders honor
/// [`set_quality`](UnitEncoder::set_quality) for subsequently encoded
/// frames; the default implementation ignores it.
pub trait UnitEncoder: Send + 'static {
    fn encode(&mut self, raw: &[u8]) -> Result<Vec<u8>>;
    fn set_quality(&mut self, _quality: Quality) {}
}

/// Opaque per-unit decoder. `None` signals a corrupt unit; the receiver
/// counts it and moves on.
pub trait UnitDecoder: Send + 'static {
    fn decode(&mut self, payload: &[u8]) -> Option<Vec<u8>>;
}

/// Playback output device (rendering surface, audio device). The
/// receiver calls [`before_start`](PlaybackSink::before_start) once on
/// its playback thread before the first unit.
pub trait PlaybackSink: Send + 'static {
    fn before_start(&mut self) {}
    fn present(&mut self, unit: &[u8]);
}

/// Catalog of streamable resources on the server side.
pub trait MediaLibrary: Send + Sync + 'static {
    /// Resolve a resource name into its descriptor. Fails with
    /// [`StreamError::ResourceUnavailable`](crate::StreamError::ResourceUnavailable)
    /// for unknown or unreadable resources.
    fn describe(&self, resource: &str) -> Result<MediaDescriptor>;

    /// Open the video track: frame source plus encoder.
    fn open_video(&self, resource: &str) -> Result<(Box<dyn MediaSource>, Box<dyn UnitEncoder>)>;

    /// Open the audio track: chunk source plus encoder.
    fn open_audio(&self, resource: &str) -> Result<(Box<dyn MediaSource>, Box<dyn UnitEncoder>)>;

    /// Resource names matching `query` (substring match; empty query
    /// lists everything), sorted.
    fn list(&self, query: &str) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_levels_roundtrip() {
        assert_eq!(Quality::from_level(0), Some(Quality::Blur));
        assert_eq!(Quality::from_level(1), Some(Quality::Hd));
        assert_eq!(Quality::from_level(2), None);
        assert_eq!(Quality::Hd.level(), 1);
    }

    #[test]
    fn speed_multipliers() {
        assert_eq!(Speed::from_multiplier(1), Some(Speed::Normal));
        assert_eq!(Speed::from_multiplier(2), Some(Speed::Double));
        assert_eq!(Speed::from_multiplier(3), None);
        assert_eq!(Speed::Double.stride(), 2);
    }

    #[test]
    fn descriptor_durations() {
        let desc = MediaDescriptor {
            resource: "clip.mp4".into(),
            video_frames: 300,
            video_fps: 30,
            audio_rate: 44100,
        };
        assert_eq!(desc.duration_secs(), 10.0);
        assert_eq!(desc.audio_chunks(), 300);
        assert!((desc.chunk_duration() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn descriptor_zero_fps_is_safe() {
        let desc = MediaDescriptor {
            resource: "broken".into(),
            video_frames: 10,
            video_fps: 0,
            audio_rate: 0,
        };
        assert_eq!(desc.duration_secs(), 0.0);
        assert_eq!(desc.chunk_duration(), 0.0);
    }
}
