//! Per-media stepping behavior behind the generic sending engine.
//!
//! [`MediaFeed`] is the seam between [`MediaSender`](super::MediaSender)
//! and a concrete media type: the engine owns pacing, the handoff
//! channel, and transmission, while the feed decides how one unit is
//! pulled and encoded. Video reads its source sequentially (dropping one
//! frame per step at double speed); audio random-accesses its chunk
//! cursor, which also makes track alignment a plain cursor shift.

use crate::error::Result;
use crate::media::{MediaSource, Quality, Speed, UnitEncoder};

/// One media type's view of the encode loop.
pub trait MediaFeed: Send + 'static {
    /// Runs once on the encode worker before the first unit.
    fn before_start(&mut self) {}

    fn total_units(&self) -> u64;

    /// Index of the next unit to be produced.
    fn position(&self) -> u64;

    /// True once the cursor has passed the last unit; the encode loop
    /// then winds down.
    fn exhausted(&self) -> bool {
        self.position() >= self.total_units()
    }

    /// Produce the next encoded unit and its index, advancing the
    /// cursor. `None` on source exhaustion or encode failure — both end
    /// the sending run silently.
    fn next_encoded(&mut self) -> Option<(u64, Vec<u8>)>;

    /// Reposition the cursor; the engine only calls this while paused.
    fn seek_to(&mut self, unit: u64);

    fn set_speed(&mut self, speed: Speed);

    /// Video only; default ignores.
    fn set_quality(&mut self, _quality: Quality) {}

    /// Audio only (track alignment); default ignores.
    fn shift(&mut self, _delta_units: i64) {}
}

/// Sequential frame feed for video.
pub struct VideoFeed {
    source: Box<dyn MediaSource>,
    encoder: Box<dyn UnitEncoder>,
    total: u64,
    cursor: u64,
    speed: Speed,
}

impl VideoFeed {
    pub fn new(source: Box<dyn MediaSource>, encoder: Box<dyn UnitEncoder>) -> Self {
        let total = source.total_units();
        Self {
            source,
            encoder,
            total,
            cursor: 0,
            speed: Speed::Normal,
        }
    }
}

impl MediaFeed for VideoFeed {
    fn total_units(&self) -> u64 {
        self.total
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn next_encoded(&mut self) -> Option<(u64, Vec<u8>)> {
        if self.speed == Speed::Double {
            // Discard one frame so wall-clock pacing plays at 2x.
            self.source.read_next()?;
            self.cursor += 1;
        }
        if self.cursor >= self.total {
            return None;
        }

        let raw = self.source.read_next()?;
        let index = self.cursor;
        self.cursor += 1;

        match self.encoder.encode(&raw) {
            Ok(encoded) => Some((index, encoded)),
            Err(error) => {
                tracing::debug!(index, %error, "frame encode failed, ending run");
                None
            }
        }
    }

    fn seek_to(&mut self, unit: u64) {
        self.cursor = unit.min(self.total);
        self.source.seek_to(self.cursor);
    }

    fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
    }

    fn set_quality(&mut self, quality: Quality) {
        self.encoder.set_quality(quality);
    }
}

/// Random-access chunk feed for audio.
pub struct AudioFeed {
    source: Box<dyn MediaSource>,
    encoder: Box<dyn UnitEncoder>,
    total: u64,
    cursor: u64,
    speed: Speed,
}

impl AudioFeed {
    pub fn new(source: Box<dyn MediaSource>, encoder: Box<dyn UnitEncoder>) -> Self {
        let total = source.total_units();
        Self {
            source,
            encoder,
            total,
            cursor: 0,
            speed: Speed::Normal,
        }
    }
}

impl MediaFeed for AudioFeed {
    fn total_units(&self) -> u64 {
        self.total
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn next_encoded(&mut self) -> Option<(u64, Vec<u8>)> {
        if self.cursor >= self.total {
            return None;
        }

        self.source.seek_to(self.cursor);
        let raw = self.source.read_next()?;
        let index = self.cursor;
        self.cursor += self.speed.stride();

        match self.encoder.encode(&raw) {
            Ok(encoded) => Some((index, encoded)),
            Err(error) => {
                tracing::debug!(index, %error, "chunk encode failed, ending run");
                None
            }
        }
    }

    fn seek_to(&mut self, unit: u64) {
        self.cursor = unit.min(self.total);
    }

    fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
    }

    fn shift(&mut self, delta_units: i64) {
        let shifted = (self.cursor as i64).saturating_add(delta_units);
        self.cursor = shifted.clamp(0, self.total as i64) as u64;
    }
}
