//! Client-side volume control for the audio stream.
//!
//! Gain is applied as a scalar multiply over decoded f32-le samples
//! immediately before the playback sink. Muting sets the effective
//! gain to zero without discarding any data, so un-muting is
//! instantaneous and lossless.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::media::PlaybackSink;

/// Shared volume/mute state, settable from the orchestrator while the
/// playback thread is running.
#[derive(Clone, Debug)]
pub struct GainControl {
    inner: Arc<GainInner>,
}

#[derive(Debug)]
struct GainInner {
    /// f32 bit pattern; atomics carry no float type.
    gain: AtomicU32,
    muted: AtomicBool,
}

impl GainControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GainInner {
                gain: AtomicU32::new(1.0f32.to_bits()),
                muted: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 2.0);
        self.inner.gain.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.inner.gain.load(Ordering::Relaxed))
    }

    /// Flip mute; returns the new muted state.
    pub fn toggle_mute(&self) -> bool {
        !self.inner.muted.fetch_not(Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Relaxed)
    }

    /// Gain actually applied to samples right now.
    pub fn effective(&self) -> f32 {
        if self.is_muted() { 0.0 } else { self.volume() }
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink adapter scaling f32-le sample payloads by the current gain.
pub struct GainedSink {
    inner: Box<dyn PlaybackSink>,
    gain: GainControl,
}

impl GainedSink {
    pub fn new(inner: Box<dyn PlaybackSink>, gain: GainControl) -> Self {
        Self { inner, gain }
    }
}

impl PlaybackSink for GainedSink {
    fn before_start(&mut self) {
        self.inner.before_start();
    }

    fn present(&mut self, unit: &[u8]) {
        let gain = self.gain.effective();
        if (gain - 1.0).abs() < f32::EPSILON {
            self.inner.present(unit);
            return;
        }

        let mut scaled = Vec::with_capacity(unit.len());
        let mut chunks = unit.chunks_exact(4);
        for chunk in &mut chunks {
            let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            scaled.extend_from_slice(&(sample * gain).to_le_bytes());
        }
        // A trailing partial sample passes through untouched.
        scaled.extend_from_slice(chunks.remainder());
        self.inner.present(&scaled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::CollectSink;

    fn samples(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn unit_gain_passes_through() {
        let collect = CollectSink::new();
        let mut sink = GainedSink::new(Box::new(collect.clone()), GainControl::new());
        let unit = samples(&[0.5, -0.25]);
        sink.present(&unit);
        assert_eq!(collect.units(), vec![unit]);
    }

    #[test]
    fn volume_scales_samples() {
        let gain = GainControl::new();
        gain.set_volume(0.5);
        let collect = CollectSink::new();
        let mut sink = GainedSink::new(Box::new(collect.clone()), gain);

        sink.present(&samples(&[1.0, -0.5]));
        assert_eq!(collect.units(), vec![samples(&[0.5, -0.25])]);
    }

    #[test]
    fn mute_zeroes_without_discarding() {
        let gain = GainControl::new();
        assert!(gain.toggle_mute());
        let collect = CollectSink::new();
        let mut sink = GainedSink::new(Box::new(collect.clone()), gain.clone());

        sink.present(&samples(&[1.0]));
        // The unit still reaches the sink, silenced.
        assert_eq!(collect.units(), vec![samples(&[0.0])]);

        assert!(!gain.toggle_mute());
        sink.present(&samples(&[1.0]));
        assert_eq!(collect.len(), 2);
        assert_eq!(collect.units()[1], samples(&[1.0]));
    }

    #[test]
    fn volume_is_clamped() {
        let gain = GainControl::new();
        gain.set_volume(9.0);
        assert_eq!(gain.volume(), 2.0);
        gain.set_volume(-1.0);
        assert_eq!(gain.volume(), 0.0);
    }
}
