//! Audio export of rendered card output
//!
//! The card renders interleaved 16-bit stereo. This module post-processes
//! a rendered take and writes it out as WAV.
//!
//! ```no_run
//! use music_feature_card::card::{Card, CardConfig};
//! use music_feature_card::export::{render_to_wav, ExportConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let card = Card::start(CardConfig::default())?;
//! render_to_wav(&card, 44_100, "silence.wav", ExportConfig::default())?;
//! # Ok(())
//! # }
//! ```

mod wav;
pub use wav::*;

/// Export configuration options
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Sample rate written to the file header (default: 44100 Hz)
    pub sample_rate: u32,
    /// Scale the take so its peak sits at 95% of full scale
    pub normalize: bool,
    /// Fade out duration in seconds (0 = no fade)
    pub fade_out_duration: f32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            normalize: false,
            fade_out_duration: 0.0,
        }
    }
}

impl ExportConfig {
    /// Create config with custom sample rate
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Default::default()
        }
    }

    /// Enable normalization
    pub fn normalize(mut self, enable: bool) -> Self {
        self.normalize = enable;
        self
    }

    /// Add fade out at the end
    pub fn fade_out(mut self, duration_seconds: f32) -> Self {
        self.fade_out_duration = duration_seconds;
        self
    }
}

/// Scale interleaved samples so the peak is 95% of full scale.
fn normalize_samples(samples: &mut [i16]) {
    let peak = samples
        .iter()
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0);
    if peak == 0 {
        return;
    }
    let scale = 0.95 * i16::MAX as f32 / peak as f32;
    for sample in samples.iter_mut() {
        *sample = (*sample as f32 * scale).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Fade the last `fade_duration` seconds of interleaved stereo to silence.
fn apply_fade_out(samples: &mut [i16], fade_duration: f32, sample_rate: u32) {
    if fade_duration <= 0.0 || samples.is_empty() {
        return;
    }

    let frames = samples.len() / 2;
    let fade_frames = ((fade_duration * sample_rate as f32) as usize).min(frames);
    if fade_frames == 0 {
        return;
    }
    let start_fade = frames - fade_frames;

    for (i, frame) in samples.chunks_exact_mut(2).enumerate().skip(start_fade) {
        let progress = (i - start_fade + 1) as f32 / fade_frames as f32;
        let fade_factor = 1.0 - progress;
        for s in frame {
            *s = (*s as f32 * fade_factor) as i16;
        }
    }
}
