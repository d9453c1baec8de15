//! WAV file export functionality

use std::path::Path;

use log::info;

use super::{apply_fade_out, normalize_samples, ExportConfig};
use crate::card::Card;
use crate::{MfcError, Result};

/// Frames rendered per call into the card, short enough that FM timer
/// ticks reach the firmware between calls.
pub const RENDER_CHUNK: usize = 64;

/// Render `frames` stereo frames from `card` in small chunks.
///
/// `between` runs before every chunk with the index of its first frame, so
/// callers can feed the card while it plays.
pub fn render_frames(card: &Card, frames: usize, mut between: impl FnMut(usize)) -> Vec<i16> {
    let mut samples = vec![0i16; frames * 2];
    for (i, chunk) in samples.chunks_mut(RENDER_CHUNK * 2).enumerate() {
        between(i * RENDER_CHUNK);
        card.render(chunk);
        // let the interrupt and firmware threads catch up with the timer
        std::thread::yield_now();
    }
    samples
}

/// Render `frames` frames of whatever the card is playing into a WAV file.
pub fn render_to_wav<P: AsRef<Path>>(
    card: &Card,
    frames: usize,
    output_path: P,
    config: ExportConfig,
) -> Result<()> {
    let mut samples = render_frames(card, frames, |_| {});
    export_samples(&mut samples, output_path, &config)
}

/// Post-process interleaved stereo and write it out.
pub fn export_samples<P: AsRef<Path>>(
    samples: &mut [i16],
    output_path: P,
    config: &ExportConfig,
) -> Result<()> {
    if config.normalize {
        info!("Normalizing audio...");
        normalize_samples(samples);
    }

    if config.fade_out_duration > 0.0 {
        info!("Applying {:.1}s fade out...", config.fade_out_duration);
        apply_fade_out(samples, config.fade_out_duration, config.sample_rate);
    }

    info!("Writing WAV file to {}...", output_path.as_ref().display());
    write_wav_file(output_path.as_ref(), samples, config.sample_rate)
}

/// Write interleaved 16-bit stereo samples to a WAV file
pub fn write_wav_file(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let wav_error = |e: hound::Error| match e {
        hound::Error::IoError(io) => MfcError::Io(io),
        other => MfcError::Other(format!("WAV export failed: {other}")),
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;

    Ok(())
}
