//! WAV ingest for ARB slots.

use std::path::Path;

use fgen_core::{FgenError, Result};

/// Decode a PCM or float WAV file to mono samples in `[-1, 1]`.
///
/// Two or more channels are mixed as the mean of the first two; a mono file
/// is taken as-is.
pub fn load_wav_mono(path: &Path) -> Result<Vec<f32>> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| FgenError::Audio(format!("{}: {}", path.display(), e)))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| FgenError::Audio(format!("{}: {}", path.display(), e)))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| FgenError::Audio(format!("{}: {}", path.display(), e)))?
        }
    };

    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| match frame {
            [left, right, ..] => (left + right) * 0.5,
            [only] => *only,
            [] => 0.0,
        })
        .collect();

    if mono.is_empty() {
        return Err(FgenError::Audio(format!(
            "{}: file contains no samples",
            path.display()
        )));
    }
    Ok(mono)
}
