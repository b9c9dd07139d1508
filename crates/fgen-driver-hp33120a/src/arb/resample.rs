//! Anti-aliased resampling to an ARB point count.
//!
//! Downsampling runs a second-order low-pass (`biquad` direct form 1) at
//! half the target/source ratio before linear interpolation. Upsampling
//! interpolates without filtering. Output is always normalized into
//! `[-1, 1]`.

use biquad::{Biquad, Coefficients, DirectForm1};
use std::f64::consts::{PI, SQRT_2};

use fgen_core::config::{MAX_ARB_POINTS, MIN_ARB_POINTS};

/// Filter outputs smaller than this are flushed to zero.
const DENORMAL_FLOOR: f64 = 1.0e-8;

/// Lower bound on the normalized cutoff.
const MIN_CUTOFF_RATIO: f64 = 0.001;

/// Butterworth-style low-pass at `cutoff_ratio` of the sample rate.
pub struct AntiAliasFilter {
    filter: DirectForm1<f64>,
}

impl AntiAliasFilter {
    pub fn new(cutoff_ratio: f64) -> Self {
        Self {
            filter: DirectForm1::<f64>::new(Self::design(cutoff_ratio)),
        }
    }

    /// Bilinear-transform low-pass coefficients. The denominator is
    /// normalized so `a0 == 1`.
    pub fn design(cutoff_ratio: f64) -> Coefficients<f64> {
        let n = 1.0 / (PI * cutoff_ratio.max(MIN_CUTOFF_RATIO)).tan();
        let n2 = n * n;
        let c1 = 1.0 / (1.0 + SQRT_2 * n + n2);
        Coefficients {
            a1: c1 * 2.0 * (1.0 - n2),
            a2: c1 * (1.0 - SQRT_2 * n + n2),
            b0: c1,
            b1: c1 * 2.0,
            b2: c1,
        }
    }

    pub fn run(&mut self, input: f64) -> f64 {
        let out = self.filter.run(input);
        if out.abs() < DENORMAL_FLOOR {
            0.0
        } else {
            out
        }
    }

    pub fn process(&mut self, data: &mut [f32]) {
        for sample in data.iter_mut() {
            *sample = self.run(f64::from(*sample)) as f32;
        }
    }
}

/// Resample `input` to exactly `target` points.
///
/// Returns an empty buffer if `input` is empty or `target` is outside
/// `[8, 16000]`. Non-finite samples are treated as silence.
pub fn resample(input: &[f32], target: usize) -> Vec<f32> {
    if input.is_empty() || !(MIN_ARB_POINTS..=MAX_ARB_POINTS).contains(&target) {
        return Vec::new();
    }
    let source: Vec<f32> = input
        .iter()
        .map(|s| if s.is_finite() { *s } else { 0.0 })
        .collect();

    let mut output = if source.len() == target {
        source
    } else if source.len() > target {
        let mut filtered = source;
        let cutoff = 0.5 * target as f64 / filtered.len() as f64;
        AntiAliasFilter::new(cutoff).process(&mut filtered);
        interpolate(&filtered, target)
    } else if source.len() == 1 {
        vec![source[0]; target]
    } else {
        interpolate(&source, target)
    };

    normalize(&mut output);
    output
}

/// Linear interpolation of `data` (at least two samples) onto `target` points.
fn interpolate(data: &[f32], target: usize) -> Vec<f32> {
    let last = data.len() - 1;
    let step = last as f64 / (target - 1) as f64;
    (0..target)
        .map(|i| {
            let position = i as f64 * step;
            let idx0 = (position as usize).min(last);
            let idx1 = (idx0 + 1).min(last);
            let frac = position - idx0 as f64;
            (f64::from(data[idx0]) * (1.0 - frac) + f64::from(data[idx1]) * frac) as f32
        })
        .collect()
}

/// Scale by `1 / peak` if the peak exceeds 1, then clamp into `[-1, 1]`.
pub fn normalize(data: &mut [f32]) {
    let peak = peak(data);
    if peak > 1.0 {
        for v in data.iter_mut() {
            *v /= peak;
        }
    }
    for v in data.iter_mut() {
        *v = v.clamp(-1.0, 1.0);
    }
}

/// Truncate or zero-pad to `points`, then normalize.
pub fn fit_to_length(data: &[f32], points: usize) -> Vec<f32> {
    let mut fitted: Vec<f32> = data
        .iter()
        .take(points)
        .map(|s| if s.is_finite() { *s } else { 0.0 })
        .collect();
    fitted.resize(points, 0.0);
    normalize(&mut fitted);
    fitted
}

/// Largest absolute sample.
pub fn peak(data: &[f32]) -> f32 {
    data.iter().fold(0.0_f32, |acc, v| acc.max(v.abs()))
}
