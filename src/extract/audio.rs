//! Time-domain audio features
//!
//! RMS amplitude and zero-crossing rate over the full analyser window. RMS is
//! gated: when most of the window is below the silence threshold the tick is
//! treated as non-speech and reports 0.

use super::FeatureFault;
use crate::config::AudioConfig;
use crate::types::{AudioBuffer, Feature};

#[derive(Debug, Clone)]
pub struct AudioExtractor {
    silence_threshold: f32,
    max_silence_ratio: f64,
}

impl AudioExtractor {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            max_silence_ratio: config.max_silence_ratio,
        }
    }

    pub fn compute(&self, feature: Feature, buffer: &AudioBuffer) -> Result<f64, FeatureFault> {
        let samples = checked_samples(buffer)?;
        match feature {
            Feature::Rms => Ok(self.gated_rms(samples)),
            Feature::Zcr => Ok(zero_crossing_rate(samples)),
            other => Err(FeatureFault::NotPerTick(other)),
        }
    }

    /// RMS, or 0 when the silent fraction exceeds the configured ratio
    pub fn gated_rms(&self, samples: &[f32]) -> f64 {
        if silence_ratio(samples, self.silence_threshold) > self.max_silence_ratio {
            return 0.0;
        }
        rms(samples)
    }
}

fn checked_samples(buffer: &AudioBuffer) -> Result<&[f32], FeatureFault> {
    let samples = buffer.samples();
    if samples.is_empty() {
        return Err(FeatureFault::EmptyAudio);
    }
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(FeatureFault::NonFiniteSample { index });
    }
    Ok(samples)
}

/// Root-mean-square amplitude
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Sign changes per adjacent sample pair (0-1)
pub fn zero_crossing_rate(samples: &[f32]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / (samples.len() - 1) as f64
}

/// Fraction of samples whose magnitude is below `threshold`
pub fn silence_ratio(samples: &[f32], threshold: f32) -> f64 {
    if samples.is_empty() {
        return 1.0;
    }
    let silent = samples.iter().filter(|s| s.abs() < threshold).count();
    silent as f64 / samples.len() as f64
}
