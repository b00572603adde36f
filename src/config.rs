//! Pipeline configuration
//!
//! Every field has a default so partial JSON documents load cleanly.

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default sampling tick (100 ms)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Default exponential smoothing factor for live feedback
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.1;

/// Analyser window size in samples
pub const DEFAULT_AUDIO_WINDOW: usize = 2048;

/// Default gap between transcript events counted as a pause
pub const DEFAULT_PAUSE_THRESHOLD_MS: u64 = 1500;

/// Top-level configuration for a capture source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Fixed interval between ticks
    pub tick_interval_ms: u64,
    /// Smoothing factor α for the live feedback filter bank
    pub smoothing_alpha: f64,
    /// Close the session automatically after this long
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_timeout_ms: Option<u64>,
    pub audio: AudioConfig,
    pub speech: SpeechConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            session_timeout_ms: None,
            audio: AudioConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

/// Analyser node and silence gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per analyser window
    pub window_size: usize,
    /// Analyser smoothing constant, handed to `AudioSource::configure`
    pub smoothing_time_constant: f64,
    /// Absolute amplitude below which a sample counts as silent
    pub silence_threshold: f32,
    /// RMS is reported as 0 when more than this fraction of samples is silent
    pub max_silence_ratio: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_AUDIO_WINDOW,
            smoothing_time_constant: 0.3,
            silence_threshold: 0.02,
            max_silence_ratio: 0.8,
        }
    }
}

/// Transcript-derived counter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Inter-event gap counted as a pause
    pub pause_threshold_ms: u64,
    /// Filler words and phrases, matched case-insensitively on word boundaries
    pub filler_words: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            pause_threshold_ms: DEFAULT_PAUSE_THRESHOLD_MS,
            filler_words: ["um", "uh", "er", "ah", "like", "you know", "i mean", "basically"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ScanConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_ms.map(Duration::from_millis)
    }

    /// Load configuration from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.tick_interval_ms == 0 {
            return Err(ScanError::InvalidConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ScanError::InvalidConfig(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            )));
        }
        if self.session_timeout_ms == Some(0) {
            return Err(ScanError::InvalidConfig(
                "session_timeout_ms must be positive when set".to_string(),
            ));
        }
        if self.audio.window_size == 0 {
            return Err(ScanError::InvalidConfig(
                "audio.window_size must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.audio.smoothing_time_constant) {
            return Err(ScanError::InvalidConfig(
                "audio.smoothing_time_constant must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.audio.max_silence_ratio) {
            return Err(ScanError::InvalidConfig(
                "audio.max_silence_ratio must be in [0, 1]".to_string(),
            ));
        }
        if !self.audio.silence_threshold.is_finite() || self.audio.silence_threshold < 0.0 {
            return Err(ScanError::InvalidConfig(
                "audio.silence_threshold must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.smoothing_alpha, 0.1);
        assert_eq!(config.audio.window_size, 2048);
        assert_eq!(config.audio.smoothing_time_constant, 0.3);
        assert!(config.session_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ScanConfig::from_json(r#"{"smoothing_alpha": 0.25, "audio": {"window_size": 1024}}"#)
                .unwrap();
        assert_eq!(config.smoothing_alpha, 0.25);
        assert_eq!(config.audio.window_size, 1024);
        assert_eq!(config.audio.max_silence_ratio, 0.8);
        assert_eq!(config.tick_interval_ms, 100);
    }

    #[test]
    fn test_rejects_bad_alpha() {
        assert!(ScanConfig::from_json(r#"{"smoothing_alpha": 0.0}"#).is_err());
        assert!(ScanConfig::from_json(r#"{"smoothing_alpha": 1.5}"#).is_err());
    }

    #[test]
    fn test_rejects_zero_tick() {
        let err = ScanConfig::from_json(r#"{"tick_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = ScanConfig::default();
        config.session_timeout_ms = Some(30_000);
        let json = config.to_json().unwrap();
        assert_eq!(ScanConfig::from_json(&json).unwrap(), config);
    }
}
