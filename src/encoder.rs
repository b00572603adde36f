//! Result encoding
//!
//! Wraps a session's [`ScoreResult`] in a self-describing JSON payload with
//! producer metadata and a quality block derived from the session summary.

use crate::error::ScanError;
use crate::session::MIN_RECORDED_TICKS;
use crate::types::{QualityFlag, ScoreResult};
use crate::{PRODUCER_NAME, SCAN_VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current payload schema version
pub const PAYLOAD_VERSION: &str = "1.0.0";

/// Encoded scan result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPayload {
    pub payload_version: String,
    pub producer: ScanProducer,
    pub computed_at_utc: String,
    pub quality: ScanQuality,
    pub result: ScoreResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanQuality {
    /// Fraction of ticks on which a face was detected
    pub coverage: f64,
    /// Coverage discounted for short sessions
    pub confidence: f64,
    pub flags: Vec<QualityFlag>,
}

/// Encoder for producing scan payloads
pub struct ScanEncoder {
    instance_id: String,
}

impl Default for ScanEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn encode(&self, result: &ScoreResult) -> ScanPayload {
        ScanPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: ScanProducer {
                name: PRODUCER_NAME.to_string(),
                version: SCAN_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            quality: build_quality(result),
            result: result.clone(),
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(&self, result: &ScoreResult) -> Result<String, ScanError> {
        let payload = self.encode(result);
        serde_json::to_string_pretty(&payload).map_err(ScanError::JsonError)
    }
}

fn build_quality(result: &ScoreResult) -> ScanQuality {
    let Some(summary) = result.summary.as_ref() else {
        return ScanQuality::default();
    };

    let length_factor = (summary.ticks_recorded as f64 / MIN_RECORDED_TICKS as f64).min(1.0);
    ScanQuality {
        coverage: summary.face_coverage,
        confidence: (summary.face_coverage * length_factor).clamp(0.0, 1.0),
        flags: summary.quality_flags.clone(),
    }
}
