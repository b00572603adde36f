//! scan.capture_record.v1 schema definition

use crate::types::{AudioBuffer, LandmarkFrame, TranscriptEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "scan.capture_record.v1";

/// Type of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// One sampling tick
    Tick,
    /// One speech recognizer update
    Transcript,
}

/// Speech recognizer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptPayload {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

/// One line of a capture file.
///
/// A tick without `landmarks` is a tick on which no face was detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RecordKind,
    /// Face mesh points as `[x, y, z]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<[f64; 3]>>,
    /// Time-domain analyser window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<TranscriptPayload>,
}

impl CaptureRecord {
    /// Record one tick
    pub fn tick(
        timestamp: DateTime<Utc>,
        frame: Option<&LandmarkFrame>,
        audio: Option<&AudioBuffer>,
    ) -> Self {
        CaptureRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp,
            kind: RecordKind::Tick,
            landmarks: frame.map(|f| f.points().iter().map(|p| [p.x, p.y, p.z]).collect()),
            audio: audio.map(|a| a.samples().to_vec()),
            transcript: None,
        }
    }

    /// Record one transcript update
    pub fn transcript(timestamp: DateTime<Utc>, text: impl Into<String>, is_final: bool) -> Self {
        CaptureRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp,
            kind: RecordKind::Transcript,
            landmarks: None,
            audio: None,
            transcript: Some(TranscriptPayload {
                text: text.into(),
                is_final,
            }),
        }
    }

    pub fn frame(&self) -> Option<LandmarkFrame> {
        self.landmarks.as_deref().map(LandmarkFrame::from_triples)
    }

    pub fn audio_buffer(&self) -> Option<AudioBuffer> {
        self.audio.clone().map(AudioBuffer::new)
    }

    pub fn transcript_event(&self) -> Option<TranscriptEvent> {
        self.transcript.as_ref().map(|t| TranscriptEvent {
            at: self.timestamp,
            text: t.text.clone(),
            is_final: t.is_final,
        })
    }

    /// Validate the record schema
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        match self.kind {
            RecordKind::Tick => {
                if self.transcript.is_some() {
                    return Err(ValidationError::UnexpectedField {
                        kind: RecordKind::Tick,
                        field: "transcript",
                    });
                }
                if self.landmarks.as_ref().is_some_and(|l| l.is_empty()) {
                    return Err(ValidationError::EmptyField("landmarks"));
                }
                if self.audio.as_ref().is_some_and(|a| a.is_empty()) {
                    return Err(ValidationError::EmptyField("audio"));
                }
                Ok(())
            }
            RecordKind::Transcript => {
                if self.landmarks.is_some() {
                    return Err(ValidationError::UnexpectedField {
                        kind: RecordKind::Transcript,
                        field: "landmarks",
                    });
                }
                if self.audio.is_some() {
                    return Err(ValidationError::UnexpectedField {
                        kind: RecordKind::Transcript,
                        field: "audio",
                    });
                }
                if self.transcript.is_none() {
                    return Err(ValidationError::MissingTranscript);
                }
                Ok(())
            }
        }
    }
}

/// Validation errors for capture records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("{kind:?} record must not carry {field}")]
    UnexpectedField { kind: RecordKind, field: &'static str },

    #[error("Transcript record has no transcript payload")]
    MissingTranscript,

    #[error("{0} is present but empty")]
    EmptyField(&'static str),
}
