//! Offline replay of capture files
//!
//! Feeds recorded ticks and transcript updates through a [`ScanPipeline`] in
//! file order. The session starts at the first record and ends at the latest
//! timestamp seen, so a replayed session reports the same duration and speech
//! rates as the live one.

use crate::calibration::CalibrationTable;
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::pipeline::ScanPipeline;
use crate::schema::capture_record::{CaptureRecord, RecordKind};
use crate::types::ScoreResult;
use std::sync::Arc;
use tracing::debug;

pub struct CaptureReplay;

impl CaptureReplay {
    /// Parse NDJSON (newline-delimited JSON) containing capture records
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<CaptureRecord>, ScanError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: CaptureRecord = serde_json::from_str(trimmed).map_err(|e| {
                ScanError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            record.validate().map_err(|e| {
                ScanError::ParseError(format!("Invalid record on line {}: {}", line_num + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Score a recorded session
    pub fn replay(
        records: &[CaptureRecord],
        config: &ScanConfig,
        table: Arc<CalibrationTable>,
    ) -> Result<ScoreResult, ScanError> {
        let Some(first) = records.first() else {
            return Err(ScanError::InsufficientData(
                "capture contains no records".to_string(),
            ));
        };

        let mut pipeline = ScanPipeline::new(config.clone(), table)?;
        pipeline.start_session_at(first.timestamp)?;
        let mut ended_at = first.timestamp;

        for record in records {
            record
                .validate()
                .map_err(|e| ScanError::ParseError(format!("Invalid record: {e}")))?;
            ended_at = ended_at.max(record.timestamp);

            match record.kind {
                RecordKind::Tick => {
                    let audio = record.audio_buffer();
                    pipeline.process_tick(record.frame(), audio.as_ref());
                }
                RecordKind::Transcript => {
                    if let Some(event) = record.transcript_event() {
                        pipeline.ingest_transcript(&event);
                    }
                }
            }
        }

        debug!(records = records.len(), "capture replayed");
        pipeline.stop_session_at(ended_at)
    }

    /// Parse and score an NDJSON capture in one step
    pub fn replay_ndjson(
        ndjson: &str,
        config: &ScanConfig,
        table: Arc<CalibrationTable>,
    ) -> Result<ScoreResult, ScanError> {
        let records = Self::parse_ndjson(ndjson)?;
        Self::replay(&records, config, table)
    }
}
