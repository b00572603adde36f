//! Capture-and-score sessions
//!
//! A session owns the raw per-tick history and the transcript counters of one
//! bounded scan. It is consumed by [`Session::finish`], which aggregates,
//! scores and drops the history in one step.

use crate::aggregator::SessionAggregator;
use crate::calibration::CalibrationTable;
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::extract::SpeechTracker;
use crate::scoring::ScoringEngine;
use crate::types::{
    FeatureHistory, FeatureSnapshot, QualityFlag, ScoreResult, SessionSummary, TranscriptEvent,
};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Recorded ticks below this flag the session as short (3 s at 100 ms)
pub const MIN_RECORDED_TICKS: u32 = 30;

/// Face coverage below this flags the session
pub const MIN_FACE_COVERAGE: f64 = 0.5;

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    history: FeatureHistory,
    speech: SpeechTracker,
    ticks_recorded: u32,
    ticks_skipped: u32,
    ticks_without_audio: u32,
}

impl Session {
    pub fn new(config: &ScanConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            history: FeatureHistory::new(),
            speech: SpeechTracker::new(&config.speech),
            ticks_recorded: 0,
            ticks_skipped: 0,
            ticks_without_audio: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn history(&self) -> &FeatureHistory {
        &self.history
    }

    /// Append the raw snapshot of a completed tick
    pub fn record(&mut self, snapshot: FeatureSnapshot) {
        self.history.push(snapshot);
        self.ticks_recorded += 1;
    }

    /// Count a recorded tick whose audio features had no window to read
    pub fn count_missing_audio(&mut self) {
        self.ticks_without_audio += 1;
    }

    /// Count a tick that produced no snapshot
    pub fn skip(&mut self) {
        self.ticks_skipped += 1;
    }

    pub fn ingest_transcript(&mut self, event: &TranscriptEvent) {
        self.speech.ingest(event);
    }

    pub fn summary(&self, table: &CalibrationTable, ended_at: DateTime<Utc>) -> SessionSummary {
        let attempted = self.ticks_recorded + self.ticks_skipped;
        let face_coverage = if attempted == 0 {
            0.0
        } else {
            self.ticks_recorded as f64 / attempted as f64
        };
        let transcript_events = self.speech.counters().events;

        let mut quality_flags = Vec::new();
        if self.ticks_recorded < MIN_RECORDED_TICKS {
            quality_flags.push(QualityFlag::ShortSession);
        }
        if face_coverage < MIN_FACE_COVERAGE {
            quality_flags.push(QualityFlag::LowFaceCoverage);
        }
        if table.uses_speech() && transcript_events == 0 {
            quality_flags.push(QualityFlag::NoSpeech);
        }
        if table.uses_audio() && self.ticks_without_audio > 0 {
            quality_flags.push(QualityFlag::NoAudio);
        }

        SessionSummary {
            session_id: self.id,
            started_at: self.started_at,
            ended_at,
            duration_sec: duration_sec(self.started_at, ended_at),
            ticks_recorded: self.ticks_recorded,
            ticks_skipped: self.ticks_skipped,
            face_coverage,
            transcript_events,
            quality_flags,
        }
    }

    /// Aggregate and score the session, consuming it.
    ///
    /// Fails with [`ScanError::InsufficientData`] when no tick was recorded.
    pub fn finish(
        self,
        table: &CalibrationTable,
        ended_at: DateTime<Utc>,
    ) -> Result<ScoreResult, ScanError> {
        let summary = self.summary(table, ended_at);
        let mut aggregates = SessionAggregator::aggregate(&self.history, table)?;

        if table.uses_speech() {
            aggregates.extend(self.speech.features(summary.duration_sec));
        }

        let mut result = ScoringEngine::score(&aggregates, table)?;
        info!(
            session_id = %self.id,
            use_case = table.name(),
            score = result.score,
            ticks = summary.ticks_recorded,
            "session scored"
        );
        result.summary = Some(summary);
        Ok(result)
    }
}

fn duration_sec(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Feature;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn deception_snapshot(v: f64) -> FeatureSnapshot {
        CalibrationTable::deception()
            .tick_features()
            .into_iter()
            .map(|f| (f, v))
            .collect()
    }

    #[test]
    fn test_empty_session_is_insufficient_data() {
        let session = Session::new(&ScanConfig::default(), t0());
        let result = session.finish(&CalibrationTable::deception(), t0() + Duration::seconds(5));
        assert!(matches!(result, Err(ScanError::InsufficientData(_))));
    }

    #[test]
    fn test_finish_merges_speech_features() {
        let table = CalibrationTable::deception();
        let mut session = Session::new(&ScanConfig::default(), t0());
        for i in 0..40 {
            session.record(deception_snapshot(i as f64 * 0.001));
        }
        session.ingest_transcript(&TranscriptEvent {
            at: t0() + Duration::seconds(1),
            text: "um well".to_string(),
            is_final: true,
        });

        let result = session.finish(&table, t0() + Duration::seconds(4)).unwrap();
        assert_eq!(result.raw[&Feature::FillerRate], 0.5);
        assert_eq!(result.normalized.len(), table.features().len());

        let summary = result.summary.unwrap();
        assert_eq!(summary.ticks_recorded, 40);
        assert_eq!(summary.duration_sec, 4.0);
        assert_eq!(summary.transcript_events, 1);
        assert!(summary.quality_flags.is_empty());
    }

    #[test]
    fn test_quality_flags() {
        let table = CalibrationTable::deception();
        let mut session = Session::new(&ScanConfig::default(), t0());
        session.record(deception_snapshot(0.1));
        for _ in 0..3 {
            session.skip();
        }

        let summary = session.summary(&table, t0() + Duration::seconds(1));
        assert_eq!(summary.face_coverage, 0.25);
        assert_eq!(
            summary.quality_flags,
            vec![
                QualityFlag::ShortSession,
                QualityFlag::LowFaceCoverage,
                QualityFlag::NoSpeech,
            ]
        );
    }

    #[test]
    fn test_no_speech_flag_only_when_table_uses_speech() {
        let table = CalibrationTable::appearance();
        let session = Session::new(&ScanConfig::default(), t0());
        let summary = session.summary(&table, t0());
        assert!(!summary.quality_flags.contains(&QualityFlag::NoSpeech));
    }

    #[test]
    fn test_no_audio_flag_when_ticks_lacked_a_window() {
        let table = CalibrationTable::deception();
        let mut session = Session::new(&ScanConfig::default(), t0());
        session.record(deception_snapshot(0.1));
        session.record(deception_snapshot(0.1));
        session.count_missing_audio();

        let summary = session.summary(&table, t0() + Duration::seconds(1));
        assert!(summary.quality_flags.contains(&QualityFlag::NoAudio));

        let summary = session.summary(&CalibrationTable::appearance(), t0());
        assert!(!summary.quality_flags.contains(&QualityFlag::NoAudio));
    }
}
