//! Pipeline orchestration
//!
//! `ScanPipeline` is the synchronous core of one capture source: it owns the
//! loop state machine (Idle → Armed → Collecting → Idle), the extractor with
//! its carried positions, the live smoother and the active session. The async
//! driver in [`crate::sampler`] feeds it on a fixed tick; replay and FFI feed
//! it directly.

use crate::calibration::CalibrationTable;
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::extract::SignalExtractor;
use crate::session::Session;
use crate::smoother::{SmoothedState, TemporalSmoother};
use crate::types::{AudioBuffer, LandmarkFrame, ScoreResult, TranscriptEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Sampling loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// No timer running
    Idle,
    /// Ticking for live feedback, no session
    Armed,
    /// Ticking and recording into the active session
    Collecting,
}

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Snapshot appended to the session history
    Recorded,
    /// Snapshot used for live feedback only (armed, no session)
    Displayed,
    /// No landmark frame in time; nothing extracted
    Skipped,
    /// Loop is idle; tick ignored
    Ignored,
}

/// Stateful processor for one capture source
pub struct ScanPipeline {
    config: ScanConfig,
    table: Arc<CalibrationTable>,
    extractor: SignalExtractor,
    smoother: TemporalSmoother,
    session: Option<Session>,
    state: LoopState,
    face_detected: bool,
}

impl ScanPipeline {
    /// Create a pipeline for one use case
    pub fn new(config: ScanConfig, table: Arc<CalibrationTable>) -> Result<Self, ScanError> {
        config.validate()?;
        let extractor = SignalExtractor::for_table(&table, &config.audio);
        let smoother = TemporalSmoother::new(config.smoothing_alpha);

        Ok(Self {
            config,
            table,
            extractor,
            smoother,
            session: None,
            state: LoopState::Idle,
            face_detected: false,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<CalibrationTable> {
        &self.table
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected
    }

    /// Live smoothed features for display
    pub fn smoothed(&self) -> &SmoothedState {
        self.smoother.state()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Whether ticks should read the audio buffer at all
    pub fn needs_audio(&self) -> bool {
        self.table.uses_audio()
    }

    /// Start ticking for live feedback without recording
    pub fn arm(&mut self) {
        if self.state == LoopState::Idle {
            debug!("pipeline armed");
            self.state = LoopState::Armed;
        }
    }

    pub fn start_session(&mut self) -> Result<Uuid, ScanError> {
        self.start_session_at(Utc::now())
    }

    /// Open a session: history and smoother start from zero, carried
    /// positions are forgotten
    pub fn start_session_at(&mut self, at: DateTime<Utc>) -> Result<Uuid, ScanError> {
        if self.session.is_some() {
            return Err(ScanError::SessionAlreadyActive);
        }

        self.extractor.reset();
        self.smoother.reset();
        let session = Session::new(&self.config, at);
        let id = session.id();
        self.session = Some(session);
        self.state = LoopState::Collecting;

        info!(session_id = %id, use_case = self.table.name(), "session started");
        Ok(id)
    }

    /// Run one tick.
    ///
    /// `frame` is `None` when the landmark model produced no face (or did not
    /// answer in time): the tick is skipped entirely and no snapshot exists.
    pub fn process_tick(
        &mut self,
        frame: Option<LandmarkFrame>,
        audio: Option<&AudioBuffer>,
    ) -> TickOutcome {
        if self.state == LoopState::Idle {
            return TickOutcome::Ignored;
        }

        let Some(frame) = frame else {
            self.face_detected = false;
            if let Some(session) = self.session.as_mut() {
                session.skip();
            }
            debug!("tick skipped: no landmark frame");
            return TickOutcome::Skipped;
        };

        self.face_detected = true;
        let snapshot = self.extractor.extract(&frame, audio);
        drop(frame);

        let audio_missing = audio.is_none() && self.needs_audio();
        self.smoother.update(&snapshot);
        match self.session.as_mut() {
            Some(session) => {
                session.record(snapshot);
                if audio_missing {
                    session.count_missing_audio();
                }
                TickOutcome::Recorded
            }
            None => TickOutcome::Displayed,
        }
    }

    /// Fold a transcript update into the active session.
    ///
    /// Returns false (and drops the event) when no session is active.
    pub fn ingest_transcript(&mut self, event: &TranscriptEvent) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.ingest_transcript(event);
                true
            }
            None => {
                debug!("transcript event dropped: no active session");
                false
            }
        }
    }

    /// Whether the active session has run past the configured timeout
    pub fn session_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.session.as_ref(), self.config.session_timeout()) {
            (Some(session), Some(timeout)) => (now - session.started_at())
                .to_std()
                .map(|elapsed| elapsed >= timeout)
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn stop_session(&mut self) -> Result<ScoreResult, ScanError> {
        self.stop_session_at(Utc::now())
    }

    /// Close the session and score it exactly once.
    ///
    /// The loop returns to Idle and the history is dropped whatever the
    /// outcome; an empty history yields [`ScanError::InsufficientData`].
    pub fn stop_session_at(&mut self, at: DateTime<Utc>) -> Result<ScoreResult, ScanError> {
        let session = self.session.take().ok_or(ScanError::NoActiveSession)?;
        self.state = LoopState::Idle;
        self.face_detected = false;
        info!(session_id = %session.id(), ticks = session.history().len(), "session stopped");
        session.finish(&self.table, at)
    }

    /// Drop the active session without scoring it
    pub fn abort_session(&mut self) -> Option<Uuid> {
        self.state = LoopState::Idle;
        self.face_detected = false;
        let session = self.session.take()?;
        info!(session_id = %session.id(), "session aborted");
        Some(session.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::{frontal_face, shifted};
    use crate::types::{Feature, QualityFlag};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn pipeline(table: CalibrationTable) -> ScanPipeline {
        ScanPipeline::new(ScanConfig::default(), Arc::new(table)).unwrap()
    }

    fn voice() -> AudioBuffer {
        AudioBuffer::new((0..2048).map(|i| 0.2 * ((i as f32) * 0.07).sin()).collect())
    }

    #[test]
    fn test_state_machine() {
        let mut p = pipeline(CalibrationTable::deception());
        assert_eq!(p.state(), LoopState::Idle);
        assert_eq!(p.process_tick(Some(frontal_face()), None), TickOutcome::Ignored);

        p.arm();
        assert_eq!(p.state(), LoopState::Armed);
        assert_eq!(p.process_tick(Some(frontal_face()), None), TickOutcome::Displayed);

        p.start_session_at(t0()).unwrap();
        assert_eq!(p.state(), LoopState::Collecting);
        assert_eq!(p.process_tick(Some(frontal_face()), None), TickOutcome::Recorded);

        p.stop_session_at(t0() + Duration::seconds(1)).unwrap();
        assert_eq!(p.state(), LoopState::Idle);
        assert!(p.session().is_none());
    }

    #[test]
    fn test_only_one_session_at_a_time() {
        let mut p = pipeline(CalibrationTable::deception());
        p.start_session_at(t0()).unwrap();
        assert!(matches!(
            p.start_session_at(t0()),
            Err(ScanError::SessionAlreadyActive)
        ));
    }

    #[test]
    fn test_stop_without_session() {
        let mut p = pipeline(CalibrationTable::deception());
        assert!(matches!(p.stop_session(), Err(ScanError::NoActiveSession)));
    }

    #[test]
    fn test_skipped_tick_records_nothing() {
        let mut p = pipeline(CalibrationTable::deception());
        p.start_session_at(t0()).unwrap();
        p.process_tick(Some(frontal_face()), Some(&voice()));
        assert!(p.face_detected());

        assert_eq!(p.process_tick(None, Some(&voice())), TickOutcome::Skipped);
        assert!(!p.face_detected());
        assert_eq!(p.session().unwrap().history().len(), 1);
    }

    #[test]
    fn test_never_detected_face_is_insufficient_data() {
        let mut p = pipeline(CalibrationTable::deception());
        p.start_session_at(t0()).unwrap();
        for _ in 0..10 {
            p.process_tick(None, None);
        }

        let result = p.stop_session_at(t0() + Duration::seconds(1));
        assert!(matches!(result, Err(ScanError::InsufficientData(_))));
        // The failed session is still gone; a fresh one can be armed
        assert_eq!(p.state(), LoopState::Idle);
        assert!(p.start_session_at(t0()).is_ok());
    }

    #[test]
    fn test_history_keeps_raw_values_while_display_is_smoothed() {
        let mut p = pipeline(CalibrationTable::deception());
        p.start_session_at(t0()).unwrap();

        let face = frontal_face();
        p.process_tick(Some(face.clone()), None);
        p.process_tick(Some(shifted(&face, 0.03, 0.04)), None);

        let history = p.session().unwrap().history();
        let raw = history.values(Feature::HeadMovement);
        assert_eq!(raw[0], 0.0);
        assert!((raw[1] - 0.05).abs() < 1e-9);

        // α = 0.1: 0.1 * 0.05 on the second tick
        assert!((p.smoothed().get(Feature::HeadMovement) - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_session_start_resets_smoother() {
        let mut p = pipeline(CalibrationTable::deception());
        p.arm();
        p.process_tick(Some(frontal_face()), Some(&voice()));
        assert!(p.smoothed().get(Feature::LipTension) > 0.0);

        p.start_session_at(t0()).unwrap();
        assert!(p.smoothed().is_empty());
    }

    #[test]
    fn test_transcripts_need_a_session() {
        let mut p = pipeline(CalibrationTable::deception());
        let event = TranscriptEvent {
            at: t0(),
            text: "hello".to_string(),
            is_final: true,
        };
        assert!(!p.ingest_transcript(&event));
        p.start_session_at(t0()).unwrap();
        assert!(p.ingest_transcript(&event));
    }

    #[test]
    fn test_partial_session_scores() {
        let mut p = pipeline(CalibrationTable::deception());
        p.start_session_at(t0()).unwrap();
        let face = frontal_face();
        for i in 0..5 {
            p.process_tick(Some(shifted(&face, 0.001 * i as f64, 0.0)), Some(&voice()));
        }

        let result = p.stop_session_at(t0() + Duration::milliseconds(500)).unwrap();
        assert!((0.0..=100.0).contains(&result.score));
        assert_eq!(result.use_case, "deception");
        assert_eq!(result.summary.unwrap().ticks_recorded, 5);
    }

    #[test]
    fn test_ticks_without_audio_are_flagged() {
        let mut p = pipeline(CalibrationTable::deception());
        p.start_session_at(t0()).unwrap();
        p.process_tick(Some(frontal_face()), Some(&voice()));
        p.process_tick(Some(frontal_face()), None);

        let summary = p
            .stop_session_at(t0() + Duration::seconds(1))
            .unwrap()
            .summary
            .unwrap();
        assert!(summary.quality_flags.contains(&QualityFlag::NoAudio));

        // Tables without audio features never read a window
        let mut p = pipeline(CalibrationTable::appearance());
        p.start_session_at(t0()).unwrap();
        p.process_tick(Some(frontal_face()), None);
        let summary = p.stop_session_at(t0()).unwrap().summary.unwrap();
        assert!(!summary.quality_flags.contains(&QualityFlag::NoAudio));
    }

    #[test]
    fn test_session_timeout() {
        let mut config = ScanConfig::default();
        config.session_timeout_ms = Some(2_000);
        let mut p = ScanPipeline::new(config, Arc::new(CalibrationTable::appearance())).unwrap();

        assert!(!p.session_expired(t0()));
        p.start_session_at(t0()).unwrap();
        assert!(!p.session_expired(t0() + Duration::milliseconds(1_999)));
        assert!(p.session_expired(t0() + Duration::seconds(2)));
    }

    #[test]
    fn test_independent_pipelines_share_only_the_table() {
        let table = Arc::new(CalibrationTable::deception());
        let mut a = ScanPipeline::new(ScanConfig::default(), Arc::clone(&table)).unwrap();
        let mut b = ScanPipeline::new(ScanConfig::default(), Arc::clone(&table)).unwrap();

        a.start_session_at(t0()).unwrap();
        a.process_tick(Some(frontal_face()), None);

        assert!(b.session().is_none());
        assert!(b.smoothed().is_empty());
        b.start_session_at(t0()).unwrap();
        assert_eq!(b.session().unwrap().history().len(), 0);
        assert_eq!(a.session().unwrap().history().len(), 1);
    }

    #[test]
    fn test_abort_drops_history() {
        let mut p = pipeline(CalibrationTable::deception());
        let id = p.start_session_at(t0()).unwrap();
        p.process_tick(Some(frontal_face()), None);
        assert_eq!(p.abort_session(), Some(id));
        assert!(matches!(p.stop_session(), Err(ScanError::NoActiveSession)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ScanConfig::default();
        config.smoothing_alpha = 0.0;
        assert!(ScanPipeline::new(config, Arc::new(CalibrationTable::deception())).is_err());
    }
}
