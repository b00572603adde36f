//! Async sampling loop
//!
//! Drives a [`ScanPipeline`] from live capture sources on a fixed tick. The
//! loop runs as one task; callers talk to it through a [`ScanHandle`]:
//! commands go in over an mpsc channel, live feedback comes back over a watch
//! channel, and out-of-band outcomes (session timeouts, capture faults) over a
//! second mpsc channel.
//!
//! Each tick grabs the latest video frame, asks the landmark model for a face
//! with a deadline of one tick interval, reads the audio window, and runs the
//! pipeline. A model that misses the deadline skips the tick; ticks never
//! queue up behind a slow model.

use crate::calibration::CalibrationTable;
use crate::config::{AudioConfig, ScanConfig};
use crate::error::ScanError;
use crate::pipeline::{LoopState, ScanPipeline};
use crate::smoother::SmoothedState;
use crate::types::{AudioBuffer, LandmarkFrame, ScoreResult, TranscriptEvent};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMMAND_CAPACITY: usize = 16;
const TRANSCRIPT_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 16;

/// Camera or other frame source
pub trait VideoSource: Send {
    type Image: Send;

    /// Most recent frame, or `None` when the stream has not produced one yet
    fn latest(&mut self) -> Result<Option<Self::Image>, ScanError>;
}

/// Face landmark model
pub trait LandmarkProvider<I>: Send {
    /// Estimate the landmarks of the first face in `image`; `None` when no
    /// face is visible
    fn estimate(
        &mut self,
        image: I,
    ) -> impl Future<Output = Result<Option<LandmarkFrame>, ScanError>> + Send;
}

/// Microphone analyser exposing its time-domain window
pub trait AudioSource: Send {
    /// Apply the analyser settings (window size, smoothing constant) before
    /// the first read
    fn configure(&mut self, _config: &AudioConfig) -> Result<(), ScanError> {
        Ok(())
    }

    /// Overwrite `out` with the current window
    fn read_time_domain(&mut self, out: &mut AudioBuffer) -> Result<(), ScanError>;
}

/// Snapshot published after every tick and state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveFeedback {
    pub state: LoopState,
    pub face_detected: bool,
    pub session_id: Option<Uuid>,
    pub smoothed: SmoothedState,
}

impl Default for LiveFeedback {
    fn default() -> Self {
        Self {
            state: LoopState::Idle,
            face_detected: false,
            session_id: None,
            smoothed: SmoothedState::default(),
        }
    }
}

/// Outcomes the loop produces on its own
#[derive(Debug)]
pub enum LoopEvent {
    /// The session hit its timeout and was scored
    SessionTimedOut(Result<ScoreResult, ScanError>),
    /// A capture source failed and the loop returned to Idle. The ticks
    /// recorded before the fault are scored into `partial` when there were
    /// any.
    Fault {
        session_id: Option<Uuid>,
        error: ScanError,
        partial: Option<ScoreResult>,
    },
}

enum Command {
    Arm,
    Start {
        reply: oneshot::Sender<Result<Uuid, ScanError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<ScoreResult, ScanError>>,
    },
    Abort {
        reply: oneshot::Sender<Option<Uuid>>,
    },
    Shutdown,
}

/// Build a sampling loop and the handle that controls it.
///
/// `audio` may be `None` only when the table declares no audio features;
/// otherwise the missing microphone is [`ScanError::DeviceUnavailable`].
pub fn sampling_loop<V, L>(
    config: ScanConfig,
    table: Arc<CalibrationTable>,
    video: V,
    landmarks: L,
    mut audio: Option<Box<dyn AudioSource>>,
) -> Result<(SamplingLoop<V, L>, ScanHandle), ScanError>
where
    V: VideoSource,
    L: LandmarkProvider<V::Image>,
{
    match audio.as_mut() {
        Some(source) => source.configure(&config.audio)?,
        None if table.uses_audio() => {
            return Err(ScanError::DeviceUnavailable(format!(
                "use case '{}' needs a microphone",
                table.name()
            )));
        }
        None => {}
    }

    let buffer = AudioBuffer::zeroed(config.audio.window_size);
    let pipeline = ScanPipeline::new(config, table)?;

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (transcript_tx, transcript_rx) = mpsc::channel(TRANSCRIPT_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
    let (live_tx, live_rx) = watch::channel(LiveFeedback::default());

    let sampler = SamplingLoop {
        pipeline,
        video,
        landmarks,
        audio,
        buffer,
        deadline: None,
        commands: command_rx,
        transcripts: transcript_rx,
        events: event_tx,
        live: live_tx,
    };
    let handle = ScanHandle {
        commands: command_tx,
        transcripts: transcript_tx,
        events: event_rx,
        live: live_rx,
    };

    Ok((sampler, handle))
}

/// The loop task; consume it with [`SamplingLoop::run`]
pub struct SamplingLoop<V, L> {
    pipeline: ScanPipeline,
    video: V,
    landmarks: L,
    audio: Option<Box<dyn AudioSource>>,
    buffer: AudioBuffer,
    deadline: Option<Instant>,
    commands: mpsc::Receiver<Command>,
    transcripts: mpsc::Receiver<TranscriptEvent>,
    events: mpsc::Sender<LoopEvent>,
    live: watch::Sender<LiveFeedback>,
}

impl<V, L> SamplingLoop<V, L>
where
    V: VideoSource,
    L: LandmarkProvider<V::Image>,
{
    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let mut ticker = time::interval(self.pipeline.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            use_case = self.pipeline.table().name(),
            tick_ms = self.pipeline.config().tick_interval_ms,
            "sampling loop started"
        );

        loop {
            let ticking = self.pipeline.state() != LoopState::Idle;

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command, &mut ticker),
                    }
                }

                Some(event) = self.transcripts.recv() => {
                    self.pipeline.ingest_transcript(&event);
                }

                _ = ticker.tick(), if ticking => {
                    self.tick().await;
                }
            }
        }

        self.pipeline.abort_session();
        self.publish_live();
        info!("sampling loop stopped");
    }

    fn handle_command(&mut self, command: Command, ticker: &mut Interval) {
        match command {
            Command::Arm => {
                if self.pipeline.state() == LoopState::Idle {
                    self.pipeline.arm();
                    ticker.reset_immediately();
                }
            }
            Command::Start { reply } => {
                let was_idle = self.pipeline.state() == LoopState::Idle;
                let result = self.pipeline.start_session();
                if result.is_ok() {
                    self.deadline = self
                        .pipeline
                        .config()
                        .session_timeout()
                        .map(|timeout| Instant::now() + timeout);
                    if was_idle {
                        ticker.reset_immediately();
                    }
                }
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.deadline = None;
                let result = self.pipeline.stop_session();
                let _ = reply.send(result);
            }
            Command::Abort { reply } => {
                self.deadline = None;
                let _ = reply.send(self.pipeline.abort_session());
            }
            Command::Shutdown => {}
        }
        self.publish_live();
    }

    async fn tick(&mut self) {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.deadline = None;
            info!("session timed out");
            let result = self.pipeline.stop_session();
            self.emit(LoopEvent::SessionTimedOut(result));
            self.publish_live();
            return;
        }

        let budget = self.pipeline.config().tick_interval();
        let frame = match self.acquire_frame(budget).await {
            Ok(frame) => frame,
            Err(error) => return self.fault(error),
        };

        let read = match self.audio.as_mut() {
            Some(source) if frame.is_some() && self.pipeline.needs_audio() => {
                source.read_time_domain(&mut self.buffer).map(|_| true)
            }
            _ => Ok(false),
        };
        let audio = match read {
            Ok(true) => Some(&self.buffer),
            Ok(false) => None,
            Err(error) => return self.fault(error),
        };

        self.pipeline.process_tick(frame, audio);
        self.publish_live();
    }

    async fn acquire_frame(
        &mut self,
        budget: Duration,
    ) -> Result<Option<LandmarkFrame>, ScanError> {
        let Some(image) = self.video.latest()? else {
            debug!("no video frame available");
            return Ok(None);
        };

        match time::timeout(budget, self.landmarks.estimate(image)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(budget_ms = budget.as_millis() as u64, "landmark model missed the tick");
                Ok(None)
            }
        }
    }

    fn fault(&mut self, error: ScanError) {
        self.deadline = None;
        let session_id = self.pipeline.session().map(|s| s.id());
        let partial = match session_id {
            Some(_) => self.pipeline.stop_session().ok(),
            None => {
                self.pipeline.abort_session();
                None
            }
        };
        error!(
            session_id = ?session_id,
            error = %error,
            retryable = error.is_retryable(),
            scored = partial.is_some(),
            "capture source failed, returning to idle"
        );
        self.emit(LoopEvent::Fault {
            session_id,
            error,
            partial,
        });
        self.publish_live();
    }

    fn emit(&self, event: LoopEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("dropping loop event: {e}");
        }
    }

    fn publish_live(&self) {
        self.live.send_replace(LiveFeedback {
            state: self.pipeline.state(),
            face_detected: self.pipeline.face_detected(),
            session_id: self.pipeline.session().map(|s| s.id()),
            smoothed: self.pipeline.smoothed().clone(),
        });
    }
}

/// Control surface of a running [`SamplingLoop`]
pub struct ScanHandle {
    commands: mpsc::Sender<Command>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    events: mpsc::Receiver<LoopEvent>,
    live: watch::Receiver<LiveFeedback>,
}

impl ScanHandle {
    /// Start ticking for live feedback without recording
    pub async fn arm(&self) -> Result<(), ScanError> {
        self.send(Command::Arm).await
    }

    pub async fn start_session(&self) -> Result<Uuid, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply }).await?;
        rx.await.map_err(|_| ScanError::LoopClosed)?
    }

    /// Stop the session and wait for its score
    pub async fn stop_session(&self) -> Result<ScoreResult, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| ScanError::LoopClosed)?
    }

    pub async fn abort_session(&self) -> Result<Option<Uuid>, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Abort { reply }).await?;
        rx.await.map_err(|_| ScanError::LoopClosed)
    }

    pub async fn shutdown(&self) -> Result<(), ScanError> {
        self.send(Command::Shutdown).await
    }

    /// Latest live feedback
    pub fn live(&self) -> LiveFeedback {
        self.live.borrow().clone()
    }

    pub fn smoothed(&self) -> SmoothedState {
        self.live.borrow().smoothed.clone()
    }

    /// Receiver that wakes on every published update
    pub fn subscribe(&self) -> watch::Receiver<LiveFeedback> {
        self.live.clone()
    }

    /// Sender for the speech recognizer's transcript events
    pub fn transcript_sender(&self) -> mpsc::Sender<TranscriptEvent> {
        self.transcripts.clone()
    }

    pub async fn push_transcript(&self, event: TranscriptEvent) -> Result<(), ScanError> {
        self.transcripts
            .send(event)
            .await
            .map_err(|_| ScanError::LoopClosed)
    }

    /// Next timeout or fault produced by the loop
    pub async fn next_event(&mut self) -> Option<LoopEvent> {
        self.events.recv().await
    }

    async fn send(&self, command: Command) -> Result<(), ScanError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ScanError::LoopClosed)
    }
}
