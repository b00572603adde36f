//! Synheart Scan - On-device multimodal feature pipeline for live capture scans
//!
//! Scan samples a camera's face landmarks and a microphone's analyser window on
//! a fixed tick, extracts a use case's features per tick, smooths them for live
//! display and, at the end of a bounded session, reduces the raw history to a
//! calibrated score: extraction → smoothing → session history → aggregation
//! → scoring → encoding.
//!
//! ## Modules
//!
//! - **Pipeline**: synchronous state machine driven tick by tick ([`ScanPipeline`])
//! - **Sampler**: async driver for live capture sources ([`sampling_loop`])
//! - **Schema**: recorded captures and offline replay ([`schema::CaptureReplay`])

pub mod aggregator;
pub mod calibration;
pub mod config;
pub mod encoder;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod pipeline;
pub mod sampler;
pub mod schema;
pub mod scoring;
pub mod session;
pub mod smoother;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use calibration::{CalibrationTable, FeatureCalibration, ScoreMode};
pub use config::ScanConfig;
pub use encoder::ScanEncoder;
pub use error::{GeometryError, ScanError};
pub use pipeline::{LoopState, ScanPipeline, TickOutcome};
pub use sampler::{
    sampling_loop, AudioSource, LandmarkProvider, LiveFeedback, LoopEvent, SamplingLoop,
    ScanHandle, VideoSource,
};
pub use smoother::{SmoothedState, TemporalSmoother};
pub use types::{
    AudioBuffer, Feature, FeatureHistory, FeatureSnapshot, LandmarkFrame, Point3, ScoreResult,
    SessionSummary, TranscriptEvent,
};

// Schema exports
pub use schema::{CaptureRecord, CaptureReplay, SCHEMA_VERSION};

/// Scan version embedded in all payloads
pub const SCAN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for payloads
pub const PRODUCER_NAME: &str = "synheart-scan";
