//! FFI bindings for Synheart Scan
//!
//! This module provides C-compatible functions for calling Scan from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `scan_free_string`.
//!
//! Wherever a calibration table is expected, callers may pass either a preset
//! name (`"deception"`, `"trait_likelihood"`, `"appearance"`) or a table as JSON.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use crate::calibration::CalibrationTable;
use crate::config::ScanConfig;
use crate::encoder::ScanEncoder;
use crate::error::ScanError;
use crate::pipeline::{ScanPipeline, TickOutcome};
use crate::schema::CaptureReplay;
use crate::types::{AudioBuffer, LandmarkFrame, TranscriptEvent};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Preset name or calibration table JSON
fn resolve_table(name_or_json: &str) -> Result<CalibrationTable, ScanError> {
    match CalibrationTable::preset(name_or_json.trim()) {
        Some(table) => Ok(table),
        None => CalibrationTable::from_json(name_or_json),
    }
}

/// NULL selects the default configuration
unsafe fn resolve_config(config_json: *const c_char) -> Result<ScanConfig, ScanError> {
    if config_json.is_null() {
        return Ok(ScanConfig::default());
    }
    match cstr_to_string(config_json) {
        Some(json) => ScanConfig::from_json(&json),
        None => Err(ScanError::InvalidConfig("config is not valid UTF-8".to_string())),
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay an NDJSON capture and return the scan payload JSON.
///
/// # Safety
/// - `ndjson` and `table` must be valid null-terminated C strings.
/// - `config_json` must be a valid null-terminated C string or NULL for defaults.
/// - Returns a newly allocated string that must be freed with `scan_free_string`.
/// - Returns NULL on error; call `scan_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scan_replay_capture(
    ndjson: *const c_char,
    table: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(ndjson_str) = cstr_to_string(ndjson) else {
        set_last_error("Invalid capture string pointer");
        return ptr::null_mut();
    };
    let Some(table_str) = cstr_to_string(table) else {
        set_last_error("Invalid table string pointer");
        return ptr::null_mut();
    };

    let result = resolve_table(&table_str).and_then(|table| {
        let config = resolve_config(config_json)?;
        let result = CaptureReplay::replay_ndjson(&ndjson_str, &config, Arc::new(table))?;
        ScanEncoder::new().encode_to_json(&result)
    });

    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Return a calibration preset as JSON.
///
/// # Safety
/// - `name` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `scan_free_string`.
/// - Returns NULL on error; call `scan_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scan_calibration_preset(name: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(name_str) = cstr_to_string(name) else {
        set_last_error("Invalid preset name pointer");
        return ptr::null_mut();
    };

    let Some(table) = CalibrationTable::preset(&name_str) else {
        set_last_error(&format!(
            "Unknown preset '{}', expected one of: {}",
            name_str,
            CalibrationTable::PRESETS.join(", ")
        ));
        return ptr::null_mut();
    };

    match table.to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Pipeline API
// ============================================================================

/// Opaque handle to a ScanPipeline
pub struct ScanPipelineHandle {
    pipeline: ScanPipeline,
    encoder: ScanEncoder,
}

/// Create a pipeline for one calibration table.
///
/// # Safety
/// - `table` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string or NULL for defaults.
/// - Must be freed with `scan_pipeline_free`.
/// - Returns NULL on error; call `scan_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_new(
    table: *const c_char,
    config_json: *const c_char,
) -> *mut ScanPipelineHandle {
    clear_last_error();

    let Some(table_str) = cstr_to_string(table) else {
        set_last_error("Invalid table string pointer");
        return ptr::null_mut();
    };

    let pipeline = resolve_table(&table_str).and_then(|table| {
        let config = resolve_config(config_json)?;
        ScanPipeline::new(config, Arc::new(table))
    });

    match pipeline {
        Ok(pipeline) => Box::into_raw(Box::new(ScanPipelineHandle {
            pipeline,
            encoder: ScanEncoder::new(),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a pipeline.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_free(pipeline: *mut ScanPipelineHandle) {
    if !pipeline.is_null() {
        drop(Box::from_raw(pipeline));
    }
}

/// Start ticking for live feedback without recording.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_arm(pipeline: *mut ScanPipelineHandle) -> i32 {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    (*pipeline).pipeline.arm();
    0
}

/// Open a session and return its id.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`.
/// - Returns a newly allocated string that must be freed with `scan_free_string`.
/// - Returns NULL on error; call `scan_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_start_session(
    pipeline: *mut ScanPipelineHandle,
) -> *mut c_char {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &mut *pipeline;

    match handle.pipeline.start_session() {
        Ok(id) => string_to_cstr(&id.to_string()),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Run one tick.
///
/// `landmarks_json` is a JSON array of `[x, y, z]` points, or NULL when no face
/// was detected. `audio_json` is a JSON array of samples, or NULL.
///
/// Returns 1 when the tick was recorded, 2 when it only updated live
/// feedback, 0 when it was skipped for lack of a face, 3 when the pipeline
/// is idle, and -1 on error.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`.
/// - `landmarks_json` and `audio_json` must be valid null-terminated C strings or NULL.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_process_tick(
    pipeline: *mut ScanPipelineHandle,
    landmarks_json: *const c_char,
    audio_json: *const c_char,
) -> i32 {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    let handle = &mut *pipeline;

    let frame = match parse_optional::<Vec<[f64; 3]>>(landmarks_json, "landmarks") {
        Ok(points) => points.map(|p| LandmarkFrame::from_triples(&p)),
        Err(e) => {
            set_last_error(&e.to_string());
            return -1;
        }
    };
    let audio = match parse_optional::<Vec<f32>>(audio_json, "audio") {
        Ok(samples) => samples.map(AudioBuffer::new),
        Err(e) => {
            set_last_error(&e.to_string());
            return -1;
        }
    };

    match handle.pipeline.process_tick(frame, audio.as_ref()) {
        TickOutcome::Recorded => 1,
        TickOutcome::Displayed => 2,
        TickOutcome::Skipped => 0,
        TickOutcome::Ignored => 3,
    }
}

unsafe fn parse_optional<T: serde::de::DeserializeOwned>(
    json: *const c_char,
    what: &str,
) -> Result<Option<T>, ScanError> {
    if json.is_null() {
        return Ok(None);
    }
    let text = cstr_to_string(json)
        .ok_or_else(|| ScanError::ParseError(format!("{what} is not valid UTF-8")))?;
    Ok(Some(serde_json::from_str(&text)?))
}

/// Feed a transcript update into the active session.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`.
/// - `text` must be a valid null-terminated C string.
/// - Returns 0 when the event was taken, 1 when no session is active, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_ingest_transcript(
    pipeline: *mut ScanPipelineHandle,
    text: *const c_char,
    is_final: bool,
) -> i32 {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    let handle = &mut *pipeline;

    let Some(text_str) = cstr_to_string(text) else {
        set_last_error("Invalid transcript string pointer");
        return -1;
    };

    let event = TranscriptEvent {
        at: chrono::Utc::now(),
        text: text_str,
        is_final,
    };
    if handle.pipeline.ingest_transcript(&event) {
        0
    } else {
        1
    }
}

/// Current smoothed features as a JSON object.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`.
/// - Returns a newly allocated string that must be freed with `scan_free_string`.
/// - Returns NULL on error; call `scan_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_smoothed(pipeline: *mut ScanPipelineHandle) -> *mut c_char {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &*pipeline;

    match serde_json::to_string(handle.pipeline.smoothed()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stop the session and return the scan payload JSON.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`.
/// - Returns a newly allocated string that must be freed with `scan_free_string`.
/// - Returns NULL on error; call `scan_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_stop_session(
    pipeline: *mut ScanPipelineHandle,
) -> *mut c_char {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &mut *pipeline;

    let payload = handle
        .pipeline
        .stop_session()
        .and_then(|result| handle.encoder.encode_to_json(&result));

    match payload {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Drop the active session without scoring it.
///
/// # Safety
/// - `pipeline` must be a valid pointer returned by `scan_pipeline_new`.
/// - Returns 1 when a session was dropped, 0 when none was active, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn scan_pipeline_abort_session(
    pipeline: *mut ScanPipelineHandle,
) -> i32 {
    clear_last_error();

    if pipeline.is_null() {
        set_last_error("Null pipeline pointer");
        return -1;
    }
    match (*pipeline).pipeline.abort_session() {
        Some(_) => 1,
        None => 0,
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Scan functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Scan function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn scan_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Scan function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn scan_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Scan library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn scan_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::frontal_face;
    use crate::schema::CaptureRecord;
    use chrono::{Duration, TimeZone, Utc};

    fn frontal_face_json() -> CString {
        let points: Vec<[f64; 3]> = frontal_face()
            .points()
            .iter()
            .map(|p| [p.x, p.y, p.z])
            .collect();
        CString::new(serde_json::to_string(&points).unwrap()).unwrap()
    }

    fn sample_capture() -> CString {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let face = frontal_face();
        let lines: Vec<String> = (0..10)
            .map(|i| {
                let record =
                    CaptureRecord::tick(t0 + Duration::milliseconds(100 * i), Some(&face), None);
                serde_json::to_string(&record).unwrap()
            })
            .collect();
        CString::new(lines.join("\n")).unwrap()
    }

    #[test]
    fn test_ffi_replay_capture() {
        let capture = sample_capture();
        let table = CString::new("appearance").unwrap();

        unsafe {
            let result = scan_replay_capture(capture.as_ptr(), table.as_ptr(), ptr::null());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("payload_version"));
            assert!(result_str.contains("faceProportion"));

            scan_free_string(result);
        }
    }

    #[test]
    fn test_ffi_preset_round_trips_as_table() {
        let name = CString::new("deception").unwrap();
        let capture = sample_capture();

        unsafe {
            let preset = scan_calibration_preset(name.as_ptr());
            assert!(!preset.is_null());

            // The JSON form is accepted wherever a preset name is
            let pipeline = scan_pipeline_new(preset, ptr::null());
            assert!(!pipeline.is_null());
            scan_pipeline_free(pipeline);

            // Deception needs transcript counters, which the replay supplies
            let result = scan_replay_capture(capture.as_ptr(), preset, ptr::null());
            assert!(!result.is_null());
            scan_free_string(result);
            scan_free_string(preset);
        }
    }

    #[test]
    fn test_ffi_pipeline_lifecycle() {
        let table = CString::new("trait_likelihood").unwrap();
        let face = frontal_face_json();
        let audio = CString::new("[0.1, -0.2, 0.3, -0.1]").unwrap();
        let text = CString::new("hello there").unwrap();

        unsafe {
            let pipeline = scan_pipeline_new(table.as_ptr(), ptr::null());
            assert!(!pipeline.is_null());

            let id = scan_pipeline_start_session(pipeline);
            assert!(!id.is_null());
            scan_free_string(id);

            assert_eq!(scan_pipeline_process_tick(pipeline, face.as_ptr(), audio.as_ptr()), 1);
            assert_eq!(scan_pipeline_process_tick(pipeline, ptr::null(), ptr::null()), 0);
            assert_eq!(scan_pipeline_ingest_transcript(pipeline, text.as_ptr(), true), 0);

            let smoothed = scan_pipeline_smoothed(pipeline);
            assert!(CStr::from_ptr(smoothed).to_str().unwrap().contains("eyeAspectRatio"));
            scan_free_string(smoothed);

            let payload = scan_pipeline_stop_session(pipeline);
            assert!(!payload.is_null());
            assert!(CStr::from_ptr(payload)
                .to_str()
                .unwrap()
                .contains("trait_likelihood"));
            scan_free_string(payload);

            // No session left to stop
            assert!(scan_pipeline_stop_session(pipeline).is_null());
            scan_pipeline_free(pipeline);
        }
    }

    #[test]
    fn test_ffi_tick_codes_follow_pipeline_state() {
        let table = CString::new("appearance").unwrap();
        let face = frontal_face_json();

        unsafe {
            let pipeline = scan_pipeline_new(table.as_ptr(), ptr::null());
            assert_eq!(scan_pipeline_process_tick(pipeline, face.as_ptr(), ptr::null()), 3);
            assert_eq!(scan_pipeline_process_tick(pipeline, ptr::null(), ptr::null()), 3);

            assert_eq!(scan_pipeline_arm(pipeline), 0);
            assert_eq!(scan_pipeline_process_tick(pipeline, face.as_ptr(), ptr::null()), 2);
            assert_eq!(scan_pipeline_process_tick(pipeline, ptr::null(), ptr::null()), 0);

            scan_free_string(scan_pipeline_start_session(pipeline));
            assert_eq!(scan_pipeline_process_tick(pipeline, face.as_ptr(), ptr::null()), 1);
            assert_eq!(scan_pipeline_abort_session(pipeline), 1);
            assert_eq!(scan_pipeline_abort_session(pipeline), 0);

            // Abort returns the pipeline to idle
            assert_eq!(scan_pipeline_process_tick(pipeline, face.as_ptr(), ptr::null()), 3);
            assert!(scan_pipeline_stop_session(pipeline).is_null());
            scan_pipeline_free(pipeline);

            assert_eq!(scan_pipeline_arm(ptr::null_mut()), -1);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let bad = CString::new("not a preset").unwrap();
        let landmarks = CString::new("[[0.5, 0.5").unwrap();
        let table = CString::new("appearance").unwrap();

        unsafe {
            assert!(scan_calibration_preset(bad.as_ptr()).is_null());
            let error = CStr::from_ptr(scan_last_error()).to_str().unwrap();
            assert!(error.contains("Unknown preset"));

            assert!(scan_pipeline_new(bad.as_ptr(), ptr::null()).is_null());
            assert!(!scan_last_error().is_null());

            let pipeline = scan_pipeline_new(table.as_ptr(), ptr::null());
            scan_free_string(scan_pipeline_start_session(pipeline));
            assert_eq!(scan_pipeline_process_tick(pipeline, landmarks.as_ptr(), ptr::null()), -1);
            assert!(!scan_last_error().is_null());
            scan_pipeline_free(pipeline);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = scan_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
