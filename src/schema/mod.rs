//! scan.capture_record.v1 schema
//!
//! Recorded capture sessions as newline-delimited JSON: one record per tick
//! (landmarks and audio window) or per transcript update. Captures can be
//! replayed through the pipeline offline to reproduce a session's score.

mod capture_record;
mod replay;

pub use capture_record::*;
pub use replay::*;
