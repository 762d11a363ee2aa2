//! # Telemetry Module
//!
//! Decoded device reports and everything derived from a single report.
//!
//! This module handles:
//! - The immutable [`TelemetrySnapshot`] record and its raw payload
//! - Ordered typed/raw fallback lookups for fields whose location drifts
//!   between firmware versions
//! - The shared activity classification
//! - Parsing the embedded GNGGA position sentence

pub mod activity;
pub mod fields;
pub mod gngga;
pub mod snapshot;

pub use activity::ActivityState;
pub use gngga::{parse_gngga, GnggaFix};
pub use snapshot::TelemetrySnapshot;
