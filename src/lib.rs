//! # Yarbo Link Library
//!
//! Local telemetry and command core for Yarbo yard robots.
//!
//! This library turns a stream of decoded device reports into throttled
//! state updates and lifecycle events, serializes commands against the
//! robot's single controller session, answers request/response exchanges
//! such as the plan catalog, and keeps a rotating trace of the
//! wire traffic for diagnostics.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod plans;
pub mod recorder;
pub mod registry;
pub mod repairs;
pub mod telemetry;

pub use coordinator::{Coordinator, CoordinatorOptions};
pub use error::{Result, YarboError};
pub use gateway::{Command, CommandGateway};
pub use plans::PlanId;
pub use telemetry::TelemetrySnapshot;
