//! Core data model and shared services for gaffer: work items, feedback
//! entries and their grouping, task registry types, the agent session
//! store, configuration, and telemetry setup.

pub mod config;
pub mod feedback;
pub mod item;
pub mod session;
pub mod task;
pub mod telemetry;
