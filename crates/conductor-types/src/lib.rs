//! Shared domain types for Conductor.
//!
//! This crate contains the core domain types used across the Conductor
//! platform: workflow definitions and execution records, scheduled tasks and
//! task runs, collaborator DTOs, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod collab;
pub mod error;
pub mod task;
pub mod workflow;
