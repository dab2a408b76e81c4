//! Workflow engine core: definition validation, step walk, and persistence.
//!
//! This module contains the "brain" of the workflow engine:
//! - `definition` -- YAML parsing, structural validation, branch-graph checks
//! - `context` -- per-execution state with step result tracking
//! - `interpolate` -- `{{path.to.value}}` substitution into step config
//! - `condition` -- restricted boolean expression evaluator for CONDITIONAL steps
//! - `retry` -- retry wrapper with constant or multiplicative backoff
//! - `step_runner` -- handler registry and the built-in step handlers
//! - `engine` -- the sequential step-walk executor
//! - `recovery` -- startup sweep for executions orphaned by a crash

pub mod condition;
pub mod context;
pub mod definition;
pub mod engine;
pub mod interpolate;
pub mod recovery;
pub mod retry;
pub mod step_runner;
