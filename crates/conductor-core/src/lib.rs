//! Workflow engine, scheduler, and repository trait definitions for Conductor.
//!
//! This crate defines the "ports" (repository traits and collaborator traits)
//! that the infrastructure layer implements, plus the two subsystems built on
//! top of them:
//!
//! - [`workflow`] -- the definition-driven step-execution engine with retry,
//!   branching, variable interpolation, and cooperative cancellation.
//! - [`scheduler`] -- the persistence-backed timer system that drives
//!   workflows from one-time, interval, or cron schedules.
//!
//! It depends only on `conductor-types` and runtime crates -- never on
//! `conductor-infra` or any database/IO crate.

pub mod collab;
pub mod repository;
pub mod scheduler;
pub mod workflow;
