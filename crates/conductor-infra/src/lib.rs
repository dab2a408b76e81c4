//! Infrastructure implementations for Conductor.
//!
//! Implements the repository and collaborator traits defined in
//! `conductor-core`:
//! - [`sqlite`] -- SQLite persistence (workflow + task repositories,
//!   notification sink, memory manager) over split read/write pools
//! - [`http`] -- outbound HTTP executor with a hard request timeout
//! - [`llm`] -- Anthropic-backed LLM provider

pub mod http;
pub mod llm;
pub mod sqlite;
