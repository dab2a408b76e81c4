//! SQLite-backed persistence and collaborator implementations.

pub mod memory;
pub mod notification;
pub mod pool;
pub mod task;
pub mod workflow;

use chrono::{DateTime, Utc};
use conductor_types::error::RepositoryError;
use uuid::Uuid;

/// Parse a TEXT column into a UUID.
pub(crate) fn parse_uuid(text: &str) -> Result<Uuid, RepositoryError> {
    text.parse()
        .map_err(|_| RepositoryError::Query(format!("invalid UUID: {text}")))
}

/// Parse an RFC 3339 TEXT column into a UTC timestamp.
pub(crate) fn parse_datetime(text: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Query(format!("invalid timestamp: {text}")))
}
