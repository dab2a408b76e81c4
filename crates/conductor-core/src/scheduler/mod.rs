//! Persistence-backed timer system driving workflows from schedules.
//!
//! - `cron` -- 5-field cron expression parsing and next-occurrence resolution
//! - `schedule` -- next-run computation across one-time / interval / cron
//! - `scheduler` -- the timer map + backstop poll loop

pub mod cron;
pub mod schedule;
#[allow(clippy::module_inception)]
pub mod scheduler;
