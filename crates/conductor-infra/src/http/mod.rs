//! Outbound HTTP execution for HTTP_REQUEST steps.

pub mod client;
