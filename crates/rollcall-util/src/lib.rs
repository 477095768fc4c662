//! Shared utilities for rollcall
//!
//! This crate provides:
//! - ID types (SessionId, RecordId, ApplicationId, ...)
//! - Time utilities (UTC timestamps, closed intervals, mock time)
//! - The attendance error taxonomy
//! - Rate limiting helpers
//! - Default paths for the socket, data directory, and config file

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
