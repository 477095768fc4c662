//! Domain and protocol types for rollcall
//!
//! This crate defines the stable vocabulary shared by the engine, the store,
//! and clients:
//! - Domain types (sessions, attendance records, leave, verification windows)
//! - Commands and responses
//! - Events (service -> subscribed clients)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
