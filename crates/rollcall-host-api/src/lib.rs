//! Collaborator capabilities for the attendance engine
//!
//! This crate defines the interface between the engine and the services it
//! leans on but does not own: judging whether a check-in location is close
//! enough to the classroom, and storing leave attachments. It ships a local
//! implementation of each plus test doubles.

mod local;
mod mock;
mod traits;

pub use local::*;
pub use mock::*;
pub use traits::*;
