//! Attendance engine for rollcalld
//!
//! This crate is the single authority on attendance state:
//! - Eligibility intervals derived from a session's start/end (check-in,
//!   leave deadline, makeup, verification)
//! - The attendance record state machine, including the lazy read-time
//!   absent/truant rollup
//! - Leave workflow (submit, approve, reject, withdraw)
//! - Verification windows against proxy check-ins
//! - Absence aggregation
//!
//! Every operation takes `now` explicitly; nothing here reads the clock.

mod aggregate;
mod engine;
mod events;
mod leave;
mod record;
mod verification;
mod window;

pub use aggregate::*;
pub use engine::*;
pub use events::*;
pub use leave::*;
pub use record::*;
pub use verification::*;
pub use window::*;
