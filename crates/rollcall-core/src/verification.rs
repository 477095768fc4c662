//! Verification windows
//!
//! A teacher opens a short window during class; students who checked in
//! confirm they are physically present by echoing its token. The store
//! refuses a second window while one is unexpired, so racing opens produce
//! exactly one row.

use rand::Rng;
use rollcall_api::{CourseSession, VerificationWindow, WindowStatus};
use rollcall_config::EnginePolicy;
use rollcall_store::{AuditEventType, RecordUpdate, Store};
use rollcall_util::{
    format_clock_time, AttendanceError, Interval, Result, SessionId, StudentId, TeacherId,
    Timestamp, WindowId,
};
use tracing::{debug, info};

use crate::engine::append_audit;
use crate::record;
use crate::window::{verification_guard, VerificationGuard};
use crate::{CoreEvent, Outcome};

/// Six decimal digits, zero padded
fn generate_token() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

pub struct VerificationManager<'a> {
    store: &'a dyn Store,
    policy: &'a EnginePolicy,
}

impl<'a> VerificationManager<'a> {
    pub fn new(store: &'a dyn Store, policy: &'a EnginePolicy) -> Self {
        Self { store, policy }
    }

    fn session(&self, session_id: &SessionId) -> Result<CourseSession> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| AttendanceError::not_found(format!("session {}", session_id)))
    }

    pub fn open(
        &self,
        session_id: &SessionId,
        teacher_id: &TeacherId,
        duration_minutes: Option<u32>,
        now: Timestamp,
    ) -> Result<Outcome<VerificationWindow>> {
        let session = self.session(session_id)?;

        let duration = duration_minutes.unwrap_or(self.policy.verification_default_minutes);
        if duration == 0 {
            return Err(AttendanceError::validation(
                "verification window needs a positive duration",
            ));
        }
        if duration > self.policy.verification_max_minutes {
            return Err(AttendanceError::validation(format!(
                "verification window may last at most {} minutes",
                self.policy.verification_max_minutes
            )));
        }

        if !session.needs_checkin {
            return Err(AttendanceError::not_eligible(format!(
                "session {} does not take attendance",
                session.id
            )));
        }

        let last = self.store.latest_window(&session.id)?;
        match verification_guard(
            &session,
            now,
            last.as_ref(),
            self.policy.verification_min_delay_minutes,
        ) {
            VerificationGuard::Eligible => {}
            VerificationGuard::TooEarly { opens_at } => {
                return Err(AttendanceError::not_eligible(format!(
                    "verification opens at {}",
                    format_clock_time(&opens_at)
                )));
            }
            VerificationGuard::SessionOver { ended_at } => {
                return Err(AttendanceError::not_eligible(format!(
                    "session ended at {}",
                    format_clock_time(&ended_at)
                )));
            }
            VerificationGuard::WindowActive { until } => {
                return Err(AttendanceError::window_already_active(format!(
                    "current window runs until {}",
                    format_clock_time(&until)
                )));
            }
        }

        let window = VerificationWindow {
            id: WindowId::new(),
            session_id: session.id.clone(),
            opened_by: teacher_id.clone(),
            opened_at: now,
            duration_minutes: duration,
            token: generate_token(),
        };
        self.store.insert_window(&window)?;

        let expires_at = window.expires_at();
        info!(
            window_id = %window.id,
            session_id = %session.id,
            teacher_id = %teacher_id,
            duration_minutes = duration,
            "Verification window opened"
        );
        append_audit(
            self.store,
            AuditEventType::VerificationWindowOpened {
                window_id: window.id,
                session_id: session.id.clone(),
                teacher_id: teacher_id.clone(),
                expires_at,
            },
            now,
        );

        let event = CoreEvent::VerificationWindowOpened {
            session_id: session.id,
            window_id: window.id,
            expires_at,
        };
        Ok(Outcome::new(window, vec![event]))
    }

    pub fn status(&self, session_id: &SessionId, now: Timestamp) -> Result<WindowStatus> {
        let session = self.session(session_id)?;

        Ok(match self.store.latest_window(&session.id)? {
            None => WindowStatus::None,
            Some(window) if window.is_active(now) => {
                let remaining = Interval::new(window.opened_at, window.expires_at()).remaining(now);
                // Partial seconds round up
                let remaining_seconds =
                    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                WindowStatus::Active {
                    window,
                    remaining_seconds,
                }
            }
            Some(window) => WindowStatus::Expired { window },
        })
    }

    /// A present student echoes the active window's token
    pub fn verify(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
        token: &str,
        now: Timestamp,
    ) -> Result<Outcome<VerificationWindow>> {
        let session = self.session(session_id)?;

        let window = match self.store.latest_window(&session.id)? {
            Some(window) if window.is_active(now) => window,
            _ => {
                return Err(AttendanceError::not_eligible(format!(
                    "no verification window is open for {}",
                    session.id
                )));
            }
        };

        if window.token != token.trim() {
            return Err(AttendanceError::validation("verification token does not match"));
        }

        let current = self.store.find_record(&session.id, student_id)?.ok_or_else(|| {
            AttendanceError::not_found(format!("{} is not on the roster of {}", student_id, session.id))
        })?;

        let Some(next) = record::presence_verified(&current, window.id, now)? else {
            debug!(
                window_id = %window.id,
                student_id = %student_id,
                "Presence already verified"
            );
            return Ok(Outcome::unchanged(window));
        };

        self.store.update_record(RecordUpdate {
            record: &next,
            expected_version: current.version,
        })?;

        debug!(window_id = %window.id, student_id = %student_id, "Presence verified");
        append_audit(
            self.store,
            AuditEventType::PresenceVerified {
                window_id: window.id,
                record_id: next.id,
                student_id: student_id.clone(),
            },
            now,
        );

        Ok(Outcome::unchanged(window))
    }
}
