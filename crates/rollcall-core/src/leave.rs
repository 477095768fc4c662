//! Leave application workflow
//!
//! Submission, approval, rejection and withdrawal each move the application
//! and its attendance record together: the store writes both rows in one
//! transaction, each guarded by the version that was read.

use rollcall_api::{
    Approval, ApprovalResult, AttendanceStatus, Decision, LeaveApplication, LeavePage, LeaveType,
    Page,
};
use rollcall_store::{AuditEventType, RecordUpdate, Store};
use rollcall_util::{
    format_clock_time, ApplicationId, AttachmentRef, AttendanceError, RecordId, Result, StudentId,
    TeacherId, Timestamp,
};
use tracing::{debug, info};

use crate::engine::append_audit;
use crate::record;
use crate::window::{leave_deadline, withdraw_deadline};
use crate::{CoreEvent, Outcome};

/// Record status an application in `result` keeps its linked record in
fn linked_status(result: ApprovalResult) -> Option<AttendanceStatus> {
    match result {
        ApprovalResult::Pending => Some(AttendanceStatus::LeavePending),
        ApprovalResult::Approved => Some(AttendanceStatus::Leave),
        ApprovalResult::Rejected => Some(AttendanceStatus::LeaveRejected),
        ApprovalResult::Cancelled => None,
    }
}

pub struct LeaveWorkflow<'a> {
    store: &'a dyn Store,
}

impl<'a> LeaveWorkflow<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    fn load(&self, application_id: &ApplicationId) -> Result<LeaveApplication> {
        self.store
            .get_leave(application_id)?
            .ok_or_else(|| AttendanceError::not_found(format!("leave application {}", application_id)))
    }

    pub fn submit(
        &self,
        record_id: &RecordId,
        reason: &str,
        leave_type: LeaveType,
        attachments: Vec<AttachmentRef>,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        let record = self
            .store
            .get_record(record_id)?
            .ok_or_else(|| AttendanceError::not_found(format!("attendance record {}", record_id)))?;
        let session = self.store.get_session(&record.session_id)?.ok_or_else(|| {
            AttendanceError::not_found(format!("session {}", record.session_id))
        })?;

        if record.status == AttendanceStatus::Present {
            return Err(AttendanceError::already_checked_in(format!(
                "student {} is already present for {}",
                record.student_id, session.id
            )));
        }

        let deadline = leave_deadline(&session);
        if now >= deadline {
            return Err(AttendanceError::deadline_passed(format!(
                "leave for {} closed at {}",
                session.id,
                format_clock_time(&deadline)
            )));
        }

        if let Some(active) = self.store.active_leave_for_record(&record.id)? {
            return Err(AttendanceError::duplicate_application(format!(
                "application {} is already {}",
                active.id, active.status
            )));
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AttendanceError::validation("leave reason must not be empty"));
        }

        let application_id = ApplicationId::new();
        let next = record::leave_submitted(&record, application_id, now)?;
        let application = LeaveApplication {
            id: application_id,
            record_id: record.id,
            session_id: session.id.clone(),
            student_id: record.student_id.clone(),
            reason: reason.to_string(),
            leave_type,
            attachments,
            submitted_at: now,
            withdraw_deadline: withdraw_deadline(&session),
            status: ApprovalResult::Pending,
            approvals: Vec::new(),
            version: 0,
        };

        self.store.insert_leave(
            &application,
            RecordUpdate {
                record: &next,
                expected_version: record.version,
            },
        )?;

        info!(
            application_id = %application.id,
            session_id = %session.id,
            student_id = %record.student_id,
            leave_type = leave_type.as_str(),
            "Leave submitted"
        );
        append_audit(
            self.store,
            AuditEventType::LeaveSubmitted {
                application_id: application.id,
                record_id: record.id,
                student_id: record.student_id.clone(),
            },
            now,
        );

        let events = vec![
            CoreEvent::record_changed(&record, &next),
            CoreEvent::LeaveSubmitted {
                application_id: application.id,
                session_id: application.session_id.clone(),
                student_id: application.student_id.clone(),
            },
        ];
        Ok(Outcome::new(application, events))
    }

    pub fn approve(
        &self,
        application_id: &ApplicationId,
        approver_id: &TeacherId,
        comment: Option<&str>,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        self.decide(
            application_id,
            approver_id,
            Decision::Approved,
            comment.unwrap_or_default(),
            now,
        )
    }

    pub fn reject(
        &self,
        application_id: &ApplicationId,
        approver_id: &TeacherId,
        comment: &str,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        self.decide(application_id, approver_id, Decision::Rejected, comment, now)
    }

    fn decide(
        &self,
        application_id: &ApplicationId,
        approver_id: &TeacherId,
        decision: Decision,
        comment: &str,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        let application = self.load(application_id)?;
        let comment = comment.trim();

        if decision == Decision::Rejected && comment.is_empty() {
            return Err(AttendanceError::validation("a rejection needs a comment"));
        }

        let Some(expected_status) = linked_status(application.status) else {
            return Err(AttendanceError::invalid_transition(format!(
                "application {} was withdrawn",
                application.id
            )));
        };

        if let Some(latest) = application.latest_approval() {
            if &latest.approver_id == approver_id && latest.result == decision {
                debug!(
                    application_id = %application.id,
                    approver_id = %approver_id,
                    decision = decision.as_str(),
                    "Repeated leave decision ignored"
                );
                return Ok(Outcome::unchanged(application));
            }
        }

        let mut next_app = application.clone();
        next_app.approvals.push(Approval {
            approver_id: approver_id.clone(),
            result: decision,
            comment: comment.to_string(),
            decided_at: now,
        });
        next_app.status = decision.result();
        next_app.version = application.version + 1;

        let mut events = Vec::new();

        if application.status == decision.result() {
            // Concurring approver; the record already reflects this result
            self.store.update_leave(&next_app, application.version, None)?;
        } else {
            let record = self.store.get_record(&application.record_id)?.ok_or_else(|| {
                AttendanceError::not_found(format!("attendance record {}", application.record_id))
            })?;

            if record.leave_application_id != Some(application.id) || record.status != expected_status
            {
                return Err(AttendanceError::invalid_transition(format!(
                    "record for {} is {} and no longer follows application {}",
                    record.student_id, record.status, application.id
                )));
            }

            let next_record = record::leave_decided(&record, decision, now)?;
            self.store.update_leave(
                &next_app,
                application.version,
                Some(RecordUpdate {
                    record: &next_record,
                    expected_version: record.version,
                }),
            )?;
            events.push(CoreEvent::record_changed(&record, &next_record));
        }

        info!(
            application_id = %next_app.id,
            approver_id = %approver_id,
            decision = decision.as_str(),
            "Leave decided"
        );
        append_audit(
            self.store,
            AuditEventType::LeaveDecided {
                application_id: next_app.id,
                approver_id: approver_id.clone(),
                decision,
            },
            now,
        );

        events.push(CoreEvent::LeaveDecided {
            application_id: next_app.id,
            result: next_app.status,
            approver_id: Some(approver_id.clone()),
        });
        Ok(Outcome::new(next_app, events))
    }

    /// Cancel an application before the session starts. The record is reset
    /// only while it is still in a leave state tied to this application.
    pub fn withdraw(
        &self,
        application_id: &ApplicationId,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        let application = self.load(application_id)?;

        if application.status == ApprovalResult::Cancelled {
            return Err(AttendanceError::invalid_transition(format!(
                "application {} was already withdrawn",
                application.id
            )));
        }

        if now >= application.withdraw_deadline {
            return Err(AttendanceError::deadline_passed(format!(
                "withdrawal closed at {}",
                format_clock_time(&application.withdraw_deadline)
            )));
        }

        let record = self.store.get_record(&application.record_id)?.ok_or_else(|| {
            AttendanceError::not_found(format!("attendance record {}", application.record_id))
        })?;

        let mut next_app = application.clone();
        next_app.status = ApprovalResult::Cancelled;
        next_app.version = application.version + 1;

        let linked = record.leave_application_id == Some(application.id)
            && record.status.is_leave_state();

        let mut events = Vec::new();
        if linked {
            let next_record = record::leave_withdrawn(&record, now)?;
            self.store.update_leave(
                &next_app,
                application.version,
                Some(RecordUpdate {
                    record: &next_record,
                    expected_version: record.version,
                }),
            )?;
            events.push(CoreEvent::record_changed(&record, &next_record));
        } else {
            self.store.update_leave(&next_app, application.version, None)?;
        }

        info!(
            application_id = %next_app.id,
            student_id = %next_app.student_id,
            record_reset = linked,
            "Leave withdrawn"
        );
        append_audit(
            self.store,
            AuditEventType::LeaveWithdrawn {
                application_id: next_app.id,
                student_id: next_app.student_id.clone(),
                record_reset: linked,
            },
            now,
        );

        events.push(CoreEvent::LeaveDecided {
            application_id: next_app.id,
            result: ApprovalResult::Cancelled,
            approver_id: None,
        });
        Ok(Outcome::new(next_app, events))
    }

    /// Pending applications awaiting `teacher_id`, oldest first
    pub fn pending_for(&self, teacher_id: &TeacherId, page: Page) -> Result<LeavePage> {
        let items = self.store.pending_leaves(teacher_id, page)?;
        let next_offset = page.next_offset(items.len());
        Ok(LeavePage { items, next_offset })
    }

    /// A student's applications, newest first
    pub fn history_for(&self, student_id: &StudentId, page: Page) -> Result<LeavePage> {
        let items = self.store.leave_history(student_id, page)?;
        let next_offset = page.next_offset(items.len());
        Ok(LeavePage { items, next_offset })
    }
}
