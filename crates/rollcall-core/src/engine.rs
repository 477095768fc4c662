//! Attendance engine

use rollcall_api::{
    AbsenceStat, AttendanceRecord, CheckInMethod, CourseSession, GeoPoint, LeaveApplication,
    LeavePage, LeaveType, NewSession, Page, RecordPage, RecordSort, RecordView,
    VerificationWindow, WindowStatus,
};
use rollcall_config::EnginePolicy;
use rollcall_host_api::{AttachmentStore, LocationValidator};
use rollcall_store::{AuditEvent, AuditEventType, RecordUpdate, SessionRecord, Store};
use rollcall_util::{
    format_clock_time, ApplicationId, AttachmentRef, AttendanceError, CourseCode, RecordId,
    Result, SessionId, StudentId, TeacherId, Timestamp,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregate::{record_view, AbsenceAggregator};
use crate::leave::LeaveWorkflow;
use crate::record::{self, RecordAction};
use crate::verification::VerificationManager;
use crate::window::{checkin_window, effective_status, makeup_open};
use crate::{CoreEvent, Outcome};

/// Audit failures are logged, never surfaced to the caller
pub(crate) fn append_audit(store: &dyn Store, event: AuditEventType, now: Timestamp) {
    if let Err(e) = store.append_audit(AuditEvent::new(event, now)) {
        warn!(error = %e, "Failed to append audit event");
    }
}

/// The attendance engine
pub struct AttendanceEngine {
    policy: EnginePolicy,
    store: Arc<dyn Store>,
    locations: Arc<dyn LocationValidator>,
    attachments: Arc<dyn AttachmentStore>,
}

impl AttendanceEngine {
    pub fn new(
        policy: EnginePolicy,
        store: Arc<dyn Store>,
        locations: Arc<dyn LocationValidator>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        info!(
            checkin_pre_minutes = policy.default_offsets.checkin_pre_minutes,
            checkin_post_minutes = policy.default_offsets.checkin_post_minutes,
            max_location_distance_m = policy.max_location_distance_m,
            "Attendance engine initialized"
        );

        Self {
            policy,
            store,
            locations,
            attachments,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Swap in a reloaded policy. Existing sessions keep the offsets they
    /// were created with.
    pub fn reload_policy(&mut self, policy: EnginePolicy, now: Timestamp) -> CoreEvent {
        self.policy = policy;
        append_audit(
            self.store.as_ref(),
            AuditEventType::ConfigReloaded { success: true },
            now,
        );
        info!("Policy reloaded");
        CoreEvent::PolicyReloaded
    }

    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy() && self.locations.is_healthy() && self.attachments.is_healthy()
    }

    fn leave(&self) -> LeaveWorkflow<'_> {
        LeaveWorkflow::new(self.store.as_ref())
    }

    fn verification(&self) -> VerificationManager<'_> {
        VerificationManager::new(self.store.as_ref(), &self.policy)
    }

    fn aggregator(&self) -> AbsenceAggregator<'_> {
        AbsenceAggregator::new(self.store.as_ref())
    }

    fn load_session(&self, session_id: &SessionId) -> Result<CourseSession> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| AttendanceError::not_found(format!("session {}", session_id)))
    }

    fn load_record(&self, session: &CourseSession, student_id: &StudentId) -> Result<AttendanceRecord> {
        self.store
            .find_record(&session.id, student_id)?
            .ok_or_else(|| {
                AttendanceError::not_found(format!(
                    "{} is not on the roster of {}",
                    student_id, session.id
                ))
            })
    }

    /// Compare-and-set `next` over `before`, then audit and report it
    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        session: CourseSession,
        before: &AttendanceRecord,
        next: AttendanceRecord,
        action: RecordAction,
        actor: Option<&TeacherId>,
        reason: Option<&str>,
        now: Timestamp,
    ) -> Result<Outcome<RecordView>> {
        self.store.update_record(RecordUpdate {
            record: &next,
            expected_version: before.version,
        })?;

        info!(
            record_id = %next.id,
            session_id = %next.session_id,
            student_id = %next.student_id,
            from = %before.status,
            to = %next.status,
            action = action.as_str(),
            "Attendance status changed"
        );
        append_audit(
            self.store.as_ref(),
            AuditEventType::StatusChanged {
                record_id: next.id,
                session_id: next.session_id.clone(),
                student_id: next.student_id.clone(),
                from: before.status,
                to: next.status,
                action: action.as_str().to_string(),
                actor: actor.cloned(),
                reason: reason.map(str::to_string),
            },
            now,
        );

        let event = CoreEvent::record_changed(before, &next);
        let view = record_view(
            SessionRecord {
                record: next,
                session,
            },
            now,
        );
        Ok(Outcome::new(view, vec![event]))
    }

    // Student actions

    /// Student self check-in inside the session's check-in window
    pub fn check_in(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
        location: Option<GeoPoint>,
        method: &CheckInMethod,
        now: Timestamp,
    ) -> Result<Outcome<RecordView>> {
        let session = self.load_session(session_id)?;
        if !session.needs_checkin {
            return Err(AttendanceError::not_eligible(format!(
                "session {} does not take attendance",
                session.id
            )));
        }

        let current = self.load_record(&session, student_id)?;
        record::ensure_transition(&current, RecordAction::CheckIn)?;

        let window = checkin_window(&session);
        if window.is_before(now) {
            return Err(AttendanceError::not_eligible(format!(
                "check-in opens at {}",
                format_clock_time(&window.start)
            )));
        }
        if window.has_elapsed(now) {
            return Err(AttendanceError::not_eligible(format!(
                "check-in window closed at {}",
                format_clock_time(&window.end)
            )));
        }

        // Inside the window an untouched record may already read as absent
        let effective = effective_status(&current, &session, now);
        if effective != current.status {
            return Err(record::invalid_transition(effective, RecordAction::CheckIn));
        }

        if matches!(method, CheckInMethod::Location) {
            let Some(position) = location.as_ref() else {
                return Err(AttendanceError::validation("location check-in needs a position"));
            };
            let verdict =
                self.locations
                    .validate(position, &session.room_id, self.policy.max_location_distance_m)?;
            if !verdict.valid {
                debug!(
                    session_id = %session.id,
                    student_id = %student_id,
                    distance_m = ?verdict.distance_m,
                    "Location rejected"
                );
                return Err(AttendanceError::not_eligible(match verdict.distance_m {
                    Some(d) => format!(
                        "{:.0} m from {}, limit is {:.0} m",
                        d, session.room_id, self.policy.max_location_distance_m
                    ),
                    None => format!("not within range of {}", session.room_id),
                }));
            }
        }

        let next = record::check_in(&current, method, location, now)?;
        self.commit(session, &current, next, RecordAction::CheckIn, None, None, now)
    }

    pub fn submit_leave(
        &self,
        record_id: &RecordId,
        reason: &str,
        leave_type: LeaveType,
        attachments: Vec<AttachmentRef>,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        self.leave()
            .submit(record_id, reason, leave_type, attachments, now)
    }

    pub fn withdraw_leave(
        &self,
        application_id: &ApplicationId,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        self.leave().withdraw(application_id, now)
    }

    pub fn verify(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
        token: &str,
        now: Timestamp,
    ) -> Result<Outcome<VerificationWindow>> {
        self.verification().verify(session_id, student_id, token, now)
    }

    // Teacher actions

    pub fn approve_leave(
        &self,
        application_id: &ApplicationId,
        approver_id: &TeacherId,
        comment: Option<&str>,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        self.leave().approve(application_id, approver_id, comment, now)
    }

    pub fn reject_leave(
        &self,
        application_id: &ApplicationId,
        approver_id: &TeacherId,
        comment: &str,
        now: Timestamp,
    ) -> Result<Outcome<LeaveApplication>> {
        self.leave().reject(application_id, approver_id, comment, now)
    }

    /// Makeup check-in after the check-in window closed and before the
    /// session ends; no location check
    pub fn manual_check_in(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
        teacher_id: &TeacherId,
        reason: &str,
        now: Timestamp,
    ) -> Result<Outcome<RecordView>> {
        let session = self.load_session(session_id)?;
        let current = self.load_record(&session, student_id)?;
        record::ensure_transition(&current, RecordAction::ManualCheckIn)?;

        if !makeup_open(&session, now) {
            let window = checkin_window(&session);
            return Err(AttendanceError::not_eligible(if now <= window.end {
                format!(
                    "makeup check-in opens after {}",
                    format_clock_time(&window.end)
                )
            } else {
                format!("session ended at {}", format_clock_time(&session.end_time))
            }));
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AttendanceError::validation("makeup check-in needs a reason"));
        }

        let next = record::manual_check_in(&current, teacher_id, reason, now)?;
        self.commit(
            session,
            &current,
            next,
            RecordAction::ManualCheckIn,
            Some(teacher_id),
            Some(reason),
            now,
        )
    }

    pub fn mark_absent(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
        teacher_id: &TeacherId,
        reason: Option<&str>,
        now: Timestamp,
    ) -> Result<Outcome<RecordView>> {
        let session = self.load_session(session_id)?;
        let current = self.load_record(&session, student_id)?;
        record::ensure_transition(&current, RecordAction::MarkAbsent)?;

        if now < session.start_time {
            return Err(AttendanceError::not_eligible(format!(
                "session starts at {}",
                format_clock_time(&session.start_time)
            )));
        }

        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let next = record::mark_absent(&current, teacher_id, reason, now)?;
        self.commit(
            session,
            &current,
            next,
            RecordAction::MarkAbsent,
            Some(teacher_id),
            reason,
            now,
        )
    }

    pub fn review_photo(
        &self,
        record_id: &RecordId,
        teacher_id: &TeacherId,
        approve: bool,
        now: Timestamp,
    ) -> Result<Outcome<RecordView>> {
        let current = self
            .store
            .get_record(record_id)?
            .ok_or_else(|| AttendanceError::not_found(format!("attendance record {}", record_id)))?;
        let session = self.load_session(&current.session_id)?;

        let next = record::review_photo(&current, teacher_id, approve, now)?;
        self.commit(
            session,
            &current,
            next,
            RecordAction::ReviewPhoto,
            Some(teacher_id),
            None,
            now,
        )
    }

    pub fn open_verification_window(
        &self,
        session_id: &SessionId,
        teacher_id: &TeacherId,
        duration_minutes: Option<u32>,
        now: Timestamp,
    ) -> Result<Outcome<VerificationWindow>> {
        self.verification()
            .open(session_id, teacher_id, duration_minutes, now)
    }

    // Queries

    pub fn verification_status(&self, session_id: &SessionId, now: Timestamp) -> Result<WindowStatus> {
        self.verification().status(session_id, now)
    }

    pub fn get_record(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
        now: Timestamp,
    ) -> Result<RecordView> {
        let session = self.load_session(session_id)?;
        let record = self.load_record(&session, student_id)?;
        Ok(record_view(SessionRecord { record, session }, now))
    }

    pub fn list_records(
        &self,
        student_id: &StudentId,
        course_code: &CourseCode,
        sort: RecordSort,
        page: Page,
        now: Timestamp,
    ) -> Result<RecordPage> {
        self.aggregator()
            .records_for(student_id, course_code, sort, page, now)
    }

    pub fn absence_stats(
        &self,
        student_id: &StudentId,
        course_code: &CourseCode,
        now: Timestamp,
    ) -> Result<AbsenceStat> {
        self.aggregator().stats_for(student_id, course_code, now)
    }

    pub fn roster_stats(&self, course_code: &CourseCode, now: Timestamp) -> Result<Vec<AbsenceStat>> {
        self.aggregator().roster_stats(course_code, now)
    }

    pub fn pending_leaves(&self, teacher_id: &TeacherId, page: Page) -> Result<LeavePage> {
        self.leave().pending_for(teacher_id, page)
    }

    pub fn leave_history(&self, student_id: &StudentId, page: Page) -> Result<LeavePage> {
        self.leave().history_for(student_id, page)
    }

    // Session administration

    pub fn create_session(&self, new: NewSession, now: Timestamp) -> Result<Outcome<CourseSession>> {
        if new.end_time <= new.start_time {
            return Err(AttendanceError::validation(format!(
                "session {} ends before it starts",
                new.id
            )));
        }
        let violations = new.offsets.as_ref().map(|o| o.validate()).unwrap_or_default();
        if let Some(violation) = violations.first() {
            return Err(AttendanceError::validation(format!(
                "session {} offsets: {}",
                new.id, violation
            )));
        }
        if self.store.get_session(&new.id)?.is_some() {
            return Err(AttendanceError::conflict(format!(
                "session {} already exists",
                new.id
            )));
        }

        let session = new.into_session(self.policy.default_offsets);
        self.store.insert_session(&session)?;

        info!(
            session_id = %session.id,
            course_code = %session.course_code,
            start_time = %session.start_time,
            "Session created"
        );
        append_audit(
            self.store.as_ref(),
            AuditEventType::SessionCreated {
                session_id: session.id.clone(),
                course_code: session.course_code.clone(),
            },
            now,
        );

        let event = CoreEvent::SessionCreated {
            session_id: session.id.clone(),
        };
        Ok(Outcome::new(session, vec![event]))
    }

    /// Only allowed before the session starts
    pub fn set_needs_checkin(
        &self,
        session_id: &SessionId,
        needs_checkin: bool,
        now: Timestamp,
    ) -> Result<Outcome<CourseSession>> {
        let mut session = self.load_session(session_id)?;

        if now >= session.start_time {
            return Err(AttendanceError::not_eligible(format!(
                "session {} started at {}",
                session.id,
                format_clock_time(&session.start_time)
            )));
        }
        if session.needs_checkin == needs_checkin {
            return Ok(Outcome::unchanged(session));
        }

        session.needs_checkin = needs_checkin;
        self.store.update_session(&session)?;

        info!(session_id = %session.id, needs_checkin, "Check-in requirement changed");
        append_audit(
            self.store.as_ref(),
            AuditEventType::NeedsCheckinChanged {
                session_id: session.id.clone(),
                needs_checkin,
            },
            now,
        );
        Ok(Outcome::unchanged(session))
    }

    /// Create an `unstarted` record for every listed student that lacks one;
    /// returns how many were created
    pub fn sync_roster(
        &self,
        session_id: &SessionId,
        student_ids: Vec<StudentId>,
        now: Timestamp,
    ) -> Result<Outcome<usize>> {
        let session = self.load_session(session_id)?;

        let records: Vec<AttendanceRecord> = student_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|student_id| AttendanceRecord::unstarted(session.id.clone(), student_id, now))
            .collect();
        let created = self.store.insert_missing_records(&records)?;

        info!(
            session_id = %session.id,
            listed = records.len(),
            created,
            "Roster synced"
        );
        append_audit(
            self.store.as_ref(),
            AuditEventType::RosterSynced {
                session_id: session.id.clone(),
                created,
            },
            now,
        );

        let event = CoreEvent::RosterSynced {
            session_id: session.id,
            created,
        };
        Ok(Outcome::new(created, vec![event]))
    }

    // Attachments

    pub fn put_attachment(&self, data: &[u8]) -> Result<AttachmentRef> {
        if data.is_empty() {
            return Err(AttendanceError::validation("attachment is empty"));
        }
        let attachment = self.attachments.put(data)?;
        debug!(attachment = %attachment, bytes = data.len(), "Attachment stored");
        Ok(attachment)
    }

    pub fn get_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        Ok(self.attachments.get(attachment)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rollcall_api::{ApprovalResult, AttendanceStatus, LeaveDeadlineRule, SessionOffsets};
    use rollcall_host_api::{InMemoryAttachmentStore, MockLocationValidator};
    use rollcall_store::SqliteStore;
    use rollcall_util::{ErrorKind, RoomId};

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn here() -> Option<GeoPoint> {
        Some(GeoPoint {
            latitude: 31.2304,
            longitude: 121.4737,
            accuracy_m: Some(5.0),
        })
    }

    fn sid() -> SessionId {
        SessionId::new("cs101-w1")
    }

    fn li() -> StudentId {
        StudentId::new("s-li")
    }

    fn wang() -> TeacherId {
        TeacherId::new("t-wang")
    }

    struct Harness {
        engine: AttendanceEngine,
        store: Arc<SqliteStore>,
        locations: Arc<MockLocationValidator>,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let locations = Arc::new(MockLocationValidator::new());
        let engine = AttendanceEngine::new(
            EnginePolicy::default(),
            store.clone(),
            locations.clone(),
            Arc::new(InMemoryAttachmentStore::new()),
        );

        engine
            .create_session(
                NewSession {
                    id: sid(),
                    course_code: CourseCode::new("CS101"),
                    teacher_id: wang(),
                    start_time: at(9, 0),
                    end_time: at(10, 40),
                    room_id: RoomId::new("A-201"),
                    offsets: None,
                    needs_checkin: true,
                },
                at(7, 0),
            )
            .unwrap();
        engine
            .sync_roster(&sid(), vec![li(), StudentId::new("s-zhou")], at(7, 0))
            .unwrap();

        Harness {
            engine,
            store,
            locations,
        }
    }

    fn record_id(h: &Harness) -> RecordId {
        h.store.find_record(&sid(), &li()).unwrap().unwrap().id
    }

    #[test]
    fn check_in_window_boundaries() {
        let h = harness();

        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 49))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);
        assert!(err.detail().contains("08:50"));

        let outcome = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 50))
            .unwrap();
        assert_eq!(outcome.value.effective_status, AttendanceStatus::Present);
        assert_eq!(outcome.events.len(), 1);

        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(9, 10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn check_in_closes_after_post_offset() {
        let h = harness();
        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(9, 11))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);
        assert!(err.detail().contains("09:10"));
    }

    #[test]
    fn check_in_needs_valid_location() {
        let h = harness();

        let err = h
            .engine
            .check_in(&sid(), &li(), None, &CheckInMethod::Location, at(8, 55))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        h.locations.set_distance(250.0);
        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);
        assert_eq!(h.locations.calls()[0].room, RoomId::new("A-201"));

        *h.locations.fail.lock().unwrap() = true;
        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);

        let stored = h.store.find_record(&sid(), &li()).unwrap().unwrap();
        assert_eq!(stored.status, AttendanceStatus::Unstarted);
        assert_eq!(stored.version, 0);
    }

    #[test]
    fn approved_leave_blocks_check_in() {
        let h = harness();
        let app = h
            .engine
            .submit_leave(&record_id(&h), "fever", LeaveType::Sick, Vec::new(), at(8, 0))
            .unwrap()
            .value;
        assert_eq!(app.status, ApprovalResult::Pending);

        h.engine.approve_leave(&app.id, &wang(), None, at(8, 10)).unwrap();
        let view = h.engine.get_record(&sid(), &li(), at(8, 20)).unwrap();
        assert_eq!(view.effective_status, AttendanceStatus::Leave);

        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn rejected_leave_then_check_in() {
        let h = harness();
        let app = h
            .engine
            .submit_leave(&record_id(&h), "fever", LeaveType::Sick, Vec::new(), at(8, 0))
            .unwrap()
            .value;

        let err = h.engine.reject_leave(&app.id, &wang(), "", at(8, 10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        h.engine.reject_leave(&app.id, &wang(), "迟交材料", at(8, 10)).unwrap();
        assert_eq!(
            h.engine.get_record(&sid(), &li(), at(8, 20)).unwrap().effective_status,
            AttendanceStatus::LeaveRejected
        );

        let outcome = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap();
        assert_eq!(outcome.value.record.status, AttendanceStatus::Present);
        assert_eq!(outcome.value.record.leave_application_id, None);
    }

    #[test]
    fn leave_deadline_before_start_is_honoured() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut policy = EnginePolicy::default();
        policy.default_offsets = SessionOffsets {
            leave_deadline: LeaveDeadlineRule::BeforeStart { minutes: 60 },
            ..SessionOffsets::default()
        };
        let engine = AttendanceEngine::new(
            policy,
            store.clone(),
            Arc::new(MockLocationValidator::new()),
            Arc::new(InMemoryAttachmentStore::new()),
        );
        let session = engine
            .create_session(
                NewSession {
                    id: sid(),
                    course_code: CourseCode::new("CS101"),
                    teacher_id: wang(),
                    start_time: at(9, 0),
                    end_time: at(10, 40),
                    room_id: RoomId::new("A-201"),
                    offsets: None,
                    needs_checkin: true,
                },
                at(7, 0),
            )
            .unwrap()
            .value;
        assert_eq!(
            session.offsets.leave_deadline,
            LeaveDeadlineRule::BeforeStart { minutes: 60 }
        );
        engine.sync_roster(&sid(), vec![li()], at(7, 0)).unwrap();
        let record_id = store.find_record(&sid(), &li()).unwrap().unwrap().id;

        let err = engine
            .submit_leave(&record_id, "fever", LeaveType::Sick, Vec::new(), at(8, 0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlinePassed);
        assert!(engine
            .submit_leave(&record_id, "fever", LeaveType::Sick, Vec::new(), at(7, 59))
            .is_ok());
    }

    #[test]
    fn photo_check_in_reviewed_by_teacher() {
        let h = harness();
        let method = CheckInMethod::Photo {
            photo_ref: h.engine.put_attachment(b"jpeg bytes").unwrap(),
        };

        let pending = h
            .engine
            .check_in(&sid(), &li(), None, &method, at(8, 55))
            .unwrap()
            .value;
        assert_eq!(pending.effective_status, AttendanceStatus::PendingApproval);
        assert!(h.locations.calls().is_empty());

        let reviewed = h
            .engine
            .review_photo(&pending.record.id, &wang(), false, at(9, 30))
            .unwrap()
            .value;
        assert_eq!(reviewed.effective_status, AttendanceStatus::Absent);

        let err = h
            .engine
            .review_photo(&pending.record.id, &wang(), true, at(9, 31))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn makeup_check_in_after_window() {
        let h = harness();

        let err = h
            .engine
            .manual_check_in(&sid(), &li(), &wang(), "late bus", at(9, 5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);

        let view = h.engine.get_record(&sid(), &li(), at(9, 20)).unwrap();
        assert_eq!(view.effective_status, AttendanceStatus::Truant);

        let outcome = h
            .engine
            .manual_check_in(&sid(), &li(), &wang(), "late bus", at(9, 20))
            .unwrap();
        assert_eq!(outcome.value.effective_status, AttendanceStatus::Present);
        assert!(outcome.value.record.metadata.manual_override);
        assert!(h.locations.calls().is_empty());

        let err = h
            .engine
            .manual_check_in(&sid(), &StudentId::new("s-zhou"), &wang(), "late", at(10, 40))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);
    }

    #[test]
    fn mark_absent_after_start() {
        let h = harness();

        let err = h
            .engine
            .mark_absent(&sid(), &li(), &wang(), None, at(8, 55))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);

        h.engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap();
        let outcome = h
            .engine
            .mark_absent(&sid(), &li(), &wang(), Some("left at break"), at(9, 50))
            .unwrap();
        assert_eq!(outcome.value.effective_status, AttendanceStatus::Absent);
        assert_eq!(
            outcome.value.record.metadata.override_reason.as_deref(),
            Some("left at break")
        );
    }

    #[test]
    fn stale_write_conflicts() {
        let h = harness();
        let stale = h.store.find_record(&sid(), &li()).unwrap().unwrap();

        h.engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap();

        let replay = record::mark_absent(&stale, &wang(), None, at(9, 30)).unwrap();
        let err: AttendanceError = h
            .store
            .update_record(RecordUpdate {
                record: &replay,
                expected_version: stale.version,
            })
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let stored = h.store.find_record(&sid(), &li()).unwrap().unwrap();
        assert_eq!(stored.status, AttendanceStatus::Present);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn session_administration() {
        let h = harness();

        let again = h
            .engine
            .sync_roster(&sid(), vec![li(), li(), StudentId::new("s-chen")], at(7, 30))
            .unwrap();
        assert_eq!(again.value, 1);

        let err = h
            .engine
            .create_session(
                NewSession {
                    id: sid(),
                    course_code: CourseCode::new("CS101"),
                    teacher_id: wang(),
                    start_time: at(9, 0),
                    end_time: at(10, 40),
                    room_id: RoomId::new("A-201"),
                    offsets: None,
                    needs_checkin: true,
                },
                at(7, 30),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let off = h.engine.set_needs_checkin(&sid(), false, at(8, 0)).unwrap();
        assert!(!off.value.needs_checkin);
        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);

        let err = h.engine.set_needs_checkin(&sid(), true, at(9, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);
    }

    #[test]
    fn create_session_rejects_inverted_times() {
        let h = harness();
        let err = h
            .engine
            .create_session(
                NewSession {
                    id: SessionId::new("cs101-w2"),
                    course_code: CourseCode::new("CS101"),
                    teacher_id: wang(),
                    start_time: at(10, 0),
                    end_time: at(10, 0),
                    room_id: RoomId::new("A-201"),
                    offsets: None,
                    needs_checkin: true,
                },
                at(7, 0),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    fn session_with_offsets(id: &str, offsets: SessionOffsets) -> NewSession {
        NewSession {
            id: SessionId::new(id),
            course_code: CourseCode::new("CS101"),
            teacher_id: wang(),
            start_time: at(9, 0),
            end_time: at(10, 40),
            room_id: RoomId::new("A-201"),
            offsets: Some(offsets),
            needs_checkin: true,
        }
    }

    #[test]
    fn create_session_validates_offsets() {
        let h = harness();
        let offsets = SessionOffsets {
            auto_absent_after_minutes: Some(500),
            ..SessionOffsets::default()
        };

        let err = h
            .engine
            .create_session(session_with_offsets("cs101-w2", offsets), at(7, 0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert!(err.to_string().contains("auto_absent_after_minutes"));
        assert!(h.store.get_session(&SessionId::new("cs101-w2")).unwrap().is_none());
    }

    #[test]
    fn auto_absent_blocks_self_check_in() {
        let h = harness();
        let w2 = SessionId::new("cs101-w2");
        let offsets = SessionOffsets {
            auto_absent_after_minutes: Some(5),
            ..SessionOffsets::default()
        };
        h.engine
            .create_session(session_with_offsets("cs101-w2", offsets), at(7, 0))
            .unwrap();
        h.engine
            .sync_roster(&w2, vec![li(), StudentId::new("s-zhou")], at(7, 0))
            .unwrap();

        let zhou = h
            .engine
            .check_in(&w2, &StudentId::new("s-zhou"), here(), &CheckInMethod::Location, at(9, 4))
            .unwrap();
        assert_eq!(zhou.value.effective_status, AttendanceStatus::Present);

        let view = h.engine.get_record(&w2, &li(), at(9, 6)).unwrap();
        assert_eq!(view.effective_status, AttendanceStatus::Absent);

        let err = h
            .engine
            .check_in(&w2, &li(), here(), &CheckInMethod::Location, at(9, 6))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let stored = h.store.find_record(&w2, &li()).unwrap().unwrap();
        assert_eq!(stored.status, AttendanceStatus::Unstarted);
        assert_eq!(stored.version, view.record.version);
    }

    #[test]
    fn rejected_leave_made_up_after_window() {
        let h = harness();
        let app = h
            .engine
            .submit_leave(&record_id(&h), "fever", LeaveType::Sick, Vec::new(), at(8, 0))
            .unwrap()
            .value;
        h.engine
            .reject_leave(&app.id, &wang(), "no certificate", at(8, 10))
            .unwrap();

        let err = h
            .engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(9, 20))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);

        let outcome = h
            .engine
            .manual_check_in(&sid(), &li(), &wang(), "certificate shown in class", at(9, 20))
            .unwrap();
        assert_eq!(outcome.value.effective_status, AttendanceStatus::Present);
        assert_eq!(outcome.value.record.leave_application_id, None);
        assert!(outcome.value.record.metadata.manual_override);
        assert_eq!(
            h.store.get_leave(&app.id).unwrap().unwrap().status,
            ApprovalResult::Rejected
        );
    }

    #[test]
    fn stats_follow_lazy_rollup() {
        let h = harness();
        h.engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap();

        let course = CourseCode::new("CS101");
        let stat = h.engine.absence_stats(&li(), &course, at(11, 0)).unwrap();
        assert_eq!(stat.present, 1);
        assert_eq!(stat.attendance_rate, Some(1.0));

        let roster = h.engine.roster_stats(&course, at(11, 0)).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[1].student_id, StudentId::new("s-zhou"));
        assert_eq!(roster[1].truant, 1);
    }

    #[test]
    fn verification_round_trip() {
        let h = harness();
        h.engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap();

        let window = h
            .engine
            .open_verification_window(&sid(), &wang(), None, at(9, 15))
            .unwrap()
            .value;
        let err = h
            .engine
            .open_verification_window(&sid(), &wang(), None, at(9, 16))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WindowAlreadyActive);

        h.engine.verify(&sid(), &li(), &window.token, at(9, 16)).unwrap();
        let view = h.engine.get_record(&sid(), &li(), at(9, 16)).unwrap();
        assert_eq!(view.record.metadata.verified_windows, vec![window.id]);
    }

    #[test]
    fn attachments_pass_through() {
        let h = harness();
        let attachment = h.engine.put_attachment(b"note").unwrap();
        assert_eq!(h.engine.get_attachment(&attachment).unwrap(), b"note".to_vec());

        let err = h.engine.put_attachment(b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        let err = h
            .engine
            .get_attachment(&AttachmentRef::new("missing"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn transitions_are_audited() {
        let h = harness();
        h.engine
            .check_in(&sid(), &li(), here(), &CheckInMethod::Location, at(8, 55))
            .unwrap();

        let audits = h.store.get_recent_audits(1).unwrap();
        match &audits[0].event {
            AuditEventType::StatusChanged { action, to, .. } => {
                assert_eq!(action, "check_in");
                assert_eq!(*to, AttendanceStatus::Present);
            }
            other => panic!("unexpected audit event {:?}", other),
        }
    }

    #[test]
    fn reload_swaps_policy() {
        let mut h = harness();
        let mut policy = EnginePolicy::default();
        policy.max_location_distance_m = 25.0;

        assert_eq!(h.engine.reload_policy(policy, at(7, 0)), CoreEvent::PolicyReloaded);
        assert_eq!(h.engine.policy().max_location_distance_m, 25.0);
        assert!(h.engine.is_healthy());
    }
}
