//! SQLite-based store implementation

use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_api::{
    Approval, AttendanceRecord, CourseSession, LeaveApplication, Page, RecordSort,
    VerificationWindow,
};
use rollcall_util::{
    ApplicationId, CourseCode, RecordId, RoomId, SessionId, StudentId, TeacherId, Timestamp,
    WindowId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    AuditEvent, AuditEventType, RecordUpdate, SessionRecord, Store, StoreError, StoreResult,
};

const SESSION_COLUMNS: &str = "s.id, s.course_code, s.teacher_id, s.start_time, s.end_time, \
     s.room_id, s.offsets_json, s.needs_checkin";

const RECORD_COLUMNS: &str = "r.id, r.session_id, r.student_id, r.status, r.checkin_time, \
     r.checkin_location_json, r.leave_application_id, r.metadata_json, r.version, r.updated_at";

const LEAVE_COLUMNS: &str = "l.id, l.record_id, l.session_id, l.student_id, l.reason, \
     l.leave_type, l.attachments_json, l.submitted_at, l.withdraw_deadline, l.status, l.version";

const WINDOW_COLUMNS: &str = "w.id, w.session_id, w.opened_by, w.opened_at, \
     w.duration_minutes, w.token";

/// Number of columns in `RECORD_COLUMNS`, where joined session columns start
const RECORD_WIDTH: usize = 10;

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS course_sessions (
                id TEXT PRIMARY KEY,
                course_code TEXT NOT NULL,
                teacher_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                room_id TEXT NOT NULL,
                offsets_json TEXT NOT NULL,
                needs_checkin INTEGER NOT NULL DEFAULT 1,
                CHECK (end_time > start_time)
            );

            CREATE TABLE IF NOT EXISTS attendance_records (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES course_sessions(id),
                student_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'unstarted', 'present', 'absent', 'truant', 'leave',
                    'leave_pending', 'leave_rejected', 'pending_approval'
                )),
                checkin_time TEXT,
                checkin_location_json TEXT,
                leave_application_id TEXT,
                metadata_json TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (session_id, student_id)
            );

            CREATE TABLE IF NOT EXISTS leave_applications (
                id TEXT PRIMARY KEY,
                record_id TEXT NOT NULL REFERENCES attendance_records(id),
                session_id TEXT NOT NULL REFERENCES course_sessions(id),
                student_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                leave_type TEXT NOT NULL,
                attachments_json TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                withdraw_deadline TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'pending', 'approved', 'rejected', 'cancelled'
                )),
                version INTEGER NOT NULL
            );

            -- At most one live application per record
            CREATE UNIQUE INDEX IF NOT EXISTS idx_leave_one_active
                ON leave_applications(record_id)
                WHERE status IN ('pending', 'approved');

            CREATE TABLE IF NOT EXISTS approvals (
                application_id TEXT NOT NULL REFERENCES leave_applications(id),
                ordinal INTEGER NOT NULL,
                approver_id TEXT NOT NULL,
                result TEXT NOT NULL CHECK (result IN ('approved', 'rejected')),
                comment TEXT NOT NULL,
                decided_at TEXT NOT NULL,
                PRIMARY KEY (application_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS verification_windows (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES course_sessions(id),
                seq INTEGER NOT NULL,
                opened_by TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
                token TEXT NOT NULL,
                UNIQUE (session_id, seq)
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_sessions_course ON course_sessions(course_code, start_time);
            CREATE INDEX IF NOT EXISTS idx_sessions_teacher ON course_sessions(teacher_id);
            CREATE INDEX IF NOT EXISTS idx_records_student ON attendance_records(student_id);
            CREATE INDEX IF NOT EXISTS idx_leave_student ON leave_applications(student_id, submitted_at);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Fixed-width UTC so text comparison orders like time
fn ts(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StoreResult<Timestamp> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_id<T>(s: &str, parse: fn(&str) -> Option<T>, what: &str) -> StoreResult<T> {
    parse(s).ok_or_else(|| StoreError::Serialization(format!("bad {} id '{}'", what, s)))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> StoreResult<T> {
    s.parse().map_err(StoreError::Serialization)
}

struct SessionRow {
    id: String,
    course_code: String,
    teacher_id: String,
    start_time: String,
    end_time: String,
    room_id: String,
    offsets_json: String,
    needs_checkin: bool,
}

impl SessionRow {
    fn read(row: &Row<'_>, base: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(base)?,
            course_code: row.get(base + 1)?,
            teacher_id: row.get(base + 2)?,
            start_time: row.get(base + 3)?,
            end_time: row.get(base + 4)?,
            room_id: row.get(base + 5)?,
            offsets_json: row.get(base + 6)?,
            needs_checkin: row.get(base + 7)?,
        })
    }

    fn into_session(self) -> StoreResult<CourseSession> {
        Ok(CourseSession {
            id: SessionId::new(self.id),
            course_code: CourseCode::new(self.course_code),
            teacher_id: TeacherId::new(self.teacher_id),
            start_time: parse_ts(&self.start_time)?,
            end_time: parse_ts(&self.end_time)?,
            room_id: RoomId::new(self.room_id),
            offsets: serde_json::from_str(&self.offsets_json)?,
            needs_checkin: self.needs_checkin,
        })
    }
}

struct RecordRow {
    id: String,
    session_id: String,
    student_id: String,
    status: String,
    checkin_time: Option<String>,
    checkin_location_json: Option<String>,
    leave_application_id: Option<String>,
    metadata_json: String,
    version: i64,
    updated_at: String,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            student_id: row.get(2)?,
            status: row.get(3)?,
            checkin_time: row.get(4)?,
            checkin_location_json: row.get(5)?,
            leave_application_id: row.get(6)?,
            metadata_json: row.get(7)?,
            version: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_record(self) -> StoreResult<AttendanceRecord> {
        Ok(AttendanceRecord {
            id: parse_id(&self.id, RecordId::parse_str, "record")?,
            session_id: SessionId::new(self.session_id),
            student_id: StudentId::new(self.student_id),
            status: parse_enum(&self.status)?,
            checkin_time: self.checkin_time.as_deref().map(parse_ts).transpose()?,
            checkin_location: self
                .checkin_location_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            leave_application_id: self
                .leave_application_id
                .as_deref()
                .map(|s| parse_id(s, ApplicationId::parse_str, "application"))
                .transpose()?,
            metadata: serde_json::from_str(&self.metadata_json)?,
            version: self.version as u64,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct LeaveRow {
    id: String,
    record_id: String,
    session_id: String,
    student_id: String,
    reason: String,
    leave_type: String,
    attachments_json: String,
    submitted_at: String,
    withdraw_deadline: String,
    status: String,
    version: i64,
}

impl LeaveRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            record_id: row.get(1)?,
            session_id: row.get(2)?,
            student_id: row.get(3)?,
            reason: row.get(4)?,
            leave_type: row.get(5)?,
            attachments_json: row.get(6)?,
            submitted_at: row.get(7)?,
            withdraw_deadline: row.get(8)?,
            status: row.get(9)?,
            version: row.get(10)?,
        })
    }

    fn into_application(self, approvals: Vec<Approval>) -> StoreResult<LeaveApplication> {
        Ok(LeaveApplication {
            id: parse_id(&self.id, ApplicationId::parse_str, "application")?,
            record_id: parse_id(&self.record_id, RecordId::parse_str, "record")?,
            session_id: SessionId::new(self.session_id),
            student_id: StudentId::new(self.student_id),
            reason: self.reason,
            leave_type: parse_enum(&self.leave_type)?,
            attachments: serde_json::from_str(&self.attachments_json)?,
            submitted_at: parse_ts(&self.submitted_at)?,
            withdraw_deadline: parse_ts(&self.withdraw_deadline)?,
            status: parse_enum(&self.status)?,
            approvals,
            version: self.version as u64,
        })
    }
}

struct WindowRow {
    id: String,
    session_id: String,
    opened_by: String,
    opened_at: String,
    duration_minutes: u32,
    token: String,
}

impl WindowRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            opened_by: row.get(2)?,
            opened_at: row.get(3)?,
            duration_minutes: row.get(4)?,
            token: row.get(5)?,
        })
    }

    fn into_window(self) -> StoreResult<VerificationWindow> {
        Ok(VerificationWindow {
            id: parse_id(&self.id, WindowId::parse_str, "window")?,
            session_id: SessionId::new(self.session_id),
            opened_by: TeacherId::new(self.opened_by),
            opened_at: parse_ts(&self.opened_at)?,
            duration_minutes: self.duration_minutes,
            token: self.token,
        })
    }
}

fn read_session_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((RecordRow::read(row)?, SessionRow::read(row, RECORD_WIDTH)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (record, session) = row?;
        out.push(SessionRecord {
            record: record.into_record()?,
            session: session.into_session()?,
        });
    }
    Ok(out)
}

fn load_approvals(conn: &Connection, application_id: &str) -> StoreResult<Vec<Approval>> {
    let mut stmt = conn.prepare(
        "SELECT approver_id, result, comment, decided_at FROM approvals \
         WHERE application_id = ? ORDER BY ordinal",
    )?;
    let rows = stmt.query_map([application_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut approvals = Vec::new();
    for row in rows {
        let (approver_id, result, comment, decided_at) = row?;
        approvals.push(Approval {
            approver_id: TeacherId::new(approver_id),
            result: parse_enum(&result)?,
            comment,
            decided_at: parse_ts(&decided_at)?,
        });
    }
    Ok(approvals)
}

fn read_applications(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<LeaveApplication>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, LeaveRow::read)?;

    let mut out = Vec::new();
    for row in rows {
        let row = row?;
        let approvals = load_approvals(conn, &row.id)?;
        out.push(row.into_application(approvals)?);
    }
    Ok(out)
}

fn insert_approvals(
    conn: &Connection,
    application: &LeaveApplication,
    from: usize,
) -> StoreResult<()> {
    let application_id = application.id.to_string();
    for (ordinal, approval) in application.approvals.iter().enumerate().skip(from) {
        conn.execute(
            "INSERT INTO approvals (application_id, ordinal, approver_id, result, comment, decided_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                application_id,
                ordinal as i64,
                approval.approver_id.as_str(),
                approval.result.as_str(),
                approval.comment,
                ts(&approval.decided_at),
            ],
        )?;
    }
    Ok(())
}

/// Write a record only if its row still holds the expected version
fn write_record(conn: &Connection, update: RecordUpdate<'_>) -> StoreResult<()> {
    let record = update.record;
    let id = record.id.to_string();
    let location = record
        .checkin_location
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let changed = conn.execute(
        "UPDATE attendance_records SET status = ?1, checkin_time = ?2, \
         checkin_location_json = ?3, leave_application_id = ?4, metadata_json = ?5, \
         version = ?6, updated_at = ?7 WHERE id = ?8 AND version = ?9",
        params![
            record.status.as_str(),
            record.checkin_time.as_ref().map(ts),
            location,
            record.leave_application_id.map(|a| a.to_string()),
            serde_json::to_string(&record.metadata)?,
            record.version as i64,
            ts(&record.updated_at),
            id,
            update.expected_version as i64,
        ],
    )?;

    if changed == 0 {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM attendance_records WHERE id = ?)",
            [&id],
            |row| row.get(0),
        )?;
        return Err(if exists {
            StoreError::Conflict(format!(
                "record {} changed since version {}",
                id, update.expected_version
            ))
        } else {
            StoreError::NotFound(format!("record {}", id))
        });
    }

    debug!(record_id = %id, version = record.version, status = %record.status, "Record written");
    Ok(())
}

fn insert_record_row(conn: &Connection, record: &AttendanceRecord, or_ignore: bool) -> StoreResult<usize> {
    let location = record
        .checkin_location
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let verb = if or_ignore {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };

    let inserted = conn.execute(
        &format!(
            "{} INTO attendance_records (id, session_id, student_id, status, checkin_time, \
             checkin_location_json, leave_application_id, metadata_json, version, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            verb
        ),
        params![
            record.id.to_string(),
            record.session_id.as_str(),
            record.student_id.as_str(),
            record.status.as_str(),
            record.checkin_time.as_ref().map(ts),
            location,
            record.leave_application_id.map(|a| a.to_string()),
            serde_json::to_string(&record.metadata)?,
            record.version as i64,
            ts(&record.updated_at),
        ],
    )?;
    Ok(inserted)
}

impl Store for SqliteStore {
    fn insert_session(&self, session: &CourseSession) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO course_sessions (id, course_code, teacher_id, start_time, end_time, \
             room_id, offsets_json, needs_checkin) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id.as_str(),
                session.course_code.as_str(),
                session.teacher_id.as_str(),
                ts(&session.start_time),
                ts(&session.end_time),
                session.room_id.as_str(),
                serde_json::to_string(&session.offsets)?,
                session.needs_checkin,
            ],
        )?;

        debug!(session_id = %session.id, course = %session.course_code, "Session inserted");
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<CourseSession>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM course_sessions s WHERE s.id = ?", SESSION_COLUMNS),
                [id.as_str()],
                |row| SessionRow::read(row, 0),
            )
            .optional()?;

        row.map(SessionRow::into_session).transpose()
    }

    fn update_session(&self, session: &CourseSession) -> StoreResult<()> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE course_sessions SET course_code = ?1, teacher_id = ?2, start_time = ?3, \
             end_time = ?4, room_id = ?5, offsets_json = ?6, needs_checkin = ?7 WHERE id = ?8",
            params![
                session.course_code.as_str(),
                session.teacher_id.as_str(),
                ts(&session.start_time),
                ts(&session.end_time),
                session.room_id.as_str(),
                serde_json::to_string(&session.offsets)?,
                session.needs_checkin,
                session.id.as_str(),
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    fn insert_record(&self, record: &AttendanceRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        insert_record_row(&conn, record, false)?;
        Ok(())
    }

    fn insert_missing_records(&self, records: &[AttendanceRecord]) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut created = 0;
        for record in records {
            created += insert_record_row(&tx, record, true)?;
        }

        tx.commit()?;
        debug!(requested = records.len(), created, "Roster records inserted");
        Ok(created)
    }

    fn get_record(&self, id: &RecordId) -> StoreResult<Option<AttendanceRecord>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM attendance_records r WHERE r.id = ?", RECORD_COLUMNS),
                [id.to_string()],
                RecordRow::read,
            )
            .optional()?;

        row.map(RecordRow::into_record).transpose()
    }

    fn find_record(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM attendance_records r WHERE r.session_id = ?1 AND r.student_id = ?2",
                    RECORD_COLUMNS
                ),
                params![session_id.as_str(), student_id.as_str()],
                RecordRow::read,
            )
            .optional()?;

        row.map(RecordRow::into_record).transpose()
    }

    fn update_record(&self, update: RecordUpdate<'_>) -> StoreResult<()> {
        let conn = self.conn()?;
        write_record(&conn, update)
    }

    fn student_records(
        &self,
        student_id: &StudentId,
        course_code: &CourseCode,
        sort: RecordSort,
        page: Option<Page>,
    ) -> StoreResult<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let order = match sort {
            RecordSort::StartAscending => "ASC",
            RecordSort::StartDescending => "DESC",
        };
        // SQLite treats a negative LIMIT as unbounded
        let (limit, offset) = match page {
            Some(page) => (page.effective_limit() as i64, page.offset as i64),
            None => (-1, 0),
        };

        read_session_records(
            &conn,
            &format!(
                "SELECT {}, {} FROM attendance_records r \
                 JOIN course_sessions s ON s.id = r.session_id \
                 WHERE r.student_id = ?1 AND s.course_code = ?2 \
                 ORDER BY s.start_time {order}, s.id {order} LIMIT ?3 OFFSET ?4",
                RECORD_COLUMNS,
                SESSION_COLUMNS,
                order = order
            ),
            params![student_id.as_str(), course_code.as_str(), limit, offset],
        )
    }

    fn course_records(&self, course_code: &CourseCode) -> StoreResult<Vec<SessionRecord>> {
        let conn = self.conn()?;

        read_session_records(
            &conn,
            &format!(
                "SELECT {}, {} FROM attendance_records r \
                 JOIN course_sessions s ON s.id = r.session_id \
                 WHERE s.course_code = ?1 ORDER BY r.student_id, s.start_time",
                RECORD_COLUMNS, SESSION_COLUMNS
            ),
            [course_code.as_str()],
        )
    }

    fn insert_leave(
        &self,
        application: &LeaveApplication,
        record: RecordUpdate<'_>,
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let active: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM leave_applications \
             WHERE record_id = ? AND status IN ('pending', 'approved'))",
            [application.record_id.to_string()],
            |row| row.get(0),
        )?;
        if active {
            return Err(StoreError::ActiveApplication(format!(
                "record {} already has a pending or approved application",
                application.record_id
            )));
        }

        tx.execute(
            "INSERT INTO leave_applications (id, record_id, session_id, student_id, reason, \
             leave_type, attachments_json, submitted_at, withdraw_deadline, status, version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                application.id.to_string(),
                application.record_id.to_string(),
                application.session_id.as_str(),
                application.student_id.as_str(),
                application.reason,
                application.leave_type.as_str(),
                serde_json::to_string(&application.attachments)?,
                ts(&application.submitted_at),
                ts(&application.withdraw_deadline),
                application.status.as_str(),
                application.version as i64,
            ],
        )?;
        insert_approvals(&tx, application, 0)?;
        write_record(&tx, record)?;

        tx.commit()?;
        debug!(application_id = %application.id, record_id = %application.record_id, "Leave application inserted");
        Ok(())
    }

    fn get_leave(&self, id: &ApplicationId) -> StoreResult<Option<LeaveApplication>> {
        let conn = self.conn()?;

        let mut found = read_applications(
            &conn,
            &format!("SELECT {} FROM leave_applications l WHERE l.id = ?", LEAVE_COLUMNS),
            [id.to_string()],
        )?;
        Ok(found.pop())
    }

    fn active_leave_for_record(
        &self,
        record_id: &RecordId,
    ) -> StoreResult<Option<LeaveApplication>> {
        let conn = self.conn()?;

        let mut found = read_applications(
            &conn,
            &format!(
                "SELECT {} FROM leave_applications l \
                 WHERE l.record_id = ? AND l.status IN ('pending', 'approved')",
                LEAVE_COLUMNS
            ),
            [record_id.to_string()],
        )?;
        Ok(found.pop())
    }

    fn update_leave(
        &self,
        application: &LeaveApplication,
        expected_version: u64,
        record: Option<RecordUpdate<'_>>,
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = application.id.to_string();

        let changed = tx.execute(
            "UPDATE leave_applications SET status = ?1, version = ?2 WHERE id = ?3 AND version = ?4",
            params![
                application.status.as_str(),
                application.version as i64,
                id,
                expected_version as i64,
            ],
        )?;
        if changed == 0 {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM leave_applications WHERE id = ?)",
                [&id],
                |row| row.get(0),
            )?;
            return Err(if exists {
                StoreError::Conflict(format!(
                    "application {} changed since version {}",
                    id, expected_version
                ))
            } else {
                StoreError::NotFound(format!("application {}", id))
            });
        }

        let stored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM approvals WHERE application_id = ?",
            [&id],
            |row| row.get(0),
        )?;
        insert_approvals(&tx, application, stored as usize)?;

        if let Some(record) = record {
            write_record(&tx, record)?;
        }

        tx.commit()?;
        debug!(application_id = %id, status = %application.status, version = application.version, "Leave application updated");
        Ok(())
    }

    fn pending_leaves(
        &self,
        teacher_id: &TeacherId,
        page: Page,
    ) -> StoreResult<Vec<LeaveApplication>> {
        let conn = self.conn()?;

        read_applications(
            &conn,
            &format!(
                "SELECT {} FROM leave_applications l \
                 JOIN course_sessions s ON s.id = l.session_id \
                 WHERE s.teacher_id = ?1 AND l.status = 'pending' \
                 ORDER BY l.submitted_at ASC, l.id ASC LIMIT ?2 OFFSET ?3",
                LEAVE_COLUMNS
            ),
            params![
                teacher_id.as_str(),
                page.effective_limit() as i64,
                page.offset as i64
            ],
        )
    }

    fn leave_history(
        &self,
        student_id: &StudentId,
        page: Page,
    ) -> StoreResult<Vec<LeaveApplication>> {
        let conn = self.conn()?;

        read_applications(
            &conn,
            &format!(
                "SELECT {} FROM leave_applications l WHERE l.student_id = ?1 \
                 ORDER BY l.submitted_at DESC, l.id DESC LIMIT ?2 OFFSET ?3",
                LEAVE_COLUMNS
            ),
            params![
                student_id.as_str(),
                page.effective_limit() as i64,
                page.offset as i64
            ],
        )
    }

    fn insert_window(&self, window: &VerificationWindow) -> StoreResult<()> {
        let conn = self.conn()?;

        // The NOT EXISTS guard and the insert run as one statement under the
        // connection lock, so two openers cannot both see "no open window".
        let inserted = conn.execute(
            "INSERT INTO verification_windows \
             (id, session_id, seq, opened_by, opened_at, expires_at, duration_minutes, token) \
             SELECT ?1, ?2, \
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM verification_windows WHERE session_id = ?2), \
                    ?3, ?4, ?5, ?6, ?7 \
             WHERE NOT EXISTS ( \
                SELECT 1 FROM verification_windows WHERE session_id = ?2 AND expires_at > ?4 \
             )",
            params![
                window.id.to_string(),
                window.session_id.as_str(),
                window.opened_by.as_str(),
                ts(&window.opened_at),
                ts(&window.expires_at()),
                window.duration_minutes,
                window.token,
            ],
        )?;

        if inserted == 0 {
            return Err(StoreError::WindowActive(format!(
                "session {} already has an open verification window",
                window.session_id
            )));
        }

        debug!(window_id = %window.id, session_id = %window.session_id, "Verification window inserted");
        Ok(())
    }

    fn latest_window(&self, session_id: &SessionId) -> StoreResult<Option<VerificationWindow>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM verification_windows w WHERE w.session_id = ? \
                     ORDER BY w.seq DESC LIMIT 1",
                    WINDOW_COLUMNS
                ),
                [session_id.as_str()],
                WindowRow::read,
            )
            .optional()?;

        row.map(WindowRow::into_window).transpose()
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![ts(&event.timestamp), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_ts(&timestamp_str)?,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
