//! Absence rollups over stored records

use rollcall_api::{AbsenceStat, AttendanceStatus, Page, RecordPage, RecordSort, RecordView};
use rollcall_store::{SessionRecord, Store};
use rollcall_util::{CourseCode, Result, StudentId, Timestamp};
use std::collections::BTreeMap;

use crate::window::effective_status;

pub fn record_view(entry: SessionRecord, now: Timestamp) -> RecordView {
    let effective_status = effective_status(&entry.record, &entry.session, now);
    RecordView {
        record: entry.record,
        effective_status,
        course_code: entry.session.course_code,
        start_time: entry.session.start_time,
        end_time: entry.session.end_time,
    }
}

/// Fold one student's records into an [`AbsenceStat`]. Sessions that do not
/// take attendance are skipped entirely.
pub fn summarize(
    student_id: &StudentId,
    course_code: &CourseCode,
    entries: &[SessionRecord],
    now: Timestamp,
) -> AbsenceStat {
    let mut stat = AbsenceStat {
        student_id: student_id.clone(),
        course_code: course_code.clone(),
        present: 0,
        absent: 0,
        truant: 0,
        leave: 0,
        pending: 0,
        unstarted: 0,
        total_sessions: 0,
        completed_sessions: 0,
        attendance_rate: None,
    };
    let mut present_completed = 0u32;

    for entry in entries.iter().filter(|e| e.session.needs_checkin) {
        let status = effective_status(&entry.record, &entry.session, now);
        let completed = entry.session.end_time <= now;

        stat.total_sessions += 1;
        if completed {
            stat.completed_sessions += 1;
        }

        match status {
            AttendanceStatus::Present => {
                stat.present += 1;
                if completed {
                    present_completed += 1;
                }
            }
            AttendanceStatus::Absent | AttendanceStatus::LeaveRejected => stat.absent += 1,
            AttendanceStatus::Truant => stat.truant += 1,
            AttendanceStatus::Leave => stat.leave += 1,
            AttendanceStatus::LeavePending | AttendanceStatus::PendingApproval => {
                stat.pending += 1
            }
            AttendanceStatus::Unstarted => stat.unstarted += 1,
        }
    }

    if stat.completed_sessions > 0 {
        stat.attendance_rate =
            Some(f64::from(present_completed) / f64::from(stat.completed_sessions));
    }
    stat
}

pub struct AbsenceAggregator<'a> {
    store: &'a dyn Store,
}

impl<'a> AbsenceAggregator<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub fn stats_for(
        &self,
        student_id: &StudentId,
        course_code: &CourseCode,
        now: Timestamp,
    ) -> Result<AbsenceStat> {
        let entries =
            self.store
                .student_records(student_id, course_code, RecordSort::StartAscending, None)?;
        Ok(summarize(student_id, course_code, &entries, now))
    }

    pub fn records_for(
        &self,
        student_id: &StudentId,
        course_code: &CourseCode,
        sort: RecordSort,
        page: Page,
        now: Timestamp,
    ) -> Result<RecordPage> {
        let entries = self
            .store
            .student_records(student_id, course_code, sort, Some(page))?;
        let next_offset = page.next_offset(entries.len());
        let items = entries
            .into_iter()
            .map(|entry| record_view(entry, now))
            .collect();
        Ok(RecordPage { items, next_offset })
    }

    /// One rollup per student with a record in the course, ordered by
    /// student id
    pub fn roster_stats(&self, course_code: &CourseCode, now: Timestamp) -> Result<Vec<AbsenceStat>> {
        let mut by_student: BTreeMap<StudentId, Vec<SessionRecord>> = BTreeMap::new();
        for entry in self.store.course_records(course_code)? {
            by_student
                .entry(entry.record.student_id.clone())
                .or_default()
                .push(entry);
        }

        Ok(by_student
            .iter()
            .map(|(student_id, entries)| summarize(student_id, course_code, entries, now))
            .collect())
    }
}
