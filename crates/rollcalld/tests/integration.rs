//! Integration tests for rollcalld
//!
//! These tests verify the end-to-end behavior of the service components.

use chrono::{Duration, TimeZone, Utc};
use rollcall_api::{
    ApprovalResult, AttendanceStatus, CheckInMethod, Command, Event, EventPayload, GeoPoint,
    LeaveDeadlineRule, LeaveType, NewSession, Page, RecordSort, Response, ResponsePayload,
    ResponseResult,
};
use rollcall_config::{parse_config, EnginePolicy};
use rollcall_core::AttendanceEngine;
use rollcall_host_api::{DirectoryAttachmentStore, InMemoryAttachmentStore, MockLocationValidator};
use rollcall_ipc::{IpcClient, IpcServer, ServerMessage};
use rollcall_store::{SqliteStore, Store};
use rollcall_util::{
    CourseCode, ErrorKind, RoomId, SessionId, StudentId, TeacherId, Timestamp,
};
use std::sync::Arc;

fn at(h: u32, m: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
}

fn here() -> Option<GeoPoint> {
    Some(GeoPoint {
        latitude: 31.2304,
        longitude: 121.4737,
        accuracy_m: None,
    })
}

fn new_session(id: &str, start: Timestamp) -> NewSession {
    NewSession {
        id: SessionId::new(id),
        course_code: CourseCode::new("CS101"),
        teacher_id: TeacherId::new("t-wang"),
        start_time: start,
        end_time: start + Duration::minutes(100),
        room_id: RoomId::new("A-201"),
        offsets: None,
        needs_checkin: true,
    }
}

fn make_engine(policy: EnginePolicy, store: Arc<dyn Store>) -> AttendanceEngine {
    AttendanceEngine::new(
        policy,
        store,
        Arc::new(MockLocationValidator::new()),
        Arc::new(InMemoryAttachmentStore::new()),
    )
}

fn roster() -> Vec<StudentId> {
    vec![StudentId::new("s-li"), StudentId::new("s-zhou"), StudentId::new("s-chen")]
}

#[test]
fn test_config_parsing() {
    let config = r#"
        config_version = 1

        [service]
        admin_uids = [1001]

        [attendance]
        checkin_pre_minutes = 15
        checkin_post_minutes = 5
        leave_deadline_minutes_before_start = 30
        verification_default_duration_minutes = 3
        max_location_distance_m = 50.0
    "#;

    let policy = parse_config(config).unwrap();
    assert_eq!(policy.service.admin_uids, vec![1001]);
    assert_eq!(policy.engine.default_offsets.checkin_pre_minutes, 15);
    assert_eq!(policy.engine.default_offsets.checkin_post_minutes, 5);
    assert_eq!(
        policy.engine.default_offsets.leave_deadline,
        LeaveDeadlineRule::BeforeStart { minutes: 30 }
    );
    assert_eq!(policy.engine.verification_default_minutes, 3);
    assert_eq!(policy.engine.max_location_distance_m, 50.0);
}

#[test]
fn test_configured_offsets_reach_sessions() {
    let policy = parse_config(
        r#"
        config_version = 1
        [attendance]
        checkin_pre_minutes = 15
        checkin_post_minutes = 5
        "#,
    )
    .unwrap();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = make_engine(policy.engine, store);

    engine.create_session(new_session("cs101-w1", at(9, 0)), at(7, 0)).unwrap();
    engine.sync_roster(&SessionId::new("cs101-w1"), roster(), at(7, 0)).unwrap();

    let sid = SessionId::new("cs101-w1");
    let li = StudentId::new("s-li");
    let zhou = StudentId::new("s-zhou");

    assert!(engine
        .check_in(&sid, &li, here(), &CheckInMethod::Location, at(8, 45))
        .is_ok());
    let err = engine
        .check_in(&sid, &zhou, here(), &CheckInMethod::Location, at(9, 6))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotEligible);
}

#[test]
fn test_term_lifecycle() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = make_engine(EnginePolicy::default(), store.clone());
    let course = CourseCode::new("CS101");
    let teacher = TeacherId::new("t-wang");
    let li = StudentId::new("s-li");
    let zhou = StudentId::new("s-zhou");
    let chen = StudentId::new("s-chen");

    // Two weekly sessions
    let week1 = SessionId::new("cs101-w1");
    let week2 = SessionId::new("cs101-w2");
    engine.create_session(new_session("cs101-w1", at(9, 0)), at(7, 0)).unwrap();
    engine
        .create_session(new_session("cs101-w2", at(9, 0) + Duration::days(7)), at(7, 0))
        .unwrap();
    assert_eq!(engine.sync_roster(&week1, roster(), at(7, 0)).unwrap().value, 3);
    assert_eq!(engine.sync_roster(&week2, roster(), at(7, 0)).unwrap().value, 3);
    assert_eq!(engine.sync_roster(&week1, roster(), at(7, 5)).unwrap().value, 0);

    // Week 1: li checks in, zhou takes approved leave, chen never shows
    engine
        .check_in(&week1, &li, here(), &CheckInMethod::Location, at(8, 55))
        .unwrap();

    let zhou_record = engine.get_record(&week1, &zhou, at(8, 0)).unwrap().record.id;
    let app = engine
        .submit_leave(&zhou_record, "fever", LeaveType::Sick, Vec::new(), at(8, 0))
        .unwrap()
        .value;
    let pending = engine.pending_leaves(&teacher, Page::default()).unwrap();
    assert_eq!(pending.items.len(), 1);
    assert_eq!(pending.items[0].id, app.id);

    engine.approve_leave(&app.id, &teacher, Some("get well"), at(8, 20)).unwrap();
    assert!(engine.pending_leaves(&teacher, Page::default()).unwrap().items.is_empty());

    let after_week1 = at(11, 0);
    let chen_view = engine.get_record(&week1, &chen, after_week1).unwrap();
    assert_eq!(chen_view.record.status, AttendanceStatus::Unstarted);
    assert_eq!(chen_view.effective_status, AttendanceStatus::Truant);

    let roster_stats = engine.roster_stats(&course, after_week1).unwrap();
    assert_eq!(roster_stats.len(), 3);
    let by_student = |id: &StudentId| {
        roster_stats
            .iter()
            .find(|s| &s.student_id == id)
            .cloned()
            .unwrap()
    };
    assert_eq!(by_student(&li).present, 1);
    assert_eq!(by_student(&li).attendance_rate, Some(1.0));
    assert_eq!(by_student(&zhou).leave, 1);
    assert_eq!(by_student(&zhou).attendance_rate, Some(0.0));
    assert_eq!(by_student(&chen).truant, 1);
    assert_eq!(by_student(&chen).unstarted, 1);
    assert_eq!(by_student(&chen).completed_sessions, 1);
    assert_eq!(by_student(&chen).total_sessions, 2);

    // Newest first
    let records = engine
        .list_records(&li, &course, RecordSort::StartDescending, Page::default(), after_week1)
        .unwrap();
    assert_eq!(records.items.len(), 2);
    assert_eq!(records.items[0].record.session_id, week2);
    assert_eq!(records.items[1].effective_status, AttendanceStatus::Present);
    assert_eq!(records.next_offset, None);

    let history = engine.leave_history(&zhou, Page::default()).unwrap();
    assert_eq!(history.items[0].status, ApprovalResult::Approved);
    assert_eq!(history.items[0].approvals[0].comment, "get well");
}

#[test]
fn test_withdraw_round_trip() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = make_engine(EnginePolicy::default(), store.clone());
    let sid = SessionId::new("cs101-w1");
    let li = StudentId::new("s-li");
    engine.create_session(new_session("cs101-w1", at(9, 0)), at(7, 0)).unwrap();
    engine.sync_roster(&sid, vec![li.clone()], at(7, 0)).unwrap();
    let record_id = engine.get_record(&sid, &li, at(7, 0)).unwrap().record.id;

    let first = engine
        .submit_leave(&record_id, "fever", LeaveType::Sick, Vec::new(), at(7, 10))
        .unwrap()
        .value;
    engine
        .approve_leave(&first.id, &TeacherId::new("t-wang"), None, at(7, 20))
        .unwrap();
    engine.withdraw_leave(&first.id, at(7, 30)).unwrap();
    let second = engine
        .submit_leave(&record_id, "family", LeaveType::Personal, Vec::new(), at(7, 40))
        .unwrap()
        .value;

    let view = engine.get_record(&sid, &li, at(7, 45)).unwrap();
    assert_eq!(view.record.status, AttendanceStatus::LeavePending);
    assert_eq!(view.record.leave_application_id, Some(second.id));
    assert_eq!(
        store.get_leave(&first.id).unwrap().unwrap().status,
        ApprovalResult::Cancelled
    );
}

#[test]
fn test_racing_verification_windows() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = Arc::new(make_engine(EnginePolicy::default(), store));
    engine.create_session(new_session("cs101-w1", at(9, 0)), at(7, 0)).unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                scope.spawn(move || {
                    engine.open_verification_window(
                        &SessionId::new("cs101-w1"),
                        &TeacherId::new("t-wang"),
                        None,
                        at(9, 20),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    assert_eq!(err.kind(), ErrorKind::WindowAlreadyActive);
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("rollcalld.db");
    let sid = SessionId::new("cs101-w1");
    let li = StudentId::new("s-li");

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let engine = AttendanceEngine::new(
            EnginePolicy::default(),
            store,
            Arc::new(MockLocationValidator::new()),
            Arc::new(DirectoryAttachmentStore::open(dir.path().join("attachments")).unwrap()),
        );
        engine.create_session(new_session("cs101-w1", at(9, 0)), at(7, 0)).unwrap();
        engine.sync_roster(&sid, vec![li.clone()], at(7, 0)).unwrap();

        let photo_ref = engine.put_attachment(b"\xff\xd8 jpeg").unwrap();
        engine
            .check_in(&sid, &li, None, &CheckInMethod::Photo { photo_ref }, at(8, 58))
            .unwrap();
    }

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let engine = AttendanceEngine::new(
        EnginePolicy::default(),
        store,
        Arc::new(MockLocationValidator::new()),
        Arc::new(DirectoryAttachmentStore::open(dir.path().join("attachments")).unwrap()),
    );

    let view = engine.get_record(&sid, &li, at(9, 30)).unwrap();
    assert_eq!(view.effective_status, AttendanceStatus::PendingApproval);
    let photo_ref = view.record.metadata.photo_ref.clone().unwrap();
    assert_eq!(engine.get_attachment(&photo_ref).unwrap(), b"\xff\xd8 jpeg".to_vec());

    let reviewed = engine
        .review_photo(&view.record.id, &TeacherId::new("t-wang"), true, at(9, 40))
        .unwrap();
    assert_eq!(reviewed.value.effective_status, AttendanceStatus::Present);
}

#[tokio::test]
async fn test_ipc_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("rollcalld.sock");

    let mut server = IpcServer::new(&socket_path);
    server.start().await.unwrap();
    let server = Arc::new(server);
    let mut messages = server.take_message_receiver().await.unwrap();

    let accept = server.clone();
    tokio::spawn(async move {
        let _ = accept.run().await;
    });

    // Minimal responder: answer pings, confirm subscriptions, then broadcast
    let responder = server.clone();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            if let ServerMessage::Request { client_id, request } = msg {
                let payload = match request.command {
                    Command::Ping => ResponsePayload::Pong,
                    Command::SubscribeEvents => ResponsePayload::Subscribed { client_id },
                    _ => continue,
                };
                let subscribed = matches!(payload, ResponsePayload::Subscribed { .. });
                let _ = responder
                    .send_response(&client_id, Response::success(request.request_id, payload))
                    .await;
                if subscribed {
                    responder.broadcast_event(Event::new(EventPayload::ConfigReloaded, at(9, 0)));
                }
            }
        }
    });

    let mut client = IpcClient::connect(&socket_path).await.unwrap();
    let response = client.send(Command::Ping).await.unwrap();
    assert_eq!(response.request_id, 1);
    assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Pong)));

    let mut events = client.subscribe().await.unwrap();
    let event = events.next().await.unwrap();
    assert!(matches!(event.payload, EventPayload::ConfigReloaded));
}
