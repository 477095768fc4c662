//! rollcalld - The rollcall attendance service
//!
//! This is the main entry point for the rollcalld service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Location and attachment collaborators
//! - Attendance engine
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_api::{
    ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Response,
    ResponsePayload,
};
use rollcall_config::load_config;
use rollcall_core::{AttendanceEngine, CoreEvent, Outcome};
use rollcall_host_api::{DirectoryAttachmentStore, PermissiveLocationValidator};
use rollcall_ipc::{IpcServer, ServerMessage};
use rollcall_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use rollcall_util::{default_config_path, AttendanceError, ClientId, RateLimiter, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// rollcalld - Attendance and leave service
#[derive(Parser, Debug)]
#[command(name = "rollcalld")]
#[command(about = "Attendance and leave lifecycle service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/rollcall/config.toml)
    #[arg(short, long, env = "ROLLCALL_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set ROLLCALL_SOCKET env var)
    #[arg(short, long, env = "ROLLCALL_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set ROLLCALL_DATA_DIR env var)
    #[arg(short, long, env = "ROLLCALL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

type ClientLimiter = RateLimiter<ClientId>;

/// Main service state
struct Service {
    engine: AttendanceEngine,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    rate_limiter: ClientLimiter,
    config_path: PathBuf,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            admin_uids = policy.service.admin_uids.len(),
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("rollcalld.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(
            AuditEventType::ServiceStarted,
            rollcall_util::now(),
        ))?;

        let attachments_dir = data_dir.join("attachments");
        let attachments = Arc::new(
            DirectoryAttachmentStore::open(&attachments_dir).with_context(|| {
                format!("Failed to open attachment directory {:?}", attachments_dir)
            })?,
        );
        let locations = Arc::new(PermissiveLocationValidator::new());

        let engine = AttendanceEngine::new(policy.engine, store.clone(), locations, attachments);

        let mut ipc = IpcServer::new(&socket_path);
        ipc.set_admin_uids(policy.service.admin_uids).await;
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        // Rate limiter: 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            engine,
            ipc: Arc::new(ipc),
            store,
            rate_limiter,
            config_path: args.config.clone(),
        })
    }

    async fn run(self) -> Result<()> {
        let ipc_ref = self.ipc.clone();
        let mut ipc_messages = ipc_ref
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        // Wrap mutable state
        let engine = Arc::new(Mutex::new(self.engine));
        let rate_limiter = Arc::new(Mutex::new(self.rate_limiter));
        let store = self.store.clone();
        let config_path = self.config_path.clone();

        // Spawn IPC accept task
        let ipc_accept = ipc_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        // Rate limiter buckets of idle clients
        let mut cleanup_timer = tokio::time::interval(Duration::from_secs(60));

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // SIGHUP reloads configuration
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    if let Err(e) = Self::reload_config(&engine, &ipc_ref, &store, &config_path).await {
                        warn!(error = %e, "Configuration reload failed");
                    }
                }

                _ = cleanup_timer.tick() => {
                    let mut limiter = rate_limiter.lock().await;
                    limiter.cleanup(Duration::from_secs(300));
                    debug!(tracked = limiter.tracked(), "Rate limiter cleaned up");
                }

                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&engine, &ipc_ref, &store, &rate_limiter, &config_path, msg).await;
                }
            }
        }

        info!("Shutting down rollcalld");

        let now = rollcall_util::now();
        ipc_ref.broadcast_event(Event::new(EventPayload::Shutdown, now));

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped, now)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Re-read the config file and swap in its engine policy and admin UIDs
    async fn reload_config(
        engine: &Arc<Mutex<AttendanceEngine>>,
        ipc: &Arc<IpcServer>,
        store: &Arc<dyn Store>,
        config_path: &Path,
    ) -> Result<()> {
        let now = rollcall_util::now();

        let policy = match load_config(config_path) {
            Ok(policy) => policy,
            Err(e) => {
                let _ = store.append_audit(AuditEvent::new(
                    AuditEventType::ConfigReloaded { success: false },
                    now,
                ));
                return Err(e).with_context(|| format!("Failed to reload {:?}", config_path));
            }
        };

        ipc.set_admin_uids(policy.service.admin_uids).await;
        let event = engine.lock().await.reload_policy(policy.engine, now);
        ipc.broadcast_event(Event::new(event_payload(event), now));

        info!(config_path = %config_path.display(), "Configuration reloaded");
        Ok(())
    }

    async fn handle_ipc_message(
        engine: &Arc<Mutex<AttendanceEngine>>,
        ipc: &Arc<IpcServer>,
        store: &Arc<dyn Store>,
        rate_limiter: &Arc<Mutex<ClientLimiter>>,
        config_path: &Path,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                let response = Self::handle_command(
                    engine,
                    ipc,
                    store,
                    config_path,
                    &client_id,
                    request.request_id,
                    request.command,
                )
                .await;

                let _ = ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id, info } => {
                let _ = store.append_audit(AuditEvent::new(
                    AuditEventType::ClientConnected {
                        client_id: client_id.to_string(),
                        role: format!("{:?}", info.role),
                        uid: info.uid,
                    },
                    rollcall_util::now(),
                ));
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let _ = store.append_audit(AuditEvent::new(
                    AuditEventType::ClientDisconnected {
                        client_id: client_id.to_string(),
                    },
                    rollcall_util::now(),
                ));

                let mut limiter = rate_limiter.lock().await;
                limiter.remove(&client_id);
            }
        }
    }

    async fn handle_command(
        engine: &Arc<Mutex<AttendanceEngine>>,
        ipc: &Arc<IpcServer>,
        store: &Arc<dyn Store>,
        config_path: &Path,
        client_id: &ClientId,
        request_id: u64,
        command: Command,
    ) -> Response {
        let now = rollcall_util::now();

        if command.requires_admin() {
            let role = ipc.get_client_info(client_id).await.map(|info| info.role);
            if role != Some(ClientRole::Admin) {
                warn!(client_id = %client_id, command = ?command, "Admin command refused");
                return Response::error(
                    request_id,
                    ErrorInfo::new(ErrorCode::PermissionDenied, "Admin role required"),
                );
            }
        }

        match command {
            Command::CheckIn {
                session_id,
                student_id,
                location,
                method,
            } => {
                let result = engine
                    .lock()
                    .await
                    .check_in(&session_id, &student_id, location, &method, now);
                publish(ipc, request_id, result, now, ResponsePayload::Record)
            }

            Command::Verify {
                session_id,
                student_id,
                token,
            } => {
                let result = engine
                    .lock()
                    .await
                    .verify(&session_id, &student_id, &token, now);
                publish(ipc, request_id, result, now, ResponsePayload::Window)
            }

            Command::SubmitLeave {
                record_id,
                reason,
                leave_type,
                attachments,
            } => {
                let result = engine
                    .lock()
                    .await
                    .submit_leave(&record_id, &reason, leave_type, attachments, now);
                publish(ipc, request_id, result, now, ResponsePayload::Leave)
            }

            Command::WithdrawLeave { application_id } => {
                let result = engine.lock().await.withdraw_leave(&application_id, now);
                publish(ipc, request_id, result, now, ResponsePayload::Leave)
            }

            Command::ApproveLeave {
                application_id,
                approver_id,
                comment,
            } => {
                let result = engine.lock().await.approve_leave(
                    &application_id,
                    &approver_id,
                    comment.as_deref(),
                    now,
                );
                publish(ipc, request_id, result, now, ResponsePayload::Leave)
            }

            Command::RejectLeave {
                application_id,
                approver_id,
                comment,
            } => {
                let result = engine
                    .lock()
                    .await
                    .reject_leave(&application_id, &approver_id, &comment, now);
                publish(ipc, request_id, result, now, ResponsePayload::Leave)
            }

            Command::ManualCheckIn {
                session_id,
                student_id,
                teacher_id,
                reason,
            } => {
                let result = engine.lock().await.manual_check_in(
                    &session_id,
                    &student_id,
                    &teacher_id,
                    &reason,
                    now,
                );
                publish(ipc, request_id, result, now, ResponsePayload::Record)
            }

            Command::MarkAbsent {
                session_id,
                student_id,
                teacher_id,
                reason,
            } => {
                let result = engine.lock().await.mark_absent(
                    &session_id,
                    &student_id,
                    &teacher_id,
                    reason.as_deref(),
                    now,
                );
                publish(ipc, request_id, result, now, ResponsePayload::Record)
            }

            Command::ReviewPhoto {
                record_id,
                teacher_id,
                approve,
            } => {
                let result = engine
                    .lock()
                    .await
                    .review_photo(&record_id, &teacher_id, approve, now);
                publish(ipc, request_id, result, now, ResponsePayload::Record)
            }

            Command::OpenVerificationWindow {
                session_id,
                teacher_id,
                duration_minutes,
            } => {
                let result = engine.lock().await.open_verification_window(
                    &session_id,
                    &teacher_id,
                    duration_minutes,
                    now,
                );
                publish(ipc, request_id, result, now, ResponsePayload::Window)
            }

            Command::VerificationStatus { session_id } => {
                let result = engine.lock().await.verification_status(&session_id, now);
                answer(request_id, result, ResponsePayload::WindowStatus)
            }

            Command::GetRecord {
                session_id,
                student_id,
            } => {
                let result = engine.lock().await.get_record(&session_id, &student_id, now);
                answer(request_id, result, ResponsePayload::Record)
            }

            Command::ListRecords {
                student_id,
                course_code,
                sort,
                page,
            } => {
                let result = engine
                    .lock()
                    .await
                    .list_records(&student_id, &course_code, sort, page, now);
                answer(request_id, result, ResponsePayload::Records)
            }

            Command::AbsenceStats {
                student_id,
                course_code,
            } => {
                let result = engine
                    .lock()
                    .await
                    .absence_stats(&student_id, &course_code, now);
                answer(request_id, result, ResponsePayload::Stats)
            }

            Command::RosterStats { course_code } => {
                let result = engine.lock().await.roster_stats(&course_code, now);
                answer(request_id, result, ResponsePayload::RosterStats)
            }

            Command::PendingLeaves { teacher_id, page } => {
                let result = engine.lock().await.pending_leaves(&teacher_id, page);
                answer(request_id, result, ResponsePayload::Leaves)
            }

            Command::LeaveHistory { student_id, page } => {
                let result = engine.lock().await.leave_history(&student_id, page);
                answer(request_id, result, ResponsePayload::Leaves)
            }

            Command::PutAttachment { data } => {
                let result = engine.lock().await.put_attachment(&data);
                answer(request_id, result, |attachment| ResponsePayload::Attachment {
                    attachment,
                })
            }

            Command::GetAttachment { attachment } => {
                let result = engine.lock().await.get_attachment(&attachment);
                answer(request_id, result, |data| ResponsePayload::AttachmentData { data })
            }

            Command::CreateSession { session } => {
                let result = engine.lock().await.create_session(session, now);
                publish(ipc, request_id, result, now, ResponsePayload::Session)
            }

            Command::SetNeedsCheckin {
                session_id,
                needs_checkin,
            } => {
                let result = engine
                    .lock()
                    .await
                    .set_needs_checkin(&session_id, needs_checkin, now);
                publish(ipc, request_id, result, now, ResponsePayload::Session)
            }

            Command::SyncRoster {
                session_id,
                student_ids,
            } => {
                let result = engine.lock().await.sync_roster(&session_id, student_ids, now);
                publish(ipc, request_id, result, now, |created| {
                    ResponsePayload::RosterSynced { created }
                })
            }

            Command::ReloadConfig => {
                match Self::reload_config(engine, ipc, store, config_path).await {
                    Ok(()) => Response::success(request_id, ResponsePayload::ConfigReloaded),
                    Err(e) => Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::ConfigError, format!("{:#}", e)),
                    ),
                }
            }

            Command::SubscribeEvents => Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: *client_id,
                },
            ),

            Command::UnsubscribeEvents => {
                Response::success(request_id, ResponsePayload::Unsubscribed)
            }

            Command::GetHealth => {
                let ready = engine.lock().await.is_healthy();
                let health = HealthStatus {
                    live: true,
                    ready,
                    store_healthy: store.is_healthy(),
                };
                Response::success(request_id, ResponsePayload::Health(health))
            }

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),
        }
    }
}

fn event_payload(event: CoreEvent) -> EventPayload {
    match event {
        CoreEvent::RecordChanged {
            record_id,
            session_id,
            student_id,
            from,
            to,
        } => EventPayload::RecordChanged {
            record_id,
            session_id,
            student_id,
            from,
            to,
        },
        CoreEvent::LeaveSubmitted {
            application_id,
            session_id,
            student_id,
        } => EventPayload::LeaveSubmitted {
            application_id,
            session_id,
            student_id,
        },
        CoreEvent::LeaveDecided {
            application_id,
            result,
            approver_id,
        } => EventPayload::LeaveDecided {
            application_id,
            result,
            approver_id,
        },
        CoreEvent::VerificationWindowOpened {
            session_id,
            window_id,
            expires_at,
        } => EventPayload::VerificationWindowOpened {
            session_id,
            window_id,
            expires_at,
        },
        CoreEvent::SessionCreated { session_id } => EventPayload::SessionCreated { session_id },
        CoreEvent::RosterSynced {
            session_id,
            created,
        } => EventPayload::RosterSynced {
            session_id,
            created,
        },
        CoreEvent::PolicyReloaded => EventPayload::ConfigReloaded,
    }
}

fn error_response(request_id: u64, err: &AttendanceError) -> Response {
    debug!(request_id, kind = ?err.kind(), error = %err, "Request refused");
    Response::error(request_id, ErrorInfo::from(err))
}

/// Reply to a query
fn answer<T>(
    request_id: u64,
    result: std::result::Result<T, AttendanceError>,
    wrap: impl FnOnce(T) -> ResponsePayload,
) -> Response {
    match result {
        Ok(value) => Response::success(request_id, wrap(value)),
        Err(e) => error_response(request_id, &e),
    }
}

/// Reply to a mutation and broadcast whatever it changed
fn publish<T>(
    ipc: &IpcServer,
    request_id: u64,
    result: std::result::Result<Outcome<T>, AttendanceError>,
    now: Timestamp,
    wrap: impl FnOnce(T) -> ResponsePayload,
) -> Response {
    match result {
        Ok(outcome) => {
            for event in outcome.events {
                ipc.broadcast_event(Event::new(event_payload(event), now));
            }
            Response::success(request_id, wrap(outcome.value))
        }
        Err(e) => error_response(request_id, &e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "rollcalld starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}
