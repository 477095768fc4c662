//! IPC server implementation

use rollcall_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response,
};
use rollcall_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from client to server
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    admin_uids: Arc<RwLock<Vec<u32>>>,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

/// Root and the service's own UID are always admin; so is any UID listed
/// in the config. Everyone else connects as a gateway.
pub fn role_for_uid(uid: Option<u32>, service_uid: u32, admin_uids: &[u32]) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == service_uid || admin_uids.contains(&u) => ClientRole::Admin,
        _ => ClientRole::Gateway,
    }
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            admin_uids: Arc::new(RwLock::new(Vec::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// UIDs granted the admin role on their next connection
    pub async fn set_admin_uids(&self, uids: Vec<u32>) {
        *self.admin_uids.write().await = uids;
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Remove existing socket if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        // Create parent directory if needed
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Set socket permissions (readable/writable by owner and group)
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;
        let service_uid = nix::unistd::getuid().as_raw();

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);
                    let role = {
                        let admin_uids = self.admin_uids.read().await;
                        role_for_uid(uid, service_uid, &admin_uids)
                    };

                    let mut info = ClientInfo::new(role);
                    info.client_id = client_id;
                    if let Some(u) = uid {
                        info = info.with_uid(u);
                    }

                    info!(client_id = %client_id, uid = ?uid, role = ?role, "Client connected");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        // Register client
        {
            let mut clients = self.clients.write().await;
            clients.insert(
                client_id,
                ClientHandle {
                    info: info.clone(),
                    response_tx: response_tx.clone(),
                    subscribed: false,
                },
            );
        }

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id,
            info,
        });

        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let event_tx = self.event_tx.clone();

        // Reader: parse requests, track subscription state
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %client_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                let subscribed = match request.command {
                                    Command::SubscribeEvents => Some(true),
                                    Command::UnsubscribeEvents => Some(false),
                                    _ => None,
                                };
                                if let Some(subscribed) = subscribed {
                                    let mut clients = clients.write().await;
                                    if let Some(handle) = clients.get_mut(&client_id) {
                                        handle.subscribed = subscribed;
                                    }
                                }

                                let _ = message_tx.send(ServerMessage::Request { client_id, request });
                            }
                            Err(e) => {
                                warn!(client_id = %client_id, error = %e, "Invalid request");
                                let response = Response::error(
                                    0,
                                    ErrorInfo::new(
                                        ErrorCode::InvalidRequest,
                                        format!("Malformed request: {}", e),
                                    ),
                                );
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = response_tx.send(json);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "Read error");
                        break;
                    }
                }
            }
        });

        // Writer: responses plus events for subscribed clients
        let mut event_rx = event_tx.subscribe();
        let clients_writer = self.clients.clone();
        let message_tx_writer = self.message_tx.clone();

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                // Responses drain before events so a subscribe reply precedes its first event
                tokio::select! {
                    biased;

                    response = response_rx.recv() => {
                        let Some(mut msg) = response else {
                            break;
                        };
                        msg.push('\n');
                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                            debug!(client_id = %client_id, error = %e, "Write error");
                            break;
                        }
                    }

                    event = event_rx.recv() => {
                        let event = match event {
                            Ok(event) => event,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(client_id = %client_id, skipped, "Client lagging behind events");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        let is_subscribed = {
                            let clients = clients_writer.read().await;
                            clients.get(&client_id).map(|h| h.subscribed).unwrap_or(false)
                        };

                        if is_subscribed {
                            if let Ok(mut msg) = serde_json::to_string(&event) {
                                msg.push('\n');
                                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                                    debug!(client_id = %client_id, error = %e, "Event write error");
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            let _ = message_tx_writer.send(ServerMessage::ClientDisconnected { client_id });

            let mut clients = clients_writer.write().await;
            clients.remove(&client_id);
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Get client info
    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
    }

    #[test]
    fn test_role_for_uid() {
        assert_eq!(role_for_uid(Some(0), 1000, &[]), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1000), 1000, &[]), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1001), 1000, &[]), ClientRole::Gateway);
        assert_eq!(role_for_uid(Some(1001), 1000, &[1001]), ClientRole::Admin);
        assert_eq!(role_for_uid(None, 1000, &[1001]), ClientRole::Gateway);
    }
}
