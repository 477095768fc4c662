//! IPC client implementation

use rollcall_api::{Command, Event, Request, Response, ResponsePayload, ResponseResult};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to rollcalld
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to rollcalld
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command and wait for its response.
    ///
    /// Lines that are not the matching response (events broadcast while a
    /// subscription is being set up) are skipped.
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            match serde_json::from_str::<Response>(line.trim()) {
                Ok(response) if response.request_id == request_id => return Ok(response),
                Ok(response) if response.request_id == 0 => {
                    return Err(IpcError::InvalidMessage(format!("{:?}", response.result)));
                }
                _ => continue,
            }
        }
    }

    /// Send a command and unwrap a successful payload
    pub async fn call(&mut self, command: Command) -> IpcResult<ResponsePayload> {
        match self.send(command).await?.result {
            ResponseResult::Ok(payload) => Ok(payload),
            ResponseResult::Err(e) => Err(IpcError::ServerError(e.message)),
        }
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        self.call(Command::SubscribeEvents).await?;

        Ok(EventStream {
            reader: self.reader,
        })
    }
}

/// Stream of events from rollcalld
pub struct EventStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let event: Event = serde_json::from_str(line.trim())?;
        Ok(event)
    }
}
