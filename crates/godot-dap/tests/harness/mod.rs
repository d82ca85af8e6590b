//! Shared helpers for the integration suite.
#![allow(dead_code)]

use std::{net::SocketAddr, time::Duration};

use godot_dap::{
    dap_tokio::{DapReader, DapWriter},
    session::{DebugSession, DebugSessionConfig, SessionEvent},
    state::{PauseReason, StackFrame},
};
use godot_wire::{
    mock::{MockEngine, MockEngineConfig},
    StackFrameInfo,
};
use serde_json::{json, Value};
use tokio::{
    io::{DuplexStream, ReadHalf, WriteHalf},
    sync::broadcast,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn frame(file: &str, line: i64, function: &str) -> StackFrameInfo {
    StackFrameInfo {
        file: file.to_string(),
        line,
        function: function.to_string(),
    }
}

/// A session listening on a free local port.
pub async fn listening_session(config: DebugSessionConfig) -> (DebugSession, SocketAddr) {
    let session = DebugSession::new(config);
    let addr = session
        .listen("127.0.0.1:0".parse().unwrap(), None)
        .await
        .unwrap();
    (session, addr)
}

/// Connects a mock engine and waits until the session has accepted it.
pub async fn connect_engine(
    events: &mut broadcast::Receiver<SessionEvent>,
    addr: SocketAddr,
    config: MockEngineConfig,
) -> MockEngine {
    let engine = MockEngine::connect_with_config(addr, config).await.unwrap();
    next_event(events, |event| matches!(event, SessionEvent::Connected { .. })).await;
    engine
}

pub async fn next_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("session event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a session event")
}

pub async fn next_pause(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> (Vec<StackFrame>, PauseReason) {
    match next_event(events, |event| matches!(event, SessionEvent::Paused { .. })).await {
        SessionEvent::Paused { frames, reason } => (frames, reason),
        _ => unreachable!(),
    }
}

/// Pushes a stop and waits for the session to report it.
pub async fn pause_engine(
    engine: &MockEngine,
    events: &mut broadcast::Receiver<SessionEvent>,
    reason: &str,
) -> (Vec<StackFrame>, PauseReason) {
    engine.debug_enter(reason).await.unwrap();
    next_pause(events).await
}

pub type ClientReader = DapReader<ReadHalf<DuplexStream>>;
pub type ClientWriter = DapWriter<WriteHalf<DuplexStream>>;

/// A DAP client talking to `wire_server::run` over an in-memory pipe.
pub struct DapClient {
    pub reader: ClientReader,
    pub writer: ClientWriter,
    seq: i64,
    /// Messages read while waiting for something else.
    pub backlog: Vec<Value>,
}

impl DapClient {
    pub fn spawn(config: DebugSessionConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let (client, server_stream) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let server = tokio::spawn(async move {
            godot_dap::wire_server::run(server_read, server_write, config)
                .await
                .unwrap();
        });
        let (client_read, client_write) = tokio::io::split(client);
        let client = Self {
            reader: DapReader::new(client_read),
            writer: DapWriter::new(client_write),
            seq: 0,
            backlog: Vec::new(),
        };
        (client, server)
    }

    pub async fn send(&mut self, command: &str, arguments: Value) -> i64 {
        self.seq += 1;
        let msg = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.writer.write_value(&msg).await.unwrap();
        self.seq
    }

    async fn read_next(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.reader.read_value())
            .await
            .expect("timed out waiting for a DAP message")
            .unwrap()
            .expect("DAP stream ended")
    }

    pub async fn response(&mut self, request_seq: i64) -> Value {
        if let Some(index) = self.backlog.iter().position(|msg| is_response(msg, request_seq)) {
            return self.backlog.remove(index);
        }
        loop {
            let msg = self.read_next().await;
            if is_response(&msg, request_seq) {
                return msg;
            }
            self.backlog.push(msg);
        }
    }

    pub async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments).await;
        self.response(seq).await
    }

    pub async fn event(&mut self, name: &str) -> Value {
        if let Some(index) = self.backlog.iter().position(|msg| is_event(msg, name)) {
            return self.backlog.remove(index);
        }
        loop {
            let msg = self.read_next().await;
            if is_event(&msg, name) {
                return msg;
            }
            self.backlog.push(msg);
        }
    }
}

fn is_response(msg: &Value, request_seq: i64) -> bool {
    msg.get("type").and_then(Value::as_str) == Some("response")
        && msg.get("request_seq").and_then(Value::as_i64) == Some(request_seq)
}

fn is_event(msg: &Value, name: &str) -> bool {
    msg.get("type").and_then(Value::as_str) == Some("event")
        && msg.get("event").and_then(Value::as_str) == Some(name)
}
