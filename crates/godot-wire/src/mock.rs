use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{Mutex, Notify},
};
use tokio_util::sync::CancellationToken;

use crate::{
    command::{Command, ProtocolRevision, ScopeVars, StackFrameInfo},
    frame::FrameSplitter,
    variant::{Variant, DEFAULT_MAX_DEPTH},
};

/// A scripted engine used by unit and integration tests.
///
/// It connects to the adapter's debug listener the way a real engine started
/// with `--remote-debug` would, records every command it receives and answers
/// the data requests (`get_stack_dump`, `get_stack_frame_vars`,
/// `scene:inspect_object`, `scene:request_scene_tree`) from its configuration.
/// Stops and output are pushed explicitly by the test.
pub struct MockEngine {
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug)]
pub struct MockEngineConfig {
    /// Whether frames carry a thread id.
    pub revision: ProtocolRevision,
    pub thread_id: i64,
    /// Frames reported in reply to `get_stack_dump`, top first.
    pub stack: Vec<StackFrameInfo>,
    /// Variables per frame id for `get_stack_frame_vars`. Frames without an
    /// entry report no variables.
    pub frame_vars: HashMap<u32, ScopeVars>,
    /// Reply to `get_stack_frame_vars` with the single batched message older
    /// engines send instead of a count followed by one message per variable.
    pub batched_frame_vars: bool,
    /// `(class_name, properties)` per instance id for `scene:inspect_object`.
    /// Unknown ids are never answered.
    pub objects: HashMap<u64, (String, Vec<(String, Variant)>)>,
    /// Delay before answering `scene:inspect_object`.
    pub inspect_delay: Duration,
    /// Answer `scene:request_scene_tree` with a one-node tree.
    pub answer_scene_tree: bool,
}

impl Default for MockEngineConfig {
    fn default() -> Self {
        Self {
            revision: ProtocolRevision::Threaded,
            thread_id: 1,
            stack: Vec::new(),
            frame_vars: HashMap::new(),
            batched_frame_vars: false,
            objects: HashMap::new(),
            inspect_delay: Duration::ZERO,
            answer_scene_tree: true,
        }
    }
}

struct State {
    config: Mutex<MockEngineConfig>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    received: Mutex<Vec<Command>>,
    received_changed: Notify,
    inspect_requests: AtomicUsize,
    frame_var_requests: AtomicUsize,
    closed: CancellationToken,
}

impl MockEngine {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        Self::connect_with_config(addr, MockEngineConfig::default()).await
    }

    pub async fn connect_with_config(
        addr: SocketAddr,
        config: MockEngineConfig,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let shutdown = CancellationToken::new();
        let state = Arc::new(State {
            config: Mutex::new(config),
            writer: Mutex::new(Some(writer)),
            received: Mutex::new(Vec::new()),
            received_changed: Notify::new(),
            inspect_requests: AtomicUsize::new(0),
            frame_var_requests: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        });

        tokio::spawn(run(reader, state.clone(), shutdown.clone()));
        Ok(Self { shutdown, state })
    }

    /// Every command received so far, in arrival order.
    pub async fn received(&self) -> Vec<Command> {
        self.state.received.lock().await.clone()
    }

    pub async fn received_named(&self, name: &str) -> Vec<Command> {
        self.state
            .received
            .lock()
            .await
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    /// Waits until at least `count` commands named `name` have arrived.
    pub async fn wait_for(&self, name: &str, count: usize) -> Vec<Command> {
        loop {
            let notified = self.state.received_changed.notified();
            let matching = self.received_named(name).await;
            if matching.len() >= count {
                return matching;
            }
            notified.await;
        }
    }

    pub async fn clear_received(&self) {
        self.state.received.lock().await.clear();
    }

    pub fn inspect_requests(&self) -> usize {
        self.state.inspect_requests.load(Ordering::SeqCst)
    }

    pub fn frame_var_requests(&self) -> usize {
        self.state.frame_var_requests.load(Ordering::SeqCst)
    }

    pub async fn set_stack(&self, stack: Vec<StackFrameInfo>) {
        self.state.config.lock().await.stack = stack;
    }

    pub async fn set_frame_vars(&self, frame_id: u32, vars: ScopeVars) {
        self.state.config.lock().await.frame_vars.insert(frame_id, vars);
    }

    pub async fn set_object(
        &self,
        object_id: u64,
        class_name: &str,
        properties: Vec<(String, Variant)>,
    ) {
        self.state
            .config
            .lock()
            .await
            .objects
            .insert(object_id, (class_name.to_string(), properties));
    }

    /// Sends `command`, stamping the configured thread id on threaded revisions.
    pub async fn send(&self, command: Command) -> std::io::Result<()> {
        let command = stamp(&*self.state.config.lock().await, command);
        self.send_raw(&command.encode()).await
    }

    /// Sends `command` in pieces, cut at `cuts` byte offsets into its frame.
    pub async fn send_split(&self, command: Command, cuts: &[usize]) -> std::io::Result<()> {
        let command = stamp(&*self.state.config.lock().await, command);
        let bytes = command.encode();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
            let cut = cut.clamp(start, bytes.len());
            self.send_raw(&bytes[start..cut]).await?;
            start = cut;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    pub async fn send_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        write_raw(&self.state, bytes).await
    }

    /// Pauses the game: `debug_enter` with `reason`.
    pub async fn debug_enter(&self, reason: &str) -> std::io::Result<()> {
        self.send(Command::with_params(
            "debug_enter",
            vec![true.into(), reason.into(), true.into()],
        ))
        .await
    }

    pub async fn debug_exit(&self) -> std::io::Result<()> {
        self.send(Command::new("debug_exit")).await
    }

    pub async fn output(&self, lines: &[&str]) -> std::io::Result<()> {
        self.send(Command::with_params(
            "output",
            vec![Variant::PackedStringArray(
                lines.iter().map(|l| l.to_string()).collect(),
            )],
        ))
        .await
    }

    /// Closes the socket, simulating the game exiting.
    pub async fn close(&self) {
        if let Some(mut writer) = self.state.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.shutdown.cancel();
    }

    /// Resolves once the adapter side has closed the connection.
    pub async fn closed(&self) {
        self.state.closed.cancelled().await;
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn stamp(config: &MockEngineConfig, mut command: Command) -> Command {
    if config.revision == ProtocolRevision::Threaded && command.thread_id.is_none() {
        command.thread_id = Some(config.thread_id);
    }
    command
}

async fn write_raw(state: &State, bytes: &[u8]) -> std::io::Result<()> {
    let mut writer = state.writer.lock().await;
    match writer.as_mut() {
        Some(writer) => writer.write_all(bytes).await,
        None => Err(std::io::ErrorKind::NotConnected.into()),
    }
}

async fn reply(state: &State, command: Command) -> std::io::Result<()> {
    let command = stamp(&*state.config.lock().await, command);
    write_raw(state, &command.encode()).await
}

async fn run(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    state: Arc<State>,
    shutdown: CancellationToken,
) {
    let mut splitter = FrameSplitter::default();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = reader.read(&mut buf) => match res {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        let Ok(payloads) = splitter.push(&buf[..n]) else {
            break;
        };
        for payload in payloads {
            let Ok(command) = Command::decode(&payload, DEFAULT_MAX_DEPTH) else {
                continue;
            };
            state.received.lock().await.push(command.clone());
            state.received_changed.notify_waiters();
            if handle(&state, command).await.is_err() {
                break;
            }
        }
    }
    state.closed.cancel();
}

async fn handle(state: &Arc<State>, command: Command) -> std::io::Result<()> {
    match command.name.as_str() {
        "get_stack_dump" => {
            let stack = state.config.lock().await.stack.clone();
            let mut params = vec![Variant::Int(stack.len() as i64)];
            for frame in stack {
                params.push(frame.file.into());
                params.push(frame.line.into());
                params.push(frame.function.into());
            }
            reply(state, Command::with_params("stack_dump", params)).await
        }
        "get_stack_frame_vars" => {
            state.frame_var_requests.fetch_add(1, Ordering::SeqCst);
            let frame = command
                .parameters
                .first()
                .and_then(Variant::as_int)
                .unwrap_or_default() as u32;
            let (vars, batched) = {
                let config = state.config.lock().await;
                (
                    config.frame_vars.get(&frame).cloned().unwrap_or_default(),
                    config.batched_frame_vars,
                )
            };
            if batched {
                let mut params = Vec::new();
                for kind in crate::command::ScopeKind::ALL {
                    let scope = vars.scope(kind);
                    params.push(Variant::Int(scope.len() as i64));
                    for (name, value) in scope {
                        params.push(name.as_str().into());
                        params.push(value.clone());
                    }
                }
                return reply(state, Command::with_params("stack_frame_vars", params)).await;
            }

            reply(
                state,
                Command::with_params("stack_frame_vars", vec![Variant::Int(vars.len() as i64)]),
            )
            .await?;
            for kind in crate::command::ScopeKind::ALL {
                for (name, value) in vars.scope(kind) {
                    let params = vec![
                        name.as_str().into(),
                        Variant::Int(kind.index() as i64),
                        Variant::Int(value.variant_type().tag() as i64),
                        value.clone(),
                    ];
                    reply(state, Command::with_params("stack_frame_var", params)).await?;
                }
            }
            Ok(())
        }
        "scene:inspect_object" => {
            state.inspect_requests.fetch_add(1, Ordering::SeqCst);
            let Some(id) = command.parameters.first().and_then(Variant::as_int) else {
                return Ok(());
            };
            let id = id as u64;
            let (object, delay) = {
                let config = state.config.lock().await;
                (config.objects.get(&id).cloned(), config.inspect_delay)
            };
            let Some((class_name, properties)) = object else {
                return Ok(());
            };
            let props = properties
                .into_iter()
                .map(|(name, value)| {
                    Variant::Array(vec![
                        name.into(),
                        Variant::Int(value.variant_type().tag() as i64),
                        Variant::Int(0),
                        Variant::from(""),
                        Variant::Int(6),
                        value,
                    ])
                })
                .collect();
            let response = Command::with_params(
                "scene:inspect_object",
                vec![Variant::Int(id as i64), class_name.into(), Variant::Array(props)],
            );
            if delay.is_zero() {
                return reply(state, response).await;
            }
            let state = state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = reply(&state, response).await;
            });
            Ok(())
        }
        "scene:request_scene_tree" => {
            if !state.config.lock().await.answer_scene_tree {
                return Ok(());
            }
            let params = vec![
                Variant::Int(0),
                "root".into(),
                "Window".into(),
                Variant::Int(1),
                "".into(),
                Variant::Int(0),
            ];
            reply(state, Command::with_params("scene:scene_tree", params)).await
        }
        _ => Ok(()),
    }
}
