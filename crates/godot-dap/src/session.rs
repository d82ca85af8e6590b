//! One debug session: a single actor task owning the engine connection and
//! every piece of per-session state, plus the cloneable handle consumers talk
//! to it through.
//!
//! The actor never awaits while handling a message. Requests that need an
//! engine reply (object fetches) park a oneshot sender in the fetch table and
//! return; the reply is sent when the matching engine message arrives or the
//! fetch times out.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use godot_config::{ProtocolSetting, SessionConfig};
use godot_wire::{
    Command, Connection, ConnectionConfig, ConnectionEvent, EngineMessage, FrameVars,
    ProtocolRevision, SceneNode, ScopeKind, ScopeVars, Variant, WireError,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, oneshot, watch},
};
use tokio_util::sync::CancellationToken;

use crate::{
    breakpoints::{Breakpoint, BreakpointTable},
    error::{DebugError, DebugResult},
    handles::{GodotIdWithPath, HandleMapper, RootId},
    launch::{LaunchArgs, Launched},
    paths,
    pending::{FetchTable, FetchWaiter, Lookup},
    resolve::{self, ObjectSource, VariableView},
    state::{ExecAction, PauseReason, StackDecision, StackFrame, StepState},
    variables::{Accumulated, FrameVarsAccumulator, GodotObject},
};

const REQUEST_CHANNEL_SIZE: usize = 64;
const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct DebugSessionConfig {
    /// `None` waits for object replies forever.
    pub object_fetch_timeout: Option<Duration>,
    pub configuration_done_timeout: Duration,
    pub connection: ConnectionConfig,
    pub protocol: ProtocolSetting,
    pub event_capacity: usize,
    /// Largest DAP message the client may send.
    pub max_message_bytes: usize,
}

impl Default for DebugSessionConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for DebugSessionConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            object_fetch_timeout: config.object_fetch_timeout(),
            configuration_done_timeout: config.configuration_done_timeout(),
            connection: ConnectionConfig {
                max_frame_bytes: config.max_frame_bytes,
                max_variant_depth: config.max_variant_depth,
                ..ConnectionConfig::default()
            },
            protocol: config.protocol,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_message_bytes: config.max_message_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Stdout,
    Stderr,
}

impl OutputCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputCategory::Stdout => "stdout",
            OutputCategory::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected { peer: Option<SocketAddr> },
    Paused {
        frames: Vec<StackFrame>,
        reason: PauseReason,
    },
    Resumed,
    Output {
        category: OutputCategory,
        line: String,
    },
    SceneTree(SceneNode),
    /// The engine connection is gone. Breakpoints survive for the next one.
    Terminated,
}

/// Handles for the three scopes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeHandles {
    pub locals: i64,
    pub members: i64,
    pub globals: i64,
}

type Reply<T> = oneshot::Sender<DebugResult<T>>;

enum Request {
    Listen {
        listener: TcpListener,
        project: Option<PathBuf>,
        reply: Reply<SocketAddr>,
    },
    SetBreakpoint {
        file: String,
        line: u32,
        reply: Reply<Breakpoint>,
    },
    RemoveBreakpoint {
        file: String,
        line: u32,
        reply: Reply<Option<Breakpoint>>,
    },
    SetBreakpoints {
        file: String,
        lines: Vec<u32>,
        reply: Reply<Vec<Breakpoint>>,
    },
    Breakpoints {
        reply: Reply<Vec<Breakpoint>>,
    },
    Exec {
        action: ExecAction,
        reply: Reply<()>,
    },
    StackFrames {
        reply: Reply<Vec<StackFrame>>,
    },
    Fetch {
        id: RootId,
        force_refresh: bool,
        reply: FetchWaiter,
    },
    HandleFor {
        key: GodotIdWithPath,
        reply: Reply<i64>,
    },
    KeyFor {
        handle: i64,
        reply: Reply<GodotIdWithPath>,
    },
    SetObjectProperty {
        object_id: u64,
        property: String,
        value: Variant,
        reply: Reply<()>,
    },
    RequestSceneTree {
        reply: Reply<()>,
    },
    Terminate {
        reply: Reply<()>,
    },
}

/// Messages the actor sends itself.
enum Internal {
    Accepted(TcpStream),
    FetchTimeout { id: RootId, generation: u64 },
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct DebugSession {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<SessionEvent>,
    configuration_done: Arc<watch::Sender<bool>>,
    configuration_done_timeout: Duration,
    max_variant_depth: usize,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession").finish_non_exhaustive()
    }
}

impl DebugSession {
    /// Spawns the session actor. Must be called from within a tokio runtime.
    pub fn new(config: DebugSessionConfig) -> Self {
        let (requests, requests_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (internal, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (configuration_done, _) = watch::channel(false);

        let handle = Self {
            requests,
            events: events.clone(),
            configuration_done: Arc::new(configuration_done),
            configuration_done_timeout: config.configuration_done_timeout,
            max_variant_depth: config.connection.max_variant_depth,
        };

        let revision = initial_revision(config.protocol);
        let actor = SessionActor {
            config,
            events,
            internal,
            listener: None,
            connection: None,
            revision,
            thread_id: 0,
            project: None,
            breakpoints: BreakpointTable::new(),
            step: StepState::new(),
            handles: HandleMapper::new(),
            fetches: FetchTable::new(),
            scope_requests: VecDeque::new(),
            frame_vars: FrameVarsAccumulator::default(),
        };
        tokio::spawn(actor.run(requests_rx, internal_rx));
        handle
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> DebugResult<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| DebugError::SessionClosed)?;
        rx.await.map_err(|_| DebugError::SessionClosed)
    }

    /// Binds `addr` and accepts engine connections on it until the session
    /// ends. Returns the bound address, which differs from `addr` for port 0.
    pub async fn listen(&self, addr: SocketAddr, project: Option<PathBuf>) -> DebugResult<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| DebugError::Wire(WireError::Io(err)))?;
        self.call(|reply| Request::Listen {
            listener,
            project,
            reply,
        })
        .await?
    }

    /// Listens for the engine without waiting for configuration.
    pub async fn attach(&self, args: &LaunchArgs) -> DebugResult<SocketAddr> {
        self.listen(args.socket_addr()?, args.project.clone()).await
    }

    /// Listens for the engine, waits (bounded) for the client to finish
    /// configuring breakpoints, and returns the engine command line.
    pub async fn launch(&self, args: &LaunchArgs) -> DebugResult<Launched> {
        let addr = self.attach(args).await?;
        self.wait_for_configuration_done().await;
        let breakpoints = self.breakpoints().await?;
        let engine_args = args.engine_args(addr, &breakpoints);
        tracing::info!(target: "godot.dap.session", %addr, ?engine_args, "waiting for the engine");
        Ok(Launched { addr, engine_args })
    }

    pub fn configuration_done(&self) {
        self.configuration_done.send_replace(true);
    }

    async fn wait_for_configuration_done(&self) {
        let mut done = self.configuration_done.subscribe();
        let arrived = matches!(
            tokio::time::timeout(self.configuration_done_timeout, done.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        if !arrived {
            tracing::warn!(
                target: "godot.dap.session",
                timeout_ms = self.configuration_done_timeout.as_millis() as u64,
                "configurationDone not received; launching anyway"
            );
        }
    }

    pub async fn set_breakpoint(&self, file: &str, line: u32) -> DebugResult<Breakpoint> {
        let file = file.to_string();
        self.call(|reply| Request::SetBreakpoint { file, line, reply })
            .await?
    }

    pub async fn remove_breakpoint(&self, file: &str, line: u32) -> DebugResult<Option<Breakpoint>> {
        let file = file.to_string();
        self.call(|reply| Request::RemoveBreakpoint { file, line, reply })
            .await?
    }

    /// Replaces the breakpoints of `file` with `lines`.
    pub async fn set_breakpoints(&self, file: &str, lines: Vec<u32>) -> DebugResult<Vec<Breakpoint>> {
        let file = file.to_string();
        self.call(|reply| Request::SetBreakpoints { file, lines, reply })
            .await?
    }

    pub async fn breakpoints(&self) -> DebugResult<Vec<Breakpoint>> {
        self.call(|reply| Request::Breakpoints { reply }).await?
    }

    async fn exec(&self, action: ExecAction) -> DebugResult<()> {
        self.call(|reply| Request::Exec { action, reply }).await?
    }

    pub async fn continue_(&self) -> DebugResult<()> {
        self.exec(ExecAction::Continue).await
    }

    pub async fn next(&self) -> DebugResult<()> {
        self.exec(ExecAction::Next).await
    }

    pub async fn step(&self) -> DebugResult<()> {
        self.exec(ExecAction::Step).await
    }

    pub async fn step_out(&self) -> DebugResult<()> {
        self.exec(ExecAction::StepOut).await
    }

    pub async fn pause(&self) -> DebugResult<()> {
        self.exec(ExecAction::Break).await
    }

    /// The stack of the current stop, top first.
    pub async fn stack_frames(&self) -> DebugResult<Vec<StackFrame>> {
        self.call(|reply| Request::StackFrames { reply }).await?
    }

    /// Handles for the scopes of `frame_id`, once their variables arrived.
    pub async fn get_scope(&self, frame_id: u32) -> DebugResult<ScopeHandles> {
        self.object(RootId::scope(frame_id, ScopeKind::Locals), false)
            .await?;
        let mut handles = [0; 3];
        for (slot, kind) in handles.iter_mut().zip(ScopeKind::ALL) {
            *slot = self
                .handle_for(GodotIdWithPath::root(RootId::scope(frame_id, kind)))
                .await?;
        }
        Ok(ScopeHandles {
            locals: handles[0],
            members: handles[1],
            globals: handles[2],
        })
    }

    pub async fn variables(&self, handle: i64) -> DebugResult<Vec<VariableView>> {
        resolve::variables(self, handle, self.max_variant_depth).await
    }

    /// The root object behind `handle`, refetched first when `force_refresh`.
    pub async fn inspect_object(&self, handle: i64, force_refresh: bool) -> DebugResult<Arc<GodotObject>> {
        let key = self.key_for(handle).await?;
        self.object(key.root, force_refresh).await
    }

    /// Looks a dotted variable name up as seen from `frame_id`.
    pub async fn evaluate(&self, frame_id: u32, expression: &str) -> DebugResult<VariableView> {
        resolve::variable_by_name(self, frame_id, expression, self.max_variant_depth).await
    }

    /// Sets a property on a live instance. The cached copy of the object is
    /// dropped so the next read sees the new value.
    pub async fn set_object_property(
        &self,
        object_id: u64,
        property: &str,
        value: Variant,
    ) -> DebugResult<()> {
        let property = property.to_string();
        self.call(|reply| Request::SetObjectProperty {
            object_id,
            property,
            value,
            reply,
        })
        .await?
    }

    pub async fn request_scene_tree(&self) -> DebugResult<()> {
        self.call(|reply| Request::RequestSceneTree { reply }).await?
    }

    /// Refetches `id`, dropping any cached copy first.
    pub async fn force_refresh(&self, id: RootId) -> DebugResult<Arc<GodotObject>> {
        self.object(id, true).await
    }

    /// Closes the engine connection and the listener and stops the actor.
    pub async fn terminate(&self) -> DebugResult<()> {
        self.call(|reply| Request::Terminate { reply }).await?
    }
}

impl ObjectSource for DebugSession {
    async fn object(&self, id: RootId, force_refresh: bool) -> DebugResult<Arc<GodotObject>> {
        self.call(|reply| Request::Fetch {
            id,
            force_refresh,
            reply,
        })
        .await?
    }

    async fn handle_for(&self, key: GodotIdWithPath) -> DebugResult<i64> {
        self.call(|reply| Request::HandleFor { key, reply }).await?
    }

    async fn key_for(&self, handle: i64) -> DebugResult<GodotIdWithPath> {
        self.call(|reply| Request::KeyFor { handle, reply }).await?
    }
}

fn initial_revision(protocol: ProtocolSetting) -> ProtocolRevision {
    match protocol {
        ProtocolSetting::Legacy => ProtocolRevision::Legacy,
        ProtocolSetting::Auto | ProtocolSetting::Threaded => ProtocolRevision::Threaded,
    }
}

async fn next_inbound(
    inbound: &mut Option<mpsc::Receiver<ConnectionEvent>>,
) -> Option<ConnectionEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn accept_loop(
    listener: TcpListener,
    internal: mpsc::UnboundedSender<Internal>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(target: "godot.dap.session", %peer, "engine connected");
                if internal.send(Internal::Accepted(stream)).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(target: "godot.dap.session", error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

struct SessionActor {
    config: DebugSessionConfig,
    events: broadcast::Sender<SessionEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    listener: Option<CancellationToken>,
    connection: Option<Connection>,
    revision: ProtocolRevision,
    thread_id: i64,
    project: Option<PathBuf>,
    breakpoints: BreakpointTable,
    step: StepState,
    handles: HandleMapper,
    fetches: FetchTable,
    /// Frames whose `get_stack_frame_vars` are unanswered, oldest first.
    scope_requests: VecDeque<u32>,
    frame_vars: FrameVarsAccumulator,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

impl SessionActor {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut inbound: Option<mpsc::Receiver<ConnectionEvent>> = None;
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    if self.handle_request(request) == Flow::Stop {
                        break;
                    }
                }
                Some(message) = internal.recv() => match message {
                    Internal::Accepted(stream) => {
                        if let Some(rx) = self.on_accepted(stream) {
                            inbound = Some(rx);
                        }
                    }
                    Internal::FetchTimeout { id, generation } => {
                        if self.fetches.expire(id, generation) {
                            tracing::warn!(target: "godot.dap.session", %id, "object fetch timed out");
                        }
                    }
                },
                event = next_inbound(&mut inbound) => match event {
                    Some(ConnectionEvent::Command(command)) => self.on_command(command),
                    Some(ConnectionEvent::Closed { error }) => {
                        inbound = None;
                        self.on_disconnected(error);
                    }
                    None => {
                        inbound = None;
                        self.on_disconnected(None);
                    }
                },
            }
        }
        self.shutdown();
        tracing::debug!(target: "godot.dap.session", "session actor stopped");
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| !c.is_closed())
    }

    fn send(&self, command: Command) -> DebugResult<()> {
        let Some(connection) = self.connection.as_ref().filter(|c| !c.is_closed()) else {
            return Err(DebugError::NotConnected);
        };
        let command = match self.revision {
            ProtocolRevision::Threaded => command.with_thread_id(self.thread_id),
            ProtocolRevision::Legacy => command,
        };
        connection.send(&command).map_err(|err| match err {
            WireError::ConnectionClosed => DebugError::NotConnected,
            other => DebugError::Wire(other),
        })
    }

    /// Sends a command whose failure only matters to the log.
    fn send_logged(&self, command: Command) {
        let name = command.name.clone();
        if let Err(err) = self.send(command) {
            tracing::debug!(target: "godot.dap.session", command = %name, error = %err, "command not sent");
        }
    }

    fn breakpoint_command(&self, bp: &Breakpoint, enabled: bool) -> Command {
        let path = paths::to_res_path(self.project.as_deref(), &bp.file);
        Command::breakpoint(&path, bp.line, enabled)
    }

    fn handle_request(&mut self, request: Request) -> Flow {
        match request {
            Request::Listen {
                listener,
                project,
                reply,
            } => {
                let result = listener
                    .local_addr()
                    .map_err(|err| DebugError::Wire(WireError::Io(err)));
                if let Ok(addr) = &result {
                    if let Some(previous) = self.listener.take() {
                        previous.cancel();
                    }
                    let shutdown = CancellationToken::new();
                    tokio::spawn(accept_loop(listener, self.internal.clone(), shutdown.clone()));
                    self.listener = Some(shutdown);
                    if project.is_some() {
                        self.project = project;
                    }
                    tracing::info!(target: "godot.dap.session", %addr, "listening for the engine");
                }
                let _ = reply.send(result);
            }
            Request::SetBreakpoint { file, line, reply } => {
                let (bp, added) = self.breakpoints.add(&file, line);
                if added && self.is_connected() {
                    self.send_logged(self.breakpoint_command(&bp, true));
                }
                let _ = reply.send(Ok(bp));
            }
            Request::RemoveBreakpoint { file, line, reply } => {
                let removed = self.breakpoints.remove(&file, line);
                if let Some(bp) = &removed {
                    if self.is_connected() {
                        self.send_logged(self.breakpoint_command(bp, false));
                    }
                }
                let _ = reply.send(Ok(removed));
            }
            Request::SetBreakpoints { file, lines, reply } => {
                let sync = self.breakpoints.sync_file(&file, &lines);
                if self.is_connected() {
                    for bp in &sync.removed {
                        self.send_logged(self.breakpoint_command(bp, false));
                    }
                    for bp in &sync.added {
                        self.send_logged(self.breakpoint_command(bp, true));
                    }
                }
                let _ = reply.send(Ok(sync.current));
            }
            Request::Breakpoints { reply } => {
                let _ = reply.send(Ok(self.breakpoints.all()));
            }
            Request::Exec { action, reply } => {
                let _ = reply.send(self.exec(action));
            }
            Request::StackFrames { reply } => {
                let _ = reply.send(Ok(self.step.frames().to_vec()));
            }
            Request::Fetch {
                id,
                force_refresh,
                reply,
            } => self.fetch(id, force_refresh, reply),
            Request::HandleFor { key, reply } => {
                let _ = reply.send(Ok(self.handles.get_or_create(key)));
            }
            Request::KeyFor { handle, reply } => {
                let _ = reply.send(self.handles.lookup(handle).cloned());
            }
            Request::SetObjectProperty {
                object_id,
                property,
                value,
                reply,
            } => {
                let result = self.send(Command::set_object_property(object_id, &property, value));
                if result.is_ok() {
                    self.invalidate_object(RootId::Object(object_id));
                }
                let _ = reply.send(result);
            }
            Request::RequestSceneTree { reply } => {
                let _ = reply.send(self.send(Command::request_scene_tree()));
            }
            Request::Terminate { reply } => {
                self.shutdown();
                self.emit(SessionEvent::Terminated);
                let _ = reply.send(Ok(()));
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn exec(&mut self, action: ExecAction) -> DebugResult<()> {
        if !self.is_connected() {
            return Err(DebugError::NotConnected);
        }
        self.step.check_exec()?;
        self.send(action.command())?;
        self.step.on_exec(action);
        Ok(())
    }

    fn fetch(&mut self, id: RootId, force_refresh: bool, reply: FetchWaiter) {
        if force_refresh {
            self.invalidate_object(id);
        }
        match self.fetches.lookup(id) {
            Lookup::Resolved(object) => {
                let _ = reply.send(Ok(object));
            }
            Lookup::Pending => {
                let _ = self.fetches.wait(id, reply);
            }
            Lookup::Missing => match self.request_fetch(id) {
                Ok(()) => {
                    if let Err(reply) = self.fetches.wait(id, reply) {
                        let _ = reply.send(Err(DebugError::FetchRejected {
                            id,
                            reason: "fetch was not registered".to_string(),
                        }));
                    }
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
        }
    }

    /// Sends the wire request for `id` and registers the fetch. A scope
    /// requests the variables of its frame, which settles all three scope
    /// fetches of that frame at once.
    fn request_fetch(&mut self, id: RootId) -> DebugResult<()> {
        match id {
            RootId::Scope { frame_id, .. } => {
                if !self.step.is_paused() {
                    return Err(DebugError::InvalidRequest(
                        "stack variables are only available while paused".to_string(),
                    ));
                }
                self.send(Command::get_stack_frame_vars(frame_id))?;
                self.scope_requests.push_back(frame_id);
                for kind in ScopeKind::ALL {
                    let scope = RootId::scope(frame_id, kind);
                    if !self.fetches.is_pending(scope) {
                        let generation = self.fetches.start(scope);
                        self.arm_timeout(scope, generation);
                    }
                }
            }
            RootId::Object(0) => {
                return Err(DebugError::InvalidRequest(
                    "cannot inspect a null object".to_string(),
                ));
            }
            RootId::Object(object_id) => {
                self.send(Command::inspect_object(object_id))?;
                let generation = self.fetches.start(id);
                self.arm_timeout(id, generation);
            }
        }
        Ok(())
    }

    fn arm_timeout(&self, id: RootId, generation: u64) {
        let Some(timeout) = self.config.object_fetch_timeout else {
            return;
        };
        let internal = self.internal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = internal.send(Internal::FetchTimeout { id, generation });
        });
    }

    /// Drops the cached copy of `id`, and of any members scope whose `self`
    /// is that object, since it embeds the same state.
    fn invalidate_object(&mut self, id: RootId) {
        self.fetches.invalidate(id);
        let RootId::Object(object_id) = id else {
            return;
        };
        let stale = self.fetches.resolved_ids_where(|root, object| {
            matches!(root, RootId::Scope { kind: ScopeKind::Members, .. })
                && matches!(object.get("self"), Some(Variant::ObjectId(own)) if *own == object_id)
        });
        for scope in stale {
            tracing::trace!(target: "godot.dap.session", %scope, "dropping members scope of a refreshed object");
            self.fetches.invalidate(scope);
        }
    }

    fn on_accepted(&mut self, stream: TcpStream) -> Option<mpsc::Receiver<ConnectionEvent>> {
        if self.is_connected() {
            tracing::warn!(target: "godot.dap.session", "an engine is already connected; rejecting another");
            return None;
        }
        let (connection, inbound) = Connection::spawn(stream, self.config.connection.clone());
        let peer = connection.peer_addr();
        self.connection = Some(connection);
        self.revision = initial_revision(self.config.protocol);
        self.thread_id = 0;

        for bp in self.breakpoints.all() {
            self.send_logged(self.breakpoint_command(&bp, true));
        }
        tracing::info!(
            target: "godot.dap.session",
            ?peer,
            breakpoints = self.breakpoints.len(),
            "engine connected"
        );
        self.emit(SessionEvent::Connected { peer });
        Some(inbound)
    }

    fn on_disconnected(&mut self, error: Option<WireError>) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        connection.shutdown();
        match &error {
            Some(err) => tracing::error!(target: "godot.dap.session", error = %err, "engine connection lost"),
            None => tracing::info!(target: "godot.dap.session", "engine disconnected"),
        }
        self.reset_stop_state();
        self.fetches.reject_all(|_| DebugError::SessionClosed);
        self.step = StepState::new();
        self.emit(SessionEvent::Terminated);
    }

    fn reset_stop_state(&mut self) {
        self.scope_requests.clear();
        self.frame_vars = FrameVarsAccumulator::default();
    }

    fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.cancel();
        }
        if let Some(connection) = self.connection.take() {
            connection.shutdown();
        }
        self.reset_stop_state();
        self.fetches.reject_all(|_| DebugError::SessionClosed);
    }

    /// Tracks which revision the engine speaks and the thread id to echo.
    fn observe_revision(&mut self, command: &Command) {
        match command.thread_id {
            Some(thread_id) => self.thread_id = thread_id,
            None => {
                if self.config.protocol == ProtocolSetting::Auto
                    && self.revision == ProtocolRevision::Threaded
                {
                    tracing::info!(target: "godot.dap.session", "engine uses frames without thread ids");
                    self.revision = ProtocolRevision::Legacy;
                }
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        self.observe_revision(&command);
        let name = command.name.clone();
        let message = match EngineMessage::parse(command) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(target: "godot.dap.session", command = %name, error = %err, "ignoring malformed engine message");
                return;
            }
        };

        match message {
            EngineMessage::DebugEnter { reason, .. } => {
                self.step.on_debug_enter(&reason);
                self.send_logged(Command::get_stack_dump());
            }
            EngineMessage::DebugExit => {
                self.step.on_debug_exit();
                self.fetches.clear_resolved();
                for id in self.fetches.pending_ids() {
                    if id.is_scope() {
                        self.fetches.reject(id, || DebugError::FetchRejected {
                            id,
                            reason: "the game resumed".to_string(),
                        });
                    }
                }
                self.reset_stop_state();
                self.emit(SessionEvent::Resumed);
            }
            EngineMessage::SetPid => {}
            EngineMessage::StackDump(infos) => self.on_stack_dump(infos),
            EngineMessage::StackFrameVars(FrameVars::Expect(count)) => {
                if let Some(vars) = self.frame_vars.begin(count) {
                    self.resolve_scopes(vars);
                }
            }
            EngineMessage::StackFrameVars(FrameVars::Batched(vars)) => self.resolve_scopes(vars),
            EngineMessage::StackFrameVar { name, scope, value } => {
                match self.frame_vars.push(name, scope, value) {
                    Accumulated::Incomplete => {}
                    Accumulated::Complete(vars) => self.resolve_scopes(vars),
                    Accumulated::Unexpected => {
                        tracing::error!(
                            target: "godot.dap.session",
                            "more stack frame variables were sent than expected"
                        );
                    }
                }
            }
            EngineMessage::InspectObject {
                object_id,
                class_name,
                properties,
            } => {
                let id = RootId::Object(object_id);
                if !self
                    .fetches
                    .resolve(id, GodotObject::new(id, class_name, properties))
                {
                    tracing::debug!(target: "godot.dap.session", object_id, "dropping unrequested object reply");
                }
            }
            EngineMessage::SceneTree(tree) => self.emit(SessionEvent::SceneTree(tree)),
            EngineMessage::Output(lines) => {
                for line in lines {
                    self.emit(SessionEvent::Output {
                        category: OutputCategory::Stdout,
                        line,
                    });
                }
            }
            EngineMessage::Error { source, message } => self.emit(SessionEvent::Output {
                category: OutputCategory::Stderr,
                line: format!("{source}: {message}"),
            }),
            EngineMessage::Unknown(command) => {
                tracing::debug!(
                    target: "godot.dap.session",
                    command = %command.name,
                    params = command.parameters.len(),
                    "ignoring unknown engine command"
                );
            }
        }
    }

    fn on_stack_dump(&mut self, infos: Vec<godot_wire::StackFrameInfo>) {
        let frames: Vec<StackFrame> = infos
            .into_iter()
            .enumerate()
            .map(|(i, mut info)| {
                info.file = paths::from_res_path(self.project.as_deref(), &info.file);
                StackFrame::from_wire(i as u32, info)
            })
            .collect();
        let at_breakpoint = frames.first().is_some_and(|top| {
            u32::try_from(top.line).is_ok_and(|line| self.breakpoints.contains(&top.file, line))
        });

        match self.step.on_stack_dump(frames, at_breakpoint) {
            StackDecision::AutoContinue => {
                tracing::trace!(target: "godot.dap.session", "still stepping out");
                self.send_logged(Command::next());
            }
            StackDecision::Stop(reason) => {
                self.emit(SessionEvent::Paused {
                    frames: self.step.frames().to_vec(),
                    reason,
                });
            }
        }
        self.send_logged(Command::request_scene_tree());
    }

    fn resolve_scopes(&mut self, mut vars: ScopeVars) {
        let Some(frame_id) = self.scope_requests.pop_front() else {
            tracing::warn!(target: "godot.dap.session", "stack frame variables arrived without a request");
            return;
        };
        for kind in ScopeKind::ALL {
            let values = std::mem::take(vars.scope_mut(kind));
            let id = RootId::scope(frame_id, kind);
            if !self.fetches.resolve(id, GodotObject::scope(frame_id, kind, values)) {
                tracing::debug!(target: "godot.dap.session", frame_id, scope = kind.label(), "dropping scope nobody waits for");
            }
        }
    }
}
