use std::{
    path::Path,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use godot_wire::Variant;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::{
    dap_tokio::{self, DapReader, DapWriter, FramingError, Request},
    error::{DebugError, DebugResult},
    format,
    launch::LaunchArgs,
    resolve::ObjectSource,
    session::{DebugSession, DebugSessionConfig, SessionEvent},
    state::{PauseReason, StackFrame},
};

/// The engine is presented to the client as a single thread.
pub const THREAD_ID: i64 = 1;

#[derive(Debug, Error)]
pub enum WireServerError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Debug(#[from] DebugError),
}

type Result<T> = std::result::Result<T, WireServerError>;

/// Run the Godot debug adapter over stdio.
pub async fn run_stdio(config: DebugSessionConfig) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, config).await.map_err(anyhow::Error::from)
}

pub async fn run<R, W>(reader: R, writer: W, config: DebugSessionConfig) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let seq = Arc::new(AtomicI64::new(1));
    let max_message_bytes = config.max_message_bytes;
    let session = DebugSession::new(config);

    let writer_task = tokio::spawn(async move {
        let mut writer = DapWriter::new(writer);
        while let Some(msg) = out_rx.recv().await {
            if let Err(err) = writer.write_value(&msg).await {
                tracing::warn!(target: "godot.dap", error = %err, "failed to write DAP message");
                break;
            }
        }
    });
    let event_task = spawn_event_task(session.subscribe_events(), out_tx.clone(), seq.clone());

    let mut reader = DapReader::with_max_message_bytes(reader, max_message_bytes);
    let outcome = loop {
        let request = match reader.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err.into()),
        };
        if request.message_type != "request" {
            continue;
        }
        tracing::debug!(target: "godot.dap", command = %request.command, seq = request.seq, "request");

        match request.command.as_str() {
            "initialize" => {
                let body = json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsEvaluateForHovers": true,
                    "supportsSetVariable": true,
                    "supportsTerminateRequest": true,
                    "supportsStepBack": false,
                    "supportsConditionalBreakpoints": false,
                });
                send_response(&out_tx, &seq, &request, true, Some(body), None);
                send_event(&out_tx, &seq, "initialized", None);
            }
            "launch" | "attach" => {
                let args = match serde_json::from_value::<LaunchArgs>(normalized_args(&request)) {
                    Ok(args) => args,
                    Err(err) => {
                        let message = format!("invalid {} arguments: {err}", request.command);
                        send_response(&out_tx, &seq, &request, false, None, Some(message));
                        continue;
                    }
                };
                // `launch` waits for configurationDone, which this loop must
                // still be free to receive.
                let session = session.clone();
                let out_tx = out_tx.clone();
                let seq = seq.clone();
                tokio::spawn(async move {
                    let result = if request.command == "launch" {
                        session.launch(&args).await.map(|launched| {
                            send_event(
                                &out_tx,
                                &seq,
                                "output",
                                Some(json!({
                                    "category": "console",
                                    "output": format!("Waiting for the engine: godot {}\n", launched.engine_args.join(" ")),
                                })),
                            );
                            Some(json!({
                                "address": launched.addr.to_string(),
                                "engineArgs": launched.engine_args,
                            }))
                        })
                    } else {
                        session
                            .attach(&args)
                            .await
                            .map(|addr| Some(json!({ "address": addr.to_string() })))
                    };
                    send_result(&out_tx, &seq, &request, result);
                });
            }
            "configurationDone" => {
                session.configuration_done();
                send_response(&out_tx, &seq, &request, true, None, None);
            }
            "setBreakpoints" => {
                let result = set_breakpoints(&session, &request).await;
                send_result(&out_tx, &seq, &request, result);
            }
            "threads" => {
                let body = json!({ "threads": [{ "id": THREAD_ID, "name": "Main" }] });
                send_response(&out_tx, &seq, &request, true, Some(body), None);
            }
            "stackTrace" => {
                let result = session.stack_frames().await.map(|frames| {
                    let frames: Vec<Value> = frames.iter().map(stack_frame_json).collect();
                    Some(json!({ "totalFrames": frames.len(), "stackFrames": frames }))
                });
                send_result(&out_tx, &seq, &request, result);
            }
            "continue" => {
                let result = session
                    .continue_()
                    .await
                    .map(|()| Some(json!({ "allThreadsContinued": true })));
                send_result(&out_tx, &seq, &request, result);
            }
            "next" | "stepIn" | "stepOut" | "pause" => {
                let result = match request.command.as_str() {
                    "next" => session.next().await,
                    "stepIn" => session.step().await,
                    "stepOut" => session.step_out().await,
                    _ => session.pause().await,
                };
                send_result(&out_tx, &seq, &request, result.map(|()| None));
            }
            "scopes" | "variables" | "evaluate" | "setVariable" => {
                // These wait on the engine; answer them off the read loop.
                let session = session.clone();
                let out_tx = out_tx.clone();
                let seq = seq.clone();
                tokio::spawn(async move {
                    let result = inspect_request(&session, &request).await;
                    send_result(&out_tx, &seq, &request, result);
                });
            }
            "terminate" => {
                let result = session.terminate().await;
                send_result(&out_tx, &seq, &request, result.map(|()| None));
            }
            "disconnect" => {
                if let Err(err) = session.terminate().await {
                    tracing::debug!(target: "godot.dap", error = %err, "session already closed");
                }
                send_response(&out_tx, &seq, &request, true, None, None);
                break Ok(());
            }
            _ => {
                send_response(
                    &out_tx,
                    &seq,
                    &request,
                    false,
                    None,
                    Some(format!("unhandled request {}", request.command)),
                );
            }
        }
    };

    let _ = session.terminate().await;
    drop(session);
    let _ = event_task.await;
    drop(out_tx);
    let _ = writer_task.await;
    outcome
}

/// `launch.json` uses camelCase; `LaunchArgs` deserialises snake_case.
fn normalized_args(request: &Request) -> Value {
    let Some(map) = request.arguments.as_object() else {
        return json!({});
    };
    let converted = map
        .iter()
        .map(|(key, value)| (camel_to_snake(key), value.clone()))
        .collect::<serde_json::Map<_, _>>();
    Value::Object(converted)
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn arg_i64(request: &Request, name: &str) -> DebugResult<i64> {
    request
        .arguments
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| DebugError::InvalidRequest(format!("{}.{name} is required", request.command)))
}

fn arg_str<'a>(request: &'a Request, name: &str) -> DebugResult<&'a str> {
    request
        .arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| DebugError::InvalidRequest(format!("{}.{name} is required", request.command)))
}

fn frame_id(request: &Request) -> DebugResult<u32> {
    let id = arg_i64(request, "frameId")?;
    u32::try_from(id).map_err(|_| DebugError::InvalidRequest(format!("invalid frameId {id}")))
}

async fn set_breakpoints(session: &DebugSession, request: &Request) -> DebugResult<Option<Value>> {
    let path = request
        .arguments
        .get("source")
        .and_then(|s| s.get("path"))
        .and_then(Value::as_str)
        .ok_or_else(|| DebugError::InvalidRequest("setBreakpoints.source.path is required".to_string()))?;
    let lines: Vec<u32> = request
        .arguments
        .get("breakpoints")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|bp| bp.get("line").and_then(Value::as_u64))
                .filter_map(|line| u32::try_from(line).ok())
                .collect()
        })
        .unwrap_or_default();

    let breakpoints = session.set_breakpoints(path, lines).await?;
    let breakpoints: Vec<Value> = breakpoints
        .iter()
        .map(|bp| json!({ "id": bp.id, "verified": true, "line": bp.line }))
        .collect();
    Ok(Some(json!({ "breakpoints": breakpoints })))
}

async fn inspect_request(session: &DebugSession, request: &Request) -> DebugResult<Option<Value>> {
    match request.command.as_str() {
        "scopes" => {
            let handles = session.get_scope(frame_id(request)?).await?;
            let scopes = [
                ("Locals", handles.locals),
                ("Members", handles.members),
                ("Globals", handles.globals),
            ]
            .map(|(name, reference)| {
                json!({ "name": name, "variablesReference": reference, "expensive": false })
            });
            Ok(Some(json!({ "scopes": scopes })))
        }
        "variables" => {
            let variables = session
                .variables(arg_i64(request, "variablesReference")?)
                .await?;
            Ok(Some(json!({ "variables": variables })))
        }
        "evaluate" => {
            let expression = arg_str(request, "expression")?;
            let frame = match request.arguments.get("frameId") {
                Some(_) => frame_id(request)?,
                None => 0,
            };
            let view = session.evaluate(frame, expression).await?;
            Ok(Some(json!({
                "result": view.value,
                "type": view.type_name,
                "variablesReference": view.variables_reference,
            })))
        }
        "setVariable" => {
            let reference = arg_i64(request, "variablesReference")?;
            let name = arg_str(request, "name")?;
            let value = parse_value(arg_str(request, "value")?);

            let key = session.key_for(reference).await?;
            let Some(object_id) = key.root.object_id().filter(|_| key.path.is_empty()) else {
                return Err(DebugError::InvalidRequest(
                    "only properties of live objects can be set".to_string(),
                ));
            };
            let rendered = format::render_value(&value);
            session.set_object_property(object_id, name, value).await?;
            Ok(Some(json!({ "value": rendered })))
        }
        other => Err(DebugError::InvalidRequest(format!("unhandled request {other}"))),
    }
}

/// Interprets a value typed in the client: literals become typed values,
/// anything else is taken as a string.
pub fn parse_value(text: &str) -> Variant {
    let text = text.trim();
    match text {
        "null" => return Variant::Nil,
        "true" => return Variant::Bool(true),
        "false" => return Variant::Bool(false),
        _ => {}
    }
    if let Ok(int) = text.parse::<i64>() {
        return Variant::Int(int);
    }
    if let Ok(float) = text.parse::<f64>() {
        if float.is_finite() {
            return Variant::Float(float);
        }
    }
    let unquoted = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(text);
    Variant::String(unquoted.to_string())
}

fn stack_frame_json(frame: &StackFrame) -> Value {
    let name = Path::new(&frame.file)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| frame.file.clone());
    json!({
        "id": frame.id,
        "name": frame.function,
        "line": frame.line,
        "column": 1,
        "source": { "name": name, "path": frame.file },
    })
}

fn send_event(
    tx: &mpsc::UnboundedSender<Value>,
    seq: &Arc<AtomicI64>,
    event: &str,
    body: Option<Value>,
) {
    let s = seq.fetch_add(1, Ordering::Relaxed);
    let _ = tx.send(dap_tokio::event(s, event, body));
}

fn send_response(
    tx: &mpsc::UnboundedSender<Value>,
    seq: &Arc<AtomicI64>,
    request: &Request,
    success: bool,
    body: Option<Value>,
    message: Option<String>,
) {
    let s = seq.fetch_add(1, Ordering::Relaxed);
    let _ = tx.send(dap_tokio::response(s, request, success, body, message));
}

fn send_result(
    tx: &mpsc::UnboundedSender<Value>,
    seq: &Arc<AtomicI64>,
    request: &Request,
    result: DebugResult<Option<Value>>,
) {
    match result {
        Ok(body) => send_response(tx, seq, request, true, body, None),
        Err(err) => {
            tracing::debug!(target: "godot.dap", command = %request.command, error = %err, "request failed");
            send_response(tx, seq, request, false, None, Some(err.to_string()));
        }
    }
}

fn spawn_event_task(
    mut events: broadcast::Receiver<SessionEvent>,
    tx: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "godot.dap", skipped, "dropped session events");
                    continue;
                }
            };

            match event {
                SessionEvent::Paused { reason, .. } => {
                    let mut body = json!({
                        "reason": reason.as_str(),
                        "threadId": THREAD_ID,
                        "allThreadsStopped": true,
                    });
                    if let PauseReason::Exception(message) = &reason {
                        body["text"] = json!(message);
                        body["description"] = json!(message);
                    }
                    send_event(&tx, &seq, "stopped", Some(body));
                }
                SessionEvent::Resumed => send_event(
                    &tx,
                    &seq,
                    "continued",
                    Some(json!({ "threadId": THREAD_ID, "allThreadsContinued": true })),
                ),
                SessionEvent::Output { category, line } => send_event(
                    &tx,
                    &seq,
                    "output",
                    Some(json!({ "category": category.as_str(), "output": format!("{line}\n") })),
                ),
                SessionEvent::Connected { peer } => {
                    tracing::info!(target: "godot.dap", ?peer, "engine attached");
                }
                SessionEvent::SceneTree(_) => {}
                SessionEvent::Terminated => send_event(&tx, &seq, "terminated", None),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_are_parsed() {
        assert_eq!(parse_value("42"), Variant::Int(42));
        assert_eq!(parse_value(" -1.5 "), Variant::Float(-1.5));
        assert_eq!(parse_value("true"), Variant::Bool(true));
        assert_eq!(parse_value("null"), Variant::Nil);
        assert_eq!(parse_value("\"hi there\""), Variant::String("hi there".into()));
        assert_eq!(parse_value("Player"), Variant::String("Player".into()));
        assert_eq!(parse_value("inf"), Variant::String("inf".into()));
    }

    #[test]
    fn launch_arguments_accept_camel_case() {
        assert_eq!(camel_to_snake("debugCollisions"), "debug_collisions");
        assert_eq!(camel_to_snake("port"), "port");
        let request = Request {
            seq: 1,
            message_type: "request".into(),
            command: "launch".into(),
            arguments: json!({ "project": "/g", "timeScale": 2.0, "singleThreadedScene": true }),
        };
        let args: LaunchArgs = serde_json::from_value(normalized_args(&request)).unwrap();
        assert_eq!(args.time_scale, Some(2.0));
        assert!(args.single_threaded_scene);
    }

    #[test]
    fn stack_frames_carry_source_names() {
        let frame = StackFrame {
            id: 0,
            file: "/game/player.gd".into(),
            line: 12,
            function: "_ready".into(),
        };
        let value = stack_frame_json(&frame);
        assert_eq!(value["source"]["name"], "player.gd");
        assert_eq!(value["name"], "_ready");
        assert_eq!(value["line"], 12);
    }
}
