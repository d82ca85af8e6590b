use std::{collections::HashMap, net::SocketAddr};

use godot_dap::session::DebugSessionConfig;
use godot_wire::{
    mock::{MockEngine, MockEngineConfig},
    ScopeVars, Variant,
};
use serde_json::{json, Value};

use crate::harness::{frame, DapClient};

fn engine_config() -> MockEngineConfig {
    let mut frame_vars = HashMap::new();
    frame_vars.insert(
        0,
        ScopeVars {
            locals: vec![("count".into(), Variant::Int(3))],
            members: vec![("self".into(), Variant::ObjectId(42))],
            globals: Vec::new(),
        },
    );
    let mut objects = HashMap::new();
    objects.insert(
        42,
        (
            "Node".to_string(),
            vec![("name".to_string(), Variant::from("Main"))],
        ),
    );
    MockEngineConfig {
        stack: vec![frame("res://main.gd", 3, "_ready")],
        frame_vars,
        objects,
        ..MockEngineConfig::default()
    }
}

fn success(response: &Value) -> bool {
    response.get("success").and_then(Value::as_bool).unwrap_or(false)
}

/// Runs initialize, setBreakpoints, launch and configurationDone, then
/// connects a mock engine to the address the adapter reported.
async fn launched(client: &mut DapClient) -> MockEngine {
    let init = client.request("initialize", json!({ "adapterID": "godot" })).await;
    assert!(success(&init));
    assert_eq!(init["body"]["supportsConfigurationDoneRequest"], true);
    client.event("initialized").await;

    let bps = client
        .request(
            "setBreakpoints",
            json!({ "source": { "path": "res://main.gd" }, "breakpoints": [{ "line": 3 }] }),
        )
        .await;
    assert!(success(&bps));
    assert_eq!(bps["body"]["breakpoints"][0]["verified"], true);
    assert_eq!(bps["body"]["breakpoints"][0]["line"], 3);

    let launch_seq = client
        .send("launch", json!({ "address": "127.0.0.1", "port": 0, "debugCollisions": true }))
        .await;
    let done = client.request("configurationDone", json!({})).await;
    assert!(success(&done));

    let launch = client.response(launch_seq).await;
    assert!(success(&launch), "launch failed: {launch}");
    let args: Vec<&str> = launch["body"]["engineArgs"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(args.contains(&"--debug-collisions"));
    assert!(args.contains(&"res://main.gd:3"));

    let addr: SocketAddr = launch["body"]["address"].as_str().unwrap().parse().unwrap();
    let engine = MockEngine::connect_with_config(addr, engine_config()).await.unwrap();
    engine.wait_for("breakpoint", 1).await;
    engine
}

#[tokio::test]
async fn dap_launch_stop_inspect_and_disconnect() {
    let (mut client, server) = DapClient::spawn(DebugSessionConfig::default());
    let engine = launched(&mut client).await;

    let threads = client.request("threads", json!({})).await;
    assert_eq!(threads["body"]["threads"][0]["id"], 1);

    engine.debug_enter("Breakpoint").await.unwrap();
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["threadId"], 1);

    let trace = client.request("stackTrace", json!({ "threadId": 1 })).await;
    assert!(success(&trace));
    let top = &trace["body"]["stackFrames"][0];
    assert_eq!(top["name"], "_ready");
    assert_eq!(top["line"], 3);
    assert_eq!(top["source"]["path"], "res://main.gd");

    let scopes = client.request("scopes", json!({ "frameId": 0 })).await;
    assert!(success(&scopes), "scopes failed: {scopes}");
    let scopes = scopes["body"]["scopes"].as_array().unwrap().clone();
    assert_eq!(scopes.len(), 3);
    assert_eq!(scopes[0]["name"], "Locals");

    let locals = client
        .request(
            "variables",
            json!({ "variablesReference": scopes[0]["variablesReference"] }),
        )
        .await;
    assert_eq!(locals["body"]["variables"][0]["name"], "count");
    assert_eq!(locals["body"]["variables"][0]["value"], "3");
    assert_eq!(locals["body"]["variables"][0]["type"], "int");

    let members = client
        .request(
            "variables",
            json!({ "variablesReference": scopes[1]["variablesReference"] }),
        )
        .await;
    let this = &members["body"]["variables"][0];
    assert_eq!(this["value"], "Node<42>");

    let eval = client
        .request("evaluate", json!({ "expression": "self.name", "frameId": 0 }))
        .await;
    assert_eq!(eval["body"]["result"], "Main");

    let set = client
        .request(
            "setVariable",
            json!({ "variablesReference": this["variablesReference"], "name": "name", "value": "\"Root\"" }),
        )
        .await;
    assert!(success(&set), "setVariable failed: {set}");
    assert_eq!(set["body"]["value"], "Root");
    let sent = engine.wait_for("scene:set_object_property", 1).await;
    assert_eq!(sent[0].parameters[2], Variant::from("Root"));

    let cont = client.request("continue", json!({ "threadId": 1 })).await;
    assert!(success(&cont));
    engine.wait_for("continue", 1).await;

    engine.output(&["hello from the game"]).await.unwrap();
    // Skip the console line written at launch.
    let output = loop {
        let output = client.event("output").await;
        if output["body"]["category"] == "stdout" {
            break output;
        }
    };
    assert_eq!(output["body"]["output"], "hello from the game\n");

    let disconnect = client.request("disconnect", json!({})).await;
    assert!(success(&disconnect));
    engine.closed().await;
    server.await.unwrap();
}

#[tokio::test]
async fn dap_exception_stop_rejects_stepping() {
    let (mut client, _server) = DapClient::spawn(DebugSessionConfig::default());
    let engine = launched(&mut client).await;

    engine.debug_enter("Invalid call. Nonexistent function 'foo'.").await.unwrap();
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "exception");
    assert_eq!(
        stopped["body"]["text"],
        "Invalid call. Nonexistent function 'foo'."
    );

    let next = client.request("next", json!({ "threadId": 1 })).await;
    assert!(!success(&next));
    assert!(next["message"].as_str().unwrap().contains("exception"));

    let terminate = client.request("terminate", json!({})).await;
    assert!(success(&terminate));
    client.event("terminated").await;
}

#[tokio::test]
async fn engine_exit_ends_the_dap_session() {
    let (mut client, _server) = DapClient::spawn(DebugSessionConfig::default());
    let engine = launched(&mut client).await;
    engine.close().await;
    client.event("terminated").await;
}

#[tokio::test]
async fn requests_before_launch_fail_politely() {
    let (mut client, _server) = DapClient::spawn(DebugSessionConfig::default());
    let next = client.request("next", json!({ "threadId": 1 })).await;
    assert!(!success(&next));
    assert_eq!(next["message"], "no engine is connected");

    let unknown = client.request("restartFrame", json!({})).await;
    assert!(!success(&unknown));

    let bad = client.request("launch", json!({ "port": "not a port" })).await;
    assert!(!success(&bad));
}

#[tokio::test]
async fn oversized_client_messages_end_the_session() {
    use godot_dap::{
        dap_tokio::{DapWriter, FramingError},
        wire_server::{self, WireServerError},
    };

    let config = DebugSessionConfig {
        max_message_bytes: 64,
        ..DebugSessionConfig::default()
    };
    let (client, server_stream) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_stream);
    let server = tokio::spawn(wire_server::run(server_read, server_write, config));

    let mut writer = DapWriter::new(client);
    let padding = "x".repeat(128);
    writer
        .write_value(&json!({
            "seq": 1,
            "type": "request",
            "command": "initialize",
            "arguments": { "clientName": padding },
        }))
        .await
        .unwrap();

    let outcome = server.await.unwrap();
    assert!(
        matches!(
            outcome,
            Err(WireServerError::Framing(FramingError::TooLarge { limit: 64, .. }))
        ),
        "{outcome:?}"
    );
}
