use godot_dap::session::{DebugSessionConfig, SessionEvent};
use godot_wire::{mock::MockEngineConfig, Variant};

use crate::harness::{connect_engine, listening_session, next_event};

fn breakpoint_params(file: &str, line: i64, enabled: bool) -> Vec<Variant> {
    vec![Variant::from(file), Variant::Int(line), Variant::Bool(enabled)]
}

#[tokio::test]
async fn breakpoints_set_before_connecting_are_replayed() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    session.set_breakpoint("res://a.gd", 10).await.unwrap();
    // Adding the same line twice is idempotent.
    session.set_breakpoint("res://a.gd", 10).await.unwrap();

    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;
    let sent = engine.wait_for("breakpoint", 1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].parameters, breakpoint_params("res://a.gd", 10, true));
}

#[tokio::test]
async fn breakpoints_survive_a_reconnect() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    session.set_breakpoint("res://a.gd", 10).await.unwrap();

    let first = connect_engine(&mut events, addr, MockEngineConfig::default()).await;
    first.wait_for("breakpoint", 1).await;
    first.close().await;
    next_event(&mut events, |event| matches!(event, SessionEvent::Terminated)).await;

    assert_eq!(session.breakpoints().await.unwrap().len(), 1);

    let second = connect_engine(&mut events, addr, MockEngineConfig::default()).await;
    let sent = second.wait_for("breakpoint", 1).await;
    assert_eq!(sent[0].parameters, breakpoint_params("res://a.gd", 10, true));
}

#[tokio::test]
async fn syncing_a_file_while_connected_sends_the_difference() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    session.set_breakpoint("res://a.gd", 10).await.unwrap();
    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;
    engine.wait_for("breakpoint", 1).await;

    let current = session.set_breakpoints("res://a.gd", vec![12]).await.unwrap();
    assert_eq!(current.iter().map(|bp| bp.line).collect::<Vec<_>>(), [12]);

    let sent = engine.wait_for("breakpoint", 3).await;
    assert_eq!(sent[1].parameters, breakpoint_params("res://a.gd", 10, false));
    assert_eq!(sent[2].parameters, breakpoint_params("res://a.gd", 12, true));

    assert!(session.remove_breakpoint("res://a.gd", 12).await.unwrap().is_some());
    let sent = engine.wait_for("breakpoint", 4).await;
    assert_eq!(sent[3].parameters, breakpoint_params("res://a.gd", 12, false));
}

#[tokio::test]
async fn project_paths_are_sent_as_resource_paths() {
    let session = godot_dap::DebugSession::new(DebugSessionConfig::default());
    let addr = session
        .listen("127.0.0.1:0".parse().unwrap(), Some("/home/dev/game".into()))
        .await
        .unwrap();
    let mut events = session.subscribe_events();
    session
        .set_breakpoint("/home/dev/game/player.gd", 4)
        .await
        .unwrap();

    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;
    let sent = engine.wait_for("breakpoint", 1).await;
    assert_eq!(sent[0].parameters, breakpoint_params("res://player.gd", 4, true));
}
