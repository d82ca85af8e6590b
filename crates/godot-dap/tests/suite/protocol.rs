use godot_config::ProtocolSetting;
use godot_dap::session::{DebugSessionConfig, OutputCategory, SessionEvent};
use godot_wire::{mock::MockEngineConfig, Command, ProtocolRevision, Variant};

use crate::harness::{connect_engine, frame, listening_session, next_event, pause_engine};

fn with_stack(config: MockEngineConfig) -> MockEngineConfig {
    MockEngineConfig {
        stack: vec![frame("res://main.gd", 1, "_ready")],
        ..config
    }
}

#[tokio::test]
async fn auto_mode_follows_a_legacy_engine() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let config = with_stack(MockEngineConfig {
        revision: ProtocolRevision::Legacy,
        ..MockEngineConfig::default()
    });
    let engine = connect_engine(&mut events, addr, config).await;
    pause_engine(&engine, &mut events, "Breakpoint").await;

    let dumps = engine.wait_for("get_stack_dump", 1).await;
    assert_eq!(dumps[0].thread_id, None);

    session.next().await.unwrap();
    let next = engine.wait_for("next", 1).await;
    assert_eq!(next[0].thread_id, None);
}

#[tokio::test]
async fn threaded_engines_get_their_thread_id_back() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let config = with_stack(MockEngineConfig {
        thread_id: 7,
        ..MockEngineConfig::default()
    });
    let engine = connect_engine(&mut events, addr, config).await;
    pause_engine(&engine, &mut events, "Breakpoint").await;

    session.next().await.unwrap();
    let next = engine.wait_for("next", 1).await;
    assert_eq!(next[0].thread_id, Some(7));
}

#[tokio::test]
async fn legacy_setting_never_sends_thread_ids() {
    let config = DebugSessionConfig {
        protocol: ProtocolSetting::Legacy,
        ..DebugSessionConfig::default()
    };
    let (session, addr) = listening_session(config).await;
    let mut events = session.subscribe_events();
    session.set_breakpoint("res://main.gd", 2).await.unwrap();
    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;

    let sent = engine.wait_for("breakpoint", 1).await;
    assert_eq!(sent[0].thread_id, None);
}

#[tokio::test]
async fn output_split_across_reads_is_reassembled() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;

    let output = Command::with_params(
        "output",
        vec![Variant::PackedStringArray(vec!["hello".into(), "world".into()])],
    );
    engine.send_split(output, &[1, 3, 9, 17]).await.unwrap();

    for expected in ["hello", "world"] {
        let event = next_event(&mut events, |e| matches!(e, SessionEvent::Output { .. })).await;
        let SessionEvent::Output { category, line } = event else {
            unreachable!()
        };
        assert_eq!(category, OutputCategory::Stdout);
        assert_eq!(line, expected);
    }
}

#[tokio::test]
async fn engine_errors_become_stderr_output() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;

    let params: Vec<Variant> = vec![
        Variant::Int(0),
        Variant::Int(0),
        Variant::Int(1),
        Variant::Int(2),
        "_ready".into(),
        "res://main.gd".into(),
        Variant::Int(4),
        "Null instance".into(),
        "".into(),
        Variant::Bool(false),
    ];
    engine.send(Command::with_params("error", params)).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, SessionEvent::Output { .. })).await;
    let SessionEvent::Output { category, line } = event else {
        unreachable!()
    };
    assert_eq!(category, OutputCategory::Stderr);
    assert_eq!(line, "res://main.gd:4: Null instance");
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;

    // A stack dump mixing frame encodings.
    engine
        .send(Command::with_params(
            "stack_dump",
            vec![Variant::Dictionary(Vec::new()), Variant::Int(3)],
        ))
        .await
        .unwrap();
    engine.output(&["still alive"]).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, SessionEvent::Output { .. })).await;
    assert!(matches!(event, SessionEvent::Output { line, .. } if line == "still alive"));
}

#[tokio::test]
async fn every_stop_requests_the_scene_tree() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let config = with_stack(MockEngineConfig::default());
    let engine = connect_engine(&mut events, addr, config).await;
    pause_engine(&engine, &mut events, "Breakpoint").await;

    let event = next_event(&mut events, |e| matches!(e, SessionEvent::SceneTree(_))).await;
    let SessionEvent::SceneTree(root) = event else {
        unreachable!()
    };
    assert_eq!(root.name, "root");
    assert_eq!(root.class_name, "Window");
    session.request_scene_tree().await.unwrap();
    engine.wait_for("scene:request_scene_tree", 2).await;
}
