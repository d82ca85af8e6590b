use godot_dap::{
    error::DebugError,
    session::DebugSessionConfig,
    state::PauseReason,
};
use godot_wire::mock::MockEngineConfig;

use crate::harness::{connect_engine, frame, listening_session, next_pause, pause_engine};

#[tokio::test]
async fn step_out_keeps_stepping_until_the_frame_returns() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let config = MockEngineConfig {
        stack: vec![
            frame("res://player.gd", 5, "take_damage"),
            frame("res://player.gd", 20, "_process"),
        ],
        ..MockEngineConfig::default()
    };
    let engine = connect_engine(&mut events, addr, config).await;

    let (frames, reason) = pause_engine(&engine, &mut events, "Breakpoint").await;
    assert_eq!(reason, PauseReason::Breakpoint);
    assert_eq!(frames.len(), 2);

    session.step_out().await.unwrap();
    engine.wait_for("next", 1).await;

    // Same depth: the adapter steps again on its own.
    engine
        .set_stack(vec![
            frame("res://player.gd", 6, "take_damage"),
            frame("res://player.gd", 20, "_process"),
        ])
        .await;
    engine.debug_exit().await.unwrap();
    engine.debug_enter("Breakpoint").await.unwrap();
    engine.wait_for("next", 2).await;

    engine
        .set_stack(vec![frame("res://player.gd", 21, "_process")])
        .await;
    engine.debug_exit().await.unwrap();
    let (frames, reason) = pause_engine(&engine, &mut events, "Breakpoint").await;
    assert_eq!(reason, PauseReason::Step);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].function, "_process");
    assert_eq!(frames[0].line, 21);
    assert_eq!(session.stack_frames().await.unwrap(), frames);
}

#[tokio::test]
async fn step_out_stops_at_a_breakpoint_in_the_same_frame() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    session.set_breakpoint("res://player.gd", 6).await.unwrap();
    let config = MockEngineConfig {
        stack: vec![
            frame("res://player.gd", 5, "take_damage"),
            frame("res://player.gd", 20, "_process"),
        ],
        ..MockEngineConfig::default()
    };
    let engine = connect_engine(&mut events, addr, config).await;
    pause_engine(&engine, &mut events, "Breakpoint").await;

    session.step_out().await.unwrap();
    engine
        .set_stack(vec![
            frame("res://player.gd", 6, "take_damage"),
            frame("res://player.gd", 20, "_process"),
        ])
        .await;
    engine.debug_exit().await.unwrap();
    let (frames, reason) = pause_engine(&engine, &mut events, "Breakpoint").await;
    assert_eq!(frames[0].line, 6);
    assert_eq!(reason, PauseReason::Breakpoint);
    assert_eq!(engine.received_named("next").await.len(), 1);
}

#[tokio::test]
async fn exception_stops_only_allow_terminate() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let config = MockEngineConfig {
        stack: vec![frame("res://main.gd", 9, "_ready")],
        ..MockEngineConfig::default()
    };
    let engine = connect_engine(&mut events, addr, config).await;

    let (_, reason) = pause_engine(&engine, &mut events, "Division by zero error.").await;
    assert_eq!(reason, PauseReason::Exception("Division by zero error.".into()));

    for result in [
        session.continue_().await,
        session.next().await,
        session.step().await,
        session.step_out().await,
        session.pause().await,
    ] {
        assert!(matches!(result, Err(DebugError::ExceptionMode)));
    }
    assert!(engine.received_named("continue").await.is_empty());

    session.terminate().await.unwrap();
    engine.closed().await;
}

#[tokio::test]
async fn pause_and_step_reasons() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let config = MockEngineConfig {
        stack: vec![frame("res://main.gd", 9, "_process")],
        ..MockEngineConfig::default()
    };
    let engine = connect_engine(&mut events, addr, config).await;

    session.pause().await.unwrap();
    engine.wait_for("break", 1).await;
    let (_, reason) = pause_engine(&engine, &mut events, "Breakpoint").await;
    assert_eq!(reason, PauseReason::Pause);

    session.step().await.unwrap();
    engine.wait_for("step", 1).await;
    engine.debug_exit().await.unwrap();
    engine.debug_enter("Breakpoint").await.unwrap();
    let (_, reason) = next_pause(&mut events).await;
    assert_eq!(reason, PauseReason::Step);

    session.continue_().await.unwrap();
    engine.wait_for("continue", 1).await;
}
