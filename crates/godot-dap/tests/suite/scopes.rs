use std::collections::HashMap;

use godot_dap::{
    error::DebugError, handles::RootId, resolve::ObjectSource, session::DebugSessionConfig,
    DebugSession,
};
use godot_wire::{
    mock::{MockEngine, MockEngineConfig},
    variant::Vector2,
    ScopeKind, ScopeVars, Variant,
};
use tokio::sync::broadcast;

use crate::harness::{connect_engine, frame, listening_session, pause_engine};

fn engine_config(batched: bool) -> MockEngineConfig {
    let vars = ScopeVars {
        locals: vec![
            ("hp".into(), Variant::Int(10)),
            ("dir".into(), Variant::from(Vector2 { x: 1.0, y: 0.5 })),
            ("nobody".into(), Variant::ObjectId(0)),
        ],
        members: vec![
            ("self".into(), Variant::ObjectId(42)),
            ("speed".into(), Variant::Float(2.5)),
        ],
        globals: vec![("Engine".into(), Variant::from("singleton"))],
    };
    let mut frame_vars = HashMap::new();
    frame_vars.insert(0, vars);
    let mut objects = HashMap::new();
    objects.insert(
        42,
        (
            "CharacterBody2D".to_string(),
            vec![
                ("name".to_string(), Variant::from("Player")),
                ("speed".to_string(), Variant::Float(2.5)),
            ],
        ),
    );
    MockEngineConfig {
        stack: vec![frame("res://player.gd", 7, "_physics_process")],
        frame_vars,
        batched_frame_vars: batched,
        objects,
        ..MockEngineConfig::default()
    }
}

async fn paused_session(
    batched: bool,
) -> (DebugSession, MockEngine, broadcast::Receiver<godot_dap::SessionEvent>) {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, engine_config(batched)).await;
    pause_engine(&engine, &mut events, "Breakpoint").await;
    (session, engine, events)
}

async fn check_scopes(session: &DebugSession, engine: &MockEngine) {
    let handles = session.get_scope(0).await.unwrap();
    assert_ne!(handles.locals, handles.members);
    assert_ne!(handles.members, handles.globals);

    let locals = session.variables(handles.locals).await.unwrap();
    let names: Vec<&str> = locals.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, ["hp", "dir", "nobody"]);
    assert_eq!(locals[0].value, "10");
    assert_eq!(locals[0].type_name, "int");
    assert_eq!(locals[0].variables_reference, 0);
    assert_eq!(locals[1].value, "Vector2(1, 0.5)");
    assert_ne!(locals[1].variables_reference, 0);
    assert_eq!(locals[2].value, "null");
    assert_eq!(locals[2].variables_reference, 0);

    let dir = session.variables(locals[1].variables_reference).await.unwrap();
    let components: Vec<(&str, &str)> = dir
        .iter()
        .map(|v| (v.name.as_str(), v.value.as_str()))
        .collect();
    assert_eq!(components, [("x", "1"), ("y", "0.5")]);

    let members = session.variables(handles.members).await.unwrap();
    assert_eq!(members[0].name, "self");
    assert_eq!(members[0].value, "CharacterBody2D<42>");
    let player = session.variables(members[0].variables_reference).await.unwrap();
    assert_eq!(player[0].value, "Player");

    let globals = session.variables(handles.globals).await.unwrap();
    assert_eq!(globals[0].value, "singleton");

    // All three scopes came from a single request.
    assert_eq!(engine.frame_var_requests(), 1);
}

#[tokio::test]
async fn scopes_resolve_from_one_frame_request() {
    let (session, engine, _events) = paused_session(false).await;
    check_scopes(&session, &engine).await;

    // A second look is served from the cache.
    session.get_scope(0).await.unwrap();
    assert_eq!(engine.frame_var_requests(), 1);
}

#[tokio::test]
async fn batched_frame_variables_are_accepted() {
    let (session, engine, _events) = paused_session(true).await;
    check_scopes(&session, &engine).await;
}

#[tokio::test]
async fn evaluate_walks_dotted_names() {
    let (session, _engine, _events) = paused_session(false).await;

    let hp = session.evaluate(0, "hp").await.unwrap();
    assert_eq!(hp.value, "10");

    let name = session.evaluate(0, "self.name").await.unwrap();
    assert_eq!(name.name, "self.name");
    assert_eq!(name.value, "Player");

    let x = session.evaluate(0, "dir.x").await.unwrap();
    assert_eq!(x.value, "1");

    // Members are searched after locals.
    let speed = session.evaluate(0, "speed").await.unwrap();
    assert_eq!(speed.value, "2.5");

    let err = session.evaluate(0, "self.missing").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot retrieve path 'self.missing'. Following subpath not found: 'missing'"
    );
    assert!(matches!(
        session.evaluate(0, "a..b").await,
        Err(DebugError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn resuming_drops_cached_scopes() {
    let (session, engine, mut events) = paused_session(false).await;
    session.get_scope(0).await.unwrap();

    engine.debug_exit().await.unwrap();
    crate::harness::next_event(&mut events, |event| {
        matches!(event, godot_dap::SessionEvent::Resumed)
    })
    .await;
    assert!(matches!(
        session.get_scope(0).await,
        Err(DebugError::InvalidRequest(_))
    ));

    pause_engine(&engine, &mut events, "Breakpoint").await;
    session.get_scope(0).await.unwrap();
    assert_eq!(engine.frame_var_requests(), 2);
}

#[tokio::test]
async fn refreshing_self_drops_the_cached_members_scope() {
    let (session, engine, _events) = paused_session(false).await;
    session.get_scope(0).await.unwrap();
    assert_eq!(engine.frame_var_requests(), 1);

    session.force_refresh(RootId::Object(42)).await.unwrap();

    // Locals do not embed `self` and stay cached.
    session
        .object(RootId::scope(0, ScopeKind::Locals), false)
        .await
        .unwrap();
    assert_eq!(engine.frame_var_requests(), 1);

    let members = session
        .object(RootId::scope(0, ScopeKind::Members), false)
        .await
        .unwrap();
    assert_eq!(members.get("self"), Some(&Variant::ObjectId(42)));
    assert_eq!(engine.frame_var_requests(), 2);
}

#[tokio::test]
async fn refreshing_another_object_keeps_the_members_scope() {
    let (session, engine, _events) = paused_session(false).await;
    engine.set_object(7, "Timer", Vec::new()).await;
    session.get_scope(0).await.unwrap();

    session.force_refresh(RootId::Object(7)).await.unwrap();
    session
        .object(RootId::scope(0, ScopeKind::Members), false)
        .await
        .unwrap();
    assert_eq!(engine.frame_var_requests(), 1);
}

#[tokio::test]
async fn unknown_handles_are_rejected() {
    let (session, _engine, _events) = paused_session(false).await;
    assert!(matches!(
        session.variables(12345).await,
        Err(DebugError::UnknownHandle(12345))
    ));
}
