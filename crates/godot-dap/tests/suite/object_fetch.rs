use std::{collections::HashMap, sync::Arc, time::Duration};

use godot_dap::{
    error::DebugError,
    handles::RootId,
    resolve::ObjectSource,
    session::{DebugSessionConfig, SessionEvent},
};
use godot_wire::{mock::MockEngineConfig, Command, Variant};

use crate::harness::{connect_engine, listening_session, WAIT};

fn player_engine() -> MockEngineConfig {
    let mut objects = HashMap::new();
    objects.insert(
        42,
        (
            "CharacterBody2D".to_string(),
            vec![("name".to_string(), Variant::from("Player"))],
        ),
    );
    MockEngineConfig {
        objects,
        inspect_delay: Duration::from_millis(50),
        ..MockEngineConfig::default()
    }
}

#[tokio::test]
async fn concurrent_fetches_share_one_request() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, player_engine()).await;

    let player = RootId::Object(42);
    let (a, b) = tokio::join!(session.object(player, false), session.object(player, false));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.class_name, "CharacterBody2D");
    assert_eq!(engine.inspect_requests(), 1);

    // Cached until refreshed.
    session.object(RootId::Object(42), false).await.unwrap();
    assert_eq!(engine.inspect_requests(), 1);
    session.force_refresh(RootId::Object(42)).await.unwrap();
    assert_eq!(engine.inspect_requests(), 2);
}

#[tokio::test]
async fn refcounted_objects_keep_their_full_id() {
    // RefCounted instances carry the top bit of their id.
    let texture_id = (1u64 << 63) | 42;
    let mut config = player_engine();
    config.objects.insert(
        texture_id,
        (
            "ImageTexture".to_string(),
            vec![("resource_name".to_string(), Variant::from("icon"))],
        ),
    );
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, config).await;

    let texture = session.object(RootId::Object(texture_id), false).await.unwrap();
    assert_eq!(texture.id, RootId::Object(texture_id));
    assert_eq!(texture.class_name, "ImageTexture");
    let sent = engine.wait_for("scene:inspect_object", 1).await;
    assert_eq!(sent[0].parameters[0], Variant::Int(texture_id as i64));

    // The low bits alone name a different instance.
    let player = session.object(RootId::Object(42), false).await.unwrap();
    assert_eq!(player.class_name, "CharacterBody2D");
    assert_eq!(engine.inspect_requests(), 2);

    session
        .set_object_property(texture_id, "resource_name", Variant::from("logo"))
        .await
        .unwrap();
    let sent = engine.wait_for("scene:set_object_property", 1).await;
    assert_eq!(sent[0].parameters[0], Variant::Int(texture_id as i64));
}

#[tokio::test]
async fn setting_a_property_refetches_the_object() {
    let (session, addr) = listening_session(DebugSessionConfig::default()).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, player_engine()).await;
    session.object(RootId::Object(42), false).await.unwrap();

    session
        .set_object_property(42, "name", Variant::from("Enemy"))
        .await
        .unwrap();
    let sent = engine.wait_for("scene:set_object_property", 1).await;
    assert_eq!(sent[0].parameters[1], Variant::from("name"));
    assert_eq!(sent[0].parameters[2], Variant::from("Enemy"));

    engine
        .set_object(42, "CharacterBody2D", vec![("name".into(), Variant::from("Enemy"))])
        .await;
    let object = session.object(RootId::Object(42), false).await.unwrap();
    assert_eq!(object.get("name"), Some(&Variant::from("Enemy")));
    assert_eq!(engine.inspect_requests(), 2);
}

#[tokio::test(start_paused = true)]
async fn unanswered_fetch_times_out() {
    let config = DebugSessionConfig {
        object_fetch_timeout: Some(Duration::from_millis(500)),
        ..DebugSessionConfig::default()
    };
    let session = godot_dap::DebugSession::new(config);
    let addr = session
        .listen("127.0.0.1:0".parse().unwrap(), None)
        .await
        .unwrap();
    let mut events = session.subscribe_events();
    let engine = godot_wire::mock::MockEngine::connect(addr).await.unwrap();
    // No timeouts while connecting: the paused clock would jump ahead.
    loop {
        if let Ok(SessionEvent::Connected { .. }) = events.recv().await {
            break;
        }
    }

    let result = session.object(RootId::Object(77), false).await;
    assert!(matches!(result, Err(DebugError::ResolutionTimeout(RootId::Object(77)))));
    assert_eq!(engine.inspect_requests(), 1);
}

#[tokio::test]
async fn late_replies_are_not_cached() {
    let config = DebugSessionConfig {
        object_fetch_timeout: Some(Duration::from_millis(100)),
        ..DebugSessionConfig::default()
    };
    let (session, addr) = listening_session(config).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;

    let result = session.object(RootId::Object(77), false).await;
    assert!(matches!(result, Err(DebugError::ResolutionTimeout(RootId::Object(77)))));

    let late = Command::with_params(
        "scene:inspect_object",
        vec![Variant::Int(77), Variant::from("Node"), Variant::Array(Vec::new())],
    );
    engine.send(late).await.unwrap();
    engine.set_object(77, "Node", Vec::new()).await;

    let object = session.object(RootId::Object(77), false).await.unwrap();
    assert_eq!(object.class_name, "Node");
    // A cached late reply would have answered without a second request.
    tokio::time::timeout(WAIT, engine.wait_for("scene:inspect_object", 2))
        .await
        .expect("the object was fetched again");
}

#[tokio::test]
async fn pending_fetches_fail_when_the_engine_goes_away() {
    let config = DebugSessionConfig {
        object_fetch_timeout: None,
        ..DebugSessionConfig::default()
    };
    let (session, addr) = listening_session(config).await;
    let mut events = session.subscribe_events();
    let engine = connect_engine(&mut events, addr, MockEngineConfig::default()).await;

    let fetch = tokio::spawn({
        let session = session.clone();
        async move { session.object(RootId::Object(77), false).await }
    });
    engine.wait_for("scene:inspect_object", 1).await;
    engine.close().await;

    let result = fetch.await.unwrap();
    assert!(matches!(result, Err(DebugError::SessionClosed)));
}

#[tokio::test]
async fn fetches_without_an_engine_fail_fast() {
    let session = godot_dap::DebugSession::new(DebugSessionConfig::default());
    assert!(matches!(
        session.object(RootId::Object(42), false).await,
        Err(DebugError::NotConnected)
    ));
}
