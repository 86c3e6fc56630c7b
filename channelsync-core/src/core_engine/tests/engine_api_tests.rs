/*
    engine_api_tests.rs - Public API guards, create flows, and GC
*/

use crate::config::EngineConfig;
use crate::core_engine::channel::{ChannelMode, ChannelState};
use crate::core_engine::errors::ObjectsError;
use crate::core_engine::tests::harness::{broadcast, primitive, synced_replica};
use crate::core_object::value::ObjectValue;
use crate::core_protocol::message::{MapOp, ObjectMessage, ObjectOperation, OperationAction};
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test]
async fn test_created_map_is_readable_before_echo() {
    let r = synced_replica("alice");

    let mut entries = HashMap::new();
    entries.insert("name".to_string(), ObjectValue::from("thing"));
    let map = r.engine.create_map(entries).await.unwrap();

    // no echo has been delivered, yet the local object already exists
    assert_eq!(
        primitive(map.get("name").unwrap()),
        Some(ObjectValue::from("thing"))
    );

    // the echo is a no-op
    broadcast(&r, &[&r]);
    assert_eq!(
        primitive(map.get("name").unwrap()),
        Some(ObjectValue::from("thing"))
    );
    assert_eq!(map.size().unwrap(), 1);
}

#[tokio::test]
async fn test_create_messages_carry_nonce_and_initial_value() {
    let r = synced_replica("alice");
    r.engine.create_counter(5.0).await.unwrap();

    let published = r.channel.published();
    let op = published[0][0].operation.as_ref().unwrap();
    assert_eq!(op.action, OperationAction::CounterCreate);
    assert!(op.nonce.is_some());
    assert!(op.initial_value.is_some());
    assert!(op.object_id.starts_with("counter:"));
    assert_eq!(published[0][0].client_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_write_requires_publish_mode() {
    let r = synced_replica("alice");
    r.channel.set_modes(vec![ChannelMode::ObjectSubscribe]);

    let root = r.engine.get_root().await.unwrap();
    let err = root.set("k", ObjectValue::Number(1.0)).await.unwrap_err();
    assert_eq!(err.code(), 40024);
}

#[tokio::test]
async fn test_read_requires_subscribe_mode() {
    let r = synced_replica("alice");
    r.channel.set_modes(vec![ChannelMode::ObjectPublish]);

    let root_err = r.engine.get_root().await.unwrap_err();
    assert_eq!(root_err.code(), 40024);
}

#[tokio::test]
async fn test_write_rejected_when_echo_disabled() {
    let r = synced_replica("alice");
    r.channel.set_echo_enabled(false);

    let err = r.engine.create_counter(1.0).await.unwrap_err();
    assert!(matches!(err, ObjectsError::EchoDisabled));
    assert_eq!(err.code(), 40000);
}

#[tokio::test]
async fn test_channel_state_guards() {
    let r = synced_replica("alice");
    let root = r.engine.get_root().await.unwrap();

    // suspended: reads fine, writes rejected
    r.channel.set_state(ChannelState::Suspended);
    assert!(root.get("k").is_ok());
    let err = root.set("k", ObjectValue::Number(1.0)).await.unwrap_err();
    assert_eq!(err.code(), 90001);

    // failed: both rejected
    r.channel.set_state(ChannelState::Failed);
    let err = root.get("k").unwrap_err();
    assert_eq!(err.code(), 90001);
}

#[tokio::test]
async fn test_publish_size_limit_enforced() {
    let r = synced_replica("alice");
    r.channel.set_max_message_size(Some(16));

    let root = r.engine.get_root().await.unwrap();
    let err = root
        .set("k", ObjectValue::from("a value much longer than the limit"))
        .await
        .unwrap_err();
    assert!(matches!(err, ObjectsError::MaxMessageSizeExceeded { .. }));
    assert_eq!(err.code(), 40009);
    assert!(r.channel.published().is_empty());

    // a small write still goes through
    root.set("k", ObjectValue::Boolean(true)).await.unwrap();
    assert_eq!(r.channel.published().len(), 1);
}

#[tokio::test]
async fn test_non_finite_increment_rejected() {
    let r = synced_replica("alice");
    let counter = r.engine.create_counter(0.0).await.unwrap();

    let err = counter.increment(f64::NAN).await.unwrap_err();
    assert_eq!(err.code(), 40003);
    let err = r.engine.create_counter(f64::INFINITY).await.unwrap_err();
    assert_eq!(err.code(), 40003);
}

#[tokio::test]
async fn test_subscription_fires_on_applied_update() {
    let r = synced_replica("alice");
    let root = r.engine.get_root().await.unwrap();

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_l = seen.clone();
    let token = root.subscribe(Box::new(move |event| {
        seen_l.lock().unwrap().push(event.update.clone());
    }));

    root.set("k", ObjectValue::Number(1.0)).await.unwrap();
    assert!(seen.lock().unwrap().is_empty(), "no event before echo");

    broadcast(&r, &[&r]);
    assert_eq!(seen.lock().unwrap().len(), 1);

    root.unsubscribe(&token);
    root.set("k", ObjectValue::Number(2.0)).await.unwrap();
    broadcast(&r, &[&r]);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_listener_reads_back_through_handle() {
    let r = synced_replica("alice");
    let root = r.engine.get_root().await.unwrap();

    // reading through a handle inside the listener must observe the state
    // the event describes, not block on the engine lock
    let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
    let seen_l = seen.clone();
    let reader = root.clone();
    root.subscribe(Box::new(move |_| {
        *seen_l.lock().unwrap() = primitive(reader.get("color").unwrap());
    }));

    root.set("color", ObjectValue::from("blue")).await.unwrap();
    broadcast(&r, &[&r]);

    assert_eq!(*seen.lock().unwrap(), Some(ObjectValue::from("blue")));
}

#[tokio::test]
async fn test_on_deleted_hook_fires_once_on_tombstone() {
    let r = synced_replica("alice");
    let counter = r.engine.create_counter(1.0).await.unwrap();
    broadcast(&r, &[&r]);

    let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let hits_l = hits.clone();
    counter.on_deleted(Box::new(move |_| {
        hits_l.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    let delete = r.stamper.stamp(r.engine.outbound_message(ObjectOperation::new(
        OperationAction::ObjectDelete,
        counter.object_id(),
    )));
    r.engine.handle_object_messages(vec![delete]);
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

    // a later delete lands on an already tombstoned object and must not
    // re-fire the hook
    let again = r.stamper.stamp(r.engine.outbound_message(ObjectOperation::new(
        OperationAction::ObjectDelete,
        counter.object_id(),
    )));
    r.engine.handle_object_messages(vec![again]);
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gc_evicts_expired_tombstones() {
    let config = EngineConfig {
        gc_interval: Duration::from_millis(100),
        gc_grace_period: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let channel = std::sync::Arc::new(crate::test_utils::MockChannel::attached("alice"));
    let engine = crate::core_engine::engine::Objects::new(channel, config);
    engine.on_attached(false);

    let stamper = crate::test_utils::SerialStamper::new("alice-series");

    // a deleted counter and a removed root entry, both with long-expired
    // wall-clock timestamps
    let mut inc = ObjectOperation::new(OperationAction::CounterInc, "counter:a@1");
    inc.counter_op = Some(crate::core_protocol::message::CounterOp { amount: 1.0 });
    engine.handle_object_messages(vec![stamper.stamp_at(ObjectMessage::from_operation(inc), 100)]);
    engine.handle_object_messages(vec![stamper.stamp_at(
        ObjectMessage::from_operation(ObjectOperation::new(
            OperationAction::ObjectDelete,
            "counter:a@1",
        )),
        200,
    )]);

    let mut remove = ObjectOperation::new(OperationAction::MapRemove, "root");
    remove.map_op = Some(MapOp {
        key: "gone".to_string(),
        value: None,
    });
    engine.handle_object_messages(vec![stamper.stamp_at(ObjectMessage::from_operation(remove), 300)]);

    engine.with_pool(|pool| {
        assert!(pool.get("counter:a@1").is_some());
        assert!(pool.get("root").unwrap().as_map().unwrap().entry("gone").is_some());
    });

    // let the GC interval elapse (paused clock auto-advances)
    tokio::time::sleep(Duration::from_millis(250)).await;

    engine.with_pool(|pool| {
        assert!(pool.get("counter:a@1").is_none());
        assert!(pool.get("root").unwrap().as_map().unwrap().entry("gone").is_none());
    });
}
