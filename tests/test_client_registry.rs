//! Client lifecycle through the bridge facade

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tdbridge::engine::Engine;
use tdbridge::{ClientId, Loopback, TdBridge};

const VERSION_REQUEST: &str = r#"{"@type":"getOption","name":"version"}"#;

fn parse(text: &str) -> Value {
    serde_json::from_str(text).expect("engine produced invalid JSON")
}

#[test]
fn test_created_ids_are_distinct_and_never_reused() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();

    let first = bridge.create().unwrap();
    let second = bridge.create().unwrap();
    assert_ne!(first, second);

    bridge.destroy(first).unwrap();
    let third = bridge.create().unwrap();
    assert_ne!(third, first, "Destroyed id must not be handed out again");
    assert_ne!(third, second);
}

#[test]
fn test_unknown_id_fails_every_operation() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let unknown = ClientId::new(42);

    assert!(bridge.send(unknown, VERSION_REQUEST).unwrap_err().is_unknown_client());
    assert!(bridge.execute(unknown, VERSION_REQUEST).unwrap_err().is_unknown_client());
    assert!(
        bridge
            .receive_all(unknown, Duration::ZERO)
            .unwrap_err()
            .is_unknown_client()
    );
    assert!(bridge.destroy(unknown).unwrap_err().is_unknown_client());
    assert!(
        bridge
            .receive_async(unknown, Duration::ZERO, |_| {})
            .unwrap_err()
            .is_unknown_client()
    );
}

#[test]
fn test_destroyed_client_is_unknown_and_engine_handle_released() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();

    bridge.destroy(id).unwrap();

    assert!(bridge.send(id, VERSION_REQUEST).unwrap_err().is_unknown_client());
    assert!(bridge.destroy(id).unwrap_err().is_unknown_client());
    assert_eq!(bridge.engine().destroyed_count(), 1);
    assert_eq!(bridge.engine().live_count(), 0);
}

#[test]
fn test_get_option_version_roundtrip() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();

    bridge.send(id, VERSION_REQUEST).unwrap();
    let messages = bridge.receive_all(id, Duration::from_secs(2)).unwrap();

    assert_eq!(messages.len(), 1, "Expected one response, got {messages:?}");
    let response = parse(&messages[0]);
    assert_eq!(response["@type"], "option");
    assert_eq!(response["name"], "version");
    assert!(
        response["value"]["value"]
            .as_str()
            .is_some_and(|version| !version.is_empty()),
        "Version should be a non-empty string. Got: {}",
        response
    );
}

#[test]
fn test_execute_static_needs_no_client() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();

    let response = parse(&bridge.execute_static(VERSION_REQUEST));
    assert_eq!(response["@type"], "option");
    assert!(bridge.registry().is_empty());
}

#[test]
fn test_execute_on_client_is_synchronous() {
    let bridge = TdBridge::new(Loopback::new()).unwrap();
    let id = bridge.create().unwrap();

    let response = parse(&bridge.execute(id, VERSION_REQUEST).unwrap());
    assert_eq!(response["@type"], "option");

    // Nothing is queued by a synchronous call
    assert!(bridge.receive_all(id, Duration::ZERO).unwrap().is_empty());
}

#[test]
fn test_engine_refusing_a_client_is_a_resource_error() {
    let bridge = TdBridge::new(Loopback::new().with_capacity(1)).unwrap();
    bridge.create().unwrap();

    let err = bridge.create().unwrap_err();
    assert!(
        matches!(err, tdbridge::BridgeError::EngineResource { .. }),
        "got {err:?}"
    );
    assert_eq!(bridge.registry().len(), 1);
}

#[test]
fn test_concurrent_create_and_destroy() {
    let bridge = Arc::new(TdBridge::new(Loopback::new()).unwrap());

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let bridge = bridge.clone();
            thread::spawn(move || {
                let mut kept = Vec::new();
                for round in 0..50 {
                    let id = bridge.create().unwrap();
                    if round % 2 == 0 {
                        bridge.destroy(id).unwrap();
                    } else {
                        kept.push(id);
                    }
                }
                kept
            })
        })
        .collect();

    let kept: Vec<ClientId> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();

    let unique: HashSet<_> = kept.iter().copied().collect();
    assert_eq!(unique.len(), kept.len(), "Ids must be unique across threads");
    assert_eq!(bridge.registry().len(), kept.len());
    assert_eq!(bridge.engine().live_count(), kept.len());
    assert_eq!(bridge.engine().destroyed_count(), 8 * 25);
}

#[test]
fn test_dropping_bridge_destroys_remaining_clients() {
    let engine_probe = {
        let bridge = TdBridge::new(Loopback::new()).unwrap();
        bridge.create().unwrap();
        bridge.create().unwrap();
        bridge.engine().clone()
    };

    assert_eq!(engine_probe.live_count(), 0);
    assert_eq!(engine_probe.destroyed_count(), 2);
    // The engine outlives the bridge and still answers handle-less requests
    assert!(engine_probe.execute(None, VERSION_REQUEST).is_some());
}
