use taskii_core::{
    ChangeEvent, ChangeKind, ChangeOrigin, Mutation, MutationOp, Record, RemoteChange, RemoteOp,
    StoreConfig, SyncConfig,
};
use uuid::Uuid;

#[test]
fn record_serializes_with_uuid_string_and_millis() {
    let id = Uuid::new_v4();
    let record = Record::with_id(id, 1_700_000_000_000).unwrap();

    let json = serde_json::to_value(record).unwrap();
    assert_eq!(json["id"], id.to_string());
    assert_eq!(json["timestamp"], 1_700_000_000_000_i64);

    let decoded: Record = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn remote_change_uses_snake_case_ops() {
    let id = Uuid::new_v4();
    let change: RemoteChange = serde_json::from_value(serde_json::json!({
        "record_id": id.to_string(),
        "op": "delete",
        "timestamp": 42
    }))
    .unwrap();

    assert_eq!(change.record_id, id);
    assert_eq!(change.op, RemoteOp::Delete);
    assert_eq!(change.timestamp, 42);
}

#[test]
fn mutation_and_change_event_expose_stable_labels() {
    let id = Uuid::new_v4();
    let mutation = Mutation {
        record_id: id,
        op: MutationOp::Create,
        timestamp: 5,
    };
    assert_eq!(serde_json::to_value(mutation).unwrap()["op"], "create");

    let event = ChangeEvent {
        seq: 3,
        record_id: id,
        kind: ChangeKind::Update,
        timestamp: 5,
        origin: ChangeOrigin::Remote,
    };
    let json = serde_json::to_value(event).unwrap();
    assert_eq!(json["kind"], "update");
    assert_eq!(json["origin"], "remote");
}

#[test]
fn partial_sync_config_falls_back_to_defaults() {
    let config: SyncConfig = serde_json::from_value(serde_json::json!({ "max_attempts": 3 })).unwrap();
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.base_backoff_ms, SyncConfig::default().base_backoff_ms);

    let store: StoreConfig =
        serde_json::from_value(serde_json::json!({ "location": "in_memory" })).unwrap();
    assert_eq!(store, StoreConfig::in_memory());
}
