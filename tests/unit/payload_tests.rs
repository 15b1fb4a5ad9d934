//! Schema-tagged and reaction payloads carried through the log.

use crate::common::{open, temp_dir};
use bytes::{Bytes, BytesMut};
use eventlog_rs::{
    Compatibility, FieldType, InlineSchemaCodec, LogConfig, MemorySchemaRegistry, Reaction,
    RecordSchema, RegistrySchemaCodec, Revision, Schema, SchemaCodec, SchemaError, SchemaRegistry,
    Sink, Uncommitted, check_evolution,
};
use serde_json::json;
use std::sync::Arc;

fn order_v1() -> RecordSchema {
    RecordSchema::new("order")
        .with_field("id", FieldType::String)
        .with_field("qty", FieldType::Int)
}

fn order_v2() -> RecordSchema {
    RecordSchema::new("order")
        .with_field("id", FieldType::String)
        .with_field("qty", FieldType::Long)
        .with_default_field("note", FieldType::String, json!(""))
}

fn tagged<C: SchemaCodec>(codec: &C, schema: &Arc<C::Schema>, body: &serde_json::Value) -> Bytes {
    let mut buf = BytesMut::new();
    codec
        .encode(&mut buf, Revision::origin(0), "order", schema)
        .unwrap_or_else(|e| panic!("{e}"));
    buf.extend_from_slice(&serde_json::to_vec(body).unwrap_or_default());
    buf.freeze()
}

#[tokio::test]
async fn inline_schema_survives_the_log() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());
    let codec = InlineSchemaCodec::<RecordSchema>::new();
    let schema = Arc::new(order_v1());

    let payload = tagged(&codec, &schema, &json!({"id": "o-1", "qty": 3}));
    let key = Bytes::from_static(b"o-1");
    let attempt = Uncommitted::new(key, vec![payload], Revision::origin(0));
    let result = log.try_send("orders", attempt).await;
    assert!(matches!(result, Ok(ref r) if r.is_committed()));

    let history = log
        .request("orders", Revision::origin(0), 1)
        .unwrap_or_else(|e| panic!("{e}"));
    let mut entry = history[0].entries[0].clone();
    let decoded = codec
        .decode(&mut entry, history[0].expected, "order")
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(decoded.fingerprint(), schema.fingerprint());
    let body: serde_json::Value = serde_json::from_slice(&entry).unwrap_or_default();
    assert_eq!(body["qty"], 3);
    assert!(log.close().await.is_ok());
}

#[tokio::test]
async fn registry_codec_resolves_evolved_schemas() {
    let registry = Arc::new(MemorySchemaRegistry::<RecordSchema>::new());
    let codec = RegistrySchemaCodec::new(Arc::clone(&registry));
    let v1 = Arc::new(order_v1());
    let v2 = Arc::new(order_v2());

    let old = tagged(&codec, &v1, &json!({"id": "o-1", "qty": 1}));
    let new = tagged(&codec, &v2, &json!({"id": "o-2", "qty": 2, "note": "gift"}));
    assert_eq!(registry.len(), 2);
    let latest = registry.latest("order").map(|s| s.fingerprint());
    assert_eq!(latest, Some(v2.fingerprint()));

    let mut old = old;
    let writer = codec
        .decode(&mut old, Revision::new(0, 0), "order")
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        check_evolution(v2.as_ref(), writer.as_ref()),
        Compatibility::Compatible
    );

    let mut new = new;
    let current = codec
        .decode(&mut new, Revision::new(0, 1), "order")
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        check_evolution(v2.as_ref(), current.as_ref()),
        Compatibility::Identical
    );
}

#[test]
fn registry_refuses_incompatible_versions() {
    let registry = MemorySchemaRegistry::<RecordSchema>::new();
    assert!(registry.register(Arc::new(order_v2())).is_ok());

    // Narrowing qty and dropping the default cannot read v2 data.
    let narrowed = RecordSchema::new("order")
        .with_field("id", FieldType::String)
        .with_field("qty", FieldType::Int)
        .with_field("region", FieldType::String);
    let result = registry.register(Arc::new(narrowed));
    match result {
        Err(SchemaError::Incompatible { reasons, .. }) => assert_eq!(reasons.len(), 2),
        other => panic!("expected an incompatible version, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_schema_name_is_rejected() {
    let codec = InlineSchemaCodec::<RecordSchema>::new();
    let mut payload = tagged(&codec, &Arc::new(order_v1()), &json!({}));
    let result = codec.decode(&mut payload, Revision::new(0, 4), "invoice");
    assert!(matches!(result, Err(SchemaError::NameMismatch { .. })));
}

#[tokio::test]
async fn reactions_travel_as_entries() {
    let dir = temp_dir();
    let log = open(dir.path(), LogConfig::default());

    let accepted = Reaction::Accepted(vec![
        Bytes::from_static(b"reserved"),
        Bytes::from_static(b"charged"),
    ]);
    let rejected: Reaction<Bytes> = Reaction::rejected("out of stock");
    let mut entries = Vec::new();
    for reaction in [&accepted, &rejected] {
        let mut buf = BytesMut::new();
        assert!(reaction.encode_bytes(&mut buf).is_ok());
        entries.push(buf.freeze());
    }

    let attempt = Uncommitted::new(Bytes::from_static(b"cmd-9"), entries, Revision::origin(0));
    let result = log.try_send("reactions", attempt).await;
    assert!(matches!(result, Ok(ref r) if r.actual() == Revision::new(0, 2)));

    let history = log
        .request("reactions", Revision::origin(0), 1)
        .unwrap_or_else(|e| panic!("{e}"));
    let decoded: Vec<Reaction<Bytes>> = history[0]
        .entries
        .iter()
        .map(|e| Reaction::decode_bytes(&mut e.clone()).unwrap_or_else(|e| panic!("{e}")))
        .collect();
    assert_eq!(decoded, vec![accepted, rejected]);
    assert!(log.close().await.is_ok());
}
