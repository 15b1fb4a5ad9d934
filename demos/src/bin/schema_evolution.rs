//! Schema-tagged payloads and reader/writer compatibility.
//!
//! This example shows how to:
//! 1. Register record schemas in a registry
//! 2. Tag entries with a schema reference before committing them
//! 3. Decide whether the current reader can read old entries

use bytes::{Bytes, BytesMut};
use demos::setup_logger;
use eventlog_rs::{
    FieldType, FileChannel, LogConfig, LogError, MemorySchemaRegistry, RecordSchema,
    RegistrySchemaCodec, Revision, Schema, SchemaCodec, Sink, Uncommitted, check_evolution,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

fn tagged(
    codec: &RegistrySchemaCodec<RecordSchema, MemorySchemaRegistry<RecordSchema>>,
    schema: &Arc<RecordSchema>,
    body: serde_json::Value,
) -> Result<Bytes, LogError> {
    let mut buf = BytesMut::new();
    codec.encode(&mut buf, Revision::origin(0), "order", schema)?;
    let json = serde_json::to_vec(&body).map_err(|e| LogError::InvalidOperation {
        message: e.to_string(),
    })?;
    buf.extend_from_slice(&json);
    Ok(buf.freeze())
}

#[tokio::main]
async fn main() -> Result<(), LogError> {
    setup_logger();
    info!("=== Schema Evolution Demo ===");

    let registry = Arc::new(MemorySchemaRegistry::new());
    let codec = RegistrySchemaCodec::new(Arc::clone(&registry));

    let v1 = Arc::new(
        RecordSchema::new("order")
            .with_field("id", FieldType::String)
            .with_field("qty", FieldType::Int),
    );
    let v2 = Arc::new(
        RecordSchema::new("order")
            .with_field("id", FieldType::String)
            .with_field("qty", FieldType::Long)
            .with_default_field("channel", FieldType::String, json!("web")),
    );

    let dir = tempfile::TempDir::new()?;
    let log = FileChannel::open(dir.path(), LogConfig::default())?;
    let old = json!({"id": "o-1", "qty": 2});
    let new = json!({"id": "o-2", "qty": 7, "channel": "app"});
    let entries = vec![tagged(&codec, &v1, old)?, tagged(&codec, &v2, new)?];
    let key = Bytes::from_static(b"orders");
    let attempt = Uncommitted::new(key, entries, Revision::origin(0));
    log.try_send("orders", attempt).await?;

    for commit in log.request("orders", Revision::origin(0), 10)? {
        for (i, entry) in commit.entries.iter().enumerate() {
            let mut payload = entry.clone();
            let at = commit.expected.advanced_by(i as u64);
            let writer = codec.decode(&mut payload, at, "order")?;
            match check_evolution(v2.as_ref(), writer.as_ref()) {
                outcome if outcome.is_compatible() => {
                    info!(
                        revision = %at,
                        writer = %writer.fingerprint(),
                        ?outcome,
                        body = %String::from_utf8_lossy(&payload),
                        "readable"
                    );
                }
                outcome => warn!(revision = %at, ?outcome, "cannot read entry"),
            }
        }
    }

    let narrowed = Arc::new(RecordSchema::new("order").with_field("qty", FieldType::Int));
    let mut buf = BytesMut::new();
    match codec.encode(&mut buf, Revision::origin(0), "order", &narrowed) {
        Ok(()) => info!("narrowed schema accepted"),
        Err(err) => warn!(error = %err, "narrowed schema refused"),
    }

    log.close().await
}
