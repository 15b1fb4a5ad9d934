//! Schema codecs: how payload bytes are described and checked for
//! evolution.
//!
//! A [`Schema`] is a named, fingerprinted payload shape that can judge
//! whether data written under another version of itself is still readable.
//! A [`SchemaCodec`] writes the schema reference in front of a payload and
//! recovers it again when the payload is read back.
//!
//! Two codecs are provided:
//!
//! - [`InlineSchemaCodec`]: the full schema definition travels with every
//!   payload; no lookup is needed to read it back
//! - [`RegistrySchemaCodec`]: only name and fingerprint travel; the
//!   definition is resolved through a [`SchemaRegistry`]
//!
//! # Wire Format (little-endian)
//!
//! ```text
//! inline:   [4 bytes: name_len][name][8 bytes: fingerprint][4 bytes: def_len][JSON definition]
//! registry: [4 bytes: name_len][name][8 bytes: fingerprint]
//! ```
//!
//! [`RecordSchema`] is the built-in schema type: a named record of typed
//! fields with optional defaults, evolved under the usual record rules.

use super::revision::Revision;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Compact identity of a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Fingerprint of arbitrary canonical bytes: the first eight bytes of
    /// their SHA-256 digest.
    #[must_use]
    pub fn of(canonical: &[u8]) -> Self {
        let digest = Sha256::digest(canonical);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Fingerprint(u64::from_le_bytes(head))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Errors raised by schema codecs and registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The payload names a different schema than the one requested.
    #[error("expected schema {expected} at {revision}, found {found}")]
    NameMismatch {
        /// Name requested by the reader.
        expected: String,
        /// Name stored with the payload.
        found: String,
        /// Position of the payload.
        revision: Revision,
    },

    /// The stored definition does not hash to the stored fingerprint.
    #[error(
        "schema {name} at {revision}: fingerprint {stored} does not match definition ({computed})"
    )]
    FingerprintMismatch {
        /// Schema name.
        name: String,
        /// Fingerprint stored with the payload.
        stored: Fingerprint,
        /// Fingerprint of the stored definition.
        computed: Fingerprint,
        /// Position of the payload.
        revision: Revision,
    },

    /// The registry has no schema with this name and fingerprint.
    #[error("unknown schema {name} ({fingerprint}) at {revision}")]
    Unknown {
        /// Schema name.
        name: String,
        /// Fingerprint looked up.
        fingerprint: Fingerprint,
        /// Position of the payload.
        revision: Revision,
    },

    /// A new schema version cannot read data written under the current one.
    #[error("schema {name} is incompatible with its previous version: {}", .reasons.join("; "))]
    Incompatible {
        /// Schema name.
        name: String,
        /// Every rule the new version breaks.
        reasons: Vec<String>,
    },

    /// The schema header could not be parsed.
    #[error("malformed schema header at {revision}: {message}")]
    Malformed {
        /// Position of the payload.
        revision: Revision,
        /// Description of the problem.
        message: String,
    },

    /// The schema definition itself is invalid.
    #[error("invalid schema {name}: {message}")]
    Invalid {
        /// Schema name.
        name: String,
        /// Description of the problem.
        message: String,
    },
}

/// Result of comparing a reader schema with a writer schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    /// Same fingerprint.
    Identical,
    /// Different versions, but the reader can read the writer's data.
    Compatible,
    /// The reader cannot read the writer's data.
    Incompatible {
        /// Every rule that is broken.
        reasons: Vec<String>,
    },
}

impl Compatibility {
    /// Returns `true` unless the result is [`Compatibility::Incompatible`].
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        !matches!(self, Compatibility::Incompatible { .. })
    }
}

/// A versioned payload shape.
pub trait Schema: Send + Sync + fmt::Debug {
    /// Name under which versions of this schema are grouped.
    fn name(&self) -> &str;

    /// Identity of this exact version.
    fn fingerprint(&self) -> Fingerprint;

    /// Compare this schema, as the reader, against `writer`. Only called
    /// when the fingerprints differ.
    fn check(&self, writer: &Self) -> Compatibility;

    /// Returns `true` iff values written under `writer` can be read with
    /// this schema. Always `true` for identical fingerprints.
    fn compatible_with(&self, writer: &Self) -> bool
    where
        Self: Sized,
    {
        check_evolution(self, writer).is_compatible()
    }
}

/// Decide whether `reader` can read data written under `writer`.
pub fn check_evolution<S: Schema>(reader: &S, writer: &S) -> Compatibility {
    if reader.fingerprint() == writer.fingerprint() {
        return Compatibility::Identical;
    }
    reader.check(writer)
}

/// Writes and reads schema references in front of payloads.
pub trait SchemaCodec: Send + Sync + fmt::Debug {
    /// Schema type handled by this codec.
    type Schema: Schema;

    /// Read the schema reference at the front of `buf`, consuming it.
    ///
    /// `revision` is the position of the payload and `name` the schema
    /// the caller expects.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the header is malformed, names another
    /// schema, or cannot be resolved.
    fn decode(
        &self,
        buf: &mut Bytes,
        revision: Revision,
        name: &str,
    ) -> Result<Arc<Self::Schema>, SchemaError>;

    /// Write a reference to `schema` under `name` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the schema cannot be written or
    /// registered.
    fn encode(
        &self,
        buf: &mut BytesMut,
        revision: Revision,
        name: &str,
        schema: &Arc<Self::Schema>,
    ) -> Result<(), SchemaError>;

    /// MIME-like identifier of the header format.
    #[must_use]
    fn content_type(&self) -> &'static str;
}

fn put_str(buf: &mut BytesMut, value: &str, revision: Revision) -> Result<(), SchemaError> {
    let len = u32::try_from(value.len()).map_err(|_| SchemaError::Malformed {
        revision,
        message: format!("string of {} bytes is too long", value.len()),
    })?;
    buf.put_u32_le(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_chunk(buf: &mut Bytes, revision: Revision, what: &str) -> Result<Bytes, SchemaError> {
    if buf.remaining() < 4 {
        return Err(SchemaError::Malformed {
            revision,
            message: format!("missing {what} length"),
        });
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(SchemaError::Malformed {
            revision,
            message: format!("{what} needs {len} bytes, {} remaining", buf.remaining()),
        });
    }
    Ok(buf.split_to(len))
}

fn get_name(buf: &mut Bytes, revision: Revision, expected: &str) -> Result<String, SchemaError> {
    let raw = get_chunk(buf, revision, "schema name")?;
    let found = String::from_utf8(raw.to_vec()).map_err(|_| SchemaError::Malformed {
        revision,
        message: "schema name is not UTF-8".to_string(),
    })?;
    if found != expected {
        return Err(SchemaError::NameMismatch {
            expected: expected.to_string(),
            found,
            revision,
        });
    }
    Ok(found)
}

fn get_fingerprint(buf: &mut Bytes, revision: Revision) -> Result<Fingerprint, SchemaError> {
    if buf.remaining() < 8 {
        return Err(SchemaError::Malformed {
            revision,
            message: "missing fingerprint".to_string(),
        });
    }
    Ok(Fingerprint(buf.get_u64_le()))
}

// ─── Inline ─────────────────────────────────────────────────────────────────

/// Self-describing codec: stores the full JSON definition with every
/// payload.
///
/// # Content Type
///
/// `"application/x-eventlog-schema+json"`
pub struct InlineSchemaCodec<S> {
    _schema: PhantomData<fn() -> S>,
}

impl<S> InlineSchemaCodec<S> {
    /// Create a new inline codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _schema: PhantomData,
        }
    }
}

impl<S> Default for InlineSchemaCodec<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for InlineSchemaCodec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InlineSchemaCodec")
    }
}

impl<S> SchemaCodec for InlineSchemaCodec<S>
where
    S: Schema + Serialize + DeserializeOwned + 'static,
{
    type Schema = S;

    fn decode(
        &self,
        buf: &mut Bytes,
        revision: Revision,
        name: &str,
    ) -> Result<Arc<S>, SchemaError> {
        let name = get_name(buf, revision, name)?;
        let stored = get_fingerprint(buf, revision)?;
        let definition = get_chunk(buf, revision, "schema definition")?;
        let schema: S = serde_json::from_slice(&definition).map_err(|e| SchemaError::Malformed {
            revision,
            message: e.to_string(),
        })?;
        let computed = schema.fingerprint();
        if computed != stored {
            return Err(SchemaError::FingerprintMismatch {
                name,
                stored,
                computed,
                revision,
            });
        }
        Ok(Arc::new(schema))
    }

    fn encode(
        &self,
        buf: &mut BytesMut,
        revision: Revision,
        name: &str,
        schema: &Arc<S>,
    ) -> Result<(), SchemaError> {
        let definition = serde_json::to_vec(schema.as_ref()).map_err(|e| SchemaError::Invalid {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        let len = u32::try_from(definition.len()).map_err(|_| SchemaError::Invalid {
            name: name.to_string(),
            message: "definition is too large".to_string(),
        })?;
        put_str(buf, name, revision)?;
        buf.put_u64_le(schema.fingerprint().0);
        buf.put_u32_le(len);
        buf.put_slice(&definition);
        Ok(())
    }

    fn content_type(&self) -> &'static str {
        "application/x-eventlog-schema+json"
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// External source of schema definitions, keyed by name and fingerprint.
pub trait SchemaRegistry<S: Schema>: Send + Sync + fmt::Debug {
    /// Add `schema` as the newest version of its name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Incompatible`] if it cannot read data written
    /// under the current newest version.
    fn register(&self, schema: Arc<S>) -> Result<Fingerprint, SchemaError>;

    /// Look up an exact version.
    fn resolve(&self, name: &str, fingerprint: Fingerprint) -> Option<Arc<S>>;

    /// Newest registered version of `name`.
    fn latest(&self, name: &str) -> Option<Arc<S>>;
}

/// In-process [`SchemaRegistry`].
pub struct MemorySchemaRegistry<S> {
    versions: DashMap<(String, Fingerprint), Arc<S>>,
    latest: DashMap<String, Arc<S>>,
}

impl<S> MemorySchemaRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    /// Number of registered versions across all names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl<S> Default for MemorySchemaRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for MemorySchemaRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySchemaRegistry")
            .field("versions", &self.versions.len())
            .finish()
    }
}

impl<S: Schema> SchemaRegistry<S> for MemorySchemaRegistry<S> {
    fn register(&self, schema: Arc<S>) -> Result<Fingerprint, SchemaError> {
        let fingerprint = schema.fingerprint();
        let name = schema.name().to_string();
        let key = (name.clone(), fingerprint);
        if self.versions.contains_key(&key) {
            return Ok(fingerprint);
        }

        // The entry guard serializes concurrent registrations of one name.
        let mut latest = self
            .latest
            .entry(name.clone())
            .or_insert_with(|| Arc::clone(&schema));
        if latest.fingerprint() != fingerprint {
            if let Compatibility::Incompatible { reasons } = check_evolution(&*schema, &**latest) {
                warn!(schema = %name, %fingerprint, "rejected incompatible schema version");
                return Err(SchemaError::Incompatible { name, reasons });
            }
            *latest = Arc::clone(&schema);
        }
        drop(latest);

        debug!(schema = %name, %fingerprint, "registered schema version");
        self.versions.insert(key, schema);
        Ok(fingerprint)
    }

    fn resolve(&self, name: &str, fingerprint: Fingerprint) -> Option<Arc<S>> {
        self.versions
            .get(&(name.to_string(), fingerprint))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn latest(&self, name: &str) -> Option<Arc<S>> {
        self.latest.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

/// Reference codec: stores name and fingerprint and resolves the
/// definition through a [`SchemaRegistry`]. Encoding registers the schema.
///
/// # Content Type
///
/// `"application/x-eventlog-schema-ref"`
pub struct RegistrySchemaCodec<S, R> {
    registry: Arc<R>,
    _schema: PhantomData<fn() -> S>,
}

impl<S, R> RegistrySchemaCodec<S, R> {
    /// Create a codec backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            _schema: PhantomData,
        }
    }

    /// The registry this codec resolves through.
    #[must_use]
    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }
}

impl<S, R: fmt::Debug> fmt::Debug for RegistrySchemaCodec<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySchemaCodec")
            .field("registry", &self.registry)
            .finish()
    }
}

impl<S, R> SchemaCodec for RegistrySchemaCodec<S, R>
where
    S: Schema + 'static,
    R: SchemaRegistry<S> + 'static,
{
    type Schema = S;

    fn decode(
        &self,
        buf: &mut Bytes,
        revision: Revision,
        name: &str,
    ) -> Result<Arc<S>, SchemaError> {
        let name = get_name(buf, revision, name)?;
        let fingerprint = get_fingerprint(buf, revision)?;
        self.registry
            .resolve(&name, fingerprint)
            .ok_or(SchemaError::Unknown {
                name,
                fingerprint,
                revision,
            })
    }

    fn encode(
        &self,
        buf: &mut BytesMut,
        revision: Revision,
        name: &str,
        schema: &Arc<S>,
    ) -> Result<(), SchemaError> {
        let fingerprint = self.registry.register(Arc::clone(schema))?;
        put_str(buf, name, revision)?;
        buf.put_u64_le(fingerprint.0);
        Ok(())
    }

    fn content_type(&self) -> &'static str {
        "application/x-eventlog-schema-ref"
    }
}

// ─── Record schema ──────────────────────────────────────────────────────────

/// Primitive field types of a [`RecordSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Bytes,
}

impl FieldType {
    /// Returns `true` if a value written as `writer` can be read as `self`.
    #[must_use]
    pub fn reads(self, writer: FieldType) -> bool {
        use FieldType::*;
        self == writer
            || matches!(
                (writer, self),
                (Int, Long) | (Float, Double) | (Int, Double) | (Long, Double)
            )
    }

    /// Returns `true` if `value` is a valid default for this type.
    #[must_use]
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            FieldType::Bool => value.is_boolean(),
            FieldType::Int => value.as_i64().is_some_and(|v| i32::try_from(v).is_ok()),
            FieldType::Long => value.is_i64(),
            FieldType::Float | FieldType::Double => value.is_number(),
            FieldType::String | FieldType::Bytes => matches!(value, Value::String(_)),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Long => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::String => "string",
            FieldType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// One field of a [`RecordSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name, unique within the record.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Value used when the writer did not have this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// A named record of typed fields.
///
/// # Examples
/// ```
/// use eventlog_rs::{FieldType, RecordSchema, Schema};
///
/// let v1 = RecordSchema::new("order").with_field("id", FieldType::Int);
/// let v2 = RecordSchema::new("order")
///     .with_field("id", FieldType::Long)
///     .with_default_field("note", FieldType::String, serde_json::json!(""));
/// assert!(v2.compatible_with(&v1));
/// assert!(!v1.compatible_with(&v2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    name: String,
    fields: Vec<FieldSchema>,
}

impl RecordSchema {
    /// Start an empty record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a required field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldType) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    /// Add a field that falls back to `default` when absent from the
    /// writer.
    #[must_use]
    pub fn with_default_field(
        mut self,
        name: impl Into<String>,
        kind: FieldType,
        default: serde_json::Value,
    ) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind,
            default: Some(default),
        });
        self
    }

    /// The fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check for duplicate fields and mistyped defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Invalid`] describing the first problem.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::Invalid {
                    name: self.name.clone(),
                    message: format!("duplicate field {}", field.name),
                });
            }
            match &field.default {
                Some(default) if !field.kind.accepts(default) => {
                    return Err(SchemaError::Invalid {
                        name: self.name.clone(),
                        message: format!("default of {} is not a {}", field.name, field.kind),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl RecordSchema {
    /// Bytes the fingerprint is taken over: the JSON definition, whose maps
    /// are ordered. Falls back to the debug form, which still tells
    /// distinct schemas apart, if the definition cannot be serialized.
    fn canonical_form(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(json) => json,
            Err(err) => {
                error!(schema = %self.name, error = %err, "schema definition cannot be serialized");
                format!("{self:?}").into_bytes()
            }
        }
    }
}

impl Schema for RecordSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.canonical_form())
    }

    fn check(&self, writer: &Self) -> Compatibility {
        let mut reasons = Vec::new();
        if self.name != writer.name {
            reasons.push(format!(
                "record name {} differs from writer {}",
                self.name, writer.name
            ));
        }
        for field in &self.fields {
            match writer.field(&field.name) {
                Some(written) if field.kind.reads(written.kind) => {}
                Some(written) => reasons.push(format!(
                    "field {}: cannot read {} as {}",
                    field.name, written.kind, field.kind
                )),
                None if field.default.is_some() => {}
                None => reasons.push(format!(
                    "field {} is missing from the writer and has no default",
                    field.name
                )),
            }
        }
        if reasons.is_empty() {
            Compatibility::Compatible
        } else {
            Compatibility::Incompatible { reasons }
        }
    }
}
