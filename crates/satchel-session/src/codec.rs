//! Payload codecs for the `values` entry of a session record.
//!
//! Two interchangeable formats are provided:
//! - [`BinaryCodec`]: bincode over the [`Value`] tree. Exact round-trips,
//!   including tagged application records, which must be registered in the
//!   store's [`TypeRegistry`].
//! - [`JsonCodec`]: a JSON object of string keys. Readable, but lossy:
//!   unsigned integers that fit an i64 come back as `Int` and bytes come back
//!   as lists of integers. Records are kept exact as tagged objects holding
//!   their base64 encoding.
//!
//! The codec is chosen once per store through [`CodecKind`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionType, Value};

/// Serializes the values of a session into bytes and back.
pub trait PayloadCodec: Send + Sync + std::fmt::Debug {
    /// Encode the session's values.
    fn serialize(&self, session: &Session) -> Result<Vec<u8>>;

    /// Decode `data` and replace the session's values with the result.
    fn deserialize(&self, data: &[u8], session: &mut Session) -> Result<()>;
}

/// Which payload codec a store uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Binary,
    Json,
}

impl CodecKind {
    /// Build the codec for this kind.
    pub fn build(self, registry: TypeRegistry) -> Arc<dyn PayloadCodec> {
        match self {
            CodecKind::Binary => Arc::new(BinaryCodec::new(registry)),
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type registry
// ─────────────────────────────────────────────────────────────────────────────

/// Record type names the binary codec is allowed to write and read.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    names: BTreeSet<String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application type.
    pub fn register<T: SessionType>(mut self) -> Self {
        self.names.insert(T::TYPE_NAME.to_string());
        self
    }

    /// Register a type by name.
    pub fn register_name(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn check(&self, value: &Value) -> Result<()> {
        match value {
            Value::Record { type_name, .. } if !self.contains(type_name) => Err(
                SessionError::Serialization(format!("type not registered: {type_name}")),
            ),
            Value::List(items) => items.iter().try_for_each(|v| self.check(v)),
            Value::Map(map) => map.values().try_for_each(|v| self.check(v)),
            _ => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binary
// ─────────────────────────────────────────────────────────────────────────────

/// Exact-fidelity binary codec.
#[derive(Debug, Clone, Default)]
pub struct BinaryCodec {
    registry: TypeRegistry,
}

impl BinaryCodec {
    pub fn new(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }
}

impl PayloadCodec for BinaryCodec {
    fn serialize(&self, session: &Session) -> Result<Vec<u8>> {
        session
            .values()
            .values()
            .try_for_each(|v| self.registry.check(v))?;
        Ok(bincode::serialize(session.values())?)
    }

    fn deserialize(&self, data: &[u8], session: &mut Session) -> Result<()> {
        let values: BTreeMap<String, Value> = bincode::deserialize(data)?;
        values.values().try_for_each(|v| self.registry.check(v))?;
        *session.values_mut() = values;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON
// ─────────────────────────────────────────────────────────────────────────────

/// Textual codec with weaker type fidelity.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn serialize(&self, session: &Session) -> Result<Vec<u8>> {
        let object = session
            .values()
            .iter()
            .map(|(k, v)| v.to_json().map(|json| (k.clone(), json)))
            .collect::<Result<serde_json::Map<_, _>>>()?;
        Ok(serde_json::to_vec(&object)?)
    }

    fn deserialize(&self, data: &[u8], session: &mut Session) -> Result<()> {
        match serde_json::from_slice::<serde_json::Value>(data)? {
            serde_json::Value::Object(object) => {
                *session.values_mut() = object
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect();
                Ok(())
            }
            other => Err(SessionError::Serialization(format!(
                "session payload is not a JSON object: {other}"
            ))),
        }
    }
}
