//! The per-request session handle and the values it carries.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Key under which flashes are stored when no key is given.
pub const FLASH_KEY: &str = "_flash";

/// Keys of the JSON object a record is written as.
const RECORD_TYPE_KEY: &str = "$record";
const RECORD_DATA_KEY: &str = "$data";

/// Path attribute of session cookies unless configured otherwise.
pub const DEFAULT_COOKIE_PATH: &str = "/";

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

/// A value stored in a session.
///
/// The tree is self-describing so the binary codec can reproduce it exactly.
/// Application structs are stored as [`Value::Record`]: the bincode encoding
/// of the value, tagged with the [`SessionType::TYPE_NAME`] it was created
/// from. Records never pass through the lossy JSON mapping, so every field
/// (non-finite floats, maps with non-string keys) survives either codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Record { type_name: String, data: Vec<u8> },
}

/// An application type that can be stored in a session as a record.
///
/// Records are encoded with bincode, which is not self-describing: the type
/// must not rely on `deserialize_any` (untagged enums, `#[serde(flatten)]`).
/// The binary codec only accepts records whose type name has been registered
/// with the store's [`TypeRegistry`](crate::codec::TypeRegistry).
pub trait SessionType: Serialize + DeserializeOwned {
    /// Stable name written next to the record's fields.
    const TYPE_NAME: &'static str;
}

impl Value {
    /// Wrap an application value as a tagged record.
    pub fn record<T: SessionType>(value: &T) -> Result<Self> {
        Ok(Value::Record {
            type_name: T::TYPE_NAME.to_string(),
            data: bincode::serialize(value)?,
        })
    }

    /// Recover an application value from a record of the same type name.
    pub fn to_record<T: SessionType>(&self) -> Result<T> {
        match self {
            Value::Record { type_name, data } if type_name == T::TYPE_NAME => {
                Ok(bincode::deserialize(data)?)
            }
            Value::Record { type_name, .. } => Err(SessionError::Serialization(format!(
                "expected record of type {} but found {}",
                T::TYPE_NAME,
                type_name
            ))),
            other => Err(SessionError::Serialization(format!(
                "expected record of type {} but found {}",
                T::TYPE_NAME,
                other.kind()
            ))),
        }
    }

    /// Decode any value into `T`, ignoring record tags.
    ///
    /// Records decode from their exact encoding; every other value goes
    /// through its JSON form.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Value::Record { data, .. } => Ok(bincode::deserialize(data)?),
            other => Ok(serde_json::from_value(other.to_json()?)?),
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Record { .. } => "record",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(n) => Some(*n),
            Value::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Convert into a JSON value.
    ///
    /// Lossy: bytes become arrays of numbers and unsigned integers are not
    /// told apart from signed ones on the way back. Records become a tagged
    /// object holding their base64 encoding, which [`Value::from_json`]
    /// turns back into the same record. Non-finite floats have no JSON
    /// representation and are rejected.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        use serde_json::Value as Json;

        Ok(match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::UInt(n) => Json::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| {
                    SessionError::Serialization(format!("float {f} has no JSON representation"))
                })?,
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| v.to_json().map(|json| (k.clone(), json)))
                    .collect::<Result<serde_json::Map<_, _>>>()?,
            ),
            Value::Record { type_name, data } => {
                let mut object = serde_json::Map::new();
                object.insert(RECORD_TYPE_KEY.to_string(), Json::String(type_name.clone()));
                object.insert(RECORD_DATA_KEY.to_string(), Json::String(STANDARD.encode(data)));
                Json::Object(object)
            }
        })
    }

    /// Build a value from JSON. Numbers become `Int` when they fit an i64;
    /// tagged record objects become records again.
    pub fn from_json(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            Json::Object(map) => match record_from_json(&map) {
                Some(record) => record,
                None => Value::Map(
                    map.into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect(),
                ),
            },
        }
    }
}

/// Recognise the tagged object [`Value::to_json`] writes for a record.
fn record_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    if map.len() != 2 {
        return None;
    }
    let type_name = map.get(RECORD_TYPE_KEY)?.as_str()?;
    let data = STANDARD.decode(map.get(RECORD_DATA_KEY)?.as_str()?).ok()?;
    Some(Value::Record {
        type_name: type_name.to_string(),
        data,
    })
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::UInt(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookie options
// ─────────────────────────────────────────────────────────────────────────────

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Lax => write!(f, "Lax"),
            SameSite::Strict => write!(f, "Strict"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// Cookie attributes and lifetime policy of a session.
///
/// `max_age` is in seconds. Saving a session with `max_age <= 0` deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_COOKIE_PATH.to_string(),
            domain: None,
            max_age: crate::config::DEFAULT_LIFETIME.as_secs() as i64,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// A session handed to the caller for the duration of one request.
///
/// The store never keeps a reference to it; changes reach storage only
/// through [`SessionStore::save`](crate::SessionStore::save).
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    name: String,
    values: BTreeMap<String, Value>,
    is_new: bool,
    options: CookieOptions,
}

impl Session {
    /// Create an empty session that has no backing record yet.
    pub fn new(name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            values: BTreeMap::new(),
            is_new: true,
            options,
        }
    }

    /// Identifier of the backing record. Empty until the first save.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = id;
    }

    /// Name of the session, which is also the cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when no prior record was recovered for this request.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.is_new = false;
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut CookieOptions {
        &mut self.options
    }

    /// Mark the session for deletion on the next save.
    pub fn expire(&mut self) {
        self.options.max_age = -1;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.values.get_mut(key)
    }

    /// Set a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Store an application type as a tagged record.
    pub fn insert_record<T: SessionType>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Option<Value>> {
        let record = Value::record(value)?;
        Ok(self.values.insert(key.into(), record))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.values
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append a flash message under the default key.
    pub fn add_flash(&mut self, value: impl Into<Value>) {
        self.add_flash_to(FLASH_KEY, value);
    }

    /// Append a flash message under `key`.
    pub fn add_flash_to(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.values.get_mut(key) {
            Some(Value::List(items)) => items.push(value),
            _ => {
                self.values.insert(key.to_string(), Value::List(vec![value]));
            }
        }
    }

    /// Take all flash messages under the default key.
    pub fn flashes(&mut self) -> Vec<Value> {
        self.flashes_from(FLASH_KEY)
    }

    /// Take all flash messages under `key`. A second call returns nothing
    /// until new flashes are added.
    pub fn flashes_from(&mut self, key: &str) -> Vec<Value> {
        match self.values.remove(key) {
            Some(Value::List(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        }
    }
}
