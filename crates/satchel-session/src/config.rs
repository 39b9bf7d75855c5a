//! Configuration for the session store.
//!
//! [`StoreConfig`] is built in code with `with_*` methods, or loaded from a
//! TOML document shaped like:
//!
//! ```toml
//! [session_store]
//! keys = ["current-secret", "previous-secret"]
//! namespace = "sessions"
//! lifetime_secs = 86400
//! codec = "binary"
//! max_length = 4096
//! reap_interval_secs = 60
//!
//! [session_store.cookie]
//! secure = true
//! http_only = true
//! same_site = "lax"
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::{CodecKind, TypeRegistry};
use crate::session::{CookieOptions, SameSite, SessionType};
use crate::token::DEFAULT_TOKEN_MAX_AGE;

/// Default name of the root namespace holding every session.
pub const DEFAULT_NAMESPACE: &str = "sessions";

/// Default session lifetime.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(86_400);

/// Default interval between reap sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Default prefix applied to session names when scoping tokens.
pub const DEFAULT_KEY_PREFIX: &str = "session_";

/// Default bound on waiting for the database (open and lock).
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Environment variable holding comma-separated signing keys.
pub const ENV_KEYS: &str = "SATCHEL_SESSION_KEYS";

/// Errors that can occur while building or loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// No signing key was configured.
    #[error("store secret key is absent")]
    MissingKeys,

    /// The namespace cannot be used as a table name.
    #[error("invalid namespace name '{0}'")]
    InvalidNamespace(String),

    /// A field holds a value outside its allowed range.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: &'static str,
    },
}

/// Store configuration. Fixed once the store is constructed.
#[derive(Clone)]
pub struct StoreConfig {
    /// Token keys. The first signs; all verify.
    pub keys: Vec<Vec<u8>>,

    /// Name of the root namespace (the table holding all sessions).
    pub namespace: String,

    /// Lifetime of a saved record and default cookie max-age.
    pub lifetime: Duration,

    /// Payload codec used for every session.
    pub codec: CodecKind,

    /// Record types the binary codec accepts.
    pub registry: TypeRegistry,

    /// Maximum serialized payload size in bytes (0 = unlimited).
    pub max_length: usize,

    /// Interval between reap sweeps.
    pub reap_interval: Duration,

    /// Prefix prepended to the session name when sealing tokens.
    pub key_prefix: String,

    /// Maximum token age; `None` accepts tokens of any age.
    pub token_max_age: Option<Duration>,

    /// Bound on waiting for a connection or a write lock.
    pub open_timeout: Duration,

    /// Cookie attributes for new sessions. `max_age` is taken from `lifetime`.
    pub cookie: CookieOptions,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("keys", &format_args!("[{} redacted]", self.keys.len()))
            .field("namespace", &self.namespace)
            .field("lifetime", &self.lifetime)
            .field("codec", &self.codec)
            .field("registry", &self.registry)
            .field("max_length", &self.max_length)
            .field("reap_interval", &self.reap_interval)
            .field("key_prefix", &self.key_prefix)
            .field("token_max_age", &self.token_max_age)
            .field("open_timeout", &self.open_timeout)
            .field("cookie", &self.cookie)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            lifetime: DEFAULT_LIFETIME,
            codec: CodecKind::default(),
            registry: TypeRegistry::default(),
            max_length: 0,
            reap_interval: DEFAULT_REAP_INTERVAL,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            token_max_age: Some(DEFAULT_TOKEN_MAX_AGE),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            cookie: CookieOptions::default(),
        }
    }
}

impl StoreConfig {
    /// Create a configuration with a single signing key.
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self::default().with_key(key)
    }

    /// Add a key. Keys added later are only used for verification.
    pub fn with_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.keys.push(key.as_ref().to_vec());
        self
    }

    /// Replace all keys.
    pub fn with_keys<K: AsRef<[u8]>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.keys = keys.into_iter().map(|k| k.as_ref().to_vec()).collect();
        self
    }

    /// Set the root namespace (the table holding every session).
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the lifetime of saved records and the default cookie max-age.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the payload codec.
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Set the record types the binary codec accepts.
    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a record type with the binary codec.
    pub fn register<T: SessionType>(mut self) -> Self {
        self.registry = self.registry.register::<T>();
        self
    }

    /// Set the maximum serialized payload size in bytes (0 = unlimited).
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set the interval between reap sweeps.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Set the prefix prepended to session names when sealing tokens.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the maximum token age. `None` accepts tokens of any age.
    pub fn with_token_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.token_max_age = max_age;
        self
    }

    /// Set the bound on waiting for a connection or the write lock.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the cookie attributes of new sessions. `max_age` is always
    /// taken from the lifetime.
    pub fn with_cookie_options(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    /// Cookie options handed to every new session.
    pub fn default_cookie_options(&self) -> CookieOptions {
        CookieOptions {
            max_age: i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX),
            ..self.cookie.clone()
        }
    }

    /// Check the configuration for values the store cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.is_empty() || self.keys.iter().any(Vec::is_empty) {
            return Err(ConfigError::MissingKeys);
        }
        if !is_valid_namespace(&self.namespace) {
            return Err(ConfigError::InvalidNamespace(self.namespace.clone()));
        }
        if self.lifetime.as_secs() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lifetime",
                message: "must be at least one second",
            });
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reap_interval",
                message: "must be greater than zero",
            });
        }
        if self.open_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "open_timeout",
                message: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Parse a `[session_store]` TOML document.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(toml_str)?;
        Ok(raw.session_store.into())
    }

    /// Load a TOML config file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Replace the keys with those in [`ENV_KEYS`], if set and non-empty.
    pub fn apply_env(self) -> Self {
        match std::env::var(ENV_KEYS) {
            Ok(value) => self.apply_keys_from(&value),
            Err(_) => self,
        }
    }

    fn apply_keys_from(self, value: &str) -> Self {
        let keys: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            self
        } else {
            self.with_keys(keys)
        }
    }
}

/// Whether `name` is usable as the root namespace (a plain SQL identifier).
pub fn is_valid_namespace(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─────────────────────────────────────────────────────────────────────────────
// TOML layout
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    session_store: RawStoreConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStoreConfig {
    keys: Vec<String>,
    namespace: Option<String>,
    lifetime_secs: Option<u64>,
    codec: Option<CodecKind>,
    max_length: Option<usize>,
    reap_interval_secs: Option<u64>,
    key_prefix: Option<String>,
    /// 0 disables the token age check.
    token_max_age_secs: Option<u64>,
    open_timeout_secs: Option<u64>,
    cookie: RawCookieConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCookieConfig {
    path: Option<String>,
    domain: Option<String>,
    secure: Option<bool>,
    http_only: Option<bool>,
    same_site: Option<SameSite>,
}

impl From<RawStoreConfig> for StoreConfig {
    fn from(raw: RawStoreConfig) -> Self {
        let defaults = StoreConfig::default();
        let cookie = CookieOptions {
            path: raw.cookie.path.unwrap_or(defaults.cookie.path.clone()),
            domain: raw.cookie.domain,
            secure: raw.cookie.secure.unwrap_or(defaults.cookie.secure),
            http_only: raw.cookie.http_only.unwrap_or(defaults.cookie.http_only),
            same_site: raw.cookie.same_site,
            ..defaults.cookie.clone()
        };
        StoreConfig {
            keys: raw.keys.into_iter().map(String::into_bytes).collect(),
            namespace: raw.namespace.unwrap_or(defaults.namespace),
            lifetime: raw
                .lifetime_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lifetime),
            codec: raw.codec.unwrap_or(defaults.codec),
            registry: defaults.registry,
            max_length: raw.max_length.unwrap_or(defaults.max_length),
            reap_interval: raw
                .reap_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            key_prefix: raw.key_prefix.unwrap_or(defaults.key_prefix),
            token_max_age: match raw.token_max_age_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.token_max_age,
            },
            open_timeout: raw
                .open_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.open_timeout),
            cookie,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert!(config.keys.is_empty());
        assert_eq!(config.namespace, "sessions");
        assert_eq!(config.lifetime, Duration::from_secs(86_400));
        assert_eq!(config.codec, CodecKind::Binary);
        assert_eq!(config.max_length, 0);
        assert_eq!(config.reap_interval, Duration::from_secs(60));
        assert_eq!(config.key_prefix, "session_");
        assert!(matches!(config.validate(), Err(ConfigError::MissingKeys)));
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("secret")
            .with_lifetime(Duration::from_secs(3600))
            .with_codec(CodecKind::Json)
            .with_max_length(4096)
            .with_namespace("web_sessions");
        assert!(config.validate().is_ok());
        assert_eq!(config.default_cookie_options().max_age, 3600);
        assert_eq!(config.default_cookie_options().path, "/");
    }

    #[test]
    fn test_validation() {
        let bad_namespace = StoreConfig::new("k").with_namespace("drop table;");
        assert!(matches!(
            bad_namespace.validate(),
            Err(ConfigError::InvalidNamespace(_))
        ));

        let zero_interval = StoreConfig::new("k").with_reap_interval(Duration::ZERO);
        assert!(matches!(
            zero_interval.validate(),
            Err(ConfigError::InvalidValue { field: "reap_interval", .. })
        ));

        let zero_lifetime = StoreConfig::new("k").with_lifetime(Duration::from_millis(10));
        assert!(zero_lifetime.validate().is_err());
    }

    #[test]
    fn test_namespace_rules() {
        assert!(is_valid_namespace("sessions"));
        assert!(is_valid_namespace("_s2"));
        assert!(!is_valid_namespace(""));
        assert!(!is_valid_namespace("2fast"));
        assert!(!is_valid_namespace("a-b"));
        assert!(!is_valid_namespace(&"a".repeat(65)));
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml(
            r#"
            [session_store]
            keys = ["new", "old"]
            lifetime_secs = 3600
            codec = "json"
            max_length = 4096
            token_max_age_secs = 0

            [session_store.cookie]
            secure = true
            same_site = "strict"
            "#,
        )
        .unwrap();

        assert_eq!(config.keys, vec![b"new".to_vec(), b"old".to_vec()]);
        assert_eq!(config.lifetime, Duration::from_secs(3600));
        assert_eq!(config.codec, CodecKind::Json);
        assert_eq!(config.max_length, 4096);
        assert_eq!(config.token_max_age, None);
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert!(config.cookie.secure);
        assert_eq!(config.cookie.same_site, Some(SameSite::Strict));
        assert_eq!(config.cookie.path, "/");
    }

    #[test]
    fn test_from_toml_rejects_bad_codec() {
        let err = StoreConfig::from_toml("[session_store]\ncodec = \"xml\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_missing_file() {
        let err = StoreConfig::from_toml_file(Path::new("/nonexistent/satchel.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_keys_from_env_value() {
        let config = StoreConfig::new("original").apply_keys_from(" a , b ,, ");
        assert_eq!(config.keys, vec![b"a".to_vec(), b"b".to_vec()]);

        let unchanged = StoreConfig::new("original").apply_keys_from(" , ");
        assert_eq!(unchanged.keys, vec![b"original".to_vec()]);
    }
}
