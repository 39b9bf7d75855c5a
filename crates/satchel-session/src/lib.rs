//! File-backed server-side session store.
//!
//! This crate keeps per-session key/value state in an embedded SQLite
//! database and hands clients only a signed token naming their session:
//! - Session ids are random, URL-safe and unguessable
//! - Tokens are HMAC-signed, scoped to the session name, and support key
//!   rotation
//! - Payloads are encoded with a pluggable codec (exact binary or JSON)
//! - A background reaper removes records past their expiry
//!
//! # Example
//!
//! ```rust,ignore
//! use satchel_session::{Registry, SessionStore, StoreConfig};
//!
//! let store = SessionStore::open("data/sessions.db", StoreConfig::new(secret))?;
//! let reaper = store.spawn_reaper(shutdown.clone());
//!
//! // per request
//! let mut registry = Registry::new(request_cookie_header);
//! let session = store.get(&mut registry, "session-key");
//! session.insert("user", "alice");
//! for cookie in registry.save_all(&store)? {
//!     response.append_header("Set-Cookie", cookie.to_string());
//! }
//! ```

mod codec;
mod config;
mod cookie;
mod error;
mod id;
mod reaper;
mod registry;
mod session;
mod storage;
mod store;
mod token;

pub use codec::{BinaryCodec, CodecKind, JsonCodec, PayloadCodec, TypeRegistry};
pub use config::{
    ConfigError, DEFAULT_KEY_PREFIX, DEFAULT_LIFETIME, DEFAULT_NAMESPACE, DEFAULT_OPEN_TIMEOUT,
    DEFAULT_REAP_INTERVAL, ENV_KEYS, StoreConfig, is_valid_namespace,
};
pub use cookie::{SetCookie, parse_cookie_header};
pub use error::{Result, SessionError, TokenError};
pub use id::{generate_session_id, is_valid_session_id};
pub use reaper::{ReapReport, Reaper};
pub use registry::Registry;
pub use session::{CookieOptions, FLASH_KEY, SameSite, Session, SessionType, Value};
pub use storage::{ENTRY_EXPIRED_AT, ENTRY_VALUES, SessionDb, is_expired};
pub use store::{SessionLoad, SessionStore};
pub use token::{DEFAULT_TOKEN_MAX_AGE, MAX_TOKEN_LEN, SignedTokenCodec, TokenCodec};
