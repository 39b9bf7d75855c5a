//! Session lifecycle: loading from a client token, saving, and deleting.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::PayloadCodec;
use crate::config::StoreConfig;
use crate::cookie::SetCookie;
use crate::error::{Result, SessionError, TokenError};
use crate::id::{generate_session_id, is_valid_session_id};
use crate::reaper::Reaper;
use crate::registry::Registry;
use crate::session::Session;
use crate::storage::SessionDb;
use crate::token::{SignedTokenCodec, TokenCodec};

/// Result of recovering a session from a client token.
///
/// `session` is always usable. When recovery failed it is a fresh, empty
/// session and `error` says why.
#[derive(Debug)]
pub struct SessionLoad {
    pub session: Session,
    pub error: Option<SessionError>,
}

/// File-backed session store.
///
/// The store is stateless between calls apart from its configuration; all
/// session state lives in the database, so any number of request flows may
/// share one store.
#[derive(Debug)]
pub struct SessionStore {
    db: SessionDb,
    config: StoreConfig,
    payload: Arc<dyn PayloadCodec>,
    tokens: Arc<dyn TokenCodec>,
}

impl SessionStore {
    /// Open (or create) the database at `path` and build a store over it.
    ///
    /// Expired records are not removed until a reaper runs: call
    /// [`spawn_reaper`](Self::spawn_reaper) afterwards, or open with
    /// [`start`](Self::start) to do both at once.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let db = SessionDb::open(path, &config.namespace, config.open_timeout)?;
        Self::with_db(db, config)
    }

    /// Open the store and start its reaper, which runs until `cancel` fires.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        path: impl AsRef<Path>,
        config: StoreConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>)> {
        let store = Self::open(path, config)?;
        let reaper = store.spawn_reaper(cancel);
        Ok((store, reaper))
    }

    /// Build a store over an already opened database.
    pub fn with_db(db: SessionDb, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        if db.namespace() != config.namespace {
            return Err(SessionError::Config(format!(
                "database namespace '{}' does not match configured '{}'",
                db.namespace(),
                config.namespace
            )));
        }

        let tokens = SignedTokenCodec::new(&config.keys)?.with_max_age(config.token_max_age);
        let payload = config.codec.build(config.registry.clone());

        info!(
            namespace = %config.namespace,
            codec = ?config.codec,
            lifetime_secs = config.lifetime.as_secs(),
            max_length = config.max_length,
            "Session store ready"
        );

        Ok(Self {
            db,
            config,
            payload,
            tokens: Arc::new(tokens),
        })
    }

    /// Replace the token codec.
    pub fn with_token_codec(mut self, codec: impl TokenCodec + 'static) -> Self {
        self.tokens = Arc::new(codec);
        self
    }

    pub fn db(&self) -> &SessionDb {
        &self.db
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn scope(&self, name: &str) -> String {
        format!("{}{}", self.config.key_prefix, name)
    }

    /// Recover the session named `name` from the client's token, if any.
    ///
    /// Never fails: a missing or bad token, a vanished record, or a payload
    /// that no longer decodes all yield a fresh session marked new. A record
    /// that exists without values yields a new, empty session that keeps the
    /// record's id.
    pub fn new_session(&self, name: &str, token: Option<&str>) -> SessionLoad {
        let options = self.config.default_cookie_options();
        let mut session = Session::new(name, options.clone());

        match self.load(&mut session, token.unwrap_or_default()) {
            Ok(true) => {
                session.mark_loaded();
                debug!(session_id = %session.id(), name = %name, "Session loaded");
                SessionLoad {
                    session,
                    error: None,
                }
            }
            Ok(false) => {
                debug!(session_id = %session.id(), name = %name, "Session record has no values");
                SessionLoad {
                    session,
                    error: None,
                }
            }
            Err(error) => {
                debug!(name = %name, error = %error, "Session not recovered, starting fresh");
                SessionLoad {
                    session: Session::new(name, options),
                    error: Some(error),
                }
            }
        }
    }

    /// Returns `Ok(false)` when the record exists but holds no values. The
    /// session then keeps the id, so the next save rewrites that record.
    fn load(&self, session: &mut Session, token: &str) -> Result<bool> {
        let id = self.tokens.open(&self.scope(session.name()), token)?;
        if !is_valid_session_id(&id) {
            return Err(TokenError::Malformed("session id").into());
        }

        let Some(payload) = self.db.get(&id)? else {
            session.set_id(id);
            return Ok(false);
        };
        self.payload.deserialize(&payload, session)?;
        session.set_id(id);
        Ok(true)
    }

    /// Fetch the session named `name` for the current request.
    ///
    /// The first call per name loads it; later calls return the same handle.
    pub fn get<'r>(&self, registry: &'r mut Registry, name: &str) -> &'r mut Session {
        registry.get(self, name)
    }

    /// Persist the session and return the cookie the client should receive.
    ///
    /// A session whose `max_age` is zero or negative is deleted instead and
    /// the returned cookie clears the client's copy. On error nothing was
    /// written and no cookie should be sent.
    pub fn save(&self, session: &mut Session) -> Result<SetCookie> {
        if session.options().max_age <= 0 {
            self.db.delete(session.id())?;
            debug!(session_id = %session.id(), name = %session.name(), "Session deleted");
            return Ok(SetCookie::clear(session.name(), session.options()));
        }

        let payload = self.payload.serialize(session)?;
        if self.config.max_length > 0 && payload.len() > self.config.max_length {
            return Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                limit: self.config.max_length,
            });
        }

        let id = if session.id().is_empty() {
            generate_session_id()
        } else {
            session.id().to_string()
        };
        let expires_at = chrono::Duration::from_std(self.config.lifetime)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| SessionError::Config("session lifetime out of range".to_string()))?;

        self.db.put(&id, &payload, expires_at)?;
        let token = self.tokens.seal(&self.scope(session.name()), &id)?;
        session.set_id(id);

        debug!(
            session_id = %session.id(),
            name = %session.name(),
            bytes = payload.len(),
            "Session saved"
        );
        Ok(SetCookie::new(session.name(), token, session.options()))
    }

    /// Start the background reaper for this store's database.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_reaper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Reaper::new(self.db.clone(), self.config.reap_interval).spawn(cancel)
    }

    /// A reaper over this store's database, for callers driving sweeps
    /// themselves.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(self.db.clone(), self.config.reap_interval)
    }
}
