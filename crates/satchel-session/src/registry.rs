//! Per-request collection of the sessions touched while handling it.

use std::collections::{BTreeMap, HashMap};

use crate::cookie::{SetCookie, parse_cookie_header};
use crate::error::{Result, SessionError};
use crate::session::Session;
use crate::store::SessionStore;

#[derive(Debug)]
struct Entry {
    session: Session,
    error: Option<SessionError>,
}

/// Sessions loaded during one request, keyed by name.
///
/// Create one per request from the request's `Cookie` header, fetch
/// sessions through [`SessionStore::get`], and call
/// [`save_all`](Registry::save_all) before responding.
#[derive(Debug, Default)]
pub struct Registry {
    cookies: HashMap<String, String>,
    sessions: BTreeMap<String, Entry>,
}

impl Registry {
    /// Start a registry from the request's `Cookie` header, if present.
    pub fn new(cookie_header: Option<&str>) -> Self {
        Self::from_cookies(cookie_header.map(parse_cookie_header).unwrap_or_default())
    }

    /// Start a registry from already parsed request cookies.
    pub fn from_cookies(cookies: HashMap<String, String>) -> Self {
        Self {
            cookies,
            sessions: BTreeMap::new(),
        }
    }

    /// The session named `name`, loading it through `store` on first use.
    pub fn get(&mut self, store: &SessionStore, name: &str) -> &mut Session {
        let cookies = &self.cookies;
        let entry = self.sessions.entry(name.to_string()).or_insert_with(|| {
            let load = store.new_session(name, cookies.get(name).map(String::as_str));
            Entry {
                session: load.session,
                error: load.error,
            }
        });
        &mut entry.session
    }

    /// Why the session named `name` could not be recovered, if it was
    /// loaded and recovery failed.
    pub fn load_error(&self, name: &str) -> Option<&SessionError> {
        self.sessions.get(name).and_then(|e| e.error.as_ref())
    }

    /// Whether a session with this name was loaded in this request.
    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Save every session loaded in this request, in name order.
    ///
    /// Stops at the first failure; cookies for sessions saved before it are
    /// discarded along with the error.
    pub fn save_all(&mut self, store: &SessionStore) -> Result<Vec<SetCookie>> {
        self.sessions
            .values_mut()
            .map(|entry| store.save(&mut entry.session))
            .collect()
    }
}
