//! Cookie directives returned by the store and request cookie parsing.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::session::CookieOptions;

const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A cookie the caller should set on the response.
///
/// Rendering it with `to_string()` yields a `Set-Cookie` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
    pub expires: Option<DateTime<Utc>>,
}

impl SetCookie {
    /// A cookie carrying `value` with the session's options.
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: &CookieOptions) -> Self {
        let expires = if options.max_age > 0 {
            Duration::try_seconds(options.max_age).and_then(|d| Utc::now().checked_add_signed(d))
        } else {
            None
        };
        Self {
            name: name.into(),
            value: value.into(),
            options: options.clone(),
            expires,
        }
    }

    /// A cookie that removes the client's copy immediately.
    pub fn clear(name: impl Into<String>, options: &CookieOptions) -> Self {
        let mut options = options.clone();
        options.max_age = -1;
        Self {
            name: name.into(),
            value: String::new(),
            options,
            expires: Utc.timestamp_opt(1, 0).single(),
        }
    }

    /// True when this directive deletes the cookie.
    pub fn is_removal(&self) -> bool {
        self.options.max_age <= 0
    }

    /// `Max-Age` in seconds as it will be rendered (never negative).
    pub fn max_age(&self) -> i64 {
        self.options.max_age.max(0)
    }

    /// The `name=value` pair a client sends back in its `Cookie` header.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if !self.options.path.is_empty() {
            write!(f, "; Path={}", self.options.path)?;
        }
        if let Some(domain) = &self.options.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(expires) = &self.expires {
            write!(f, "; Expires={}", expires.format(COOKIE_DATE_FORMAT))?;
        }
        write!(f, "; Max-Age={}", self.max_age())?;
        if self.options.http_only {
            write!(f, "; HttpOnly")?;
        }
        if self.options.secure {
            write!(f, "; Secure")?;
        }
        if let Some(same_site) = self.options.same_site {
            write!(f, "; SameSite={same_site}")?;
        }
        Ok(())
    }
}

/// Parse a request `Cookie` header into name/value pairs.
///
/// When a name repeats, the first occurrence wins.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"');
        cookies
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }
    cookies
}
