//! Signed cookie tokens carrying a session id.
//!
//! A token is `base64url(timestamp "|" base64url(id) "|" mac)` where the mac
//! is HMAC-SHA256 over `scope "|" timestamp "|" base64url(id)`. The scope is
//! the cookie name, so a token minted for one session name cannot be replayed
//! under another.
//!
//! Several keys may be configured: the first one signs, all of them verify.
//! Rotating keys is done by prepending the new key and dropping the old one
//! once every outstanding token has been reissued.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Longest encoded token accepted by [`SignedTokenCodec::open`].
pub const MAX_TOKEN_LEN: usize = 4096;

/// Tokens older than this are rejected unless configured otherwise.
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(86_400 * 30);

/// Seals session ids into client tokens and opens them again.
pub trait TokenCodec: Send + Sync + fmt::Debug {
    /// Produce a token for `id` scoped to `name`.
    fn seal(&self, name: &str, id: &str) -> Result<String, TokenError>;

    /// Recover the id from a token scoped to `name`.
    fn open(&self, name: &str, token: &str) -> Result<String, TokenError>;
}

/// HMAC-SHA256 signed tokens with key rotation and a maximum age.
#[derive(Clone)]
pub struct SignedTokenCodec {
    keys: Vec<Vec<u8>>,
    max_age: Option<Duration>,
}

impl fmt::Debug for SignedTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTokenCodec")
            .field("keys", &self.keys.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SignedTokenCodec {
    /// Create a codec from one or more keys. Empty keys are rejected.
    pub fn new<K: AsRef<[u8]>>(keys: impl IntoIterator<Item = K>) -> Result<Self, TokenError> {
        let keys: Vec<Vec<u8>> = keys.into_iter().map(|k| k.as_ref().to_vec()).collect();
        if keys.is_empty() || keys.iter().any(Vec::is_empty) {
            return Err(TokenError::NoKeys);
        }
        Ok(Self {
            keys,
            max_age: Some(DEFAULT_TOKEN_MAX_AGE),
        })
    }

    /// Set the maximum token age. `None` disables the check.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    fn mac(key: &[u8], scope: &str, timestamp: &str, value: &str) -> Result<Vec<u8>, TokenError> {
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::NoKeys)?;
        mac.update(scope.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.as_bytes());
        mac.update(b"|");
        mac.update(value.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    pub(crate) fn seal_at(&self, name: &str, id: &str, now: i64) -> Result<String, TokenError> {
        let key = self.keys.first().ok_or(TokenError::NoKeys)?;
        let timestamp = now.to_string();
        let value = URL_SAFE_NO_PAD.encode(id.as_bytes());
        let mac = Self::mac(key, name, &timestamp, &value)?;

        let mut inner = Vec::with_capacity(timestamp.len() + value.len() + mac.len() + 2);
        inner.extend_from_slice(timestamp.as_bytes());
        inner.push(b'|');
        inner.extend_from_slice(value.as_bytes());
        inner.push(b'|');
        inner.extend_from_slice(&mac);
        Ok(URL_SAFE_NO_PAD.encode(inner))
    }

    pub(crate) fn open_at(&self, name: &str, token: &str, now: i64) -> Result<String, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        if token.len() > MAX_TOKEN_LEN {
            return Err(TokenError::TooLong(token.len()));
        }

        let inner = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed("not base64"))?;
        let mut parts = inner.splitn(3, |b| *b == b'|');
        let (Some(timestamp), Some(value), Some(mac)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed("missing separator"));
        };
        let timestamp =
            std::str::from_utf8(timestamp).map_err(|_| TokenError::Malformed("timestamp"))?;
        let value = std::str::from_utf8(value).map_err(|_| TokenError::Malformed("value"))?;

        let mut verified = false;
        for key in &self.keys {
            let expected = Self::mac(key, name, timestamp, value)?;
            if bool::from(expected.as_slice().ct_eq(mac)) {
                verified = true;
                break;
            }
        }
        if !verified {
            return Err(TokenError::InvalidSignature);
        }

        let issued_at: i64 = timestamp
            .parse()
            .map_err(|_| TokenError::Malformed("timestamp"))?;
        if let Some(max_age) = self.max_age {
            let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            if issued_at < now.saturating_sub(max_age) {
                return Err(TokenError::Expired);
            }
        }

        let id = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| TokenError::Malformed("value"))?;
        String::from_utf8(id).map_err(|_| TokenError::Malformed("value"))
    }
}

impl TokenCodec for SignedTokenCodec {
    fn seal(&self, name: &str, id: &str) -> Result<String, TokenError> {
        self.seal_at(name, id, chrono::Utc::now().timestamp())
    }

    fn open(&self, name: &str, token: &str) -> Result<String, TokenError> {
        self.open_at(name, token, chrono::Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn codec(key: &str) -> SignedTokenCodec {
        SignedTokenCodec::new([key]).unwrap()
    }

    #[test]
    fn test_seal_open_round_trip() {
        let codec = codec("secret-key");
        let token = codec.seal_at("session-key", "ABC234", NOW).unwrap();
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(codec.open_at("session-key", &token, NOW).unwrap(), "ABC234");
    }

    #[test]
    fn test_name_is_part_of_the_signature() {
        let codec = codec("secret-key");
        let token = codec.seal_at("a", "ABC234", NOW).unwrap();
        assert_eq!(codec.open_at("b", &token, NOW), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_tampered_value_is_rejected() {
        let codec = codec("secret-key");
        let token = codec.seal_at("sid", "ABC234", NOW).unwrap();

        let inner = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let first = inner.iter().position(|b| *b == b'|').unwrap();
        let second = first + 1 + inner[first + 1..].iter().position(|b| *b == b'|').unwrap();
        let mut forged = inner[..=first].to_vec();
        forged.extend_from_slice(URL_SAFE_NO_PAD.encode("OTHER").as_bytes());
        forged.extend_from_slice(&inner[second..]);

        let forged = URL_SAFE_NO_PAD.encode(forged);
        assert_eq!(codec.open_at("sid", &forged, NOW), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_foreign_key_is_rejected() {
        let token = codec("key-a").seal_at("sid", "ABC234", NOW).unwrap();
        assert_eq!(
            codec("key-b").open_at("sid", &token, NOW),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_rotated_keys_still_verify() {
        let old = codec("old-key");
        let token = old.seal_at("sid", "ABC234", NOW).unwrap();

        let rotated = SignedTokenCodec::new(["new-key", "old-key"]).unwrap();
        assert_eq!(rotated.open_at("sid", &token, NOW).unwrap(), "ABC234");

        let fresh = rotated.seal_at("sid", "ABC234", NOW).unwrap();
        assert_eq!(codec("new-key").open_at("sid", &fresh, NOW).unwrap(), "ABC234");
        assert!(old.open_at("sid", &fresh, NOW).is_err());
    }

    #[test]
    fn test_expired_token() {
        let codec = codec("secret-key").with_max_age(Some(Duration::from_secs(60)));
        let token = codec.seal_at("sid", "ABC234", NOW).unwrap();
        assert!(codec.open_at("sid", &token, NOW + 60).is_ok());
        assert_eq!(codec.open_at("sid", &token, NOW + 61), Err(TokenError::Expired));

        let unbounded = codec.with_max_age(None);
        assert!(unbounded.open_at("sid", &token, NOW + 1_000_000).is_ok());
    }

    #[test]
    fn test_malformed_inputs() {
        let codec = codec("secret-key");
        assert_eq!(codec.open_at("sid", "", NOW), Err(TokenError::Missing));
        assert!(matches!(
            codec.open_at("sid", "!!!", NOW),
            Err(TokenError::Malformed(_))
        ));
        let no_separator = URL_SAFE_NO_PAD.encode("12345");
        assert!(matches!(
            codec.open_at("sid", &no_separator, NOW),
            Err(TokenError::Malformed(_))
        ));
        let long = "A".repeat(MAX_TOKEN_LEN + 1);
        assert_eq!(
            codec.open_at("sid", &long, NOW),
            Err(TokenError::TooLong(MAX_TOKEN_LEN + 1))
        );
    }

    #[test]
    fn test_requires_keys() {
        assert_eq!(
            SignedTokenCodec::new(Vec::<Vec<u8>>::new()).unwrap_err(),
            TokenError::NoKeys
        );
        assert_eq!(SignedTokenCodec::new([""]).unwrap_err(), TokenError::NoKeys);
    }
}
