//! End-to-end session lifecycle tests against a real database file.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use satchel_session::{
    CodecKind, Registry, SessionError, SessionType, StoreConfig, TokenError, Value,
};
use serde::{Deserialize, Serialize};

use common::{SECRET, TestStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FlashMessage {
    kind: i32,
    message: String,
}

impl SessionType for FlashMessage {
    const TYPE_NAME: &'static str = "FlashMessage";
}

#[test]
fn test_login_logout_scenario() -> Result<()> {
    let ts = TestStore::open_with(
        StoreConfig::new(SECRET).with_lifetime(Duration::from_secs(3600)),
    )?;
    let store = &ts.store;

    // First request: no cookie.
    let load = store.new_session("session-key", None);
    assert!(load.session.is_new());
    let mut session = load.session;
    session.insert("k", "foo");
    let cookie = store.save(&mut session)?;
    assert_eq!(cookie.max_age(), 3600);
    let token = cookie.value.clone();

    // Second request: cookie present.
    let load = store.new_session("session-key", Some(&token));
    assert!(load.error.is_none());
    let mut session = load.session;
    assert!(!session.is_new());
    assert_eq!(session.get("k").and_then(Value::as_str), Some("foo"));

    // Logout.
    session.options_mut().max_age = 0;
    let cleared = store.save(&mut session)?;
    assert!(cleared.is_removal());
    assert!(cleared.value.is_empty());
    assert!(cleared.to_string().contains("Max-Age=0"));
    assert!(!store.db().contains(session.id())?);

    // The old token no longer recovers anything.
    let load = store.new_session("session-key", Some(&token));
    assert!(load.session.is_new());
    assert!(load.session.is_empty());
    Ok(())
}

#[test]
fn test_flashes_survive_one_round_trip() -> Result<()> {
    let ts = TestStore::open()?;
    let store = &ts.store;

    let mut session = store.new_session("flash", None).session;
    assert!(session.flashes().is_empty());
    session.add_flash("foo");
    session.add_flash("bar");
    session.add_flash_to("custom_key", "baz");
    let token = store.save(&mut session)?.value;

    let mut session = store.new_session("flash", Some(&token)).session;
    assert_eq!(session.flashes(), vec![Value::from("foo"), Value::from("bar")]);
    assert_eq!(session.flashes_from("custom_key"), vec![Value::from("baz")]);
    let token = store.save(&mut session)?.value;

    let mut session = store.new_session("flash", Some(&token)).session;
    assert!(!session.is_new());
    assert!(session.flashes().is_empty());
    assert!(session.flashes_from("custom_key").is_empty());
    Ok(())
}

#[test]
fn test_registered_record_round_trip() -> Result<()> {
    let ts = TestStore::open_with(StoreConfig::new(SECRET).register::<FlashMessage>())?;
    let store = &ts.store;

    let msg = FlashMessage {
        kind: 42,
        message: "foo".to_string(),
    };
    let mut session = store.new_session("records", None).session;
    session.add_flash(Value::record(&msg)?);
    let token = store.save(&mut session)?.value;

    let mut session = store.new_session("records", Some(&token)).session;
    let flashes = session.flashes();
    assert_eq!(flashes.len(), 1);
    assert_eq!(flashes[0].to_record::<FlashMessage>()?, msg);
    Ok(())
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Reading {
    level: f64,
    cells: BTreeMap<(u8, u8), String>,
}

impl SessionType for Reading {
    const TYPE_NAME: &'static str = "Reading";
}

#[test]
fn test_binary_store_keeps_record_fields_exact() -> Result<()> {
    let ts = TestStore::open_with(StoreConfig::new(SECRET).register::<Reading>())?;
    let store = &ts.store;

    let reading = Reading {
        level: f64::INFINITY,
        cells: BTreeMap::from([((0, 0), "origin".to_string()), ((3, 4), "far".to_string())]),
    };
    let mut session = store.new_session("readings", None).session;
    session.insert_record("latest", &reading)?;
    let token = store.save(&mut session)?.value;

    let load = store.new_session("readings", Some(&token));
    assert!(load.error.is_none());
    assert!(!load.session.is_new());
    let stored = load.session.get("latest").expect("latest should be present");
    assert_eq!(stored.to_record::<Reading>()?, reading);
    Ok(())
}

#[test]
fn test_unregistered_record_is_rejected() -> Result<()> {
    let ts = TestStore::open()?;
    let store = &ts.store;

    let mut session = store.new_session("records", None).session;
    session.insert_record(
        "msg",
        &FlashMessage {
            kind: 1,
            message: "x".to_string(),
        },
    )?;
    let err = store.save(&mut session).unwrap_err();
    assert!(matches!(err, SessionError::Serialization(_)));
    assert_eq!(store.db().session_count()?, 0);
    Ok(())
}

#[test]
fn test_oversized_payload_leaves_prior_record() -> Result<()> {
    let ts = TestStore::open_with(StoreConfig::new(SECRET).with_max_length(256))?;
    let store = &ts.store;

    let mut session = store.new_session("big", None).session;
    session.insert("small", "ok");
    let token = store.save(&mut session)?.value;

    session.insert("large", "x".repeat(1024));
    let err = store.save(&mut session).unwrap_err();
    assert!(matches!(
        err,
        SessionError::PayloadTooLarge { limit: 256, .. }
    ));

    let reloaded = store.new_session("big", Some(&token)).session;
    assert!(!reloaded.is_new());
    assert_eq!(reloaded.get("small"), Some(&Value::from("ok")));
    assert!(!reloaded.contains_key("large"));
    Ok(())
}

#[test]
fn test_json_codec_normalizes_values() -> Result<()> {
    let ts = TestStore::open_with(StoreConfig::new(SECRET).with_codec(CodecKind::Json))?;
    let store = &ts.store;

    let msg = FlashMessage {
        kind: 7,
        message: "hi".to_string(),
    };
    let mut session = store.new_session("json", None).session;
    session.insert("visits", 3u64);
    session.insert("name", "alice");
    session.insert_record("msg", &msg)?;
    let token = store.save(&mut session)?.value;

    let session = store.new_session("json", Some(&token)).session;
    assert_eq!(session.get("visits"), Some(&Value::Int(3)));
    assert_eq!(session.get("name"), Some(&Value::from("alice")));
    let stored = session.get("msg").expect("msg should be present");
    assert_eq!(stored.kind(), "record");
    assert_eq!(stored.to_record::<FlashMessage>()?, msg);
    Ok(())
}

#[test]
fn test_records_survive_reopen() -> Result<()> {
    let ts = TestStore::open()?;

    let mut session = ts.store.new_session("durable", None).session;
    session.insert("k", "v");
    let token = ts.store.save(&mut session)?.value;

    let second = ts.reopen(StoreConfig::new(SECRET))?;
    let session = second.new_session("durable", Some(&token)).session;
    assert!(!session.is_new());
    assert_eq!(session.get("k"), Some(&Value::from("v")));
    Ok(())
}

#[test]
fn test_rotated_keys_open_old_tokens() -> Result<()> {
    let ts = TestStore::open_with(StoreConfig::new("old-secret"))?;

    let mut session = ts.store.new_session("rotate", None).session;
    session.insert("k", 1);
    let old_token = ts.store.save(&mut session)?.value;

    let rotated = ts.reopen(StoreConfig::default().with_keys(["new-secret", "old-secret"]))?;
    let mut session = rotated.new_session("rotate", Some(&old_token)).session;
    assert!(!session.is_new());
    let new_token = rotated.save(&mut session)?.value;

    let new_only = ts.reopen(StoreConfig::new("new-secret"))?;
    assert!(!new_only.new_session("rotate", Some(&new_token)).session.is_new());
    let load = new_only.new_session("rotate", Some(&old_token));
    assert!(load.session.is_new());
    assert!(matches!(
        load.error,
        Some(SessionError::Token(TokenError::InvalidSignature))
    ));
    Ok(())
}

#[test]
fn test_registry_request_flow() -> Result<()> {
    let ts = TestStore::open()?;
    let store = &ts.store;

    let mut registry = Registry::new(None);
    store.get(&mut registry, "session-key").insert("user", "alice");
    let cookies = registry.save_all(store)?;
    assert_eq!(cookies.len(), 1);

    let header = format!("other=1; {}", cookies[0].pair());
    let mut registry = Registry::new(Some(&header));
    let session = store.get(&mut registry, "session-key");
    assert!(!session.is_new());
    assert_eq!(session.get("user"), Some(&Value::from("alice")));
    assert!(registry.load_error("session-key").is_none());
    Ok(())
}

#[test]
fn test_store_from_toml_config() -> Result<()> {
    let config = StoreConfig::from_toml(
        r#"
        [session_store]
        keys = ["toml-secret"]
        namespace = "web_sessions"
        lifetime_secs = 120
        codec = "json"

        [session_store.cookie]
        http_only = true
        same_site = "lax"
        "#,
    )?;
    let ts = TestStore::open_with(config)?;

    let mut session = ts.store.new_session("sid", None).session;
    let cookie = ts.store.save(&mut session)?;
    assert_eq!(ts.store.db().namespace(), "web_sessions");
    let header = cookie.to_string();
    assert!(header.contains("Max-Age=120"));
    assert!(header.contains("HttpOnly"));
    assert!(header.contains("SameSite=Lax"));
    Ok(())
}
