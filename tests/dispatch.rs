//! Service kind dispatch and Tor version fallback

mod common;

use common::{MockControl, Step};
use rustonion::onion::{
    AuthBasic, AuthConfig, AuthStealth, CreateOptions, KeyRequest, ServiceState,
};
use rustonion::tor::{ControlConfStore, HiddenServiceStore};
use rustonion::{create_onion_service, OnionError, ServiceKind};
use std::fs;
use std::sync::Arc;

const SID: &str = "dddd2345abcdefghijklmnopqrstuvwxyzabcdefghijklmnopqrstuv";

#[tokio::test]
async fn test_current_tor_creates_ephemeral() {
    let control = Arc::new(MockControl::current(vec![
        Step::ok("ADD_ONION", &format!("ServiceID={}", SID)),
        Step::ok("DEL_ONION", "OK"),
    ]));
    let mut store = ControlConfStore::new(control.clone());

    let options = CreateOptions {
        wait_for_upload: false,
        ..Default::default()
    };
    let mut service = create_onion_service(
        control.clone(),
        &mut store,
        ServiceKind::Ephemeral,
        &["80 127.0.0.1:8080"],
        None,
        options,
    )
    .await
    .unwrap();

    assert_eq!(service.kind(), ServiceKind::Ephemeral);
    assert_eq!(service.hostname(), format!("{}.onion", SID));
    assert_eq!(service.ports().len(), 1);

    service.remove(&mut store).await.unwrap();
    assert_eq!(service.state(), ServiceState::Removed);
    assert!(store.hidden_services().is_empty());
}

#[tokio::test]
async fn test_old_tor_falls_back_to_filesystem() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("hs");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("hostname"), format!("{}.onion\n", SID)).unwrap();

    let control = Arc::new(MockControl::new(
        "0.2.6.10 (git-1234)",
        vec![Step::ok("SETCONF", "OK")],
    ));
    let mut store = ControlConfStore::new(control.clone());

    let options = CreateOptions {
        wait_for_upload: false,
        directory: Some(dir.clone()),
        ..Default::default()
    };
    let service = create_onion_service(
        control.clone(),
        &mut store,
        ServiceKind::Ephemeral,
        &["80 127.0.0.1:8080"],
        None,
        options,
    )
    .await
    .unwrap();

    assert_eq!(service.kind(), ServiceKind::Filesystem);
    assert_eq!(service.service_id(), SID);
    assert!(control.commands()[0].starts_with("SETCONF HiddenServiceDir="));
}

#[tokio::test]
async fn test_old_tor_with_discard_key_fails() {
    let control = Arc::new(MockControl::new("0.2.6.10", Vec::new()));
    let mut store = ControlConfStore::new(control.clone());

    let options = CreateOptions {
        key: KeyRequest::Discard,
        ..Default::default()
    };
    let err = create_onion_service(
        control.clone(),
        &mut store,
        ServiceKind::Ephemeral,
        &["80 127.0.0.1:8080"],
        None,
        options,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, OnionError::Validation(ref m) if m.contains("discard key")));
    assert!(control.commands().is_empty());
}

#[tokio::test]
async fn test_unparseable_version_is_treated_as_current() {
    let control = Arc::new(MockControl::new(
        "weird-build",
        vec![Step::ok("ADD_ONION", &format!("ServiceID={}", SID))],
    ));
    let mut store = ControlConfStore::new(control.clone());

    let options = CreateOptions {
        wait_for_upload: false,
        ..Default::default()
    };
    let service = create_onion_service(
        control.clone(),
        &mut store,
        ServiceKind::Ephemeral,
        &["80 127.0.0.1:8080"],
        None,
        options,
    )
    .await
    .unwrap();
    assert_eq!(service.kind(), ServiceKind::Ephemeral);
}

#[tokio::test]
async fn test_auth_kind_without_auth_is_rejected() {
    let control = Arc::new(MockControl::current(Vec::new()));
    let mut store = ControlConfStore::new(control.clone());

    let err = create_onion_service(
        control.clone(),
        &mut store,
        ServiceKind::EphemeralAuth,
        &["80 127.0.0.1:8080"],
        None,
        CreateOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(err.is_validation());

    let auth = AuthConfig::from(AuthBasic::new(["alice"]).unwrap());
    let err = create_onion_service(
        control.clone(),
        &mut store,
        ServiceKind::Filesystem,
        &["80 127.0.0.1:8080"],
        Some(auth),
        CreateOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(err.is_validation());
    assert!(control.commands().is_empty());
}

#[tokio::test]
async fn test_old_tor_still_rejects_ephemeral_stealth() {
    let control = Arc::new(MockControl::new("0.2.8.0", Vec::new()));
    let mut store = ControlConfStore::new(control.clone());

    let auth = AuthConfig::from(AuthStealth::new(["alice"]).unwrap());
    let err = create_onion_service(
        control.clone(),
        &mut store,
        ServiceKind::EphemeralAuth,
        &["80 127.0.0.1:8080"],
        Some(auth),
        CreateOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, OnionError::UnsupportedAuthType(_)), "{:?}", err);
    assert!(control.commands().is_empty());
    assert!(store.hidden_services().is_empty());
}
