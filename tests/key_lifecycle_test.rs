mod common;

use authswitch::application::KeyManager;
use authswitch::config::SwitchConfig;
use authswitch::domain::authorization::{AuthorizationStage, Decision, ResponseCode};
use authswitch::domain::key::{KeyState, RevocationReason, slots};
use authswitch::domain::ports::Clock;
use authswitch::error::{KeyStateError, SwitchError};
use authswitch::infrastructure::hsm::{CryptoService, SigningKeyPair};
use authswitch::infrastructure::in_memory::InMemoryKeyDistributor;
use authswitch::domain::message::{FIELD_AUTH_CODE, FIELD_MAC, FIELD_RESPONSE_CODE, FIELD_SIGNATURE};
use authswitch::interfaces::iso8583;
use chrono::Duration;
use common::{Harness, RequestBuilder, harness};
use std::sync::Arc;

async fn manager(h: &Harness) -> (KeyManager, Arc<InMemoryKeyDistributor>) {
    let signer = Arc::new(SigningKeyPair::from_seed([9; 32]));
    let distributor = Arc::new(InMemoryKeyDistributor::with_verifying_key(signer.verifying_key()));
    distributor.register("T1", true).await;
    distributor.register("HOST", true).await;
    let manager = KeyManager::new(
        h.keys.clone(),
        distributor.clone(),
        signer,
        SwitchConfig::default(),
    );
    (manager, distributor)
}

/// A request sealed under an explicit key rather than the current one.
fn sealed_with(h: &Harness, stan: &str, key: &authswitch::domain::key::Key) -> Vec<u8> {
    let mut message = RequestBuilder::new(stan, 4250, h.clock.now()).message(h);
    CryptoService::new().seal_message(&mut message, key).unwrap();
    iso8583::encode(&message).unwrap()
}

#[tokio::test]
async fn test_rotated_terminal_key_takes_over() {
    let h = harness().await;
    let (manager, distributor) = manager(&h).await;
    let old = h.keys.current(&slots::terminal_mac("T1")).unwrap();

    let report = manager.rotate_key(old.id).await.unwrap();
    assert_eq!(report.previous, old.id);
    assert_eq!(report.version, old.version + 1);
    assert!(report.quorum_reached);
    assert_eq!(report.delivered.len(), 2);
    assert_eq!(distributor.received("T1").await.len(), 1);

    let new = h.keys.current(&slots::terminal_mac("T1")).unwrap();
    assert_eq!(new.id, report.new_key);
    assert_eq!(new.kcv, report.kcv);
    assert_eq!(h.keys.get(old.id).unwrap().state, KeyState::Revoked);

    let stale = sealed_with(&h, "000001", &old);
    let outcome = h.switch.authorize(&stale).await;
    assert_eq!(outcome.result.response_code, ResponseCode::DoNotHonor);

    let fresh = sealed_with(&h, "000002", &new);
    let outcome = h.switch.authorize(&fresh).await;
    assert_eq!(outcome.result.response_code, ResponseCode::Approved);
}

#[tokio::test]
async fn test_rotation_without_reachable_endpoints_keeps_current_key() {
    let h = harness().await;
    let (manager, distributor) = manager(&h).await;
    distributor.set_online("T1", false).await.unwrap();
    distributor.set_online("HOST", false).await.unwrap();
    let current = h.keys.current(&slots::terminal_mac("T1")).unwrap();

    let err = manager.rotate_key(current.id).await.unwrap_err();
    assert!(matches!(
        err,
        SwitchError::KeyState(KeyStateError::NotDistributed(_))
    ));
    assert_eq!(h.keys.current(&slots::terminal_mac("T1")).unwrap().id, current.id);
    assert!(h.keys.pending(&slots::terminal_mac("T1")).is_none());

    let raw = RequestBuilder::new("000003", 4250, h.clock.now()).build(&h);
    assert!(h.switch.authorize(&raw).await.result.is_approved());
}

#[tokio::test]
async fn test_compromised_signing_key_is_replaced_at_once() {
    let h = harness().await;
    let (manager, _) = manager(&h).await;
    let old = h.keys.current(slots::RESPONSE_SIGNING).unwrap();

    let report = manager.compromise_key(old.id).await.unwrap();
    assert_eq!(report.version, old.version + 100);

    let revoked = h.keys.get(old.id).unwrap();
    assert_eq!(revoked.revocation_reason, Some(RevocationReason::Compromised));
    let replacement = h.keys.current(slots::RESPONSE_SIGNING).unwrap();
    assert_eq!(
        replacement.expires_at,
        Some(h.clock.now() + Duration::days(7))
    );

    // responses are now signed under the replacement
    let raw = RequestBuilder::new("000004", 4250, h.clock.now()).build(&h);
    let outcome = h.switch.authorize(&raw).await;
    let response = iso8583::decode(&outcome.response).unwrap();
    let crypto = CryptoService::new();
    crypto
        .verify_response(&response, &*replacement, h.clock.now(), Duration::seconds(60))
        .unwrap();
    assert!(
        crypto
            .verify_response(&response, &*old, h.clock.now(), Duration::seconds(60))
            .is_err()
    );
}

#[tokio::test]
async fn test_approval_without_signing_key_becomes_malfunction() {
    let h = harness().await;
    let (manager, _) = manager(&h).await;
    let rsk = h.keys.current(slots::RESPONSE_SIGNING).unwrap();
    manager
        .revoke_key(rsk.id, RevocationReason::Administrative("hsm slot lost".into()))
        .unwrap();

    let raw = RequestBuilder::new("000007", 4250, h.clock.now()).build(&h);
    let outcome = h.switch.authorize(&raw).await;
    assert_eq!(outcome.result.response_code, ResponseCode::SystemMalfunction);
    assert_eq!(outcome.result.decision, Decision::Decline);
    assert_eq!(outcome.stage, AuthorizationStage::Declined);
    assert!(outcome.result.auth_code.is_none());
    assert!(outcome.result.signature.is_none());

    let response = iso8583::decode(&outcome.response).unwrap();
    assert_eq!(response.field(FIELD_RESPONSE_CODE), Some("96"));
    assert!(!response.has(FIELD_AUTH_CODE));
    assert!(!response.has(FIELD_SIGNATURE));
    // still sealed for the terminal
    assert!(response.has(FIELD_MAC));
}

#[tokio::test]
async fn test_compromise_during_pending_rotation_takes_over() {
    let h = harness().await;
    let (manager, _) = manager(&h).await;
    let tak = h.keys.current(&slots::terminal_mac("T1")).unwrap();
    let planned = h.keys.rotate(tak.id).unwrap();

    let report = manager.compromise_key(tak.id).await.unwrap();
    let current = h.keys.current(&slots::terminal_mac("T1")).unwrap();
    assert_eq!(current.id, report.new_key);
    assert_eq!(
        h.keys.get(planned.id).unwrap().revocation_reason,
        Some(RevocationReason::Compromised)
    );

    let stale = sealed_with(&h, "000008", &tak);
    assert_eq!(
        h.switch.authorize(&stale).await.result.response_code,
        ResponseCode::DoNotHonor
    );
    let fresh = sealed_with(&h, "000009", &current);
    assert!(h.switch.authorize(&fresh).await.result.is_approved());
}

#[tokio::test]
async fn test_zone_master_compromise_is_refused() {
    let h = harness().await;
    let (manager, distributor) = manager(&h).await;
    let zmk = h.keys.current(slots::ZONE_MASTER).unwrap();

    let err = manager.compromise_key(zmk.id).await.unwrap_err();
    assert!(matches!(
        err,
        SwitchError::KeyState(KeyStateError::NoWrappingKey(_))
    ));
    assert_eq!(h.keys.current(slots::ZONE_MASTER).unwrap().id, zmk.id);
    assert_eq!(h.keys.history(slots::ZONE_MASTER).len(), 1);
    assert!(distributor.received("T1").await.is_empty());
}

#[tokio::test]
async fn test_revoked_terminal_key_fails_closed() {
    let h = harness().await;
    let (manager, _) = manager(&h).await;
    let tak = h.keys.current(&slots::terminal_mac("T1")).unwrap();

    manager
        .revoke_key(tak.id, RevocationReason::Administrative("terminal retired".into()))
        .unwrap();
    let err = manager.rotate_key(tak.id).await.unwrap_err();
    assert!(matches!(err, SwitchError::KeyState(KeyStateError::Revoked(_))));

    let raw = sealed_with(&h, "000005", &tak);
    let outcome = h.switch.authorize(&raw).await;
    assert_eq!(outcome.result.response_code, ResponseCode::SystemMalfunction);
}

#[tokio::test]
async fn test_expired_terminal_key_fails_closed() {
    let h = harness().await;
    let tak = h.keys.current(&slots::terminal_mac("T1")).unwrap();
    h.clock.advance(Duration::days(31));

    let raw = sealed_with(&h, "000006", &tak);
    let outcome = h.switch.authorize(&raw).await;
    assert_eq!(outcome.result.response_code, ResponseCode::SystemMalfunction);
}
