//! Access decisions across all tiers.

use super::{TestHarness, TestWallet, VAULT};
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use sourcing_gateway::identity::canonical_address;
use sourcing_gateway::registry::{capital_key, expiry_key};
use sourcing_gateway::gateway::ScanThrottle;
use sourcing_gateway::{
    AccessGateway, Decision, DenialReason, Error, GatewayEvent, GrantBasis, Tier,
};
use std::sync::atomic::Ordering;

/// Current time truncated to whole seconds, as block timestamps are.
fn now_secs() -> DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap()
}

fn drain(events: &mut sourcing_gateway::GatewayEventsChannel) -> Vec<GatewayEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_expired_record_with_recent_scanned_payment_is_granted() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let paid_at = now_secs() - Duration::days(2);

    h.registry
        .seed(&wallet.address(), Utc::now() - Duration::days(1), 0);
    h.index_transfer(wallet.address(), VAULT, "0.001", paid_at);

    let outcome = h.gateway.verify(&wallet.request("a-1", None)).await.unwrap();

    let expected_expiry = paid_at + Duration::days(30);
    match &outcome.decision {
        Decision::Granted {
            expires_on,
            capital,
            basis,
        } => {
            assert_eq!(*expires_on, expected_expiry);
            assert_eq!(*capital, 1000);
            assert!(matches!(basis, GrantBasis::Payment { .. }));
        }
        other => panic!("expected grant, got {other:?}"),
    }

    outcome.sync.expect("write-back scheduled").wait().await.unwrap();
    assert_eq!(
        h.registry.value(&capital_key(&wallet.address())).as_deref(),
        Some("1000")
    );
    assert_eq!(
        h.registry.value(&expiry_key(&wallet.address())),
        Some(expected_expiry.to_rfc3339_opts(SecondsFormat::Millis, true))
    );
}

#[tokio::test]
async fn test_no_payment_anywhere_is_denied_with_fulfillment() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();

    let outcome = h.gateway.verify(&wallet.request("b-1", None)).await.unwrap();

    match outcome.decision {
        Decision::Denied {
            capital,
            fulfillment,
            ..
        } => {
            assert_eq!(capital, 0);
            let fulfillment = fulfillment.expect("payment instructions");
            assert_eq!(fulfillment.vault, canonical_address(&VAULT));
            assert_eq!(fulfillment.amount, "0.001");
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert!(outcome.sync.is_none());
    assert_eq!(h.registry.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_denial_reports_capital_on_file() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry
        .seed(&wallet.address(), Utc::now() - Duration::days(3), 250);

    let outcome = h.gateway.verify(&wallet.request("b-2", None)).await.unwrap();
    assert!(!outcome.decision.is_granted());
    assert_eq!(outcome.decision.capital(), 250);
}

#[tokio::test]
async fn test_underpaid_reference_is_not_found_and_denied() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let paid_at = now_secs();

    let tx = h.mine_transfer(wallet.address(), VAULT, "0.0005", paid_at, true);
    h.index_transfer(wallet.address(), VAULT, "0.0005", paid_at);

    let mut events = h.gateway.subscribe_events();
    let outcome = h
        .gateway
        .verify(&wallet.request("c-1", Some(tx)))
        .await
        .unwrap();

    assert!(!outcome.decision.is_granted());
    assert!(h.chain.calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.indexer.calls.load(Ordering::SeqCst), 1);

    let misses: Vec<Tier> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            GatewayEvent::TierMiss { tier, .. } => Some(tier),
            _ => None,
        })
        .collect();
    assert_eq!(misses, vec![Tier::Registry, Tier::Reference, Tier::LedgerScan]);
}

#[tokio::test]
async fn test_active_record_never_invokes_prover() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let expiry = now_secs() + Duration::days(10);
    h.registry.seed(&wallet.address(), expiry, 420);

    for nonce in ["d-1", "d-2", "d-3"] {
        let outcome = h.gateway.verify(&wallet.request(nonce, None)).await.unwrap();
        assert_eq!(
            outcome.decision,
            Decision::Granted {
                expires_on: expiry,
                capital: 420,
                basis: GrantBasis::Registry,
            }
        );
        assert!(outcome.sync.is_none());
    }

    assert_eq!(h.prover_calls(), 0);
    assert_eq!(h.registry.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reference_payment_grants_then_registry_serves() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let tx = h.mine_transfer(wallet.address(), VAULT, "0.002", now_secs(), true);

    let first = h
        .gateway
        .verify(&wallet.request("r-1", Some(tx)))
        .await
        .unwrap();
    assert!(matches!(
        first.decision,
        Decision::Granted {
            capital: 1000,
            basis: GrantBasis::Payment { tx_hash },
            ..
        } if tx_hash == tx
    ));
    assert_eq!(h.indexer.calls.load(Ordering::SeqCst), 0);
    first.sync.unwrap().wait().await.unwrap();

    let calls_before = h.prover_calls();
    let second = h.gateway.verify(&wallet.request("r-2", None)).await.unwrap();
    assert!(matches!(
        second.decision,
        Decision::Granted {
            basis: GrantBasis::Registry,
            ..
        }
    ));
    assert_eq!(h.prover_calls(), calls_before);
}

#[tokio::test]
async fn test_reverted_reference_falls_back_to_scan() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let reverted = h.mine_transfer(wallet.address(), VAULT, "0.001", now_secs(), false);
    let scanned = h.index_transfer(wallet.address(), VAULT, "0.001", now_secs());

    let outcome = h
        .gateway
        .verify(&wallet.request("rv-1", Some(reverted)))
        .await
        .unwrap();

    assert!(matches!(
        outcome.decision,
        Decision::Granted {
            basis: GrantBasis::Payment { tx_hash },
            ..
        } if tx_hash == scanned
    ));
}

#[tokio::test]
async fn test_payment_by_another_identity_is_not_credited() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let payer = TestWallet::random();
    let tx = h.mine_transfer(payer.address(), VAULT, "0.01", now_secs(), true);

    let outcome = h
        .gateway
        .verify(&wallet.request("o-1", Some(tx)))
        .await
        .unwrap();
    assert!(!outcome.decision.is_granted());
}

#[tokio::test]
async fn test_payment_floor_holds_in_history_scan() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.index_transfer(wallet.address(), VAULT, "0.000999999999999999", now_secs());
    h.index_transfer(wallet.address(), near_vault(), "1", now_secs());

    let outcome = h.gateway.verify(&wallet.request("f-1", None)).await.unwrap();
    assert!(!outcome.decision.is_granted());
}

/// An address that differs from the vault in one byte.
fn near_vault() -> alloy::primitives::Address {
    let mut bytes = VAULT.0 .0;
    bytes[19] ^= 1;
    alloy::primitives::Address::from(bytes)
}

#[tokio::test]
async fn test_refill_replaces_previous_capital() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry
        .seed(&wallet.address(), Utc::now() - Duration::hours(1), 7);
    h.index_transfer(wallet.address(), VAULT, "0.5", now_secs());

    let outcome = h.gateway.verify(&wallet.request("x-1", None)).await.unwrap();
    assert_eq!(outcome.decision.capital(), 1000);
    outcome.sync.unwrap().wait().await.unwrap();
    assert_eq!(
        h.registry.value(&capital_key(&wallet.address())).as_deref(),
        Some("1000")
    );
}

#[tokio::test]
async fn test_signature_is_bound_to_its_nonce() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry
        .seed(&wallet.address(), Utc::now() + Duration::days(5), 1);

    let mut request = wallet.request("nonce-one", None);
    request.nonce = "nonce-two".to_string();

    let err = h.gateway.verify(&request).await.unwrap_err();
    assert!(err.is_identity_failure());
    assert_eq!(err.status_code(), 401);
    assert_eq!(h.registry.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_claimed_identity_must_match_signer() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let victim = TestWallet::random();
    h.registry
        .seed(&victim.address(), Utc::now() + Duration::days(5), 900);

    let mut request = wallet.request("steal", None);
    request.address = canonical_address(&victim.address());

    assert!(matches!(
        h.gateway.verify(&request).await,
        Err(Error::IdentityMismatch { .. })
    ));
    assert_eq!(h.prover_calls(), 0);
    assert_eq!(h.registry.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_registry_outage_does_not_deny_paying_identity() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry.set_offline(true);
    h.index_transfer(wallet.address(), VAULT, "0.001", now_secs());

    let outcome = h.gateway.verify(&wallet.request("u-1", None)).await.unwrap();
    assert!(outcome.decision.is_granted());
    assert_eq!(outcome.decision.capital(), 1000);
}

#[tokio::test]
async fn test_corrupt_registry_escalates_with_unknown_capital() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry.set_raw("[\"not\", \"an\", \"object\"]");

    let outcome = h.gateway.verify(&wallet.request("k-1", None)).await.unwrap();
    assert!(matches!(
        outcome.decision,
        Decision::Denied {
            capital: 0,
            reason: DenialReason::CapitalUnknown,
            fulfillment: Some(_),
        }
    ));
    assert!(outcome.decision.denial_message().unwrap().contains("unknown"));
    assert_eq!(h.indexer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_write_is_reconciled_on_next_request() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry.set_reject_writes(true);
    h.index_transfer(wallet.address(), VAULT, "0.001", now_secs());

    let mut events = h.gateway.subscribe_events();
    let first = h.gateway.verify(&wallet.request("w-1", None)).await.unwrap();
    assert!(first.decision.is_granted());
    assert!(first.sync.unwrap().wait().await.is_err());
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, GatewayEvent::SyncFailed { .. })));
    assert!(h.registry.value(&capital_key(&wallet.address())).is_none());

    h.registry.set_reject_writes(false);
    let second = h.gateway.verify(&wallet.request("w-2", None)).await.unwrap();
    assert!(second.decision.is_granted());
    second.sync.unwrap().wait().await.unwrap();
    assert_eq!(
        h.registry.value(&capital_key(&wallet.address())).as_deref(),
        Some("1000")
    );
}

#[tokio::test]
async fn test_scanned_payer_is_granted_again_before_write_lands() {
    let h = TestHarness::new();
    let mut components = h.components();
    components.throttle = ScanThrottle::default();
    let gateway = AccessGateway::new(components);

    let wallet = TestWallet::random();
    h.registry.set_reject_writes(true);
    h.index_transfer(wallet.address(), VAULT, "0.001", now_secs());

    let first = gateway.verify(&wallet.request("t-1", None)).await.unwrap();
    assert!(first.decision.is_granted());
    assert!(first.sync.unwrap().wait().await.is_err());

    let second = gateway.verify(&wallet.request("t-2", None)).await.unwrap();
    assert!(second.decision.is_granted());
    assert_eq!(second.decision.capital(), 1000);
    assert_eq!(h.indexer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_replayed_grant_is_rejected() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry
        .seed(&wallet.address(), Utc::now() + Duration::days(5), 3);

    let request = wallet.request("once", None);
    assert!(h.gateway.verify(&request).await.is_ok());
    assert!(matches!(
        h.gateway.verify(&request).await,
        Err(Error::NonceReused)
    ));
}

#[tokio::test]
async fn test_status_reads_registry_only() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let address = canonical_address(&wallet.address());
    h.index_transfer(wallet.address(), VAULT, "0.001", now_secs());

    let decision = h.gateway.status(&address).await.unwrap();
    assert!(!decision.is_granted());
    assert_eq!(h.prover_calls(), 0);

    h.registry.set_offline(true);
    assert_eq!(
        h.gateway.status(&address).await.unwrap_err().status_code(),
        500
    );
}
