//! The verify and status calls over HTTP.

use super::{TestHarness, TestWallet, VAULT};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sourcing_gateway::identity::canonical_address;
use sourcing_gateway::VerifyResponse;

async fn post_verify(base_url: &str, body: &Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{base_url}/verify"))
        .json(body)
        .send()
        .await
        .expect("request sent");
    let status = response.status().as_u16();
    (status, response.json().await.expect("json body"))
}

fn body(wallet: &TestWallet, nonce: &str) -> Value {
    json!({
        "address": canonical_address(&wallet.address()),
        "signature": wallet.sign(nonce),
        "nonce": nonce,
    })
}

#[tokio::test]
async fn test_verify_granted_over_http() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry
        .seed(&wallet.address(), Utc::now() + Duration::days(2), 77);
    let served = h.serve().await;

    let (status, response) = post_verify(&served.base_url, &body(&wallet, "h-1")).await;

    assert_eq!(status, 200);
    assert_eq!(response["status"], 200);
    assert_eq!(response["tokens"], "77");
    assert!(response["expiration"].as_str().unwrap().ends_with('Z'));

    served.teardown().await;
}

#[tokio::test]
async fn test_verify_denied_over_http() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let served = h.serve().await;

    let (status, response) = post_verify(&served.base_url, &body(&wallet, "h-2")).await;

    assert_eq!(status, 402);
    let decoded: VerifyResponse = serde_json::from_value(response).unwrap();
    match decoded {
        VerifyResponse::Denied {
            tokens,
            fulfillment,
            ..
        } => {
            assert_eq!(tokens, "0");
            let fulfillment = fulfillment.expect("fulfillment present");
            assert_eq!(fulfillment.vault, canonical_address(&VAULT));
            assert_eq!(fulfillment.amount, "0.001");
        }
        other => panic!("expected denial, got {other:?}"),
    }

    served.teardown().await;
}

#[tokio::test]
async fn test_verify_with_tx_hash_over_http() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let tx = h.mine_transfer(wallet.address(), VAULT, "0.001", Utc::now(), true);
    let served = h.serve().await;

    let mut request = body(&wallet, "h-3");
    request["txHash"] = json!(tx.to_string());
    let (status, response) = post_verify(&served.base_url, &request).await;

    assert_eq!(status, 200);
    assert_eq!(response["tokens"], "1000");

    served.teardown().await;
}

#[tokio::test]
async fn test_rejected_identity_over_http() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    let served = h.serve().await;

    let mut request = body(&wallet, "h-4");
    request["address"] = json!(canonical_address(&TestWallet::random().address()));
    let (status, response) = post_verify(&served.base_url, &request).await;

    assert_eq!(status, 401);
    assert_eq!(response["status"], 401);
    assert!(response.get("tokens").is_none());

    served.teardown().await;
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let h = TestHarness::new();
    let served = h.serve().await;

    let (status, response) =
        post_verify(&served.base_url, &json!({"address": "0x00", "nonce": "n"})).await;
    assert_eq!(status, 400);
    assert_eq!(response["status"], 400);

    let (status, _) = post_verify(
        &served.base_url,
        &json!({"address": "nope", "signature": "0x00", "nonce": "n"}),
    )
    .await;
    assert_eq!(status, 400);

    served.teardown().await;
}

#[tokio::test]
async fn test_status_and_health_over_http() {
    let h = TestHarness::new();
    let wallet = TestWallet::random();
    h.registry
        .seed(&wallet.address(), Utc::now() + Duration::days(1), 5);
    let served = h.serve().await;
    let client = reqwest::Client::new();

    let status = client
        .get(format!(
            "{}/status/{}",
            served.base_url,
            canonical_address(&wallet.address())
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(status.status().as_u16(), 200);
    let status: Value = status.json().await.unwrap();
    assert_eq!(status["tokens"], "5");

    h.registry.set_offline(true);
    let outage = client
        .get(format!(
            "{}/status/{}",
            served.base_url,
            canonical_address(&wallet.address())
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(outage.status().as_u16(), 500);

    let health: Value = client
        .get(format!("{}/health", served.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    served.teardown().await;
}
