//! Webhook delivery: at-least-once, retry schedule, signatures, DLQ.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{harness_with, support_corpus, test_config};
use tether::store::{InMemoryKvStore, InMemoryRelationalStore};
use tether::webhook::{
    sign_payload, verify_signature, DeliveryPolicy, DeliveryStatus, MockTransport, WebhookConfig,
    WebhookDispatcher,
};

async fn wait_for_status(
    dispatcher: &Arc<WebhookDispatcher>,
    subscription_id: &str,
    status: DeliveryStatus,
) -> tether::webhook::WebhookDelivery {
    for _ in 0..2000 {
        let deliveries = dispatcher
            .list_deliveries(subscription_id, Some(status))
            .await
            .unwrap();
        if let Some(d) = deliveries.into_iter().next() {
            return d;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("delivery never reached {:?}", status);
}

fn fast_dispatcher(
    transport: Arc<MockTransport>,
    schedule: Vec<Duration>,
) -> (Arc<WebhookDispatcher>, Arc<InMemoryRelationalStore>) {
    let relational = Arc::new(InMemoryRelationalStore::new());
    let kv = Arc::new(InMemoryKvStore::new());
    let config = WebhookConfig {
        schedule,
        jitter: 0.2,
        max_concurrency: 4,
        default_timeout: Duration::from_secs(1),
        skew: Duration::from_secs(300),
        tenant: "default".into(),
    };
    (
        WebhookDispatcher::new(relational.clone(), kv, transport, config),
        relational,
    )
}

/// **Scenario**: Retry then success. The first attempts receive 500, the
/// final one 200; every attempt carries a verifiable signature and an
/// incrementing X-Delivery-Attempt, and the delivery id is stable throughout.
#[tokio::test]
async fn retry_then_success_with_signatures() {
    let transport = Arc::new(MockTransport::new(vec![500, 500, 200]));
    let (dispatcher, _) = fast_dispatcher(
        transport.clone(),
        vec![Duration::from_millis(20), Duration::from_millis(40)],
    );

    let sub_id = dispatcher
        .subscribe(
            "https://receiver.test/hook",
            vec!["query.completed".into()],
            "shared-secret",
            DeliveryPolicy {
                max_attempts: 5,
                timeout_secs: 1,
            },
        )
        .await
        .unwrap();

    dispatcher
        .emit("query.completed", serde_json::json!({"query_id": "qry_1"}))
        .await
        .unwrap();

    let delivery = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Success).await;
    assert_eq!(delivery.attempt, 3);
    assert_eq!(delivery.last_response_code, Some(200));

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    for (i, call) in calls.iter().enumerate() {
        assert_eq!(call.url, "https://receiver.test/hook");
        assert_eq!(
            call.header("X-Delivery-Attempt").unwrap(),
            (i + 1).to_string()
        );
        assert_eq!(call.header("X-Event-Kind").unwrap(), "query.completed");
        assert!(call.header("X-Event-Id").unwrap().starts_with("evt_"));
        assert_eq!(call.header("X-Webhook-Id").unwrap(), sub_id);

        // Signature round-trip: sha256=HMAC(secret, ts + "." + body).
        let ts: i64 = call.header("X-Timestamp").unwrap().parse().unwrap();
        let signature = call.header("X-Signature").unwrap();
        assert_eq!(signature, sign_payload("shared-secret", ts, &call.body));
        verify_signature(
            "shared-secret",
            ts,
            &call.body,
            signature,
            Duration::from_secs(300),
            ts,
        )
        .unwrap();

        // Body format: event_id, kind, timestamp, delivery_attempt, data.
        let body: serde_json::Value = serde_json::from_str(&call.body).unwrap();
        assert_eq!(body["kind"], "query.completed");
        assert_eq!(body["delivery_attempt"], (i + 1) as u64);
        assert_eq!(body["data"]["query_id"], "qry_1");
    }

    // Retries honoured the schedule (with ±20% jitter and scheduling slack).
    let gap1 = calls[1].at.duration_since(calls[0].at);
    let gap2 = calls[2].at.duration_since(calls[1].at);
    assert!(gap1 >= Duration::from_millis(14), "gap1 {:?}", gap1);
    assert!(gap2 >= Duration::from_millis(28), "gap2 {:?}", gap2);
    assert!(gap2 > gap1, "backoff must grow: {:?} vs {:?}", gap1, gap2);
}

/// **Scenario**: A persistently failing endpoint exhausts its budget and the
/// delivery lands in the dead-letter view with the last response recorded.
#[tokio::test]
async fn exhausted_delivery_goes_dead() {
    let transport = Arc::new(MockTransport::new(vec![503]));
    let (dispatcher, _) = fast_dispatcher(
        transport.clone(),
        vec![Duration::from_millis(5), Duration::from_millis(10)],
    );

    let sub_id = dispatcher
        .subscribe(
            "https://receiver.test/hook",
            vec!["query.*".into()],
            "s",
            DeliveryPolicy {
                max_attempts: 3,
                timeout_secs: 1,
            },
        )
        .await
        .unwrap();
    dispatcher
        .emit("query.completed", serde_json::json!({}))
        .await
        .unwrap();

    let dead = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Dead).await;
    assert_eq!(dead.attempt, 3);
    assert_eq!(dead.last_response_code, Some(503));
    assert_eq!(transport.calls().len(), 3);

    let dlq = dispatcher.dead_deliveries().await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].id, dead.id);
}

/// **Scenario**: Non-retryable 4xx dead-ends immediately; 408 and 429 retry.
#[tokio::test]
async fn status_code_classification() {
    // 404: one attempt, straight to dead.
    let transport = Arc::new(MockTransport::new(vec![404]));
    let (dispatcher, _) = fast_dispatcher(transport.clone(), vec![Duration::from_millis(5)]);
    let sub_id = dispatcher
        .subscribe("https://r.test", vec!["query.*".into()], "s", DeliveryPolicy::default())
        .await
        .unwrap();
    dispatcher
        .emit("query.completed", serde_json::json!({}))
        .await
        .unwrap();
    let dead = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Dead).await;
    assert_eq!(dead.attempt, 1);
    assert_eq!(transport.calls().len(), 1);

    // 429 then 200: retried.
    let transport = Arc::new(MockTransport::new(vec![429, 200]));
    let (dispatcher, _) = fast_dispatcher(transport.clone(), vec![Duration::from_millis(5)]);
    let sub_id = dispatcher
        .subscribe("https://r.test", vec!["query.*".into()], "s", DeliveryPolicy::default())
        .await
        .unwrap();
    dispatcher
        .emit("query.completed", serde_json::json!({}))
        .await
        .unwrap();
    let ok = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Success).await;
    assert_eq!(ok.attempt, 2);
}

/// **Scenario**: Between attempts a delivery reads `failed` with the retry
/// time recorded; the scheduled retry then succeeds under the same id.
#[tokio::test]
async fn failed_status_between_attempts() {
    let transport = Arc::new(MockTransport::new(vec![500, 200]));
    let (dispatcher, _) = fast_dispatcher(transport, vec![Duration::from_millis(300)]);
    let sub_id = dispatcher
        .subscribe(
            "https://r.test",
            vec!["query.*".into()],
            "s",
            DeliveryPolicy::default(),
        )
        .await
        .unwrap();
    dispatcher
        .emit("query.completed", serde_json::json!({}))
        .await
        .unwrap();

    let failed = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Failed).await;
    assert_eq!(failed.attempt, 1);
    assert_eq!(failed.last_response_code, Some(500));
    assert!(failed.next_retry_at.is_some());

    let ok = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Success).await;
    assert_eq!(ok.attempt, 2);
    assert_eq!(ok.id, failed.id);
}

/// **Invariant**: At-least-once — every persisted event with a matching
/// subscription produces at least one attempt; non-matching kinds produce
/// none.
#[tokio::test]
async fn at_least_once_per_matching_subscription() {
    let transport = Arc::new(MockTransport::new(vec![200]));
    let (dispatcher, relational) =
        fast_dispatcher(transport.clone(), vec![Duration::from_millis(5)]);

    let sub_id = dispatcher
        .subscribe(
            "https://r.test",
            vec!["document.*".into()],
            "s",
            DeliveryPolicy::default(),
        )
        .await
        .unwrap();

    let matched = dispatcher
        .emit("document.ingested", serde_json::json!({"doc": 1}))
        .await
        .unwrap();
    let unmatched = dispatcher
        .emit("session.cleared", serde_json::json!({}))
        .await
        .unwrap();

    wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Success).await;
    assert_eq!(transport.calls().len(), 1);

    // Both events were durably persisted before fan-out.
    use tether::store::RelationalStore;
    assert!(relational.get_event(&matched.id).await.unwrap().is_some());
    assert!(relational.get_event(&unmatched.id).await.unwrap().is_some());
    assert!(dispatcher
        .list_deliveries(&sub_id, None)
        .await
        .unwrap()
        .iter()
        .all(|d| d.event_id == matched.id));
}

/// **Scenario**: Manual retry re-enqueues a dead delivery with a fresh budget
/// and the same delivery id.
#[tokio::test]
async fn manual_retry_from_dlq() {
    let transport = Arc::new(MockTransport::new(vec![500, 500, 200]));
    let (dispatcher, _) = fast_dispatcher(transport.clone(), vec![Duration::from_millis(5)]);
    let sub_id = dispatcher
        .subscribe(
            "https://r.test",
            vec!["query.*".into()],
            "s",
            DeliveryPolicy {
                max_attempts: 2,
                timeout_secs: 1,
            },
        )
        .await
        .unwrap();
    dispatcher
        .emit("query.completed", serde_json::json!({}))
        .await
        .unwrap();

    let dead = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Dead).await;
    dispatcher.retry(&dead.id).await.unwrap();
    let ok = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Success).await;
    assert_eq!(ok.id, dead.id, "delivery id is stable across retries");
}

/// **Scenario**: Incoming webhook verification enforces the signature, the
/// skew window, and replay protection.
#[tokio::test]
async fn incoming_verification() {
    let transport = Arc::new(MockTransport::new(vec![200]));
    let (dispatcher, _) = fast_dispatcher(transport, vec![Duration::from_millis(5)]);
    let sub_id = dispatcher
        .subscribe("https://r.test", vec!["query.*".into()], "incoming-secret", DeliveryPolicy::default())
        .await
        .unwrap();

    let ts = chrono::Utc::now().timestamp();
    let body = r#"{"ping":true}"#;
    let signature = sign_payload("incoming-secret", ts, body);

    dispatcher
        .verify_incoming(&sub_id, ts, body, &signature, "dlv_in_1")
        .await
        .unwrap();
    // Replay of the same delivery id is rejected.
    assert!(dispatcher
        .verify_incoming(&sub_id, ts, body, &signature, "dlv_in_1")
        .await
        .is_err());
    // Tampered body is rejected.
    assert!(dispatcher
        .verify_incoming(&sub_id, ts, r#"{"ping":false}"#, &signature, "dlv_in_2")
        .await
        .is_err());
}

/// **Scenario**: A query through the full service emits query.completed to a
/// subscriber.
#[tokio::test]
async fn query_emits_event_through_service() {
    let h = harness_with(
        test_config(),
        support_corpus(),
        "Use the reset link on the sign-in page.",
        vec![200],
    )
    .await;

    let sub_id = h
        .service
        .subscribe(
            "https://receiver.test/hook",
            vec!["query.completed".into()],
            "secret",
            DeliveryPolicy::default(),
        )
        .await
        .unwrap();

    h.service
        .query(tether::QueryRequest {
            question: "How to reset my password?".into(),
            user_id: "u1".into(),
            session_id: None,
        })
        .await
        .unwrap();

    let dispatcher = h.service.dispatcher();
    let delivery = wait_for_status(&dispatcher, &sub_id, DeliveryStatus::Success).await;
    assert_eq!(delivery.attempt, 1);
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&calls[0].body).unwrap();
    assert_eq!(body["kind"], "query.completed");
    assert_eq!(body["data"]["action"], "auto_reply");
}
