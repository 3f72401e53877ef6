mod common;

use common::{seeded_gateway, MockClient};
use modelgate::core::GatewayError;
use modelgate::llm::ChatMessage;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn failover_walks_targets_in_rule_order() {
    let client = Arc::new(MockClient::with_failures(&["p1", "p2"], &[], &[]));
    let (gateway, ids) = seeded_gateway(client.clone(), &["p1", "p2", "p3"]).await;

    let completion = gateway
        .complete_chat("fast", vec![ChatMessage::user("hello world")], vec![])
        .await
        .unwrap();

    assert_eq!(completion.provider_id, ids["p3"]);
    assert_eq!(completion.content, "hello world");
    // Two failures plus the winning call.
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhaustion_carries_attempt_count_and_last_cause() {
    let client = Arc::new(MockClient::with_failures(&["p1", "p2"], &[], &[]));
    let (gateway, _) = seeded_gateway(client, &["p1", "p2"]).await;

    let err = gateway
        .complete_chat("fast", vec![ChatMessage::user("hi")], vec![])
        .await
        .unwrap_err();

    match err {
        GatewayError::UpstreamExhausted {
            alias,
            attempts,
            last_error,
        } => {
            assert_eq!(alias, "fast");
            assert_eq!(attempts, 2);
            assert!(last_error.contains("p2 is down"));
        }
        other => panic!("expected UpstreamExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn disabled_and_deleted_providers_fail_without_upstream_calls() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, ids) = seeded_gateway(client.clone(), &["p1", "p2", "p3"]).await;

    gateway.set_provider_enabled(&ids["p1"], false).unwrap();
    gateway.delete_provider(&ids["p2"]).unwrap();

    // The rule keeps all three targets; the first two just fail validation.
    assert_eq!(gateway.get_route_rules("fast").unwrap().targets.len(), 3);

    let completion = gateway
        .complete_chat("fast", vec![ChatMessage::user("hi")], vec![])
        .await
        .unwrap();
    assert_eq!(completion.provider_id, ids["p3"]);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn metrics_record_one_outcome_per_attempt() {
    let client = Arc::new(MockClient::with_failures(&["p1"], &[], &[]));
    let (gateway, _) = seeded_gateway(client, &["p1", "p2"]).await;

    gateway
        .complete_chat("fast", vec![ChatMessage::user("one two three")], vec![])
        .await
        .unwrap();

    let snapshot = gateway.metrics_snapshot().unwrap();
    assert_eq!(snapshot.requests_total, 2);
    assert_eq!(snapshot.requests_failed, 1);
    // Loopback echoes three words; failed attempts contribute no tokens.
    assert_eq!(snapshot.prompt_tokens_total, 3);
    assert_eq!(snapshot.completion_tokens_total, 3);
    // 3 prompt tokens at $1/M + 3 completion tokens at $2/M.
    assert!((snapshot.cost_total - 9e-6).abs() < 1e-12);
}

#[tokio::test]
async fn unrouted_alias_is_unresolved_without_attempts() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client.clone(), &["p1"]).await;

    gateway.set_alias_list(vec!["fast".into(), "smart".into()]);
    let err = gateway
        .complete_chat("smart", vec![ChatMessage::user("hi")], vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unresolved(_)));
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn embed_failover_matches_chat_failover() {
    let client = Arc::new(MockClient::with_failures(&["p1"], &[], &[]));
    let (gateway, ids) = seeded_gateway(client, &["p1", "p2"]).await;

    // Route the embedding alias over the same targets.
    gateway.set_alias_list(vec!["fast".into(), "embeddings".into()]);
    gateway
        .set_route_rules(
            "embeddings",
            vec![
                modelgate::core::RouteTarget {
                    provider_id: ids["p1"].clone(),
                    model_id: "m".into(),
                },
                modelgate::core::RouteTarget {
                    provider_id: ids["p2"].clone(),
                    model_id: "m".into(),
                },
            ],
        )
        .unwrap();

    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "embed this text").unwrap();

    let response = gateway
        .embed_content(file.path().to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(response.embeddings.len(), 1);
    assert_eq!(response.usage.prompt_tokens, 3);
}
