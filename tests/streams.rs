mod common;

use common::{seeded_gateway, MockClient};
use modelgate::core::stream::ReplyChunk;
use modelgate::core::GatewayError;
use modelgate::llm::ToolDefinition;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn drain(gateway: &modelgate::core::Gateway, stream_id: &str) -> Vec<ReplyChunk> {
    let mut chunks = Vec::new();
    loop {
        let chunk = gateway.stream_reply(stream_id, Some(1_000)).await.unwrap();
        let done = chunk.done;
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if done {
            return chunks;
        }
    }
}

fn tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: String::new(),
        parameters: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn stream_lifecycle_create_ask_drain_close() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client, &["p1"]).await;

    let stream_id = gateway.create_stream("fast", None).unwrap();
    gateway
        .ask_stream(&stream_id, "alpha beta gamma".into(), vec![])
        .await
        .unwrap();

    let chunks = drain(&gateway, &stream_id).await;
    let text: String = chunks.iter().filter_map(|c| c.chunk.clone()).collect();
    assert_eq!(text, "alpha beta gamma");

    let terminal = chunks.last().unwrap();
    assert!(terminal.done);
    assert!(terminal.error.is_none());
    assert_eq!(terminal.usage.unwrap().completion_tokens, 3);

    // Delivering the terminal chunk closed the stream.
    let err = gateway
        .ask_stream(&stream_id, "more".into(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn text_deltas_arrive_before_the_tool_call() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client, &["p1"]).await;

    let stream_id = gateway.create_stream("fast", None).unwrap();
    gateway
        .ask_stream(&stream_id, "run the search".into(), vec![tool("search")])
        .await
        .unwrap();

    let chunks = drain(&gateway, &stream_id).await;
    let last_text = chunks.iter().rposition(|c| c.chunk.is_some()).unwrap();
    let tool_at = chunks
        .iter()
        .position(|c| c.tool_call.is_some())
        .expect("tool call chunk");
    assert!(last_text < tool_at, "text must precede the tool call");
    assert_eq!(chunks[tool_at].tool_call.as_ref().unwrap().name, "search");
}

#[tokio::test]
async fn tool_snapshot_is_replaced_wholesale_per_ask() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client, &["p1"]).await;

    // An empty tool list means no tools this turn.
    let stream_id = gateway.create_stream("fast", None).unwrap();
    gateway
        .ask_stream(&stream_id, "no tools here".into(), vec![])
        .await
        .unwrap();
    let chunks = drain(&gateway, &stream_id).await;
    assert!(chunks.iter().all(|c| c.tool_call.is_none()));
}

#[tokio::test]
async fn ask_while_generating_is_rejected() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client, &["p1"]).await;

    let stream_id = gateway.create_stream("fast", None).unwrap();
    gateway
        .ask_stream(&stream_id, "first question".into(), vec![])
        .await
        .unwrap();

    // The generation may finish fast; only a Validation error counts, and
    // only while chunks are still pending.
    match gateway.ask_stream(&stream_id, "second".into(), vec![]).await {
        Err(GatewayError::Validation(msg)) => assert!(msg.contains("generating")),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(()) => {}
    }
}

#[tokio::test]
async fn reply_wait_is_bounded_and_returns_empty() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client, &["p1"]).await;

    let stream_id = gateway.create_stream("fast", None).unwrap();
    let started = Instant::now();
    let chunk = gateway.stream_reply(&stream_id, Some(200)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(chunk.is_empty());
    assert!(elapsed >= Duration::from_millis(190));
    assert!(elapsed < Duration::from_millis(600));
}

#[tokio::test]
async fn cancel_frees_the_stream_and_is_idempotent() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client, &["p1"]).await;

    let stream_id = gateway.create_stream("fast", None).unwrap();
    gateway
        .ask_stream(&stream_id, "long running".into(), vec![])
        .await
        .unwrap();

    gateway.cancel_stream(&stream_id).await.unwrap();
    gateway.cancel_stream(&stream_id).await.unwrap();
    gateway.cancel_stream("never-existed").await.unwrap();

    let err = gateway.stream_reply(&stream_id, Some(0)).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn stream_open_fails_over_but_mid_stream_failure_terminates() {
    // p1 refuses to open; p2 opens and then drops mid-stream.
    let client = Arc::new(MockClient::with_failures(&[], &["p1"], &["p2"]));
    let (gateway, _) = seeded_gateway(client, &["p1", "p2"]).await;

    let stream_id = gateway.create_stream("fast", None).unwrap();
    gateway
        .ask_stream(&stream_id, "fragile".into(), vec![])
        .await
        .unwrap();

    let chunks = drain(&gateway, &stream_id).await;
    // The partial delta from p2 arrives, then the terminal error chunk.
    let text: String = chunks.iter().filter_map(|c| c.chunk.clone()).collect();
    assert_eq!(text, "partial ");

    let terminal = chunks.last().unwrap();
    assert!(terminal.done);
    assert!(terminal
        .error
        .as_ref()
        .unwrap()
        .contains("dropped the stream"));
}

#[tokio::test]
async fn stream_open_exhaustion_surfaces_as_error_chunk() {
    let client = Arc::new(MockClient::with_failures(&[], &["p1", "p2"], &[]));
    let (gateway, _) = seeded_gateway(client, &["p1", "p2"]).await;

    let stream_id = gateway.create_stream("fast", None).unwrap();
    gateway
        .ask_stream(&stream_id, "doomed".into(), vec![])
        .await
        .unwrap();

    let chunks = drain(&gateway, &stream_id).await;
    assert_eq!(chunks.len(), 1);
    let terminal = &chunks[0];
    assert!(terminal.done);
    assert!(terminal.error.as_ref().unwrap().contains("exhausted"));
}

#[tokio::test]
async fn create_stream_requires_resolvable_alias() {
    let client = Arc::new(MockClient::healthy());
    let (gateway, _) = seeded_gateway(client, &["p1"]).await;

    assert!(matches!(
        gateway.create_stream("nonexistent", None),
        Err(GatewayError::Unresolved(_))
    ));
}
