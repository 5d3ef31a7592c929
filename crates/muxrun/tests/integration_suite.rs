//! End-to-end tests: a real client and server over an in-memory duplex channel.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use muxrpc::RpcError;
use muxrun::Client;
use muxrun::ClientConfig;
use muxrun::Error;
use muxrun::ServerConfig;
use muxrun::ServerDispatcher;
use muxrun::Transport;
use muxrun::client::StreamEvent;
use muxrun::mock_transport::DuplexChannelTransport;
use muxrun::server::Execution;
use muxrun::server::FnExecutor;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds, failing the test after two seconds.
async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

fn ticks(params: Value) -> Execution {
    let every = params["every_ms"].as_u64().unwrap_or(1);
    stream::iter(0u64..)
        .then(move |n| async move {
            tokio::time::sleep(Duration::from_millis(every)).await;
            Ok(json!(n))
        })
        .boxed()
}

fn executor() -> FnExecutor {
    FnExecutor::new()
        .unary("add", |params| {
            let numbers: Vec<i64> = serde_json::from_value(params)?;
            Ok(json!(numbers.iter().sum::<i64>()))
        })
        .unary("echo", |params| Ok(params))
        .unary("explode", |_| Err(anyhow::anyhow!("kaboom")))
        .streaming("letters", |_| stream::iter(["a", "b"].map(|s| Ok(json!(s)))).boxed())
        .streaming("ticks", ticks)
        .streaming("slow_echo", |params| {
            let delay = params["delay_ms"].as_u64().unwrap_or(0);
            stream::once(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(params["value"].clone())
            })
            .boxed()
        })
}

struct Harness {
    client: Arc<Client>,
    server: ServerDispatcher,
}

fn connect() -> Harness {
    init_tracing();
    let (client_end, server_end) = DuplexChannelTransport::pair();
    let server = ServerDispatcher::with_config(Arc::new(executor()), ServerConfig::default().with_peer_name("e2e-server"));

    let serving = server.clone();
    let server_end: Arc<dyn Transport> = Arc::new(server_end);
    tokio::spawn(async move { serving.serve(server_end).await });

    let client = Client::with_config(Arc::new(client_end), ClientConfig::default().with_peer_name("e2e-client"));
    Harness { client: Arc::new(client), server }
}

// ============================================================================
//  BLOCKING
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_add() {
    let Harness { client, server } = connect();

    let caller = client.clone();
    let value = tokio::task::spawn_blocking(move || caller.call_blocking("add", json!([1, 2])))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(value, json!(3));
    assert_eq!(client.active_requests(), 0);
    eventually("server drained", || server.active_executions() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_remote_failure() {
    let Harness { client, .. } = connect();

    let caller = client.clone();
    let err = tokio::task::spawn_blocking(move || caller.call_blocking("explode", Value::Null))
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err, Error::Remote(RpcError::server_error("kaboom", 0)));
}

// ============================================================================
//  FUTURE
// ============================================================================

#[tokio::test]
async fn test_future_calls() {
    let Harness { client, .. } = connect();

    assert_eq!(client.call("echo", json!({"x": 1})).await.unwrap(), json!({"x": 1}));

    let err = client.call("nope", Value::Null).await.unwrap_err();
    let Error::Remote(rpc) = err else { panic!("expected a remote error, got {:?}", err) };
    assert!(rpc.is_method_not_found());
    assert_eq!(rpc.message, "method nope not implemented");

    assert_eq!(client.active_requests(), 0);
}

#[tokio::test]
async fn test_non_streamed_call_to_streaming_method_takes_first_item() {
    let Harness { client, server } = connect();

    assert_eq!(client.call("ticks", json!({"every_ms": 1})).await.unwrap(), json!(0));
    eventually("tick execution closed", || server.active_executions() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_are_correlated() {
    let Harness { client, server } = connect();

    let calls: Vec<_> = (0..100)
        .map(|n| {
            let delay = rand::thread_rng().gen_range(0..20);
            let client = client.clone();
            tokio::spawn(async move {
                let value = client.call("slow_echo", json!({"delay_ms": delay, "value": n})).await;
                (n, value)
            })
        })
        .collect();

    for call in calls {
        let (n, value) = call.await.unwrap();
        assert_eq!(value.unwrap(), json!(n));
    }
    assert_eq!(client.active_requests(), 0);
    eventually("server drained", || server.active_executions() == 0).await;
}

// ============================================================================
//  STREAM
// ============================================================================

#[tokio::test]
async fn test_stream_items_then_completion() {
    let Harness { client, .. } = connect();
    let events = Arc::new(Mutex::new(Vec::new()));

    let sink = events.clone();
    client
        .stream("letters", Value::Null)
        .subscribe(move |event: StreamEvent| -> anyhow::Result<()> {
            sink.lock().push(event);
            Ok(())
        })
        .unwrap();

    eventually("stream finished", || events.lock().len() == 3).await;
    assert_eq!(*events.lock(), vec![
        StreamEvent::Item(json!("a")),
        StreamEvent::Item(json!("b")),
        StreamEvent::Completed,
    ]);
    assert_eq!(client.active_requests(), 0);
}

#[tokio::test]
async fn test_item_stream_collects() {
    let Harness { client, .. } = connect();

    let items: Vec<_> = client.stream("letters", Value::Null).into_items().unwrap().collect().await;

    assert_eq!(items, vec![Ok(json!("a")), Ok(json!("b"))]);
}

#[tokio::test]
async fn test_cancel_stops_server_execution() {
    let Harness { client, server } = connect();

    let mut items = client.stream("ticks", json!({"every_ms": 2})).into_items().unwrap();
    assert_eq!(items.next().await, Some(Ok(json!(0))));
    assert_eq!(items.next().await, Some(Ok(json!(1))));
    assert_eq!(server.active_executions(), 1);

    drop(items);

    assert_eq!(client.active_requests(), 0);
    eventually("server cancelled the ticks", || server.active_executions() == 0).await;
}

#[tokio::test]
async fn test_resubscribing_issues_a_fresh_call() {
    let Harness { client, server } = connect();
    let stream = client.stream("ticks", json!({"every_ms": 1}));

    let first = stream.into_items().unwrap();
    let second = stream.into_items().unwrap();
    assert_ne!(first.id(), second.id());
    eventually("both executions running", || server.active_executions() == 2).await;

    drop(first);
    eventually("first execution cancelled", || server.active_executions() == 1).await;

    let mut second = second;
    assert!(second.next().await.unwrap().is_ok());
}

// ============================================================================
//  CHANNEL LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_channel_close_fails_in_flight_calls() {
    init_tracing();
    let (client_end, server_end) = DuplexChannelTransport::pair();
    let client = Client::new(Arc::new(client_end));

    let pending = client.call("never-answered", Value::Null);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client
        .stream("ticks", Value::Null)
        .subscribe(move |event: StreamEvent| -> anyhow::Result<()> {
            sink.lock().push(event);
            Ok(())
        })
        .unwrap();
    assert_eq!(client.active_requests(), 2);

    drop(server_end);

    assert_eq!(pending.await.unwrap_err(), Error::ChannelClosed);
    eventually("stream failed", || !events.lock().is_empty()).await;
    assert_eq!(*events.lock(), vec![StreamEvent::Error(Error::ChannelClosed)]);
    assert_eq!(client.active_requests(), 0);
}

#[tokio::test]
async fn test_dropping_the_client_fails_in_flight_calls() {
    init_tracing();
    let (client_end, _server_end) = DuplexChannelTransport::pair();
    let client = Client::new(Arc::new(client_end));

    let pending = client.call("never-answered", Value::Null);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let stream = client.stream("ticks", Value::Null);
    stream
        .subscribe(move |event: StreamEvent| -> anyhow::Result<()> {
            sink.lock().push(event);
            Ok(())
        })
        .unwrap();

    drop(client);

    let outcome = tokio::time::timeout(Duration::from_millis(500), pending).await;
    assert_eq!(outcome.expect("call resolved after the client was dropped"), Err(Error::ChannelClosed));
    assert_eq!(*events.lock(), vec![StreamEvent::Error(Error::ChannelClosed)]);
    assert_eq!(stream.subscriber_count(), 0);
}

#[tokio::test]
async fn test_client_timeout_is_layered_on_top() {
    init_tracing();
    let (client_end, _server_end) = DuplexChannelTransport::pair();
    let client = Client::new(Arc::new(client_end));

    let outcome = tokio::time::timeout(Duration::from_millis(20), client.call("never-answered", Value::Null)).await;

    assert!(outcome.is_err());
    // The call itself is still in flight; timing out only abandoned the handle.
    assert_eq!(client.active_requests(), 1);
}
