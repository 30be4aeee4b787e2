//! End-to-end tests: real consumers calling real providers over loopback TCP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use ferrule::common::TimeoutKind;
use ferrule::prelude::*;
use ferrule::server::ServerHandle;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn calculator(name: &'static str, calls: Arc<AtomicUsize>) -> ProviderRegistry {
    let services = ProviderRegistry::new();
    services.register(
        ServiceBuilder::new(Directory::of("Calculator"))
            .typed_method("add", |(a, b): (i64, i64)| Ok(a + b))
            .typed_method("div", |(a, b): (i64, i64)| {
                if b == 0 {
                    return Err(MethodError::expected("division by zero"));
                }
                Ok(a / b)
            })
            .method("whoami", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!(name))
            })
            .method("sleep", |args| {
                let millis = args.first().and_then(Value::as_u64).unwrap_or(0);
                std::thread::sleep(Duration::from_millis(millis));
                Ok(Value::Null)
            })
            .method("explode", |_| panic!("provider bug"))
            .build(),
    );
    services
}

async fn provider(name: &'static str, config: ServerConfig) -> Result<(ServerHandle, Arc<AtomicUsize>)> {
    let calls = Arc::new(AtomicUsize::new(0));
    let services = Arc::new(calculator(name, calls.clone()));
    let handle = FerruleServer::bind("127.0.0.1:0", config.with_workers(2), services)
        .await?
        .spawn()?;
    Ok((handle, calls))
}

fn address(handle: &ServerHandle) -> Address {
    Address::from(handle.local_addr())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_typed_call_round_trip() -> Result<()> {
    init_tracing();
    let (server, _) = provider("p1", ServerConfig::default()).await?;
    let client = FerruleClient::new(ClientConfig::default())?;
    client
        .connect_default(Directory::of("Calculator"), address(&server))
        .await?;

    let calculator = client.proxy(Directory::of("Calculator")).build();
    assert_eq!(calculator.call_async("add", vec![json!(19), json!(23)]).await?, json!(42));
    assert_eq!(calculator.call_async("div", vec![json!(9), json!(3)]).await?, json!(3));

    let consumer = client.metrics();
    assert_eq!(consumer.successful_requests, 2);
    assert_eq!(server.metrics().snapshot().successful_requests, 2);
    assert_eq!(client.pending_invocations(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provider_failures_surface_as_typed_errors() -> Result<()> {
    init_tracing();
    let (server, _) = provider("p1", ServerConfig::default()).await?;
    let client = FerruleClient::new(ClientConfig::default())?;
    client
        .connect_default(Directory::of("Calculator"), address(&server))
        .await?;
    client
        .connect_default(Directory::of("Missing"), address(&server))
        .await?;

    let calculator = client.proxy(Directory::of("Calculator")).build();

    match calculator.call_async("div", vec![json!(1), json!(0)]).await {
        Err(FerruleError::Business { message, expected }) => {
            assert!(expected);
            assert_eq!(message, "division by zero");
        }
        other => panic!("expected business error, got {:?}", other),
    }

    match calculator.call_async("add", vec![json!("one")]).await {
        Err(FerruleError::Remote { status, .. }) => assert_eq!(status, Status::BadRequest),
        other => panic!("expected bad request, got {:?}", other),
    }

    match calculator.call_async("explode", vec![]).await {
        Err(FerruleError::Remote { status, message }) => {
            assert_eq!(status, Status::ServerError);
            assert!(message.contains("provider bug"));
        }
        other => panic!("expected server error, got {:?}", other),
    }

    let missing = client.proxy(Directory::of("Missing")).build();
    match missing.call_async("anything", vec![]).await {
        Err(FerruleError::Remote { status, .. }) => assert_eq!(status, Status::ServiceNotFound),
        other => panic!("expected service not found, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_provider_times_out() -> Result<()> {
    init_tracing();
    let (server, _) = provider("p1", ServerConfig::default()).await?;
    let client = FerruleClient::new(ClientConfig::default())?;
    client
        .connect_default(Directory::of("Calculator"), address(&server))
        .await?;

    let calculator = client
        .proxy(Directory::of("Calculator"))
        .method_timeout("sleep", Duration::from_millis(100))
        .build();

    match calculator.call_async("sleep", vec![json!(500)]).await {
        Err(FerruleError::Timeout { kind, millis }) => {
            assert_eq!(kind, TimeoutKind::Server);
            assert_eq!(millis, 100);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(client.pending_invocations(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fail_over_around_flow_controlled_provider() -> Result<()> {
    init_tracing();
    let (healthy, healthy_calls) = provider("healthy", ServerConfig::default()).await?;
    // Admits nothing: every request is answered PROVIDER_FLOW_CONTROL.
    let (saturated, saturated_calls) =
        provider("saturated", ServerConfig::default().with_max_in_flight(Some(0))).await?;

    let client = FerruleClient::new(ClientConfig::default())?;
    let dir = Directory::of("Calculator");
    client.connect_default(dir.clone(), address(&healthy)).await?;
    client.connect_default(dir.clone(), address(&saturated)).await?;

    let calculator = client
        .proxy(dir.clone())
        .load_balancer(LoadBalancerType::RoundRobin)
        .strategy(ClusterStrategy::FailOver { retries: 1 })
        .build();
    for _ in 0..6 {
        assert_eq!(calculator.call_async("whoami", vec![]).await?, json!("healthy"));
    }
    assert_eq!(healthy_calls.load(Ordering::SeqCst), 6);
    assert_eq!(saturated_calls.load(Ordering::SeqCst), 0);

    // Without fail-over the rejection reaches the caller.
    let fail_fast = client
        .proxy(dir)
        .load_balancer(LoadBalancerType::RoundRobin)
        .build();
    let mut rejected = 0;
    for _ in 0..4 {
        if let Err(FerruleError::Remote { status, .. }) = fail_fast.call_async("whoami", vec![]).await {
            assert_eq!(status, Status::ProviderFlowControl);
            rejected += 1;
        }
    }
    assert_eq!(rejected, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fail_safe_returns_default() -> Result<()> {
    init_tracing();
    let (server, _) = provider("p1", ServerConfig::default()).await?;
    let client = FerruleClient::new(ClientConfig::default())?;
    client
        .connect_default(Directory::of("Calculator"), address(&server))
        .await?;

    let calculator = client
        .proxy(Directory::of("Calculator"))
        .method_strategy("explode", ClusterStrategy::FailSafe)
        .return_type("explode", ReturnType::Integer)
        .build();
    assert_eq!(calculator.call_async("explode", vec![]).await?, json!(0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broadcast_hits_every_provider() -> Result<()> {
    init_tracing();
    let (a, a_calls) = provider("a", ServerConfig::default()).await?;
    let (b, b_calls) = provider("b", ServerConfig::default()).await?;
    let client = FerruleClient::new(ClientConfig::default())?;
    let dir = Directory::of("Calculator");
    client.connect_default(dir.clone(), address(&a)).await?;
    client.connect_default(dir.clone(), address(&b)).await?;

    let calculator = client.proxy(dir).build();
    let mut names = Vec::new();
    for result in calculator.broadcast_all("whoami", vec![]).await? {
        names.push(result?);
    }
    names.sort_by_key(|v| v.to_string());
    assert_eq!(names, vec![json!("a"), json!("b")]);
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_callers() -> Result<()> {
    init_tracing();
    let (server, _) = provider("p1", ServerConfig::default()).await?;
    let client = FerruleClient::new(ClientConfig::default().with_connections_per_address(2))?;
    client
        .connect_default(Directory::of("Calculator"), address(&server))
        .await?;
    let calculator = client.proxy(Directory::of("Calculator")).build();

    let calls = (0..200i64).map(|n| calculator.call_async("add", vec![json!(n), json!(1)]));
    let results = futures::future::join_all(calls).await;
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result?, json!(n as i64 + 1));
    }
    assert_eq!(server.metrics().snapshot().total_requests, 200);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shut_down_provider_answers_busy() -> Result<()> {
    init_tracing();
    let (server, _) = provider("p1", ServerConfig::default()).await?;
    let client = FerruleClient::new(ClientConfig::default())?;
    client
        .connect_default(Directory::of("Calculator"), address(&server))
        .await?;
    let calculator = client.proxy(Directory::of("Calculator")).build();
    assert_eq!(calculator.call_async("add", vec![json!(1), json!(1)]).await?, json!(2));

    server.shutdown();
    match calculator.call_async("add", vec![json!(1), json!(1)]).await {
        Err(FerruleError::Remote { status, .. }) => assert_eq!(status, Status::ServerBusy),
        other => panic!("expected server busy, got {:?}", other),
    }
    Ok(())
}
