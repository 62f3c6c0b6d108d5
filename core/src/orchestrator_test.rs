use super::*;
use crate::test_support::{ScriptedProvider, Step};

fn policy() -> AttemptPolicy {
    AttemptPolicy {
        timeout: Duration::from_secs(5),
        max_attempts: 3,
        backoff: Backoff {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        },
        max_concurrency: 0,
    }
}

fn orchestrator(providers: &[&Arc<ScriptedProvider>]) -> Orchestrator {
    let registry = Arc::new(Registry::new());
    for p in providers {
        registry.register(p.name(), (*p).clone()).unwrap();
    }
    Orchestrator::new(
        registry,
        Router::default(),
        Arc::new(HealthChecker::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
        )),
        Arc::new(ProviderMetrics::new()),
    )
    .with_default_policy(policy())
}

fn request() -> TranscriptionRequest {
    TranscriptionRequest::new("/audio/episode.mp3")
}

async fn run(orch: &Orchestrator) -> Result<TranscriptionResult, OrchestratorError> {
    orch.execute_with_hints(&request(), &RoutingHints::default(), &CancellationToken::new())
        .await
}

#[test]
fn test_backoff_grows_and_caps() {
    let backoff = Backoff {
        base: Duration::from_secs(1),
        multiplier: 2.0,
        max: Duration::from_secs(5),
    };

    let delays: Vec<_> = (1..=5).map(|n| backoff.delay(n).as_secs()).collect();

    assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    assert_eq!(backoff.delay(1000), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_advances_without_retry() {
    let a = ScriptedProvider::new("a", Step::Fatal).arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let c = ScriptedProvider::new("c", Step::Succeed("from c")).arc();
    let orch = orchestrator(&[&a, &b, &c]);

    let result = run(&orch).await.unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(result.text, "from b");
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(c.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_retries_with_increasing_backoff() {
    let a = ScriptedProvider::new("a", Step::Retryable).arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let orch = orchestrator(&[&a, &b]);

    let result = run(&orch).await.unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 1);

    let times = a.call_times();
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_secs(1));
    assert!(second_gap >= Duration::from_secs(2));
    assert!(second_gap > first_gap);
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success_on_same_provider() {
    let a = ScriptedProvider::new("a", Step::Succeed("second try"))
        .with_script([Step::Retryable])
        .arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let orch = orchestrator(&[&a, &b]);

    let result = run(&orch).await.unwrap();

    assert_eq!(result.provider, "a");
    assert_eq!(result.text, "second try");
    assert_eq!(a.calls(), 2);
    assert_eq!(b.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_enabled_provider() {
    let a = ScriptedProvider::new("a", Step::Succeed("ok")).arc();
    let orch = orchestrator(&[&a]);
    orch.registry().set_enabled("a", false).unwrap();

    let err = run(&orch).await.unwrap_err();

    assert_eq!(err, OrchestratorError::NoProviderAvailable);
    assert_eq!(a.calls(), 0);
    assert_eq!(orch.stats().failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reports_last_error_and_tried() {
    let a = ScriptedProvider::new("a", Step::Fatal).arc();
    let b = ScriptedProvider::new("b", Step::Retryable).arc();
    let orch = orchestrator(&[&a, &b]);

    let err = run(&orch).await.unwrap_err();

    match err {
        OrchestratorError::Exhausted { last, tried } => {
            assert_eq!(last.provider, "b");
            assert_eq!(last.code, ErrorCode::ProcessFailed);
            assert_eq!(tried, vec!["a", "b"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(b.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retryable_and_recorded() {
    let a = ScriptedProvider::new("a", Step::Hang).arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let orch = orchestrator(&[&a, &b]).with_policy(
        "a",
        AttemptPolicy {
            max_attempts: 2,
            ..policy()
        },
    );

    let result = run(&orch).await.unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(a.calls(), 2);
    let stats = orch.metrics().snapshot("a").unwrap();
    assert_eq!(stats.failed_requests, 2);
    assert_eq!(stats.error_breakdown.get(&ErrorCode::Timeout), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_request() {
    let a = ScriptedProvider::new("a", Step::Retryable).arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let orch = orchestrator(&[&a, &b]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let err = orch
        .execute_with_hints(&request(), &RoutingHints::default(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        OrchestratorError::Cancelled {
            tried: vec!["a".to_string()]
        }
    );
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_attempt() {
    let a = ScriptedProvider::new("a", Step::Hang).arc();
    let orch = orchestrator(&[&a]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = orch
        .execute_with_hints(&request(), &RoutingHints::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Cancelled { .. }));
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_provider_concurrency_limit() {
    let a = ScriptedProvider::new("a", Step::Succeed("ok"))
        .with_delay(Duration::from_secs(1))
        .arc();
    let orch = orchestrator(&[&a]).with_policy(
        "a",
        AttemptPolicy {
            max_concurrency: 1,
            ..policy()
        },
    );

    let (first, second, third) = tokio::join!(run(&orch), run(&orch), run(&orch));

    assert!(first.is_ok() && second.is_ok() && third.is_ok());
    assert_eq!(a.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_provider_is_skipped() {
    let a = ScriptedProvider::new("a", Step::Succeed("from a")).arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let orch = orchestrator(&[&a, &b]);
    orch.health()
        .probe(&ScriptedProvider::new("a", Step::Fatal).unhealthy())
        .await;

    let result = run(&orch).await.unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(a.calls(), 0);
    assert_eq!(orch.recommend(&RoutingHints::default()).await, vec!["b"]);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_provider_stays_skipped_after_cache_expiry() {
    let a = ScriptedProvider::new("a", Step::Fatal).unhealthy().arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let orch = orchestrator(&[&a, &b]);
    orch.health().check_all(orch.registry()).await;
    tokio::time::sleep(Duration::from_secs(61)).await;

    let result = run(&orch).await.unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(a.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_provider_skipped_without_health_monitor() {
    let a = ScriptedProvider::new("a", Step::Fatal).unhealthy().arc();
    let b = ScriptedProvider::new("b", Step::Succeed("from b")).arc();
    let orch = orchestrator(&[&a, &b]);

    let result = run(&orch).await.unwrap();

    assert_eq!(result.provider, "b");
    assert_eq!(a.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_provider_forces_primary() {
    let a = ScriptedProvider::new("a", Step::Succeed("from a")).arc();
    let b = ScriptedProvider::new("b", Step::Fatal).arc();
    let orch = orchestrator(&[&a, &b]);
    let cancel = CancellationToken::new();

    let result = orch
        .execute_with_provider("b", &request(), &cancel)
        .await
        .unwrap();
    assert_eq!(result.provider, "a");
    assert_eq!(b.calls(), 1);

    let err = orch
        .execute_with_provider("ghost", &request(), &cancel)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        OrchestratorError::Registry(RegistryError::NotFound("ghost".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_stats_and_metrics_track_every_attempt() {
    let a = ScriptedProvider::new("a", Step::Succeed("ok"))
        .with_script([Step::Retryable])
        .arc();
    let orch = orchestrator(&[&a]);

    run(&orch).await.unwrap();
    run(&orch).await.unwrap();

    assert_eq!(
        orch.stats(),
        OrchestratorStats {
            total_requests: 2,
            successful_requests: 2,
            failed_requests: 0,
        }
    );
    let stats = orch.metrics().snapshot("a").unwrap();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.successful_requests, 2);
    assert_eq!(stats.failed_requests, 1);
}
