use super::*;
use crate::test_support::{ScriptedProvider, Step};

const TTL: Duration = Duration::from_secs(30);

fn checker() -> HealthChecker {
    HealthChecker::new(Duration::from_secs(2), TTL)
}

#[tokio::test(start_paused = true)]
async fn test_probe_result_is_cached_for_ttl() {
    let checker = checker();
    let p = ScriptedProvider::new("a", Step::Fatal).unhealthy();

    let status = checker.check(&p).await;
    assert!(!status.healthy);
    assert_eq!(status.last_error.as_deref(), Some("probe failed"));
    assert!(checker.is_marked_unhealthy("a"));

    tokio::time::advance(TTL + Duration::from_secs(1)).await;

    assert!(checker.cached_status("a").is_none());
    assert!(!checker.is_marked_unhealthy("a"));
    assert_eq!(checker.statuses().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_provider_is_not_marked_unhealthy() {
    let checker = checker();
    assert!(!checker.is_marked_unhealthy("never-probed"));
    assert!(checker.statuses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_probe_times_out() {
    let checker = checker();
    let p = ScriptedProvider::new("slow", Step::Fatal).with_health_delay(Duration::from_secs(60));

    let status = checker.probe(&p).await;

    assert!(!status.healthy);
    assert!(status.last_error.unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_check_all_probes_every_provider() {
    let registry = Registry::new();
    registry
        .register("good", ScriptedProvider::new("good", Step::Fatal).arc())
        .unwrap();
    registry
        .register(
            "bad",
            ScriptedProvider::new("bad", Step::Fatal).unhealthy().arc(),
        )
        .unwrap();
    let checker = checker();

    let statuses = checker.check_all(&registry).await;

    assert_eq!(statuses.len(), 2);
    assert!(!checker.is_marked_unhealthy("good"));
    assert!(checker.is_marked_unhealthy("bad"));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_probes_until_cancelled() {
    let registry = Arc::new(Registry::new());
    registry
        .register("a", ScriptedProvider::new("a", Step::Fatal).unhealthy().arc())
        .unwrap();
    let checker = Arc::new(checker());
    let cancel = CancellationToken::new();

    let handle = checker.spawn_monitor(
        Arc::clone(&registry),
        Duration::from_secs(10),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(checker.is_marked_unhealthy("a"));

    cancel.cancel();
    handle.await.unwrap();
}
