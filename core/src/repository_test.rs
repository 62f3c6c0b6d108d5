use super::*;
use tempfile::TempDir;

#[tokio::test]
async fn test_in_memory_only_successes_count_as_processed() {
    let repo = InMemoryRepository::new();
    repo.record_outcome(OutcomeRecord::failure("a.mp3", 0, "boom"))
        .await
        .unwrap();
    repo.record_outcome(OutcomeRecord::success("b.mp3", 12, "hello"))
        .await
        .unwrap();

    assert_eq!(repo.check_processed("a.mp3").await.unwrap(), None);
    assert_eq!(repo.check_processed("b.mp3").await.unwrap(), Some(2));
    assert_eq!(repo.check_processed("c.mp3").await.unwrap(), None);
    assert_eq!(repo.records().len(), 2);
}

#[tokio::test]
async fn test_in_memory_retry_after_failure_is_processed() {
    let repo = InMemoryRepository::new();
    repo.record_outcome(OutcomeRecord::failure("a.mp3", 0, "boom"))
        .await
        .unwrap();
    repo.mark_processed("a.mp3");

    assert!(repo.check_processed("a.mp3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_jsonl_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("transcriptions.jsonl");

    {
        let repo = JsonlRepository::open(&path).await.unwrap();
        repo.record_outcome(OutcomeRecord::success("a.mp3", 30, "first"))
            .await
            .unwrap();
        repo.record_outcome(OutcomeRecord::failure("b.mp3", 0, "normalization failed: x"))
            .await
            .unwrap();
    }

    let repo = JsonlRepository::open(&path).await.unwrap();
    let records = repo.records().await;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].text, "first");
    assert_eq!(records[0].duration_secs, 30);
    assert!(records[1].has_error);
    assert_eq!(repo.check_processed("a.mp3").await.unwrap(), Some(1));
    assert_eq!(repo.check_processed("b.mp3").await.unwrap(), None);
    assert_eq!(std::fs::read_to_string(repo.path()).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn test_jsonl_skips_malformed_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.jsonl");
    let good = serde_json::to_string(&OutcomeRecord::success("ok.mp3", 1, "x")).unwrap();
    std::fs::write(&path, format!("not json\n\n{good}\n")).unwrap();

    let repo = JsonlRepository::open(&path).await.unwrap();

    assert_eq!(repo.records().await.len(), 1);
    assert!(repo.check_processed("ok.mp3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_jsonl_concurrent_appends_stay_line_delimited() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.jsonl");
    let repo = std::sync::Arc::new(JsonlRepository::open(&path).await.unwrap());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..20 {
        let repo = std::sync::Arc::clone(&repo);
        tasks.spawn(async move {
            repo.record_outcome(OutcomeRecord::success(format!("{i}.mp3"), i, "text"))
                .await
                .unwrap();
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let reopened = JsonlRepository::open(&path).await.unwrap();
    assert_eq!(reopened.records().await.len(), 20);
}
