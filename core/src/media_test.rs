use super::*;
use tempfile::TempDir;

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("12.5\n").unwrap(), Duration::from_millis(12500));
    assert!(parse_duration("N/A").is_err());
    assert!(parse_duration("-1").is_err());
}

#[tokio::test]
async fn test_passthrough_keeps_input() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("a.mp3");
    std::fs::write(&input, b"x").unwrap();

    let normalized = Passthrough.normalize(&input).await.unwrap();

    assert_eq!(normalized.path, input);
    assert!(!normalized.temporary);
    normalized.cleanup().await;
    assert!(input.exists());
}

#[tokio::test]
async fn test_passthrough_missing_input() {
    let dir = TempDir::new().unwrap();
    assert!(Passthrough.normalize(&dir.path().join("gone.mp3")).await.is_err());
}

#[tokio::test]
async fn test_ffmpeg_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("a.mp3");
    std::fs::write(&input, b"x").unwrap();
    let normalizer = FfmpegNormalizer::new("v2t-no-such-ffmpeg", "ffprobe", dir.path().join("work"));

    let err = normalizer.normalize(&input).await.unwrap_err();

    assert!(err.to_string().contains("v2t-no-such-ffmpeg"));
}

#[test]
fn test_scratch_paths_are_unique() {
    let normalizer = FfmpegNormalizer::new("ffmpeg", "ffprobe", PathBuf::from("/tmp/v2t"));
    let a = normalizer.scratch_path(Path::new("/in/talk.mp3"));
    let b = normalizer.scratch_path(Path::new("/in/talk.mp3"));

    assert_ne!(a, b);
    assert_eq!(a.extension().unwrap(), "wav");
    assert!(a.starts_with("/tmp/v2t"));
}

#[tokio::test]
async fn test_temporary_output_is_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let scratch = dir.path().join("scratch.wav");
    std::fs::write(&scratch, b"x").unwrap();
    let normalized = NormalizedAudio {
        path: scratch.clone(),
        duration: None,
        temporary: true,
    };

    normalized.cleanup().await;

    assert!(!scratch.exists());
}
