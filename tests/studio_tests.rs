mod common;

use std::sync::Arc;
use std::time::Duration;

use clipchain::{
    ChainOptions, ClipRequest, ClipStudio, Downloader, ProviderError, ProviderRouter,
};
use common::{fast_retry, fast_settings, video_bytes, ScriptedBackend, ScriptedTool};
use tokio_util::sync::CancellationToken;

fn studio(primary: Arc<ScriptedBackend>, secondary: Option<Arc<ScriptedBackend>>) -> ClipStudio {
    let mut router = ProviderRouter::new("veo-3.1").with_primary(primary);
    if let Some(secondary) = secondary {
        router = router.with_secondary(secondary);
    }
    let downloader = Downloader::with_settings(fast_retry(2), Duration::from_secs(5)).unwrap();
    ClipStudio::new(router, downloader, Arc::new(ScriptedTool::new(None)))
        .with_generator_settings(fast_settings())
}

#[tokio::test]
async fn test_generate_clip_uses_default_model() {
    let primary = Arc::new(ScriptedBackend::new("primary"));
    let clip = studio(primary.clone(), None)
        .generate_clip(ClipRequest::new("glacier"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(clip.bytes(), video_bytes("glacier").as_slice());
    assert_eq!(primary.submitted()[0].model.as_deref(), Some("veo-3.1"));
}

#[tokio::test]
async fn test_generate_clip_routes_vendor_model() {
    let primary = Arc::new(ScriptedBackend::new("primary"));
    let secondary = Arc::new(ScriptedBackend::new("secondary").with_polls_until_done(0));
    let studio = studio(primary.clone(), Some(secondary.clone()));

    studio
        .generate_clip(
            ClipRequest::new("x").with_model("acme/fast-model"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(primary.submit_attempts(), 0);
    assert_eq!(secondary.submit_attempts(), 1);
}

#[tokio::test]
async fn test_batch_preserves_order_and_isolates_failures() {
    let primary = Arc::new(
        ScriptedBackend::new("primary")
            .with_polls_until_done(2)
            .failing_prompt("fail"),
    );
    let studio = studio(primary.clone(), None).with_batch_concurrency(2);

    let requests = vec![
        ClipRequest::new("one"),
        ClipRequest::new("please fail"),
        ClipRequest::new("three"),
        ClipRequest::new("four"),
    ];
    let results = studio
        .generate_clips_batch(requests, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 4);
    assert_eq!(
        results[0].as_ref().unwrap().bytes(),
        video_bytes("one").as_slice()
    );
    assert!(matches!(
        results[1],
        Err(ProviderError::Permanent {
            status: Some(400),
            ..
        })
    ));
    assert_eq!(
        results[2].as_ref().unwrap().bytes(),
        video_bytes("three").as_slice()
    );
    assert_eq!(
        results[3].as_ref().unwrap().bytes(),
        video_bytes("four").as_slice()
    );
    assert_eq!(primary.submit_attempts(), 4);
}

#[tokio::test]
async fn test_batch_runs_one_job_at_a_time_by_default() {
    let primary = Arc::new(ScriptedBackend::new("primary").with_polls_until_done(2));
    let studio = studio(primary.clone(), None);

    let requests = ["one", "two", "three", "four"]
        .into_iter()
        .map(ClipRequest::new)
        .collect();
    let results = studio
        .generate_clips_batch(requests, &CancellationToken::new())
        .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(primary.submit_attempts(), 4);
    assert_eq!(primary.max_in_flight(), 1);
}

#[tokio::test]
async fn test_batch_concurrency_bounds_jobs_in_flight() {
    let primary = Arc::new(ScriptedBackend::new("primary").with_polls_until_done(3));
    let studio = studio(primary.clone(), None).with_batch_concurrency(2);

    let requests = ["one", "two", "three", "four", "five"]
        .into_iter()
        .map(ClipRequest::new)
        .collect();
    let results = studio
        .generate_clips_batch(requests, &CancellationToken::new())
        .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(primary.max_in_flight(), 2);
}

#[tokio::test]
async fn test_batch_of_nothing_is_empty() {
    let studio = studio(Arc::new(ScriptedBackend::new("primary")), None);
    let results = studio
        .generate_clips_batch(Vec::new(), &CancellationToken::new())
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_generate_video_with_unconfigured_backend_is_routing_error() {
    let studio = studio(Arc::new(ScriptedBackend::new("primary")), None);
    let options = ChainOptions {
        model: Some("acme/fast-model".to_string()),
        ..ChainOptions::default()
    };

    let err = studio
        .generate_video(&["a".to_string()], options, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Routing(_)));
}

#[tokio::test]
async fn test_generate_video_chains_on_default_backend() {
    let primary = Arc::new(ScriptedBackend::new("primary"));
    let result = studio(primary.clone(), None)
        .generate_video(
            &["a".to_string(), "b".to_string()],
            ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.is_complete());
    assert_eq!(result.total_duration_seconds, 14);
    let submitted = primary.submitted();
    assert!(submitted
        .iter()
        .all(|r| r.model.as_deref() == Some("veo-3.1")));
}
