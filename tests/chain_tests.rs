//! Chained generation against a scripted backend and media tool.

mod common;

use std::sync::Arc;
use std::time::Duration;

use clipchain::{
    ChainAssembler, ChainOptions, ClipGenerator, Downloader, DurationSource, GroundingMode,
    ProviderError,
};
use common::{fast_retry, fast_settings, frame_bytes, video_bytes, ScriptedBackend, ScriptedTool};
use tokio_util::sync::CancellationToken;

fn assembler(backend: Arc<ScriptedBackend>, tool: Arc<ScriptedTool>) -> ChainAssembler {
    let downloader = Downloader::with_settings(fast_retry(2), Duration::from_secs(5)).unwrap();
    let generator = ClipGenerator::new(backend, downloader).with_settings(fast_settings());
    ChainAssembler::new(generator, tool)
}

fn prompts(items: &[&str]) -> Vec<String> {
    items.iter().map(|p| p.to_string()).collect()
}

#[tokio::test]
async fn test_three_clips_report_measured_duration() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(Some(20.0)));

    let result = assembler(backend.clone(), tool.clone())
        .assemble(
            &prompts(&["sunrise", "midday", "dusk"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.is_complete());
    assert_eq!(result.succeeded(), 3);
    assert_eq!(result.total_duration_seconds, 20);
    assert_eq!(result.estimated_duration_seconds, 20);
    assert_eq!(result.duration_source, DurationSource::Probed);
    assert_eq!(tool.concat_calls(), vec![3]);

    let merged = result.merged_clip.unwrap();
    assert_eq!(merged.duration_seconds(), 20);
    assert_eq!(
        merged.bytes(),
        b"video:sunrise|video:midday|video:dusk".as_slice()
    );
}

#[tokio::test]
async fn test_each_step_is_grounded_on_its_predecessor() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(Some(20.0)));

    assembler(backend.clone(), tool)
        .assemble(
            &prompts(&["one", "two", "three"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let submitted = backend.submitted();
    assert_eq!(submitted.len(), 3);

    assert!(submitted[0].grounding_source.is_none());
    assert_eq!(submitted[0].duration_seconds, 8);

    let grounding = submitted[1].grounding_source.as_ref().unwrap();
    assert_eq!(grounding.bytes, video_bytes("one"));
    assert_eq!(submitted[1].duration_seconds, 6);

    let grounding = submitted[2].grounding_source.as_ref().unwrap();
    assert_eq!(grounding.bytes, video_bytes("two"));
}

#[tokio::test]
async fn test_merged_video_is_measured_when_concat_reports_no_length() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(None).with_measured_duration(19.6));

    let result = assembler(backend, tool.clone())
        .assemble(
            &prompts(&["a", "b", "c"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(tool.measure_calls(), 1);
    assert_eq!(result.total_duration_seconds, 20);
    assert_eq!(result.duration_source, DurationSource::Probed);
    assert_eq!(result.merged_clip.unwrap().duration_seconds(), 20);
}

#[tokio::test]
async fn test_unmeasurable_merge_uses_summed_steps() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(None));

    let result = assembler(backend, tool.clone())
        .assemble(
            &prompts(&["a", "b", "c"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(tool.measure_calls(), 1);
    assert_eq!(result.total_duration_seconds, 20);
    assert_eq!(result.duration_source, DurationSource::Formula);
}

#[tokio::test]
async fn test_concat_length_skips_separate_measurement() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(Some(14.0)).with_measured_duration(99.0));

    let result = assembler(backend, tool.clone())
        .assemble(
            &prompts(&["a", "b"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(tool.measure_calls(), 0);
    assert_eq!(result.total_duration_seconds, 14);
}

#[tokio::test]
async fn test_failure_keeps_the_successful_prefix() {
    let backend = Arc::new(ScriptedBackend::new("scripted").failing_submission(
        2,
        ProviderError::Permanent {
            status: Some(400),
            detail: "bad prompt".to_string(),
        },
    ));
    let tool = Arc::new(ScriptedTool::new(Some(14.0)));

    let result = assembler(backend.clone(), tool.clone())
        .assemble(
            &prompts(&["a", "b", "c", "d"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!result.is_complete());
    assert_eq!(result.per_clip.len(), 4);
    assert!(result.per_clip[0].is_some());
    assert!(result.per_clip[1].is_some());
    assert!(result.per_clip[2].is_none());
    assert!(result.per_clip[3].is_none());
    assert!(matches!(
        result.failure,
        Some(ProviderError::Permanent { .. })
    ));

    assert_eq!(tool.concat_calls(), vec![2]);
    assert_eq!(result.total_duration_seconds, 14);
    assert_eq!(result.estimated_duration_seconds, 14);
    assert_eq!(backend.submit_attempts(), 3);
}

#[tokio::test]
async fn test_concat_failure_falls_back_to_last_clip() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(None).failing_concat());

    let result = assembler(backend, tool)
        .assemble(
            &prompts(&["first", "second"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.failure.is_none());
    assert_eq!(result.succeeded(), 2);
    assert_eq!(
        result.merged_clip.unwrap().bytes(),
        video_bytes("second").as_slice()
    );
    assert_eq!(result.total_duration_seconds, 14);
    assert_eq!(result.duration_source, DurationSource::Estimated);
}

#[tokio::test]
async fn test_single_prompt_merges_to_itself() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(None));

    let result = assembler(backend, tool)
        .assemble(
            &prompts(&["alone"]),
            &ChainOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let merged = result.merged_clip.unwrap();
    assert_eq!(merged.bytes(), video_bytes("alone").as_slice());
    assert_eq!(result.total_duration_seconds, 8);
}

#[tokio::test]
async fn test_last_frame_mode_sends_reference_image() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(None));
    let options = ChainOptions {
        grounding: GroundingMode::LastFrame,
        ..ChainOptions::default()
    };

    assembler(backend.clone(), tool)
        .assemble(&prompts(&["a", "b"]), &options, &CancellationToken::new())
        .await
        .unwrap();

    let submitted = backend.submitted();
    assert!(submitted[0].reference_image.is_none());
    assert!(submitted[1].grounding_source.is_none());
    let image = submitted[1].reference_image.as_ref().unwrap();
    assert_eq!(image.bytes, frame_bytes(&video_bytes("a")));
    assert_eq!(image.mime_type, "image/png");
}

#[tokio::test]
async fn test_frame_extraction_failure_stops_the_chain() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(None).failing_frames());
    let options = ChainOptions {
        grounding: GroundingMode::LastFrame,
        ..ChainOptions::default()
    };

    let result = assembler(backend.clone(), tool)
        .assemble(&prompts(&["a", "b", "c"]), &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.succeeded(), 1);
    assert!(matches!(
        result.failure,
        Some(ProviderError::ToolFailure { .. })
    ));
    assert_eq!(backend.submit_attempts(), 1);
}

#[tokio::test]
async fn test_invalid_options_are_rejected() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(None));
    let assembler = assembler(backend.clone(), tool);

    let overlapping = ChainOptions {
        clip_seconds: 6,
        overlap_seconds: 6,
        ..ChainOptions::default()
    };
    assert!(matches!(
        assembler
            .assemble(&prompts(&["a"]), &overlapping, &CancellationToken::new())
            .await,
        Err(ProviderError::InvalidRequest(_))
    ));
    assert!(assembler
        .assemble(&[], &ChainOptions::default(), &CancellationToken::new())
        .await
        .is_err());
    assert_eq!(backend.submit_attempts(), 0);
}

#[tokio::test]
async fn test_cancelled_chain_returns_without_joining() {
    let backend = Arc::new(ScriptedBackend::new("scripted"));
    let tool = Arc::new(ScriptedTool::new(Some(20.0)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = assembler(backend, tool.clone())
        .assemble(&prompts(&["a", "b"]), &ChainOptions::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(result.failure, Some(ProviderError::Cancelled));
    assert!(result.merged_clip.is_none());
    assert!(tool.concat_calls().is_empty());
}
