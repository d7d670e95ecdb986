//! Scripted in-memory backend and media tool shared by integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use clipchain::{
    BackendCapabilities, ClipRequest, ConcatOutput, GeneratedClip, GeneratorSettings,
    MediaBackend, MediaInput, MediaPayload, MediaTool, Operation, OperationError,
    OperationState, ProviderError, ProviderOutput, Result, RetryPolicy,
};
use tokio_util::sync::CancellationToken;

/// Generator settings that never sleep for real time.
pub fn fast_settings() -> GeneratorSettings {
    GeneratorSettings {
        poll_interval: Duration::from_millis(5),
        max_poll_duration: Duration::from_secs(5),
        submit_retry: fast_retry(3),
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
    }
}

/// Bytes the scripted backend returns for a prompt.
pub fn video_bytes(prompt: &str) -> Vec<u8> {
    format!("video:{}", prompt).into_bytes()
}

/// What a finished scripted operation reports.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Inline bytes derived from the prompt.
    Video,
    /// A remote URI to download.
    Uri(String),
    /// Zero outputs with these filter reasons.
    Filtered(Vec<String>),
    /// Zero outputs, no filter signal.
    Empty,
    /// The operation fails with this message.
    Failed(String),
}

pub fn capabilities(min: u32, max: u32, grounding: bool, image: bool) -> BackendCapabilities {
    BackendCapabilities {
        min_duration_seconds: min,
        max_duration_seconds: max,
        supports_grounding: grounding,
        supports_reference_image: image,
        default_model: "scripted-default".to_string(),
    }
}

/// A backend whose behaviour is fixed up front.
pub struct ScriptedBackend {
    name: String,
    caps: BackendCapabilities,
    /// Polls needed before the operation is done. Zero finishes at submit.
    polls_until_done: u32,
    outcome: Outcome,
    transient_poll_failures: AtomicU32,
    failing_submissions: Mutex<HashMap<usize, ProviderError>>,
    failing_prompt: Option<String>,
    submit_attempts: AtomicUsize,
    submitted: Mutex<Vec<ClipRequest>>,
    polls: AtomicU32,
    jobs: Mutex<HashMap<String, (String, u32)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            caps: capabilities(4, 8, true, true),
            polls_until_done: 1,
            outcome: Outcome::Video,
            transient_poll_failures: AtomicU32::new(0),
            failing_submissions: Mutex::new(HashMap::new()),
            failing_prompt: None,
            submit_attempts: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            polls: AtomicU32::new(0),
            jobs: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, caps: BackendCapabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_polls_until_done(mut self, polls: u32) -> Self {
        self.polls_until_done = polls;
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_transient_poll_failures(self, count: u32) -> Self {
        self.transient_poll_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the zero-based `attempt`th call to `submit`.
    pub fn failing_submission(self, attempt: usize, error: ProviderError) -> Self {
        self.failing_submissions
            .lock()
            .unwrap()
            .insert(attempt, error);
        self
    }

    /// Reject any prompt containing `needle`.
    pub fn failing_prompt(mut self, needle: &str) -> Self {
        self.failing_prompt = Some(needle.to_string());
        self
    }

    pub fn submitted(&self) -> Vec<ClipRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Most jobs that were accepted and not yet finished at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn finish(&self, handle: &str, prompt: &str) -> Operation {
        match &self.outcome {
            Outcome::Video => Operation::completed(
                handle,
                ProviderOutput {
                    payloads: vec![MediaPayload::Inline {
                        data: video_bytes(prompt),
                        mime_type: Some("video/mp4".to_string()),
                    }],
                    ..ProviderOutput::default()
                },
            ),
            Outcome::Uri(uri) => Operation::completed(
                handle,
                ProviderOutput {
                    payloads: vec![MediaPayload::Uri {
                        uri: uri.clone(),
                        auth: None,
                        mime_type: None,
                    }],
                    ..ProviderOutput::default()
                },
            ),
            Outcome::Filtered(reasons) => Operation::completed(
                handle,
                ProviderOutput {
                    payloads: vec![],
                    filtered_count: 1,
                    filtered_reasons: reasons.clone(),
                },
            ),
            Outcome::Empty => Operation::completed(handle, ProviderOutput::default()),
            Outcome::Failed(message) => {
                let mut op = Operation::pending(handle);
                op.state = OperationState::Failed;
                op.error = Some(OperationError {
                    code: Some(13),
                    message: message.clone(),
                });
                op
            }
        }
    }
}

#[async_trait]
impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.caps
    }

    async fn submit(&self, request: &ClipRequest, _cancel: &CancellationToken) -> Result<Operation> {
        let attempt = self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(request.clone());

        if let Some(error) = self.failing_submissions.lock().unwrap().remove(&attempt) {
            return Err(error);
        }
        if let Some(needle) = &self.failing_prompt {
            if request.prompt.contains(needle.as_str()) {
                return Err(ProviderError::Permanent {
                    status: Some(400),
                    detail: "scripted rejection".to_string(),
                });
            }
        }

        let handle = format!("{}-op-{}", self.name, attempt);
        if self.polls_until_done == 0 {
            return Ok(self.finish(&handle, &request.prompt));
        }

        self.jobs
            .lock()
            .unwrap()
            .insert(handle.clone(), (request.prompt.clone(), 0));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        Ok(Operation::pending(handle))
    }

    async fn poll(&self, operation: Operation, _cancel: &CancellationToken) -> Result<Operation> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_poll_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_poll_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Transient {
                status: Some(503),
                message: "scripted outage".to_string(),
            });
        }

        let mut jobs = self.jobs.lock().unwrap();
        let (prompt, polls) = match jobs.get_mut(&operation.handle) {
            Some(job) => job,
            None => return Ok(operation),
        };
        *polls += 1;

        if *polls >= self.polls_until_done {
            let prompt = prompt.clone();
            jobs.remove(&operation.handle);
            drop(jobs);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.finish(&operation.handle, &prompt))
        } else {
            Ok(operation)
        }
    }
}

/// A media tool that joins bytes instead of running ffmpeg.
pub struct ScriptedTool {
    /// Duration `concat` reports alongside the joined bytes.
    concat_duration: Option<f64>,
    /// Duration a separate measurement finds. `None` makes it fail.
    measured_duration: Option<f64>,
    fail_concat: bool,
    fail_frames: bool,
    concat_calls: Mutex<Vec<usize>>,
    measure_calls: AtomicUsize,
}

impl ScriptedTool {
    pub fn new(concat_duration: Option<f64>) -> Self {
        Self {
            concat_duration,
            measured_duration: None,
            fail_concat: false,
            fail_frames: false,
            concat_calls: Mutex::new(Vec::new()),
            measure_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_measured_duration(mut self, seconds: f64) -> Self {
        self.measured_duration = Some(seconds);
        self
    }

    pub fn failing_concat(mut self) -> Self {
        self.fail_concat = true;
        self
    }

    pub fn failing_frames(mut self) -> Self {
        self.fail_frames = true;
        self
    }

    /// Number of clips passed to each `concat` call.
    pub fn concat_calls(&self) -> Vec<usize> {
        self.concat_calls.lock().unwrap().clone()
    }

    /// Number of standalone duration measurements.
    pub fn measure_calls(&self) -> usize {
        self.measure_calls.load(Ordering::SeqCst)
    }
}

/// Bytes the scripted tool reports as a clip's last frame.
pub fn frame_bytes(clip: &[u8]) -> Vec<u8> {
    let mut bytes = b"frame:".to_vec();
    bytes.extend_from_slice(clip);
    bytes
}

#[async_trait]
impl MediaTool for ScriptedTool {
    async fn concat(
        &self,
        clips: &[GeneratedClip],
        _cancel: &CancellationToken,
    ) -> Result<ConcatOutput> {
        self.concat_calls.lock().unwrap().push(clips.len());
        if self.fail_concat {
            return Err(ProviderError::ToolFailure {
                tool: "ffmpeg".to_string(),
                message: "exit status: 1: scripted failure".to_string(),
            });
        }

        let bytes = clips
            .iter()
            .map(|c| c.bytes().to_vec())
            .collect::<Vec<_>>()
            .join(&b'|');
        Ok(ConcatOutput {
            bytes,
            mime_type: "video/mp4".to_string(),
            duration_seconds: self.concat_duration,
        })
    }

    async fn probe_duration(
        &self,
        _clip: &GeneratedClip,
        _cancel: &CancellationToken,
    ) -> Result<f64> {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        self.measured_duration
            .ok_or_else(|| ProviderError::ToolFailure {
                tool: "ffprobe".to_string(),
                message: "no duration".to_string(),
            })
    }

    async fn extract_last_frame(
        &self,
        clip: &GeneratedClip,
        _cancel: &CancellationToken,
    ) -> Result<MediaInput> {
        if self.fail_frames {
            return Err(ProviderError::ToolFailure {
                tool: "ffmpeg".to_string(),
                message: "scripted frame failure".to_string(),
            });
        }
        Ok(MediaInput::new(frame_bytes(clip.bytes()), "image/png"))
    }
}
