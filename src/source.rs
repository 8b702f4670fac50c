use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    error::{ClipreelError, ClipreelResult},
    model::{ExportShape, Idea, SceneSpec, Script},
};

/// The external generative collaborator.
///
/// Implementations are thin network adapters; every failure must arrive
/// already classified as one of the generation variants of [`ClipreelError`]
/// (`Quota`, `Credential`, `Transient`, `Generation`). Image payloads are
/// encoded image bytes, speech payloads are WAV bytes with a derivable
/// duration.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Pitch video ideas, optionally biased by a keyword.
    async fn generate_ideas(&self, keyword: Option<&str>) -> ClipreelResult<Vec<Idea>>;

    /// Write a sectioned narration script for one idea.
    async fn generate_script(
        &self,
        title: &str,
        protagonist_name: &str,
        shorts: bool,
    ) -> ClipreelResult<Script>;

    /// Split a script into scene specs without dropping narration text.
    async fn segment_script(
        &self,
        script: &str,
        style_anchor: &str,
        shorts: bool,
    ) -> ClipreelResult<Vec<SceneSpec>>;

    /// Render one scene image, biased by the shared style anchor and the
    /// optional protagonist reference image.
    async fn generate_image(
        &self,
        prompt: &str,
        shape: ExportShape,
        style_anchor: &str,
        reference: Option<&[u8]>,
    ) -> ClipreelResult<Vec<u8>>;

    /// Narrate one scene description with the given voice.
    async fn generate_speech(&self, text: &str, voice: &str) -> ClipreelResult<Vec<u8>>;
}

/// Retry policy for transient upstream failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential: base × 2^attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `op` under the retry policy. Only `Transient` errors retry; after the
/// attempt cap the last transient error surfaces as the job's failure. Quota
/// and credential failures short-circuit immediately.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> ClipreelResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClipreelResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!(attempt, %err, "transient upstream failure");
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| ClipreelError::generation("retry loop produced no error")))
}
