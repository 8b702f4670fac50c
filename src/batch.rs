use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tracing::{info, warn};

use crate::{
    error::ClipreelError,
    model::{AssetKind, AudioAsset, ImageAsset, JobState, Scene, SceneId},
    session::SessionContext,
    source::{AssetSource, with_retry},
    store::JobOutcome,
};

/// Default number of generation jobs in flight per window.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Delay between windows, pacing the upstream service below its rate limits.
pub const WINDOW_PACING: Duration = Duration::from_millis(200);

/// One unit of generation work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchJob {
    pub scene: SceneId,
    pub kind: AssetKind,
}

/// Partial-success summary of one batch run. `run_batch` itself never fails.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: Vec<(BatchJob, String)>,
    /// Most recent quota error, surfaced once for the whole batch.
    pub quota: Option<String>,
    /// Credential error; the caller must stop submitting until corrected.
    pub credential: Option<String>,
    /// True when another batch already held the generation domain.
    pub skipped: bool,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        !self.skipped && self.failed.is_empty()
    }
}

/// Windowed batch runner for per-scene asset generation.
///
/// Jobs run in consecutive windows of at most `concurrency`; a window must
/// fully settle before the next starts, and a fixed pacing delay separates
/// windows. Job failures are caught at the job boundary and written to that
/// scene's state; siblings and later windows are never aborted.
pub struct BatchScheduler {
    source: Arc<dyn AssetSource>,
    guard: tokio::sync::Mutex<()>,
}

impl BatchScheduler {
    pub fn new(source: Arc<dyn AssetSource>) -> Self {
        Self {
            source,
            guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Jobs for every asset slot that is not already `Ready`. The scheduler
    /// itself does not deduplicate; this is the caller-side skip.
    pub fn plan_missing_jobs(snapshot: &[Scene]) -> Vec<BatchJob> {
        let mut jobs = Vec::new();
        for scene in snapshot {
            for kind in [AssetKind::Image, AssetKind::Audio] {
                if scene.state(kind) != JobState::Ready {
                    jobs.push(BatchJob {
                        scene: scene.id,
                        kind,
                    });
                }
            }
        }
        jobs
    }

    pub async fn run_batch(
        &self,
        ctx: &SessionContext,
        jobs: Vec<BatchJob>,
        concurrency: usize,
    ) -> BatchReport {
        let mut report = BatchReport {
            submitted: jobs.len(),
            ..BatchReport::default()
        };

        let Ok(_domain) = self.guard.try_lock() else {
            warn!("generation batch already running, new batch skipped");
            report.skipped = true;
            return report;
        };

        let concurrency = concurrency.max(1);
        let windows: Vec<&[BatchJob]> = jobs.chunks(concurrency).collect();
        let window_count = windows.len();

        for (idx, window) in windows.into_iter().enumerate() {
            let results = join_all(window.iter().map(|job| self.run_job(ctx, *job))).await;

            for (job, result) in window.iter().zip(results) {
                match result {
                    Ok(()) => report.succeeded += 1,
                    Err(err) => {
                        if err.is_quota() {
                            report.quota = Some(err.to_string());
                        }
                        if err.is_credential() {
                            report.credential = Some(err.to_string());
                        }
                        report.failed.push((*job, err.to_string()));
                    }
                }
            }

            info!(
                window = idx + 1,
                windows = window_count,
                succeeded = report.succeeded,
                failed = report.failed.len(),
                "generation window settled"
            );

            if idx + 1 < window_count {
                tokio::time::sleep(WINDOW_PACING).await;
            }
        }

        report
    }

    /// The job boundary: any failure is converted into a `Failed` state on
    /// the target slot and returned for the report, never propagated.
    async fn run_job(&self, ctx: &SessionContext, job: BatchJob) -> Result<(), ClipreelError> {
        let Some(scene) = ctx.store.get(job.scene) else {
            return Err(ClipreelError::validation(format!(
                "{} no longer exists",
                job.scene
            )));
        };

        ctx.store.mark_pending(job.scene, job.kind);

        let outcome = match job.kind {
            AssetKind::Image => self.generate_image(ctx, &scene).await,
            AssetKind::Audio => self.generate_audio(ctx, &scene).await,
        };

        match outcome {
            Ok(ready) => {
                ctx.store.apply(job.scene, ready);
                Ok(())
            }
            Err(err) => {
                warn!(scene = %job.scene, kind = %job.kind, %err, "generation job failed");
                ctx.store.apply(job.scene, JobOutcome::Failed(job.kind));
                Err(err)
            }
        }
    }

    async fn generate_image(
        &self,
        ctx: &SessionContext,
        scene: &Scene,
    ) -> Result<JobOutcome, ClipreelError> {
        let payload = with_retry(ctx.retry, || {
            self.source.generate_image(
                &scene.image_prompt,
                ctx.shape,
                &ctx.protagonist.description,
                ctx.protagonist.reference_image.as_deref(),
            )
        })
        .await?;
        let asset = ImageAsset::decode(&payload)?;
        Ok(JobOutcome::ImageReady(asset))
    }

    async fn generate_audio(
        &self,
        ctx: &SessionContext,
        scene: &Scene,
    ) -> Result<JobOutcome, ClipreelError> {
        let payload = with_retry(ctx.retry, || {
            self.source.generate_speech(&scene.description, &ctx.voice)
        })
        .await?;
        let asset = AudioAsset::from_wav(payload)?;
        Ok(JobOutcome::AudioReady(asset))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        error::ClipreelResult,
        mock::MockSource,
        model::{ExportShape, Idea, JobState, SceneId, SceneSpec, Script},
        store::SceneStore,
    };

    fn session_with_scenes(specs: Vec<SceneSpec>) -> SessionContext {
        let store = SceneStore::new();
        store.replace_all(specs);
        let mut ctx = SessionContext::new(store, ExportShape::Wide);
        ctx.retry.base_delay = Duration::from_millis(1);
        ctx
    }

    fn spec(id: u32, description: &str) -> SceneSpec {
        SceneSpec {
            id: SceneId(id),
            description: description.to_string(),
            image_prompt: format!("still {id}"),
            video_prompt: String::new(),
        }
    }

    /// Delegates to [`MockSource`] while tracking how many calls are in
    /// flight at once.
    struct CountingSource {
        inner: MockSource,
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                inner: MockSource::with_latency(Duration::from_millis(10)),
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }
        }

        fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AssetSource for CountingSource {
        async fn generate_ideas(&self, keyword: Option<&str>) -> ClipreelResult<Vec<Idea>> {
            self.inner.generate_ideas(keyword).await
        }

        async fn generate_script(
            &self,
            title: &str,
            protagonist_name: &str,
            shorts: bool,
        ) -> ClipreelResult<Script> {
            self.inner.generate_script(title, protagonist_name, shorts).await
        }

        async fn segment_script(
            &self,
            script: &str,
            style_anchor: &str,
            shorts: bool,
        ) -> ClipreelResult<Vec<SceneSpec>> {
            self.inner.segment_script(script, style_anchor, shorts).await
        }

        async fn generate_image(
            &self,
            prompt: &str,
            shape: ExportShape,
            style_anchor: &str,
            reference: Option<&[u8]>,
        ) -> ClipreelResult<Vec<u8>> {
            self.enter();
            let out = self
                .inner
                .generate_image(prompt, shape, style_anchor, reference)
                .await;
            self.exit();
            out
        }

        async fn generate_speech(&self, text: &str, voice: &str) -> ClipreelResult<Vec<u8>> {
            self.enter();
            let out = self.inner.generate_speech(text, voice).await;
            self.exit();
            out
        }
    }

    #[tokio::test]
    async fn no_job_stays_pending_after_a_batch() {
        let ctx = session_with_scenes(vec![
            spec(1, "fine"),
            spec(2, "[fail] broken"),
            spec(3, "also fine"),
        ]);
        let scheduler = BatchScheduler::new(Arc::new(MockSource::new()));

        let jobs = BatchScheduler::plan_missing_jobs(&ctx.store.snapshot());
        assert_eq!(jobs.len(), 6);
        let report = scheduler.run_batch(&ctx, jobs, DEFAULT_CONCURRENCY).await;

        assert!(!report.skipped);
        for scene in ctx.store.snapshot() {
            for kind in [AssetKind::Image, AssetKind::Audio] {
                let state = scene.state(kind);
                assert!(
                    state == JobState::Ready || state == JobState::Failed,
                    "{} {kind} ended as {state:?}",
                    scene.id
                );
            }
        }
        // Scene 2's audio job fails on the [fail] marker; its image prompt
        // does not carry the marker so the sibling job succeeds.
        assert_eq!(
            ctx.store.get(SceneId(2)).unwrap().audio_state,
            JobState::Failed
        );
        assert_eq!(
            ctx.store.get(SceneId(2)).unwrap().image_state,
            JobState::Ready
        );
    }

    #[tokio::test]
    async fn in_flight_jobs_never_exceed_concurrency() {
        let specs = (1..=9).map(|i| spec(i, "words here")).collect();
        let ctx = session_with_scenes(specs);
        let source = Arc::new(CountingSource::new());
        let scheduler = BatchScheduler::new(source.clone());

        let jobs = BatchScheduler::plan_missing_jobs(&ctx.store.snapshot());
        assert_eq!(jobs.len(), 18);
        scheduler.run_batch(&ctx, jobs, 3).await;

        assert!(source.high_water.load(Ordering::SeqCst) <= 3);
        assert!(source.high_water.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn quota_failure_leaves_sibling_outcomes_alone() {
        let ctx = session_with_scenes(vec![
            spec(1, "a"),
            spec(2, "b"),
            spec(3, "[quota] c"),
            spec(4, "d"),
            spec(5, "e"),
        ]);
        let scheduler = BatchScheduler::new(Arc::new(MockSource::new()));

        // Audio-only batch of five jobs, one of which hits the quota wall.
        let jobs = (1..=5)
            .map(|i| BatchJob {
                scene: SceneId(i),
                kind: AssetKind::Audio,
            })
            .collect();
        let report = scheduler.run_batch(&ctx, jobs, 3).await;

        assert!(report.quota.is_some());
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed.len(), 1);
        for id in [1, 2, 4, 5] {
            assert_eq!(
                ctx.store.get(SceneId(id)).unwrap().audio_state,
                JobState::Ready
            );
        }
        assert_eq!(
            ctx.store.get(SceneId(3)).unwrap().audio_state,
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn concurrent_batch_is_skipped() {
        let ctx = session_with_scenes(vec![spec(1, "slow scene")]);
        let source = Arc::new(MockSource::with_latency(Duration::from_millis(50)));
        let scheduler = Arc::new(BatchScheduler::new(source));

        let jobs = BatchScheduler::plan_missing_jobs(&ctx.store.snapshot());
        let first = {
            let scheduler = scheduler.clone();
            let ctx = ctx.clone();
            let jobs = jobs.clone();
            tokio::spawn(async move { scheduler.run_batch(&ctx, jobs, 3).await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = scheduler.run_batch(&ctx, jobs, 3).await;
        assert!(second.skipped);

        let first = first.await.unwrap();
        assert!(!first.skipped);
        assert!(first.all_succeeded());
    }

    #[tokio::test]
    async fn plan_skips_ready_slots() {
        let ctx = session_with_scenes(vec![spec(1, "x"), spec(2, "y")]);
        let scheduler = BatchScheduler::new(Arc::new(MockSource::new()));
        let jobs = BatchScheduler::plan_missing_jobs(&ctx.store.snapshot());
        scheduler.run_batch(&ctx, jobs, 3).await;

        let replan = BatchScheduler::plan_missing_jobs(&ctx.store.snapshot());
        assert!(replan.is_empty(), "ready slots are not resubmitted");
    }
}
