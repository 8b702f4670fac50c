use std::{
    io::Write as _,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
};

use futures::future::join_all;
use tracing::{info, warn};

use crate::{
    compose,
    encode::{ClipEncoder, EncodedClip},
    error::{ClipreelError, ClipreelResult},
    model::{Scene, SceneId},
    record::RecordingSession,
    store::SceneStore,
};

/// Clips encoded concurrently per window during a ZIP export. Bounded for
/// the same reason generation is: the encoding resources are shared.
pub const ZIP_CONCURRENCY: usize = 5;

/// Observable state of the export domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportStatus {
    #[default]
    Idle,
    Exporting {
        percent: u8,
        /// 1-based ordinal of the scene currently on the shared surface
        /// (continuous export drives the preview through this).
        current_ordinal: Option<usize>,
    },
    Done,
    Failed,
}

/// Result of asking for an export while respecting mutual exclusion: `Busy`
/// means another export holds the domain and this call was a no-op.
#[derive(Debug)]
pub enum ExportOutcome<T> {
    Completed(T),
    Busy,
}

impl<T> ExportOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            ExportOutcome::Completed(value) => Some(value),
            ExportOutcome::Busy => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, ExportOutcome::Busy)
    }
}

/// A packaged all-scenes export.
#[derive(Debug)]
pub struct ZipExport {
    pub bytes: Vec<u8>,
    /// Entry names in archive order, `"<ordinal>.<ext>"`.
    pub entry_names: Vec<String>,
    /// Ordinals of clips that failed to encode and were dropped.
    pub failed_ordinals: Vec<usize>,
}

/// Sequences clip encodes for the three export shapes.
///
/// All three operations share one exclusion guard: they contend for the same
/// encoder resources, and a second export requested while one runs must be a
/// no-op rather than an error or a queue.
pub struct ExportOrchestrator {
    store: SceneStore,
    encoder: ClipEncoder,
    guard: Arc<tokio::sync::Mutex<()>>,
    status: Arc<Mutex<ExportStatus>>,
}

impl ExportOrchestrator {
    pub fn new(store: SceneStore, encoder: ClipEncoder) -> Self {
        Self {
            store,
            encoder,
            guard: Arc::new(tokio::sync::Mutex::new(())),
            status: Arc::new(Mutex::new(ExportStatus::Idle)),
        }
    }

    pub fn status(&self) -> ExportStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ExportStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Encode exactly one scene's clip. Returns the scene's 1-based ordinal
    /// in the full list alongside the clip; a scene that is not export-ready
    /// is rejected before any resource opens.
    pub async fn export_scene(
        &self,
        id: SceneId,
    ) -> ClipreelResult<ExportOutcome<(usize, EncodedClip)>> {
        let Ok(_domain) = self.guard.clone().try_lock_owned() else {
            info!(%id, "export domain busy, single-scene export ignored");
            return Ok(ExportOutcome::Busy);
        };

        let snapshot = self.store.snapshot();
        let Some((idx, scene)) = snapshot.iter().enumerate().find(|(_, s)| s.id == id) else {
            return Err(ClipreelError::validation(format!("{id} does not exist")));
        };
        if !scene.is_export_ready() {
            return Err(ClipreelError::asset_missing(format!(
                "{id} is not export-ready"
            )));
        }
        let ordinal = idx + 1;

        self.set_status(ExportStatus::Exporting {
            percent: 0,
            current_ordinal: Some(ordinal),
        });
        match self.encoder.encode(scene.clone()).await {
            Ok(clip) => {
                self.set_status(ExportStatus::Done);
                Ok(ExportOutcome::Completed((ordinal, clip)))
            }
            Err(err) => {
                self.set_status(ExportStatus::Failed);
                Err(err)
            }
        }
    }

    /// Encode every ready scene into an archive of numbered clips.
    ///
    /// Scenes encode in windows of [`ZIP_CONCURRENCY`]; entries are keyed by
    /// the scene's original ordinal regardless of completion order, and a
    /// clip that fails to encode is dropped from the archive instead of
    /// aborting the export.
    pub async fn export_zip(
        &self,
        progress: impl Fn(u8) + Send + Sync + 'static,
    ) -> ClipreelResult<ExportOutcome<ZipExport>> {
        let Ok(_domain) = self.guard.clone().try_lock_owned() else {
            info!("export domain busy, zip export ignored");
            return Ok(ExportOutcome::Busy);
        };

        let ready = self.store.ready_scenes();
        if ready.is_empty() {
            return Err(ClipreelError::validation(
                "no export-ready scenes to package",
            ));
        }

        let reporter = ProgressReporter::new(self.status.clone(), progress);
        reporter.report(0, ready.len(), None);

        let total = ready.len();
        let mut clips: Vec<(usize, EncodedClip)> = Vec::new();
        let mut failed_ordinals = Vec::new();
        let mut completed = 0usize;

        for window in ready.chunks(ZIP_CONCURRENCY) {
            let results = join_all(window.iter().map(|(ordinal, scene)| {
                let encoder = self.encoder.clone();
                let scene = scene.clone();
                let ordinal = *ordinal;
                async move { (ordinal, encoder.encode(scene).await) }
            }))
            .await;

            for (ordinal, result) in results {
                completed += 1;
                reporter.report(completed, total, None);
                match result {
                    Ok(clip) => clips.push((ordinal, clip)),
                    Err(err) => {
                        warn!(ordinal, %err, "clip dropped from archive");
                        failed_ordinals.push(ordinal);
                    }
                }
            }
        }

        // Completion order within a window is unconstrained; the archive is
        // keyed by ordinal.
        clips.sort_by_key(|(ordinal, _)| *ordinal);
        failed_ordinals.sort_unstable();

        let result = build_zip(&clips);
        match result {
            Ok((bytes, entry_names)) => {
                self.set_status(ExportStatus::Done);
                info!(
                    entries = entry_names.len(),
                    dropped = failed_ordinals.len(),
                    "zip export done"
                );
                Ok(ExportOutcome::Completed(ZipExport {
                    bytes,
                    entry_names,
                    failed_ordinals,
                }))
            }
            Err(err) => {
                self.set_status(ExportStatus::Failed);
                Err(err)
            }
        }
    }

    /// One continuous clip spanning every ready scene in stored order.
    ///
    /// A single session stays open for the whole run; each scene's image is
    /// composited onto the shared surface and held for exactly its audio
    /// duration, so segment boundaries are the audio boundaries.
    pub async fn export_continuous(
        &self,
        progress: impl Fn(u8) + Send + Sync + 'static,
    ) -> ClipreelResult<ExportOutcome<EncodedClip>> {
        let Ok(domain) = self.guard.clone().try_lock_owned() else {
            info!("export domain busy, continuous export ignored");
            return Ok(ExportOutcome::Busy);
        };

        let ready = self.store.ready_scenes();
        if ready.is_empty() {
            return Err(ClipreelError::validation(
                "no export-ready scenes to record",
            ));
        }

        let reporter = ProgressReporter::new(self.status.clone(), progress);
        reporter.report(0, ready.len(), ready.first().map(|(ordinal, _)| *ordinal));

        let encoder = self.encoder.clone();
        let result = tokio::task::spawn_blocking(move || {
            // The guard rides into the blocking task so the domain stays
            // held for the full recording.
            let _domain = domain;
            record_continuous(&encoder, &ready, &reporter)
        })
        .await
        .map_err(|e| ClipreelError::validation(format!("continuous export panicked: {e}")))?;

        match result {
            Ok(clip) => {
                self.set_status(ExportStatus::Done);
                info!(
                    frames = clip.frame_count,
                    duration = clip.duration_sec,
                    "continuous export done"
                );
                Ok(ExportOutcome::Completed(clip))
            }
            Err(err) => {
                self.set_status(ExportStatus::Failed);
                Err(err)
            }
        }
    }
}

fn record_continuous(
    encoder: &ClipEncoder,
    ready: &[(usize, Scene)],
    reporter: &ProgressReporter,
) -> ClipreelResult<EncodedClip> {
    // Validate the whole run before opening the shared session.
    let mut durations = Vec::with_capacity(ready.len());
    for (_, scene) in ready {
        durations.push(ClipEncoder::validate_scene(scene)?);
    }
    let cfg = encoder.record_config()?;

    let mut session = encoder.factory().open(cfg)?;
    let recorded = push_scenes(session.as_mut(), cfg, ready, &durations, reporter);
    match recorded {
        Ok((frame_count, duration_sec)) => {
            let bytes = session.finish()?;
            Ok(EncodedClip {
                bytes,
                ext: cfg.profile.ext,
                duration_sec,
                frame_count,
            })
        }
        Err(err) => {
            session.abort();
            Err(err)
        }
    }
}

fn push_scenes(
    session: &mut dyn RecordingSession,
    cfg: crate::record::RecordConfig,
    ready: &[(usize, Scene)],
    durations: &[f64],
    reporter: &ProgressReporter,
) -> ClipreelResult<(u64, f64)> {
    let total = ready.len();
    let mut frame_count = 0u64;
    let mut duration_sec = 0f64;

    for (i, ((ordinal, scene), duration)) in ready.iter().zip(durations).enumerate() {
        let image = scene.image.as_ref().ok_or_else(|| {
            ClipreelError::asset_missing(format!("{} has no image asset", scene.id))
        })?;
        let audio = scene.audio.as_ref().ok_or_else(|| {
            ClipreelError::asset_missing(format!("{} has no audio asset", scene.id))
        })?;

        let surface = compose::render(image, cfg.width, cfg.height)?;
        let frames = ClipEncoder::frame_count_for(*duration);
        for _ in 0..frames {
            session.push_frame(&surface)?;
        }
        session.push_audio(audio)?;

        frame_count += frames;
        duration_sec += *duration;
        reporter.report(i + 1, total, Some(*ordinal));
    }

    Ok((frame_count, duration_sec))
}

fn build_zip(clips: &[(usize, EncodedClip)]) -> ClipreelResult<(Vec<u8>, Vec<String>)> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    let mut entry_names = Vec::with_capacity(clips.len());

    for (ordinal, clip) in clips {
        let name = format!("{ordinal}.{}", clip.ext);
        writer
            .start_file(&name, options)
            .map_err(|e| ClipreelError::validation(format!("zip entry '{name}' failed: {e}")))?;
        writer
            .write_all(&clip.bytes)
            .map_err(|e| ClipreelError::validation(format!("zip write '{name}' failed: {e}")))?;
        entry_names.push(name);
    }

    let cursor = writer
        .finish()
        .map_err(|e| ClipreelError::validation(format!("zip finalize failed: {e}")))?;
    Ok((cursor.into_inner(), entry_names))
}

/// Monotonic 0–100 progress: a late completion can never move the number
/// backwards, and the status cell tracks every report.
struct ProgressReporter {
    status: Arc<Mutex<ExportStatus>>,
    callback: Box<dyn Fn(u8) + Send + Sync>,
    last: AtomicU8,
}

impl ProgressReporter {
    fn new(status: Arc<Mutex<ExportStatus>>, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            status,
            callback: Box::new(callback),
            last: AtomicU8::new(0),
        }
    }

    fn report(&self, completed: usize, total: usize, current_ordinal: Option<usize>) {
        let raw = ((completed * 100) / total.max(1)).min(100) as u8;
        let prev = self.last.fetch_max(raw, Ordering::SeqCst);
        let percent = raw.max(prev);
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = ExportStatus::Exporting {
            percent,
            current_ordinal,
        };
        (self.callback)(percent);
    }
}
