use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::model::{AssetKind, AudioAsset, ImageAsset, JobState, Scene, SceneId, SceneSpec};

/// Result of one finished generation job, applied to the store as a single
/// command so the asset handle and its state always transition together.
#[derive(Debug)]
pub enum JobOutcome {
    ImageReady(ImageAsset),
    AudioReady(AudioAsset),
    Failed(AssetKind),
}

impl JobOutcome {
    pub fn kind(&self) -> AssetKind {
        match self {
            JobOutcome::ImageReady(_) => AssetKind::Image,
            JobOutcome::AudioReady(_) => AssetKind::Audio,
            JobOutcome::Failed(kind) => *kind,
        }
    }
}

/// Single source of truth for the session's scenes.
///
/// All mutation goes through commands executed under one lock: job completion
/// handlers call [`SceneStore::apply`], user edits call the `set_*` methods.
/// Each in-flight job owns its (scene, kind) slot exclusively, so the last
/// applied command for a slot wins.
#[derive(Clone, Default)]
pub struct SceneStore {
    inner: Arc<Mutex<Vec<Scene>>>,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the current scene list and rebuild it from a fresh
    /// segmentation. The only destruction path; there is no per-scene delete.
    pub fn replace_all(&self, specs: Vec<SceneSpec>) {
        let scenes = specs.into_iter().map(Scene::new).collect::<Vec<_>>();
        debug!(count = scenes.len(), "scene list replaced");
        *self.lock() = scenes;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Scene> {
        self.lock().clone()
    }

    pub fn get(&self, id: SceneId) -> Option<Scene> {
        self.lock().iter().find(|s| s.id == id).cloned()
    }

    /// Export-ready scenes with their 1-based ordinal in the full list.
    /// Ordinals are stable across filtering: a non-ready scene's ordinal is
    /// simply absent, never reused.
    pub fn ready_scenes(&self) -> Vec<(usize, Scene)> {
        self.lock()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_export_ready())
            .map(|(i, s)| (i + 1, s.clone()))
            .collect()
    }

    pub fn mark_pending(&self, id: SceneId, kind: AssetKind) {
        let mut scenes = self.lock();
        if let Some(scene) = scenes.iter_mut().find(|s| s.id == id) {
            match kind {
                AssetKind::Image => scene.image_state = JobState::Pending,
                AssetKind::Audio => scene.audio_state = JobState::Pending,
            }
        }
    }

    /// Apply a job outcome atomically: asset and state change in one step.
    /// A failure marks the slot `Failed` but never clears an asset a previous
    /// successful job materialized.
    pub fn apply(&self, id: SceneId, outcome: JobOutcome) {
        let mut scenes = self.lock();
        let Some(scene) = scenes.iter_mut().find(|s| s.id == id) else {
            debug!(%id, "apply for unknown scene dropped");
            return;
        };
        match outcome {
            JobOutcome::ImageReady(asset) => {
                scene.image = Some(asset);
                scene.image_state = JobState::Ready;
            }
            JobOutcome::AudioReady(asset) => {
                scene.audio = Some(asset);
                scene.audio_state = JobState::Ready;
            }
            JobOutcome::Failed(AssetKind::Image) => scene.image_state = JobState::Failed,
            JobOutcome::Failed(AssetKind::Audio) => scene.audio_state = JobState::Failed,
        }
    }

    pub fn set_description(&self, id: SceneId, text: impl Into<String>) {
        if let Some(scene) = self.lock().iter_mut().find(|s| s.id == id) {
            scene.description = text.into();
        }
    }

    pub fn set_image_prompt(&self, id: SceneId, text: impl Into<String>) {
        if let Some(scene) = self.lock().iter_mut().find(|s| s.id == id) {
            scene.image_prompt = text.into();
        }
    }

    pub fn set_video_prompt(&self, id: SceneId, text: impl Into<String>) {
        if let Some(scene) = self.lock().iter_mut().find(|s| s.id == id) {
            scene.video_prompt = text.into();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Scene>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
