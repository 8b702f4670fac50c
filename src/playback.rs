use std::time::Duration;

use tracing::debug;

use crate::{
    model::{JobState, Scene},
    store::SceneStore,
};

/// Dwell for a scene with no narration track.
pub const FALLBACK_DWELL: Duration = Duration::from_millis(2500);

/// What the preview should show next and for how long.
#[derive(Clone, Debug)]
pub struct Cue {
    /// 1-based ordinal of the scene in the full list.
    pub ordinal: usize,
    pub scene: Scene,
    pub dwell: Duration,
}

/// Preview cursor over the scenes that have an image to show.
///
/// Timing mirrors the export loop without encoding anything: a scene with
/// audio holds for its natural duration, a scene without audio holds for the
/// fixed fallback. One full pass stops playback and parks the cursor back on
/// the first scene; there is no auto-loop.
pub struct PlaybackController {
    store: SceneStore,
    cursor: usize,
    playing: bool,
}

impl PlaybackController {
    pub fn new(store: SceneStore) -> Self {
        Self {
            store,
            cursor: 0,
            playing: false,
        }
    }

    /// Scenes with a ready image, with their original ordinals. Audio is
    /// optional here; the fallback dwell covers silent scenes.
    fn preview_scenes(&self) -> Vec<(usize, Scene)> {
        self.store
            .snapshot()
            .into_iter()
            .enumerate()
            .filter(|(_, s)| s.image_state == JobState::Ready)
            .map(|(i, s)| (i + 1, s))
            .collect()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn play(&mut self) {
        if !self.preview_scenes().is_empty() {
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Clamp-seek within the preview subset.
    pub fn seek(&mut self, index: usize) {
        let len = self.preview_scenes().len();
        if len > 0 {
            self.cursor = index.min(len - 1);
        }
    }

    /// The cue under the cursor, if any scene is previewable.
    pub fn current(&self) -> Option<Cue> {
        let scenes = self.preview_scenes();
        let (ordinal, scene) = scenes.get(self.cursor)?.clone();
        let dwell = scene
            .audio
            .as_ref()
            .map(|a| Duration::from_secs_f64(a.duration_sec()))
            .unwrap_or(FALLBACK_DWELL);
        Some(Cue {
            ordinal,
            scene,
            dwell,
        })
    }

    /// Step past the current scene; the end of the pass stops playback and
    /// resets to the first scene.
    pub fn advance(&mut self) {
        let len = self.preview_scenes().len();
        if len == 0 {
            self.playing = false;
            self.cursor = 0;
            return;
        }
        if self.cursor + 1 < len {
            self.cursor += 1;
        } else {
            debug!("preview pass complete");
            self.playing = false;
            self.cursor = 0;
        }
    }

    /// Drive one full preview pass, sleeping each cue's dwell.
    pub async fn play_once(&mut self) {
        self.cursor = 0;
        self.play();
        while self.playing {
            let Some(cue) = self.current() else {
                self.pause();
                break;
            };
            debug!(ordinal = cue.ordinal, dwell_ms = cue.dwell.as_millis() as u64, "preview cue");
            tokio::time::sleep(cue.dwell).await;
            self.advance();
        }
    }
}
