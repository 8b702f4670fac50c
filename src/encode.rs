use std::sync::Arc;

use tracing::debug;

use crate::{
    compose,
    error::{ClipreelError, ClipreelResult},
    model::{AUDIO_BITRATE, ExportShape, FPS, Scene},
    record::{RecordConfig, RecordingFactory, RecordingSession, select_profile},
};

/// Guard against a corrupt audio header producing a runaway encode.
pub const MAX_CLIP_DURATION_SEC: f64 = 600.0;

/// Lifecycle of one encode. Purely diagnostic; transitions are logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderPhase {
    Idle,
    Recording,
    Finalizing,
    Done,
    Failed,
}

/// One finished audiovisual unit covering one scene's duration.
#[derive(Clone, Debug)]
pub struct EncodedClip {
    pub bytes: Vec<u8>,
    pub ext: &'static str,
    pub duration_sec: f64,
    pub frame_count: u64,
}

/// Binds one scene's rendered surface and audio track into a clip.
///
/// Timing is derived, not observed: the clip spans exactly the audio
/// duration at the fixed frame rate, so there is no playback event that
/// could stall the encode.
#[derive(Clone)]
pub struct ClipEncoder {
    factory: Arc<dyn RecordingFactory>,
    shape: ExportShape,
}

impl ClipEncoder {
    pub fn new(factory: Arc<dyn RecordingFactory>, shape: ExportShape) -> Self {
        Self { factory, shape }
    }

    pub fn shape(&self) -> ExportShape {
        self.shape
    }

    pub fn factory(&self) -> &Arc<dyn RecordingFactory> {
        &self.factory
    }

    /// Frames covering `duration_sec` at the fixed rate, never zero.
    pub fn frame_count_for(duration_sec: f64) -> u64 {
        ((duration_sec * f64::from(FPS)).round() as u64).max(1)
    }

    /// Check the §4.3 preconditions without opening anything.
    pub fn validate_scene(scene: &Scene) -> ClipreelResult<f64> {
        if scene.image.is_none() {
            return Err(ClipreelError::asset_missing(format!(
                "{} has no image asset",
                scene.id
            )));
        }
        let audio = scene.audio.as_ref().ok_or_else(|| {
            ClipreelError::asset_missing(format!("{} has no audio asset", scene.id))
        })?;

        let duration = audio.duration_sec();
        if duration <= 0.0 {
            return Err(ClipreelError::validation(format!(
                "{} audio has zero duration",
                scene.id
            )));
        }
        if duration > MAX_CLIP_DURATION_SEC {
            return Err(ClipreelError::validation(format!(
                "{} audio duration {duration:.1}s exceeds the {MAX_CLIP_DURATION_SEC:.0}s clip cap",
                scene.id
            )));
        }
        Ok(duration)
    }

    pub fn record_config(&self) -> ClipreelResult<RecordConfig> {
        let caps = self.factory.capabilities()?;
        let profile = select_profile(&caps).ok_or_else(|| {
            ClipreelError::encoding_unavailable(
                "runtime supports none of the preferred codec/container profiles",
            )
        })?;
        Ok(RecordConfig {
            width: self.shape.width(),
            height: self.shape.height(),
            fps: FPS,
            video_bitrate: self.shape.video_bitrate(),
            audio_bitrate: AUDIO_BITRATE,
            profile,
        })
    }

    /// Encode one scene, blocking. Both assets must be present; the check
    /// runs before any session resource is opened.
    pub fn encode_scene(&self, scene: &Scene) -> ClipreelResult<EncodedClip> {
        let duration = Self::validate_scene(scene)?;
        let cfg = self.record_config()?;

        let image = scene.image.as_ref().ok_or_else(|| {
            ClipreelError::asset_missing(format!("{} has no image asset", scene.id))
        })?;
        let audio = scene.audio.as_ref().ok_or_else(|| {
            ClipreelError::asset_missing(format!("{} has no audio asset", scene.id))
        })?;

        let surface = compose::render(image, cfg.width, cfg.height)?;
        let frame_count = Self::frame_count_for(duration);

        let mut session = self.factory.open(cfg)?;
        debug!(scene = %scene.id, frame_count, phase = ?EncoderPhase::Recording, "encoding clip");

        let recorded = push_clip(session.as_mut(), &surface, frame_count, audio);
        match recorded {
            Ok(()) => {
                debug!(scene = %scene.id, phase = ?EncoderPhase::Finalizing, "finalizing clip");
                let bytes = session.finish()?;
                debug!(scene = %scene.id, phase = ?EncoderPhase::Done, "clip done");
                Ok(EncodedClip {
                    bytes,
                    ext: cfg.profile.ext,
                    duration_sec: duration,
                    frame_count,
                })
            }
            Err(err) => {
                debug!(scene = %scene.id, phase = ?EncoderPhase::Failed, %err, "clip failed");
                session.abort();
                Err(err)
            }
        }
    }

    /// Async wrapper: runs the blocking encode off the cooperative executor.
    pub async fn encode(&self, scene: Scene) -> ClipreelResult<EncodedClip> {
        let encoder = self.clone();
        tokio::task::spawn_blocking(move || encoder.encode_scene(&scene))
            .await
            .map_err(|e| ClipreelError::validation(format!("encode task panicked: {e}")))?
    }
}

fn push_clip(
    session: &mut dyn RecordingSession,
    surface: &crate::compose::Surface,
    frame_count: u64,
    audio: &crate::model::AudioAsset,
) -> ClipreelResult<()> {
    for _ in 0..frame_count {
        session.push_frame(surface)?;
    }
    session.push_audio(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio,
        model::{AudioAsset, ImageAsset, JobState, SceneId},
        record::MemoryFactory,
    };

    fn ready_scene(id: u32, seconds: f64) -> Scene {
        Scene {
            id: SceneId(id),
            description: "scene".into(),
            image: Some(ImageAsset {
                width: 4,
                height: 4,
                rgba: vec![200u8; 4 * 4 * 4],
            }),
            audio: Some(
                AudioAsset::from_wav(audio::silent_wav(seconds, audio::SPEECH_SAMPLE_RATE))
                    .unwrap(),
            ),
            image_state: JobState::Ready,
            audio_state: JobState::Ready,
            ..Scene::default()
        }
    }

    #[test]
    fn frame_count_rounds_and_never_hits_zero() {
        assert_eq!(ClipEncoder::frame_count_for(1.0), 30);
        assert_eq!(ClipEncoder::frame_count_for(2.5), 75);
        assert_eq!(ClipEncoder::frame_count_for(0.001), 1);
    }

    #[test]
    fn missing_asset_is_rejected_before_any_open() {
        let factory = MemoryFactory::new();
        let encoder = ClipEncoder::new(Arc::new(factory.clone()), ExportShape::Wide);

        let mut scene = ready_scene(1, 1.0);
        scene.audio = None;
        let err = encoder.encode_scene(&scene).unwrap_err();
        assert!(matches!(err, ClipreelError::AssetMissing(_)));

        let mut scene = ready_scene(2, 1.0);
        scene.image = None;
        assert!(encoder.encode_scene(&scene).is_err());

        assert_eq!(factory.opens(), 0, "no session may open for a rejected scene");
    }

    #[test]
    fn over_cap_audio_is_rejected() {
        let scene = ready_scene(1, MAX_CLIP_DURATION_SEC + 5.0);
        let err = ClipEncoder::validate_scene(&scene).unwrap_err();
        assert!(matches!(err, ClipreelError::Validation(_)));

        let scene = ready_scene(1, 1.0);
        assert!((ClipEncoder::validate_scene(&scene).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn no_supported_profile_is_encoding_unavailable() {
        let factory = MemoryFactory::new().with_encoders(["mjpeg"]);
        let encoder = ClipEncoder::new(Arc::new(factory.clone()), ExportShape::Wide);
        let err = encoder.encode_scene(&ready_scene(1, 1.0)).unwrap_err();
        assert!(matches!(err, ClipreelError::EncodingUnavailable(_)));
        assert_eq!(factory.opens(), 0);
    }

    #[test]
    fn clip_spans_exactly_the_audio_duration() {
        let factory = MemoryFactory::new();
        let encoder = ClipEncoder::new(Arc::new(factory.clone()), ExportShape::Tall);

        let clip = encoder.encode_scene(&ready_scene(1, 2.0)).unwrap();
        assert_eq!(clip.frame_count, 60);
        assert_eq!(clip.ext, "mp4");

        let records = factory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame_marks.len(), 60);
        assert_eq!(records[0].audio_secs.len(), 1);
        assert_eq!(records[0].config.width, ExportShape::Tall.width());
        assert_eq!(
            records[0].config.video_bitrate,
            ExportShape::Tall.video_bitrate()
        );
    }

    #[tokio::test]
    async fn async_encode_matches_sync() {
        let factory = MemoryFactory::new();
        let encoder = ClipEncoder::new(Arc::new(factory), ExportShape::Wide);
        let clip = encoder.encode(ready_scene(3, 1.5)).await.unwrap();
        assert_eq!(clip.frame_count, 45);
    }
}
