use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::{audio::WavInfo, error::ClipreelResult};

/// Frame rate shared by preview timing and every export shape.
pub const FPS: u32 = 30;

/// Fixed audio bitrate for all encodes.
pub const AUDIO_BITRATE: u32 = 96_000;

/// Stable per-session scene identity.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SceneId(pub u32);

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scene {}", self.0)
    }
}

/// Which of a scene's two generated assets a job targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Audio,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Image => write!(f, "image"),
            AssetKind::Audio => write!(f, "audio"),
        }
    }
}

/// Per-(scene, kind) generation state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Idle,
    Pending,
    Ready,
    Failed,
}

/// Decoded still image, opaque RGBA8.
#[derive(Clone)]
pub struct ImageAsset {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl ImageAsset {
    /// Decode an encoded image payload (PNG/JPEG/WebP) into RGBA8.
    pub fn decode(bytes: &[u8]) -> ClipreelResult<Self> {
        let dyn_img = image::load_from_memory(bytes).context("decode image from memory")?;
        let rgba = dyn_img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            rgba: rgba.into_raw(),
        })
    }

    pub fn aspect(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

impl std::fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAsset")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rgba_len", &self.rgba.len())
            .finish()
    }
}

/// Generated speech track: the WAV container bytes plus the parsed header.
#[derive(Clone)]
pub struct AudioAsset {
    pub wav: Vec<u8>,
    pub info: WavInfo,
}

impl AudioAsset {
    pub fn from_wav(wav: Vec<u8>) -> ClipreelResult<Self> {
        let info = WavInfo::parse(&wav)?;
        Ok(Self { wav, info })
    }

    pub fn duration_sec(&self) -> f64 {
        self.info.duration_sec()
    }

    /// The raw PCM payload inside the container.
    pub fn pcm_bytes(&self) -> &[u8] {
        let start = self.info.data_offset as usize;
        &self.wav[start..start + self.info.data_len as usize]
    }
}

impl std::fmt::Debug for AudioAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioAsset")
            .field("bytes", &self.wav.len())
            .field("duration_sec", &self.duration_sec())
            .finish()
    }
}

/// The serializable part of a scene: what segmentation produces and what the
/// CLI accepts as input. Assets and job states start empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneSpec {
    pub id: SceneId,
    pub description: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub video_prompt: String,
}

/// One narrated beat of the script.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub id: SceneId,
    pub description: String,
    pub image_prompt: String,
    pub video_prompt: String,
    pub image: Option<ImageAsset>,
    pub audio: Option<AudioAsset>,
    pub image_state: JobState,
    pub audio_state: JobState,
}

impl Scene {
    pub fn new(spec: SceneSpec) -> Self {
        Self {
            id: spec.id,
            description: spec.description,
            image_prompt: spec.image_prompt,
            video_prompt: spec.video_prompt,
            ..Self::default()
        }
    }

    /// A scene can be exported iff both assets are materialized.
    pub fn is_export_ready(&self) -> bool {
        self.image_state == JobState::Ready && self.audio_state == JobState::Ready
    }

    pub fn state(&self, kind: AssetKind) -> JobState {
        match kind {
            AssetKind::Image => self.image_state,
            AssetKind::Audio => self.audio_state,
        }
    }
}

/// Shared visual style anchor biasing every image generation call.
#[derive(Clone, Debug, Default)]
pub struct Protagonist {
    pub description: String,
    pub reference_image: Option<Vec<u8>>,
}

/// Output geometry. Wide is the long-form 16:9 shape, Tall the shorts 9:16
/// shape; bitrate follows the shape, fps does not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportShape {
    #[default]
    Wide,
    Tall,
}

impl ExportShape {
    pub fn width(self) -> u32 {
        match self {
            ExportShape::Wide => 1280,
            ExportShape::Tall => 720,
        }
    }

    pub fn height(self) -> u32 {
        match self {
            ExportShape::Wide => 720,
            ExportShape::Tall => 1280,
        }
    }

    pub fn video_bitrate(self) -> u32 {
        match self {
            ExportShape::Wide => 2_500_000,
            ExportShape::Tall => 2_000_000,
        }
    }

    pub fn aspect(self) -> f64 {
        f64::from(self.width()) / f64::from(self.height())
    }
}

/// A pitched video idea from the upstream text model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Idea {
    pub title: String,
    pub premise: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A sectioned narration script.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    pub sections: Vec<ScriptSection>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptSection {
    pub id: u32,
    pub title: String,
    pub content: String,
}

impl Script {
    /// Full narration text in section order.
    pub fn full_text(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
