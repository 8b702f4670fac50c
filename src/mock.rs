//! Offline asset source.
//!
//! Generates solid-color PNG stills and silence WAV narration without any
//! network calls, deterministically from the request text. Backs the CLI's
//! offline mode and every test that exercises the pipeline.

use async_trait::async_trait;
use tracing::debug;

use crate::{
    audio,
    error::{ClipreelError, ClipreelResult},
    model::{ExportShape, Idea, SceneId, SceneSpec, Script, ScriptSection},
    source::AssetSource,
};

/// Seconds of narration per word of description.
const SPEECH_PACE_SEC_PER_WORD: f64 = 0.4;

/// Deterministic in-process [`AssetSource`].
///
/// Failure injection for tests rides on prompt markers: a request whose text
/// contains `[quota]`, `[credential]`, `[transient]`, or `[fail]` returns the
/// corresponding classified error instead of a payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockSource {
    /// Artificial per-call latency, lets tests observe genuine interleaving.
    pub latency: std::time::Duration,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: std::time::Duration) -> Self {
        Self { latency }
    }

    async fn simulate(&self, text: &str) -> ClipreelResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        } else {
            // Still suspend once so concurrent callers interleave.
            tokio::task::yield_now().await;
        }
        if text.contains("[quota]") {
            return Err(ClipreelError::quota("mock quota exhausted"));
        }
        if text.contains("[credential]") {
            return Err(ClipreelError::credential("mock credential rejected"));
        }
        if text.contains("[transient]") {
            return Err(ClipreelError::transient("mock transient failure"));
        }
        if text.contains("[fail]") {
            return Err(ClipreelError::generation("mock generation failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetSource for MockSource {
    async fn generate_ideas(&self, keyword: Option<&str>) -> ClipreelResult<Vec<Idea>> {
        let topic = keyword.unwrap_or("quiet wisdom");
        self.simulate(topic).await?;
        Ok((1..=5)
            .map(|n| Idea {
                title: format!("{topic} #{n}"),
                premise: format!("An exploration of {topic}, part {n}."),
                sources: Vec::new(),
            })
            .collect())
    }

    async fn generate_script(
        &self,
        title: &str,
        protagonist_name: &str,
        shorts: bool,
    ) -> ClipreelResult<Script> {
        self.simulate(title).await?;
        let sections = if shorts { 3 } else { 6 };
        Ok(Script {
            title: title.to_string(),
            sections: (1..=sections)
                .map(|id| ScriptSection {
                    id,
                    title: format!("Part {id}"),
                    content: format!("{protagonist_name} reflects on {title}, beat {id}."),
                })
                .collect(),
        })
    }

    async fn segment_script(
        &self,
        script: &str,
        _style_anchor: &str,
        _shorts: bool,
    ) -> ClipreelResult<Vec<SceneSpec>> {
        self.simulate(script).await?;
        // One scene per non-empty line; every word of narration is kept.
        let specs = script
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(i, line)| SceneSpec {
                id: SceneId(i as u32 + 1),
                description: line.to_string(),
                image_prompt: format!("still illustration: {line}"),
                video_prompt: format!("camera note: {line}"),
            })
            .collect::<Vec<_>>();
        if specs.is_empty() {
            return Err(ClipreelError::generation("script has no narration lines"));
        }
        debug!(scenes = specs.len(), "mock segmentation");
        Ok(specs)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        shape: ExportShape,
        style_anchor: &str,
        _reference: Option<&[u8]>,
    ) -> ClipreelResult<Vec<u8>> {
        self.simulate(prompt).await?;

        let [r, g, b] = color_for(prompt, style_anchor);
        let img = image::RgbaImage::from_pixel(
            shape.width() / 2,
            shape.height() / 2,
            image::Rgba([r, g, b, 255]),
        );
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| ClipreelError::generation(format!("mock png encode failed: {e}")))?;
        Ok(buf)
    }

    async fn generate_speech(&self, text: &str, voice: &str) -> ClipreelResult<Vec<u8>> {
        self.simulate(text).await?;
        if text.trim().is_empty() {
            return Err(ClipreelError::generation("speech text is empty"));
        }
        let words = text.split_whitespace().count().max(1);
        let duration = (words as f64 * SPEECH_PACE_SEC_PER_WORD).max(1.0);
        debug!(voice, words, duration, "mock speech");
        Ok(audio::silent_wav(duration, audio::SPEECH_SAMPLE_RATE))
    }
}

/// Stable pseudo-color from the request text (FNV-1a over both strings).
fn color_for(prompt: &str, style_anchor: &str) -> [u8; 3] {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in prompt.bytes().chain(style_anchor.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    [
        (hash >> 16) as u8,
        (hash >> 8) as u8,
        (hash | 0x40) as u8, // keep it off pure black so letterboxing is visible
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WavInfo;

    #[tokio::test]
    async fn image_payload_decodes_and_is_deterministic() {
        let source = MockSource::new();
        let a = source
            .generate_image("a red door", ExportShape::Wide, "stickman", None)
            .await
            .unwrap();
        let b = source
            .generate_image("a red door", ExportShape::Wide, "stickman", None)
            .await
            .unwrap();
        assert_eq!(a, b);

        let decoded = crate::model::ImageAsset::decode(&a).unwrap();
        assert_eq!(decoded.width, ExportShape::Wide.width() / 2);
    }

    #[tokio::test]
    async fn speech_duration_scales_with_word_count() {
        let source = MockSource::new();
        let short = source.generate_speech("one two three", "Anna").await.unwrap();
        let long = source
            .generate_speech("one two three four five six seven eight", "Anna")
            .await
            .unwrap();

        let short_d = WavInfo::parse(&short).unwrap().duration_sec();
        let long_d = WavInfo::parse(&long).unwrap().duration_sec();
        assert!(long_d > short_d);
    }

    #[tokio::test]
    async fn failure_markers_classify() {
        let source = MockSource::new();
        let quota = source
            .generate_image("[quota] anything", ExportShape::Wide, "", None)
            .await;
        assert!(matches!(quota, Err(ClipreelError::Quota(_))));

        let transient = source.generate_speech("[transient] hi", "Anna").await;
        assert!(matches!(transient, Err(ClipreelError::Transient(_))));
    }

    #[tokio::test]
    async fn segmentation_keeps_every_line_in_order() {
        let source = MockSource::new();
        let specs = source
            .segment_script("first beat\n\nsecond beat\nthird beat", "", false)
            .await
            .unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].description, "first beat");
        assert_eq!(specs[2].id, SceneId(3));
    }
}
