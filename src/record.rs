use std::{
    collections::BTreeSet,
    io::Write as _,
    path::PathBuf,
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing::{debug, warn};

use crate::{
    compose::Surface,
    error::{ClipreelError, ClipreelResult},
    model::AudioAsset,
};

/// One codec/container combination the recorder can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodeProfile {
    pub container: &'static str,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub ext: &'static str,
}

/// Preference order: the widely compatible MP4/H.264+AAC first, WebM as the
/// lesser-compatibility fallback.
pub const PROFILE_PREFERENCE: &[EncodeProfile] = &[
    EncodeProfile {
        container: "mp4",
        video_codec: "libx264",
        audio_codec: "aac",
        ext: "mp4",
    },
    EncodeProfile {
        container: "webm",
        video_codec: "libvpx-vp9",
        audio_codec: "libopus",
        ext: "webm",
    },
];

/// The encoder names a runtime reports as usable.
#[derive(Clone, Debug, Default)]
pub struct SessionCapabilities {
    encoders: BTreeSet<String>,
}

impl SessionCapabilities {
    pub fn from_encoders<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            encoders: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn supports(&self, profile: &EncodeProfile) -> bool {
        self.encoders.contains(profile.video_codec) && self.encoders.contains(profile.audio_codec)
    }
}

/// First profile in preference order the runtime supports.
pub fn select_profile(caps: &SessionCapabilities) -> Option<EncodeProfile> {
    PROFILE_PREFERENCE.iter().copied().find(|p| caps.supports(p))
}

/// Everything a session needs to open.
#[derive(Clone, Copy, Debug)]
pub struct RecordConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub profile: EncodeProfile,
}

impl RecordConfig {
    pub fn validate(&self) -> ClipreelResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ClipreelError::validation(
                "record width/height must be non-zero",
            ));
        }
        if self.fps == 0 {
            return Err(ClipreelError::validation("record fps must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // yuv420p output requires even dimensions.
            return Err(ClipreelError::validation(
                "record width/height must be even",
            ));
        }
        Ok(())
    }
}

/// An open capture/record session.
///
/// Frames arrive in timeline order at the configured rate; audio arrives as
/// whole per-scene tracks and is concatenated in push order. Exactly one of
/// `finish` or `abort` must run, on every exit path; both release all
/// session resources.
pub trait RecordingSession: Send {
    fn push_frame(&mut self, surface: &Surface) -> ClipreelResult<()>;
    fn push_audio(&mut self, audio: &AudioAsset) -> ClipreelResult<()>;
    fn finish(self: Box<Self>) -> ClipreelResult<Vec<u8>>;
    fn abort(self: Box<Self>);
}

/// Opens recording sessions and answers capability probes.
pub trait RecordingFactory: Send + Sync {
    fn capabilities(&self) -> ClipreelResult<SessionCapabilities>;
    fn open(&self, cfg: RecordConfig) -> ClipreelResult<Box<dyn RecordingSession>>;
}

// ---------------------------------------------------------------------------
// ffmpeg implementation
// ---------------------------------------------------------------------------

/// Records through the system `ffmpeg` binary, never a linked codec library.
///
/// The video pass streams raw RGBA frames over stdin into a temp container;
/// audio PCM accumulates in memory; `finish` muxes the two with `-c:v copy`
/// and returns the final container bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegFactory;

impl FfmpegFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn is_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl RecordingFactory for FfmpegFactory {
    fn capabilities(&self) -> ClipreelResult<SessionCapabilities> {
        let out = Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output()
            .map_err(|e| {
                ClipreelError::encoding_unavailable(format!(
                    "ffmpeg is required but could not be run: {e}"
                ))
            })?;
        if !out.status.success() {
            return Err(ClipreelError::encoding_unavailable(format!(
                "ffmpeg -encoders exited with {}",
                out.status
            )));
        }

        // Encoder table lines look like " V....D libx264  H.264 ...". The
        // leading legend repeats the flag letters followed by "=", skip it.
        let stdout = String::from_utf8_lossy(&out.stdout);
        let names = stdout
            .lines()
            .filter_map(|line| {
                let mut cols = line.split_whitespace();
                let flags = cols.next()?;
                if flags.len() != 6 || !(flags.starts_with('V') || flags.starts_with('A')) {
                    return None;
                }
                let name = cols.next()?;
                if name == "=" {
                    return None;
                }
                Some(name.to_owned())
            })
            .collect::<Vec<_>>();
        Ok(SessionCapabilities::from_encoders(names))
    }

    fn open(&self, cfg: RecordConfig) -> ClipreelResult<Box<dyn RecordingSession>> {
        Ok(Box::new(FfmpegSession::open(cfg)?))
    }
}

struct FfmpegSession {
    cfg: RecordConfig,
    // Owns the scratch space; removal on drop is the last-resort cleanup.
    dir: tempfile::TempDir,
    video_path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pcm: Vec<u8>,
    audio_format: Option<(u32, u16, u16)>,
    frames: u64,
}

impl FfmpegSession {
    fn open(cfg: RecordConfig) -> ClipreelResult<Self> {
        cfg.validate()?;

        let dir = tempfile::tempdir().map_err(|e| {
            ClipreelError::validation(format!("failed to create recording scratch dir: {e}"))
        })?;
        let video_path = dir.path().join(format!("video.{}", cfg.profile.ext));

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            cfg.profile.video_codec,
            "-b:v",
            &cfg.video_bitrate.to_string(),
            "-pix_fmt",
            "yuv420p",
        ]);
        if cfg.profile.container == "mp4" {
            cmd.args(["-movflags", "+faststart"]);
        }
        cmd.arg(&video_path);

        let mut child = cmd.spawn().map_err(|e| {
            ClipreelError::encoding_unavailable(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ClipreelError::encoding_unavailable("failed to open ffmpeg stdin (unexpected)")
        })?;

        debug!(
            profile = cfg.profile.container,
            width = cfg.width,
            height = cfg.height,
            "recording session opened"
        );

        Ok(Self {
            cfg,
            dir,
            video_path,
            child: Some(child),
            stdin: Some(stdin),
            pcm: Vec::new(),
            audio_format: None,
            frames: 0,
        })
    }

    fn release_child(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(%e, "ffmpeg child already gone on release");
            }
            let _ = child.wait();
        }
    }
}

impl RecordingSession for FfmpegSession {
    fn push_frame(&mut self, surface: &Surface) -> ClipreelResult<()> {
        if surface.width != self.cfg.width || surface.height != self.cfg.height {
            return Err(ClipreelError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                surface.width, surface.height, self.cfg.width, self.cfg.height
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ClipreelError::validation(
                "recording session is already finalized",
            ));
        };
        stdin.write_all(&surface.rgba).map_err(|e| {
            ClipreelError::validation(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn push_audio(&mut self, audio: &AudioAsset) -> ClipreelResult<()> {
        let info = audio.info;
        if info.bits_per_sample != 16 {
            return Err(ClipreelError::validation(
                "recording session expects 16-bit PCM audio",
            ));
        }
        let format = (info.sample_rate, info.channels, info.bits_per_sample);
        match self.audio_format {
            None => self.audio_format = Some(format),
            Some(first) if first == format => {}
            Some(first) => {
                return Err(ClipreelError::validation(format!(
                    "audio format changed mid-session: {first:?} then {format:?}"
                )));
            }
        }
        self.pcm.extend_from_slice(audio.pcm_bytes());
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> ClipreelResult<Vec<u8>> {
        drop(self.stdin.take());
        let child = self
            .child
            .take()
            .ok_or_else(|| ClipreelError::validation("recording session already released"))?;
        let output = child.wait_with_output().map_err(|e| {
            ClipreelError::validation(format!("failed to wait for ffmpeg video pass: {e}"))
        })?;
        if !output.status.success() {
            return Err(ClipreelError::validation(format!(
                "ffmpeg video pass failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if self.pcm.is_empty() {
            return std::fs::read(&self.video_path).map_err(|e| {
                ClipreelError::validation(format!("failed to read encoded video: {e}"))
            });
        }

        let (sample_rate, channels, _) = self
            .audio_format
            .ok_or_else(|| ClipreelError::validation("audio pushed without a format"))?;
        if channels != 1 {
            return Err(ClipreelError::validation(
                "recording session expects mono speech PCM",
            ));
        }

        let wav_path = self.dir.path().join("audio.wav");
        let out_path = self
            .dir
            .path()
            .join(format!("out.{}", self.cfg.profile.ext));
        std::fs::write(&wav_path, crate::audio::pcm_to_wav(&self.pcm, sample_rate)).map_err(
            |e| ClipreelError::validation(format!("failed to write session audio: {e}")),
        )?;

        let mux = Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(&self.video_path)
            .arg("-i")
            .arg(&wav_path)
            .args([
                "-c:v",
                "copy",
                "-c:a",
                self.cfg.profile.audio_codec,
                "-b:a",
                &self.cfg.audio_bitrate.to_string(),
                "-shortest",
            ])
            .arg(&out_path)
            .output()
            .map_err(|e| ClipreelError::validation(format!("failed to run ffmpeg mux: {e}")))?;
        if !mux.status.success() {
            return Err(ClipreelError::validation(format!(
                "ffmpeg mux failed: {}",
                String::from_utf8_lossy(&mux.stderr).trim()
            )));
        }

        debug!(frames = self.frames, "recording session finished");
        std::fs::read(&out_path)
            .map_err(|e| ClipreelError::validation(format!("failed to read encoded clip: {e}")))
    }

    fn abort(mut self: Box<Self>) {
        warn!(frames = self.frames, "recording session aborted");
        self.release_child();
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.release_child();
    }
}

// ---------------------------------------------------------------------------
// in-memory implementation
// ---------------------------------------------------------------------------

/// What one memory session observed; tests introspect these.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub config: RecordConfig,
    /// First pixel of every pushed frame, in order.
    pub frame_marks: Vec<[u8; 4]>,
    /// Duration of every pushed audio track, in order.
    pub audio_secs: Vec<f64>,
    pub aborted: bool,
}

#[derive(Default)]
struct MemoryState {
    opens: AtomicUsize,
    records: Mutex<Vec<SessionRecord>>,
    encoders: Mutex<Option<SessionCapabilities>>,
    finish_delay: Mutex<std::time::Duration>,
}

/// Deterministic in-process recorder for tests and dry runs.
///
/// Sessions count their opens, remember per-frame content marks, and return
/// a synthetic container so downstream packaging can be asserted without
/// ffmpeg.
#[derive(Clone, Default)]
pub struct MemoryFactory {
    state: Arc<MemoryState>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the advertised encoder set (capability/fallback tests).
    pub fn with_encoders<I: IntoIterator<Item = S>, S: Into<String>>(self, names: I) -> Self {
        *self.state.encoders.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(SessionCapabilities::from_encoders(names));
        self
    }

    /// Make `finish` slow enough for exclusion races to be observable.
    pub fn with_finish_delay(self, delay: std::time::Duration) -> Self {
        *self
            .state
            .finish_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
        self
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Records of every session that reached `finish` or `abort`.
    pub fn records(&self) -> Vec<SessionRecord> {
        self.state
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecordingFactory for MemoryFactory {
    fn capabilities(&self) -> ClipreelResult<SessionCapabilities> {
        let configured = self
            .state
            .encoders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(configured.unwrap_or_else(|| {
            SessionCapabilities::from_encoders(["libx264", "aac", "libvpx-vp9", "libopus"])
        }))
    }

    fn open(&self, cfg: RecordConfig) -> ClipreelResult<Box<dyn RecordingSession>> {
        cfg.validate()?;
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            record: SessionRecord {
                config: cfg,
                frame_marks: Vec::new(),
                audio_secs: Vec::new(),
                aborted: false,
            },
        }))
    }
}

struct MemorySession {
    state: Arc<MemoryState>,
    record: SessionRecord,
}

impl MemorySession {
    fn store_record(&mut self, aborted: bool) {
        self.record.aborted = aborted;
        self.state
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.record.clone());
    }
}

impl RecordingSession for MemorySession {
    fn push_frame(&mut self, surface: &Surface) -> ClipreelResult<()> {
        if surface.width != self.record.config.width || surface.height != self.record.config.height
        {
            return Err(ClipreelError::validation("frame size mismatch"));
        }
        self.record
            .frame_marks
            .push([surface.rgba[0], surface.rgba[1], surface.rgba[2], surface.rgba[3]]);
        Ok(())
    }

    fn push_audio(&mut self, audio: &AudioAsset) -> ClipreelResult<()> {
        self.record.audio_secs.push(audio.duration_sec());
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> ClipreelResult<Vec<u8>> {
        let delay = *self
            .state
            .finish_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut bytes = Vec::with_capacity(16 + 8);
        bytes.extend_from_slice(b"MEMCLIP\0");
        bytes.extend_from_slice(&(self.record.frame_marks.len() as u64).to_le_bytes());
        let audio_total: f64 = self.record.audio_secs.iter().sum();
        bytes.extend_from_slice(&audio_total.to_le_bytes());
        self.store_record(false);
        Ok(bytes)
    }

    fn abort(mut self: Box<Self>) {
        self.store_record(true);
    }
}
