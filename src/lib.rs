#![forbid(unsafe_code)]

pub mod audio;
pub mod batch;
pub mod compose;
pub mod encode;
pub mod error;
pub mod export;
pub mod mock;
pub mod model;
pub mod playback;
pub mod record;
pub mod session;
pub mod source;
pub mod store;

pub use batch::{BatchJob, BatchReport, BatchScheduler, DEFAULT_CONCURRENCY};
pub use encode::{ClipEncoder, EncodedClip};
pub use error::{ClipreelError, ClipreelResult};
pub use export::{ExportOrchestrator, ExportOutcome, ExportStatus, ZipExport};
pub use mock::MockSource;
pub use model::{AssetKind, ExportShape, JobState, Protagonist, Scene, SceneId, SceneSpec};
pub use playback::PlaybackController;
pub use record::{FfmpegFactory, MemoryFactory, RecordingFactory, RecordingSession};
pub use session::SessionContext;
pub use source::AssetSource;
pub use store::SceneStore;
