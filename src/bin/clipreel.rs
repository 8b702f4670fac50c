use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use clipreel::{
    BatchScheduler, ClipEncoder, ExportOrchestrator, ExportShape, FfmpegFactory, MockSource,
    SceneStore, SessionContext,
    source::AssetSource,
};

#[derive(Parser, Debug)]
#[command(name = "clipreel", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate scene assets for a narration and export one continuous video.
    Pipeline(PipelineArgs),
    /// Generate scene assets and export every scene as a numbered clip in a ZIP.
    Clips(ClipsArgs),
}

#[derive(Parser, Debug)]
struct PipelineArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output video path (extension follows the selected encoding profile).
    #[arg(long, default_value = "out/video.mp4")]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct ClipsArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output archive path.
    #[arg(long, default_value = "out/clips.zip")]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct CommonArgs {
    /// Narration text, one scene per line.
    #[arg(long, conflicts_with_all = ["file", "scenes"])]
    text: Option<String>,

    /// Read the narration from a file instead.
    #[arg(long, conflicts_with = "scenes")]
    file: Option<PathBuf>,

    /// Skip segmentation: load a scene list JSON (array of scene specs).
    #[arg(long)]
    scenes: Option<PathBuf>,

    /// Output geometry.
    #[arg(long, value_enum, default_value_t = ShapeChoice::Wide)]
    shape: ShapeChoice,

    /// Narration voice id.
    #[arg(long, default_value = "Anna")]
    voice: String,

    /// Generation jobs in flight per window.
    #[arg(long, default_value_t = clipreel::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Asset source to generate with.
    #[arg(long, value_enum, default_value_t = SourceChoice::Mock)]
    source: SourceChoice,

    /// Shared style anchor for image generation.
    #[arg(long, default_value = "clean flat illustration style")]
    style: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ShapeChoice {
    Wide,
    Tall,
}

impl From<ShapeChoice> for ExportShape {
    fn from(choice: ShapeChoice) -> Self {
        match choice {
            ShapeChoice::Wide => ExportShape::Wide,
            ShapeChoice::Tall => ExportShape::Tall,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceChoice {
    /// Deterministic offline source (solid stills, silent narration).
    Mock,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Pipeline(args) => cmd_pipeline(args).await,
        Command::Clips(args) => cmd_clips(args).await,
    }
}

async fn cmd_pipeline(args: PipelineArgs) -> anyhow::Result<()> {
    let ctx = prepare_scenes(&args.common).await?;
    let orchestrator = make_orchestrator(&ctx);

    let outcome = orchestrator
        .export_continuous(|pct| info!(pct, "export progress"))
        .await?;
    let clip = outcome
        .completed()
        .context("another export is already running")?;

    let out = args.out.with_extension(clip.ext);
    write_artifact(&out, &clip.bytes)?;
    info!(
        scenes = ctx.store.ready_scenes().len(),
        duration = format!("{:.1}s", clip.duration_sec),
        "continuous export complete"
    );
    Ok(())
}

async fn cmd_clips(args: ClipsArgs) -> anyhow::Result<()> {
    let ctx = prepare_scenes(&args.common).await?;
    let orchestrator = make_orchestrator(&ctx);

    let outcome = orchestrator
        .export_zip(|pct| info!(pct, "export progress"))
        .await?;
    let archive = outcome
        .completed()
        .context("another export is already running")?;

    if !archive.failed_ordinals.is_empty() {
        warn!(dropped = ?archive.failed_ordinals, "some clips failed to encode and were dropped");
    }
    write_artifact(&args.out, &archive.bytes)?;
    info!(entries = archive.entry_names.len(), "zip export complete");
    Ok(())
}

/// Segment the narration and batch-generate every scene asset.
async fn prepare_scenes(args: &CommonArgs) -> anyhow::Result<SessionContext> {
    let source: Arc<dyn AssetSource> = match args.source {
        SourceChoice::Mock => Arc::new(MockSource::new()),
    };

    let store = SceneStore::new();
    let mut ctx = SessionContext::new(store, args.shape.into());
    ctx.voice = args.voice.clone();
    ctx.protagonist.description = args.style.clone();

    let specs = if let Some(path) = &args.scenes {
        read_scene_list(path)?
    } else {
        let narration = read_narration(args).await?;
        let shorts = matches!(args.shape, ShapeChoice::Tall);
        source
            .segment_script(&narration, &ctx.protagonist.description, shorts)
            .await?
    };
    info!(scenes = specs.len(), "scene list ready");
    ctx.store.replace_all(specs);

    let scheduler = BatchScheduler::new(source);
    let jobs = BatchScheduler::plan_missing_jobs(&ctx.store.snapshot());
    let report = scheduler
        .run_batch(&ctx, jobs, args.concurrency.max(1))
        .await;

    if let Some(credential) = &report.credential {
        anyhow::bail!("generation blocked: {credential}");
    }
    if let Some(quota) = &report.quota {
        warn!(%quota, "quota exhausted during generation; continuing with what succeeded");
    }
    for (job, err) in &report.failed {
        warn!(scene = %job.scene, kind = %job.kind, %err, "asset failed");
    }
    info!(
        succeeded = report.succeeded,
        failed = report.failed.len(),
        "asset generation settled"
    );

    Ok(ctx)
}

fn make_orchestrator(ctx: &SessionContext) -> ExportOrchestrator {
    let encoder = ClipEncoder::new(Arc::new(FfmpegFactory::new()), ctx.shape);
    ExportOrchestrator::new(ctx.store.clone(), encoder)
}

fn read_scene_list(path: &std::path::Path) -> anyhow::Result<Vec<clipreel::SceneSpec>> {
    let f = std::fs::File::open(path)
        .with_context(|| format!("open scene list '{}'", path.display()))?;
    let specs: Vec<clipreel::SceneSpec> =
        serde_json::from_reader(std::io::BufReader::new(f)).context("parse scene list JSON")?;
    anyhow::ensure!(!specs.is_empty(), "scene list is empty");
    Ok(specs)
}

async fn read_narration(args: &CommonArgs) -> anyhow::Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    if let Some(path) = &args.file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read narration file '{}'", path.display()));
    }
    anyhow::bail!("either --text or --file must be provided");
}

fn write_artifact(path: &std::path::Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write '{}'", path.display()))?;
    eprintln!("wrote {}", path.display());
    Ok(())
}
