use std::{sync::Arc, time::Duration};

use clipreel::{
    BatchScheduler, ClipEncoder, ExportOrchestrator, ExportShape, ExportStatus, JobState,
    MemoryFactory, MockSource, SceneStore, SessionContext,
    encode::EncodedClip,
    source::AssetSource,
};

async fn generated_session(narration: &str) -> SessionContext {
    let source = MockSource::new();
    let specs = source.segment_script(narration, "stickman", false).await.unwrap();

    let store = SceneStore::new();
    store.replace_all(specs);
    let mut ctx = SessionContext::new(store, ExportShape::Wide);
    ctx.retry.base_delay = Duration::from_millis(1);

    let scheduler = BatchScheduler::new(Arc::new(source));
    let jobs = BatchScheduler::plan_missing_jobs(&ctx.store.snapshot());
    scheduler.run_batch(&ctx, jobs, 3).await;
    ctx
}

fn orchestrator_with(ctx: &SessionContext, factory: &MemoryFactory) -> ExportOrchestrator {
    let encoder = ClipEncoder::new(Arc::new(factory.clone()), ctx.shape);
    ExportOrchestrator::new(ctx.store.clone(), encoder)
}

#[tokio::test]
async fn pipeline_settles_every_scene_and_packages_ready_clips() {
    let ctx = generated_session("first beat here\nsecond beat goes on longer\nthird beat").await;

    for scene in ctx.store.snapshot() {
        assert_eq!(scene.image_state, JobState::Ready);
        assert_eq!(scene.audio_state, JobState::Ready);
    }

    let factory = MemoryFactory::new();
    let orchestrator = orchestrator_with(&ctx, &factory);
    let archive = orchestrator
        .export_zip(|_| {})
        .await
        .unwrap()
        .completed()
        .expect("nothing else holds the export domain");

    assert_eq!(archive.entry_names, vec!["1.mp4", "2.mp4", "3.mp4"]);
    assert!(archive.failed_ordinals.is_empty());
    assert_eq!(factory.opens(), 3);
    assert_eq!(orchestrator.status(), ExportStatus::Done);

    let reader = zip::ZipArchive::new(std::io::Cursor::new(archive.bytes)).unwrap();
    assert_eq!(reader.len(), 3);
}

#[tokio::test]
async fn zip_keeps_original_ordinals_when_a_scene_is_not_ready() {
    // The [fail] marker sinks scene 2's audio job, so only 1 and 3 are ready.
    let ctx = generated_session("alpha beat\n[fail] broken beat\ngamma beat").await;

    assert_eq!(
        ctx.store.snapshot()[1].audio_state,
        JobState::Failed,
        "middle scene's narration failed"
    );

    let factory = MemoryFactory::new();
    let orchestrator = orchestrator_with(&ctx, &factory);
    let archive = orchestrator
        .export_zip(|_| {})
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(
        archive.entry_names,
        vec!["1.mp4", "3.mp4"],
        "entries keep their original numbering, never renumbered"
    );
}

#[tokio::test]
async fn continuous_export_changes_content_exactly_at_audio_boundaries() {
    let ctx = generated_session("one two three\nfour five six seven eight\nnine ten").await;

    let ready = ctx.store.ready_scenes();
    assert_eq!(ready.len(), 3);
    let expected_frames: Vec<u64> = ready
        .iter()
        .map(|(_, s)| ClipEncoder::frame_count_for(s.audio.as_ref().unwrap().duration_sec()))
        .collect();

    let factory = MemoryFactory::new();
    let orchestrator = orchestrator_with(&ctx, &factory);
    let clip: EncodedClip = orchestrator
        .export_continuous(|_| {})
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(clip.frame_count, expected_frames.iter().sum::<u64>());
    assert_eq!(factory.opens(), 1, "one shared session for the whole run");

    let records = factory.records();
    assert_eq!(records.len(), 1);
    let marks = &records[0].frame_marks;
    assert_eq!(marks.len() as u64, clip.frame_count);

    // Each segment is visually constant, and consecutive segments differ.
    let mut offset = 0usize;
    let mut segment_colors = Vec::new();
    for frames in &expected_frames {
        let segment = &marks[offset..offset + *frames as usize];
        assert!(segment.windows(2).all(|w| w[0] == w[1]));
        segment_colors.push(segment[0]);
        offset += *frames as usize;
    }
    assert_ne!(segment_colors[0], segment_colors[1]);
    assert_ne!(segment_colors[1], segment_colors[2]);

    // Audio was appended per scene, in order.
    assert_eq!(records[0].audio_secs.len(), 3);
}

#[tokio::test]
async fn single_scene_export_during_zip_is_a_no_op() {
    let ctx = generated_session("alpha beat\nbeta beat\ngamma beat").await;
    let factory = MemoryFactory::new().with_finish_delay(Duration::from_millis(150));
    let orchestrator = Arc::new(orchestrator_with(&ctx, &factory));

    let zip_task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.export_zip(|_| {}).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let scene_id = ctx.store.snapshot()[0].id;
    let single = orchestrator.export_scene(scene_id).await.unwrap();
    assert!(single.is_busy(), "second export must be ignored");

    let archive = zip_task.await.unwrap().unwrap().completed().unwrap();
    assert_eq!(archive.entry_names.len(), 3);
    assert_eq!(
        factory.opens(),
        3,
        "the ignored single-scene export opened no session"
    );
}

#[tokio::test]
async fn single_scene_export_rejects_unready_scene_without_opening() {
    let ctx = generated_session("good beat\n[fail] bad beat").await;
    let factory = MemoryFactory::new();
    let orchestrator = orchestrator_with(&ctx, &factory);

    let unready = ctx.store.snapshot()[1].id;
    let err = orchestrator.export_scene(unready).await.unwrap_err();
    assert!(err.to_string().contains("not export-ready"));
    assert_eq!(factory.opens(), 0);
    assert_eq!(orchestrator.status(), ExportStatus::Idle);

    let ready = ctx.store.snapshot()[0].id;
    let (ordinal, clip) = orchestrator
        .export_scene(ready)
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(ordinal, 1);
    assert!(clip.frame_count > 0);
    assert_eq!(factory.opens(), 1);
}

#[tokio::test]
async fn zip_progress_is_monotonic_and_reaches_100() {
    let narration = (1..=7)
        .map(|i| format!("beat number {i} with a few words"))
        .collect::<Vec<_>>()
        .join("\n");
    let ctx = generated_session(&narration).await;

    let factory = MemoryFactory::new();
    let orchestrator = orchestrator_with(&ctx, &factory);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    orchestrator
        .export_zip(move |pct| sink.lock().unwrap().push(pct))
        .await
        .unwrap()
        .completed()
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress never regresses");
    assert_eq!(*seen.last().unwrap(), 100);
}
