//! demo - end-to-end synthetic run of the live recognition pipeline
//!
//! Frames come from a `stub://` source, models are stubs, and the gallery
//! lives in memory. One identity is enrolled from the first frame so the face
//! path has something to match against.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assist_vision::detect::backends::{StubFaceDetector, StubFaceEmbedder, StubObjectDetector};
use assist_vision::detect::preprocess::prepare_face;
use assist_vision::detect::DEFAULT_DETECTOR_INPUT;
use assist_vision::pipeline::PipelineEvent;
use assist_vision::{
    enroll, now_ms, BoundingBox, ChannelSink, FaceEmbedder, FileConfig, FileSource,
    InMemoryGalleryStore, Offer, Orchestrator, PipelineConfig, RecognitionPipeline,
};

const DEMO_IDENTITY: &str = "demo-person";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds for synthetic frames.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Frames per second offered to the pipeline.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Synthetic frame width.
    #[arg(long, default_value_t = 320)]
    width: u32,
    /// Synthetic frame height.
    #[arg(long, default_value_t = 240)]
    height: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.width < 64 || args.height < 64 {
        return Err(anyhow!("frames must be at least 64x64"));
    }

    let mut config = PipelineConfig::default();
    config.detection.labels = vec!["person".to_string(), "cup".to_string()];

    let mut source = FileSource::new(FileConfig {
        path: "stub://demo".to_string(),
        width: args.width,
        height: args.height,
        ..FileConfig::default()
    })?;

    let face_box = BoundingBox::new(
        (args.width / 4) as i32,
        (args.height / 4) as i32,
        (args.width * 3 / 4) as i32,
        (args.height * 3 / 4) as i32,
    );

    stage("enroll demo identity");
    let gallery = Arc::new(InMemoryGalleryStore::new());
    let first = source.next_frame()?;
    let mut embedder = StubFaceEmbedder::new();
    let face = prepare_face(first.view().upright_image(), &face_box, embedder.input_size())?;
    enroll(gallery.as_ref(), DEMO_IDENTITY, &embedder.embed(&face)?, None, now_ms()?)?;
    first.release();

    stage("start pipeline");
    let (sink, events) = ChannelSink::new();
    let orchestrator = Orchestrator::builder(&config)
        .gallery(gallery)
        .sink(Arc::new(sink))
        .face_detector(move || Ok(StubFaceDetector::with_boxes(vec![face_box])))
        .face_embedder(|| Ok(StubFaceEmbedder::new()))
        .object_detector(|| Ok(StubObjectDetector::with_tensor(demo_tensor())))
        .build()?;
    let pipeline = RecognitionPipeline::start(orchestrator)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })?;

    stage("offer frames");
    let interval = Duration::from_millis(1000 / u64::from(args.fps));
    let total_frames = args.seconds.saturating_mul(u64::from(args.fps));
    for _ in 0..total_frames {
        if stop.load(Ordering::SeqCst) {
            log::info!("interrupted; stopping early");
            break;
        }
        let frame = source.next_frame()?;
        if pipeline.offer(frame) == Offer::Dropped {
            log::debug!("frame dropped (pipeline busy)");
        }
        log_events(&events);
        thread::sleep(interval);
    }

    stage("shutdown");
    pipeline.shutdown()?;
    let stats = pipeline.stats();
    log_events(&events);

    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("frames captured: {}", source.stats().frames_captured);
    Ok(())
}

/// One "person" near the top-left of the model input, as a single
/// `[x, y, w, h, conf, person, cup]` record.
fn demo_tensor() -> Vec<f32> {
    let edge = DEFAULT_DETECTOR_INPUT as f32;
    vec![edge * 0.1, edge * 0.1, edge * 0.2, edge * 0.3, 0.9, 0.8, 0.1]
}

fn log_events(events: &Receiver<PipelineEvent>) {
    for event in events.try_iter().filter(PipelineEvent::is_final) {
        match serde_json::to_string(&event) {
            Ok(json) => log::info!("{}", json),
            Err(e) => log::warn!("unserializable event: {}", e),
        }
    }
}

fn stage(name: &str) {
    log::info!("== {} ==", name);
}
