//! classify - one-shot classification from the command line
//!
//! `classify <path>` prints the majority label for a video file.
//! `classify --live <device> --seconds N` prints one overlay line per frame.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use incident_classifier::infer::BackendKind;
use incident_classifier::{
    ChannelSink, ClassificationPipeline, DefaultOpener, InferenceEngine, LiveCapture,
    LiveSettings, ModelSettings, SourceOpener,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file (or stub:// identifier) to classify.
    #[arg(required_unless_present = "live")]
    input: Option<String>,
    /// Classify a camera device frame by frame instead.
    #[arg(long, conflicts_with = "input")]
    live: Option<String>,
    /// How long to run a live session.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Model backend (stub or tract).
    #[arg(long, env = "INCIDENT_MODEL_BACKEND", default_value = "stub")]
    backend: BackendKind,
    /// ONNX model file for the tract backend.
    #[arg(long, env = "INCIDENT_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let engine = Arc::new(InferenceEngine::load(&ModelSettings {
        backend: args.backend,
        model_path: args.model.clone(),
    })?);
    let opener: Arc<dyn SourceOpener> = Arc::new(DefaultOpener::default());

    match (&args.live, &args.input) {
        (Some(device), _) => run_live(opener, engine, device, &args),
        (None, Some(input)) => {
            let result = ClassificationPipeline::new(opener, engine)
                .classify(input)
                .with_context(|| format!("classify {}", input))?;
            if args.json {
                println!("{}", serde_json::to_string(&result.to_response())?);
            } else {
                println!(
                    "{}: {} ({:.2}s)",
                    input,
                    result.label(),
                    result.elapsed().as_secs_f64()
                );
            }
            Ok(())
        }
        (None, None) => Err(anyhow!("either an input file or --live is required")),
    }
}

fn run_live(
    opener: Arc<dyn SourceOpener>,
    engine: Arc<InferenceEngine>,
    device: &str,
    args: &Args,
) -> Result<()> {
    let capture = LiveCapture::new(opener, engine, LiveSettings::default());
    let (sink, rx) = ChannelSink::new();
    let session = capture.start(device, Box::new(sink))?;

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(report) => println!("[{}] {}", report.frame.index, report.overlay_text()),
            Err(_) => break,
        }
    }

    let summary = session.stop()?;
    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!(
            "{}: {} frames, stopped: {:?}",
            summary.device, summary.frames_processed, summary.reason
        );
    }
    Ok(())
}
