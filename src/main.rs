use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use opencv::core::Vector;
use opencv::prelude::*;
use opencv::{highgui, imgcodecs};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use yolodet::config::{parse_override, Config};
use yolodet::detect::{Detection, Detector};
use yolodet::stream::{
    self, Display, FrameSink, Headless, StreamSummary, VideoOutput, VideoSource, Window,
};

#[derive(Parser)]
#[command(name = "yolodet", about = "YOLOv3 object detection on images and video")]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override a detector option, e.g. --set score=0.5
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect objects in a single image
    Image {
        input: PathBuf,
        /// Write the annotated image here instead of showing it
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print detections as JSON
        #[arg(long)]
        json: bool,
    },
    /// Detect objects in a video file, stream URL or camera index
    Video {
        source: String,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Run without a preview window
        #[arg(long)]
        headless: bool,
    },
    /// Print the resolved configuration
    Defaults,
}

#[derive(Serialize)]
struct LabelledDetection<'a> {
    label: &'a str,
    #[serde(flatten)]
    detection: &'a Detection,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("yolodet=debug".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let overrides = cli
        .overrides
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;
    config.detector = config.detector.with_overrides(overrides)?;

    match cli.command {
        Command::Image {
            input,
            output,
            json,
        } => detect_image(config, &input, output, json)?,
        Command::Video {
            source,
            output,
            headless,
        } => {
            let summary = detect_video(config, source, output, headless).await?;
            tracing::info!(frames = summary.frames, stop = ?summary.stop, "done");
        }
        Command::Defaults => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn detect_image(
    config: Config,
    input: &Path,
    output: Option<PathBuf>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut image = imgcodecs::imread(&input.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
    if image.empty() {
        return Err(format!("open error: cannot read {}", input.display()).into());
    }

    let mut detector = Detector::new(config.detector)?;
    let detections = detector.annotate(&mut image)?;

    if json {
        let labelled: Vec<_> = detections
            .iter()
            .map(|detection| LabelledDetection {
                label: detector.catalog().name(detection.class_index).unwrap_or(""),
                detection,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&labelled)?);
    }

    match output {
        Some(path) => {
            imgcodecs::imwrite(&path.to_string_lossy(), &image, &Vector::new())?;
            tracing::info!(output = %path.display(), "annotated image written");
        }
        None if config.stream.display => {
            highgui::named_window(&config.stream.window_name, highgui::WINDOW_NORMAL)?;
            highgui::imshow(&config.stream.window_name, &image)?;
            highgui::wait_key(0)?;
            highgui::destroy_window(&config.stream.window_name)?;
        }
        None => {}
    }

    detector.close();
    Ok(())
}

async fn detect_video(
    config: Config,
    source: String,
    output: Option<PathBuf>,
    headless: bool,
) -> Result<StreamSummary, Box<dyn std::error::Error>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    let mut task = tokio::task::spawn_blocking(move || -> Result<StreamSummary, stream::StreamError> {
        let detector = Detector::new(config.detector)?;
        let capture = VideoSource::open(&source)?;

        let sink: Option<Box<dyn FrameSink>> = match output {
            Some(path) => Some(Box::new(VideoOutput::create(&path, &capture.properties()?)?)),
            None => None,
        };
        let display: Box<dyn Display> = if headless || !config.stream.display {
            Box::new(Headless)
        } else {
            Box::new(Window::new(&config.stream.window_name)?)
        };

        stream::run(detector, Box::new(capture), sink, display, &flag)
    });

    let summary = tokio::select! {
        result = &mut task => result??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
            task.await??
        }
    };

    Ok(summary)
}
