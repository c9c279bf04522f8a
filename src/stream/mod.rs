mod fps;
mod runner;
mod video;

use opencv::core::Mat;
use thiserror::Error;

use crate::detect::DetectError;

pub use fps::FpsCounter;
pub use runner::{run, StopReason, StreamSummary};
pub use video::{Headless, SourceProperties, VideoOutput, VideoSource, Window};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("couldn't open webcam or video: {0}")]
    Open(String),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("couldn't open output video: {0}")]
    Output(String),
}

/// Where frames come from. `Ok(false)` means the source is exhausted.
pub trait FrameSource {
    fn read(&mut self, frame: &mut Mat) -> Result<bool, StreamError>;
}

/// Where annotated frames are written.
pub trait FrameSink {
    fn write(&mut self, frame: &Mat) -> Result<(), StreamError>;
}

pub trait Display {
    fn show(&mut self, frame: &Mat) -> Result<(), StreamError>;

    /// Polled once per frame; true stops the stream.
    fn cancelled(&mut self) -> Result<bool, StreamError>;
}
