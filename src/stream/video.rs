use std::path::Path;

use opencv::core::{Mat, Size};
use opencv::highgui;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoWriter};

use super::{Display, FrameSink, FrameSource, StreamError};

const FALLBACK_FPS: f64 = 30.0;

/// Codec, rate and frame size reported by a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceProperties {
    pub fourcc: i32,
    pub fps: f64,
    pub width: i32,
    pub height: i32,
}

/// A camera (by index) or a video file or stream URL.
pub struct VideoSource {
    capture: VideoCapture,
    name: String,
}

impl VideoSource {
    pub fn open(source: &str) -> Result<Self, StreamError> {
        let capture = match source.parse::<i32>() {
            Ok(index) => VideoCapture::new(index, videoio::CAP_ANY)?,
            Err(_) => VideoCapture::from_file(source, videoio::CAP_ANY)?,
        };
        if !capture.is_opened()? {
            return Err(StreamError::Open(source.to_string()));
        }

        tracing::info!(source, "video source opened");
        Ok(Self {
            capture,
            name: source.to_string(),
        })
    }

    pub fn properties(&self) -> Result<SourceProperties, StreamError> {
        Ok(SourceProperties {
            fourcc: self.capture.get(videoio::CAP_PROP_FOURCC)? as i32,
            fps: self.capture.get(videoio::CAP_PROP_FPS)?,
            width: self.capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            height: self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
        })
    }
}

impl FrameSource for VideoSource {
    fn read(&mut self, frame: &mut Mat) -> Result<bool, StreamError> {
        Ok(self.capture.read(frame)?)
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!(source = %self.name, error = %e, "failed to release capture");
        }
        tracing::debug!(source = %self.name, "video source released");
    }
}

/// Video file writer using the source's codec and rate when they are known.
pub struct VideoOutput {
    writer: VideoWriter,
}

impl VideoOutput {
    pub fn create(path: &Path, properties: &SourceProperties) -> Result<Self, StreamError> {
        let fourcc = if properties.fourcc > 0 {
            properties.fourcc
        } else {
            VideoWriter::fourcc('m', 'p', '4', 'v')?
        };
        let fps = if properties.fps > 0.0 {
            properties.fps
        } else {
            FALLBACK_FPS
        };

        let location = path.to_string_lossy();
        let writer = VideoWriter::new(
            &location,
            fourcc,
            fps,
            Size::new(properties.width, properties.height),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(StreamError::Output(location.into_owned()));
        }

        tracing::info!(
            output = %location,
            fps,
            width = properties.width,
            height = properties.height,
            "writing annotated video"
        );
        Ok(Self { writer })
    }
}

impl FrameSink for VideoOutput {
    fn write(&mut self, frame: &Mat) -> Result<(), StreamError> {
        Ok(self.writer.write(frame)?)
    }
}

impl Drop for VideoOutput {
    fn drop(&mut self) {
        if let Err(e) = self.writer.release() {
            tracing::warn!(error = %e, "failed to release video writer");
        }
    }
}

/// A resizable HighGUI window; pressing `q` cancels.
pub struct Window {
    name: String,
}

impl Window {
    pub fn new(name: &str) -> Result<Self, StreamError> {
        highgui::named_window(name, highgui::WINDOW_NORMAL)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Display for Window {
    fn show(&mut self, frame: &Mat) -> Result<(), StreamError> {
        Ok(highgui::imshow(&self.name, frame)?)
    }

    fn cancelled(&mut self) -> Result<bool, StreamError> {
        let key = highgui::wait_key(1)?;
        Ok(key & 0xFF == 'q' as i32)
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Err(e) = highgui::destroy_window(&self.name) {
            tracing::warn!(window = %self.name, error = %e, "failed to destroy window");
        }
    }
}

/// No window; only the shutdown flag stops the stream.
#[derive(Debug, Default)]
pub struct Headless;

impl Display for Headless {
    fn show(&mut self, _frame: &Mat) -> Result<(), StreamError> {
        Ok(())
    }

    fn cancelled(&mut self) -> Result<bool, StreamError> {
        Ok(false)
    }
}
