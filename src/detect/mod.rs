mod bridge;
mod decode;
mod detector;
mod letterbox;
mod render;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::ModelError;

pub use bridge::DetectorRuntime;
pub use decode::{nms, Candidates, Decode, DecodeRequest, YoloDecoder, MAX_BOXES_PER_CLASS};
pub use detector::Detector;
pub use letterbox::{Geometry, LetterboxedImage, PAD_VALUE};
pub use render::{Annotation, PixelBox, Renderer};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("image is empty")]
    EmptyImage,
    #[error("expected an 8-bit 3-channel BGR image, got mat type {0}")]
    UnsupportedFormat(i32),
    #[error("image {width}x{height} is smaller than one 32x32 cell")]
    ImageTooSmall { width: i32, height: i32 },
    #[error("image data too small for a {width}x{height} tensor")]
    TruncatedImage { width: i32, height: i32 },
    #[error("decoder supports 2 or 3 output heads, got {0}")]
    UnsupportedHeads(usize),
    #[error("output head {head} has shape {shape:?}, expected {expected} channels in NCHW layout")]
    HeadShape {
        head: usize,
        shape: Vec<usize>,
        expected: usize,
    },
    #[error("anchor {0} is not defined")]
    MissingAnchor(usize),
    #[error("postprocess returned {boxes} boxes, {scores} scores and {classes} classes")]
    OutputMismatch {
        boxes: usize,
        scores: usize,
        classes: usize,
    },
    #[error("class index {0} is outside the class catalog")]
    UnknownClass(usize),
}

/// One detected object. The box is in source-image pixels and may reach outside
/// the image; [`Detection::clamped`] pulls it inside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_index: usize,
    pub score: f32,
    pub top: f32,
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
}

impl Detection {
    /// Rounds half up and clamps every edge into `[0, dimension)`.
    pub fn clamped(&self, width: i32, height: i32) -> PixelBox {
        let edge = |v: f32, limit: i32| ((v + 0.5).floor() as i32).clamp(0, (limit - 1).max(0));
        PixelBox {
            top: edge(self.top, height),
            left: edge(self.left, width),
            bottom: edge(self.bottom, height),
            right: edge(self.right, width),
        }
    }
}
