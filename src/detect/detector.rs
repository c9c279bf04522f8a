use std::time::Instant;

use opencv::core::Mat;
use opencv::prelude::*;

use crate::catalog::{AnchorSet, ClassCatalog};
use crate::config::{expand_home, DetectorConfig, InputSize};
use crate::model::{Backend, OnnxBackend, ResolvedModel};
use crate::palette::{ColorPalette, DEFAULT_PALETTE_SEED};

use super::bridge::DetectorRuntime;
use super::decode::{Decode, YoloDecoder};
use super::letterbox::LetterboxedImage;
use super::render::Renderer;
use super::{DetectError, Detection};

/// Probe batch used to read head shapes when images set the input size.
const DEFAULT_PROBE_SIZE: (u32, u32) = (416, 416);

/// Image in, annotated image out.
pub struct Detector {
    input_size: InputSize,
    runtime: DetectorRuntime,
    renderer: Renderer,
}

impl Detector {
    /// Builds a detector on ONNX Runtime with the YOLOv3 decoder.
    pub fn new(config: DetectorConfig) -> Result<Self, DetectError> {
        config.validate()?;

        let probe_size = match config.model_image_size {
            InputSize::Fixed { width, height } => (width, height),
            InputSize::FromImage => DEFAULT_PROBE_SIZE,
        };
        let backend = OnnxBackend::new(expand_home(&config.topology_dir), probe_size);

        Self::with_backend(config, &backend, Box::new(YoloDecoder::default()))
    }

    /// Validates `config`, reads the class and anchor files and resolves the model.
    pub fn with_backend(
        config: DetectorConfig,
        backend: &dyn Backend,
        decoder: Box<dyn Decode>,
    ) -> Result<Self, DetectError> {
        config.validate()?;

        let catalog = ClassCatalog::load(&config.classes_path)?;
        let anchors = AnchorSet::load(&config.anchors_path)?;

        Self::from_parts(config, anchors, catalog, backend, decoder)
    }

    pub fn from_parts(
        config: DetectorConfig,
        anchors: AnchorSet,
        catalog: ClassCatalog,
        backend: &dyn Backend,
        decoder: Box<dyn Decode>,
    ) -> Result<Self, DetectError> {
        let model = ResolvedModel::resolve(backend, &config, &anchors, &catalog)?;
        let palette = ColorPalette::generate(catalog.len(), DEFAULT_PALETTE_SEED);

        let runtime = DetectorRuntime::new(model, decoder, anchors, catalog.len(), &config);

        Ok(Self {
            input_size: config.model_image_size,
            runtime,
            renderer: Renderer::new(catalog, palette),
        })
    }

    pub fn catalog(&self) -> &ClassCatalog {
        self.renderer.catalog()
    }

    pub fn runtime(&self) -> &DetectorRuntime {
        &self.runtime
    }

    /// Detections in source-image pixels, without drawing.
    pub fn detect(&mut self, image: &Mat) -> Result<Vec<Detection>, DetectError> {
        let start = Instant::now();

        let input = LetterboxedImage::new(image, self.input_size)?;
        let shape = (image.rows() as u32, image.cols() as u32);
        let detections = self.runtime.infer(&input, shape)?;

        tracing::debug!(
            boxes = detections.len(),
            width = image.cols(),
            height = image.rows(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "found boxes"
        );

        Ok(detections)
    }

    /// Detects and draws onto `image` in place.
    pub fn annotate(&mut self, image: &mut Mat) -> Result<Vec<Detection>, DetectError> {
        let detections = self.detect(image)?;
        self.renderer.draw(image, &detections)?;
        Ok(detections)
    }

    pub fn detect_image(&mut self, mut image: Mat) -> Result<Mat, DetectError> {
        self.annotate(&mut image)?;
        Ok(image)
    }

    /// Releases the inference context.
    pub fn close(self) {
        tracing::debug!("closing detector");
    }
}
