//! In-memory stand-ins for the network runtime and the decoder.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::{Array4, ArrayD, ArrayView4};

use crate::catalog::{AnchorSet, ClassCatalog};
use crate::config::DetectorConfig;
use crate::detect::{Candidates, Decode, DecodeRequest, DetectError, Detector};
use crate::model::{Backend, Blueprint, LearningPhase, ModelError, Network, RawOutputs, Topology};

pub const TINY_ANCHORS: &str = "10,14,23,27,37,58,81,82,135,169,344,319";

/// Network with fixed head depths that returns zeroed 1x1 heads.
pub struct FakeNetwork {
    channels: Vec<usize>,
    pub calls: Arc<AtomicUsize>,
    pub drops: Arc<AtomicUsize>,
}

impl FakeNetwork {
    pub fn new(channels: Vec<usize>) -> Self {
        Self::sharing(channels, Arc::new(AtomicUsize::new(0)))
    }

    fn sharing(channels: Vec<usize>, drops: Arc<AtomicUsize>) -> Self {
        Self {
            channels,
            calls: Arc::new(AtomicUsize::new(0)),
            drops,
        }
    }
}

impl Network for FakeNetwork {
    fn output_channels(&self) -> &[usize] {
        &self.channels
    }

    fn infer(
        &mut self,
        _input: ArrayView4<'_, f32>,
        phase: LearningPhase,
    ) -> Result<RawOutputs, ModelError> {
        if phase == LearningPhase::Training {
            return Err(ModelError::TrainingPhase);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .channels
            .iter()
            .map(|&c| Array4::<f32>::zeros((1, c, 1, 1)).into_dyn())
            .collect())
    }
}

impl Drop for FakeNetwork {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    Loads,
    Unloadable,
    ProbeFails,
}

/// Backend whose direct load yields a [`FakeNetwork`], finds nothing, or opens
/// the artifact and then fails to probe it. The construct path is only available
/// after [`FakeBackend::with_construct`].
pub struct FakeBackend {
    outcome: LoadOutcome,
    load_channels: Vec<usize>,
    construct_channels: Option<Vec<usize>>,
    pub loads: AtomicUsize,
    pub devices: Mutex<Vec<usize>>,
    pub constructs: Mutex<Vec<Topology>>,
    pub drops: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn loading(channels: Vec<usize>) -> Self {
        Self {
            outcome: LoadOutcome::Loads,
            load_channels: channels,
            construct_channels: None,
            loads: AtomicUsize::new(0),
            devices: Mutex::new(Vec::new()),
            constructs: Mutex::new(Vec::new()),
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: LoadOutcome::Unloadable,
            ..Self::loading(Vec::new())
        }
    }

    /// The artifact opens but reports no outputs.
    pub fn probe_failing() -> Self {
        Self {
            outcome: LoadOutcome::ProbeFails,
            ..Self::loading(Vec::new())
        }
    }

    pub fn with_construct(mut self, channels: Vec<usize>) -> Self {
        self.construct_channels = Some(channels);
        self
    }
}

impl Backend for FakeBackend {
    fn load(&self, path: &Path, device: usize) -> Result<Box<dyn Network>, ModelError> {
        self.devices.lock().unwrap().push(device);
        match self.outcome {
            LoadOutcome::Loads => {
                self.loads.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeNetwork::sharing(
                    self.load_channels.clone(),
                    self.drops.clone(),
                )))
            }
            LoadOutcome::ProbeFails => {
                self.loads.fetch_add(1, Ordering::SeqCst);
                Err(ModelError::NoOutputs)
            }
            LoadOutcome::Unloadable => Err(ModelError::unloadable(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no serialized model"),
            )),
        }
    }

    fn construct(
        &self,
        topology: &Topology,
        _device: usize,
    ) -> Result<Box<dyn Blueprint>, ModelError> {
        self.constructs.lock().unwrap().push(*topology);
        match &self.construct_channels {
            Some(channels) => Ok(Box::new(FakeBlueprint {
                channels: channels.clone(),
                drops: self.drops.clone(),
            })),
            None => Err(ModelError::MissingTopology(topology.file_name().into())),
        }
    }
}

pub struct FakeBlueprint {
    channels: Vec<usize>,
    drops: Arc<AtomicUsize>,
}

impl Blueprint for FakeBlueprint {
    fn load_weights(self: Box<Self>, _weights: &Path) -> Result<Box<dyn Network>, ModelError> {
        Ok(Box::new(FakeNetwork::sharing(self.channels, self.drops)))
    }
}

/// Decoder returning canned candidates and recording
/// `(score_threshold, iou_threshold, image_shape)` for every call.
pub struct FakeDecoder {
    candidates: Candidates,
    pub seen: Arc<Mutex<Vec<(f32, f32, (u32, u32))>>>,
}

impl FakeDecoder {
    pub fn returning(candidates: Candidates) -> Self {
        Self {
            candidates,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Decode for FakeDecoder {
    fn decode(
        &self,
        _heads: &[ArrayD<f32>],
        request: &DecodeRequest<'_>,
    ) -> Result<Candidates, DetectError> {
        self.seen.lock().unwrap().push((
            request.score_threshold,
            request.iou_threshold,
            request.image_shape,
        ));
        Ok(self.candidates.clone())
    }
}

/// A one-class ("cat") tiny detector on fakes.
pub fn fake_detector(decoder: FakeDecoder) -> (Detector, FakeBackend) {
    let backend = FakeBackend::loading(vec![18, 18]);
    let detector = Detector::from_parts(
        DetectorConfig::default(),
        AnchorSet::parse(TINY_ANCHORS).unwrap(),
        ClassCatalog::from_names(["cat"]),
        &backend,
        Box::new(decoder),
    )
    .unwrap();
    (detector, backend)
}
