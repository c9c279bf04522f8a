mod network;
mod onnx;
mod replica;
mod resolver;

use std::path::PathBuf;

use thiserror::Error;

pub use network::{Backend, Blueprint, LearningPhase, Network, RawOutputs, Topology, Variant};
pub use onnx::{OnnxBackend, TOPOLOGY_WEIGHTS_FILE};
pub use replica::ReplicatedNetwork;
pub use resolver::{check_consistency, ModelResolution, ResolvedModel};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ort(#[from] ort::Error),
    /// Nothing usable was found at the model path. The only error that lets the
    /// resolver fall back to construct-and-load.
    #[error("{} is not a loadable model: {source}", path.display())]
    Unloadable {
        path: PathBuf,
        #[source]
        source: Box<ModelError>,
    },
    #[error(
        "model/anchor/class mismatch: output depth {output_channels} != \
         {num_anchors} anchors / {num_heads} heads * ({num_classes} classes + 5)"
    )]
    Inconsistent {
        output_channels: usize,
        num_anchors: usize,
        num_heads: usize,
        num_classes: usize,
    },
    #[error("model has no outputs")]
    NoOutputs,
    #[error("output head has shape {0:?}, expected 1xCxHxW")]
    HeadLayout(Vec<usize>),
    #[error("network only runs in inference mode")]
    TrainingPhase,
    #[error("topology graph not found: {}", .0.display())]
    MissingTopology(PathBuf),
    #[error(
        "{} is neither a loadable model ({direct}) nor usable raw weights: {fallback}",
        path.display()
    )]
    Unavailable {
        path: PathBuf,
        direct: Box<ModelError>,
        #[source]
        fallback: Box<ModelError>,
    },
}

impl ModelError {
    pub fn unloadable(path: &std::path::Path, source: impl Into<ModelError>) -> Self {
        ModelError::Unloadable {
            path: path.to_path_buf(),
            source: Box::new(source.into()),
        }
    }
}
