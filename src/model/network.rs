use std::path::Path;

use ndarray::{ArrayD, ArrayView4};

use super::ModelError;

/// One array per output head, NCHW.
pub type RawOutputs = Vec<ArrayD<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningPhase {
    Inference,
    Training,
}

/// A ready-to-run detection network taking a `1x3xHxW` RGB batch in `[0, 1]`.
pub trait Network: Send {
    /// Channel depth of each output head, in output order.
    fn output_channels(&self) -> &[usize];

    fn infer(
        &mut self,
        input: ArrayView4<'_, f32>,
        phase: LearningPhase,
    ) -> Result<RawOutputs, ModelError>;

    fn num_heads(&self) -> usize {
        self.output_channels().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Full,
    Tiny,
}

impl Variant {
    pub fn for_anchor_count(num_anchors: usize) -> Self {
        if num_anchors == crate::catalog::TINY_ANCHOR_COUNT {
            Variant::Tiny
        } else {
            Variant::Full
        }
    }

    pub fn stem(self) -> &'static str {
        match self {
            Variant::Full => "yolo_body",
            Variant::Tiny => "tiny_yolo_body",
        }
    }

    /// The tiny body splits anchors over two heads, the full body over three.
    pub fn anchors_per_head(self, num_anchors: usize) -> usize {
        match self {
            Variant::Tiny => num_anchors / 2,
            Variant::Full => num_anchors / 3,
        }
    }
}

/// Architecture parameters for building a network from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub variant: Variant,
    pub anchors_per_head: usize,
    pub num_classes: usize,
}

impl Topology {
    pub fn select(num_anchors: usize, num_classes: usize) -> Self {
        let variant = Variant::for_anchor_count(num_anchors);
        Self {
            variant,
            anchors_per_head: variant.anchors_per_head(num_anchors),
            num_classes,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_a{}_c{}.onnx",
            self.variant.stem(),
            self.anchors_per_head,
            self.num_classes
        )
    }
}

/// Source of networks on a given device.
pub trait Backend {
    /// Loads a complete serialized network. Fails with [`ModelError::Unloadable`]
    /// only when no artifact could be opened; errors raised after that (probing
    /// outputs, for instance) mean the artifact exists but is unusable.
    fn load(&self, path: &Path, device: usize) -> Result<Box<dyn Network>, ModelError>;

    /// Instantiates an architecture without weights.
    fn construct(&self, topology: &Topology, device: usize)
        -> Result<Box<dyn Blueprint>, ModelError>;
}

/// A constructed architecture waiting for its weights.
pub trait Blueprint {
    fn load_weights(self: Box<Self>, weights: &Path) -> Result<Box<dyn Network>, ModelError>;
}
