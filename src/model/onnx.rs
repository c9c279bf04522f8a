use std::borrow::Cow;
use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayView4};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::TensorRef;

use super::network::{Backend, Blueprint, LearningPhase, Network, RawOutputs, Topology};
use super::ModelError;

/// External data file name the topology graphs reference for their weights.
pub const TOPOLOGY_WEIGHTS_FILE: &str = "weights.bin";

const INTRA_THREADS: usize = 4;

/// ONNX Runtime backed networks.
///
/// Complete models are plain `.onnx` files (or URLs). Raw weights are paired with a
/// weightless graph from `topology_dir` whose initializers live in an external
/// `weights.bin`; the weights file is handed to the runtime under that name.
///
/// Graphs must be channels-first: a `1x3xHxW` input and `1xCxHxW` heads. Head depth
/// is read from dimension 1 of each probed output, so NHWC exports need a transpose
/// before they can be used here.
pub struct OnnxBackend {
    topology_dir: PathBuf,
    probe_size: (u32, u32),
}

impl OnnxBackend {
    /// `probe_size` is the (width, height) of the dummy batch used to discover the
    /// output head shapes right after loading.
    pub fn new(topology_dir: PathBuf, probe_size: (u32, u32)) -> Self {
        Self {
            topology_dir,
            probe_size,
        }
    }
}

fn session_builder(device: usize) -> Result<SessionBuilder, ModelError> {
    let cuda = CUDAExecutionProvider::default()
        .with_device_id(device as i32)
        .build();

    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(INTRA_THREADS)?
        .with_execution_providers([cuda])?)
}

impl Backend for OnnxBackend {
    fn load(&self, path: &Path, device: usize) -> Result<Box<dyn Network>, ModelError> {
        let builder = session_builder(device)?;
        let location = path.to_string_lossy();

        let session = if location.starts_with("http://") || location.starts_with("https://") {
            builder.commit_from_url(location.as_ref())
        } else {
            builder.commit_from_file(path)
        }
        .map_err(|e| ModelError::unloadable(path, e))?;

        // the artifact is open from here on: probe failures must not look unloadable
        let network = OnnxNetwork::probe(session, self.probe_size)?;
        Ok(Box::new(network))
    }

    fn construct(
        &self,
        topology: &Topology,
        device: usize,
    ) -> Result<Box<dyn Blueprint>, ModelError> {
        let graph_path = self.topology_dir.join(topology.file_name());
        if !graph_path.exists() {
            return Err(ModelError::MissingTopology(graph_path));
        }

        tracing::debug!(
            graph = %graph_path.display(),
            anchors_per_head = topology.anchors_per_head,
            classes = topology.num_classes,
            "constructing network topology"
        );

        Ok(Box::new(OnnxBlueprint {
            graph: std::fs::read(&graph_path)?,
            device,
            probe_size: self.probe_size,
        }))
    }
}

struct OnnxBlueprint {
    graph: Vec<u8>,
    device: usize,
    probe_size: (u32, u32),
}

impl Blueprint for OnnxBlueprint {
    fn load_weights(self: Box<Self>, weights: &Path) -> Result<Box<dyn Network>, ModelError> {
        let data = std::fs::read(weights)?;

        let session = session_builder(self.device)?
            .with_external_initializer_file_in_memory(TOPOLOGY_WEIGHTS_FILE, Cow::Owned(data))?
            .commit_from_memory(&self.graph)?;

        let network = OnnxNetwork::probe(session, self.probe_size)?;
        Ok(Box::new(network))
    }
}

pub struct OnnxNetwork {
    session: Session,
    output_channels: Vec<usize>,
}

impl OnnxNetwork {
    /// Runs one zero batch through the session to learn the head depths.
    fn probe(mut session: Session, (width, height): (u32, u32)) -> Result<Self, ModelError> {
        let dummy = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        let heads = run_session(&mut session, dummy.view())?;
        if heads.is_empty() {
            return Err(ModelError::NoOutputs);
        }

        let output_channels = head_depths(&heads)?;

        Ok(Self {
            session,
            output_channels,
        })
    }
}

impl Network for OnnxNetwork {
    fn output_channels(&self) -> &[usize] {
        &self.output_channels
    }

    fn infer(
        &mut self,
        input: ArrayView4<'_, f32>,
        phase: LearningPhase,
    ) -> Result<RawOutputs, ModelError> {
        if phase != LearningPhase::Inference {
            return Err(ModelError::TrainingPhase);
        }
        run_session(&mut self.session, input)
    }
}

/// Channel depth of each `1xCxHxW` head.
fn head_depths(heads: &[ndarray::ArrayD<f32>]) -> Result<Vec<usize>, ModelError> {
    heads
        .iter()
        .map(|head| match head.shape() {
            [1, channels, _, _] => Ok(*channels),
            shape => Err(ModelError::HeadLayout(shape.to_vec())),
        })
        .collect()
}

fn run_session(session: &mut Session, input: ArrayView4<'_, f32>) -> Result<RawOutputs, ModelError> {
    let tensor = TensorRef::from_array_view(input)?.into_dyn();
    let outputs = session.run(ort::inputs![tensor])?;

    let mut heads = Vec::with_capacity(outputs.len());
    for i in 0..outputs.len() {
        let head = outputs[i].try_extract_array::<f32>()?;
        heads.push(head.to_owned());
    }

    Ok(heads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn head(shape: &[usize]) -> ArrayD<f32> {
        ArrayD::zeros(IxDyn(shape))
    }

    #[test]
    fn test_head_depth_is_channel_dimension() {
        let heads = vec![head(&[1, 255, 13, 13]), head(&[1, 255, 26, 26])];
        assert_eq!(head_depths(&heads).unwrap(), vec![255, 255]);
    }

    #[test]
    fn test_non_nchw_heads_are_rejected() {
        let flat = vec![head(&[1, 255])];
        assert!(matches!(
            head_depths(&flat),
            Err(ModelError::HeadLayout(shape)) if shape == vec![1, 255]
        ));
        let batched = vec![head(&[2, 255, 13, 13])];
        assert!(matches!(head_depths(&batched), Err(ModelError::HeadLayout(_))));
    }
}
