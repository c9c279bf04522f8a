use std::path::{Path, PathBuf};

use crate::catalog::{AnchorSet, ClassCatalog};
use crate::config::{expand_home, DetectorConfig};

use super::network::{Backend, Network, Topology};
use super::replica::ReplicatedNetwork;
use super::ModelError;

/// How the network was obtained. The two paths carry different trust: a loaded
/// artifact is checked against the anchors and classes, a constructed one is taken
/// as matching the topology it was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResolution {
    Loaded { path: PathBuf },
    Constructed { topology: Topology, weights: PathBuf },
}

impl ModelResolution {
    pub fn is_validated(&self) -> bool {
        matches!(self, ModelResolution::Loaded { .. })
    }

    fn kind(&self) -> &'static str {
        match self {
            ModelResolution::Loaded { .. } => "loaded",
            ModelResolution::Constructed { .. } => "constructed",
        }
    }

    /// Repeats the same acquisition on another device.
    fn acquire(&self, backend: &dyn Backend, device: usize) -> Result<Box<dyn Network>, ModelError> {
        match self {
            ModelResolution::Loaded { path } => backend.load(path, device),
            ModelResolution::Constructed { topology, weights } => {
                backend.construct(topology, device)?.load_weights(weights)
            }
        }
    }
}

/// Output depth must equal `num_anchors / num_heads * (num_classes + 5)`: each head
/// predicts 4 box terms, an objectness score and one score per class for each of
/// its anchors.
pub fn check_consistency(
    output_channels: usize,
    num_heads: usize,
    num_anchors: usize,
    num_classes: usize,
) -> Result<(), ModelError> {
    // cross-multiplied so a non-integral anchors/heads ratio still compares exactly
    if num_heads == 0 || output_channels * num_heads != num_anchors * (num_classes + 5) {
        return Err(ModelError::Inconsistent {
            output_channels,
            num_anchors,
            num_heads,
            num_classes,
        });
    }
    Ok(())
}

pub struct ResolvedModel {
    network: Box<dyn Network>,
    resolution: ModelResolution,
}

impl ResolvedModel {
    /// Accepts a fully loaded artifact after checking its last head.
    pub fn loaded(
        network: Box<dyn Network>,
        path: PathBuf,
        num_anchors: usize,
        num_classes: usize,
    ) -> Result<Self, ModelError> {
        let output_channels = *network
            .output_channels()
            .last()
            .ok_or(ModelError::NoOutputs)?;
        check_consistency(output_channels, network.num_heads(), num_anchors, num_classes)?;

        Ok(Self {
            network,
            resolution: ModelResolution::Loaded { path },
        })
    }

    /// Accepts a network built from `topology` with `weights` loaded into it, unchecked.
    pub fn constructed(network: Box<dyn Network>, topology: Topology, weights: PathBuf) -> Self {
        Self {
            network,
            resolution: ModelResolution::Constructed { topology, weights },
        }
    }

    /// Direct load first; only an unloadable artifact falls back to
    /// construct-and-load. Once an artifact has loaded, any later failure
    /// (probing, the consistency check) is fatal.
    pub fn resolve(
        backend: &dyn Backend,
        config: &DetectorConfig,
        anchors: &AnchorSet,
        catalog: &ClassCatalog,
    ) -> Result<Self, ModelError> {
        let path = expand_home(&config.model_path);

        let model = match backend.load(&path, 0) {
            Ok(network) => Self::loaded(network, path.clone(), anchors.len(), catalog.len())?,
            Err(direct @ ModelError::Unloadable { .. }) => {
                tracing::warn!(
                    model = %path.display(),
                    error = %direct,
                    "direct load failed, constructing network from topology"
                );
                let topology = Topology::select(anchors.len(), catalog.len());
                Self::construct(backend, topology, &path).map_err(|fallback| {
                    ModelError::Unavailable {
                        path: path.clone(),
                        direct: Box::new(direct),
                        fallback: Box::new(fallback),
                    }
                })?
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            model = %path.display(),
            resolution = model.resolution.kind(),
            anchors = anchors.len(),
            classes = catalog.len(),
            "model, anchors, and classes loaded"
        );

        if config.gpu_num >= 2 {
            return model.replicate(backend, config.gpu_num);
        }
        Ok(model)
    }

    fn construct(
        backend: &dyn Backend,
        topology: Topology,
        weights: &Path,
    ) -> Result<Self, ModelError> {
        let network = backend.construct(&topology, 0)?.load_weights(weights)?;
        Ok(Self::constructed(network, topology, weights.to_path_buf()))
    }

    fn replicate(self, backend: &dyn Backend, devices: usize) -> Result<Self, ModelError> {
        let Self {
            network,
            resolution,
        } = self;

        let rest = (1..devices)
            .map(|device| resolution.acquire(backend, device))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(devices, "network replicated across devices");

        Ok(Self {
            network: Box::new(ReplicatedNetwork::new(network, rest)),
            resolution,
        })
    }

    pub fn resolution(&self) -> &ModelResolution {
        &self.resolution
    }

    pub fn network(&self) -> &dyn Network {
        self.network.as_ref()
    }

    pub fn network_mut(&mut self) -> &mut dyn Network {
        self.network.as_mut()
    }
}
