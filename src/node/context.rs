//! Execution context handed to pipeline nodes.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::image::ImageStore;
use crate::model::ModelLoader;
use crate::tensor::TensorStore;

/// The services a node invocation runs against, owned by the surrounding
/// graph executor.
pub struct PipelineContext {
    pub images: ImageStore,
    pub models: ModelLoader,
    pub tensors: TensorStore,
    /// Seed for operations that draw randomness. `None` seeds from the OS,
    /// making sampling encodes non-reproducible.
    pub seed: Option<u64>,
}

impl PipelineContext {
    #[must_use]
    pub fn new(images: ImageStore, models: ModelLoader, tensors: TensorStore) -> Self {
        Self {
            images,
            models,
            tensors,
            seed: None,
        }
    }

    /// Fix the random seed for subsequent invocations.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// A generator honoring the configured seed.
    pub(crate) fn rng(&self) -> StdRng {
        self.seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)
    }
}
