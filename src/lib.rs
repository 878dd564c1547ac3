//! # latentforge
//!
//! Encodes RGB images into VAE latent space for node-graph diffusion
//! pipelines.
//!
//! The crate implements the image-to-latents node together with the three
//! services it runs against: an image store resolving stable keys to pixel
//! data, a model loader resolving named references to exclusively-held VAE
//! instances, and a tensor store persisting latents under fresh identifiers
//! for downstream nodes.
//!
//! ## Example
//!
//! ```no_run
//! use latentforge::image::ImageStore;
//! use latentforge::model::{ModelCache, ModelLoader, VaeRef};
//! use latentforge::tensor::TensorStore;
//! use latentforge::{ImageToLatents, PipelineContext};
//!
//! # fn main() -> latentforge::Result<()> {
//! let ctx = PipelineContext::new(
//!     ImageStore::new("data/images")?,
//!     ModelLoader::new(ModelCache::new()?),
//!     TensorStore::new("data/tensors")?,
//! );
//!
//! let node = ImageToLatents {
//!     image: "cat".to_string(),
//!     vae: VaeRef::sd15(),
//!     tiled: false,
//!     fp32: false,
//! };
//! let latents = node.invoke(&ctx)?;
//! println!("{} {:?}", latents.latents_id, latents.shape);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod node;
pub mod tensor;

pub use error::{Error, Result};
pub use node::{ImageToLatents, LatentsOutput, PipelineContext};
