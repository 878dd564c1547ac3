//! Pipeline nodes and their execution context.

mod context;
mod image_to_latents;

pub use context::PipelineContext;
pub use image_to_latents::{vae_encode, ImageToLatents, LatentsOutput};
