//! VAE model packages: caching, metadata, loading, and runtime handles.

pub mod cache;
mod config;
mod loader;
mod vae;

pub use cache::ModelCache;
pub use config::{VaeArchitecture, VaeConfig, EFFICIENT_ATTENTION_PROCESSORS};
pub use loader::{ModelLoader, VaeHandle, VaeRef};
pub use vae::{Device, DiagonalGaussian, LoadedVae, RuntimeState, SubmodulePrecision};
