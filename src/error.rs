//! Custom error types for latentforge.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the latentforge library.
#[derive(Error, Debug)]
pub enum Error {
    /// No image is stored under the requested key.
    #[error("no image stored under key {key:?}")]
    ImageNotFound { key: String },

    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to write an image into the store.
    #[error("failed to store image under key {key:?}: {source}")]
    ImageStore {
        key: String,
        #[source]
        source: image::ImageError,
    },

    /// Image dimensions are not supported.
    #[error("unsupported image dimensions {width}x{height}: {reason}")]
    UnsupportedDimensions {
        width: u32,
        height: u32,
        reason: String,
    },

    /// Failed to download a model package file.
    #[error("failed to download model file {name}: {source}")]
    ModelDownload {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failed to load an ONNX graph.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// Model package metadata is missing or malformed.
    #[error("invalid model config for {name}: {source}")]
    ModelConfig {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The loaded model declares a class outside the known VAE variants.
    #[error("unsupported VAE variant {class_name:?}: no encode strategy registered")]
    UnsupportedVariant { class_name: String },

    /// A previous encode against this model panicked while holding the handle.
    #[error("VAE model {name} is unavailable: a prior encode aborted mid-mutation")]
    ModelPoisoned { name: String },

    /// Model inference failed (device and out-of-memory failures surface here).
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// Failed to create a cache or data directory.
    #[error("failed to create directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to persist a tensor.
    #[error("failed to save tensor {id}: {source}")]
    TensorSave {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// No tensor is stored under the requested identifier.
    #[error("no tensor stored under id {id:?}")]
    TensorNotFound { id: String },

    /// A stored tensor could not be decoded.
    #[error("failed to read tensor {id}: {reason}")]
    TensorFormat { id: String, reason: String },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

/// Result type alias for latentforge operations.
pub type Result<T> = std::result::Result<T, Error>;
