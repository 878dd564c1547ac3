//! Model resolution: references, the shared registry of loaded VAEs, and
//! scoped exclusive access to them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::model::cache::ModelCache;
use crate::model::vae::{Device, LoadedVae};
use crate::tensor::DType;

/// A named reference to a VAE model package. Resolving it through the
/// loader yields a usable model; the reference itself is cheap to clone and
/// pass between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaeRef {
    repo: String,
    subfolder: Option<String>,
}

impl VaeRef {
    /// Reference a package published at the root of a repository.
    #[must_use]
    pub fn new<S: Into<String>>(repo: S) -> Self {
        Self {
            repo: repo.into(),
            subfolder: None,
        }
    }

    /// Reference a package under a repository subfolder.
    #[must_use]
    pub fn with_subfolder<S: Into<String>>(mut self, subfolder: S) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }

    /// The default standard VAE package (Stable Diffusion 1.5 export).
    #[must_use]
    pub fn sd15() -> Self {
        Self::new("latentforge/sd15-vae-onnx")
    }

    /// The default tiny VAE package (TAESD export).
    #[must_use]
    pub fn taesd() -> Self {
        Self::new("latentforge/taesd-onnx")
    }

    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    #[must_use]
    pub fn subfolder(&self) -> Option<&str> {
        self.subfolder.as_deref()
    }

    /// Human-readable name for logs and errors.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.subfolder {
            Some(subfolder) => format!("{}/{subfolder}", self.repo),
            None => self.repo.clone(),
        }
    }

    /// Download URL of one file in the package.
    #[must_use]
    pub fn file_url(&self, file: &str) -> String {
        match &self.subfolder {
            Some(subfolder) => format!(
                "https://huggingface.co/{}/resolve/main/{subfolder}/{file}",
                self.repo
            ),
            None => format!("https://huggingface.co/{}/resolve/main/{file}", self.repo),
        }
    }
}

/// Exclusive, scope-bound access to a loaded VAE.
///
/// The underlying model is shared between all callers that resolved the
/// same reference; its precision and tiling settings are mutable runtime
/// state, so a caller must hold the guard for the whole of an encode.
pub struct VaeHandle {
    name: String,
    inner: Arc<Mutex<LoadedVae>>,
}

impl VaeHandle {
    /// Acquire the model for exclusive use. The guard releases it on every
    /// exit path, panics included.
    ///
    /// # Errors
    ///
    /// Fails if a previous holder panicked mid-mutation, leaving the model
    /// state unknown.
    pub fn acquire(&self) -> Result<MutexGuard<'_, LoadedVae>> {
        self.inner.lock().map_err(|_| Error::ModelPoisoned {
            name: self.name.clone(),
        })
    }

    /// Name of the referenced package.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Resolves model references to loaded instances, keeping one shared
/// instance per package.
pub struct ModelLoader {
    cache: ModelCache,
    device: Device,
    default_dtype: DType,
    loaded: Mutex<HashMap<VaeRef, Arc<Mutex<LoadedVae>>>>,
}

impl ModelLoader {
    /// A loader backed by the given file cache. Models start at half
    /// precision on the CPU; the encode path upcasts per request.
    #[must_use]
    pub fn new(cache: ModelCache) -> Self {
        Self {
            cache,
            device: Device::Cpu,
            default_dtype: DType::F16,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Override the precision newly loaded models start at.
    #[must_use]
    pub fn with_default_dtype(mut self, dtype: DType) -> Self {
        self.default_dtype = dtype;
        self
    }

    /// Override the device newly loaded models run on.
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Resolve a reference to a loaded model, fetching and instantiating it
    /// on first use.
    ///
    /// # Errors
    ///
    /// Fails if the package cannot be fetched or its metadata is invalid.
    pub fn load(&self, vae: &VaeRef) -> Result<VaeHandle> {
        let name = vae.display_name();

        let mut loaded = self.loaded.lock().map_err(|_| Error::ModelPoisoned {
            name: name.clone(),
        })?;

        if let Some(entry) = loaded.get(vae) {
            tracing::debug!(model = %name, "Reusing loaded VAE");
            return Ok(VaeHandle {
                name,
                inner: Arc::clone(entry),
            });
        }

        tracing::info!(model = %name, "Loading VAE package");
        let config = self.cache.load_config(vae)?;
        let files = self.cache.encoder_files(vae, config.fp16)?;
        let model = LoadedVae::new(
            name.clone(),
            config,
            files,
            self.device,
            self.default_dtype,
        );

        let entry = Arc::new(Mutex::new(model));
        loaded.insert(vae.clone(), Arc::clone(&entry));
        Ok(VaeHandle { name, inner: entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_with_and_without_subfolder() {
        let flat = VaeRef::new("latentforge/sd15-vae-onnx");
        assert_eq!(
            flat.file_url("config.json"),
            "https://huggingface.co/latentforge/sd15-vae-onnx/resolve/main/config.json"
        );

        let nested = VaeRef::new("latentforge/exports").with_subfolder("vae");
        assert_eq!(
            nested.file_url("encoder.fp32.onnx"),
            "https://huggingface.co/latentforge/exports/resolve/main/vae/encoder.fp32.onnx"
        );
        assert_eq!(nested.display_name(), "latentforge/exports/vae");
    }
}
