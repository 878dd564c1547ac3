//! Disk-backed tensor persistence keyed by generated identifiers.

use std::fs;
use std::path::{Path, PathBuf};

use half::f16;
use ndarray::ArrayD;
use rand::Rng;
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;

use crate::error::{Error, Result};
use crate::tensor::TensorData;

/// Name of the single tensor inside each stored safetensors file.
const TENSOR_KEY: &str = "tensor";

/// Persists tensors produced by pipeline nodes and hands out fresh
/// identifiers for downstream nodes to reference.
pub struct TensorStore {
    root: PathBuf,
}

impl TensorStore {
    /// Create a store rooted at the given directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| Error::CacheDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Persist a tensor and return its fresh identifier.
    ///
    /// Each call produces a new identifier; existing entries are never
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, tensor: &TensorData) -> Result<String> {
        let (id, path) = loop {
            let id = fresh_id();
            let path = self.path_of(&id);
            if !path.exists() {
                break (id, path);
            }
        };

        let view = match tensor {
            TensorData::F16(arr) => {
                let contiguous = arr.as_standard_layout();
                let mut bytes = Vec::with_capacity(contiguous.len() * 2);
                for v in contiguous.iter() {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                OwnedView {
                    dtype: Dtype::F16,
                    shape: tensor.shape().to_vec(),
                    bytes,
                }
            }
            TensorData::F32(arr) => {
                let contiguous = arr.as_standard_layout();
                let mut bytes = Vec::with_capacity(contiguous.len() * 4);
                for v in contiguous.iter() {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                OwnedView {
                    dtype: Dtype::F32,
                    shape: tensor.shape().to_vec(),
                    bytes,
                }
            }
        };

        let payload =
            safetensors::serialize([(TENSOR_KEY, view)], &None).map_err(|source| {
                Error::TensorFormat {
                    id: id.clone(),
                    reason: source.to_string(),
                }
            })?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, payload).map_err(|source| Error::TensorSave {
            id: id.clone(),
            source,
        })?;
        fs::rename(&temp_path, &path).map_err(|source| Error::TensorSave {
            id: id.clone(),
            source,
        })?;

        tracing::debug!(id = %id, shape = ?tensor.shape(), dtype = tensor.dtype().name(), "Saved tensor");
        Ok(id)
    }

    /// Load a previously saved tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is unknown or the file is corrupt.
    pub fn load(&self, id: &str) -> Result<TensorData> {
        let path = self.path_of(id);
        if !path.exists() {
            return Err(Error::TensorNotFound { id: id.to_string() });
        }

        let payload = fs::read(&path)?;
        let archive = SafeTensors::deserialize(&payload).map_err(|source| Error::TensorFormat {
            id: id.to_string(),
            reason: source.to_string(),
        })?;
        let view = archive.tensor(TENSOR_KEY).map_err(|source| Error::TensorFormat {
            id: id.to_string(),
            reason: source.to_string(),
        })?;

        decode_view(&view, id)
    }

    /// Path of the file backing an identifier.
    #[must_use]
    pub fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.safetensors"))
    }

    /// Directory this store writes into.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// 128 bits of entropy rendered as lowercase hex.
fn fresh_id() -> String {
    let mut rng = rand::rng();
    format!("{:032x}", rng.random::<u128>())
}

struct OwnedView {
    dtype: Dtype,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl safetensors::View for OwnedView {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> std::borrow::Cow<'_, [u8]> {
        std::borrow::Cow::Borrowed(&self.bytes)
    }

    fn data_len(&self) -> usize {
        self.bytes.len()
    }
}

fn decode_view(view: &TensorView<'_>, id: &str) -> Result<TensorData> {
    let shape = view.shape().to_vec();
    let data = view.data();

    match view.dtype() {
        Dtype::F32 => {
            let values: Vec<f32> = data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            let arr = ArrayD::from_shape_vec(shape, values).map_err(|_| Error::TensorFormat {
                id: id.to_string(),
                reason: "element count does not match shape".to_string(),
            })?;
            Ok(TensorData::F32(arr))
        }
        Dtype::F16 => {
            let values: Vec<f16> = data
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]))
                .collect();
            let arr = ArrayD::from_shape_vec(shape, values).map_err(|_| Error::TensorFormat {
                id: id.to_string(),
                reason: "element count does not match shape".to_string(),
            })?;
            Ok(TensorData::F16(arr))
        }
        other => Err(Error::TensorFormat {
            id: id.to_string(),
            reason: format!("unsupported stored dtype {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;
    use ndarray::IxDyn;

    fn temp_store(tag: &str) -> TensorStore {
        let dir = std::env::temp_dir()
            .join("latentforge-tests")
            .join(format!("{}-{tag}", std::process::id()));
        TensorStore::new(dir).unwrap()
    }

    #[test]
    fn test_save_returns_fresh_ids() {
        let store = temp_store("fresh-ids");
        let tensor = TensorData::F32(ArrayD::zeros(IxDyn(&[1, 4, 8, 8])));
        let a = store.save(&tensor).unwrap();
        let b = store.save(&tensor).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_roundtrip_f32() {
        let store = temp_store("roundtrip-f32");
        let tensor = TensorData::F32(ArrayD::from_elem(IxDyn(&[1, 4, 2, 2]), 0.18215f32));
        let id = store.save(&tensor).unwrap();
        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded, tensor);
    }

    #[test]
    fn test_roundtrip_f16_preserves_dtype() {
        let store = temp_store("roundtrip-f16");
        let tensor =
            TensorData::from_f32_array(ArrayD::from_elem(IxDyn(&[1, 4, 2, 2]), 1.5f32), DType::F16);
        let id = store.save(&tensor).unwrap();
        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.dtype(), DType::F16);
        assert_eq!(loaded, tensor);
    }

    #[test]
    fn test_load_unknown_id() {
        let store = temp_store("unknown-id");
        assert!(matches!(
            store.load("deadbeef"),
            Err(Error::TensorNotFound { .. })
        ));
    }
}
