//! Dtype-tagged host tensors shared between the image, model, and store layers.

mod store;

pub use store::TensorStore;

use half::f16;
use ndarray::{ArrayD, Axis};

use crate::error::{Error, Result};

/// Numeric precision of a tensor or a loaded model module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DType {
    /// 16-bit half precision.
    F16,
    /// Full 32-bit precision (default).
    #[default]
    F32,
}

impl DType {
    /// Get a human-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::F32 => "f32",
        }
    }

    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_of(&self) -> usize {
        match self {
            Self::F16 => 2,
            Self::F32 => 4,
        }
    }
}

/// A host tensor in NCHW-style layout, stored at a concrete precision.
///
/// Pixel tensors enter the pipeline as rank-3 (channel, height, width);
/// everything handed to a model or the tensor store is rank-4 with a
/// leading batch axis.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F16(ArrayD<f16>),
    F32(ArrayD<f32>),
}

impl TensorData {
    /// The tensor's storage precision.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::F16(_) => DType::F16,
            Self::F32(_) => DType::F32,
        }
    }

    /// Axis lengths, outermost first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F16(arr) => arr.shape(),
            Self::F32(arr) => arr.shape(),
        }
    }

    /// Number of axes.
    #[must_use]
    pub fn ndim(&self) -> usize {
        match self {
            Self::F16(arr) => arr.ndim(),
            Self::F32(arr) => arr.ndim(),
        }
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F16(arr) => arr.len(),
            Self::F32(arr) => arr.len(),
        }
    }

    /// Whether the tensor holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cast to the requested precision.
    ///
    /// Casting f32 data to [`DType::F16`] quantizes through IEEE half and is
    /// lossy; casting back widens the quantized values.
    #[must_use]
    pub fn to_dtype(self, dtype: DType) -> Self {
        match (self, dtype) {
            (Self::F32(arr), DType::F16) => Self::F16(arr.mapv(f16::from_f32)),
            (Self::F16(arr), DType::F32) => Self::F32(arr.mapv(f32::from)),
            (same, _) => same,
        }
    }

    /// Materialize an f32 copy regardless of storage precision.
    #[must_use]
    pub fn to_f32_array(&self) -> ArrayD<f32> {
        match self {
            Self::F16(arr) => arr.mapv(f32::from),
            Self::F32(arr) => arr.clone(),
        }
    }

    /// Wrap an f32 array at the requested storage precision.
    #[must_use]
    pub fn from_f32_array(arr: ArrayD<f32>, dtype: DType) -> Self {
        Self::F32(arr).to_dtype(dtype)
    }

    /// Multiply every element by a scalar, preserving storage precision.
    #[must_use]
    pub fn scale(self, factor: f32) -> Self {
        match self {
            Self::F16(arr) => Self::F16(arr.mapv(|v| f16::from_f32(v.to_f32() * factor))),
            Self::F32(arr) => Self::F32(arr.mapv(|v| v * factor)),
        }
    }

    /// Normalize to rank-4 by inserting a batch axis of size 1 in front of a
    /// rank-3 tensor. Rank-4 tensors pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns a shape error for any other rank.
    pub fn ensure_batch_axis(self) -> Result<Self> {
        match self.ndim() {
            3 => Ok(match self {
                Self::F16(arr) => Self::F16(arr.insert_axis(Axis(0))),
                Self::F32(arr) => Self::F32(arr.insert_axis(Axis(0))),
            }),
            4 => Ok(self),
            n => Err(Error::ShapeMismatch {
                expected: "rank-3 or rank-4 tensor".to_string(),
                actual: format!("rank-{n} tensor"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4, ArrayD, IxDyn};

    #[test]
    fn test_batch_axis_inserted_for_rank3() {
        let pixels = TensorData::F32(Array3::<f32>::zeros((3, 16, 16)).into_dyn());
        let batched = pixels.ensure_batch_axis().unwrap();
        assert_eq!(batched.shape(), &[1, 3, 16, 16]);
    }

    #[test]
    fn test_batch_axis_passthrough_for_rank4() {
        let pixels = TensorData::F32(Array4::<f32>::zeros((2, 3, 16, 16)).into_dyn());
        let batched = pixels.ensure_batch_axis().unwrap();
        assert_eq!(batched.shape(), &[2, 3, 16, 16]);
    }

    #[test]
    fn test_batch_axis_rejects_other_ranks() {
        let flat = TensorData::F32(ArrayD::<f32>::zeros(IxDyn(&[16])));
        assert!(matches!(
            flat.ensure_batch_axis(),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_cast_roundtrip_quantizes() {
        let arr = ArrayD::from_elem(IxDyn(&[2, 2]), 0.1f32);
        let quantized = TensorData::F32(arr)
            .to_dtype(DType::F16)
            .to_dtype(DType::F32);
        let TensorData::F32(back) = quantized else {
            panic!("expected f32 after cast back");
        };
        // The value survives within half-precision tolerance but is no
        // longer bit-identical to the original.
        assert!((back[[0, 0]] - 0.1).abs() < 1e-3);
        assert_ne!(back[[0, 0]].to_bits(), 0.1f32.to_bits());
    }

    #[test]
    fn test_cast_same_dtype_is_identity() {
        let arr = ArrayD::from_elem(IxDyn(&[4]), 1.5f32);
        let t = TensorData::F32(arr.clone()).to_dtype(DType::F32);
        assert_eq!(t, TensorData::F32(arr));
    }

    #[test]
    fn test_scale_preserves_dtype() {
        let arr = ArrayD::from_elem(IxDyn(&[1, 4, 2, 2]), 2.0f32);
        let scaled = TensorData::from_f32_array(arr, DType::F16).scale(0.5);
        assert_eq!(scaled.dtype(), DType::F16);
        assert!((scaled.to_f32_array()[[0, 0, 0, 0]] - 1.0).abs() < 1e-3);
    }
}
