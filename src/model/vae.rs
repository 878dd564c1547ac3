//! Loaded VAE handles: runtime precision and tiling state, encode dispatch.

use std::path::Path;

use half::f16;
use ndarray::{Axis, ArrayD, Slice};
use ort::session::Session;
use ort::value::Tensor;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Error, Result};
use crate::image::LATENT_SCALE_FACTOR;
use crate::model::cache::EncoderFiles;
use crate::model::config::{VaeArchitecture, VaeConfig};
use crate::tensor::{DType, TensorData};

/// Fraction of each tile overlapped with its neighbours during tiled
/// encoding; seams are blended over this extent in latent space.
const TILE_OVERLAP_FACTOR: f32 = 0.25;

/// Clamp range applied to encoder log-variances before exponentiation.
const LOGVAR_MIN: f32 = -30.0;
const LOGVAR_MAX: f32 = 20.0;

/// Compute device the model's sessions execute on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// How latents are obtained from the encoder graph's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeStrategy {
    /// Output is distribution moments; sample to get latents.
    Gaussian,
    /// Output is the latents themselves.
    Direct,
}

fn encode_strategy(architecture: &VaeArchitecture) -> Result<EncodeStrategy> {
    match architecture {
        VaeArchitecture::AutoencoderKl => Ok(EncodeStrategy::Gaussian),
        VaeArchitecture::AutoencoderTiny => Ok(EncodeStrategy::Direct),
        VaeArchitecture::Other(name) => Err(Error::UnsupportedVariant {
            class_name: name.clone(),
        }),
    }
}

/// Precision of the decoder-side modules the high-precision encode path
/// selectively keeps at the model's prior precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmodulePrecision {
    pub post_quant_conv: DType,
    pub decoder_conv_in: DType,
    pub decoder_mid_block: DType,
}

impl SubmodulePrecision {
    /// All submodules at one precision.
    #[must_use]
    pub const fn uniform(dtype: DType) -> Self {
        Self {
            post_quant_conv: dtype,
            decoder_conv_in: dtype,
            decoder_mid_block: dtype,
        }
    }

    pub fn set_all(&mut self, dtype: DType) {
        *self = Self::uniform(dtype);
    }
}

/// Snapshot of a handle's mutable runtime state, taken before an encode
/// mutates it and written back when the handle is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeState {
    pub dtype: DType,
    pub submodules: SubmodulePrecision,
    pub tiling: bool,
}

/// An in-memory VAE. The handle is shared between callers through the model
/// loader; precision and tiling are mutable runtime state, which is why
/// access must be exclusive while encoding.
pub struct LoadedVae {
    name: String,
    config: VaeConfig,
    architecture: VaeArchitecture,
    device: Device,
    dtype: DType,
    tiling: bool,
    submodules: SubmodulePrecision,
    sessions: SessionBank,
}

impl LoadedVae {
    pub(crate) fn new(
        name: String,
        config: VaeConfig,
        files: EncoderFiles,
        device: Device,
        dtype: DType,
    ) -> Self {
        let architecture = config.architecture();
        Self {
            name,
            config,
            architecture,
            device,
            dtype,
            tiling: false,
            submodules: SubmodulePrecision::uniform(dtype),
            sessions: SessionBank::new(files),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn architecture(&self) -> &VaeArchitecture {
        &self.architecture
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// The model's current working precision.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Switch the whole model, submodules included, to a precision.
    pub fn set_dtype(&mut self, dtype: DType) {
        self.dtype = dtype;
        self.submodules.set_all(dtype);
    }

    #[must_use]
    pub fn submodule_precision(&self) -> SubmodulePrecision {
        self.submodules
    }

    pub fn submodule_precision_mut(&mut self) -> &mut SubmodulePrecision {
        &mut self.submodules
    }

    #[must_use]
    pub fn tiling(&self) -> bool {
        self.tiling
    }

    pub fn set_tiling(&mut self, enabled: bool) {
        self.tiling = enabled;
    }

    #[must_use]
    pub fn scaling_factor(&self) -> f32 {
        self.config.scaling_factor
    }

    #[must_use]
    pub fn supports_efficient_attention(&self) -> bool {
        self.config.supports_efficient_attention()
    }

    /// Snapshot the mutable runtime state.
    #[must_use]
    pub fn runtime_state(&self) -> RuntimeState {
        RuntimeState {
            dtype: self.dtype,
            submodules: self.submodules,
            tiling: self.tiling,
        }
    }

    /// Write a previously captured runtime state back. The model is a
    /// shared, reusable resource; callers restore state before releasing it.
    pub fn restore_runtime_state(&mut self, state: RuntimeState) {
        self.dtype = state.dtype;
        self.submodules = state.submodules;
        self.tiling = state.tiling;
    }

    /// Estimated resident weight bytes given the current per-module
    /// precision plan.
    #[must_use]
    pub fn estimated_weight_bytes(&self) -> u64 {
        self.config
            .decoder
            .parameter_counts
            .iter()
            .map(|(module, count)| {
                let dtype = match module.as_str() {
                    "post_quant_conv" => self.submodules.post_quant_conv,
                    "decoder.conv_in" => self.submodules.decoder_conv_in,
                    "decoder.mid_block" => self.submodules.decoder_mid_block,
                    _ => self.dtype,
                };
                count * dtype.size_of() as u64
            })
            .sum()
    }

    /// Run the encoder over a rank-4 pixel tensor and return latents at the
    /// model's working precision.
    ///
    /// Standard KL models sample their latent distribution with `rng`;
    /// callers needing reproducibility seed it. Tiny models are
    /// deterministic.
    ///
    /// # Errors
    ///
    /// Fails for unsupported architectures, wrong-rank input, or session
    /// failures (device and out-of-memory errors surface as
    /// [`Error::Inference`]).
    pub fn encode_pixels(&mut self, pixels: &TensorData, rng: &mut StdRng) -> Result<TensorData> {
        let strategy = encode_strategy(&self.architecture)?;

        if pixels.ndim() != 4 {
            return Err(Error::ShapeMismatch {
                expected: "rank-4 pixel tensor".to_string(),
                actual: format!("rank-{} tensor", pixels.ndim()),
            });
        }

        let shape = pixels.shape();
        let (height, width) = (shape[2], shape[3]);
        let tile_size = self.config.sample_size;
        let use_tiled = self.tiling && (height > tile_size || width > tile_size);

        tracing::debug!(
            model = %self.name,
            dtype = self.dtype.name(),
            tiled = use_tiled,
            est_weight_bytes = self.estimated_weight_bytes(),
            "Encoding {height}x{width} pixels"
        );

        let graph_dtype = match self.dtype {
            // No half-precision export; the fp32 graph runs with casts at
            // the handle boundary instead.
            DType::F16 if !self.sessions.has_fp16() => DType::F32,
            other => other,
        };

        let input = pixels.to_f32_array();
        let device = self.device;
        let session = self.sessions.get_or_build(graph_dtype, device, &self.name)?;

        let raw = if use_tiled {
            tiled_encode(&input, tile_size, |tile| {
                run_graph(session, graph_dtype, &tile)
            })?
        } else {
            run_graph(session, graph_dtype, &input)?
        };

        let latents = match strategy {
            EncodeStrategy::Gaussian => {
                expect_channels(&raw, 2 * self.config.latent_channels)?;
                DiagonalGaussian::from_moments(&raw)?.sample(rng)
            }
            EncodeStrategy::Direct => {
                expect_channels(&raw, self.config.latent_channels)?;
                raw
            }
        };

        Ok(TensorData::from_f32_array(latents, self.dtype))
    }
}

fn expect_channels(tensor: &ArrayD<f32>, channels: usize) -> Result<()> {
    if tensor.ndim() != 4 || tensor.shape()[1] != channels {
        return Err(Error::ShapeMismatch {
            expected: format!("rank-4 encoder output with {channels} channels"),
            actual: format!("{:?}", tensor.shape()),
        });
    }
    Ok(())
}

/// Diagonal gaussian over latents, parameterized by the encoder's moments
/// (mean and log-variance stacked along the channel axis).
pub struct DiagonalGaussian {
    mean: ArrayD<f32>,
    std: ArrayD<f32>,
}

impl DiagonalGaussian {
    /// Split a rank-4 moments tensor into mean and standard deviation.
    ///
    /// # Errors
    ///
    /// Returns a shape error unless the channel axis has an even, non-zero
    /// length.
    pub fn from_moments(moments: &ArrayD<f32>) -> Result<Self> {
        if moments.ndim() != 4 || moments.shape()[1] == 0 || moments.shape()[1] % 2 != 0 {
            return Err(Error::ShapeMismatch {
                expected: "rank-4 moments with an even channel count".to_string(),
                actual: format!("{:?}", moments.shape()),
            });
        }

        let half = moments.shape()[1] / 2;
        let mean = moments.slice_axis(Axis(1), Slice::from(..half)).to_owned();
        let std = moments
            .slice_axis(Axis(1), Slice::from(half..))
            .mapv(|logvar| (0.5 * logvar.clamp(LOGVAR_MIN, LOGVAR_MAX)).exp());

        Ok(Self { mean, std })
    }

    /// Draw `mean + std * eps` with `eps ~ N(0, 1)`.
    #[must_use]
    pub fn sample(&self, rng: &mut StdRng) -> ArrayD<f32> {
        let mut out = self.mean.clone();
        out.zip_mut_with(&self.std, |m, &s| {
            let eps: f32 = rng.sample(StandardNormal);
            *m += s * eps;
        });
        out
    }

    #[must_use]
    pub fn mean(&self) -> &ArrayD<f32> {
        &self.mean
    }

    #[must_use]
    pub fn std(&self) -> &ArrayD<f32> {
        &self.std
    }
}

/// Encoder sessions per graph precision, built lazily from the cached
/// package files.
struct SessionBank {
    files: EncoderFiles,
    fp32: Option<Session>,
    fp16: Option<Session>,
}

impl SessionBank {
    fn new(files: EncoderFiles) -> Self {
        Self {
            files,
            fp32: None,
            fp16: None,
        }
    }

    fn has_fp16(&self) -> bool {
        self.files.fp16.is_some()
    }

    fn get_or_build(&mut self, dtype: DType, device: Device, name: &str) -> Result<&mut Session> {
        let (slot, path) = match dtype {
            DType::F32 => (&mut self.fp32, self.files.fp32.clone()),
            DType::F16 => {
                let path = self.files.fp16.clone().ok_or_else(|| Error::InvalidParameter {
                    name: "dtype".to_string(),
                    reason: format!("package {name} ships no half-precision encoder graph"),
                })?;
                (&mut self.fp16, path)
            }
        };

        if slot.is_none() {
            *slot = Some(build_session(&path, device, name)?);
        }
        Ok(slot.as_mut().expect("session just built"))
    }
}

fn build_session(path: &Path, device: Device, name: &str) -> Result<Session> {
    if let Device::Cuda(id) = device {
        return Err(Error::InvalidParameter {
            name: "device".to_string(),
            reason: format!(
                "cuda:{id} requested but this build only registers the CPU execution provider"
            ),
        });
    }

    tracing::info!(model = %name, path = %path.display(), "Loading encoder graph");
    Session::builder()
        .map_err(|source| Error::ModelLoad {
            name: name.to_string(),
            source,
        })?
        .commit_from_file(path)
        .map_err(|source| Error::ModelLoad {
            name: name.to_string(),
            source,
        })
}

/// One forward pass through an encoder graph, marshaled at the graph's
/// precision.
fn run_graph(session: &mut Session, graph_dtype: DType, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    match graph_dtype {
        DType::F32 => {
            let value =
                Tensor::from_array(input.clone()).map_err(|source| Error::Inference { source })?;
            let outputs = session
                .run(ort::inputs![value])
                .map_err(|source| Error::Inference { source })?;
            let output = outputs.values().next().ok_or_else(|| Error::ShapeMismatch {
                expected: "one encoder output".to_string(),
                actual: "no output".to_string(),
            })?;
            let (shape_info, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|source| Error::Inference { source })?;
            // Safe: tensor dimensions are always non-negative and within bounds
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();
            ArrayD::from_shape_vec(dims.clone(), data.to_vec()).map_err(|_| {
                Error::ShapeMismatch {
                    expected: format!("{dims:?}"),
                    actual: "reshape failed".to_string(),
                }
            })
        }
        DType::F16 => {
            let value = Tensor::from_array(input.mapv(f16::from_f32))
                .map_err(|source| Error::Inference { source })?;
            let outputs = session
                .run(ort::inputs![value])
                .map_err(|source| Error::Inference { source })?;
            let output = outputs.values().next().ok_or_else(|| Error::ShapeMismatch {
                expected: "one encoder output".to_string(),
                actual: "no output".to_string(),
            })?;
            let (shape_info, data) = output
                .try_extract_tensor::<f16>()
                .map_err(|source| Error::Inference { source })?;
            let widened: Vec<f32> = data.iter().copied().map(f32::from).collect();
            // Safe: tensor dimensions are always non-negative and within bounds
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();
            ArrayD::from_shape_vec(dims.clone(), widened).map_err(|_| {
                Error::ShapeMismatch {
                    expected: format!("{dims:?}"),
                    actual: "reshape failed".to_string(),
                }
            })
        }
    }
}

/// Encode an oversized input tile by tile, blending seams in latent space.
///
/// Tiles overlap by [`TILE_OVERLAP_FACTOR`] of the tile edge; each encoded
/// tile is blended against its top and left neighbours over the
/// corresponding latent extent, cropped, and stitched.
fn tiled_encode<F>(input: &ArrayD<f32>, tile_size: usize, mut run: F) -> Result<ArrayD<f32>>
where
    F: FnMut(ArrayD<f32>) -> Result<ArrayD<f32>>,
{
    let scale = LATENT_SCALE_FACTOR as usize;
    let height = input.shape()[2];
    let width = input.shape()[3];

    let stride = tile_size - tile_size / 4;
    let latent_tile = tile_size / scale;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let blend_extent = (latent_tile as f32 * TILE_OVERLAP_FACTOR) as usize;
    let row_limit = latent_tile - blend_extent;

    let mut rows: Vec<Vec<ArrayD<f32>>> = Vec::new();
    let mut y = 0;
    while y < height {
        let mut row = Vec::new();
        let mut x = 0;
        while x < width {
            let tile = input
                .slice_axis(Axis(2), Slice::from(y..(y + tile_size).min(height)))
                .slice_axis(Axis(3), Slice::from(x..(x + tile_size).min(width)))
                .to_owned();
            row.push(run(tile)?);
            x += stride;
        }
        rows.push(row);
        y += stride;
    }

    let mut stitched_rows = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let mut pieces = Vec::with_capacity(row.len());
        for (j, raw) in row.iter().enumerate() {
            let mut tile = raw.clone();
            if i > 0 {
                blend_v(&rows[i - 1][j], &mut tile, blend_extent);
            }
            if j > 0 {
                blend_h(&row[j - 1], &mut tile, blend_extent);
            }
            let crop_h = tile.shape()[2].min(row_limit);
            let crop_w = tile.shape()[3].min(row_limit);
            pieces.push(
                tile.slice_axis(Axis(2), Slice::from(..crop_h))
                    .slice_axis(Axis(3), Slice::from(..crop_w))
                    .to_owned(),
            );
        }
        let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
        stitched_rows.push(ndarray::concatenate(Axis(3), &views).map_err(|_| {
            Error::ShapeMismatch {
                expected: "matching tile heights within a row".to_string(),
                actual: "ragged latent tiles".to_string(),
            }
        })?);
    }

    let views: Vec<_> = stitched_rows.iter().map(|r| r.view()).collect();
    ndarray::concatenate(Axis(2), &views).map_err(|_| Error::ShapeMismatch {
        expected: "matching row widths".to_string(),
        actual: "ragged latent rows".to_string(),
    })
}

/// Blend the top `extent` rows of `tile` against the bottom rows of the
/// tile above it.
fn blend_v(above: &ArrayD<f32>, tile: &mut ArrayD<f32>, extent: usize) {
    let extent = extent.min(above.shape()[2]).min(tile.shape()[2]);
    for y in 0..extent {
        #[allow(clippy::cast_precision_loss)]
        let w = y as f32 / extent as f32;
        let src = above
            .index_axis(Axis(2), above.shape()[2] - extent + y)
            .to_owned();
        let mut dst = tile.index_axis_mut(Axis(2), y);
        dst.zip_mut_with(&src, |b, &a| *b = a * (1.0 - w) + *b * w);
    }
}

/// Blend the left `extent` columns of `tile` against the right columns of
/// the tile to its left.
fn blend_h(left: &ArrayD<f32>, tile: &mut ArrayD<f32>, extent: usize) {
    let extent = extent.min(left.shape()[3]).min(tile.shape()[3]);
    for x in 0..extent {
        #[allow(clippy::cast_precision_loss)]
        let w = x as f32 / extent as f32;
        let src = left
            .index_axis(Axis(3), left.shape()[3] - extent + x)
            .to_owned();
        let mut dst = tile.index_axis_mut(Axis(3), x);
        dst.zip_mut_with(&src, |b, &a| *b = a * (1.0 - w) + *b * w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array4, IxDyn};
    use rand::SeedableRng;
    use std::path::PathBuf;

    fn kl_config(class_name: &str) -> VaeConfig {
        VaeConfig::parse(
            "test",
            &format!(
                r#"{{
                    "_class_name": "{class_name}",
                    "scaling_factor": 0.18215,
                    "latent_channels": 4,
                    "sample_size": 512,
                    "decoder": {{
                        "mid_block_attention": "AttnProcessor2_0",
                        "parameter_counts": {{
                            "encoder": 1000,
                            "post_quant_conv": 100,
                            "decoder.conv_in": 100,
                            "decoder.mid_block": 100
                        }}
                    }}
                }}"#
            ),
        )
        .unwrap()
    }

    fn test_vae(class_name: &str) -> LoadedVae {
        let files = EncoderFiles {
            fp32: PathBuf::from("/nonexistent/encoder.fp32.onnx"),
            fp16: None,
        };
        LoadedVae::new(
            "test-vae".to_string(),
            kl_config(class_name),
            files,
            Device::Cpu,
            DType::F16,
        )
    }

    #[test]
    fn test_unsupported_variant_fails_before_any_session() {
        let mut vae = test_vae("ConsistencyDecoderVAE");
        let pixels = TensorData::F32(Array4::<f32>::zeros((1, 3, 64, 64)).into_dyn());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            vae.encode_pixels(&pixels, &mut rng),
            Err(Error::UnsupportedVariant { class_name }) if class_name == "ConsistencyDecoderVAE"
        ));
    }

    #[test]
    fn test_encode_rejects_unbatched_input() {
        let mut vae = test_vae("AutoencoderKL");
        let pixels = TensorData::F32(ArrayD::<f32>::zeros(IxDyn(&[3, 64, 64])));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            vae.encode_pixels(&pixels, &mut rng),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_runtime_state_roundtrip() {
        let mut vae = test_vae("AutoencoderKL");
        let before = vae.runtime_state();

        vae.set_dtype(DType::F32);
        vae.set_tiling(true);
        vae.submodule_precision_mut().decoder_mid_block = DType::F16;
        assert_ne!(vae.runtime_state(), before);

        vae.restore_runtime_state(before);
        assert_eq!(vae.runtime_state(), before);
        assert_eq!(vae.dtype(), DType::F16);
        assert!(!vae.tiling());
    }

    #[test]
    fn test_set_dtype_covers_submodules() {
        let mut vae = test_vae("AutoencoderKL");
        vae.set_dtype(DType::F32);
        assert_eq!(
            vae.submodule_precision(),
            SubmodulePrecision::uniform(DType::F32)
        );
    }

    #[test]
    fn test_weight_estimate_tracks_submodule_precision() {
        let mut vae = test_vae("AutoencoderKL");
        vae.set_dtype(DType::F32);
        // 1300 parameters at 4 bytes.
        assert_eq!(vae.estimated_weight_bytes(), 5200);

        // Restoring the three decoder modules to f16 halves their share.
        vae.submodule_precision_mut().set_all(DType::F16);
        assert_eq!(vae.estimated_weight_bytes(), 4000 + 600);
    }

    #[test]
    fn test_gaussian_split_and_clamp() {
        let mut moments = Array4::<f32>::zeros((1, 8, 2, 2));
        moments[[0, 0, 0, 0]] = 1.5;
        // An extreme log-variance must clamp instead of overflowing.
        moments[[0, 4, 0, 0]] = 1.0e9;
        let dist = DiagonalGaussian::from_moments(&moments.into_dyn()).unwrap();
        assert_eq!(dist.mean().shape(), &[1, 4, 2, 2]);
        assert!((dist.mean()[[0, 0, 0, 0]] - 1.5).abs() < f32::EPSILON);
        assert!(dist.std()[[0, 0, 0, 0]].is_finite());
    }

    #[test]
    fn test_gaussian_odd_channels_rejected() {
        let moments = Array4::<f32>::zeros((1, 7, 2, 2)).into_dyn();
        assert!(matches!(
            DiagonalGaussian::from_moments(&moments),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_sampling_is_reproducible_under_a_seed() {
        let mut moments = Array4::<f32>::zeros((1, 8, 4, 4));
        moments.slice_axis_mut(Axis(1), Slice::from(..4usize)).fill(0.5);
        let dist = DiagonalGaussian::from_moments(&moments.into_dyn()).unwrap();

        let a = dist.sample(&mut StdRng::seed_from_u64(42));
        let b = dist.sample(&mut StdRng::seed_from_u64(42));
        let c = dist.sample(&mut StdRng::seed_from_u64(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_near_zero_variance_collapses_to_mean() {
        let mut moments = Array4::<f32>::zeros((1, 2, 2, 2));
        moments.slice_axis_mut(Axis(1), Slice::from(..1usize)).fill(2.0);
        moments.slice_axis_mut(Axis(1), Slice::from(1usize..)).fill(-1.0e9);
        let dist = DiagonalGaussian::from_moments(&moments.into_dyn()).unwrap();
        let sample = dist.sample(&mut StdRng::seed_from_u64(7));
        for v in &sample {
            assert!((v - 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_blend_v_ramps_between_tiles() {
        let above = Array4::<f32>::ones((1, 1, 4, 2)).into_dyn();
        let mut tile = Array4::<f32>::zeros((1, 1, 4, 2)).into_dyn();
        blend_v(&above, &mut tile, 2);

        // First blended row is fully the neighbour, second is halfway.
        assert!((tile[[0, 0, 0, 0]] - 1.0).abs() < f32::EPSILON);
        assert!((tile[[0, 0, 1, 0]] - 0.5).abs() < f32::EPSILON);
        assert!((tile[[0, 0, 2, 0]]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_blend_zero_extent_is_noop() {
        let above = Array4::<f32>::ones((1, 1, 4, 2)).into_dyn();
        let mut tile = Array4::<f32>::zeros((1, 1, 4, 2)).into_dyn();
        blend_v(&above, &mut tile, 0);
        assert!(tile.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_tiled_encode_stitches_to_full_latent_extent() {
        // 40x40 input, 32px tiles with 24px stride: tiles at 0 and 24 on
        // each axis. A fake encoder downsamples by the latent scale.
        let input = Array4::<f32>::from_shape_fn((1, 3, 40, 40), |(_, c, y, x)| {
            (c * 10_000 + y * 100 + x) as f32
        })
        .into_dyn();

        let scale = LATENT_SCALE_FACTOR as usize;
        let out = tiled_encode(&input, 32, |tile| {
            let view = tile.into_dimensionality::<ndarray::Ix4>().unwrap();
            Ok(view
                .slice(ndarray::s![.., .., ..;scale, ..;scale])
                .to_owned()
                .into_dyn())
        })
        .unwrap();

        assert_eq!(out.shape(), &[1, 3, 5, 5]);
        // Interior samples away from seams keep the fake encoder's values.
        assert!((out[[0, 0, 0, 0]] - input[[0, 0, 0, 0]]).abs() < f32::EPSILON);
    }
}
