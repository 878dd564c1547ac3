//! The image-to-latents node: encodes a stored image into a latent tensor
//! through a referenced VAE.

use rand::rngs::StdRng;

use crate::error::Result;
use crate::image::image_to_grid_tensor;
use crate::model::{LoadedVae, VaeHandle, VaeRef};
use crate::node::context::PipelineContext;
use crate::tensor::{DType, TensorData};

/// Artifact handed to downstream nodes: a stored-tensor reference plus
/// shape metadata. Encoding never fixes a seed, so `seed` is always `None`
/// here; denoising nodes populate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatentsOutput {
    pub latents_id: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub seed: Option<u64>,
}

impl LatentsOutput {
    fn build(latents_id: String, latents: &TensorData) -> Self {
        Self {
            latents_id,
            shape: latents.shape().to_vec(),
            dtype: latents.dtype(),
            seed: None,
        }
    }
}

/// Node inputs. `tiled` and `fp32` are forwarded to the model handle as
/// runtime settings for the duration of the encode.
#[derive(Debug, Clone)]
pub struct ImageToLatents {
    /// Key of the image to encode.
    pub image: String,
    /// The VAE to encode with.
    pub vae: VaeRef,
    /// Encode in overlapping tiles to bound peak memory on large images.
    pub tiled: bool,
    /// Run the model at full precision instead of half.
    pub fp32: bool,
}

impl ImageToLatents {
    /// Encode the referenced image and persist the resulting latents.
    ///
    /// # Errors
    ///
    /// Fails if the image or model reference does not resolve, the model is
    /// an unsupported variant, or encoding itself fails. Nothing is written
    /// to the tensor store on failure.
    pub fn invoke(&self, ctx: &PipelineContext) -> Result<LatentsOutput> {
        let image = ctx.images.get(&self.image)?;
        let vae = ctx.models.load(&self.vae)?;

        let pixels = TensorData::F32(image_to_grid_tensor(&image)?.into_dyn());
        let pixels = pixels.ensure_batch_axis()?;

        let mut rng = ctx.rng();
        let latents = vae_encode(&vae, self.fp32, self.tiled, &pixels, &mut rng)?;

        let name = ctx.tensors.save(&latents)?;
        tracing::info!(
            image = %self.image,
            latents = %name,
            shape = ?latents.shape(),
            "Encoded image to latents"
        );
        Ok(LatentsOutput::build(name, &latents))
    }
}

/// Encode a pixel tensor through an exclusively acquired VAE.
///
/// The handle's precision and tiling settings are mutated for the duration
/// of the call and restored before release on every path, success or error;
/// the model is shared with other callers.
///
/// # Errors
///
/// Propagates resolution, dispatch, and inference failures unchanged.
pub fn vae_encode(
    vae: &VaeHandle,
    fp32: bool,
    tiled: bool,
    pixels: &TensorData,
    rng: &mut StdRng,
) -> Result<TensorData> {
    let mut model = vae.acquire()?;
    let state = model.runtime_state();

    let result = encode_under_settings(&mut model, fp32, tiled, pixels, rng, state.dtype);

    model.restore_runtime_state(state);
    result
}

fn encode_under_settings(
    model: &mut LoadedVae,
    fp32: bool,
    tiled: bool,
    pixels: &TensorData,
    rng: &mut StdRng,
    orig_dtype: DType,
) -> Result<TensorData> {
    if fp32 {
        model.set_dtype(DType::F32);

        // With an efficient-attention decoder these modules stay stable at
        // the prior precision, which saves a large share of the upcast.
        if model.supports_efficient_attention() {
            let submodules = model.submodule_precision_mut();
            submodules.post_quant_conv = orig_dtype;
            submodules.decoder_conv_in = orig_dtype;
            submodules.decoder_mid_block = orig_dtype;
        }
    } else {
        model.set_dtype(DType::F16);
    }

    model.set_tiling(tiled);

    // The pixel tensor follows the model's precision; device residency is
    // the session's concern.
    let pixels = pixels.clone().to_dtype(model.dtype());
    let latents = model.encode_pixels(&pixels, rng)?;

    let latents = latents.scale(model.scaling_factor());
    Ok(latents.to_dtype(orig_dtype))
}
