//! Model package metadata parsed from each package's `config.json`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::image::LATENT_SCALE_FACTOR;

/// Attention processor implementations whose decoder blocks stay numerically
/// stable at reduced precision. Membership is checked by tag so new
/// equivalent implementations can be added over time.
pub const EFFICIENT_ATTENTION_PROCESSORS: &[&str] = &[
    "AttnProcessor2_0",
    "XFormersAttnProcessor",
    "LoRAXFormersAttnProcessor",
    "LoRAAttnProcessor2_0",
];

/// VAE classes with a registered encode strategy.
///
/// The set is closed: packages declaring any other class load far enough to
/// report what they are, then fail at encode dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaeArchitecture {
    /// Standard KL autoencoder. The encoder emits distribution moments;
    /// latents are sampled at encode time.
    AutoencoderKl,
    /// Distilled tiny autoencoder. The encoder emits latents directly.
    AutoencoderTiny,
    /// Anything else.
    Other(String),
}

impl VaeArchitecture {
    /// Map a package's declared class name onto the known variants.
    #[must_use]
    pub fn from_class_name(name: &str) -> Self {
        match name {
            "AutoencoderKL" => Self::AutoencoderKl,
            "AutoencoderTiny" => Self::AutoencoderTiny,
            other => Self::Other(other.to_string()),
        }
    }

    /// The declared class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        match self {
            Self::AutoencoderKl => "AutoencoderKL",
            Self::AutoencoderTiny => "AutoencoderTiny",
            Self::Other(name) => name,
        }
    }
}

/// Decoder-side metadata recorded by the export tool. The encode node never
/// runs the decoder, but its precision plan is mutated by the
/// high-precision path and feeds the weight-memory estimate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecoderMeta {
    /// Attention processor tag of the decoder mid block, when the exported
    /// decoder has one.
    #[serde(default)]
    pub mid_block_attention: Option<String>,
    /// Per-module parameter counts.
    #[serde(default)]
    pub parameter_counts: HashMap<String, u64>,
}

/// Parsed `config.json` of a VAE model package.
#[derive(Debug, Clone, Deserialize)]
pub struct VaeConfig {
    /// Declared model class, e.g. `AutoencoderKL`.
    #[serde(rename = "_class_name")]
    pub class_name: String,
    /// Fixed constant normalizing latents into the range downstream
    /// diffusion expects.
    pub scaling_factor: f32,
    /// Channels of a single latent sample.
    #[serde(default = "default_latent_channels")]
    pub latent_channels: usize,
    /// Largest sample edge the encoder takes in one pass; inputs beyond it
    /// are tiled when tiling is enabled.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Whether the package ships a half-precision encoder graph.
    #[serde(default)]
    pub fp16: bool,
    #[serde(default)]
    pub decoder: DecoderMeta,
}

const fn default_latent_channels() -> usize {
    4
}

const fn default_sample_size() -> usize {
    512
}

/// Tile geometry requires the sample edge to stay on the latent grid after
/// applying the 25% overlap, so the edge must divide by four grid cells.
const SAMPLE_SIZE_ALIGN: usize = LATENT_SCALE_FACTOR as usize * 4;

impl VaeConfig {
    /// Parse and validate a package config.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the sample size is off
    /// the tiling grid.
    pub fn parse(name: &str, json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|source| Error::ModelConfig {
            name: name.to_string(),
            source,
        })?;

        if config.sample_size == 0 || config.sample_size % SAMPLE_SIZE_ALIGN != 0 {
            return Err(Error::InvalidParameter {
                name: "sample_size".to_string(),
                reason: format!(
                    "must be a positive multiple of {SAMPLE_SIZE_ALIGN}, got {}",
                    config.sample_size
                ),
            });
        }

        Ok(config)
    }

    /// The architecture this package declares.
    #[must_use]
    pub fn architecture(&self) -> VaeArchitecture {
        VaeArchitecture::from_class_name(&self.class_name)
    }

    /// Whether the decoder's mid-block attention belongs to the
    /// efficient-attention family.
    #[must_use]
    pub fn supports_efficient_attention(&self) -> bool {
        self.decoder
            .mid_block_attention
            .as_deref()
            .is_some_and(|tag| EFFICIENT_ATTENTION_PROCESSORS.contains(&tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KL_CONFIG: &str = r#"{
        "_class_name": "AutoencoderKL",
        "scaling_factor": 0.18215,
        "latent_channels": 4,
        "sample_size": 512,
        "fp16": true,
        "decoder": {
            "mid_block_attention": "AttnProcessor2_0",
            "parameter_counts": {
                "encoder": 34163592,
                "post_quant_conv": 20,
                "decoder.conv_in": 18944,
                "decoder.mid_block": 2627076
            }
        }
    }"#;

    #[test]
    fn test_parse_kl_config() {
        let config = VaeConfig::parse("sd15", KL_CONFIG).unwrap();
        assert_eq!(config.architecture(), VaeArchitecture::AutoencoderKl);
        assert!((config.scaling_factor - 0.18215).abs() < 1e-6);
        assert_eq!(config.latent_channels, 4);
        assert!(config.fp16);
        assert!(config.supports_efficient_attention());
    }

    #[test]
    fn test_defaults_without_decoder_block() {
        let config =
            VaeConfig::parse("taesd", r#"{"_class_name": "AutoencoderTiny", "scaling_factor": 1.0}"#)
                .unwrap();
        assert_eq!(config.architecture(), VaeArchitecture::AutoencoderTiny);
        assert_eq!(config.sample_size, 512);
        assert!(!config.supports_efficient_attention());
    }

    #[test]
    fn test_unknown_class_maps_to_other() {
        let arch = VaeArchitecture::from_class_name("ConsistencyDecoderVAE");
        assert_eq!(arch, VaeArchitecture::Other("ConsistencyDecoderVAE".to_string()));
        assert_eq!(arch.class_name(), "ConsistencyDecoderVAE");
    }

    #[test]
    fn test_attention_allow_set() {
        for tag in ["AttnProcessor2_0", "XFormersAttnProcessor"] {
            assert!(EFFICIENT_ATTENTION_PROCESSORS.contains(&tag));
        }
        assert!(!EFFICIENT_ATTENTION_PROCESSORS.contains(&"AttnProcessor"));
    }

    #[test]
    fn test_misaligned_sample_size_rejected() {
        let json = r#"{"_class_name": "AutoencoderKL", "scaling_factor": 0.18215, "sample_size": 40}"#;
        assert!(matches!(
            VaeConfig::parse("bad", json),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
