//! Model package downloading and caching.
//!
//! A VAE package is a directory of files published under our export
//! convention: `config.json` with the package metadata, `encoder.fp32.onnx`,
//! and optionally `encoder.fp16.onnx` when the export tool also emitted a
//! half-precision graph.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Error, Result};
use crate::model::loader::VaeRef;
use crate::tensor::DType;

/// Package metadata file.
pub const CONFIG_FILE: &str = "config.json";

/// Encoder graph filename for a given precision.
#[must_use]
pub const fn encoder_filename(dtype: DType) -> &'static str {
    match dtype {
        DType::F16 => "encoder.fp16.onnx",
        DType::F32 => "encoder.fp32.onnx",
    }
}

/// Approximate download size for progress indication when the server does
/// not report a content length.
fn approx_size(file: &str) -> u64 {
    match file {
        "config.json" => 4_096,
        "encoder.fp16.onnx" => 70_000_000, // ~70 MB
        _ => 140_000_000,                  // ~140 MB
    }
}

/// Local paths of a package's encoder graphs after fetching.
#[derive(Debug, Clone)]
pub struct EncoderFiles {
    pub fp32: PathBuf,
    pub fp16: Option<PathBuf>,
}

/// Manages the model cache directory and downloads.
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache under the platform cache directory:
    /// - Windows: `%LOCALAPPDATA%\latentforge\models`
    /// - Linux: `~/.cache/latentforge/models`
    /// - macOS: `~/Library/Caches/latentforge/models`
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new() -> Result<Self> {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_dir(base.join("latentforge").join("models"))
    }

    /// Create a cache rooted at an explicit directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_dir<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let cache_dir = dir.into();
        fs::create_dir_all(&cache_dir).map_err(|source| Error::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;
        Ok(Self { cache_dir })
    }

    /// Fetch and parse a package's config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be fetched or parsed.
    pub fn load_config(&self, vae: &VaeRef) -> Result<super::VaeConfig> {
        let path = self.fetch(vae, CONFIG_FILE)?;
        let json = fs::read_to_string(&path)?;
        super::VaeConfig::parse(&vae.display_name(), &json)
    }

    /// Fetch the package's encoder graphs. The half-precision graph is only
    /// fetched when the package declares one.
    ///
    /// # Errors
    ///
    /// Returns an error if a required file cannot be fetched.
    pub fn encoder_files(&self, vae: &VaeRef, has_fp16: bool) -> Result<EncoderFiles> {
        let fp32 = self.fetch(vae, encoder_filename(DType::F32))?;
        let fp16 = if has_fp16 {
            Some(self.fetch(vae, encoder_filename(DType::F16))?)
        } else {
            None
        };
        Ok(EncoderFiles { fp32, fp16 })
    }

    /// Local path for one package file, downloading it on first use.
    fn fetch(&self, vae: &VaeRef, file: &str) -> Result<PathBuf> {
        let dir = self.package_dir(vae);
        fs::create_dir_all(&dir).map_err(|source| Error::CacheDir {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(file);
        if !path.exists() {
            download_file(&vae.file_url(file), &path, file, approx_size(file))?;
        }
        Ok(path)
    }

    /// Directory holding one package's cached files.
    #[must_use]
    pub fn package_dir(&self, vae: &VaeRef) -> PathBuf {
        let mut dir = self.cache_dir.join(vae.repo().replace('/', "--"));
        if let Some(subfolder) = vae.subfolder() {
            dir = dir.join(subfolder);
        }
        dir
    }
}

/// Download a file from a URL to a path with progress indication.
#[allow(clippy::cast_possible_truncation)]
fn download_file(url: &str, path: &Path, name: &str, approx_size: u64) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| Error::ModelDownload {
            name: name.to_string(),
            source,
        })?;

    let total_size = response.content_length().unwrap_or(approx_size);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {name}"));

    // Write to a temporary file first, then rename for atomicity
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;

    let mut downloaded = 0u64;
    let mut reader = response;

    loop {
        let mut buffer = [0u8; 8192];
        let bytes_read = std::io::Read::read(&mut reader, &mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        pb.set_position(downloaded);
    }

    pb.finish_with_message(format!("Downloaded {name}"));

    // Atomic rename
    fs::rename(&temp_path, path)?;

    Ok(())
}
