//! Keyed image storage backing the pipeline's image references.

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::error::{Error, Result};

/// Resolves stable string keys to pixel data. Images are immutable once
/// stored; keys map to PNG files under the store root.
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
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

    /// Resolve a key to its stored image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageNotFound`] for unknown keys, or a load error if
    /// the backing file is unreadable.
    pub fn get(&self, key: &str) -> Result<DynamicImage> {
        let path = self.path_of(key);
        if !path.exists() {
            return Err(Error::ImageNotFound {
                key: key.to_string(),
            });
        }

        image::open(&path).map_err(|source| Error::ImageLoad { path, source })
    }

    /// Store an image under the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be written.
    pub fn put(&self, key: &str, img: &DynamicImage) -> Result<()> {
        let path = self.path_of(key);
        img.save(&path).map_err(|source| Error::ImageStore {
            key: key.to_string(),
            source,
        })?;
        Ok(())
    }

    /// Copy an external image file into the store, keyed by its file stem.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read as an image or written
    /// into the store.
    pub fn ingest(&self, path: &Path) -> Result<String> {
        let img = image::open(path).map_err(|source| Error::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        self.put(&key, &img)?;
        Ok(key)
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> ImageStore {
        let dir = std::env::temp_dir()
            .join("latentforge-tests")
            .join(format!("{}-images-{tag}", std::process::id()));
        ImageStore::new(dir).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = temp_store("roundtrip");
        let img = DynamicImage::new_rgb8(32, 24);
        store.put("cat", &img).unwrap();

        let loaded = store.get("cat").unwrap();
        assert_eq!(loaded.width(), 32);
        assert_eq!(loaded.height(), 24);
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let store = temp_store("missing");
        assert!(matches!(
            store.get("nope"),
            Err(Error::ImageNotFound { .. })
        ));
    }
}
