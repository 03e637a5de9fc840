//! Filesystem media store with content-addressed names.
//!
//! A URL always maps to the same local path (sha256 of the URL plus its
//! extension), so downloads are idempotent and media references stay stable
//! across reprocessing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::PortError;
use crate::traits::MediaStore;

pub struct FsMediaStore {
    client: reqwest::Client,
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            root: root.into(),
        }
    }

    /// The local path a URL maps to, whether or not it has been fetched.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        cache_path(&self.root, url)
    }
}

/// `<root>/<sha256(url)><ext>`, extension taken from the URL path (query
/// stripped), lowercased, alphanumeric extensions only.
pub fn cache_path(root: &Path, url: &str) -> PathBuf {
    let digest = Sha256::digest(url.as_bytes());
    let mut name = format!("{digest:x}");
    if let Some(ext) = url_extension(url) {
        name.push('.');
        name.push_str(&ext);
    }
    root.join(name)
}

fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

/// Whether a media path looks like a still image (vision-describable).
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            matches!(
                e.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp"
            )
        })
        .unwrap_or(false)
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn download(&self, url: &str) -> Result<PathBuf, PortError> {
        let target = self.cache_path(url);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(url, path = %target.display(), "media cache hit");
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.root).await?;

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Api { status, body });
        }
        let bytes = response.bytes().await?;

        // Write-then-rename so a crashed download never leaves a partial
        // file at the content address.
        let tmp = target.with_extension("part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        debug!(url, path = %target.display(), size = bytes.len(), "media downloaded");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_url_same_path() {
        let root = Path::new("/media");
        let a = cache_path(root, "https://cdn.example.com/img/photo.jpg");
        let b = cache_path(root, "https://cdn.example.com/img/photo.jpg");
        assert_eq!(a, b);
        assert!(a.to_string_lossy().ends_with(".jpg"));
    }

    #[test]
    fn different_urls_different_paths() {
        let root = Path::new("/media");
        let a = cache_path(root, "https://example.com/a.png");
        let b = cache_path(root, "https://example.com/b.png");
        assert_ne!(a, b);
    }

    #[test]
    fn query_strings_do_not_leak_into_extension() {
        let root = Path::new("/media");
        let path = cache_path(root, "https://example.com/video.mp4?token=abc.def");
        assert!(path.to_string_lossy().ends_with(".mp4"));

        let no_ext = cache_path(root, "https://example.com/binary");
        assert!(no_ext.extension().is_none());
    }

    #[test]
    fn image_detection() {
        assert!(is_image_path(Path::new("/m/a.jpg")));
        assert!(is_image_path(Path::new("/m/a.PNG")));
        assert!(is_image_path(Path::new("/m/a.png")));
        assert!(!is_image_path(Path::new("/m/a.mp4")));
        assert!(!is_image_path(Path::new("/m/noext")));
    }

    #[tokio::test]
    async fn existing_file_short_circuits_network() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());
        let url = "https://unreachable.invalid/image.png";

        // Pre-seed the content address; download must return it untouched
        // without any network access.
        let target = store.cache_path(url);
        tokio::fs::write(&target, b"cached bytes").await.unwrap();

        let got = store.download(url).await.unwrap();
        assert_eq!(got, target);
        assert_eq!(tokio::fs::read(&got).await.unwrap(), b"cached bytes");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transient_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path());
        let err = store
            .download("http://unreachable.invalid/image.png")
            .await
            .unwrap_err();
        assert_eq!(err.classify(), magpie_core::error::ErrorClass::Transient);
    }
}
