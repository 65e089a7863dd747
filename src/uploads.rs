//! Image upload storage.
//!
//! Uploaded pictures are validated (`image/*`, at most [`MAX_UPLOAD_BYTES`]),
//! written under the upload directory with a UUID file name, and handed back
//! as a data URL together with a fresh placeholder key. The caller inserts
//! `![name](key)` into the document and keeps `key → url` in its
//! [`PlaceholderMap`] until render time.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::UploadError;
use crate::pipeline::placeholder::{markdown_reference, PlaceholderMap};

/// 5 MiB.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// A stored upload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredImage {
    /// `data:<mime>;base64,...` of the uploaded bytes.
    pub url: String,
    /// Placeholder key to reference the image from markdown.
    pub key: String,
    /// File name under the upload directory.
    #[serde(skip)]
    pub file_name: String,
    #[serde(skip)]
    pub content_type: String,
}

impl StoredImage {
    /// `![alt](key)`, ready to insert into the document.
    pub fn markdown(&self, alt: &str) -> String {
        markdown_reference(alt, &self.key)
    }
}

/// Filesystem-backed upload directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_bytes: MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and persist one uploaded file.
    ///
    /// `content_type` is the MIME type the client declared; when it is
    /// missing the type is guessed from `original_name`.
    pub async fn store(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredImage, UploadError> {
        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(original_name).to_string());

        validate(&content_type, bytes.len(), self.max_bytes)?;

        let file_name = stored_file_name(original_name);
        fs::create_dir_all(&self.root)
            .await
            .map_err(UploadError::Storage)?;
        fs::write(self.root.join(&file_name), bytes)
            .await
            .map_err(UploadError::Storage)?;

        info!(
            file = %file_name,
            size = bytes.len(),
            content_type = %content_type,
            "Stored upload"
        );

        let url = data_url(&content_type, bytes);
        Ok(StoredImage {
            url,
            key: PlaceholderMap::generate_key(),
            file_name,
            content_type,
        })
    }

    /// Remove a stored file. Missing files count as removed.
    pub async fn delete(&self, file_name: &str) -> Result<(), UploadError> {
        let relative = Path::new(file_name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(UploadError::Storage(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid stored file name '{file_name}'"),
            )));
        }
        match fs::remove_file(self.root.join(relative)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Upload {} already gone", file_name);
                Ok(())
            }
            Err(e) => Err(UploadError::Storage(e)),
        }
    }
}

/// Reject anything that is not an image or exceeds `max_bytes`.
pub fn validate(content_type: &str, size: usize, max_bytes: usize) -> Result<(), UploadError> {
    if !content_type.starts_with("image/") {
        return Err(UploadError::NotAnImage {
            content_type: content_type.to_string(),
        });
    }
    if size > max_bytes {
        return Err(UploadError::TooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(())
}

/// `<uuid>.<ext>`, keeping the client's extension when it has a sane one.
fn stored_file_name(original_name: &str) -> String {
    let id = Uuid::new_v4();
    let extension = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// MIME type from the file extension, for clients that send none.
fn guess_content_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn data_url(content_type: &str, bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    format!("data:{};base64,{}", content_type, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::placeholder::find_unresolved;

    #[test]
    fn rejects_non_images() {
        let err = validate("application/pdf", 10, MAX_UPLOAD_BYTES).unwrap_err();
        assert!(matches!(err, UploadError::NotAnImage { .. }));
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(validate("image/png", MAX_UPLOAD_BYTES, MAX_UPLOAD_BYTES).is_ok());
        let err = validate("image/png", MAX_UPLOAD_BYTES + 1, MAX_UPLOAD_BYTES).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { max: 5_242_880, .. }));
    }

    #[test]
    fn stored_names_are_unique_and_keep_extension() {
        let a = stored_file_name("Holiday Photo.JPG");
        let b = stored_file_name("Holiday Photo.JPG");
        assert_ne!(a, b);
        assert!(a.ends_with(".jpg"));
        assert!(!stored_file_name("noext").contains('.'));
        assert!(!stored_file_name("x.p/ng").contains('/'));
    }

    #[tokio::test]
    async fn store_writes_file_and_returns_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));

        let stored = store.store("cat.png", Some("image/png"), b"\x89PNG").await.unwrap();
        assert!(stored.url.starts_with("data:image/png;base64,"));
        assert!(stored.key.starts_with("image-"));

        let on_disk = std::fs::read(store.root().join(&stored.file_name)).unwrap();
        assert_eq!(on_disk, b"\x89PNG");

        let mut map = PlaceholderMap::new();
        map.insert(stored.key.clone(), stored.url.clone());
        let md = map.substitute(&stored.markdown("cat"));
        assert!(find_unresolved(&md).is_none());
        assert!(md.contains("data:image/png;base64,"));

        store.delete(&stored.file_name).await.unwrap();
        store.delete(&stored.file_name).await.unwrap();
        assert!(store.delete("../escape.png").await.is_err());
    }

    #[tokio::test]
    async fn missing_content_type_is_guessed_from_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());
        let stored = store.store("a.webp", None, b"RIFF").await.unwrap();
        assert_eq!(stored.content_type, "image/webp");

        let err = store.store("notes.txt", None, b"hi").await.unwrap_err();
        assert!(matches!(err, UploadError::NotAnImage { .. }));
    }

    #[tokio::test]
    async fn oversized_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("u")).with_max_bytes(4);
        let err = store.store("a.png", Some("image/png"), b"12345").await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { size: 5, max: 4 }));
        assert!(!dir.path().join("u").exists());
    }
}
