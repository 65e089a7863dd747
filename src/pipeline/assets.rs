//! Image resolution without network round-trips.
//!
//! While a page loads, the engine asks an [`AssetResolver`] for every image
//! request. `data:` URIs are decoded in-process; local-storage paths are read
//! from disk; anything else is left to the engine.
//!
//! Root-relative paths (`/uploads/a.png`) have no origin inside a document
//! loaded from a string, so the page document gets a `<base href>` pointing
//! at [`ASSET_BASE`]. Requests to that synthetic origin always come back
//! here and are never sent on the network.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};
use url::Url;

use crate::error::AssetError;

/// Synthetic origin that root-relative image paths resolve against.
pub const ASSET_ORIGIN: &str = "http://carousel.assets";

/// `<base href>` value injected into every page document.
pub const ASSET_BASE: &str = "http://carousel.assets/";

const DATA_URL_PREFIX: &str = "data:";
const DEFAULT_MEDIA_TYPE: &str = "text/plain";

/// Image bytes ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// What the engine should do with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetResolution {
    /// Answer the request with these bytes.
    Resolved(Asset),
    /// Not ours: let the engine load it normally.
    Passthrough,
    /// Ours, but unavailable: fail the request. The page still renders,
    /// just without this image.
    Failed(AssetError),
}

/// Supplies image bytes for URLs referenced by a page.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> AssetResolution;
}

/// Resolves `data:` URIs and local-storage paths under a root directory.
#[derive(Debug, Clone)]
pub struct LocalAssetResolver {
    root: PathBuf,
    prefix: String,
}

impl LocalAssetResolver {
    /// `prefix` is the URL path that marks local storage, e.g. `/uploads/`.
    /// A path `/uploads/a.png` is read from `<root>/uploads/a.png`.
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_local(&self, path: &str) -> AssetResolution {
        if !path.starts_with(&self.prefix) {
            return AssetResolution::Failed(AssetError::NotFound {
                path: path.to_string(),
            });
        }

        let Some(relative) = confined_relative_path(path) else {
            return AssetResolution::Failed(AssetError::OutsideRoot {
                path: path.to_string(),
            });
        };
        let file = self.root.join(relative);

        match tokio::fs::read(&file).await {
            Ok(bytes) => {
                debug!(path, bytes = bytes.len(), "Resolved local asset");
                AssetResolution::Resolved(Asset {
                    content_type: content_type_for(path).to_string(),
                    bytes,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                AssetResolution::Failed(AssetError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => AssetResolution::Failed(AssetError::Read {
                path: path.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl AssetResolver for LocalAssetResolver {
    async fn resolve(&self, url: &str) -> AssetResolution {
        let resolution = if url.starts_with(DATA_URL_PREFIX) {
            match decode_data_uri(url) {
                Ok(asset) => AssetResolution::Resolved(asset),
                Err(e) => AssetResolution::Failed(e),
            }
        } else if url.starts_with(ASSET_ORIGIN) {
            match origin_path(url) {
                Some(path) => self.read_local(&path).await,
                None => AssetResolution::Failed(AssetError::NotFound {
                    path: url.to_string(),
                }),
            }
        } else if url.starts_with(&self.prefix) {
            let raw = url.split(['?', '#']).next().unwrap_or(url);
            match percent_decode(raw).map(|b| String::from_utf8_lossy(&b).into_owned()) {
                Ok(path) => self.read_local(&path).await,
                Err(e) => AssetResolution::Failed(e),
            }
        } else {
            AssetResolution::Passthrough
        };

        if let AssetResolution::Failed(ref e) = resolution {
            warn!("Image left out of page: {e}");
        }
        resolution
    }
}

/// Content type by file extension; unknown extensions are treated as JPEG.
pub fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        // .jpg, .jpeg and anything unrecognised
        "image/jpeg"
    }
}

/// Decode a `data:` URI, base64 or percent-encoded.
pub fn decode_data_uri(url: &str) -> Result<Asset, AssetError> {
    let rest = url
        .strip_prefix(DATA_URL_PREFIX)
        .ok_or_else(|| AssetError::MalformedDataUri("missing 'data:' prefix".into()))?;
    let (metadata, data) = rest
        .split_once(',')
        .ok_or_else(|| AssetError::MalformedDataUri("missing comma".into()))?;

    let mut parts = metadata.split(';');
    let media_type = parts.next().unwrap_or("").trim();
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let cleaned: Vec<u8> = data.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        STANDARD
            .decode(cleaned)
            .map_err(|e| AssetError::MalformedDataUri(format!("invalid base64: {e}")))?
    } else {
        percent_decode(data)?
    };

    let content_type = if media_type.is_empty() {
        DEFAULT_MEDIA_TYPE
    } else {
        media_type
    };
    Ok(Asset {
        content_type: content_type.to_string(),
        bytes,
    })
}

/// Decoded path component of a URL on the asset origin.
fn origin_path(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let decoded = percent_decode(parsed.path()).ok()?;
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// `/uploads/a.png` → `uploads/a.png`; `None` when the path would leave
/// the root.
fn confined_relative_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Percent-decode without treating `+` specially.
fn percent_decode(input: &str) -> Result<Vec<u8>, AssetError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| AssetError::MalformedDataUri("invalid percent-escape".into()))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}
