//! Image placeholders: short keys standing in for uploaded images.
//!
//! An author inserts `![name](image-<uuid>)` while the upload is held
//! elsewhere; before rendering, every occurrence of every key is replaced by
//! the image's URL (usually a data URL or a `/uploads/...` path).

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of every generated key.
pub const KEY_PREFIX: &str = "image-";

static GENERATED_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"image-[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid regex")
});

/// `key → payload` map for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceholderMap {
    entries: BTreeMap<String, String>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, collision-resistant key: `image-<uuid v4>`.
    pub fn generate_key() -> String {
        format!("{KEY_PREFIX}{}", Uuid::new_v4())
    }

    /// Store `payload` under a new key and return the key.
    pub fn register(&mut self, payload: impl Into<String>) -> String {
        let key = Self::generate_key();
        self.entries.insert(key.clone(), payload.into());
        key
    }

    pub fn insert(&mut self, key: impl Into<String>, payload: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), payload.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace every occurrence of every key in `text`.
    ///
    /// Longer keys go first so a key that is a prefix of another cannot
    /// clobber it.
    pub fn substitute(&self, text: &str) -> String {
        let mut keys: Vec<&String> = self.entries.keys().filter(|k| !k.is_empty()).collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));

        let mut out = text.to_string();
        for key in keys {
            if out.contains(key.as_str()) {
                out = out.replace(key.as_str(), &self.entries[key]);
            }
        }
        out
    }
}

impl FromIterator<(String, String)> for PlaceholderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// The first generated-looking key still present in `text`, if any.
pub fn find_unresolved(text: &str) -> Option<String> {
    GENERATED_KEY_RE.find(text).map(|m| m.as_str().to_string())
}

/// Markdown image reference for a placeholder key.
pub fn markdown_reference(name: &str, key: &str) -> String {
    format!("![{name}]({key})")
}
