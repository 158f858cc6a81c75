use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::classify::{self, Classification, Encoding};

/// Names under which handlers cache partial parses on an [`Item`].
///
/// Each handler owns its own keys; a handler never reads another
/// handler's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKey {
    PsSessionDocument,
    AlvMembers,
    PdfPages,
    TextDelimiter,
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A cached derived artifact.
#[derive(Debug, Clone)]
pub enum Feature {
    Json(serde_json::Value),
    Pages(Vec<String>),
    Members(Vec<Item>),
    /// `None` means "split on runs of whitespace".
    Delimiter(Option<char>),
}

impl Feature {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Feature::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pages(&self) -> Option<&[String]> {
        match self {
            Feature::Pages(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_members(&self) -> Option<&[Item]> {
        match self {
            Feature::Members(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_delimiter(&self) -> Option<Option<char>> {
        match self {
            Feature::Delimiter(d) => Some(*d),
            _ => None,
        }
    }
}

/// Features staged by one handler's `check`.  They only reach the item once
/// the handler has actually matched.
#[derive(Debug, Default)]
pub struct FeatureSet(HashMap<FeatureKey, Feature>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: FeatureKey, feature: Feature) {
        self.0.insert(key, feature);
    }

    pub fn get(&self, key: FeatureKey) -> Option<&Feature> {
        self.0.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("{key} is no feature of {name}")]
    UnknownFeature { key: FeatureKey, name: String },
    #[error("feature {key} of {name} holds an unexpected payload")]
    FeatureMismatch { key: FeatureKey, name: String },
}

/// One uploaded file or archive member.  The bytes never change; MIME type,
/// encoding and text view are computed on first access.
#[derive(Clone)]
pub struct Item {
    bytes: Arc<[u8]>,
    name: String,
    path: String,
    content_type: String,
    classified: OnceCell<(Classification, Option<String>)>,
    features: RefCell<HashMap<FeatureKey, Arc<Feature>>>,
}

impl Item {
    /// Build an item from an upload.  `filename` may carry directories; they
    /// end up in [`Item::path`].
    pub fn new(bytes: impl Into<Arc<[u8]>>, filename: &str, content_type: &str) -> Self {
        let p = Path::new(filename);
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        let path = p
            .parent()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::member(bytes, &name, &path, content_type)
    }

    /// Build an item whose origin inside a container is `path`.
    pub fn member(bytes: impl Into<Arc<[u8]>>, name: &str, path: &str, content_type: &str) -> Self {
        Self {
            bytes: bytes.into(),
            name: name.to_string(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            classified: OnceCell::new(),
            features: RefCell::new(HashMap::new()),
        }
    }

    /// Same bytes and identity, different origin path.  Features are not
    /// carried over.
    pub fn with_path(&self, path: &str) -> Self {
        Self::member(Arc::clone(&self.bytes), &self.name, path, &self.content_type)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `path/name`, or just the name for top-level uploads.
    pub fn display_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// Content type declared by whoever handed us the bytes.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Lower-cased last extension including the dot, e.g. `.uxd`.
    pub fn suffix(&self) -> String {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }

    fn classified(&self) -> &(Classification, Option<String>) {
        self.classified
            .get_or_init(|| classify::classify_with_text(&self.bytes, &self.name))
    }

    pub fn classification(&self) -> &Classification {
        &self.classified().0
    }

    pub fn mime_type(&self) -> &str {
        &self.classification().mime_type
    }

    pub fn encoding(&self) -> Encoding {
        self.classification().encoding
    }

    /// Decoded text; `None` for binary items.
    pub fn text(&self) -> Option<&str> {
        self.classified().1.as_deref()
    }

    pub fn is_container(&self) -> bool {
        classify::is_container(&self.name)
    }

    pub fn feature(&self, key: FeatureKey) -> Result<Arc<Feature>, ItemError> {
        self.features
            .borrow()
            .get(&key)
            .cloned()
            .ok_or_else(|| ItemError::UnknownFeature { key, name: self.name.clone() })
    }

    pub fn has_feature(&self, key: FeatureKey) -> bool {
        self.features.borrow().contains_key(&key)
    }

    /// Merge features staged by a matching handler.
    pub fn attach(&self, staged: FeatureSet) {
        let mut features = self.features.borrow_mut();
        for (key, feature) in staged.0 {
            features.insert(key, Arc::new(feature));
        }
    }

    pub fn mismatch(&self, key: FeatureKey) -> ItemError {
        ItemError::FeatureMismatch { key, name: self.name.clone() }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
