use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An imported image together with its transport-ready encoded form.
///
/// The base64 payload and media type are derived from the same bytes
/// at import time and never change afterwards; removing an asset is
/// the only mutation the sets below allow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub id: String,
    pub label: String,
    pub source_path: PathBuf,
    pub data: String,
    pub mime_type: String,
}

impl ImageAsset {
    pub fn new(
        label: impl Into<String>,
        source_path: impl Into<PathBuf>,
        data: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            source_path: source_path.into(),
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Ordered scene reference images, cycled round-robin across the
/// shots of each target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneReferenceSet(Vec<ImageAsset>);

impl SceneReferenceSet {
    pub fn new(assets: Vec<ImageAsset>) -> Self {
        Self(assets)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scene reference for a given shot index, wrapping around when
    /// the shot count exceeds the set size. `None` only when the set
    /// is empty.
    pub fn for_shot(&self, shot_index: u32) -> Option<&ImageAsset> {
        if self.0.is_empty() {
            return None;
        }
        self.0.get(shot_index as usize % self.0.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageAsset> {
        self.0.iter()
    }
}

/// Ordered garment images; processing order is declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSet(Vec<ImageAsset>);

impl TargetSet {
    pub fn new(assets: Vec<ImageAsset>) -> Self {
        Self(assets)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ImageAsset> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageAsset> {
        self.0.iter()
    }
}
