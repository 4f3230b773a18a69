//! Rendition choice for a source record.
//!
//! Three thresholds are involved and must stay distinct:
//! - `min_original_long_side` gates the whole record: at least one rendition
//!   must be this large, otherwise the work is only available as a small image.
//! - `min_variant_long_side` gates each downloadable rendition.
//! - `target_width` picks the cheapest rendition that is still wide enough.
//!
//! A record can pass the first gate (large original) and still be rejected
//! because no offered rendition clears the second.

use serde::{Deserialize, Serialize};

use crate::fetch::normalize_mime;
use crate::source::ImageVariant;

/// Quality thresholds, shared with the post-download dimension check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantThresholds {
    #[serde(default = "default_min_variant")]
    pub min_variant_long_side: u32,
    #[serde(default = "default_min_original")]
    pub min_original_long_side: u32,
    #[serde(default = "default_target_width")]
    pub target_width: u32,
    /// Vector and animated formats are never accepted.
    #[serde(default = "default_excluded_mime_types")]
    pub excluded_mime_types: Vec<String>,
}

fn default_min_variant() -> u32 {
    1280
}

fn default_min_original() -> u32 {
    1800
}

fn default_target_width() -> u32 {
    1280
}

fn default_excluded_mime_types() -> Vec<String> {
    vec!["image/svg+xml".to_string(), "image/gif".to_string()]
}

impl Default for VariantThresholds {
    fn default() -> Self {
        Self {
            min_variant_long_side: default_min_variant(),
            min_original_long_side: default_min_original(),
            target_width: default_target_width(),
            excluded_mime_types: default_excluded_mime_types(),
        }
    }
}

impl VariantThresholds {
    pub fn is_excluded(&self, mime: &str) -> bool {
        let mime = normalize_mime(mime);
        self.excluded_mime_types
            .iter()
            .any(|excluded| normalize_mime(excluded) == mime)
    }

    /// Whether actual image dimensions clear the per-variant floor.
    pub fn accepts_dimensions(&self, width: u32, height: u32) -> bool {
        width.max(height) >= self.min_variant_long_side
    }
}

/// Pick the rendition to download, or `None` if the record does not qualify.
pub fn select_variant<'a>(
    variants: &'a [ImageVariant],
    thresholds: &VariantThresholds,
) -> Option<&'a ImageVariant> {
    let has_original_quality = variants
        .iter()
        .any(|v| v.long_side() >= thresholds.min_original_long_side);
    if !has_original_quality {
        return None;
    }

    let candidates: Vec<&ImageVariant> = variants
        .iter()
        .filter(|v| v.long_side() >= thresholds.min_variant_long_side)
        .filter(|v| !thresholds.is_excluded(&v.mime))
        .collect();

    candidates
        .iter()
        .filter(|v| v.width >= thresholds.target_width)
        .min_by_key(|v| (v.width as u64) * (v.height as u64))
        .or_else(|| candidates.first())
        .copied()
}
