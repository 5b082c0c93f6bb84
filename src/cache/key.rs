//! Normalized render cache keys
//!
//! Width and device-pixel-ratio are snapped to a small set of tiers so that
//! clients asking for nearly identical renders share cache entries. The file
//! modification time is part of the key, so a replaced document never serves
//! an old render.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::render::{ImageFormat, RenderParams};

/// Width tiers in CSS pixels
pub const WIDTH_TIERS: [u32; 4] = [720, 1080, 1440, 2160];

/// Device pixel ratio tiers
pub const DPR_TIERS: [f32; 4] = [1.0, 1.5, 2.0, 3.0];

/// Snap a requested width to the smallest tier that covers it
pub fn snap_width(width: u32) -> u32 {
    WIDTH_TIERS
        .iter()
        .copied()
        .find(|tier| *tier >= width)
        .unwrap_or(WIDTH_TIERS[WIDTH_TIERS.len() - 1])
}

/// Snap a requested dpr to the smallest tier that covers it
pub fn snap_dpr(dpr: f32) -> f32 {
    DPR_TIERS
        .iter()
        .copied()
        .find(|tier| *tier >= dpr - f32::EPSILON)
        .unwrap_or(DPR_TIERS[DPR_TIERS.len() - 1])
}

/// Normalize rotation to 0, 90, 180 or 270
pub fn normalize_rotation(degrees: i64) -> u16 {
    let quarter_turns = ((degrees as f64) / 90.0).round() as i64;
    (quarter_turns.rem_euclid(4) * 90) as u16
}

/// Cache key for a rendered page
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RenderKey {
    pub path: Arc<PathBuf>,
    pub page: usize,
    /// Snapped width tier
    pub width: u32,
    /// Snapped dpr tier, in thousandths
    pub dpr_milli: u32,
    pub rotation: u16,
    pub format: ImageFormat,
    /// Source mtime in nanoseconds since the epoch
    pub mtime_nanos: u64,
}

impl RenderKey {
    /// Build a normalized key; width/dpr are snapped and rotation folded
    pub fn new(
        path: impl Into<PathBuf>,
        page: usize,
        width: u32,
        dpr: f32,
        rotation: i64,
        format: ImageFormat,
        modified: Option<SystemTime>,
    ) -> Self {
        Self {
            path: Arc::new(path.into()),
            page,
            width: snap_width(width),
            dpr_milli: (snap_dpr(dpr) * 1000.0).round() as u32,
            rotation: normalize_rotation(rotation),
            format,
            mtime_nanos: modified.map(mtime_nanos).unwrap_or(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dpr(&self) -> f32 {
        self.dpr_milli as f32 / 1000.0
    }

    /// Backend parameters this key stands for
    pub fn params(&self) -> RenderParams {
        RenderParams {
            page: self.page,
            width: self.width,
            dpr: self.dpr(),
            rotation: self.rotation,
            format: self.format,
        }
    }

    /// SHA-256 over every key field, hex encoded
    ///
    /// Fields are length-prefixed so two distinct keys never produce the
    /// same byte stream.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let path_bytes = self.path.as_os_str().as_encoded_bytes();
        hasher.update((path_bytes.len() as u64).to_le_bytes());
        hasher.update(path_bytes);
        hasher.update((self.page as u64).to_le_bytes());
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.dpr_milli.to_le_bytes());
        hasher.update(self.rotation.to_le_bytes());
        hasher.update(self.format.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.mtime_nanos.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Quoted strong ETag derived from the digest
    pub fn etag(&self) -> String {
        format!("\"{}\"", &self.digest()[..32])
    }
}

/// Stable per-document directory name for the disk tier
pub fn document_digest(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn mtime_nanos(modified: SystemTime) -> u64 {
    modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(width: u32, dpr: f32, modified: Option<SystemTime>) -> RenderKey {
        RenderKey::new("/docs/a.pdf", 3, width, dpr, 0, ImageFormat::Png, modified)
    }

    #[test]
    fn test_snap_width() {
        assert_eq!(snap_width(1), 720);
        assert_eq!(snap_width(720), 720);
        assert_eq!(snap_width(1200), 1440);
        assert_eq!(snap_width(2000), 2160);
        assert_eq!(snap_width(4000), 2160);
    }

    #[test]
    fn test_snap_dpr() {
        assert_eq!(snap_dpr(0.5), 1.0);
        assert_eq!(snap_dpr(1.0), 1.0);
        assert_eq!(snap_dpr(1.25), 1.5);
        assert_eq!(snap_dpr(2.0), 2.0);
        assert_eq!(snap_dpr(5.0), 3.0);
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0), 0);
        assert_eq!(normalize_rotation(90), 90);
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(100), 90);
    }

    #[test]
    fn test_nearby_requests_share_a_key() {
        let a = key(1100, 1.2, None);
        let b = key(1400, 1.5, None);
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_mtime_changes_digest() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let t1 = t0 + Duration::from_millis(1);
        let a = key(1080, 1.0, Some(t0));
        let b = key(1080, 1.0, Some(t1));
        assert_ne!(a, b);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_distinct_fields_give_distinct_digests() {
        let base = key(1080, 1.0, None);
        let other_page = RenderKey::new("/docs/a.pdf", 4, 1080, 1.0, 0, ImageFormat::Png, None);
        let other_format = RenderKey::new("/docs/a.pdf", 3, 1080, 1.0, 0, ImageFormat::Webp, None);
        let other_path = RenderKey::new("/docs/b.pdf", 3, 1080, 1.0, 0, ImageFormat::Png, None);
        assert_ne!(base.digest(), other_page.digest());
        assert_ne!(base.digest(), other_format.digest());
        assert_ne!(base.digest(), other_path.digest());
        assert_eq!(base.digest().len(), 64);
    }

    #[test]
    fn test_params_round_trip_tiers() {
        let k = RenderKey::new("/docs/a.pdf", 0, 1000, 1.7, 180, ImageFormat::Jpeg, None);
        let params = k.params();
        assert_eq!(params.width, 1080);
        assert_eq!(params.dpr, 2.0);
        assert_eq!(params.rotation, 180);
    }
}
