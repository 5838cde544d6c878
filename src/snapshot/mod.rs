//! The snapshotter seam.
//!
//! A snapshotter takes a style document plus a viewport and produces a
//! bitmap. The runner never renders anything itself; it only drives a
//! `Snapshotter` implementation.

use image::RgbaImage;

use crate::{Error, Result};

#[cfg(feature = "raster")]
pub mod raster;

pub mod process;

#[cfg(feature = "raster")]
pub use raster::BackgroundSnapshotter;
pub use process::ProcessSnapshotter;

/// Largest bitmap, in bytes of RGBA8 data, a snapshot may allocate (512 MiB,
/// e.g. 16384 x 8192 device pixels).
pub const MAX_BITMAP_BYTES: u64 = 512 * 1024 * 1024;

/// Everything a snapshotter needs to render one fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotOptions {
    /// Logical width in points
    pub width: u32,
    /// Logical height in points
    pub height: u32,
    /// Device pixels per point
    pub pixel_ratio: f64,
    /// The raw style document
    pub style_json: String,
    /// Whether an attribution logo is drawn (always false for tests)
    pub show_logo: bool,
}

impl SnapshotOptions {
    /// Size of the produced bitmap in device pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            scale(self.width, self.pixel_ratio),
            scale(self.height, self.pixel_ratio),
        )
    }

    /// `pixel_size`, rejecting bitmaps larger than [`MAX_BITMAP_BYTES`].
    pub fn checked_pixel_size(&self) -> Result<(u32, u32)> {
        let (w, h) = self.pixel_size();
        let bytes = (w as u64).checked_mul(h as u64).and_then(|px| px.checked_mul(4));
        match bytes {
            Some(bytes) if bytes <= MAX_BITMAP_BYTES => Ok((w, h)),
            _ => Err(Error::Snapshot(format!(
                "bitmap of {}x{} pixels exceeds the {} byte limit",
                w, h, MAX_BITMAP_BYTES
            ))),
        }
    }
}

fn scale(points: u32, ratio: f64) -> u32 {
    let px = (points as f64 * ratio).round();
    if px < 1.0 {
        1
    } else if px >= u32::MAX as f64 {
        u32::MAX
    } else {
        px as u32
    }
}

/// Core trait for snapshotting backends.
///
/// Implementations are shared between dispatch worker threads, so they must
/// be `Send + Sync`; `snapshot` may be called concurrently.
pub trait Snapshotter: Send + Sync {
    /// Render one fixture to an RGBA bitmap.
    fn snapshot(&self, options: &SnapshotOptions) -> Result<RgbaImage>;

    /// Abort in-flight work. Later `snapshot` calls may fail with
    /// `Error::Cancelled`.
    fn cancel(&self) {}

    /// Short backend name used in logs.
    fn name(&self) -> &str {
        "snapshotter"
    }
}

impl<S: Snapshotter + ?Sized> Snapshotter for std::sync::Arc<S> {
    fn snapshot(&self, options: &SnapshotOptions) -> Result<RgbaImage> {
        (**self).snapshot(options)
    }

    fn cancel(&self) {
        (**self).cancel()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
