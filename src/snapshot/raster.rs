//! Offline reference snapshotter.
//!
//! Draws only `background` layers. It exists so fixture trees can be run
//! end to end without a native map renderer, and so the dispatch and output
//! paths have a deterministic backend in tests.

use std::sync::atomic::{AtomicBool, Ordering};

use image::{Rgba, RgbaImage};
use serde_json::Value;

use crate::snapshot::{SnapshotOptions, Snapshotter};
use crate::style::{Layer, StyleDefinition};
use crate::{Error, Result};

/// Default `background-color` of the style format.
const DEFAULT_BACKGROUND: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Paint operations understood by the reference rasterizer.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    /// Fill the whole canvas, blending source-over. Channels are 0..=1.
    Fill { rgba: [f32; 4] },
}

/// Translate the style's visible background layers into paint commands.
pub fn paint_commands(style: &StyleDefinition) -> Vec<PaintCommand> {
    style
        .layers
        .iter()
        .filter_map(|layer| {
            if layer.kind != "background" {
                log::trace!("skipping {} layer '{}'", layer.kind, layer.id);
                return None;
            }
            if !layer.is_visible() {
                return None;
            }
            background_fill(layer)
        })
        .collect()
}

fn background_fill(layer: &Layer) -> Option<PaintCommand> {
    let mut rgba = match layer.paint.get("background-color") {
        None => DEFAULT_BACKGROUND,
        Some(Value::String(s)) => match csscolorparser::parse(s) {
            Ok(c) => {
                let [r, g, b, a] = c.to_rgba8();
                [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0]
            }
            Err(e) => {
                log::debug!("layer '{}': bad background-color {:?}: {}", layer.id, s, e);
                return None;
            }
        },
        Some(other) => {
            log::debug!(
                "layer '{}': unsupported background-color value {}",
                layer.id,
                other
            );
            return None;
        }
    };
    let opacity = match layer.paint.get("background-opacity") {
        None => 1.0,
        Some(v) => match v.as_f64() {
            Some(o) => o.clamp(0.0, 1.0) as f32,
            None => {
                log::debug!("layer '{}': unsupported background-opacity {}", layer.id, v);
                return None;
            }
        },
    };
    rgba[3] *= opacity;
    Some(PaintCommand::Fill { rgba })
}

/// Composite `commands` over a transparent canvas.
pub fn rasterize(width: u32, height: u32, commands: &[PaintCommand]) -> RgbaImage {
    let mut acc = [0.0f32; 4];
    for cmd in commands {
        match cmd {
            PaintCommand::Fill { rgba } => acc = source_over(*rgba, acc),
        }
    }
    let px = Rgba([to_u8(acc[0]), to_u8(acc[1]), to_u8(acc[2]), to_u8(acc[3])]);
    RgbaImage::from_pixel(width, height, px)
}

fn source_over(src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let sa = src[3];
    let da = dst[3] * (1.0 - sa);
    let out_a = sa + da;
    if out_a <= 0.0 {
        return [0.0; 4];
    }
    let ch = |i: usize| (src[i] * sa + dst[i] * da) / out_a;
    [ch(0), ch(1), ch(2), out_a]
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Snapshotter that renders background layers only.
#[derive(Debug, Default)]
pub struct BackgroundSnapshotter {
    cancelled: AtomicBool,
}

impl BackgroundSnapshotter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Snapshotter for BackgroundSnapshotter {
    fn snapshot(&self, options: &SnapshotOptions) -> Result<RgbaImage> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let (width, height) = options.checked_pixel_size()?;
        let style = StyleDefinition::parse(&options.style_json)
            .map_err(|e| Error::Snapshot(format!("unreadable style document: {}", e)))?;
        Ok(rasterize(width, height, &paint_commands(&style)))
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "raster"
    }
}
