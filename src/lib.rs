//! Render Test Runner
//!
//! Runs map style "render test" fixtures through a snapshotter and writes the
//! resulting bitmaps to disk for later comparison against reference images.
//!
//! # Features
//!
//! - **Discovery**: walks `<fixtures>/<category>/<test>/style.json`
//! - **Pluggable snapshotters**: the `Snapshotter` trait is the only rendering
//!   seam; an external renderer program and a background-only reference
//!   rasterizer (`raster` feature, default) are provided
//! - **Deterministic output**: `<output>/<category>/<test>/actual.png` plus a
//!   `results.json` manifest with SHA-256 digests
//!
//! # Example
//!
//! ```no_run
//! use render_test_runner::{RenderTestRunner, RunnerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunnerConfig {
//!     fixtures_dir: "integration/render-tests".into(),
//!     output_dir: "/tmp/render-results".into(),
//!     ..Default::default()
//! };
//!
//! let runner = RenderTestRunner::from_config(config)?;
//! let report = runner.run_all().await?;
//! println!("{} rendered, {} failed", report.rendered(), report.failed());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub mod definition;
pub mod discovery;
pub mod output;
pub mod queue;
pub mod runner;
pub mod snapshot;
pub mod style;

pub use config::{RunnerConfig, SnapshotterKind};
pub use definition::{RenderTestDefinition, TestId, DEFAULT_HEIGHT, DEFAULT_WIDTH};
pub use discovery::{discover, DiscoveryOptions};
pub use output::ResultWriter;
pub use queue::CancelHandle;
pub use runner::{RenderTestRunner, RunReport, TestOutcome};
pub use snapshot::{SnapshotOptions, Snapshotter};

/// Create the snapshotter described by `kind`.
///
/// The raster backend is only available with the `raster` feature.
pub fn new_snapshotter(kind: &SnapshotterKind) -> Result<Arc<dyn Snapshotter>> {
    kind.build()
}
