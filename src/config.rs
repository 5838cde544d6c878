//! Runner configuration.
//!
//! The defaults are chosen so a bare invocation from a checkout of the
//! fixture repository works:
//! - fixtures are read from `integration/render-tests`
//! - results go to `render-test-results`, which is wiped on every run
//! - one worker thread, matching strictly sequential dispatch

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::discovery::DiscoveryOptions;
use crate::output;
use crate::snapshot::{ProcessSnapshotter, Snapshotter};
use crate::{Error, Result};

pub const DEFAULT_FIXTURES_DIR: &str = "integration/render-tests";
pub const DEFAULT_OUTPUT_DIR: &str = "render-test-results";

/// Which snapshotting backend renders the fixtures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SnapshotterKind {
    /// Built-in reference rasterizer (background layers only)
    #[default]
    Raster,
    /// External renderer program, run once per fixture
    Process {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl SnapshotterKind {
    /// Instantiate the backend.
    pub fn build(&self) -> Result<Arc<dyn Snapshotter>> {
        match self {
            #[cfg(feature = "raster")]
            SnapshotterKind::Raster => Ok(Arc::new(crate::snapshot::BackgroundSnapshotter::new())),
            #[cfg(not(feature = "raster"))]
            SnapshotterKind::Raster => Err(Error::Config(
                "the raster snapshotter is not compiled in (enable the `raster` feature)".to_string(),
            )),
            SnapshotterKind::Process {
                program,
                args,
                timeout_ms,
            } => {
                let mut snapshotter = ProcessSnapshotter::new(program.clone()).with_args(args.clone());
                if let Some(ms) = timeout_ms {
                    snapshotter = snapshotter.with_timeout(Duration::from_millis(*ms));
                }
                Ok(Arc::new(snapshotter))
            }
        }
    }
}

/// Configuration for a render-test run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Root of the fixture tree (`<category>/<test>/style.json`)
    pub fixtures_dir: PathBuf,
    /// Where results are written; deleted and re-created on every run
    pub output_dir: PathBuf,
    /// Snapshot worker threads (0 => one per CPU)
    pub workers: usize,
    /// Fixture selection
    pub discovery: DiscoveryOptions,
    /// Rendering backend
    pub snapshotter: SnapshotterKind,
    /// Whether `results.json` is written next to the images
    pub write_manifest: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            fixtures_dir: PathBuf::from(DEFAULT_FIXTURES_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            workers: 1,
            discovery: DiscoveryOptions::default(),
            snapshotter: SnapshotterKind::default(),
            write_manifest: true,
        }
    }
}

impl RunnerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Worker count with `0` resolved to the number of CPUs.
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Reject configs that cannot run, or whose output root would take the
    /// fixtures (or the working directory) with it when it is wiped.
    pub fn validate(&self) -> Result<()> {
        if self.fixtures_dir.as_os_str().is_empty() {
            return Err(Error::Config("fixtures_dir is empty".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("output_dir is empty".to_string()));
        }
        // The output root is wiped before writing; it must not hold the fixtures.
        let output_root = output::check_output_root(&self.output_dir)
            .map_err(|e| Error::Config(e.to_string()))?;
        let fixtures = output::resolve_path(&self.fixtures_dir)?;
        if fixtures.starts_with(&output_root) {
            return Err(Error::Config(format!(
                "output_dir {} contains the fixtures at {}",
                self.output_dir.display(),
                fixtures.display()
            )));
        }
        if let SnapshotterKind::Process { program, .. } = &self.snapshotter {
            if program.as_os_str().is_empty() {
                return Err(Error::Config("renderer program is empty".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.fixtures_dir, PathBuf::from("integration/render-tests"));
        assert_eq!(config.workers, 1);
        assert_eq!(config.snapshotter, SnapshotterKind::Raster);
        assert!(config.write_manifest);
        config.validate().unwrap();
    }

    #[test]
    fn auto_workers_resolve_to_cpus() {
        let config = RunnerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn output_must_not_contain_fixtures() {
        let config = RunnerConfig {
            fixtures_dir: PathBuf::from("out/fixtures"),
            output_dir: PathBuf::from("out"),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn output_parent_alias_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("fixtures/a/b")).unwrap();
        std::fs::create_dir_all(tmp.path().join("out")).unwrap();
        let config = RunnerConfig {
            fixtures_dir: tmp.path().join("fixtures"),
            output_dir: tmp.path().join("out/.."),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let sibling = RunnerConfig {
            output_dir: tmp.path().join("out"),
            ..config
        };
        sibling.validate().unwrap();
    }

    #[test]
    fn working_directory_output_is_rejected() {
        for dir in [".", "..", "./"] {
            let config = RunnerConfig {
                output_dir: PathBuf::from(dir),
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{}", dir);
        }
    }

    #[test]
    fn absolute_output_aliasing_relative_fixtures_is_rejected() {
        let cwd = std::env::current_dir().unwrap();
        let config = RunnerConfig {
            fixtures_dir: PathBuf::from("tests/fixtures/render-tests"),
            output_dir: cwd.join("tests/fixtures"),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn parses_partial_json() {
        let config: RunnerConfig = serde_json::from_str(
            r#"{
                "output_dir": "/tmp/results",
                "discovery": { "filter": "background", "limit": 20 },
                "snapshotter": { "kind": "process", "program": "mbgl-render", "timeout_ms": 1000 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/results"));
        assert_eq!(config.fixtures_dir, PathBuf::from(DEFAULT_FIXTURES_DIR));
        assert_eq!(config.discovery.limit, Some(20));
        assert_eq!(
            config.snapshotter,
            SnapshotterKind::Process {
                program: PathBuf::from("mbgl-render"),
                args: vec![],
                timeout_ms: Some(1000),
            }
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let res: std::result::Result<RunnerConfig, _> =
            serde_json::from_str(r#"{"snapshotter": {"kind": "gpu"}}"#);
        assert!(res.is_err());
    }

    #[cfg(feature = "raster")]
    #[test]
    fn builds_raster_backend() {
        let s = SnapshotterKind::Raster.build().unwrap();
        assert_eq!(s.name(), "raster");
    }
}
