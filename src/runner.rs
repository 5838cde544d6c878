//! Orchestration: enumerate → dispatch → collect → persist.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use image::RgbaImage;
use serde::Serialize;

use crate::config::RunnerConfig;
use crate::definition::{RenderTestDefinition, TestId};
use crate::discovery;
use crate::output::ResultWriter;
use crate::queue::{CancelHandle, SnapshotQueue};
use crate::snapshot::Snapshotter;
use crate::{Error, Result};

type OnSnapshotReadyHandler = Arc<dyn Fn(&RunReport) + Send + Sync>;

/// What happened to one fixture.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    /// Rendered and written to `path`
    Rendered {
        path: PathBuf,
        width: u32,
        height: u32,
        sha256: String,
    },
    /// The snapshotter returned an error
    Failed { error: String },
    /// Never dispatched (no usable style document)
    Skipped { reason: String },
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub output_root: PathBuf,
    pub results: BTreeMap<TestId, TestOutcome>,
    pub elapsed: Duration,
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    category: &'a str,
    name: &'a str,
    #[serde(flatten)]
    outcome: &'a TestOutcome,
}

#[derive(Serialize)]
struct Manifest<'a> {
    rendered: usize,
    failed: usize,
    skipped: usize,
    elapsed_ms: u64,
    tests: Vec<ManifestEntry<'a>>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&TestOutcome) -> bool) -> usize {
        self.results.values().filter(|o| pred(o)).count()
    }

    pub fn rendered(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Rendered { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Skipped { .. }))
    }

    /// True when no fixture failed to render.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, id: &TestId) -> Option<&TestOutcome> {
        self.results.get(id)
    }

    fn manifest(&self) -> Manifest<'_> {
        Manifest {
            rendered: self.rendered(),
            failed: self.failed(),
            skipped: self.skipped(),
            elapsed_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            tests: self
                .results
                .iter()
                .map(|(id, outcome)| ManifestEntry {
                    category: &id.category,
                    name: &id.name,
                    outcome,
                })
                .collect(),
        }
    }
}

/// Drives a set of render-test definitions through a snapshotter.
pub struct RenderTestRunner {
    config: RunnerConfig,
    snapshotter: Arc<dyn Snapshotter>,
    cancel: CancelHandle,
    on_ready: Option<OnSnapshotReadyHandler>,
}

impl RenderTestRunner {
    pub fn new(config: RunnerConfig, snapshotter: Arc<dyn Snapshotter>) -> Self {
        let cancel = CancelHandle::new(snapshotter.clone());
        Self {
            config,
            snapshotter,
            cancel,
            on_ready: None,
        }
    }

    /// Build a runner with the backend named in `config`.
    pub fn from_config(config: RunnerConfig) -> Result<Self> {
        let snapshotter = config.snapshotter.build()?;
        Ok(Self::new(config, snapshotter))
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Register a callback invoked once all results have been written.
    pub fn on_snapshot_ready<F>(&mut self, cb: F)
    where
        F: Fn(&RunReport) + Send + Sync + 'static,
    {
        self.on_ready = Some(Arc::new(cb));
    }

    /// Remove previously registered on_snapshot_ready callback if any
    pub fn clear_on_snapshot_ready(&mut self) {
        self.on_ready = None;
    }

    /// Handle that stops the run from another task or thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Enumerate the configured fixture tree.
    pub fn discover(&self) -> Result<Vec<RenderTestDefinition>> {
        discovery::discover(&self.config.fixtures_dir, &self.config.discovery)
    }

    /// Discover and run every configured fixture.
    pub async fn run_all(&self) -> Result<RunReport> {
        let definitions = self.discover()?;
        self.run(definitions).await
    }

    /// Render `definitions` and write the results.
    ///
    /// Per-test failures are recorded in the report and do not stop the run.
    /// Nothing is written if the run is cancelled.
    pub async fn run(&self, definitions: Vec<RenderTestDefinition>) -> Result<RunReport> {
        self.config.validate()?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let started = Instant::now();
        let workers = self.config.effective_workers();
        log::info!(
            "rendering {} fixtures with {} ({} worker{})",
            definitions.len(),
            self.snapshotter.name(),
            workers,
            if workers == 1 { "" } else { "s" }
        );

        let mut results: BTreeMap<TestId, TestOutcome> = BTreeMap::new();
        let mut seen = HashSet::new();
        let queue = SnapshotQueue::new(self.snapshotter.clone(), workers, self.cancel.clone())?;
        let mut pending = FuturesUnordered::new();

        for definition in definitions {
            let id = definition.id().clone();
            if !seen.insert(id.clone()) {
                log::warn!("duplicate fixture {}; keeping the first", id);
                continue;
            }
            if !definition.has_style() {
                let reason = definition
                    .load_error()
                    .unwrap_or("no style document")
                    .to_string();
                log::warn!("skipping {}: {}", id, reason);
                results.insert(id, TestOutcome::Skipped { reason });
                continue;
            }
            let rx = queue.submit(id.clone(), definition.to_options());
            pending.push(async move { (id, rx.await) });
        }

        let total = pending.len();
        let mut completed = 0usize;
        let mut rendered: HashMap<TestId, RgbaImage> = HashMap::with_capacity(total);

        while completed < total {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                next = pending.next() => next,
            };
            let Some((id, reply)) = next else { break };
            completed += 1;
            match reply {
                Ok(Ok(image)) => {
                    log::info!("[{}/{}] {} rendered", completed, total, id);
                    rendered.insert(id, image);
                }
                Ok(Err(Error::Cancelled)) => return Err(Error::Cancelled),
                Ok(Err(e)) => {
                    log::warn!("[{}/{}] {} failed: {}", completed, total, id, e);
                    results.insert(id, TestOutcome::Failed { error: e.to_string() });
                }
                Err(_) => {
                    log::warn!("[{}/{}] {} was dropped by its worker", completed, total, id);
                    results.insert(
                        id,
                        TestOutcome::Failed {
                            error: "snapshot worker dropped the job".to_string(),
                        },
                    );
                }
            }
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let output_dir = self.config.output_dir.clone();
        let write_manifest = self.config.write_manifest;
        let report = tokio::task::spawn_blocking(move || {
            queue.close();
            persist(output_dir, rendered, results, started, write_manifest)
        })
        .await
        .map_err(|e| Error::Other(format!("result writer panicked: {}", e)))??;

        log::info!(
            "{} rendered, {} failed, {} skipped in {:.2?}; results in {}",
            report.rendered(),
            report.failed(),
            report.skipped(),
            report.elapsed,
            report.output_root.display()
        );

        if let Some(cb) = &self.on_ready {
            cb(&report);
        }
        Ok(report)
    }
}

fn persist(
    output_dir: PathBuf,
    rendered: HashMap<TestId, RgbaImage>,
    mut results: BTreeMap<TestId, TestOutcome>,
    started: Instant,
    write_manifest: bool,
) -> Result<RunReport> {
    let writer = ResultWriter::prepare(output_dir)?;

    let mut rendered: Vec<_> = rendered.into_iter().collect();
    rendered.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, image) in rendered {
        let written = writer.write(&id, &image)?;
        results.insert(
            id,
            TestOutcome::Rendered {
                path: written.path,
                width: image.width(),
                height: image.height(),
                sha256: written.sha256,
            },
        );
    }

    let report = RunReport {
        output_root: writer.root().to_path_buf(),
        results,
        elapsed: started.elapsed(),
    };
    if write_manifest {
        writer.write_manifest(&report.manifest())?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Solid;

    impl Snapshotter for Solid {
        fn snapshot(&self, options: &SnapshotOptions) -> Result<RgbaImage> {
            if options.style_json.contains("explode") {
                return Err(Error::Snapshot("renderer crashed".to_string()));
            }
            let (w, h) = options.pixel_size();
            Ok(RgbaImage::new(w, h))
        }
    }

    fn config(tmp: &TempDir) -> RunnerConfig {
        RunnerConfig {
            fixtures_dir: tmp.path().join("fixtures"),
            output_dir: tmp.path().join("out"),
            ..Default::default()
        }
    }

    fn def(category: &str, name: &str, style: &str) -> RenderTestDefinition {
        RenderTestDefinition::new(category, name, Some(style.to_string())).unwrap()
    }

    #[tokio::test]
    async fn renders_failures_and_skips_are_reported() {
        let tmp = TempDir::new().unwrap();
        let runner = RenderTestRunner::new(config(&tmp), Arc::new(Solid));
        let report = runner
            .run(vec![
                def("fill", "ok", r#"{"metadata": {"test": {"width": 8, "height": 4}}}"#),
                def("fill", "bad", r#"{"explode": true}"#),
                RenderTestDefinition::unreadable("line", "missing", "cannot read style.json"),
            ])
            .await
            .unwrap();

        assert_eq!((report.rendered(), report.failed(), report.skipped()), (1, 1, 1));
        assert!(!report.is_success());
        match report.outcome(&TestId::new("fill", "ok")).unwrap() {
            TestOutcome::Rendered { path, width, height, .. } => {
                assert_eq!((*width, *height), (8, 4));
                assert_eq!(path, &tmp.path().join("out/fill/ok/actual.png"));
                assert!(path.exists());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!tmp.path().join("out/fill/bad").exists());
        assert!(tmp.path().join("out/results.json").exists());
    }

    #[tokio::test]
    async fn listener_fires_once_after_write() {
        let tmp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut runner = RenderTestRunner::new(config(&tmp), Arc::new(Solid));
        runner.on_snapshot_ready(move |report| {
            assert!(report.output_root.join("a/b/actual.png").exists());
            seen.fetch_add(1, Ordering::SeqCst);
        });
        runner.run(vec![def("a", "b", "{}")]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_render_once() {
        let tmp = TempDir::new().unwrap();
        let runner = RenderTestRunner::new(config(&tmp), Arc::new(Solid));
        let report = runner
            .run(vec![def("a", "b", "{}"), def("a", "b", r#"{"explode": 1}"#)])
            .await
            .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.rendered(), 1);
    }

    #[tokio::test]
    async fn empty_run_still_prepares_output() {
        let tmp = TempDir::new().unwrap();
        let runner = RenderTestRunner::new(config(&tmp), Arc::new(Solid));
        let report = runner.run(Vec::new()).await.unwrap();
        assert!(report.results.is_empty());
        assert!(report.output_root.is_dir());
    }

    #[cfg(feature = "raster")]
    #[tokio::test]
    async fn oversized_fixture_fails_without_losing_the_rest() {
        let tmp = TempDir::new().unwrap();
        let snapshotter = Arc::new(crate::snapshot::BackgroundSnapshotter::new());
        let runner = RenderTestRunner::new(config(&tmp), snapshotter);
        let report = runner
            .run(vec![
                def("a", "huge", r#"{"metadata": {"test": {"width": 4294967295, "height": 4294967295}}, "layers": []}"#),
                def("b", "ok", r#"{"metadata": {"test": {"width": 4, "height": 4}}, "layers": []}"#),
            ])
            .await
            .unwrap();

        match report.outcome(&TestId::new("a", "huge")).unwrap() {
            TestOutcome::Failed { error } => assert!(error.contains("limit"), "{}", error),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(
            report.outcome(&TestId::new("b", "ok")),
            Some(TestOutcome::Rendered { width: 4, height: 4, .. })
        ));
    }

    #[tokio::test]
    async fn panicking_snapshotter_fails_one_test() {
        struct Fragile;

        impl Snapshotter for Fragile {
            fn snapshot(&self, options: &SnapshotOptions) -> Result<RgbaImage> {
                if options.style_json.contains("explode") {
                    panic!("renderer aborted");
                }
                Ok(RgbaImage::new(options.width, options.height))
            }
        }

        let tmp = TempDir::new().unwrap();
        let runner = RenderTestRunner::new(config(&tmp), Arc::new(Fragile));
        let report = runner
            .run(vec![def("a", "crash", r#"{"explode": true}"#), def("b", "ok", "{}")])
            .await
            .unwrap();
        assert_eq!((report.rendered(), report.failed()), (1, 1));
        assert!(tmp.path().join("out/b/ok/actual.png").exists());
    }

    #[tokio::test]
    async fn aliased_output_leaves_fixtures_alone() {
        let tmp = TempDir::new().unwrap();
        let style = tmp.path().join("fixtures/a/b/style.json");
        std::fs::create_dir_all(style.parent().unwrap()).unwrap();
        std::fs::write(&style, "{}").unwrap();
        std::fs::create_dir_all(tmp.path().join("out")).unwrap();

        let config = RunnerConfig {
            output_dir: tmp.path().join("out/.."),
            ..config(&tmp)
        };
        let runner = RenderTestRunner::new(config, Arc::new(Solid));
        assert!(matches!(runner.run_all().await, Err(Error::Config(_))));
        assert!(style.exists());
    }

    #[tokio::test]
    async fn cancelled_runner_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let runner = RenderTestRunner::new(config(&tmp), Arc::new(Solid));
        runner.cancel_handle().cancel();
        let err = runner.run(vec![def("a", "b", "{}")]).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!tmp.path().join("out").exists());
    }
}
