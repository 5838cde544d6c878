//! Snapshotter backed by an external renderer program.
//!
//! Each job runs the program once:
//!
//! ```text
//! <program> [args...] --style <style.json> --width <w> --height <h> --ratio <r> --output <actual.png>
//! ```
//!
//! The program must write a PNG to the output path and exit with status 0.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::snapshot::{SnapshotOptions, Snapshotter};
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an external renderer per snapshot.
#[derive(Debug)]
pub struct ProcessSnapshotter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    cancelled: AtomicBool,
    next_id: AtomicU64,
    // Running children, keyed by job id, so `cancel` can kill them.
    running: Mutex<HashMap<u64, Child>>,
}

impl ProcessSnapshotter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            cancelled: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Extra arguments placed before the per-job arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the renderer if a single job runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self, options: &SnapshotOptions, style: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--style")
            .arg(style)
            .arg("--width")
            .arg(options.width.to_string())
            .arg("--height")
            .arg(options.height.to_string())
            .arg("--ratio")
            .arg(options.pixel_ratio.to_string())
            .arg("--output")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        cmd
    }

    fn kill(&self, id: u64) {
        if let Ok(mut running) = self.running.lock() {
            if let Some(mut child) = running.remove(&id) {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }

    // Poll the child until it exits, is cancelled, or times out.
    fn wait(&self, id: u64) -> Result<std::process::ExitStatus> {
        let started = Instant::now();
        loop {
            {
                let mut running = self
                    .running
                    .lock()
                    .map_err(|_| Error::Snapshot("renderer registry poisoned".to_string()))?;
                let child = running.get_mut(&id).ok_or(Error::Cancelled)?;
                if let Some(status) = child.try_wait()? {
                    running.remove(&id);
                    return Ok(status);
                }
            }
            if self.cancelled.load(Ordering::SeqCst) {
                self.kill(id);
                return Err(Error::Cancelled);
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() > timeout {
                    self.kill(id);
                    return Err(Error::Snapshot(format!(
                        "renderer timed out after {}ms",
                        timeout.as_millis()
                    )));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Snapshotter for ProcessSnapshotter {
    fn snapshot(&self, options: &SnapshotOptions) -> Result<RgbaImage> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let expected = options.checked_pixel_size()?;

        let workdir = tempfile::tempdir()?;
        let style_path = workdir.path().join("style.json");
        let output_path = workdir.path().join("actual.png");
        let stderr_path = workdir.path().join("stderr.log");
        std::fs::write(&style_path, &options.style_json)?;

        let mut cmd = self.command(options, &style_path, &output_path);
        cmd.stderr(Stdio::from(File::create(&stderr_path)?));
        let child = cmd.spawn().map_err(|e| {
            Error::Snapshot(format!("failed to start {}: {}", self.program.display(), e))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.running
            .lock()
            .map_err(|_| Error::Snapshot("renderer registry poisoned".to_string()))?
            .insert(id, child);
        log::trace!("renderer job {} started", id);

        let status = self.wait(id)?;
        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(Error::Snapshot(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.trim()
            )));
        }

        let image = image::open(&output_path)
            .map_err(|e| Error::Snapshot(format!("renderer produced no readable PNG: {}", e)))?
            .into_rgba8();
        if image.dimensions() != expected {
            log::warn!(
                "renderer produced {:?} but {:?} was requested",
                image.dimensions(),
                expected
            );
        }
        Ok(image)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Ok(mut running) = self.running.lock() {
            for (_, mut child) in running.drain() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }

    fn name(&self) -> &str {
        "process"
    }
}
