use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use render_test_runner::{RenderTestRunner, RunnerConfig, SnapshotterKind};

/// Render map style test fixtures and write the results as PNG files.
#[derive(Debug, Parser)]
#[command(name = "render-test-runner", version, about)]
struct Cli {
    /// JSON config file; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fixture tree (<category>/<test>/style.json)
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Output directory; deleted and re-created on every run
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only run tests whose category/name contains this string
    #[arg(long)]
    filter: Option<String>,

    /// Stop after this many tests
    #[arg(long)]
    limit: Option<usize>,

    /// Snapshot worker threads (0 = one per CPU)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Also run fixtures marked as ignored
    #[arg(long)]
    include_ignored: bool,

    /// External renderer program used instead of the built-in rasterizer
    #[arg(long)]
    renderer: Option<PathBuf>,

    /// Extra argument passed to the renderer (repeatable)
    #[arg(long = "renderer-arg", requires = "renderer", allow_hyphen_values = true)]
    renderer_args: Vec<String>,

    /// Kill the renderer after this many milliseconds
    #[arg(long, requires = "renderer")]
    renderer_timeout_ms: Option<u64>,

    /// Do not write results.json
    #[arg(long)]
    no_manifest: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<RunnerConfig> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::from_json_file(path)?,
            None => RunnerConfig::default(),
        };
        if let Some(fixtures) = self.fixtures {
            config.fixtures_dir = fixtures;
        }
        if let Some(output) = self.output {
            config.output_dir = output;
        }
        if self.filter.is_some() {
            config.discovery.filter = self.filter;
        }
        if self.limit.is_some() {
            config.discovery.limit = self.limit;
        }
        if let Some(jobs) = self.jobs {
            config.workers = jobs;
        }
        if self.include_ignored {
            config.discovery.include_ignored = true;
        }
        if let Some(program) = self.renderer {
            config.snapshotter = SnapshotterKind::Process {
                program,
                args: self.renderer_args,
                timeout_ms: self.renderer_timeout_ms,
            };
        }
        if self.no_manifest {
            config.write_manifest = false;
        }
        config.validate()?;
        Ok(config)
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = cli.into_config()?;
    let runner = RenderTestRunner::from_config(config).context("failed to create snapshotter")?;

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let definitions = runner.discover().context("failed to discover fixtures")?;
    let report = runner.run(definitions).await.context("render run failed")?;

    for (id, outcome) in &report.results {
        if let render_test_runner::TestOutcome::Failed { error } = outcome {
            eprintln!("FAILED {}: {}", id, error);
        }
    }
    println!(
        "{} rendered, {} failed, {} skipped -> {}",
        report.rendered(),
        report.failed(),
        report.skipped(),
        report.output_root.display()
    );
    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
