//! VisionFlow - Main Entry Point
//!
//! Loads a pipeline configuration, compiles it into a dataflow graph and runs
//! the runtime loop until interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use visionflow_rs::{
    config::PipelineConfig, flow::FlowCompiler, pipeline::SoftwareBackend, runtime::Runner,
};

#[derive(Parser)]
#[command(name = "visionflow")]
#[command(author, version, about = "Vision pipeline runner", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML, or JSON with a .json extension)
    config: PathBuf,

    /// Write the graph topology as Graphviz DOT
    #[arg(long)]
    dump_topology: Option<PathBuf>,

    /// Stop after this many loop iterations
    #[arg(long)]
    frames: Option<u64>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file path {:?} has no file name", path))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,visionflow_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Flushes the log file on exit
    let _log_guard = init_logging(cli.log_file.as_deref())?;

    tracing::info!("Starting VisionFlow");

    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {:?}", cli.config))?;

    let backend = Arc::new(SoftwareBackend::new(config.engine.kernel_budget));
    let pipeline = FlowCompiler::new(&config)
        .compile(backend)
        .context("Failed to build pipeline")?;

    if let Some(path) = &cli.dump_topology {
        std::fs::write(path, pipeline.graph.to_dot())
            .with_context(|| format!("Failed to write topology to {:?}", path))?;
        tracing::info!("Topology written to {:?}", path);
    }

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let stats = Runner::new(pipeline, &config.engine)?
        .with_running(running)
        .with_iteration_limit(cli.frames)
        .run()?;

    tracing::info!(
        "Done: {} frames in, {} frames out{}",
        stats.frames_in,
        stats.frames_out,
        if stats.end_of_stream { " (end of stream)" } else { "" }
    );
    Ok(())
}
