//! Command handlers. Each returns the process exit code.

use super::commands::{BatchArgs, CleanupArgs, InspectArgs, RunArgs};
use super::output::{OutputFormat, OutputFormatter};
use crate::config::ReproboxConfig;
use crate::pipeline::{parse_batch_file, BatchRunner, Pipeline, RunReport, RunRequest};
use crate::progress::{LoggingHandler, NoOpHandler, ProgressHandler};
use crate::workspace::CleanupRequest;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ABORTED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

fn load_config() -> Result<ReproboxConfig, i32> {
    let config = ReproboxConfig::default();
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        return Err(EXIT_USAGE);
    }
    debug!("{}", config);
    Ok(config)
}

fn build_pipeline(config: &ReproboxConfig, quiet: bool) -> Result<Pipeline, i32> {
    let progress: Arc<dyn ProgressHandler> = if quiet {
        Arc::new(NoOpHandler)
    } else {
        Arc::new(LoggingHandler)
    };
    match Pipeline::from_config(config) {
        Ok(pipeline) => Ok(pipeline.with_progress(progress)),
        Err(e) => {
            eprintln!("Failed to initialize package index client: {}", e);
            Err(EXIT_ABORTED)
        }
    }
}

fn emit(output: &str, destination: Option<&Path>) -> Result<()> {
    match destination {
        Some(path) => {
            std::fs::write(path, output)
                .with_context(|| format!("Failed to write output to {}", path.display()))?;
            info!("Output written to {}", path.display());
        }
        None => print!("{}", output),
    }
    Ok(())
}

pub async fn handle_run(args: &RunArgs, quiet: bool) -> i32 {
    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let pipeline = match build_pipeline(&config, quiet) {
        Ok(pipeline) => pipeline,
        Err(code) => return code,
    };

    let mut request = RunRequest::new(&args.paper).with_auto_run(args.auto_run);
    request.repository = args.repo.clone();
    if args.persistent {
        request = request.persistent(args.name.clone());
    }
    if let Some(dir) = &args.output_dir {
        request = request.with_output_dir(dir);
    }

    // Dropping the run future on Ctrl-C drops its workspace guard.
    let report = tokio::select! {
        report = pipeline.run(&request) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; workspace removed");
            RunReport::cancelled(&args.paper)
        }
    };

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    match formatter.format_run(&report) {
        Ok(output) => print!("{}", output),
        Err(e) => {
            error!("{:#}", e);
            return EXIT_ABORTED;
        }
    }

    if report.is_aborted() {
        EXIT_ABORTED
    } else {
        EXIT_SUCCESS
    }
}

pub async fn handle_batch(args: &BatchArgs, quiet: bool) -> i32 {
    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let entries = match parse_batch_file(&args.file) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_USAGE;
        }
    };
    let pipeline = match build_pipeline(&config, quiet) {
        Ok(pipeline) => pipeline,
        Err(code) => return code,
    };

    let jobs = args.jobs.unwrap_or(config.max_concurrent_runs);
    let mut runner = BatchRunner::new(Arc::new(pipeline), jobs).with_auto_run(args.auto_run);
    if let Some(dir) = &args.output_dir {
        runner = runner.with_output_dir(dir);
    }
    let report = runner.run(entries).await;

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    let written = formatter
        .format_batch(&report)
        .and_then(|output| emit(&output, args.output.as_deref()));
    if let Err(e) = written {
        error!("{:#}", e);
        return EXIT_ABORTED;
    }

    if report.all_aborted() {
        EXIT_ABORTED
    } else {
        EXIT_SUCCESS
    }
}

pub async fn handle_inspect(args: &InspectArgs, quiet: bool) -> i32 {
    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let pipeline = match build_pipeline(&config, quiet) {
        Ok(pipeline) => pipeline,
        Err(code) => return code,
    };

    let path = args
        .repository_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let inspection = match pipeline.inspect(&path).await {
        Ok(inspection) => inspection,
        Err(e) => {
            eprintln!("Cannot inspect {}: {}", path.display(), e);
            return EXIT_USAGE;
        }
    };

    match OutputFormatter::new(OutputFormat::from(args.format)).format_inspection(&inspection) {
        Ok(output) => {
            print!("{}", output);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            EXIT_ABORTED
        }
    }
}

pub fn handle_cleanup(args: &CleanupArgs) -> i32 {
    let request = CleanupRequest {
        ephemeral: args.ephemeral,
        persistent: args.persistent.clone(),
        all_persistent: args.all_persistent,
    };
    if request.is_empty() {
        eprintln!("Nothing selected: pass --ephemeral, --persistent NAME or --all-persistent");
        return EXIT_USAGE;
    }
    let config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };

    let report = match config.workspace_manager().cleanup(&request) {
        Ok(report) => report,
        Err(e) => {
            error!("Cleanup failed: {}", e);
            return EXIT_ABORTED;
        }
    };

    match OutputFormatter::new(OutputFormat::from(args.format)).format_cleanup(&report) {
        Ok(output) => {
            print!("{}", output);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            EXIT_ABORTED
        }
    }
}
