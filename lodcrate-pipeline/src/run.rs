//! Running pipeline settings against a scene, in this process or in a
//! `lodcrate batch` worker process

use crate::casting::{cast_materials, PipelineOutput};
use crate::error::PipelineError;
use crate::processors::{AggregationProcessor, ImpostorProcessor, Processor, ReductionProcessor, RemeshingProcessor};
use crate::settings::{load_settings, ImpostorPipelineSettings, ImpostorType, PipelineSettings};
use crate::threads::execute_parallel;
use lodcrate_casting::{BillboardCloudSettings, BillboardMode};
use lodcrate_core::{Error, ProcessContext, Result, Scene};
use lodcrate_io::{read_snapshot, write_snapshot};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Environment variable naming the worker executable
pub const WORKER_ENV: &str = "LODCRATE_BIN";

/// Prefix of the progress lines a worker prints on stdout
pub const PROGRESS_PREFIX: &str = "progress ";

/// Where a pipeline runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    #[default]
    RunInThisProcess,
    /// Run in a `lodcrate batch` child process. A crash of the engine fails
    /// the run without taking the caller down.
    RunInNewProcess,
}

/// Run pipeline settings against `scene`. Cast textures are written to
/// `output_dir` when given, otherwise they stay in memory on the scene's
/// texture table.
pub fn run_pipeline(
    settings: &PipelineSettings,
    scene: &mut Scene,
    output_dir: Option<&Path>,
    ctx: &ProcessContext,
    mode: RunMode,
) -> Result<PipelineOutput> {
    let span = tracing::info_span!("pipeline", kind = settings.name(), mode = ?mode);
    let _enter = span.enter();
    let start = std::time::Instant::now();
    let output = match mode {
        RunMode::RunInThisProcess => execute_parallel(|| process(settings, scene, output_dir, ctx))??,
        RunMode::RunInNewProcess => run_in_new_process(settings, scene, output_dir, ctx)?,
    };
    tracing::info!(
        "{} finished in {:.2?} with {} errors and {} warnings",
        settings.name(),
        start.elapsed(),
        output.log.errors().len(),
        output.log.warnings().len()
    );
    Ok(output)
}

fn processor_for(settings: &PipelineSettings) -> Box<dyn Processor> {
    match settings {
        PipelineSettings::Reduction(s) => Box::new(ReductionProcessor::new(s.clone())),
        PipelineSettings::Remeshing(s) => Box::new(RemeshingProcessor::new(s.clone())),
        PipelineSettings::Aggregation(s) => Box::new(AggregationProcessor::new(s.clone())),
        PipelineSettings::BillboardCloud(s) | PipelineSettings::Flipbook(s) => {
            Box::new(ImpostorProcessor::new(s.clone()))
        }
        PipelineSettings::BillboardCloudVegetation(s) => Box::new(ImpostorProcessor::new(foliage(s))),
    }
}

/// Vegetation pipelines always build foliage billboard clouds
fn foliage(settings: &ImpostorPipelineSettings) -> ImpostorPipelineSettings {
    let mut settings = settings.clone();
    settings.impostor = match settings.impostor {
        ImpostorType::BillboardCloud(cloud) => ImpostorType::BillboardCloud(BillboardCloudSettings {
            billboard_mode: BillboardMode::Foliage,
            ..cloud
        }),
        _ => ImpostorType::BillboardCloud(BillboardCloudSettings {
            billboard_mode: BillboardMode::Foliage,
            ..BillboardCloudSettings::default()
        }),
    };
    settings
}

/// Processing followed by casting, in the calling thread
fn process(
    settings: &PipelineSettings,
    scene: &mut Scene,
    output_dir: Option<&Path>,
    ctx: &ProcessContext,
) -> Result<PipelineOutput> {
    let mut processor = processor_for(settings);
    let casters = settings.casters();
    let cast_from = if casters.is_empty() { 100.0 } else { 60.0 };

    let mut log = processor.run(scene, &ctx.sub_range(0.0, cast_from))?;
    ctx.checkpoint()?;
    if log.has_errors() {
        return Ok(PipelineOutput {
            log,
            textures: Vec::new(),
        });
    }

    let textures = cast_materials(
        processor.as_ref(),
        scene,
        casters,
        output_dir,
        &mut log,
        &ctx.sub_range(cast_from, 100.0),
    )?;
    ctx.report(100.0);
    Ok(PipelineOutput { log, textures })
}

/// Locate the `lodcrate` executable used as worker: the path in
/// `LODCRATE_BIN`, this executable when it is `lodcrate`, or a `lodcrate`
/// next to this executable or one directory up (cargo puts test binaries in
/// `target/<profile>/deps`).
pub fn find_worker() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(WORKER_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        tracing::warn!("{} points to missing file {}", WORKER_ENV, path.display());
    }
    let name = format!("lodcrate{}", std::env::consts::EXE_SUFFIX);
    if let Ok(exe) = std::env::current_exe() {
        if exe.file_name().is_some_and(|n| n == name.as_str()) {
            return Ok(exe);
        }
        for dir in exe.ancestors().skip(1).take(2) {
            let candidate = dir.join(&name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Err(PipelineError::WorkerNotFound { env: WORKER_ENV }.into())
}

fn parse_progress(line: &str) -> Option<f32> {
    line.strip_prefix(PROGRESS_PREFIX)?.trim().parse().ok()
}

fn run_in_new_process(
    settings: &PipelineSettings,
    scene: &mut Scene,
    output_dir: Option<&Path>,
    ctx: &ProcessContext,
) -> Result<PipelineOutput> {
    let json = settings.to_json()?;
    let worker = find_worker()?;

    let temp = tempfile::Builder::new().prefix("lodcrate-run").tempdir()?;
    let settings_path = temp.path().join("settings.json");
    let input_path = temp.path().join("input.lodscene");
    let output_path = temp.path().join("output.lodscene");
    let log_path = temp.path().join("log.json");
    std::fs::write(&settings_path, json)?;
    write_snapshot(scene, &input_path)?;

    let mut command = Command::new(&worker);
    command
        .arg("batch")
        .arg("--settings")
        .arg(&settings_path)
        .arg("--input")
        .arg(&input_path)
        .arg("--output")
        .arg(&output_path)
        .arg("--log")
        .arg(&log_path);
    if let Some(dir) = output_dir {
        command.arg("--output-dir").arg(dir);
    }
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    tracing::debug!("spawning worker {}", worker.display());
    let mut child = command.spawn()?;

    let stderr = child.stderr.take().map(|mut stream| {
        std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stream.read_to_string(&mut text);
            text
        })
    });
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            if let Some(progress) = parse_progress(&line?) {
                ctx.report(progress);
            }
            if ctx.token().is_cancelled() {
                tracing::info!("cancelling worker {}", child.id());
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Cancelled);
            }
        }
    }
    let status = child.wait()?;
    let stderr = stderr.and_then(|handle| handle.join().ok()).unwrap_or_default();
    if !status.success() {
        return Err(PipelineError::WorkerFailed {
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        }
        .into());
    }

    let output: PipelineOutput =
        serde_json::from_str(&std::fs::read_to_string(&log_path)?).map_err(PipelineError::from)?;
    *scene = read_snapshot(&output_path)?;
    Ok(output)
}

/// Worker side of [`RunMode::RunInNewProcess`]: read the snapshot and
/// settings, run in this process printing progress lines on stdout, then
/// write the processed snapshot and the [`PipelineOutput`] as JSON
pub fn run_batch(
    settings_path: &Path,
    input: &Path,
    output: &Path,
    log_path: &Path,
    output_dir: Option<&Path>,
) -> Result<PipelineOutput> {
    let settings = load_settings(settings_path)?;
    let mut scene = read_snapshot(input)?;
    let ctx = ProcessContext::new().with_observer(Arc::new(|progress: f32| {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}{:.1}", PROGRESS_PREFIX, progress);
        let _ = stdout.flush();
        true
    }));
    let result = run_pipeline(&settings, &mut scene, output_dir, &ctx, RunMode::RunInThisProcess)?;
    write_snapshot(&scene, output)?;
    std::fs::write(log_path, serde_json::to_string_pretty(&result).map_err(PipelineError::from)?)?;
    Ok(result)
}
