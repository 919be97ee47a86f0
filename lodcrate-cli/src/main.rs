//! lodcrate - level of detail generation from the command line
//!
//! Reduces, remeshes, aggregates or replaces scenes with impostors, bakes
//! their materials, and doubles as the worker process for pipelines run with
//! `RunMode::RunInNewProcess`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lodcrate_casting::{
    AmbientOcclusionCaster, BillboardCloudSettings, BillboardMode, Caster, ColorCaster, DisplacementCaster,
    FlipbookSettings, MappingImageOutputMaterialSettings, MappingImageSettings, NormalCaster, OpacityCaster,
};
use lodcrate_core::{channels, Scene};
use lodcrate_io::load_scene;
use lodcrate_pipeline::{
    load_settings, run_batch, AggregationPipeline, BillboardCloudPipeline, BillboardCloudVegetationPipeline,
    FlipbookPipeline, Pipeline, PipelineOutput, ReductionPipeline, RemeshingPipeline, RunMode, SettingsPipeline,
};
use lodcrate_remeshing::RemeshingSettings;
use lodcrate_simplification::{ReductionSettings, ReductionTargets, SimplificationSettings};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lodcrate")]
#[command(about = "Mesh reduction, remeshing, impostors and material casting")]
#[command(version)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Material casting shared by the processing commands
#[derive(Args)]
struct CastArgs {
    /// Material channels to bake, e.g. Diffuse,Normals,Opacity
    #[arg(long = "cast", value_delimiter = ',')]
    channels: Vec<String>,

    /// Width and height of the baked textures
    #[arg(long)]
    texture_size: Option<u32>,

    /// Directory for baked textures (default: next to the output)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Run the pipeline in a separate worker process
    #[arg(long)]
    new_process: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImpostorMode {
    Flipbook,
    OuterShell,
    Foliage,
}

#[derive(Subcommand)]
enum Commands {
    /// Reduce the triangle count of a scene
    Reduce {
        input: PathBuf,
        output: PathBuf,

        /// Fraction of triangles to keep, unless another target is given
        #[arg(long, default_value_t = 0.5)]
        ratio: f32,

        /// Stop at this many triangles
        #[arg(long)]
        triangles: Option<u32>,

        /// Stop when the deviation is invisible at this on-screen size
        #[arg(long)]
        on_screen_size: Option<u32>,

        /// Only reduce meshes in this selection set
        #[arg(long)]
        selection: Option<String>,

        #[command(flatten)]
        cast: CastArgs,
    },

    /// Replace meshes with one watertight remeshed mesh
    Remesh {
        input: PathBuf,
        output: PathBuf,

        /// Diameter in pixels the result is built for
        #[arg(long, default_value_t = 300)]
        on_screen_size: u32,

        #[arg(long)]
        selection: Option<String>,

        #[command(flatten)]
        cast: CastArgs,
    },

    /// Merge meshes into one
    Aggregate {
        input: PathBuf,
        output: PathBuf,

        /// Keep meshes separate, only share one material
        #[arg(long)]
        no_merge: bool,

        #[arg(long)]
        selection: Option<String>,

        #[command(flatten)]
        cast: CastArgs,
    },

    /// Replace meshes with a flipbook or billboard cloud impostor
    Impostor {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = ImpostorMode::OuterShell)]
        mode: ImpostorMode,

        /// Views in the flipbook atlas
        #[arg(long, default_value_t = 9)]
        views: u32,

        #[arg(long)]
        selection: Option<String>,

        #[command(flatten)]
        cast: CastArgs,
    },

    /// Run a pipeline settings file (JSON or TOML)
    Run {
        #[arg(long)]
        settings: PathBuf,
        input: PathBuf,
        output: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        new_process: bool,
    },

    /// Worker mode: process a scene snapshot, printing progress on stdout
    Batch {
        #[arg(long)]
        settings: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Where the processing log is written as JSON
        #[arg(long)]
        log: PathBuf,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Print what a scene contains
    Info { input: PathBuf },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // stdout carries progress lines in batch mode
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = match cli.command {
        Commands::Reduce {
            input,
            output,
            ratio,
            triangles,
            on_screen_size,
            selection,
            cast,
        } => {
            let mut targets = ReductionTargets::triangle_ratio(ratio);
            // Explicit stop targets replace the default ratio
            targets.use_triangle_ratio = triangles.is_none() && on_screen_size.is_none();
            if let Some(count) = triangles {
                targets.use_triangle_count = true;
                targets.triangle_count = count;
            }
            if let Some(pixels) = on_screen_size {
                targets.use_on_screen_size = true;
                targets.on_screen_size = pixels;
            }
            let mut reduction = ReductionSettings::with_targets(targets);
            reduction.process_selection_set_name = selection;
            let mut pipeline = ReductionPipeline::default();
            pipeline.settings.simplification = SimplificationSettings::from_reduction(reduction);
            configure_mapping(&mut pipeline.settings.mapping_image, &cast, false)?;
            run(pipeline, &cast, &input, &output)?
        }
        Commands::Remesh {
            input,
            output,
            on_screen_size,
            selection,
            cast,
        } => {
            let mut pipeline = RemeshingPipeline::default();
            pipeline.settings.remeshing = RemeshingSettings {
                process_selection_set_name: selection,
                ..RemeshingSettings::with_on_screen_size(on_screen_size)
            };
            configure_mapping(&mut pipeline.settings.mapping_image, &cast, false)?;
            run(pipeline, &cast, &input, &output)?
        }
        Commands::Aggregate {
            input,
            output,
            no_merge,
            selection,
            cast,
        } => {
            let mut pipeline = AggregationPipeline::default();
            pipeline.settings.aggregation.merge_geometries = !no_merge;
            pipeline.settings.aggregation.process_selection_set_name = selection;
            configure_mapping(&mut pipeline.settings.mapping_image, &cast, false)?;
            run(pipeline, &cast, &input, &output)?
        }
        Commands::Impostor {
            input,
            output,
            mode,
            views,
            selection,
            cast,
        } => match mode {
            ImpostorMode::Flipbook => {
                let mut pipeline = FlipbookPipeline::with_flipbook(FlipbookSettings {
                    number_of_views: views,
                    ..FlipbookSettings::default()
                });
                pipeline.settings.process_selection_set_name = selection;
                configure_mapping(&mut pipeline.settings.mapping_image, &cast, true)?;
                run(pipeline, &cast, &input, &output)?
            }
            ImpostorMode::OuterShell => {
                let mut pipeline = BillboardCloudPipeline::with_billboard_cloud(BillboardCloudSettings {
                    billboard_mode: BillboardMode::OuterShell,
                    ..BillboardCloudSettings::default()
                });
                pipeline.settings.process_selection_set_name = selection;
                configure_mapping(&mut pipeline.settings.mapping_image, &cast, true)?;
                run(pipeline, &cast, &input, &output)?
            }
            ImpostorMode::Foliage => {
                let mut pipeline = BillboardCloudVegetationPipeline::default();
                pipeline.settings.process_selection_set_name = selection;
                configure_mapping(&mut pipeline.settings.mapping_image, &cast, true)?;
                run(pipeline, &cast, &input, &output)?
            }
        },
        Commands::Run {
            settings,
            input,
            output,
            output_dir,
            new_process,
        } => {
            let settings =
                load_settings(&settings).with_context(|| format!("Failed to read settings {}", settings.display()))?;
            tracing::info!("running {} pipeline", settings.name());
            let mut pipeline = SettingsPipeline::new(settings);
            if let Some(dir) = output_dir {
                pipeline = pipeline.with_output_dir(dir);
            }
            pipeline
                .run_scene_from_file(&input, &output, run_mode(new_process))
                .with_context(|| format!("Failed to process {}", input.display()))?
        }
        Commands::Batch {
            settings,
            input,
            output,
            log,
            output_dir,
        } => {
            // Errors in the processing log travel back through the log file
            run_batch(&settings, &input, &output, &log, output_dir.as_deref())
                .with_context(|| format!("Batch run of {} failed", input.display()))?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Info { input } => {
            let scene = load_scene(&input).with_context(|| format!("Failed to load {}", input.display()))?;
            print_info(&input, &scene);
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(report(&output))
}

fn run_mode(new_process: bool) -> RunMode {
    if new_process {
        RunMode::RunInNewProcess
    } else {
        RunMode::RunInThisProcess
    }
}

/// Caster for a material channel name
fn caster_for(channel: &str) -> Caster {
    match channel {
        channels::NORMALS => NormalCaster::default().into(),
        channels::OPACITY => OpacityCaster::default().into(),
        channels::DISPLACEMENT => DisplacementCaster::default().into(),
        channels::AMBIENT_OCCLUSION => AmbientOcclusionCaster::default().into(),
        other => ColorCaster::new(other).into(),
    }
}

/// Turn on the mapping image when something is cast. Impostors always map.
fn configure_mapping(mapping: &mut MappingImageSettings, cast: &CastArgs, impostor: bool) -> Result<()> {
    if cast.texture_size == Some(0) {
        bail!("--texture-size must be positive");
    }
    if cast.channels.is_empty() && !impostor {
        return Ok(());
    }
    if !impostor {
        *mapping = MappingImageSettings::with_texture_size(1024, 1024);
    }
    if let Some(size) = cast.texture_size {
        mapping.output_materials = vec![MappingImageOutputMaterialSettings::with_size(size, size)];
    }
    Ok(())
}

fn run(mut pipeline: impl Pipeline, cast: &CastArgs, input: &Path, output: &Path) -> Result<PipelineOutput> {
    for channel in &cast.channels {
        pipeline.add_material_caster(caster_for(channel), 0);
    }
    if let Some(dir) = &cast.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        pipeline = pipeline.with_output_dir(dir);
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let result = pipeline
        .run_scene_from_file(input, output, run_mode(cast.new_process))
        .with_context(|| format!("Failed to process {}", input.display()))?;
    Ok(result)
}

/// Print the log and pick the exit code
fn report(output: &PipelineOutput) -> ExitCode {
    for warning in output.log.warnings() {
        eprintln!("warning: {}", warning);
    }
    for texture in &output.textures {
        match &texture.path {
            Some(path) => println!("{} -> {}", texture.channel, path.display()),
            None => println!("{} (in memory)", texture.channel),
        }
    }
    if output.has_errors() {
        for error in output.log.errors() {
            eprintln!("error: {}", error);
        }
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_info(path: &Path, scene: &Scene) {
    println!("{}", path.display());
    println!("  nodes:     {}", scene.node_count());
    println!("  vertices:  {}", scene.vertex_count());
    println!("  triangles: {}", scene.triangle_count());

    let meshes = scene.mesh_nodes();
    println!("  meshes ({}):", meshes.len());
    for mesh in &meshes {
        let name = scene.node_path(mesh.id).unwrap_or_default();
        if let Some(geometry) = scene.geometry(mesh.id) {
            println!(
                "    {} ({} vertices, {} triangles)",
                name,
                geometry.vertex_count(),
                geometry.triangle_count()
            );
        }
    }

    println!("  materials ({}):", scene.materials.len());
    for material in scene.materials.iter() {
        let channels: Vec<&str> = material.channels.keys().map(String::as_str).collect();
        println!("    {} [{}]", material.name, channels.join(", "));
    }
    println!("  textures ({}):", scene.textures.len());
    for texture in scene.textures.iter() {
        match (&texture.file_path, &texture.image) {
            (_, Some(image)) => println!("    {} {}x{}", texture.name, image.width, image.height),
            (Some(file), None) => println!("    {} ({}, not loaded)", texture.name, file.display()),
            (None, None) => println!("    {} (missing)", texture.name),
        }
    }
    for set in scene.selection_sets.iter() {
        println!("  selection set {}: {} nodes", set.name, set.len());
    }
}
