//! Strand Stack - command line entry point
//!
//! `demo` writes a sample groom description; `eval` evaluates a description on
//! a generated plane mesh and prints a JSON summary, optionally exporting the
//! displayed strands as an archive.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use strand_stack::core::types::Space;
use strand_stack::lod::LodState;
use strand_stack::mesh::Mesh;
use strand_stack::operators::{
    FrizzParams, GroundStrandsParams, GuidesFromMeshParams, HairFromGuidesParams, LengthParams,
    OperatorParams,
};
use strand_stack::roots::{DistributionMethod, RootSettings};
use strand_stack::serialize::{export_store, ExportOptions, GroomDescription};
use strand_stack::{EngineConfig, EngineContext, Groom, Result};

#[derive(Parser, Debug)]
#[command(name = "strand-stack")]
#[command(about = "Evaluate procedural hair strand stacks")]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a sample groom description
    Demo {
        /// Output path
        #[arg(long, default_value = "demo.groom.json")]
        output: PathBuf,

        /// Final hair count
        #[arg(long, default_value_t = 1000)]
        hair_count: usize,

        /// Distribution seed
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
    /// Evaluate a groom description on a plane mesh
    Eval {
        /// Groom description path
        groom: PathBuf,

        /// Side length of the distribution plane
        #[arg(long, default_value_t = 2.0)]
        plane_size: f32,

        /// Quads per side of the distribution plane
        #[arg(long, default_value_t = 8)]
        plane_segments: u32,

        /// Evaluate the render subset instead of the viewport subset
        #[arg(long)]
        render: bool,

        /// Viewport display fraction
        #[arg(long)]
        fraction: Option<f32>,

        /// Export displayed strands to this archive
        #[arg(long)]
        export: Option<PathBuf>,

        /// Coordinate space of exported points
        #[arg(long, value_enum, default_value = "object")]
        space: SpaceArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SpaceArg {
    Object,
    World,
}

impl From<SpaceArg> for Space {
    fn from(arg: SpaceArg) -> Self {
        match arg {
            SpaceArg::Object => Space::Object,
            SpaceArg::World => Space::World,
        }
    }
}

/// JSON summary printed by `eval`
#[derive(Serialize)]
struct EvalSummary {
    groom: String,
    operators: usize,
    kind: &'static str,
    lod: String,
    strands: usize,
    vertices: usize,
    render_strands: usize,
}

fn demo_description(hair_count: usize, seed: u64) -> Result<GroomDescription> {
    let engine = EngineContext::with_defaults();
    let mut groom = Groom::new(engine, "demo")?;
    let guides = groom.add_operator(
        "guides",
        OperatorParams::GuidesFromMesh(GuidesFromMeshParams {
            roots: RootSettings {
                method: DistributionMethod::Even,
                count: 64,
                seed,
                ..RootSettings::default()
            },
            length: 0.5,
            ..GuidesFromMeshParams::default()
        }),
        None,
    )?;
    let length = groom.add_operator(
        "length",
        OperatorParams::Length(LengthParams {
            randomness: 0.25,
            seed,
            ..LengthParams::default()
        }),
        Some(guides),
    )?;
    let hair = groom.add_operator(
        "hair",
        OperatorParams::HairFromGuides(HairFromGuidesParams {
            roots: RootSettings {
                count: hair_count,
                seed,
                ..RootSettings::default()
            },
            ..HairFromGuidesParams::default()
        }),
        Some(length),
    )?;
    let frizz = groom.add_operator(
        "frizz",
        OperatorParams::Frizz(FrizzParams {
            amount: 0.02,
            seed,
            ..FrizzParams::default()
        }),
        Some(hair),
    )?;
    groom.add_operator(
        "ground",
        OperatorParams::GroundStrands(GroundStrandsParams::default()),
        Some(frizz),
    )?;
    groom.describe()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strand_stack=info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let engine = EngineContext::init(config)?;

    match args.command {
        Command::Demo {
            output,
            hair_count,
            seed,
        } => {
            let description = demo_description(hair_count, seed)?;
            description.save(&output)?;
            println!("Groom description written to {}", output.display());
        }
        Command::Eval {
            groom,
            plane_size,
            plane_segments,
            render,
            fraction,
            export,
            space,
        } => {
            let mut groom = Groom::load(Arc::clone(&engine), &groom)?;
            groom.set_mesh("distribution", Arc::new(Mesh::plane(plane_size, plane_segments)));
            groom.set_rendering(render);
            if let Some(fraction) = fraction {
                groom.set_viewport_fraction(fraction);
            }

            let shown = groom.evaluate()?;
            let render_strands = match groom.graph().outputs().next() {
                Some((output, _)) => groom.evaluate_full(output)?.strand_count(),
                None => 0,
            };
            let lod = match groom.lod_state() {
                LodState::Viewport { fraction } => format!("viewport {:.3}", fraction),
                LodState::Render => "render".to_string(),
                LodState::Isolated { ids, .. } => format!("isolated {}", ids.len()),
                LodState::Culled { visibility_rate } => format!("culled {:.3}", visibility_rate),
            };
            let summary = EvalSummary {
                groom: groom.name().to_string(),
                operators: groom.graph().len(),
                kind: shown.kind().label(),
                lod,
                strands: shown.strand_count(),
                vertices: shown.vertex_count(),
                render_strands,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if let Some(path) = export {
                let options = ExportOptions {
                    space: space.into(),
                    root_uvs: true,
                    ..ExportOptions::default()
                };
                let mesh = groom.sources().mesh("distribution");
                export_store(&shown, options, mesh).save(&path)?;
                println!("Strand archive written to {}", path.display());
            }
        }
    }

    engine.shutdown();
    Ok(())
}
