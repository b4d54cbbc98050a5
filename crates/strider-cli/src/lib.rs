//! # Strider CLI
//!
//! Command-line driver for the locomotion runtime.
//!
//! ## Commands
//! - `simulate` - Walk the procedural biped over a terrain and report the motion
//! - `inspect` - Print rig chains and support classification of a clip
//! - `config` - Print the default locomotion configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use glam::{Vec2, Vec3};
use serde::Serialize;
use strider_animation::procedural::{self, GaitParams};
use strider_animation::{AnimationClip, Skeleton, biped_skeleton, idle_clip, walk_cycle_clip};
use strider_core::{Aabb, Transform};
use strider_locomotion::{AnimationType, ChainEnds, IKRig, IKRigController, LocomotionConfig, RigData};
use strider_physics::{FlatTerrain, StaticGeometry, TerrainQuery};

/// Rise per metre of the slope terrain
const SLOPE_GRADIENT: f32 = 0.08;
/// Distance ahead of the origin where the step terrain rises
const STEP_DISTANCE: f32 = 1.5;
const STEP_HEIGHT: f32 = 0.1;

/// Strider locomotion CLI
#[derive(Parser)]
#[command(name = "strider")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller over a terrain
    Simulate(SimulateArgs),

    /// Show rig chains and support frames of a clip
    Inspect {
        /// Clip to inspect
        #[arg(short, long, value_enum, default_value = "walk")]
        clip: ClipKind,
    },

    /// Print the default configuration as JSON
    Config {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Clip to play
    #[arg(short, long, value_enum, default_value = "walk")]
    pub clip: ClipKind,

    /// Terrain to walk on
    #[arg(short, long, value_enum, default_value = "flat")]
    pub terrain: TerrainKind,

    /// Number of updates
    #[arg(short, long, default_value = "90")]
    pub frames: usize,

    /// Updates per second
    #[arg(long, default_value = "30")]
    pub fps: f32,

    /// Initial heading in degrees
    #[arg(long, default_value = "0")]
    pub heading: f32,

    /// Heading change in degrees per second
    #[arg(long, default_value = "0")]
    pub turn_rate: f32,

    /// Rig scale
    #[arg(long, default_value = "1")]
    pub scale: f32,

    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Play the baked rotations without IK
    #[arg(long)]
    pub no_ik: bool,

    /// Report file; printed to stdout when absent
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ClipKind {
    Walk,
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TerrainKind {
    Flat,
    Step,
    Slope,
}

#[derive(Debug, Serialize)]
pub struct FrameSample {
    pub time: f32,
    pub frame: usize,
    pub hip: Vec3,
    pub left_target: Option<Vec3>,
    pub right_target: Option<Vec3>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub animation: String,
    pub terrain: String,
    pub ik_enabled: bool,
    pub frames: usize,
    pub distance: f32,
    pub final_position: Vec3,
    pub samples: Vec<FrameSample>,
}

#[derive(Debug, Serialize)]
pub struct ChainReport {
    pub name: String,
    pub joints: Vec<String>,
    pub opposite: Option<usize>,
    /// One character per frame, `S` for support and `-` for swing
    pub support: String,
}

#[derive(Debug, Serialize)]
pub struct RigReport {
    pub animation: String,
    pub frames: usize,
    pub rig_height: f32,
    pub chains: Vec<ChainReport>,
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::Simulate(args) => {
            log::info!("Simulating {:?} on {:?} terrain for {} frames", args.clip, args.terrain, args.frames);
            let report = simulate(&args)?;
            log::info!("Travelled {:.3}m, ended at {}", report.distance, report.final_position);
            write_json(&report, args.output.as_deref())?;
        }

        Commands::Inspect { clip } => {
            let report = inspect(clip)?;
            for chain in &report.chains {
                log::info!("{}: {}", chain.name, chain.support);
            }
            write_json(&report, None)?;
        }

        Commands::Config { output } => {
            write_json(&LocomotionConfig::default(), output.as_deref())?;
        }
    }

    Ok(())
}

/// Run the controller over a terrain and record the hip and leg targets
pub fn simulate(args: &SimulateArgs) -> Result<SimulationReport> {
    let mut settings = load_config(args.config.as_deref())?;
    if args.no_ik {
        settings.ik_enabled = false;
    }
    let terrain = build_terrain(args.terrain)?;
    let (skeleton, clip, animation_type) = biped_clip(args.clip)?;

    let mut controller = IKRigController::new(skeleton, &biped_rig_data(), settings)?;
    controller.set_heading(args.heading.to_radians());
    controller.set_angular_speed(args.turn_rate.to_radians());
    controller.set_rig_scale(args.scale);
    let index = controller.add_animation(&clip, animation_type)?;

    let dt = 1.0 / args.fps.max(1.0);
    let mut transform = Transform::IDENTITY;
    let mut samples = Vec::with_capacity(args.frames);
    let mut start = None;
    for step in 0..args.frames {
        controller
            .update(dt, index, &mut transform, terrain.as_ref())
            .with_context(|| format!("update {step} failed"))?;
        start.get_or_insert(transform.position);

        let config = controller.config(index)?;
        let target = |chain: usize| {
            config.ee_trajectories[chain]
                .target
                .as_ref()
                .map(|target| target.curve.eval_clamped(config.reproduction_time))
        };
        samples.push(FrameSample {
            time: config.reproduction_time,
            frame: config.current_frame,
            hip: transform.position,
            left_target: target(IKRig::LEFT_LEG),
            right_target: target(IKRig::RIGHT_LEG),
        });
    }

    let start = start.unwrap_or(transform.position);
    Ok(SimulationReport {
        animation: clip.name.clone(),
        terrain: format!("{:?}", args.terrain).to_lowercase(),
        ik_enabled: controller.ik_enabled(),
        frames: args.frames,
        distance: (transform.position - start).truncate().length(),
        final_position: transform.position,
        samples,
    })
}

/// Describe the rig built for the biped and the support frames of a clip
pub fn inspect(clip: ClipKind) -> Result<RigReport> {
    let (skeleton, clip, animation_type) = biped_clip(clip)?;
    let mut controller = IKRigController::new(Arc::clone(&skeleton), &biped_rig_data(), LocomotionConfig::default())?;
    let index = controller.add_animation(&clip, animation_type)?;
    let config = controller.config(index)?;
    let rig = controller.rig();

    let chains = rig
        .chains()
        .iter()
        .zip(&config.ee_trajectories)
        .map(|(chain, data)| ChainReport {
            name: chain.name.clone(),
            joints: chain
                .joints
                .iter()
                .map(|&joint| skeleton.joints()[joint].name.clone())
                .collect(),
            opposite: chain.opposite,
            support: data
                .support_frames
                .iter()
                .map(|&support| if support { 'S' } else { '-' })
                .collect(),
        })
        .collect();

    Ok(RigReport {
        animation: config.name.clone(),
        frames: config.frame_count(),
        rig_height: rig.rig_height(),
        chains,
    })
}

pub fn load_config(path: Option<&Path>) -> Result<LocomotionConfig> {
    let Some(path) = path else {
        return Ok(LocomotionConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

pub fn build_terrain(kind: TerrainKind) -> Result<Box<dyn TerrainQuery>> {
    Ok(match kind {
        TerrainKind::Flat => Box::new(FlatTerrain::new(0.0)),
        TerrainKind::Step => {
            let mut geometry = StaticGeometry::new();
            geometry.add_box(Aabb::new(Vec3::new(-50.0, -50.0, -1.0), Vec3::new(50.0, 50.0, 0.0)))?;
            geometry.add_box(Aabb::new(
                Vec3::new(-50.0, STEP_DISTANCE, 0.0),
                Vec3::new(50.0, 50.0, STEP_HEIGHT),
            ))?;
            Box::new(geometry)
        }
        TerrainKind::Slope => Box::new(|xy: Vec2| Some(xy.y.max(0.0) * SLOPE_GRADIENT)),
    })
}

fn biped_rig_data() -> RigData {
    RigData::new(
        procedural::HIPS,
        ChainEnds::new(procedural::HIPS, procedural::LEFT_FOOT),
        ChainEnds::new(procedural::HIPS, procedural::RIGHT_FOOT),
    )
    .with_feet(
        ChainEnds::new(procedural::LEFT_LOWER_LEG, procedural::LEFT_TOE),
        ChainEnds::new(procedural::RIGHT_LOWER_LEG, procedural::RIGHT_TOE),
    )
}

fn biped_clip(kind: ClipKind) -> Result<(Arc<Skeleton>, AnimationClip, AnimationType)> {
    let skeleton = Arc::new(biped_skeleton()?);
    let params = GaitParams::default();
    Ok(match kind {
        ClipKind::Walk => (
            Arc::clone(&skeleton),
            walk_cycle_clip(skeleton, &params)?,
            AnimationType::Walking,
        ),
        ClipKind::Idle => (Arc::clone(&skeleton), idle_clip(skeleton, &params)?, AnimationType::Idle),
    })
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulate_args(extra: &[&str]) -> SimulateArgs {
        let mut argv = vec!["strider", "simulate"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Simulate(args) => args,
            _ => panic!("Expected Simulate command"),
        }
    }

    #[test]
    fn test_cli_parse() {
        let args = simulate_args(&["-t", "step", "-f", "12", "--no-ik"]);
        assert_eq!(args.terrain, TerrainKind::Step);
        assert_eq!(args.clip, ClipKind::Walk);
        assert_eq!(args.frames, 12);
        assert!(args.no_ik);

        let cli = Cli::parse_from(["strider", "inspect", "-c", "idle"]);
        assert!(matches!(cli.command, Commands::Inspect { clip: ClipKind::Idle }));
    }

    #[test]
    fn test_simulate_walk_moves_forward() {
        let report = simulate(&simulate_args(&["-f", "45"])).unwrap();
        assert_eq!(report.samples.len(), 45);
        assert!(report.ik_enabled);
        assert!(report.distance > 0.5);
        assert!(report.final_position.y > 0.5);
    }

    #[test]
    fn test_simulate_idle_stays_put() {
        let report = simulate(&simulate_args(&["-c", "idle", "-f", "30", "-t", "slope"])).unwrap();
        assert!(report.distance < 0.05);
    }

    #[test]
    fn test_inspect_walk() {
        let report = inspect(ClipKind::Walk).unwrap();
        assert_eq!(report.chains.len(), 4);
        assert_eq!(report.chains[0].support.len(), report.frames);
        assert_eq!(report.chains[0].opposite, Some(1));
        assert!(report.chains[0].support.contains('S'));
        assert!(report.chains[0].support.contains('-'));
    }

    #[test]
    fn test_step_terrain() {
        let terrain = build_terrain(TerrainKind::Step).unwrap();
        assert!(terrain.terrain_height(Vec2::new(0.0, 0.0)).unwrap().abs() < 1e-5);
        let raised = terrain.terrain_height(Vec2::new(0.0, 2.0)).unwrap();
        assert!((raised - STEP_HEIGHT).abs() < 1e-5);
    }

    #[test]
    fn test_missing_config_file() {
        assert!(load_config(Some(Path::new("/nonexistent/strider.json"))).is_err());
        assert_eq!(load_config(None).unwrap(), LocomotionConfig::default());
    }
}
