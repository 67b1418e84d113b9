// ============================================================================
// latentdrag CLI — headless drag runs from the command line
// ============================================================================
//
// Usage examples:
//   latentdrag --point 128,96 --target 128,160 --output-dir frames/
//   latentdrag -m procedural-128 --seed 7 -p 40,40 -t 70,40 --gif drag.gif
//   latentdrag -p 100,100 -t 150,100 --steps 50 --save-session s.lds
//   latentdrag --resume s.lds --steps 200 --gif rest.gif
//   latentdrag --list-models
//
// Every step renders one frame; the run ends when all handle points reach
// their targets or the step limit is hit.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::config::{NoiseMode, Point, RenderArgs};
use crate::io::{encode_animated_gif, frame_path, load_snapshot, save_png_frame, save_snapshot};
use crate::models::PRETRAINED_MODELS;
use crate::renderer::{RenderResult, Renderer};
use crate::resources::Resources;
use crate::{log_info, logger};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Drag points on a generated image by optimising the latent code.
#[derive(Parser, Debug)]
#[command(
    name = "latentdrag",
    about = "Headless latent-space drag editing",
    long_about = "Move handle points of a generated image toward target points by\n\
                  optimising the generator's latent code, writing every step as a frame.\n\n\
                  Example:\n  \
                  latentdrag -p 128,96 -t 128,160 --output-dir frames/ --gif drag.gif"
)]
pub struct CliArgs {
    /// Model identifier: a pretrained name (see --list-models), a checkpoint
    /// path or URL, or procedural[-RES].
    #[arg(short, long, default_value = "procedural")]
    pub model: String,

    /// Seed for the initial latent.
    #[arg(short, long, default_value_t = 0)]
    pub seed: u64,

    /// Handle point as ROW,COL. Repeat for several points.
    #[arg(short, long = "point", value_name = "ROW,COL", value_parser = parse_point)]
    pub points: Vec<Point>,

    /// Target point as ROW,COL, one per --point, in the same order.
    #[arg(short, long = "target", value_name = "ROW,COL", value_parser = parse_point)]
    pub targets: Vec<Point>,

    /// Maximum number of drag steps.
    #[arg(long, default_value_t = 300)]
    pub steps: usize,

    #[arg(long, default_value_t = 0.001)]
    pub lr: f32,

    /// Optimise one shared latent instead of one per synthesis layer.
    #[arg(long)]
    pub shared_latent: bool,

    /// Motion neighbourhood radius (relative to a 512px image).
    #[arg(long, default_value_t = 3.0)]
    pub r1: f32,

    /// Tracking search radius (relative to a 512px image).
    #[arg(long, default_value_t = 12.0)]
    pub r2: f32,

    /// Synthesis layer whose features drive tracking and motion.
    #[arg(long, default_value_t = 5)]
    pub feature_idx: usize,

    /// Latent regularisation weight.
    #[arg(long, default_value_t = 0.0)]
    pub reg: f32,

    #[arg(long, default_value_t = 0.7)]
    pub trunc_psi: f32,

    /// Noise mode: const, random, none.
    #[arg(long, default_value = "const", value_parser = parse_noise_mode)]
    pub noise_mode: NoiseMode,

    /// Write every frame as frame_NNNNN.png into this directory.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Write the whole drag as an animated GIF.
    #[arg(long, value_name = "FILE.gif")]
    pub gif: Option<PathBuf>,

    /// GIF playback speed.
    #[arg(long, default_value_t = 10.0)]
    pub fps: f32,

    /// Save the session (latents, points, targets) when the run ends.
    #[arg(long, value_name = "FILE")]
    pub save_session: Option<PathBuf>,

    /// Resume from a saved session. Points and targets come from the file
    /// unless given on the command line.
    #[arg(long, value_name = "FILE")]
    pub resume: Option<PathBuf>,

    /// Log file location (default: the platform data directory).
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Print per-step progress and mirror the log to stderr.
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the pretrained model table and exit.
    #[arg(long)]
    pub list_models: bool,
}

impl CliArgs {
    fn render_args(&self) -> RenderArgs {
        RenderArgs {
            model: self.model.clone(),
            w0_seed: self.seed,
            w_plus: !self.shared_latent,
            noise_mode: self.noise_mode,
            trunc_psi: self.trunc_psi,
            lr: self.lr,
            points: self.points.clone(),
            targets: self.targets.clone(),
            reg: self.reg,
            feature_idx: self.feature_idx,
            r1: self.r1,
            r2: self.r2,
            ..RenderArgs::default()
        }
    }
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (row, col) = s
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got '{}'", s))?;
    let row = row.trim().parse().map_err(|e| format!("bad row in '{}': {}", s, e))?;
    let col = col.trim().parse().map_err(|e| format!("bad column in '{}': {}", s, e))?;
    Ok(Point::new(row, col))
}

fn parse_noise_mode(s: &str) -> Result<NoiseMode, String> {
    NoiseMode::parse(s).ok_or_else(|| format!("unknown noise mode '{}' (const, random, none)", s))
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one headless drag and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    match &args.log {
        Some(path) => logger::init_at(path),
        None => logger::init(),
    }
    logger::set_echo(args.verbose);

    if args.list_models {
        for m in PRETRAINED_MODELS {
            println!("{:<10} {:>4}px features  {}", m.name, m.features_extractor_size, m.url);
        }
        println!("{:<10} built-in analytic generator (procedural-RES, RES a power of two 32..=1024)", "procedural");
        return ExitCode::SUCCESS;
    }

    let mut render_args = args.render_args();
    let mut renderer = Renderer::new(Resources::shared());

    if let Some(path) = &args.resume {
        let snapshot = match load_snapshot(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: could not read session '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = renderer.restore(&snapshot, &render_args) {
            eprintln!("error: could not restore session '{}': {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        render_args.model = snapshot.key.model.clone();
        render_args.w0_seed = snapshot.key.seed;
        render_args.w_plus = snapshot.key.w_plus;
        render_args.lr = snapshot.lr;
        if render_args.points.is_empty() {
            render_args.points = snapshot.points.clone();
            render_args.targets = snapshot.targets.clone();
        }
    }

    if render_args.points.len() != render_args.targets.len() {
        eprintln!(
            "error: {} --point values but {} --target values",
            render_args.points.len(),
            render_args.targets.len()
        );
        return ExitCode::FAILURE;
    }
    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let start = Instant::now();
    let dragging = !render_args.points.is_empty();
    render_args.is_drag = dragging;
    let max_steps = if dragging { args.steps.max(1) } else { 1 };

    let mut frames = Vec::new();
    let mut converged = false;
    for step in 0..max_steps {
        let res = renderer.render(&render_args);
        if res.init_net {
            report_network(&res);
        }
        if let Some(err) = &res.error
            && res.image.is_none()
        {
            eprintln!("error: step {}: {}", step, err);
            return ExitCode::FAILURE;
        } else if let Some(err) = &res.error {
            eprintln!("warning: {}", err);
        }

        let Some(frame) = res.image else { break };
        if let Some(dir) = &args.output_dir
            && let Err(e) = save_png_frame(&frame, &frame_path(dir, step))
        {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
        if args.gif.is_some() {
            frames.push(frame);
        }

        if let Some(points) = res.points {
            if args.verbose {
                let shown: Vec<String> = points.iter().map(Point::to_string).collect();
                println!(
                    "step {:>4}  loss {:>10.5}  points {}",
                    step,
                    res.loss.unwrap_or(0.0),
                    shown.join(" ")
                );
            }
            render_args.points = points;
        }
        if res.stop == Some(true) {
            converged = true;
            break;
        }
    }

    if dragging {
        let steps = renderer.session().map(|s| s.optimizer_steps()).unwrap_or(0);
        println!(
            "{} after {} optimizer steps in {:.2}s",
            if converged { "converged" } else { "stopped at step limit" },
            steps,
            start.elapsed().as_secs_f64()
        );
        log_info!("Drag finished: converged={} steps={}", converged, steps);
    }

    if let Some(path) = &args.gif {
        if let Err(e) = encode_animated_gif(&frames, args.fps, path) {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
        println!("wrote {} frames to {}", frames.len(), path.display());
    }

    if let Some(path) = &args.save_session {
        let Some(snapshot) = renderer.snapshot(&render_args.targets) else {
            eprintln!("error: no session to save");
            return ExitCode::FAILURE;
        };
        if let Err(e) = save_snapshot(&snapshot, path) {
            eprintln!("error: could not save session '{}': {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn report_network(res: &RenderResult) {
    if let (Some(resolution), Some(num_ws)) = (res.img_resolution, res.num_ws) {
        log_info!(
            "Network ready: {}px, {} ws, noise={}, input transform={}",
            resolution,
            num_ws,
            res.has_noise.unwrap_or(false),
            res.has_input_transform.unwrap_or(false)
        );
    }
}
