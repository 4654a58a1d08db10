use clap::Parser;
use smoke_design_core::grid::{format_density, load_density};
use smoke_design_core::{InitialVelocity, Optimizer, PassKind, ScalarField2D, SimulationConfig};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Smoke inverse-design demo with configurable parameters
#[derive(Parser, Debug)]
#[command(name = "smoke-design-demo")]
#[command(
    about = "Optimize an initial velocity that carries smoke onto a target shape",
    long_about = None
)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial density grid (n lines of n floats in [0, 1])
    #[arg(long)]
    init: Option<PathBuf>,

    /// Target density grid (same format as --init)
    #[arg(long)]
    target: Option<PathBuf>,

    /// Grid resolution n (also sets grid spacing to 1/n)
    #[arg(short = 'n', long)]
    resolution: Option<usize>,

    /// Outer gradient-descent iterations
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Time steps per forward pass
    #[arg(short, long)]
    steps: Option<usize>,

    /// Jacobi sweeps per pressure solve
    #[arg(short = 'k', long)]
    sweeps: Option<usize>,

    /// Gradient-descent learning rate
    #[arg(short, long)]
    learning_rate: Option<f32>,

    /// Start every step's pressure solve from zero instead of the previous
    /// step's result
    #[arg(long)]
    cold_start: bool,

    /// Seed the initial velocity with uniform noise of this amplitude
    #[arg(long)]
    random_amplitude: Option<f32>,

    /// RNG seed for --random-amplitude
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Print a mass line every this many steps of the final pass (0 = off)
    #[arg(short, long, default_value_t = 10)]
    report_interval: usize,

    /// Write the optimized final density to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(args: &Args) -> Result<SimulationConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        }
        None => SimulationConfig::default(),
    };

    if let Some(n) = args.resolution {
        config.resolution = n;
        config.grid_spacing = SimulationConfig::with_resolution(n).grid_spacing;
    }
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(sweeps) = args.sweeps {
        config.relaxation_sweeps = sweeps;
    }
    if let Some(lr) = args.learning_rate {
        config.learning_rate = lr;
    }
    if args.cold_start {
        config.warm_start_pressure = false;
    }
    if let Some(amplitude) = args.random_amplitude {
        config.initial_velocity = InitialVelocity::Random {
            amplitude,
            seed: args.seed,
        };
    }

    config.validate()?;
    Ok(config)
}

/// Soft-edged disc of density 1 centered at `(row, col)`
fn disc(n: usize, center: (f32, f32), radius: f32) -> ScalarField2D {
    ScalarField2D::from_fn(n, |r, c| {
        let dr = r as f32 - center.0;
        let dc = c as f32 - center.1;
        let d = (dr * dr + dc * dc).sqrt();
        (radius + 0.5 - d).clamp(0.0, 1.0)
    })
}

fn load_or(
    path: Option<&Path>,
    n: usize,
    fallback: impl FnOnce() -> ScalarField2D,
) -> Result<ScalarField2D, Box<dyn Error>> {
    match path {
        Some(path) => Ok(load_density(path, n)?),
        None => Ok(fallback()),
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    println!("=== Smoke Inverse-Design Demo ===\n");

    let config = build_config(args)?;
    let n = config.resolution;
    let nf = n as f32;
    println!(
        "Grid {}x{} (dx = {:.4}), {} steps, {} sweeps, {} iterations at lr {}",
        n,
        n,
        config.grid_spacing,
        config.steps,
        config.relaxation_sweeps,
        config.iterations,
        config.learning_rate
    );
    println!("Initial velocity: {:?}", config.initial_velocity);
    if !config.warm_start_pressure {
        println!("Pressure solve cold-started every step");
    }

    let initial = load_or(args.init.as_deref(), n, || disc(n, (nf * 0.35, nf * 0.5), nf * 0.15))?;
    let target = load_or(args.target.as_deref(), n, || disc(n, (nf * 0.6, nf * 0.45), nf * 0.15))?;
    println!(
        "Initial mass {:.2}, target mass {:.2}\n",
        initial.sum(),
        target.sum()
    );

    let mut optimizer = Optimizer::new(config, initial, target)?;

    println!("Iter |     Loss     |   |grad|   | Time (ms)");
    println!("-----|--------------|------------|----------");
    let reports = optimizer.run(
        |report| {
            println!(
                "{:4} | {:12.6e} | {:10.3e} | {:9.1}",
                report.iteration,
                report.loss,
                report.gradient_norm,
                report.elapsed.as_secs_f64() * 1000.0
            );
        },
        None,
    )?;

    let interval = args.report_interval;
    let mut mass_report = |pass: PassKind, step: usize, density: &ScalarField2D| {
        if pass == PassKind::Final && interval > 0 && step % interval == 0 {
            println!("  step {:4}: mass {:.4}", step, density.sum());
        }
    };
    println!("\nFinal pass:");
    let final_loss = optimizer.final_pass(Some(&mut mass_report))?;

    println!("\n=== Optimization Complete ===");
    if let Some(first) = reports.first() {
        println!("Initial loss: {:.6e}", first.loss);
    }
    println!("Final loss:   {:.6e}", final_loss);
    if let Some(stats) = optimizer.state().stats() {
        println!(
            "Divergence before/after projection: {:.3e} / {:.3e}",
            stats.divergence_before, stats.divergence_after
        );
    }

    if let Some(path) = &args.output {
        std::fs::write(path, format_density(optimizer.state().final_density()))?;
        println!("Wrote final density to {}", path.display());
    }
    Ok(())
}
