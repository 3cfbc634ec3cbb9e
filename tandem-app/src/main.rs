//! Tandem
//!
//! Trains on a scene while an external process may rewrite it. Reloads are
//! coordinated through an advisory lock file and a change marker.

mod app;

use app::{LoggingConfig, RunBuilder};
use clap::Parser;
use std::path::PathBuf;
use tandem_train::FitConfig;

/// Tandem - training loop with coordinated dataset reloads
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scene to train on: a directory or .json (nerf), .obj/.stl/.ply (sdf),
    /// .nvdb (volume), or an image
    #[arg(short, long)]
    scene: Option<PathBuf>,

    /// Operating mode (nerf, sdf, volume, image); inferred from the scene if omitted
    #[arg(short, long)]
    mode: Option<String>,

    /// Lock file shared with the process that rewrites the scene
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Change marker written by that process [default: <lock_file>.changed]
    #[arg(long)]
    marker: Option<PathBuf>,

    /// Train the model (default)
    #[arg(long, overrides_with = "no_train")]
    train: bool,

    /// Only evaluate the loaded model
    #[arg(long)]
    no_train: bool,

    /// Stop after this many training steps
    #[arg(long)]
    n_steps: Option<u64>,

    /// Loss window used for the convergence test
    #[arg(long, default_value_t = 32)]
    window: usize,

    /// Dispersion threshold below which training counts as converged
    #[arg(long, default_value_t = 0.1)]
    threshold: f32,

    /// Load a snapshot before training
    #[arg(long)]
    load_snapshot: Option<PathBuf>,

    /// Save a snapshot after training
    #[arg(long)]
    save_snapshot: Option<PathBuf>,

    /// Number of splats fitted by the built-in engine
    #[arg(long, default_value_t = 64)]
    splats: usize,

    /// Samples per training step
    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Learning rate of the built-in engine
    #[arg(long, default_value_t = 0.05)]
    learning_rate: f32,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Send traces to Tracy (requires the `tracy` feature)
    #[arg(long)]
    tracy: bool,
}

fn main() {
    let args = Args::parse();

    let fit = FitConfig {
        splat_count: args.splats,
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        n_steps: args.n_steps,
    };

    let mut builder = RunBuilder::new()
        .with_training(args.train || !args.no_train)
        .with_window(args.window)
        .with_threshold(args.threshold)
        .with_fit_config(fit)
        .with_logging(LoggingConfig {
            level: args.log_level,
            enable_tracy: args.tracy,
        });
    if let Some(scene) = args.scene {
        builder = builder.with_scene(scene);
    }
    if let Some(mode) = args.mode {
        builder = builder.with_mode(mode);
    }
    if let Some(lock) = args.lock_file {
        builder = builder.with_lock_file(lock);
    }
    if let Some(marker) = args.marker {
        builder = builder.with_marker(marker);
    }
    if let Some(path) = args.load_snapshot {
        builder = builder.with_load_snapshot(path);
    }
    if let Some(path) = args.save_snapshot {
        builder = builder.with_save_snapshot(path);
    }

    if let Err(e) = builder.run() {
        eprintln!("tandem: {}", e);
        std::process::exit(1);
    }
}
