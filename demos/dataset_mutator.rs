//! External dataset mutator
//!
//! Plays the other side of the reload protocol: every round it takes the
//! lock, rewrites an OBJ point set, drops the change marker, and lets go.
//! Run it next to `tandem --scene <obj> --lock-file <lock>`.
//!
//! Usage:
//!   cargo run --example dataset_mutator -- <scene.obj> <lock> [marker] [rounds]

use glam::Vec3;
use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tandem_data::{Dataset, OperatingMode};
use tandem_train::LockCoordinator;
use tandem_train::reload::default_marker_path;
use tracing::{info, warn};

const POINTS_PER_ROUND: usize = 512;
const ROUND_INTERVAL: Duration = Duration::from_secs(2);
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Points on a sphere whose radius changes from round to round.
fn sphere_obj(round: u32) -> String {
    let radius = 1.0 + 0.25 * (round as f32 * 0.7).sin();
    let mut obj = format!("# round {round}\n");
    for i in 0..POINTS_PER_ROUND {
        let t = (i as f32 + 0.5) / POINTS_PER_ROUND as f32;
        let y = 1.0 - 2.0 * t;
        let ring = (1.0 - y * y).sqrt();
        let angle = i as f32 * 2.399_963;
        let p = Vec3::new(ring * angle.cos(), y, ring * angle.sin()) * radius;
        let _ = writeln!(obj, "v {} {} {}", p.x, p.y, p.z);
    }
    obj
}

fn write_round(scene: &Path, marker: &Path, round: u32) -> Result<(), Box<dyn Error>> {
    fs::write(scene, sphere_obj(round))?;
    // Make sure what we wrote parses before announcing it.
    let dataset = Dataset::load(OperatingMode::Sdf, scene)?;
    fs::write(marker, format!("{round}\n"))?;
    info!("Round {}: wrote {} points", round, dataset.len());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(scene), Some(lock)) = (args.next().map(PathBuf::from), args.next().map(PathBuf::from)) else {
        return Err("usage: dataset_mutator <scene.obj> <lock> [marker] [rounds]".into());
    };
    let marker = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_marker_path(&lock));
    let rounds: u32 = args.next().map(|r| r.parse()).transpose()?.unwrap_or(10);

    let coordinator = LockCoordinator::new(&lock);
    for round in 0..rounds {
        let handle = loop {
            match coordinator.try_acquire()? {
                Some(handle) => break handle,
                None => thread::sleep(RETRY_INTERVAL),
            }
        };

        if marker.exists() {
            warn!("Previous round not consumed yet, overwriting it");
        }
        let result = write_round(&scene, &marker, round);
        handle.release();
        result?;

        thread::sleep(ROUND_INTERVAL);
    }

    info!("Done after {} rounds", rounds);
    Ok(())
}
