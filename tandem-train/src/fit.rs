//! Reference engine: fits a set of splats to dataset samples.
//!
//! Each step draws a deterministic minibatch of samples, assigns every
//! sample to its nearest splat, and pulls that splat towards the sample.
//! The loss is the mean squared distance of the minibatch to its nearest
//! splats, measured before the update. Samples are normalized into the unit
//! cube so the loss scale does not depend on the dataset's units.

use crate::engine::{Engine, EngineError, StepResult};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tandem_data::{Dataset, OperatingMode, Point};
use tracing::{debug, info};

/// Multiplier that walks the dataset in a scattered but repeatable order.
const SAMPLE_STRIDE_PRIME: usize = 7919;
/// Golden angle in radians, used to spread initial splats on a spiral.
const GOLDEN_ANGLE: f32 = 2.399_963;

/// A fitted primitive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Splat {
    /// Center in normalized dataset space.
    pub position: Vec3,
    /// RGB color (linear, 0-1 range).
    pub color: Vec3,
    /// Running estimate of the distance to assigned samples.
    pub radius: f32,
}

/// Engine hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    pub splat_count: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Stop after this many training steps.
    pub n_steps: Option<u64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            splat_count: 64,
            batch_size: 256,
            learning_rate: 0.05,
            n_steps: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    mode: OperatingMode,
    step: u64,
    splats: Vec<Splat>,
}

/// Online nearest-splat fitting engine.
pub struct SplatFitEngine {
    config: FitConfig,
    mode: OperatingMode,
    samples: Vec<Point>,
    splats: Vec<Splat>,
    step: u64,
    training: bool,
}

impl SplatFitEngine {
    /// Load the dataset at `path` and place the initial splats.
    pub fn load(mode: OperatingMode, path: &Path, config: FitConfig) -> Result<Self, EngineError> {
        let dataset = Dataset::load(mode, path)?;
        Ok(Self::from_dataset(&dataset, config))
    }

    pub fn from_dataset(dataset: &Dataset, config: FitConfig) -> Self {
        let samples = normalized_samples(dataset);
        let splats = initial_splats(config.splat_count.max(1), &samples);
        info!(
            "Fitting {} splats to {} samples ({})",
            splats.len(),
            samples.len(),
            dataset.mode()
        );
        Self {
            config,
            mode: dataset.mode(),
            samples,
            splats,
            step: 0,
            training: true,
        }
    }

    pub fn splats(&self) -> &[Splat] {
        &self.splats
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn training_step(&self) -> u64 {
        self.step
    }

    fn budget_exhausted(&self) -> bool {
        self.config.n_steps.is_some_and(|n| self.step >= n)
    }

    fn batch_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.samples.len();
        let batch = self.config.batch_size.max(1);
        let base = self.step as usize * batch;
        (0..batch).map(move |i| (base + i).wrapping_mul(SAMPLE_STRIDE_PRIME) % n)
    }

    fn nearest_splat(&self, position: Vec3) -> (usize, f32) {
        self.splats
            .iter()
            .enumerate()
            .map(|(i, splat)| (i, splat.position.distance_squared(position)))
            .fold((0, f32::INFINITY), |best, candidate| {
                if candidate.1 < best.1 { candidate } else { best }
            })
    }

    fn minibatch(&mut self, update: bool) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let indices: Vec<usize> = self.batch_indices().collect();
        let lr = self.config.learning_rate;
        let mut total = 0.0;

        for &index in &indices {
            let sample = self.samples[index];
            let (nearest, dist_sq) = self.nearest_splat(sample.position);
            total += dist_sq;

            if update {
                let splat = &mut self.splats[nearest];
                splat.position += (sample.position - splat.position) * lr;
                splat.color += (sample.color - splat.color) * lr;
                splat.radius += (dist_sq.sqrt() - splat.radius) * lr;
            }
        }

        total / indices.len() as f32
    }
}

impl Engine for SplatFitEngine {
    fn step(&mut self) -> Result<StepResult, EngineError> {
        if !self.training {
            // Nothing changes without training, so one evaluation is enough.
            let loss = self.minibatch(false);
            return Ok(StepResult {
                keep_running: false,
                loss,
                iteration: self.step,
            });
        }

        let loss = self.minibatch(true);
        if !loss.is_finite() {
            return Err(EngineError::Diverged {
                iteration: self.step,
                loss,
            });
        }
        self.step += 1;

        Ok(StepResult {
            keep_running: !self.budget_exhausted(),
            loss,
            iteration: self.step,
        })
    }

    fn reload_dataset(&mut self, path: &Path) -> Result<(), EngineError> {
        let dataset = Dataset::load(self.mode, path)?;
        self.samples = normalized_samples(&dataset);
        debug!("Reloaded {} samples; keeping {} splats", self.samples.len(), self.splats.len());
        Ok(())
    }

    fn set_training(&mut self, enabled: bool) {
        self.training = enabled;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn save_snapshot(&self, path: &Path) -> Result<(), EngineError> {
        let snapshot = Snapshot {
            mode: self.mode,
            step: self.step,
            splats: self.splats.clone(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()?;
        info!("Saved snapshot at step {} to {}", self.step, path.display());
        Ok(())
    }

    fn load_snapshot(&mut self, path: &Path) -> Result<(), EngineError> {
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        if snapshot.mode != self.mode {
            return Err(EngineError::SnapshotMismatch(format!(
                "snapshot was trained in {} mode, engine runs in {} mode",
                snapshot.mode, self.mode
            )));
        }
        if snapshot.splats.is_empty() {
            return Err(EngineError::SnapshotMismatch("snapshot has no splats".to_string()));
        }
        self.splats = snapshot.splats;
        self.step = snapshot.step;
        info!("Loaded snapshot at step {} from {}", self.step, path.display());
        Ok(())
    }
}

fn normalized_samples(dataset: &Dataset) -> Vec<Point> {
    match dataset.bounds() {
        Some(bounds) => dataset
            .points()
            .iter()
            .map(|p| Point::new(bounds.normalize(p.position), p.color))
            .collect(),
        None => Vec::new(),
    }
}

/// Splats on a small spiral around the sample centroid.
fn initial_splats(count: usize, samples: &[Point]) -> Vec<Splat> {
    let centroid = if samples.is_empty() {
        Vec3::ZERO
    } else {
        samples.iter().map(|p| p.position).sum::<Vec3>() / samples.len() as f32
    };

    (0..count)
        .map(|i| {
            let t = (i as f32 + 0.5) / count as f32;
            let angle = i as f32 * GOLDEN_ANGLE;
            let ring = (1.0 - (2.0 * t - 1.0).powi(2)).sqrt();
            let offset = Vec3::new(ring * angle.cos(), 2.0 * t - 1.0, ring * angle.sin()) * 0.1;
            Splat {
                position: centroid + offset,
                color: Vec3::splat(0.5),
                radius: 0.1,
            }
        })
        .collect()
}
