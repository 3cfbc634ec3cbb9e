//! Dataset loading dispatched on operating mode.

use crate::error::DataError;
use crate::mesh::{load_points_from_obj, load_points_from_stl};
use crate::mode::OperatingMode;
use crate::ply::load_points_from_ply;
use crate::raster::load_points_from_image;
use crate::scene::load_points_from_scene;
use crate::types::{Bounds, Point};
use std::path::{Path, PathBuf};
use tracing::info;

/// Samples loaded from a scene path for one operating mode.
#[derive(Debug, Clone)]
pub struct Dataset {
    mode: OperatingMode,
    path: PathBuf,
    points: Vec<Point>,
}

impl Dataset {
    /// Build a dataset from already-loaded samples.
    pub fn from_points(mode: OperatingMode, path: impl Into<PathBuf>, points: Vec<Point>) -> Self {
        Self {
            mode,
            path: path.into(),
            points,
        }
    }

    /// Load the dataset at `path` with the loader for `mode`.
    #[tracing::instrument(skip_all, fields(path = %path.display(), mode = %mode))]
    pub fn load(mode: OperatingMode, path: &Path) -> Result<Self, DataError> {
        if !path.exists() {
            return Err(DataError::NotFound(path.to_path_buf()));
        }

        let points = match mode {
            OperatingMode::Nerf => load_points_from_scene(path)?,
            OperatingMode::Sdf => load_mesh(path)?,
            OperatingMode::Volume => {
                return Err(DataError::UnsupportedFormat(
                    "NanoVDB volume grids are not supported by the built-in loaders".to_string(),
                ));
            }
            OperatingMode::Image => load_points_from_image(path)?,
        };

        if points.is_empty() {
            return Err(DataError::Empty(path.to_path_buf()));
        }

        info!("Loaded {} samples", points.len());
        Ok(Self::from_points(mode, path, points))
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::of(&self.points)
    }
}

fn load_mesh(path: &Path) -> Result<Vec<Point>, DataError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "obj" => load_points_from_obj(path),
        "stl" => load_points_from_stl(path),
        "ply" => load_points_from_ply(path),
        other => Err(DataError::UnsupportedFormat(format!("mesh extension '{other}'"))),
    }
}
