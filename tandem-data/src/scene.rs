//! Radiance-field scene metadata (`transforms.json`).
//!
//! A scene is either a single metadata file or a directory of them. Each
//! frame's camera-to-world matrix contributes its translation as a sample,
//! so the fitting engine learns the camera rig layout.

use crate::error::DataError;
use crate::types::Point;
use glam::{Mat4, Vec3};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Deserialize, Debug)]
struct SceneFrame {
    transform_matrix: [[f32; 4]; 4],
}

#[derive(Deserialize, Debug)]
struct SceneMetadata {
    #[serde(default)]
    frames: Vec<SceneFrame>,
}

/// Metadata files that make up a scene at `path`, in load order.
pub fn scene_files(path: &Path) -> Result<Vec<PathBuf>, DataError> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let file = entry?.path();
        let is_json = file
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && file.is_file() {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Load camera positions from every metadata file of a scene.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_points_from_scene(path: &Path) -> Result<Vec<Point>, DataError> {
    let files = scene_files(path)?;
    if files.is_empty() {
        return Err(DataError::UnsupportedFormat(format!(
            "no scene metadata (*.json) in {}",
            path.display()
        )));
    }

    let mut points = Vec::new();
    for file in &files {
        let metadata: SceneMetadata = serde_json::from_reader(BufReader::new(File::open(file)?))?;
        debug!("{}: {} frames", file.display(), metadata.frames.len());
        points.extend(metadata.frames.iter().map(|frame| {
            // Rows in the file, columns in glam.
            let camera_to_world = Mat4::from_cols_array_2d(&frame.transform_matrix).transpose();
            Point::new(camera_to_world.w_axis.truncate(), Vec3::ONE)
        }));
    }

    info!("Scene parsed: {} files, {} camera frames", files.len(), points.len());
    Ok(points)
}
