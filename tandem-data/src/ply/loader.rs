//! PLY file loading functions

use crate::error::DataError;
use crate::types::Point;
use glam::Vec3;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

// Face records are parsed only so that meshes with faces deserialize.
#[derive(Deserialize, Debug)]
#[allow(dead_code)]
struct PlyFace {
    vertex_indices: Vec<i32>,
}

#[derive(Deserialize, Debug)]
struct PlyFile {
    #[serde(rename = "vertex")]
    vertex: Vec<HashMap<String, JsonValue>>,
    #[serde(default, rename = "face")]
    face: Vec<PlyFace>,
}

fn get_f32(prop: Option<&JsonValue>) -> Option<f32> {
    prop.and_then(|v| match v {
        JsonValue::Number(n) => n.as_f64().map(|f| f as f32),
        _ => None,
    })
}

fn get_u8(prop: Option<&JsonValue>) -> Option<u8> {
    prop.and_then(|v| match v {
        JsonValue::Number(n) => n
            .as_u64()
            .map(|u| u as u8)
            .or_else(|| n.as_i64().map(|i| i as u8)),
        _ => None,
    })
}

/// Load vertex positions and colors from a PLY file.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_points_from_ply(path: &Path) -> Result<Vec<Point>, DataError> {
    debug!("Loading PLY vertices from: {}", path.display());
    let reader = BufReader::new(File::open(path)?);

    let ply_data: PlyFile = serde_ply::from_reader(reader).map_err(|e| {
        warn!("Failed to parse PLY file: {}", e);
        DataError::Ply(e.to_string())
    })?;

    info!(
        "PLY file parsed: {} vertices, {} faces",
        ply_data.vertex.len(),
        ply_data.face.len()
    );

    let mut points = Vec::with_capacity(ply_data.vertex.len());
    for (i, vertex) in ply_data.vertex.iter().enumerate() {
        let coordinate = |name: &str| {
            get_f32(vertex.get(name)).ok_or_else(|| DataError::Ply(format!("Missing '{name}' at vertex {i}")))
        };
        let position = Vec3::new(coordinate("x")?, coordinate("y")?, coordinate("z")?);

        let color = if let (Some(r), Some(g), Some(b)) = (
            get_u8(vertex.get("red")),
            get_u8(vertex.get("green")),
            get_u8(vertex.get("blue")),
        ) {
            Vec3::new(r as f32, g as f32, b as f32) / 255.0
        } else {
            Vec3::splat(0.8)
        };

        points.push(Point::new(position, color));
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_ascii_ply_with_colors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.ply");
        fs::write(
            &path,
            "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\n\
             property uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n\
             0 0 0 255 0 0\n1 2 3 0 255 0\n",
        )
        .unwrap();

        let points = load_points_from_ply(&path).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(points[0].color, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_points_from_ply(&dir.path().join("absent.ply")).unwrap_err();
        assert!(matches!(err, DataError::Io(_)));
    }
}
