//! Mesh geometry loaders for OBJ and STL files.
//!
//! Only vertex positions are kept. Faces are irrelevant to the fitting
//! engine, which treats mesh vertices as surface samples.

use crate::error::DataError;
use crate::types::Point;
use glam::Vec3;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Size of the fixed binary STL header.
const STL_HEADER_LEN: usize = 80;
/// Bytes per binary STL facet: normal, three vertices, attribute count.
const STL_FACET_LEN: usize = 50;

/// Load the vertices of a Wavefront OBJ file.
///
/// Supports the common `v x y z [r g b]` vertex-color extension.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_points_from_obj(path: &Path) -> Result<Vec<Point>, DataError> {
    let text = fs::read_to_string(path)?;
    let points = parse_obj(&text)?;
    debug!("Loaded {} vertices from OBJ file", points.len());
    Ok(points)
}

/// Load the vertices of an STL file, ASCII or binary.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_points_from_stl(path: &Path) -> Result<Vec<Point>, DataError> {
    let bytes = fs::read(path)?;
    let points = if is_ascii_stl(&bytes) {
        parse_ascii_stl(&String::from_utf8_lossy(&bytes))?
    } else {
        parse_binary_stl(&bytes)?
    };
    debug!("Loaded {} vertices from STL file", points.len());
    Ok(points)
}

fn parse_floats(
    format: &'static str,
    line: usize,
    fields: &[&str],
) -> Result<Vec<f32>, DataError> {
    fields
        .iter()
        .map(|field| {
            field.parse::<f32>().map_err(|e| DataError::Malformed {
                format,
                line,
                reason: format!("'{field}': {e}"),
            })
        })
        .collect()
}

fn parse_obj(text: &str) -> Result<Vec<Point>, DataError> {
    let mut points = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("v") {
            continue;
        }
        let rest: Vec<&str> = fields.collect();
        let values = parse_floats("OBJ", index + 1, &rest)?;
        match values.as_slice() {
            [x, y, z, r, g, b, ..] => {
                points.push(Point::new(Vec3::new(*x, *y, *z), Vec3::new(*r, *g, *b)))
            }
            [x, y, z, ..] => points.push(Point::grey(Vec3::new(*x, *y, *z))),
            _ => {
                return Err(DataError::Malformed {
                    format: "OBJ",
                    line: index + 1,
                    reason: "vertex needs at least three coordinates".to_string(),
                });
            }
        }
    }
    Ok(points)
}

fn is_ascii_stl(bytes: &[u8]) -> bool {
    // Binary exporters sometimes start their header with "solid" too.
    bytes.starts_with(b"solid")
        && bytes
            .windows(b"facet".len())
            .take(1024)
            .any(|w| w == b"facet")
}

fn parse_ascii_stl(text: &str) -> Result<Vec<Point>, DataError> {
    let mut points = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("vertex") {
            continue;
        }
        let rest: Vec<&str> = fields.collect();
        match parse_floats("STL", index + 1, &rest)?.as_slice() {
            [x, y, z] => points.push(Point::grey(Vec3::new(*x, *y, *z))),
            _ => {
                return Err(DataError::Malformed {
                    format: "STL",
                    line: index + 1,
                    reason: "vertex needs exactly three coordinates".to_string(),
                });
            }
        }
    }
    Ok(points)
}

fn parse_binary_stl(bytes: &[u8]) -> Result<Vec<Point>, DataError> {
    let malformed = |reason: String| DataError::Malformed {
        format: "STL",
        line: 0,
        reason,
    };

    let count_bytes = bytes
        .get(STL_HEADER_LEN..STL_HEADER_LEN + 4)
        .ok_or_else(|| malformed("file shorter than binary header".to_string()))?;
    let facets = u32::from_le_bytes([count_bytes[0], count_bytes[1], count_bytes[2], count_bytes[3]]) as usize;

    let body = &bytes[STL_HEADER_LEN + 4..];
    if body.len() < facets * STL_FACET_LEN {
        return Err(malformed(format!(
            "header declares {facets} facets but only {} bytes follow",
            body.len()
        )));
    }

    let read_f32 = |at: &[u8]| f32::from_le_bytes([at[0], at[1], at[2], at[3]]);
    let mut points = Vec::with_capacity(facets * 3);
    for facet in body.chunks_exact(STL_FACET_LEN).take(facets) {
        // Skip the 12-byte facet normal.
        for vertex in facet[12..48].chunks_exact(12) {
            points.push(Point::grey(Vec3::new(
                read_f32(&vertex[0..4]),
                read_f32(&vertex[4..8]),
                read_f32(&vertex[8..12]),
            )));
        }
    }
    Ok(points)
}
