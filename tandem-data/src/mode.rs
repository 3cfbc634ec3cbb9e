//! Operating mode selection.
//!
//! The mode is either given explicitly by name or inferred from the shape of
//! the scene path: directories and metadata files are radiance-field scenes,
//! mesh files are signed-distance targets, NanoVDB grids are volumes, and
//! anything else is treated as an image.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Extensions that mark a scene metadata file.
const METADATA_EXTENSIONS: &[&str] = &["json"];
/// Extensions that mark mesh geometry.
const MESH_EXTENSIONS: &[&str] = &["obj", "stl", "ply"];
/// Extensions that mark a volumetric grid.
const VOLUME_EXTENSIONS: &[&str] = &["nvdb"];

/// Training domain, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Radiance field from posed camera frames.
    Nerf,
    /// Signed distance field from mesh geometry.
    Sdf,
    /// Volumetric density grid.
    Volume,
    /// Single 2D image.
    Image,
}

impl OperatingMode {
    /// Get all available modes.
    pub fn all() -> &'static [OperatingMode] {
        &[
            OperatingMode::Nerf,
            OperatingMode::Sdf,
            OperatingMode::Volume,
            OperatingMode::Image,
        ]
    }

    /// Lowercase name accepted on the command line.
    pub fn name(self) -> &'static str {
        match self {
            OperatingMode::Nerf => "nerf",
            OperatingMode::Sdf => "sdf",
            OperatingMode::Volume => "volume",
            OperatingMode::Image => "image",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatingMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperatingMode::all()
            .iter()
            .copied()
            .find(|mode| mode.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModeError::InvalidMode(s.to_string()))
    }
}

/// Errors raised while resolving the operating mode at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("Unknown mode '{0}' (expected one of: nerf, sdf, volume, image)")]
    InvalidMode(String),

    #[error("Must specify either a mode or a scene path")]
    MissingInput,

    #[error("Scene path does not exist: {0}")]
    PathNotFound(PathBuf),
}

/// Resolve the operating mode from an explicit name and/or a scene path.
///
/// A supplied path must exist even when the mode is explicit, since the
/// loop reads from it before the first iteration.
pub fn resolve_mode(explicit: Option<&str>, scene: Option<&Path>) -> Result<OperatingMode, ModeError> {
    if let Some(path) = scene {
        if !path.exists() {
            return Err(ModeError::PathNotFound(path.to_path_buf()));
        }
    }

    match (explicit, scene) {
        (Some(name), _) => name.parse(),
        (None, Some(path)) => Ok(mode_from_path(path)),
        (None, None) => Err(ModeError::MissingInput),
    }
}

/// Infer a mode from the shape of a path without checking that it exists.
pub fn mode_from_path(path: &Path) -> OperatingMode {
    if path.is_dir() {
        return OperatingMode::Nerf;
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if METADATA_EXTENSIONS.contains(&extension.as_str()) {
        OperatingMode::Nerf
    } else if MESH_EXTENSIONS.contains(&extension.as_str()) {
        OperatingMode::Sdf
    } else if VOLUME_EXTENSIONS.contains(&extension.as_str()) {
        OperatingMode::Volume
    } else {
        OperatingMode::Image
    }
}
