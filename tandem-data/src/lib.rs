//! Tandem Data Crate
//!
//! Operating-mode resolution and dataset loading for the training loop.
//! This crate knows nothing about training or locking; it only turns a
//! scene path into an [`OperatingMode`] and a set of [`Point`] samples.

pub mod dataset;
pub mod error;
pub mod mesh;
pub mod mode;
pub mod ply;
pub mod raster;
pub mod scene;
pub mod types;

pub use dataset::Dataset;
pub use error::DataError;
pub use mode::{ModeError, OperatingMode, mode_from_path, resolve_mode};
pub use types::Point;
