//! PLY file loading and parsing

mod loader;

pub use loader::load_points_from_ply;
