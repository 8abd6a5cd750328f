//! On-disk layout for per-project state.

pub mod fs;

pub use fs::{Storage, STATE_DIR};
