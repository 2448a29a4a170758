//! On-disk formats: the binary model file and text vector files.
//!
//! The model file is a single version-tagged stream (see [`format`]);
//! every section is written with the little-endian helpers in [`codec`].
//! Vector files are the plain-text `count dim` + one row per line format
//! understood by most embedding tools.

pub mod codec;
pub mod format;
pub mod vectors;

pub use format::{FORMAT_VERSION, MAGIC};
