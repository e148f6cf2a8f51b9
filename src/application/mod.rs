//! Application services: rendering, diagram activation and export.

pub mod diagrams;
pub mod error;
pub mod export;
pub mod render;
