//! Rendering: orientation correction and the annotation overlay.

pub mod orientation;
pub mod overlay;
