//! Configuration for LUT Renderer
//!
//! Encoding parameters, application settings (TOML with environment overrides),
//! the JSON preset store and the LUT history.

pub mod config;
pub mod luts;
pub mod params;
pub mod presets;

pub use config::*;
pub use luts::LutHistory;
pub use params::*;
pub use presets::{PresetError, PresetStore};
