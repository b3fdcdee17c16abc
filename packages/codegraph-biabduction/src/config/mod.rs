//! Engine configuration
//!
//! ```text
//! Preset (fast / balanced / thorough / custom)
//!   └─ EngineConfig::from_preset
//!        └─ builder overrides / YAML patch
//!             └─ validate()
//! ```

pub mod engine_config;
pub mod error;
pub mod io;
pub mod preset;

pub use engine_config::EngineConfig;
pub use error::{ConfigError, ConfigResult};
pub use io::{ConfigExportV1, EngineConfigPatch};
pub use preset::Preset;
