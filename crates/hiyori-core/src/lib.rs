pub mod config;
mod prompt;
mod strings;

pub use config::{resolve_config_path, AppConfig, ConfigStore, ProviderConfig};
pub use prompt::*;
pub use strings::*;
