mod logging_config;
pub mod cli;
pub mod config;

pub use cli::Cli;
pub use config::{Config, ConfigError};
pub use logging_config::LoggingConfig;
