// Configuration management module
// TOML configuration for the embedding backend, chunker, index and search defaults

pub mod settings;

#[cfg(test)]
mod tests;

pub use settings::{Config, ConfigError, EmbeddingBackend, EmbeddingConfig, SearchConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
