//! Load configuration from the process environment and a project `.env`,
//! with priority: **existing env > .env**.
//!
//! [`load_and_apply`] seeds the environment from `.env` without overwriting
//! anything already set; [`Settings::from_env`] then reads the typed
//! settings the orchestrator needs. Keys missing from both fall back to
//! defaults.

mod dotenv;
mod settings;

use std::path::Path;
use thiserror::Error;

pub use settings::{EmbeddingProvider, ProviderSettings, Settings};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Reads `.env` from `override_dir` (or the current directory) and sets each
/// key that is **not** already present in the process environment.
pub fn load_and_apply(override_dir: Option<&Path>) -> Result<(), LoadError> {
    let map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    for (key, value) in map {
        if std::env::var(&key).is_err() {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}
