// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "Trainflow.toml";

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Read, deserialize and validate a config file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file at the *default* path
/// yields the built-in defaults. A missing explicitly chosen file is an
/// error.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    if !path.exists() && path == default_config_path() {
        info!(path = %path.display(), "no config file found; using defaults");
        return Ok(ConfigFile::default());
    }
    load_and_validate(path)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OrchestratorError;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_or_default(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, OrchestratorError::IoError(_)));
    }

    #[test]
    fn file_is_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Trainflow.toml");
        std::fs::write(&path, "[orchestrator]\ndefault_parallelism = 0\n").unwrap();
        assert!(matches!(
            load_or_default(&path),
            Err(OrchestratorError::ConfigError(_))
        ));

        std::fs::write(&path, "[orchestrator]\ndefault_parallelism = 2\n").unwrap();
        assert_eq!(load_or_default(&path).unwrap().orchestrator.default_parallelism, 2);
    }
}
