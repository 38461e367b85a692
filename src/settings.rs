//! JSON settings files for the `settings ... set` commands.

use crate::error::IndexError;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read and decode a settings file.
pub fn read_settings_file<T: DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let raw = std::fs::read_to_string(path).map_err(|source| IndexError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| IndexError::SettingsFile {
        path: path.to_path_buf(),
        source,
    })
}
