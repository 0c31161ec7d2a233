//! Pre-flight checks before starting long-running operations.
//!
//! Validates that the provider key and writable directories are available
//! before the server starts accepting uploads it could never process.

use crate::config::Settings;
use crate::error::{Result, SamleError};
use std::path::Path;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Serving requires the provider key and writable directories.
    Serve,
    /// Inspecting records only needs the record store.
    Inspect,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Serve => {
            check_api_key(settings)?;
            check_writable(&settings.temp_dir())?;
            check_writable(&settings.data_dir())?;
        }
        Operation::Inspect => {}
    }
    Ok(())
}

fn check_api_key(settings: &Settings) -> Result<()> {
    let var = &settings.analysis.api_key_env;
    match settings.analysis.api_key() {
        Some(_) => Ok(()),
        None => Err(SamleError::Config(format!(
            "{} not set. Set it with: export {}='...'",
            var, var
        ))),
    }
}

/// Create the directory if needed and probe it with a scratch file.
fn check_writable(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    tempfile::NamedTempFile::new_in(dir)
        .map(|_| ())
        .map_err(|e| SamleError::Config(format!("{} is not writable: {}", dir.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_has_no_requirements() {
        assert!(check(Operation::Inspect, &Settings::default()).is_ok());
    }

    #[test]
    fn test_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_writable(&dir.path().join("nested")).is_ok());
    }
}
