//! Discovery of the execution-backend binary.
//!
//! Constructed once at process start and passed by reference to the modules,
//! rather than hiding the lookup behind a lazily-populated global.

use std::path::{Path, PathBuf};
use synod_types::config::{MODULES_BIN_ENV, MODULES_BIN_NAME};
use synod_types::error::ConfigError;

/// Resolves and pins the filesystem location of the backend executable.
#[derive(Debug, Clone)]
pub struct BinaryResolver {
    path: PathBuf,
}

impl BinaryResolver {
    /// Resolution order: explicit configuration, `SYNOD_MODULES_BIN`, then a
    /// scan of `PATH` for `synod-modules`. An unfindable binary is fatal, as
    /// is an env override that is set but empty.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(p) = explicit {
            return Self::from_candidate(p.to_path_buf());
        }
        if let Ok(env_path) = std::env::var(MODULES_BIN_ENV) {
            if env_path.is_empty() {
                return Err(ConfigError::MissingEnv(MODULES_BIN_ENV.to_string()));
            }
            return Self::from_candidate(PathBuf::from(env_path));
        }
        let search = std::env::var_os("PATH").unwrap_or_default();
        for dir in std::env::split_paths(&search) {
            let candidate = dir.join(MODULES_BIN_NAME);
            if candidate.is_file() {
                return Ok(Self { path: candidate });
            }
        }
        Err(ConfigError::BinaryNotFound(MODULES_BIN_NAME.to_string()))
    }

    fn from_candidate(path: PathBuf) -> Result<Self, ConfigError> {
        if path.is_file() {
            Ok(Self { path })
        } else {
            Err(ConfigError::BinaryNotFound(path.display().to_string()))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#!/bin/sh\n").unwrap();
        let resolver = BinaryResolver::resolve(Some(file.path())).unwrap();
        assert_eq!(resolver.path(), file.path());
    }

    #[test]
    fn empty_env_override_is_fatal() {
        std::env::set_var(MODULES_BIN_ENV, "");
        let err = BinaryResolver::resolve(None).unwrap_err();
        std::env::remove_var(MODULES_BIN_ENV);
        assert!(matches!(err, ConfigError::MissingEnv(_)));
    }

    #[test]
    fn missing_explicit_path_is_fatal() {
        let err = BinaryResolver::resolve(Some(Path::new("/nonexistent/synod-modules")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BinaryNotFound(_)));
    }
}
