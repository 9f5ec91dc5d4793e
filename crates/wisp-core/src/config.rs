//! On-disk configuration repository.
//!
//! Engine credentials and parameters are stored as JSON files, one per named
//! entry, in a per-user state directory (`$HOME/.wisp` by default). The core
//! only hands a repository to the engines; what gets stored is engine
//! business.

use std::fs;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Stores and loads JSON-serializable configuration objects by name.
#[derive(Debug, Clone)]
pub struct Repository {
    directory: PathBuf,
}

impl Repository {
    /// Create a repository rooted at the given directory.
    ///
    /// The directory is created lazily on the first store.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Create a repository at the default per-user location, `$HOME/.wisp`.
    pub fn open_default() -> Result<Self> {
        let home = std::env::var("HOME").map_err(|_| Error::Config {
            message: "HOME is not set".to_string(),
        })?;
        Ok(Self::new(Path::new(&home).join(".wisp")))
    }

    /// Store a configuration object under the given name.
    pub fn store<T: Serialize>(&self, name: &str, config: &T) -> Result<()> {
        self.ensure_directory()?;

        let body = serde_json::to_vec_pretty(config).map_err(|e| Error::Config {
            message: format!("failed to serialize {}: {}", name, e),
        })?;

        // Credentials land here, so keep the file private to the user.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(self.path_for(name))?;
        use std::io::Write;
        file.write_all(&body)?;

        Ok(())
    }

    /// Load the configuration object stored under the given name.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let body = fs::read(self.path_for(name))?;
        serde_json::from_slice(&body).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", name, e),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.json", name))
    }

    fn ensure_directory(&self) -> Result<()> {
        match fs::metadata(&self.directory) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::Config {
                message: format!("{} exists and is not a directory", self.directory.display()),
            }),
            Err(_) => {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(&self.directory)?;
                Ok(())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        hello: String,
        n: i32,
        f: f64,
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path().join("state"));

        let config = TestConfig {
            hello: "world".to_string(),
            n: 42,
            f: 3.14,
        };

        repo.store("test", &config).unwrap();
        let loaded: TestConfig = repo.load("test").unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn load_missing_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());

        let result: Result<TestConfig> = repo.load("nope");
        assert!(result.is_err());
    }

    #[test]
    fn store_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let repo = Repository::new(&nested);

        repo.store("entry", &TestConfig {
            hello: "x".into(),
            n: 1,
            f: 0.0,
        })
        .unwrap();

        assert!(nested.join("entry.json").exists());
    }

    #[test]
    fn refuses_non_directory_root() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("occupied");
        fs::write(&file_path, b"not a dir").unwrap();

        let repo = Repository::new(&file_path);
        let result = repo.store("entry", &42);
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
