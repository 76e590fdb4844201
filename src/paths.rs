//! Application storage root resolution.
//!
//! Everything dbdock writes to disk lives under a single user-writable root,
//! `~/.dbdock` by default. Hosts embedding the crate (and tests) can point the
//! root anywhere else.

use std::path::{Path, PathBuf};

use anyhow::Result;

/// The application-owned directory all caches and documents live under.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    /// Resolve the default root under the user's home directory.
    pub fn resolve() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(Self {
            root: home.join(".dbdock"),
        })
    }

    /// Use an explicit root instead of the default.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding downloaded driver artifacts and their checksum
    /// sidecars.
    pub fn drivers_dir(&self) -> PathBuf {
        self.root.join("drivers")
    }

    /// Default location of the user's driver catalog document.
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("drivers.json")
    }
}
