//! Driver catalog: the authoritative list mapping database type names to
//! driver metadata.
//!
//! The catalog document is a JSON array of entries; every field is optional
//! at parse time and unknown fields are ignored. An entry only has to be
//! complete when a caller actually asks to resolve it — see
//! [`CatalogEntry::to_reference`].

mod resolver;

pub use resolver::{DriverResolver, DriverTarget};

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CatalogError, Error};

/// The starter catalog compiled into the crate.
const BUNDLED_CATALOG: &str = include_str!("../../assets/known_drivers.json");

/// Raw catalog document entry. All fields optional; unknown fields ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogEntry {
    pub database_name: Option<String>,
    pub download_link: Option<String>,
    pub jar_file_name: Option<String>,
    pub driver_class: Option<String>,
    pub url_template: Option<String>,
    pub note: Option<String>,
    pub default_port: Option<u16>,
    /// Publisher-supplied hex sha-256 of the artifact, when known.
    pub sha256: Option<String>,
}

impl CatalogEntry {
    /// Validate this entry into a loadable [`DriverReference`].
    ///
    /// Entries missing the download link, artifact file name, or driver class
    /// parse fine but cannot be used for loading; they are rejected here, at
    /// resolve time.
    pub fn to_reference(&self) -> Result<DriverReference, Error> {
        let requested = self
            .database_name
            .clone()
            .unwrap_or_else(|| "<unnamed>".to_string());
        let reject = |reason: &str| Error::DriverNotFound {
            requested: requested.clone(),
            reason: reason.to_string(),
        };

        let database_name = self
            .database_name
            .clone()
            .ok_or_else(|| reject("catalog entry has no database name"))?;
        let download_url = self
            .download_link
            .clone()
            .ok_or_else(|| reject("catalog entry has no download link"))?;
        let artifact_name = self
            .jar_file_name
            .clone()
            .ok_or_else(|| reject("catalog entry has no artifact file name"))?;
        let driver_class = self
            .driver_class
            .clone()
            .ok_or_else(|| reject("catalog entry has no driver class"))?;

        if Url::parse(&download_url).is_err() {
            return Err(reject("catalog entry download link is not a valid URL"));
        }

        Ok(DriverReference {
            database_name,
            download_url,
            artifact_name,
            driver_class,
            default_port: self.default_port,
            url_template: self.url_template.clone(),
            note: self.note.clone(),
            sha256: self.sha256.clone(),
        })
    }
}

/// A validated catalog entry, ready for fetching and loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverReference {
    /// Database type name; the catalog's primary lookup key.
    pub database_name: String,
    pub download_url: String,
    /// Artifact file name; unique per catalog, names the cache entry.
    pub artifact_name: String,
    /// Fully-qualified driver class identifier inside the artifact.
    pub driver_class: String,
    pub default_port: Option<u16>,
    /// Connection URL template with `{host}`, `{port}` and `{database}`
    /// placeholders.
    pub url_template: Option<String>,
    pub note: Option<String>,
    pub sha256: Option<String>,
}

impl DriverReference {
    /// Render the connection URL template, if the reference carries one.
    pub fn connection_url(&self, host: &str, port: u16, database: &str) -> Option<String> {
        self.url_template.as_ref().map(|template| {
            template
                .replace("{host}", host)
                .replace("{port}", &port.to_string())
                .replace("{database}", database)
        })
    }
}

/// Immutable, indexed list of known driver references.
///
/// Loaded once and never mutated; replacing the catalog happens by building a
/// new one and swapping it atomically inside
/// [`DriverResolver`](crate::catalog::DriverResolver).
#[derive(Debug, Clone)]
pub struct DriverCatalog {
    entries: Vec<CatalogEntry>,
    /// Lowercased database name -> position in `entries`.
    index: HashMap<String, usize>,
}

impl DriverCatalog {
    /// Parse a catalog document from a JSON string.
    pub fn parse(document: &str) -> Result<Self, CatalogError> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(document).map_err(|err| CatalogError::Parse {
                reason: err.to_string(),
            })?;
        Self::build(entries)
    }

    /// Load a catalog document from disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let document = std::fs::read_to_string(path).map_err(|source| CatalogError::Missing {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&document)
    }

    /// The starter catalog shipped with the crate.
    pub fn bundled() -> Result<Self, CatalogError> {
        Self::parse(BUNDLED_CATALOG)
    }

    fn build(entries: Vec<CatalogEntry>) -> Result<Self, CatalogError> {
        let mut index = HashMap::new();
        let mut artifact_names = HashMap::new();

        for (position, entry) in entries.iter().enumerate() {
            if let Some(name) = &entry.database_name {
                let key = name.to_lowercase();
                if index.insert(key, position).is_some() {
                    return Err(CatalogError::Parse {
                        reason: format!("duplicate database name {name}"),
                    });
                }
            }
            if let Some(artifact) = &entry.jar_file_name {
                if let Some(other) = artifact_names.insert(artifact.clone(), position) {
                    return Err(CatalogError::Parse {
                        reason: format!(
                            "artifact file name {artifact} is claimed by entries {other} and {position}"
                        ),
                    });
                }
            }
        }

        Ok(Self { entries, index })
    }

    /// Look up an entry by database type name, case-insensitively.
    pub fn lookup(&self, database_type: &str) -> Option<&CatalogEntry> {
        self.index
            .get(&database_type.to_lowercase())
            .map(|position| &self.entries[*position])
    }

    /// All entries in document order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
