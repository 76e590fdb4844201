//! On-demand driver artifact fetching with integrity checking.
//!
//! The fetcher owns the artifact cache directory. `ensure` is a
//! single-attempt primitive: it either hands back a verified cached artifact
//! without touching the network, or downloads, verifies, and atomically
//! installs one. Retry policy belongs to the caller; calling `ensure` again
//! is the retry mechanism.

mod transport;

pub use transport::{HttpTransport, Transport};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::catalog::DriverReference;
use crate::error::FetchError;
use crate::events::{LifecycleEvent, LifecycleNotifier};

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Verification state of a cached artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Corrupt,
}

/// A driver artifact on local storage.
///
/// Never mutated after verification; a corrupt artifact is deleted and
/// re-fetched, never repaired in place.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// Hex sha-256 over the complete file.
    pub sha256: String,
    pub status: VerificationStatus,
}

/// Ensures driver artifacts exist, verified, in the local cache.
pub struct DriverFetcher {
    cache_dir: PathBuf,
    transport: Arc<dyn Transport>,
    notifier: LifecycleNotifier,
    timeout: Duration,
    /// Per-artifact-name gates coalescing concurrent downloads.
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DriverFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, notifier: LifecycleNotifier) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            transport: Arc::new(HttpTransport),
            notifier,
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Substitute the download transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Override the per-download timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Guarantee the artifact named by `reference` exists in the cache,
    /// verified.
    ///
    /// Idempotent: a verified cache hit performs no network call. Concurrent
    /// calls for the same artifact name serialize behind a per-name gate, so
    /// at most one download happens and every caller sees its result.
    pub async fn ensure(&self, reference: &DriverReference) -> Result<CachedArtifact, FetchError> {
        let gate = self.gate(&reference.artifact_name).await;
        let _guard = gate.lock().await;

        if let Some(artifact) = self.verify_cached(reference).await? {
            debug!(
                artifact = %reference.artifact_name,
                "driver artifact already cached and verified"
            );
            return Ok(artifact);
        }
        self.download(reference).await
    }

    /// Final cache path for an artifact name.
    pub fn artifact_path(&self, artifact_name: &str) -> PathBuf {
        self.cache_dir.join(artifact_name)
    }

    fn sidecar_path(&self, artifact_name: &str) -> PathBuf {
        self.cache_dir.join(format!("{artifact_name}.sha256"))
    }

    async fn gate(&self, artifact_name: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(artifact_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Check the cache for a verified copy. A stale or tampered copy is
    /// discarded so the caller falls through to a fresh download.
    async fn verify_cached(
        &self,
        reference: &DriverReference,
    ) -> Result<Option<CachedArtifact>, FetchError> {
        let path = self.artifact_path(&reference.artifact_name);
        let sidecar = self.sidecar_path(&reference.artifact_name);

        let bytes = match async_fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.discard(reference).await;
                return Ok(None);
            }
            Err(source) => {
                return Err(FetchError::Storage {
                    artifact: reference.artifact_name.clone(),
                    source,
                });
            }
        };
        let recorded = match async_fs::read_to_string(&sidecar).await {
            Ok(recorded) => recorded.trim().to_string(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.discard(reference).await;
                return Ok(None);
            }
            Err(source) => {
                return Err(FetchError::Storage {
                    artifact: reference.artifact_name.clone(),
                    source,
                });
            }
        };

        let digest = sha256_hex(&bytes);
        let publisher_ok = reference
            .sha256
            .as_ref()
            .is_none_or(|expected| expected.eq_ignore_ascii_case(&digest));

        if digest == recorded && publisher_ok {
            Ok(Some(CachedArtifact {
                path,
                size: bytes.len() as u64,
                sha256: digest,
                status: VerificationStatus::Verified,
            }))
        } else {
            warn!(
                artifact = %reference.artifact_name,
                "cached driver artifact failed verification, discarding"
            );
            self.discard(reference).await;
            Ok(None)
        }
    }

    /// Remove a cached artifact and its sidecar, ignoring absent files.
    async fn discard(&self, reference: &DriverReference) {
        let _ = async_fs::remove_file(self.artifact_path(&reference.artifact_name)).await;
        let _ = async_fs::remove_file(self.sidecar_path(&reference.artifact_name)).await;
    }

    async fn download(&self, reference: &DriverReference) -> Result<CachedArtifact, FetchError> {
        let artifact = reference.artifact_name.clone();
        let storage = |source: std::io::Error| FetchError::Storage {
            artifact: artifact.clone(),
            source,
        };

        async_fs::create_dir_all(&self.cache_dir).await.map_err(storage)?;

        self.notifier.publish(LifecycleEvent::DriverDownloadStarted {
            database_type: reference.database_name.clone(),
        });
        info!(
            database = %reference.database_name,
            url = %reference.download_url,
            "downloading driver artifact"
        );

        let url = reference.download_url.clone();
        let transport = self.transport.clone();
        // The blocking download runs on the pool and is never force-killed:
        // if the timeout wins the race, the abandoned body completes in the
        // background without ever reaching the rename below.
        let request = {
            let request_url = url.clone();
            async move {
                let download_url = request_url.clone();
                smol::unblock(move || transport.download(&download_url))
                    .await
                    .map_err(|source| FetchError::Network {
                        url: request_url,
                        source,
                    })
            }
        };
        let deadline = async {
            smol::Timer::after(self.timeout).await;
            Err(FetchError::Timeout {
                url: url.clone(),
                seconds: self.timeout.as_secs(),
            })
        };
        let bytes = smol::future::or(request, deadline).await?;

        let digest = sha256_hex(&bytes);
        if let Some(expected) = &reference.sha256 {
            if !expected.eq_ignore_ascii_case(&digest) {
                warn!(
                    artifact = %reference.artifact_name,
                    expected = %expected,
                    actual = %digest,
                    "downloaded driver artifact failed checksum verification"
                );
                return Err(FetchError::ChecksumMismatch {
                    artifact: reference.artifact_name.clone(),
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }

        // Stage under a temporary name, then rename into place so a partial
        // write is never visible under the final cache name.
        let path = self.artifact_path(&reference.artifact_name);
        let staging = self.cache_dir.join(format!("{}.part", reference.artifact_name));
        async_fs::write(&staging, &bytes).await.map_err(storage)?;
        async_fs::rename(&staging, &path).await.map_err(storage)?;
        async_fs::write(self.sidecar_path(&reference.artifact_name), format!("{digest}\n"))
            .await
            .map_err(storage)?;

        self.notifier
            .publish(LifecycleEvent::DriverDownloadCompleted {
                database_type: reference.database_name.clone(),
            });
        info!(
            database = %reference.database_name,
            artifact = %reference.artifact_name,
            size = bytes.len(),
            "driver artifact downloaded and verified"
        );

        Ok(CachedArtifact {
            path,
            size: bytes.len() as u64,
            sha256: digest,
            status: VerificationStatus::Verified,
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
