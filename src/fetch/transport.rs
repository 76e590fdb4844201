//! Transport seam for artifact downloads.

use std::io::Read;

use anyhow::{Context, Result};

/// Byte-level transport used by the fetcher.
///
/// Implementations are blocking; the fetcher runs them on the blocking pool
/// via `smol::unblock`. Tests substitute counting or failing fakes.
pub trait Transport: Send + Sync + 'static {
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP(S) transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl Transport for HttpTransport {
    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut reader =
            oneio::get_reader(url).with_context(|| format!("opening {url} for download"))?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .with_context(|| format!("reading response body from {url}"))?;
        Ok(bytes)
    }
}
