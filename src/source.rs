//! Byte streaming for local files and HTTP(S) URLs.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::LoaderConfig;
use crate::error::{AnalysisError, AnalysisResult};

/// Called with `(bytes_read, total_bytes)` after every chunk.
pub type FetchProgress<'a> = &'a mut dyn FnMut(u64, Option<u64>);

pub trait ByteSource: Send + Sync {
    /// Reads the whole resource at `location`, checking `cancel` between chunks.
    fn fetch(
        &self,
        location: &str,
        progress: FetchProgress<'_>,
        cancel: &CancelToken,
    ) -> AnalysisResult<Vec<u8>>;
}

pub fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn read_all(
    mut reader: impl Read,
    total: Option<u64>,
    chunk_bytes: usize,
    progress: FetchProgress<'_>,
    cancel: &CancelToken,
) -> AnalysisResult<Vec<u8>> {
    let mut data = Vec::with_capacity(total.unwrap_or(0).min(1 << 30) as usize);
    let mut chunk = vec![0u8; chunk_bytes.max(1)];
    loop {
        cancel.check()?;
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(AnalysisError::LoadFailed(format!("read error: {}", e))),
        };
        data.extend_from_slice(&chunk[..n]);
        progress(data.len() as u64, total);
    }
    Ok(data)
}

#[derive(Debug, Clone)]
pub struct FileSource {
    chunk_bytes: usize,
}

impl FileSource {
    pub fn new(chunk_bytes: usize) -> Self {
        Self { chunk_bytes }
    }
}

impl ByteSource for FileSource {
    fn fetch(
        &self,
        location: &str,
        progress: FetchProgress<'_>,
        cancel: &CancelToken,
    ) -> AnalysisResult<Vec<u8>> {
        let path = Path::new(location);
        let file = File::open(path).map_err(|e| {
            AnalysisError::LoadFailed(format!("cannot open {}: {}", path.display(), e))
        })?;
        let total = file.metadata().ok().map(|m| m.len());
        log::debug!("Reading {} ({:?} bytes)", path.display(), total);
        read_all(file, total, self.chunk_bytes, progress, cancel)
    }
}

pub struct HttpSource {
    client: reqwest::blocking::Client,
    chunk_bytes: usize,
}

impl HttpSource {
    pub fn new(timeout: Duration, chunk_bytes: usize) -> AnalysisResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wavetrace/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalysisError::InvalidParameters(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            chunk_bytes,
        })
    }
}

impl ByteSource for HttpSource {
    fn fetch(
        &self,
        location: &str,
        progress: FetchProgress<'_>,
        cancel: &CancelToken,
    ) -> AnalysisResult<Vec<u8>> {
        cancel.check()?;
        let response = self
            .client
            .get(location)
            .send()
            .map_err(|e| AnalysisError::LoadFailed(format!("request failed: {}", e)))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(AnalysisError::LoadFailed(format!(
                "server returned {}",
                response.status().as_u16()
            )));
        }
        let total = response.content_length();
        log::debug!("Downloading {} ({:?} bytes)", location, total);
        read_all(response, total, self.chunk_bytes, progress, cancel)
    }
}

/// Dispatches on the location: URLs go over HTTP, anything else is a path.
pub struct StreamSource {
    file: FileSource,
    http: HttpSource,
}

impl StreamSource {
    pub fn new(config: &LoaderConfig) -> AnalysisResult<Self> {
        Ok(Self {
            file: FileSource::new(config.read_chunk_bytes),
            http: HttpSource::new(config.http_timeout(), config.read_chunk_bytes)?,
        })
    }
}

impl ByteSource for StreamSource {
    fn fetch(
        &self,
        location: &str,
        progress: FetchProgress<'_>,
        cancel: &CancelToken,
    ) -> AnalysisResult<Vec<u8>> {
        if is_url(location) {
            self.http.fetch(location, progress, cancel)
        } else {
            self.file.fetch(location, progress, cancel)
        }
    }
}
