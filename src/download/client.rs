//! HTTP client wrapper for a single download attempt.
//!
//! [`HttpClient`] performs exactly one streaming GET. Retrying is the job of
//! [`RetryingFetcher`](super::RetryingFetcher).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{PDF_MAGIC, REQUEST_TIMEOUT, WRITE_BUFFER_SIZE};
use super::error::DownloadError;
use super::filename::{document_filename, resolve_unique_path, unix_millis};
use crate::user_agent::BROWSER_USER_AGENT;

/// HTTP client for downloading documents with streaming support.
///
/// Created once and shared across targets to reuse pooled connections.
///
/// # Example
///
/// ```no_run
/// use docharvest_core::download::HttpClient;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new()?;
/// let path = client
///     .download_attempt("https://example.com/file.pdf", Path::new("./pdfs"))
///     .await?;
/// println!("Downloaded to: {}", path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with the default 30 second request timeout.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialize.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Creates a client whose every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialize.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::build(timeout, None)
    }

    /// Creates a client that sends and stores cookies in `jar`.
    ///
    /// Share the jar with the share-link probe so confirmation cookies it
    /// receives are presented on the download.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialize.
    pub fn with_cookie_jar(timeout: Duration, jar: Arc<Jar>) -> Result<Self, reqwest::Error> {
        Self::build(timeout, Some(jar))
    }

    fn build(timeout: Duration, jar: Option<Arc<Jar>>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT);
        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Downloads `url` once into `output_dir`.
    ///
    /// Only a `200 OK` is accepted. The body is streamed to a fresh file; any
    /// failure after the file was created removes it, and a body that left an
    /// empty file is reported as [`DownloadError::EmptyFile`].
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid or not http(s)
    /// - The request fails (network error, timeout)
    /// - The server returns any status other than 200
    /// - Writing to disk fails or nothing was written
    #[instrument(skip(self, output_dir), fields(url = %url))]
    pub async fn download_attempt(
        &self,
        url: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let parsed_url = parse_http_url(url)?;

        let response = self
            .client
            .get(parsed_url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "non-200 response");
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.to_ascii_lowercase().contains("pdf") {
            warn!(content_type = %content_type, "response does not advertise a PDF content type");
        }

        let file_path =
            resolve_unique_path(output_dir, &document_filename(&parsed_url, unix_millis()));
        debug!(path = %file_path.display(), "resolved output path");

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| DownloadError::io(file_path.clone(), e))?;

        let summary = match stream_to_file(&mut file, response, url, &file_path).await {
            Ok(summary) => summary,
            Err(error) => {
                debug!(path = %file_path.display(), "cleaning up partial file after error");
                drop(file);
                let _ = tokio::fs::remove_file(&file_path).await;
                return Err(error);
            }
        };
        drop(file);

        if summary.bytes_written == 0 {
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(DownloadError::empty_file(url, file_path));
        }

        if !summary.leading.starts_with(PDF_MAGIC) {
            warn!(path = %file_path.display(), "downloaded file does not start with %PDF");
        }

        info!(
            path = %file_path.display(),
            bytes = summary.bytes_written,
            "download complete"
        );

        Ok(file_path)
    }
}

fn parse_http_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(DownloadError::invalid_url(url)),
    }
}

struct StreamSummary {
    bytes_written: u64,
    leading: Vec<u8>,
}

/// Streams response body to file, returning bytes written and the first few bytes.
///
/// Extracted so the caller can clean up on error.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<StreamSummary, DownloadError> {
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;
    let mut leading = Vec::with_capacity(PDF_MAGIC.len());

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::from_reqwest(url, e))?;

        if leading.len() < PDF_MAGIC.len() {
            let take = (PDF_MAGIC.len() - leading.len()).min(chunk.len());
            leading.extend_from_slice(&chunk[..take]);
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(StreamSummary {
        bytes_written,
        leading,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pdf_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn test_parse_http_url_rejects_other_schemes() {
        assert!(parse_http_url("ftp://x.test/a.pdf").is_err());
        assert!(parse_http_url("not a url").is_err());
        assert!(parse_http_url("https://x.test/a.pdf").is_ok());
    }

    #[tokio::test]
    async fn test_download_attempt_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.7 body".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = HttpClient::new().unwrap();
        let path = client
            .download_attempt(&format!("{}/doc.pdf", server.uri()), dir.path())
            .await
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("doc_"), "unexpected name {name}");
        assert!(name.ends_with(".pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn test_download_attempt_non_200_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = HttpClient::new().unwrap();
        let err = client
            .download_attempt(&format!("{}/doc.pdf", server.uri()), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::HttpStatus { status: 503, .. }));
        assert!(pdf_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_download_attempt_empty_body_removed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = HttpClient::new().unwrap();
        let err = client
            .download_attempt(&format!("{}/empty.pdf", server.uri()), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::EmptyFile { .. }));
        assert!(pdf_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_download_attempt_timeout_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"%PDF".to_vec())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = HttpClient::with_timeout(Duration::from_millis(50)).unwrap();
        let err = client
            .download_attempt(&format!("{}/slow.pdf", server.uri()), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Timeout { .. }), "got {err:?}");
        assert!(pdf_files(dir.path()).is_empty());
    }
}
