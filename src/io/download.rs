//! Source archive fetching.
//!
//! Idempotent: an existing destination file is trusted (the verifier still
//! runs over it) and no network traffic happens. HTTP and HTTPS stream
//! through reqwest; FTP is delegated to curl through the exec wrapper.
//! A partial file is removed on any failure.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::io::exec;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download tool failed: {0}")]
    Tool(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// Build the shared HTTP client with a connect timeout and overall deadline.
pub fn client(deadline: Duration) -> Result<Client, DownloadError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(deadline)
        .user_agent(crate::USER_AGENT)
        .build()?)
}

/// Download `url` to `dest`, creating parent directories as needed.
pub async fn fetch(
    client: &Client,
    url: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<(), DownloadError> {
    if dest.is_file() {
        tracing::info!(file = %dest.display(), "source already downloaded");
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tracing::info!(url, "downloading");
    let result = if url.starts_with("http://") || url.starts_with("https://") {
        fetch_http(client, url, dest).await
    } else if url.starts_with("ftp://") {
        fetch_ftp(url, dest, timeout).await
    } else {
        Err(DownloadError::UnsupportedScheme(url.to_string()))
    };

    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    result
}

async fn fetch_http(client: &Client, url: &str, dest: &Path) -> Result<(), DownloadError> {
    let response = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
    }
    file.flush().await?;

    tracing::debug!(bytes = downloaded, file = %dest.display(), "download complete");
    Ok(())
}

async fn fetch_ftp(url: &str, dest: &Path, timeout: Duration) -> Result<(), DownloadError> {
    exec::require_tool("curl").map_err(|e| DownloadError::Tool(e.to_string()))?;

    let argv = vec![
        "curl".to_string(),
        "-fsSL".to_string(),
        "--connect-timeout".to_string(),
        "30".to_string(),
        "--max-time".to_string(),
        timeout.as_secs().to_string(),
        "-o".to_string(),
        dest.display().to_string(),
        url.to_string(),
    ];

    match exec::run_checked(&argv, None, timeout + Duration::from_secs(5)).await {
        Ok(_) => Ok(()),
        Err(e) => Err(DownloadError::Tool(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn existing_destination_short_circuits() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("cached.tar.gz");
        fs::write(&dest, b"already here").unwrap();

        let client = client(Duration::from_secs(5)).unwrap();
        // An unroutable URL proves no network activity happens.
        fetch(
            &client,
            "http://127.0.0.1:1/archive.tar.gz",
            &dest,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn failed_download_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("sub/archive.tar.gz");

        let client = client(Duration::from_secs(2)).unwrap();
        let err = fetch(
            &client,
            "http://127.0.0.1:1/archive.tar.gz",
            &dest,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::Http(_)));
        assert!(!dest.exists());
        // Parent directory creation still happened.
        assert!(dest.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("x");
        let client = client(Duration::from_secs(2)).unwrap();
        let err = fetch(&client, "gopher://example.org/x", &dest, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedScheme(_)));
    }
}
