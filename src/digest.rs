use std::path::Path;

use anyhow::Context;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// SHA-256 of a local file, hex encoded.
pub async fn file_digest(path: &Path) -> anyhow::Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .with_context(|| format!("Failed to read file while hashing: {}", path.display()))?;

        if read == 0 {
            break;
        }

        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a response body, hashed as it streams in.
pub async fn response_digest(response: reqwest::Response) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read response chunk while hashing")?;
        hasher.update(&chunk);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
