//! Mailbox directory: `request` and `response` artifacts.
//!
//! Each artifact holds one protocol line and is written to a temp file, then
//! renamed into place, so a reader never sees half an artifact.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{SignError, SignResult};

pub const REQUEST_FILE: &str = "request";
pub const RESPONSE_FILE: &str = "response";

/// A shared mailbox directory.
#[derive(Debug, Clone)]
pub struct Mailbox {
    dir: PathBuf,
}

impl Mailbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn request_path(&self) -> PathBuf {
        self.dir.join(REQUEST_FILE)
    }

    pub fn response_path(&self) -> PathBuf {
        self.dir.join(RESPONSE_FILE)
    }

    pub async fn write_request(&self, line: &str) -> SignResult<()> {
        write_atomic(&self.request_path(), line).await
    }

    pub async fn write_response(&self, line: &str) -> SignResult<()> {
        write_atomic(&self.response_path(), line).await
    }

    /// Contents of `request`, if present.
    pub async fn read_request(&self) -> SignResult<Option<String>> {
        read_optional(&self.request_path()).await
    }

    /// Contents of `response`, if present.
    pub async fn read_response(&self) -> SignResult<Option<String>> {
        read_optional(&self.response_path()).await
    }

    pub async fn remove_request(&self) -> SignResult<()> {
        remove_if_exists(&self.request_path()).await
    }

    pub async fn remove_response(&self) -> SignResult<()> {
        remove_if_exists(&self.response_path()).await
    }

    /// Delete both artifacts and any leftover temp files. Idempotent.
    pub async fn clean(&self) -> SignResult<()> {
        for path in [
            self.request_path(),
            self.response_path(),
            temp_path(&self.request_path()),
            temp_path(&self.response_path()),
        ] {
            remove_if_exists(&path).await?;
        }
        debug!(dir = %self.dir.display(), "mailbox cleaned");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

/// Write via temp file + rename.
pub async fn write_atomic(path: &Path, content: &str) -> SignResult<()> {
    let temp = temp_path(path);

    fs::write(&temp, content).await.map_err(|e| SignError::Io {
        message: format!("failed to write temp file {}: {}", temp.display(), e),
    })?;

    fs::rename(&temp, path).await.map_err(|e| SignError::Io {
        message: format!("failed to rename temp file to {}: {}", path.display(), e),
    })?;

    Ok(())
}

async fn read_optional(path: &Path) -> SignResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SignError::Io {
            message: format!("failed to read {}: {}", path.display(), e),
        }),
    }
}

async fn remove_if_exists(path: &Path) -> SignResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SignError::Io {
            message: format!("failed to remove {}: {}", path.display(), e),
        }),
    }
}
