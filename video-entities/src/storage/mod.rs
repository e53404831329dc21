//! Blob storage for exported files
//!
//! Uploads are write-only: the job never lists or reads back blobs.

mod azure;

pub use azure::{AzureBlobStore, ConnectionString};

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::path::Path;

/// Error type for storage operations
#[derive(Debug)]
pub enum StorageError {
    /// Connection string or container is invalid
    Configuration(String),

    /// Local file could not be read
    Io(std::io::Error),

    /// Transport failure
    Http(reqwest::Error),

    /// The service rejected the upload
    Upload { status: u16, message: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            StorageError::Io(err) => write!(f, "IO error: {}", err),
            StorageError::Http(err) => write!(f, "HTTP error: {}", err),
            StorageError::Upload { status, message } => {
                write!(f, "Upload failed ({}): {}", status, message)
            }
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            StorageError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Http(err)
    }
}

/// Destination for exported files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `local` to `remote_path` inside the configured container.
    async fn save_file(&self, local: &Path, remote_path: &str) -> StorageResult<()>;
}

/// Store for runs that keep their output local. Any upload is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBlobStore;

#[async_trait]
impl BlobStore for DisabledBlobStore {
    async fn save_file(&self, local: &Path, remote_path: &str) -> StorageResult<()> {
        Err(StorageError::Configuration(format!(
            "uploads are disabled, not uploading {} to {}",
            local.display(),
            remote_path
        )))
    }
}
