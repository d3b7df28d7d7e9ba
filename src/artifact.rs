//! Sources for the agent runtime payload.

use std::future::Future;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use thiserror::Error;

/// Future returned by [`ArtifactSource::fetch`].
pub type ArtifactFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, ArtifactError>> + Send + 'a>>;

/// Errors raised while fetching the agent payload.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ArtifactError {
    /// Raised when the payload cannot be read.
    #[error("failed to read agent runtime {path}: {message}")]
    Read {
        /// Location of the payload.
        path: String,
        /// Underlying error text.
        message: String,
    },
    /// Raised when the payload is empty.
    #[error("agent runtime {0} is empty")]
    Empty(String),
}

/// Supplies the agent executable bytes uploaded to every node.
pub trait ArtifactSource: Send + Sync {
    /// Returns the agent runtime payload.
    fn fetch(&self) -> ArtifactFuture<'_>;
}

/// Payload held in memory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BytesArtifact {
    bytes: Vec<u8>,
}

impl BytesArtifact {
    /// Wraps `bytes`.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl ArtifactSource for BytesArtifact {
    fn fetch(&self) -> ArtifactFuture<'_> {
        Box::pin(async move {
            if self.bytes.is_empty() {
                return Err(ArtifactError::Empty(String::from("<memory>")));
            }
            Ok(self.bytes.clone())
        })
    }
}

/// Payload read from a local file on every fetch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileArtifact {
    path: Utf8PathBuf,
}

impl FileArtifact {
    /// Reads the payload from `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<Vec<u8>, ArtifactError> {
        let read_error = |message: String| ArtifactError::Read {
            path: self.path.to_string(),
            message,
        };
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| read_error(String::from("path has no file name")))?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };

        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| read_error(err.to_string()))?;
        let bytes = dir
            .read(file_name)
            .map_err(|err| read_error(err.to_string()))?;
        if bytes.is_empty() {
            return Err(ArtifactError::Empty(self.path.to_string()));
        }
        Ok(bytes)
    }
}

impl ArtifactSource for FileArtifact {
    fn fetch(&self) -> ArtifactFuture<'_> {
        Box::pin(async move { self.read() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_dir(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir should be UTF-8: {}", path.display()))
    }

    #[tokio::test]
    async fn file_artifact_reads_payload() {
        let tmp = TempDir::new().expect("temp dir");
        let path = utf8_dir(&tmp).join("agent.jar");
        std::fs::write(&path, b"PK\x03\x04").expect("write payload");

        let bytes = FileArtifact::new(path).fetch().await.expect("fetch");

        assert_eq!(bytes, b"PK\x03\x04");
    }

    #[tokio::test]
    async fn file_artifact_reports_missing_file() {
        let tmp = TempDir::new().expect("temp dir");
        let path = utf8_dir(&tmp).join("missing.jar");

        let err = FileArtifact::new(path).fetch().await.expect_err("missing file");

        assert!(matches!(err, ArtifactError::Read { .. }), "unexpected: {err}");
    }

    #[tokio::test]
    async fn empty_bytes_are_rejected() {
        let err = BytesArtifact::default().fetch().await.expect_err("empty payload");

        assert_eq!(err, ArtifactError::Empty(String::from("<memory>")));
    }
}
