//! Manifest sources and local validation.

use bytes::Bytes;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Result, TreeSchemaError};

const DEFAULT_FILE_NAME: &str = "manifest.json";

/// Where a dbt manifest comes from: a local file or an in-memory buffer
/// (e.g. an object downloaded from S3).
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl ManifestSource {
    /// File name reported to the server with the upload.
    pub fn file_name(&self) -> String {
        match self {
            ManifestSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
            ManifestSource::Bytes(_) => DEFAULT_FILE_NAME.to_string(),
        }
    }

    /// Read the manifest content and check that it is a JSON document.
    pub async fn load(&self) -> Result<Bytes> {
        let content = match self {
            ManifestSource::Path(path) => Bytes::from(tokio::fs::read(path).await?),
            ManifestSource::Bytes(bytes) => bytes.clone(),
        };
        Self::validate(&content)?;
        Ok(content)
    }

    /// Check that `content` is a syntactically valid JSON object.
    pub fn validate(content: &[u8]) -> Result<()> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Err(TreeSchemaError::validation("manifest is empty"));
        }
        match serde_json::from_slice::<Value>(content) {
            Ok(Value::Object(_)) => Ok(()),
            Ok(other) => Err(TreeSchemaError::validation(format!(
                "manifest must be a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(TreeSchemaError::validation(format!(
                "manifest is not valid JSON: {e}"
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl From<&str> for ManifestSource {
    fn from(path: &str) -> Self {
        ManifestSource::Path(PathBuf::from(path))
    }
}

impl From<String> for ManifestSource {
    fn from(path: String) -> Self {
        ManifestSource::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for ManifestSource {
    fn from(path: PathBuf) -> Self {
        ManifestSource::Path(path)
    }
}

impl From<&Path> for ManifestSource {
    fn from(path: &Path) -> Self {
        ManifestSource::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ManifestSource {
    fn from(bytes: Vec<u8>) -> Self {
        ManifestSource::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for ManifestSource {
    fn from(bytes: &[u8]) -> Self {
        ManifestSource::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Bytes> for ManifestSource {
    fn from(bytes: Bytes) -> Self {
        ManifestSource::Bytes(bytes)
    }
}
