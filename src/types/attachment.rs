//! Pending image attachments
//!
//! Images are held in memory as raw bytes plus a MIME type and are only
//! base64-encoded at the edges (data URIs, the model wire format).

use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An image waiting to be sent with the next turn
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ImageAttachment {
    /// Build an attachment, rejecting empty payloads and non-image types.
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Result<Self> {
        let mime_type = mime_type.into().trim().to_ascii_lowercase();
        if !mime_type.starts_with("image/") {
            return Err(Error::attachment_invalid(format!(
                "'{}' is not an image type",
                mime_type
            )));
        }
        if data.is_empty() {
            return Err(Error::attachment_invalid("image is empty"));
        }
        Ok(Self { mime_type, data })
    }

    /// PNG frame produced by a screen capture
    pub fn png(data: Vec<u8>) -> Result<Self> {
        Self::new("image/png", data)
    }

    /// Parse `data:<mime>;base64,<payload>`
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| Error::attachment_invalid("data URI must start with 'data:'"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::attachment_invalid("data URI has no payload"))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| Error::attachment_invalid("only base64 data URIs are supported"))?;
        let data = BASE64
            .decode(payload.trim())
            .map_err(|e| Error::attachment_invalid(format!("invalid base64 payload: {}", e)))?;
        Self::new(mime_type, data)
    }

    /// Payload as standard base64
    pub fn base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// Read an image file fully into memory. The MIME type comes from the
    /// file extension.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .ok_or_else(|| {
                Error::attachment_invalid(format!(
                    "cannot determine the type of '{}'",
                    path.display()
                ))
            })?;
        let data = tokio::fs::read(path).await.map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::new(mime_type, data)
    }

    /// Accept either a data URI or a path to an image file.
    pub async fn load(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.starts_with("data:") {
            Self::from_data_uri(input)
        } else {
            let expanded = shellexpand::tilde(input);
            Self::from_file(Path::new(expanded.as_ref())).await
        }
    }

    /// Human-readable size, e.g. "12.3 KB"
    pub fn size_label(&self) -> String {
        let bytes = self.data.len() as f64;
        if bytes < 1024.0 {
            format!("{} B", self.data.len())
        } else if bytes < 1024.0 * 1024.0 {
            format!("{:.1} KB", bytes / 1024.0)
        } else {
            format!("{:.1} MB", bytes / (1024.0 * 1024.0))
        }
    }
}

impl fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
