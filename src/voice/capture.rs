//! Screen capture: one PNG frame per call.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use super::CommandTemplate;
use crate::config::CaptureSettings;
use crate::error::{Error, Result};
use crate::types::ImageAttachment;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    /// Acquire a single frame encoded as PNG.
    async fn capture(&self) -> Result<ImageAttachment>;
}

/// Capturer running a command that writes a PNG image to stdout
pub struct CommandCapturer {
    template: CommandTemplate,
}

impl CommandCapturer {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            template: CommandTemplate::new("screen capture", argv),
        }
    }

    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self::new(settings.command.clone())
    }
}

#[async_trait]
impl ScreenCapturer for CommandCapturer {
    async fn capture(&self) -> Result<ImageAttachment> {
        let mut cmd = self.template.command(&[])?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // The process is gone once output() returns, which releases the capture.
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::adapter_failed(self.template.adapter(), e.to_string()))?;

        if !output.status.success() {
            return Err(Error::adapter_failed(
                self.template.adapter(),
                format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        if !output.stdout.starts_with(&PNG_SIGNATURE) {
            return Err(Error::adapter_failed(
                self.template.adapter(),
                "output is not a PNG image",
            ));
        }

        debug!(bytes = output.stdout.len(), "Captured screen");
        ImageAttachment::png(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_capture_png_from_stdout() {
        let capturer = CommandCapturer::new(argv(&[
            "sh",
            "-c",
            r"printf '\211PNG\r\n\032\nframe'",
        ]));
        let image = capturer.capture().await.unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert!(image.data.starts_with(&PNG_SIGNATURE));
        assert!(image.data.ends_with(b"frame"));
    }

    #[tokio::test]
    async fn test_rejects_non_png() {
        let capturer = CommandCapturer::new(argv(&["echo", "not an image"]));
        let err = capturer.capture().await.unwrap_err();
        assert!(matches!(err, Error::AdapterFailed { .. }));
    }

    #[tokio::test]
    async fn test_command_failure() {
        let capturer = CommandCapturer::new(argv(&["false"]));
        assert!(capturer.capture().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let capturer = CommandCapturer::new(argv(&["/nonexistent/capture-tool"]));
        assert!(matches!(
            capturer.capture().await,
            Err(Error::AdapterFailed { .. })
        ));
    }
}
