use async_trait::async_trait;
use std::time::Duration;

use crate::config::CaptureConfig;
use crate::frame::RawFrame;

/// An opened capture device yielding one frame per `grab`.
#[async_trait]
pub trait FrameSource: Send {
    /// Resolution negotiated when the source was opened.
    fn resolution(&self) -> (u32, u32);

    /// Wait for the next frame. `SourceError::EndOfStream` marks a clean end.
    async fn grab(&mut self) -> Result<RawFrame, SourceError>;

    /// Release the device. Called once when the capture session ends.
    async fn close(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Opens frame sources for a capture configuration.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    type Source: FrameSource;

    async fn open(&self, config: &CaptureConfig) -> Result<Self::Source, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("end of stream")]
    EndOfStream,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("malformed frame: {0}")]
    Malformed(String),
}
