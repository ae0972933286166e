//! HTTP camera sources.
//!
//! Both sources negotiate the resolution the same way: the requested size is
//! passed as query parameters, then the SOF header of the first frame decides
//! what the camera actually delivers.

pub mod mjpeg;
pub mod polling;

use async_trait::async_trait;
use chrono::Utc;
use gridwatch_common::config::{CaptureConfig, CaptureMode};
use gridwatch_common::frame::RawFrame;
use gridwatch_common::jpeg;
use gridwatch_common::source::{FrameSource, SourceError, SourceFactory};
use std::time::Duration;
use tracing::info;

use mjpeg::MjpegStreamSource;
use polling::PollingSource;

/// Opens the source selected by `capture.mode`.
#[derive(Clone)]
pub struct CameraFactory {
    client: reqwest::Client,
}

impl CameraFactory {
    pub fn new() -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

pub enum CameraSource {
    Stream(MjpegStreamSource),
    Polling(PollingSource),
}

#[async_trait]
impl SourceFactory for CameraFactory {
    type Source = CameraSource;

    async fn open(&self, config: &CaptureConfig) -> Result<CameraSource, SourceError> {
        match config.mode {
            CaptureMode::Mjpeg => Ok(CameraSource::Stream(
                MjpegStreamSource::open(&self.client, config).await?,
            )),
            CaptureMode::Polling => Ok(CameraSource::Polling(
                PollingSource::open(&self.client, config).await?,
            )),
        }
    }
}

#[async_trait]
impl FrameSource for CameraSource {
    fn resolution(&self) -> (u32, u32) {
        match self {
            CameraSource::Stream(s) => s.resolution(),
            CameraSource::Polling(s) => s.resolution(),
        }
    }

    async fn grab(&mut self) -> Result<RawFrame, SourceError> {
        match self {
            CameraSource::Stream(s) => s.grab().await,
            CameraSource::Polling(s) => s.grab().await,
        }
    }

    async fn close(&mut self) {
        match self {
            CameraSource::Stream(s) => s.close().await,
            CameraSource::Polling(s) => s.close().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            CameraSource::Stream(s) => s.name(),
            CameraSource::Polling(s) => s.name(),
        }
    }
}

/// Append the capture parameters the camera server understands.
pub(crate) fn request_url(base: &str, config: &CaptureConfig) -> Result<reqwest::Url, SourceError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| SourceError::Connect(format!("invalid url {base}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("width", &config.width.to_string())
        .append_pair("height", &config.height.to_string())
        .append_pair("quality", &config.quality.to_string())
        .append_pair("fps", &config.fps.to_string());
    Ok(url)
}

/// Resolution the camera actually delivers, read from the first frame.
pub(crate) fn negotiate_resolution(
    first_frame: &[u8],
    config: &CaptureConfig,
) -> Result<(u32, u32), SourceError> {
    let layout = jpeg::inspect(first_frame).map_err(|e| SourceError::Malformed(e.to_string()))?;
    let (width, height) = layout
        .dimensions
        .ok_or_else(|| SourceError::Malformed("first frame has no SOF segment".into()))?;

    if (width, height) != (config.width, config.height) {
        info!(
            requested_width = config.width,
            requested_height = config.height,
            width,
            height,
            "camera adjusted the capture resolution"
        );
    }
    Ok((width, height))
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
