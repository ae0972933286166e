use async_trait::async_trait;
use gridwatch_common::config::CaptureConfig;
use gridwatch_common::frame::RawFrame;
use gridwatch_common::source::{FrameSource, SourceError};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{negotiate_resolution, now_ms, request_url};

/// Polling-based fallback: periodically fetch single frames.
pub struct PollingSource {
    client: reqwest::Client,
    url: reqwest::Url,
    ticker: Interval,
    timeout: Duration,
    resolution: (u32, u32),
    pending: Option<Vec<u8>>,
    seq: u64,
}

impl PollingSource {
    pub async fn open(
        client: &reqwest::Client,
        config: &CaptureConfig,
    ) -> Result<Self, SourceError> {
        let url = request_url(&config.url.replace("/stream", "/frame"), config)?;
        info!(url = %url, fps = config.fps, "polling camera for single frames");

        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / config.fps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut source = Self {
            client: client.clone(),
            url,
            ticker,
            timeout: Duration::from_secs(config.timeout_secs),
            resolution: (config.width, config.height),
            pending: None,
            seq: 0,
        };

        for skipped in 0..config.skip_frames {
            source.fetch().await?;
            debug!(skipped, "discarded warm-up frame");
        }
        let first = source.fetch().await?;
        source.resolution = negotiate_resolution(&first, config)?;
        source.pending = Some(first);
        Ok(source)
    }

    /// Fetch one JPEG, retrying transient failures on the next tick until the
    /// grab timeout runs out.
    async fn fetch(&mut self) -> Result<Vec<u8>, SourceError> {
        let Self {
            client,
            url,
            ticker,
            timeout,
            ..
        } = self;

        let attempt = async {
            loop {
                ticker.tick().await;
                match client.get(url.clone()).send().await {
                    Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                        Ok(body) => return body.to_vec(),
                        Err(e) => warn!(error = %e, "failed to read camera frame body"),
                    },
                    Ok(resp) => {
                        warn!(status = %resp.status(), "non-success response from camera");
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to fetch camera frame");
                    }
                }
            }
        };

        tokio::time::timeout(*timeout, attempt)
            .await
            .map_err(|_| SourceError::Timeout(*timeout))
    }
}

#[async_trait]
impl FrameSource for PollingSource {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    async fn grab(&mut self) -> Result<RawFrame, SourceError> {
        let jpeg = match self.pending.take() {
            Some(jpeg) => jpeg,
            None => self.fetch().await?,
        };
        let seq = self.seq;
        self.seq += 1;
        let (width, height) = self.resolution;
        Ok(RawFrame::jpeg(jpeg, width, height, now_ms(), seq))
    }

    async fn close(&mut self) {
        self.pending = None;
        info!(frames = self.seq, "polling source closed");
    }

    fn name(&self) -> &str {
        "polling"
    }
}
