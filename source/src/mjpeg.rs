use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use gridwatch_common::config::CaptureConfig;
use gridwatch_common::frame::RawFrame;
use gridwatch_common::source::{FrameSource, SourceError};
use std::time::Duration;
use tracing::{debug, info};

use crate::{negotiate_resolution, now_ms, request_url};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental `multipart/x-mixed-replace` parser.
///
/// Chunks are pushed as they arrive; a part is released once the following
/// boundary has been seen.
pub struct MultipartParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            boundary: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Return the next complete part, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let boundary_len = self.boundary.len();
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + boundary_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > boundary_len {
                            let _ = self.buffer.split_to(self.buffer.len() - boundary_len);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if self.buffer.starts_with(b"\r\n") {
                        // Part without headers
                        let _ = self.buffer.split_to(2);
                    } else {
                        let pos = find_subsequence(&self.buffer, HEADER_END)?;
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                    }
                    self.jpeg_start = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    else {
                        // Don't re-scan bytes already known to hold no boundary
                        self.jpeg_start = self.buffer.len().saturating_sub(boundary_len);
                        return None;
                    };

                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg_data = self.buffer[..end].to_vec();

                    // Advance past the boundary
                    let _ = self.buffer.split_to(jpeg_end + boundary_len);
                    self.state = ParseState::SeekingHeaderEnd;

                    if !jpeg_data.is_empty() {
                        return Some(jpeg_data);
                    }
                }
            }
        }
    }
}

/// Extract the multipart boundary from a Content-Type header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let value = param.trim().strip_prefix("boundary=")?;
        let value = value.trim_matches('"');
        let value = value.strip_prefix("--").unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Long-lived MJPEG stream over HTTP.
pub struct MjpegStreamSource {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: MultipartParser,
    timeout: Duration,
    resolution: (u32, u32),
    /// Frame read during negotiation, handed out by the first `grab`.
    pending: Option<Vec<u8>>,
    seq: u64,
}

impl MjpegStreamSource {
    pub async fn open(
        client: &reqwest::Client,
        config: &CaptureConfig,
    ) -> Result<Self, SourceError> {
        let url = request_url(&config.url, config)?;
        info!(url = %url, "connecting to MJPEG stream");

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
        info!(status = %response.status(), boundary, "connected to MJPEG stream");

        let mut source = Self {
            stream: response.bytes_stream().boxed(),
            parser: MultipartParser::new(&boundary),
            timeout: Duration::from_secs(config.timeout_secs),
            resolution: (config.width, config.height),
            pending: None,
            seq: 0,
        };

        for skipped in 0..config.skip_frames {
            source.next_jpeg().await?;
            debug!(skipped, "discarded warm-up frame");
        }
        let first = source.next_jpeg().await?;
        source.resolution = negotiate_resolution(&first, config)?;
        source.pending = Some(first);
        Ok(source)
    }

    async fn next_jpeg(&mut self) -> Result<Vec<u8>, SourceError> {
        loop {
            if let Some(jpeg) = self.parser.next_frame() {
                return Ok(jpeg);
            }
            match tokio::time::timeout(self.timeout, self.stream.next()).await {
                Err(_) => return Err(SourceError::Timeout(self.timeout)),
                Ok(None) => return Err(SourceError::EndOfStream),
                Ok(Some(Err(e))) => return Err(SourceError::Stream(e.to_string())),
                Ok(Some(Ok(chunk))) => self.parser.push(&chunk),
            }
        }
    }
}

#[async_trait]
impl FrameSource for MjpegStreamSource {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    async fn grab(&mut self) -> Result<RawFrame, SourceError> {
        let jpeg = match self.pending.take() {
            Some(jpeg) => jpeg,
            None => self.next_jpeg().await?,
        };
        let seq = self.seq;
        self.seq += 1;
        let (width, height) = self.resolution;
        Ok(RawFrame::jpeg(jpeg, width, height, now_ms(), seq))
    }

    async fn close(&mut self) {
        self.stream = futures_util::stream::empty().boxed();
        self.pending = None;
        info!(frames = self.seq, "MJPEG stream closed");
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
