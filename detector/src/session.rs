use gridwatch_common::config::{Config, DetectConfig};
use gridwatch_common::frame::RawFrame;
use gridwatch_common::record::MAX_COLUMNS;
use gridwatch_common::source::{FrameSource, SourceError, SourceFactory};
use std::io::Write;
use tracing::{debug, error, info, warn};

use crate::decode::decode;
use crate::diff::{diff, DiffParams};
use crate::heatmap::HeatMap;
use crate::output::DetectionEmitter;
use crate::reduce::{reduce_into, BitmapError, ReducedBitmap};
use crate::signals::SignalFlags;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open frame source: {0}")]
    Open(#[source] SourceError),
    #[error("failed to allocate reduced bitmaps: {0}")]
    Bitmap(#[from] BitmapError),
    #[error("lower scan cutoff {cutoff} leaves no rows of the {reduced_height}-row grid")]
    ScanCutoff { cutoff: u32, reduced_height: usize },
}

/// Why a session stopped capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Terminate was requested.
    Terminated,
    /// The source ran out of frames.
    EndOfStream,
    /// The source failed while grabbing.
    CaptureFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub exit: ExitReason,
    pub frames_emitted: u64,
    pub frames_dropped: u64,
    pub write_errors: u64,
}

/// The reduced grids owned by one capture session.
pub(crate) struct Bitmaps {
    pub(crate) current: ReducedBitmap,
    pub(crate) previous: ReducedBitmap,
    /// Reserved for comparing against a stable background. Allocated with the
    /// other two and never written.
    baseline: ReducedBitmap,
}

impl Bitmaps {
    pub(crate) fn allocate(frame_width: u32, frame_height: u32, scale: u32) -> Result<Self, BitmapError> {
        Ok(Self {
            current: ReducedBitmap::for_frame(frame_width, frame_height, scale)?,
            previous: ReducedBitmap::for_frame(frame_width, frame_height, scale)?,
            baseline: ReducedBitmap::for_frame(frame_width, frame_height, scale)?,
        })
    }

    /// Start a cycle: the whole current grid becomes the previous one.
    pub(crate) fn advance(&mut self) {
        self.previous.copy_from(&self.current);
    }

    pub(crate) fn footprint(&self) -> usize {
        self.current.byte_len() + self.previous.byte_len() + self.baseline.byte_len()
    }
}

/// Open a source and run the capture loop until terminated or the source ends.
///
/// The source is closed exactly once on every path after a successful open.
pub async fn run_session<F, W>(
    factory: &F,
    config: &Config,
    signals: &SignalFlags,
    out: W,
) -> Result<SessionSummary, SessionError>
where
    F: SourceFactory,
    W: Write,
{
    let mut source = factory.open(&config.capture).await.map_err(SessionError::Open)?;

    let result = match CaptureLoop::new(&source, &config.detect, signals, out) {
        Ok(mut capture) => Ok(capture.run(&mut source).await),
        Err(e) => Err(e),
    };

    source.close().await;
    result
}

struct CaptureLoop<'a, W: Write> {
    bitmaps: Bitmaps,
    /// Frame size the grids were allocated for.
    resolution: (u32, u32),
    detect: &'a DetectConfig,
    params: DiffParams,
    signals: &'a SignalFlags,
    emitter: DetectionEmitter<W>,
    summary: SessionSummary,
    /// Set once a frame has been reduced; until then `previous` holds nothing.
    primed: bool,
}

impl<'a, W: Write> CaptureLoop<'a, W> {
    fn new<S: FrameSource>(
        source: &S,
        detect: &'a DetectConfig,
        signals: &'a SignalFlags,
        out: W,
    ) -> Result<Self, SessionError> {
        let (width, height) = source.resolution();
        let bitmaps = Bitmaps::allocate(width, height, detect.scale)?;

        let reduced_height = bitmaps.current.height();
        if detect.lower_scan_cutoff as usize >= reduced_height {
            return Err(SessionError::ScanCutoff {
                cutoff: detect.lower_scan_cutoff,
                reduced_height,
            });
        }
        if bitmaps.current.width() > MAX_COLUMNS {
            warn!(
                reduced_width = bitmaps.current.width(),
                max_columns = MAX_COLUMNS,
                "grid is wider than the detection record; extra columns are not recorded"
            );
        }

        info!(
            source = source.name(),
            width,
            height,
            scale = detect.scale,
            reduced_width = bitmaps.current.width(),
            reduced_height,
            bitmap_bytes = bitmaps.footprint(),
            mode = ?detect.debug,
            "capture session started"
        );

        Ok(Self {
            bitmaps,
            resolution: (width, height),
            detect,
            params: DiffParams::from(detect),
            signals,
            emitter: DetectionEmitter::new(detect.debug, detect.lower_scan_cutoff, out),
            summary: SessionSummary {
                exit: ExitReason::Terminated,
                frames_emitted: 0,
                frames_dropped: 0,
                write_errors: 0,
            },
            primed: false,
        })
    }

    async fn run<S: FrameSource>(&mut self, source: &mut S) -> SessionSummary {
        let signals = self.signals;
        let exit = loop {
            // Checkpoint: before a cycle and after the previous one
            if signals.terminate_requested() {
                info!("terminate requested, stopping capture");
                break ExitReason::Terminated;
            }

            self.bitmaps.advance();

            // A stalled source must not hold up termination; processing is
            // never interrupted once a frame is in hand.
            let grabbed = tokio::select! {
                biased;
                _ = signals.terminated() => {
                    info!("terminate requested while waiting for a frame");
                    break ExitReason::Terminated;
                }
                grabbed = source.grab() => grabbed,
            };

            match grabbed {
                Ok(frame) => self.process(&frame),
                Err(SourceError::EndOfStream) => {
                    info!("frame source reached end of stream");
                    break ExitReason::EndOfStream;
                }
                Err(e) => {
                    warn!(error = %e, "frame source failed, ending session");
                    break ExitReason::CaptureFailed;
                }
            }
        };

        self.summary.exit = exit;
        info!(
            exit = ?exit,
            frames_emitted = self.summary.frames_emitted,
            frames_dropped = self.summary.frames_dropped,
            write_errors = self.summary.write_errors,
            "capture session ended"
        );
        self.summary.clone()
    }

    fn process(&mut self, frame: &RawFrame) {
        // Decode before touching `current` so a bad frame leaves the grids
        // as they were.
        let surface = match decode(frame) {
            Ok(surface) => surface,
            Err(e) => {
                warn!(seq = frame.seq, bytes = frame.byte_len(), error = %e, "dropping undecodable frame");
                self.summary.frames_dropped += 1;
                return;
            }
        };
        if surface.dimensions() != self.resolution {
            warn!(
                seq = frame.seq,
                width = surface.width(),
                height = surface.height(),
                expected_width = self.resolution.0,
                expected_height = self.resolution.1,
                "dropping frame that does not match the session resolution"
            );
            self.summary.frames_dropped += 1;
            return;
        }

        reduce_into(&surface, self.detect.scale, &mut self.bitmaps.current);
        if !self.primed {
            // The first frame has nothing before it to differ from
            self.bitmaps.previous.copy_from(&self.bitmaps.current);
            self.primed = true;
        }

        let mut heatmap = HeatMap::for_mode(self.detect.debug);
        let outcome = diff(
            &self.bitmaps.current,
            &self.bitmaps.previous,
            &self.params,
            heatmap.as_mut(),
        );
        debug!(
            seq = frame.seq,
            captured_at = %frame.captured_at(),
            diff_sum = outcome.diff_sum,
            detections = outcome.record.events().count(),
            "frame compared"
        );

        match self.emitter.emit(&outcome, heatmap.as_ref()) {
            Ok(()) => self.summary.frames_emitted += 1,
            Err(e) => {
                error!(seq = frame.seq, error = %e, "failed to emit detection record");
                self.summary.write_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmaps_share_one_shape() {
        let bitmaps = Bitmaps::allocate(640, 480, 10).unwrap();
        assert_eq!(
            (bitmaps.current.width(), bitmaps.current.height()),
            (65, 49)
        );
        assert_eq!(&bitmaps.baseline, &ReducedBitmap::new(65, 49).unwrap());
        assert_eq!(bitmaps.footprint(), 3 * 65 * 49);
    }

    #[test]
    fn advance_copies_the_full_grid() {
        let mut bitmaps = Bitmaps::allocate(20, 20, 10).unwrap();
        bitmaps.current.set(2, 2, 42);
        bitmaps.current.set(0, 1, 7);
        bitmaps.advance();
        assert_eq!(bitmaps.previous, bitmaps.current);
        assert_eq!(bitmaps.baseline.get(2, 2), 0);
    }
}
