use gridwatch_common::config::DebugMode;
use gridwatch_common::record::RECORD_LEN;
use std::io::Write;

use crate::diff::DiffOutcome;
use crate::heatmap::HeatMap;

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("short write: {written} of {RECORD_LEN} record bytes accepted")]
    ShortWrite { written: usize },
    #[error("output write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes each frame's outcome to the output sink.
///
/// Silent mode writes the 71-byte record and flushes. Visual modes redraw
/// the heat map from the top-left corner with a status line underneath and
/// never emit binary records.
pub struct DetectionEmitter<W: Write> {
    mode: DebugMode,
    lower_scan_cutoff: u32,
    out: W,
}

impl<W: Write> DetectionEmitter<W> {
    pub fn new(mode: DebugMode, lower_scan_cutoff: u32, out: W) -> Self {
        Self {
            mode,
            lower_scan_cutoff,
            out,
        }
    }

    pub fn emit(&mut self, outcome: &DiffOutcome, heatmap: Option<&HeatMap>) -> Result<(), EmitError> {
        if self.mode.is_visual() {
            return self.draw(outcome, heatmap);
        }

        // A single write: a partial record is reported, never topped up, so
        // the stream can't end up with a duplicated or shifted record.
        let written = self.out.write(outcome.record.as_bytes())?;
        self.out.flush()?;
        if written != RECORD_LEN {
            return Err(EmitError::ShortWrite { written });
        }
        Ok(())
    }

    fn draw(&mut self, outcome: &DiffOutcome, heatmap: Option<&HeatMap>) -> Result<(), EmitError> {
        write!(self.out, "\x1b[1;1H")?;
        let rows = match heatmap {
            Some(map) => {
                self.out.write_all(map.as_str().as_bytes())?;
                map.rows()
            }
            None => 0,
        };
        write!(
            self.out,
            "\x1b[{};1H\x1b[2Kavg-diff {} lower-scan {}",
            rows + 2,
            outcome.average_diff(),
            self.lower_scan_cutoff
        )?;
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff, DiffParams};
    use crate::heatmap::HeatSource;
    use crate::reduce::ReducedBitmap;
    use gridwatch_common::record::SENTINEL;

    fn outcome(curr_value: u8) -> DiffOutcome {
        let prev = ReducedBitmap::new(3, 2).unwrap();
        let mut curr = prev.clone();
        curr.set(0, 1, curr_value);
        let params = DiffParams {
            multiplier: 1,
            threshold: 10,
            lower_scan_cutoff: 0,
        };
        diff(&curr, &prev, &params, None)
    }

    /// Accepts at most `limit` bytes per write call.
    struct Trickle {
        limit: usize,
        data: Vec<u8>,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn silent_mode_writes_one_record_per_frame() {
        let mut emitter = DetectionEmitter::new(DebugMode::Silent, 0, Vec::new());
        emitter.emit(&outcome(0), None).unwrap();
        emitter.emit(&outcome(120), None).unwrap();
        let out = emitter.into_inner();
        assert_eq!(out.len(), 2 * RECORD_LEN);
        assert!(out[..70].iter().all(|&b| b == 0));
        assert_eq!(out[70], SENTINEL);
        assert_eq!(&out[71 + 2..71 + 4], &[0, 120]);
        assert_eq!(out[141], SENTINEL);
    }

    #[test]
    fn short_write_is_reported_not_retried() {
        let mut emitter = DetectionEmitter::new(
            DebugMode::Silent,
            0,
            Trickle {
                limit: 40,
                data: Vec::new(),
            },
        );
        let err = emitter.emit(&outcome(50), None).unwrap_err();
        assert!(matches!(err, EmitError::ShortWrite { written: 40 }));
        assert_eq!(emitter.into_inner().data.len(), 40);
    }

    #[test]
    fn visual_mode_draws_instead_of_writing_records() {
        let result = outcome(120);
        let mut map = HeatMap::new(HeatSource::Difference);
        map.plot(0);
        map.plot(120);
        map.end_row();

        let mut emitter = DetectionEmitter::new(DebugMode::VisualizeDiff, 1, Vec::new());
        emitter.emit(&result, Some(&map)).unwrap();
        let text = String::from_utf8(emitter.into_inner()).unwrap();
        assert!(text.starts_with("\x1b[1;1H.o\n"));
        // 120 over 6 scanned cells
        assert!(text.ends_with("avg-diff 20 lower-scan 1"));
        assert!(!text.as_bytes().contains(&SENTINEL));
    }
}
