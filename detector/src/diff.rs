use gridwatch_common::config::DetectConfig;
use gridwatch_common::record::DetectionRecord;

use crate::heatmap::{HeatMap, HeatSource};
use crate::reduce::ReducedBitmap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffParams {
    pub multiplier: u32,
    pub threshold: u32,
    pub lower_scan_cutoff: u32,
}

impl From<&DetectConfig> for DiffParams {
    fn from(config: &DetectConfig) -> Self {
        Self {
            multiplier: config.multiplier,
            threshold: config.threshold,
            lower_scan_cutoff: config.lower_scan_cutoff,
        }
    }
}

/// Result of comparing two reduced frames.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub record: DetectionRecord,
    pub curr_sum: u64,
    pub prev_sum: u64,
    pub diff_sum: u64,
    pub scanned_rows: usize,
    pub columns: usize,
}

impl DiffOutcome {
    /// Mean weighted difference over the scanned cells.
    pub fn average_diff(&self) -> u64 {
        let cells = (self.columns * self.scanned_rows) as u64;
        if cells == 0 {
            0
        } else {
            self.diff_sum / cells
        }
    }
}

/// Compare `curr` against `prev` over every row above the lower scan cutoff.
///
/// A cell is a detection when `|curr - prev| * multiplier > threshold`. The
/// record keeps one entry per column and a later row overwrites an earlier
/// one, so the lowest detecting row of a column is what gets reported.
pub fn diff(
    curr: &ReducedBitmap,
    prev: &ReducedBitmap,
    params: &DiffParams,
    mut heatmap: Option<&mut HeatMap>,
) -> DiffOutcome {
    debug_assert_eq!(
        (curr.width(), curr.height()),
        (prev.width(), prev.height())
    );

    let scanned_rows = curr
        .height()
        .saturating_sub(params.lower_scan_cutoff as usize);
    let mut outcome = DiffOutcome {
        record: DetectionRecord::new(),
        curr_sum: 0,
        prev_sum: 0,
        diff_sum: 0,
        scanned_rows,
        columns: curr.width(),
    };

    for row in 0..scanned_rows {
        for col in 0..curr.width() {
            let c = curr.get(row, col);
            let p = prev.get(row, col);
            let magnitude = u32::from(c.abs_diff(p)).saturating_mul(params.multiplier);

            outcome.curr_sum += u64::from(c);
            outcome.prev_sum += u64::from(p);
            outcome.diff_sum += u64::from(magnitude);

            if magnitude > params.threshold {
                outcome.record.set(col, row as u32, magnitude);
            }

            if let Some(map) = heatmap.as_deref_mut() {
                match map.source() {
                    HeatSource::Current => map.plot(u32::from(c)),
                    HeatSource::Difference => map.plot(magnitude),
                }
            }
        }
        if let Some(map) = heatmap.as_deref_mut() {
            map.end_row();
        }
    }

    outcome
}
