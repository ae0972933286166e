/// Per-frame binary detection record.
///
/// Wire format (fixed 71 bytes, no header, records framed by length):
///   [2*col]      row of the last cell in `col` above threshold (0..=253)
///   [2*col + 1]  weighted difference of that cell, clamped to 0..=253
///   [70]         sentinel, always 254
///
/// Columns without a detection stay zero. Only columns 0..35 fit.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DetectionRecord([u8; RECORD_LEN]);

pub const RECORD_LEN: usize = 71;
pub const MAX_COLUMNS: usize = 35;
pub const SENTINEL: u8 = 254;
/// Largest value a row or magnitude byte may carry.
pub const CLAMP_MAX: u32 = 253;

/// One decoded `(column, row, magnitude)` entry of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionEvent {
    pub column: usize,
    pub row: u8,
    pub magnitude: u8,
}

impl DetectionRecord {
    pub fn new() -> Self {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[RECORD_LEN - 1] = SENTINEL;
        Self(bytes)
    }

    /// Store a detection for `column`, overwriting any earlier one.
    ///
    /// Row and magnitude are clamped to 253. Returns `false` when the
    /// column lies beyond the record.
    pub fn set(&mut self, column: usize, row: u32, magnitude: u32) -> bool {
        if column >= MAX_COLUMNS {
            return false;
        }
        self.0[2 * column] = row.min(CLAMP_MAX) as u8;
        self.0[2 * column + 1] = magnitude.min(CLAMP_MAX) as u8;
        true
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        &self.0
    }

    /// Parse one record from a consumer's byte stream.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RecordError> {
        let bytes: [u8; RECORD_LEN] = data.try_into().map_err(|_| RecordError::Length {
            got: data.len(),
        })?;
        if bytes[RECORD_LEN - 1] != SENTINEL {
            return Err(RecordError::Sentinel(bytes[RECORD_LEN - 1]));
        }
        Ok(Self(bytes))
    }

    /// Columns holding a detection. A pair of zero bytes means "none".
    pub fn events(&self) -> impl Iterator<Item = DetectionEvent> + '_ {
        (0..MAX_COLUMNS).filter_map(move |column| {
            let row = self.0[2 * column];
            let magnitude = self.0[2 * column + 1];
            (row != 0 || magnitude != 0).then_some(DetectionEvent {
                column,
                row,
                magnitude,
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0[..RECORD_LEN - 1].iter().all(|&b| b == 0)
    }
}

impl Default for DetectionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DetectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.events()).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("detection record must be {RECORD_LEN} bytes, got {got}")]
    Length { got: usize },
    #[error("detection record sentinel is {0}, expected {SENTINEL}")]
    Sentinel(u8),
}
