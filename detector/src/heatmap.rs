use gridwatch_common::config::DebugMode;

/// Intensity ramp, one glyph per band of 25.
const RAMP: &[u8; 10] = b".-:*o=&%#@";
const BAND: u32 = 25;

/// Which per-cell value is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatSource {
    Current,
    Difference,
}

/// ASCII rendering of one scanned frame, built row by row during the diff.
#[derive(Debug, Clone)]
pub struct HeatMap {
    source: HeatSource,
    text: String,
    rows: usize,
}

impl HeatMap {
    pub fn new(source: HeatSource) -> Self {
        Self {
            source,
            text: String::new(),
            rows: 0,
        }
    }

    /// `None` when the mode writes binary records instead.
    pub fn for_mode(mode: DebugMode) -> Option<Self> {
        match mode {
            DebugMode::Silent => None,
            DebugMode::VisualizeCurrent => Some(Self::new(HeatSource::Current)),
            DebugMode::VisualizeDiff => Some(Self::new(HeatSource::Difference)),
        }
    }

    pub fn source(&self) -> HeatSource {
        self.source
    }

    pub fn plot(&mut self, value: u32) {
        self.text.push(glyph(value));
    }

    pub fn end_row(&mut self) {
        self.text.push('\n');
        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

pub fn glyph(value: u32) -> char {
    RAMP[(value / BAND).min(RAMP.len() as u32 - 1) as usize] as char
}
