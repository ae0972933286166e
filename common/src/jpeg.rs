//! Marker-level JPEG inspection.
//!
//! Walks the segment headers of a JPEG up to the start of scan without
//! touching entropy-coded data. Used by sources to learn the frame size and
//! by the decoder to tell whether the Huffman tables are present.

const SOI: u8 = 0xD8;
const DHT: u8 = 0xC4;
const SOS: u8 = 0xDA;

/// What the header segments of one JPEG contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegLayout {
    /// `(width, height)` from the first SOF segment, if any.
    pub dimensions: Option<(u32, u32)>,
    pub has_huffman_tables: bool,
    /// Byte offset of the SOS marker.
    pub scan_start: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum JpegError {
    #[error("not a JPEG: missing SOI marker")]
    MissingSoi,
    #[error("expected marker at offset {0}")]
    BadMarker(usize),
    #[error("JPEG headers truncated at offset {0}")]
    Truncated(usize),
}

pub fn inspect(data: &[u8]) -> Result<JpegLayout, JpegError> {
    if data.len() < 2 || data[0] != 0xFF || data[1] != SOI {
        return Err(JpegError::MissingSoi);
    }

    let mut dimensions = None;
    let mut has_huffman_tables = false;
    let mut pos = 2;

    loop {
        if pos + 2 > data.len() {
            return Err(JpegError::Truncated(pos));
        }
        if data[pos] != 0xFF {
            return Err(JpegError::BadMarker(pos));
        }
        // Fill bytes
        if data[pos + 1] == 0xFF {
            pos += 1;
            continue;
        }

        let marker = data[pos + 1];
        match marker {
            SOS => {
                return Ok(JpegLayout {
                    dimensions,
                    has_huffman_tables,
                    scan_start: pos,
                })
            }
            // Standalone markers carry no length field.
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            _ => {}
        }

        if pos + 4 > data.len() {
            return Err(JpegError::Truncated(pos));
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > data.len() {
            return Err(JpegError::Truncated(pos));
        }

        if marker == DHT {
            has_huffman_tables = true;
        } else if is_start_of_frame(marker) && dimensions.is_none() {
            // [len:2][precision:1][height:2][width:2]...
            if len < 7 {
                return Err(JpegError::Truncated(pos));
            }
            let height = u16::from_be_bytes([data[pos + 5], data[pos + 6]]) as u32;
            let width = u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as u32;
            dimensions = Some((width, height));
        }

        pos += 2 + len;
    }
}

fn is_start_of_frame(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, DHT | 0xC8 | 0xCC)
}
