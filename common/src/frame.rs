/// The payload carried inside a captured frame.
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// A (motion-)JPEG image, possibly missing its Huffman tables.
    Jpeg(Vec<u8>),
    /// Packed 8-bit RGB, row-major, `width * height * 3` bytes.
    Rgb24(Vec<u8>),
}

/// One undecoded frame as handed over by a frame source.
///
/// `width` and `height` are what the source reported for this capture; the
/// payload itself is only inspected by the decoder.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub payload: FramePayload,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl RawFrame {
    pub fn jpeg(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: FramePayload::Jpeg(data),
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    /// Build a raw RGB frame, checking the buffer covers the stated size.
    pub fn rgb24(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            payload: FramePayload::Rgb24(data),
            width,
            height,
            captured_at_ms,
            seq,
        })
    }

    /// Returns the raw payload bytes regardless of encoding.
    pub fn payload_bytes(&self) -> &[u8] {
        match &self.payload {
            FramePayload::Jpeg(data) => data,
            FramePayload::Rgb24(data) => data,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.payload_bytes().len()
    }

    pub fn captured_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("raw frame holds {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb24_checks_buffer_size() {
        assert!(RawFrame::rgb24(vec![0; 2 * 2 * 3], 2, 2, 0, 0).is_ok());
        let err = RawFrame::rgb24(vec![0; 11], 2, 2, 0, 0).unwrap_err();
        assert!(matches!(err, FrameError::SizeMismatch { got: 11, expected: 12 }));
    }

    #[test]
    fn byte_len_reports_payload() {
        let frame = RawFrame::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], 4, 4, 1708300000000, 3);
        assert_eq!(frame.byte_len(), 4);
        assert_eq!(frame.captured_at().timestamp_millis(), 1708300000000);
    }
}
