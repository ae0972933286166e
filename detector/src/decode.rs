//! Frame decoding.
//!
//! Many UVC cameras emit motion-JPEG frames without a DHT segment and rely on
//! the decoder knowing the standard tables from ITU T.81 Annex K.3. The
//! decoder here splices those tables in before the start of scan whenever a
//! frame arrives without them.

use gridwatch_common::frame::{FramePayload, RawFrame};
use gridwatch_common::jpeg::{self, JpegError};
use image::{ImageFormat, ImageReader, RgbImage};
use std::borrow::Cow;
use std::io::Cursor;
use std::sync::OnceLock;

const DC_LUMA_BITS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const DC_CHROMA_BITS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const DC_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const AC_LUMA_BITS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7d];
const AC_LUMA_VALUES: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61,
    0x07, 0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xa1, 0x08, 0x23, 0x42, 0xb1, 0xc1, 0x15, 0x52,
    0xd1, 0xf0, 0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0a, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x25,
    0x26, 0x27, 0x28, 0x29, 0x2a, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45,
    0x46, 0x47, 0x48, 0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64,
    0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x83,
    0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99,
    0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6,
    0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3,
    0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe1, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8,
    0xe9, 0xea, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa,
];

const AC_CHROMA_BITS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77];
const AC_CHROMA_VALUES: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61,
    0x71, 0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xa1, 0xb1, 0xc1, 0x09, 0x23, 0x33,
    0x52, 0xf0, 0x15, 0x62, 0x72, 0xd1, 0x0a, 0x16, 0x24, 0x34, 0xe1, 0x25, 0xf1, 0x17, 0x18,
    0x19, 0x1a, 0x26, 0x27, 0x28, 0x29, 0x2a, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44,
    0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63,
    0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a,
    0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97,
    0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4,
    0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca,
    0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7,
    0xe8, 0xe9, 0xea, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa,
];

/// The standard DHT segment (marker included) that MJPEG streams omit.
pub fn default_huffman_segment() -> &'static [u8] {
    static SEGMENT: OnceLock<Vec<u8>> = OnceLock::new();
    SEGMENT.get_or_init(|| {
        let tables: [(u8, &[u8; 16], &[u8]); 4] = [
            (0x00, &DC_LUMA_BITS, &DC_VALUES),
            (0x01, &DC_CHROMA_BITS, &DC_VALUES),
            (0x10, &AC_LUMA_BITS, &AC_LUMA_VALUES),
            (0x11, &AC_CHROMA_BITS, &AC_CHROMA_VALUES),
        ];
        let body_len: usize = tables.iter().map(|(_, _, values)| 17 + values.len()).sum();

        let mut segment = Vec::with_capacity(4 + body_len);
        segment.extend_from_slice(&[0xFF, 0xC4]);
        segment.extend_from_slice(&((body_len + 2) as u16).to_be_bytes());
        for (class_and_id, bits, values) in tables {
            segment.push(class_and_id);
            segment.extend_from_slice(bits);
            segment.extend_from_slice(values);
        }
        segment
    })
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unreadable JPEG headers: {0}")]
    Jpeg(#[from] JpegError),
    #[error("JPEG decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("raw frame buffer does not match {width}x{height}")]
    RawSize { width: u32, height: u32 },
    #[error("decoded {got_width}x{got_height}, source reported {width}x{height}")]
    Dimensions {
        got_width: u32,
        got_height: u32,
        width: u32,
        height: u32,
    },
}

/// Return the JPEG unchanged if it carries Huffman tables, otherwise a copy
/// with the default tables inserted ahead of the scan.
pub fn with_huffman_tables(data: &[u8]) -> Result<Cow<'_, [u8]>, JpegError> {
    let layout = jpeg::inspect(data)?;
    if layout.has_huffman_tables {
        return Ok(Cow::Borrowed(data));
    }

    let dht = default_huffman_segment();
    let mut patched = Vec::with_capacity(data.len() + dht.len());
    patched.extend_from_slice(&data[..layout.scan_start]);
    patched.extend_from_slice(dht);
    patched.extend_from_slice(&data[layout.scan_start..]);
    Ok(Cow::Owned(patched))
}

/// Turn one captured frame into an RGB pixel surface.
pub fn decode(frame: &RawFrame) -> Result<RgbImage, DecodeError> {
    let image = match &frame.payload {
        FramePayload::Jpeg(data) => {
            let bytes = with_huffman_tables(data)?;
            let mut reader = ImageReader::new(Cursor::new(bytes.as_ref()));
            reader.set_format(ImageFormat::Jpeg);
            reader.decode()?.to_rgb8()
        }
        FramePayload::Rgb24(data) => RgbImage::from_raw(frame.width, frame.height, data.clone())
            .ok_or(DecodeError::RawSize {
                width: frame.width,
                height: frame.height,
            })?,
    };

    if image.dimensions() != (frame.width, frame.height) {
        return Err(DecodeError::Dimensions {
            got_width: image.width(),
            got_height: image.height(),
            width: frame.width,
            height: frame.height,
        });
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgb;

    fn encode_jpeg(image: &RgbImage) -> Vec<u8> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(image)
            .unwrap();
        out
    }

    /// Drop every DHT segment, the way MJPEG cameras ship frames.
    fn strip_huffman_tables(data: &[u8]) -> Vec<u8> {
        let mut out = data[..2].to_vec();
        let mut pos = 2;
        loop {
            let marker = data[pos + 1];
            if marker == 0xDA {
                out.extend_from_slice(&data[pos..]);
                return out;
            }
            let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            if marker != 0xC4 {
                out.extend_from_slice(&data[pos..pos + 2 + len]);
            }
            pos += 2 + len;
        }
    }

    fn test_image() -> RgbImage {
        RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 8) as u8, (y * 10) as u8, 128]))
    }

    #[test]
    fn default_segment_is_standard_length() {
        let segment = default_huffman_segment();
        assert_eq!(segment.len(), 420);
        assert_eq!(&segment[..4], &[0xFF, 0xC4, 0x01, 0xA2]);
        for (bits, values) in [
            (&DC_LUMA_BITS, DC_VALUES.len()),
            (&DC_CHROMA_BITS, DC_VALUES.len()),
            (&AC_LUMA_BITS, AC_LUMA_VALUES.len()),
            (&AC_CHROMA_BITS, AC_CHROMA_VALUES.len()),
        ] {
            assert_eq!(bits.iter().map(|&b| b as usize).sum::<usize>(), values);
        }
    }

    #[test]
    fn complete_jpeg_is_borrowed() {
        let jpeg = encode_jpeg(&test_image());
        assert!(matches!(with_huffman_tables(&jpeg).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn missing_tables_are_spliced_before_scan() {
        let jpeg = encode_jpeg(&test_image());
        let stripped = strip_huffman_tables(&jpeg);
        assert!(!jpeg::inspect(&stripped).unwrap().has_huffman_tables);

        let patched = with_huffman_tables(&stripped).unwrap();
        assert!(matches!(patched, Cow::Owned(_)));
        let layout = jpeg::inspect(&patched).unwrap();
        assert!(layout.has_huffman_tables);
        assert_eq!(layout.dimensions, Some((32, 24)));
    }

    #[test]
    fn mjpeg_frame_without_tables_decodes_like_full_frame() {
        let jpeg = encode_jpeg(&test_image());
        let full = decode(&RawFrame::jpeg(jpeg.clone(), 32, 24, 0, 0)).unwrap();
        let stripped = RawFrame::jpeg(strip_huffman_tables(&jpeg), 32, 24, 0, 1);
        let decoded = decode(&stripped).unwrap();
        assert_eq!(decoded, full);
    }

    #[test]
    fn corrupt_frame_is_an_error() {
        let frame = RawFrame::jpeg(b"\xFF\xD8garbage".to_vec(), 32, 24, 0, 0);
        assert!(matches!(decode(&frame), Err(DecodeError::Jpeg(_))));
        let frame = RawFrame::jpeg(b"not a jpeg".to_vec(), 32, 24, 0, 0);
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let jpeg = encode_jpeg(&test_image());
        let frame = RawFrame::jpeg(jpeg, 64, 48, 0, 0);
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::Dimensions {
                got_width: 32,
                got_height: 24,
                ..
            })
        ));
    }

    #[test]
    fn raw_rgb_frames_pass_through() {
        let frame = RawFrame::rgb24(vec![7; 4 * 2 * 3], 4, 2, 0, 0).unwrap();
        let image = decode(&frame).unwrap();
        assert_eq!(image.dimensions(), (4, 2));
        assert_eq!(image.get_pixel(3, 1), &Rgb([7, 7, 7]));
    }
}
