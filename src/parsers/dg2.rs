use base64::Engine;
use serde::Serialize;

use crate::utils::PkdError;

/// ISO 19794-5 facial record container magic (`FAC\0`).
const FAC_MAGIC: [u8; 4] = [0x46, 0x41, 0x43, 0x00];
/// JPEG start-of-image plus marker prefix.
const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
/// JPEG end-of-image marker.
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
/// JPEG2000 signature box (`....jP  \r\n\x87\n`).
const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageFormat {
    Jpeg,
    Jpeg2000,
}

/// A face image extracted from a DG2 biometric template.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceImage {
    pub format: ImageFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl FaceImage {
    pub fn mime_type(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Jpeg2000 => "image/jp2",
        }
    }

    /// Render as a `data:` URL for the datagroups detail endpoint.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

/// Extract the face images from a DG2 data group.
///
/// DG2 wraps one or more ISO 19794-5 facial records; each is located by the
/// `FAC\0` magic and holds a JPEG or JPEG2000 payload. The biometric header
/// is skipped by scanning for the image signature instead of decoding the
/// full CBEFF structure, which tolerates the encoder variance seen in the
/// field.
pub fn parse_dg2(dg2: &[u8]) -> Result<Vec<FaceImage>, PkdError> {
    let mut images = Vec::new();
    let mut offset = 0;

    while let Some(fac) = find(&dg2[offset..], &FAC_MAGIC) {
        let record_start = offset + fac;
        let search_from = record_start + FAC_MAGIC.len();
        let region = &dg2[search_from..];

        if let Some(image) = extract_jpeg(region).or_else(|| extract_jp2(region)) {
            images.push(image);
        }

        offset = search_from;
    }

    if images.is_empty() {
        // Some non-conformant encoders drop the FAC container and embed the
        // image directly.
        if let Some(image) = extract_jpeg(dg2).or_else(|| extract_jp2(dg2)) {
            images.push(image);
        }
    }

    if images.is_empty() {
        return Err(PkdError::DataGroup(
            "DG2 holds no recognizable facial image".to_string(),
        ));
    }
    Ok(images)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_jpeg(region: &[u8]) -> Option<FaceImage> {
    let start = find(region, &JPEG_SOI)?;
    let body = &region[start..];
    let end = find(body, &JPEG_EOI)? + JPEG_EOI.len();
    let data = body[..end].to_vec();
    let (width, height) = jpeg_dimensions(&data).unzip();
    Some(FaceImage {
        format: ImageFormat::Jpeg,
        width,
        height,
        data,
    })
}

fn extract_jp2(region: &[u8]) -> Option<FaceImage> {
    let start = find(region, &JP2_SIGNATURE)?;
    // JPEG2000 carries its own box lengths; the record runs to the end of
    // the region.
    Some(FaceImage {
        format: ImageFormat::Jpeg2000,
        width: None,
        height: None,
        data: region[start..].to_vec(),
    })
}

/// Read (width, height) from the SOF0 frame header of a baseline JPEG.
fn jpeg_dimensions(jpeg: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2; // past SOI
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = jpeg[pos + 1];
        if marker == 0xC0 {
            // SOF0: len(2) precision(1) height(2) width(2)
            if pos + 9 > jpeg.len() {
                return None;
            }
            let height = u32::from(jpeg[pos + 5]) << 8 | u32::from(jpeg[pos + 6]);
            let width = u32::from(jpeg[pos + 7]) << 8 | u32::from(jpeg[pos + 8]);
            return Some((width, height));
        }
        // Standalone markers carry no length field.
        if (0xD0..=0xD9).contains(&marker) || marker == 0x01 || marker == 0xFF {
            pos += 2;
            continue;
        }
        if pos + 4 > jpeg.len() {
            return None;
        }
        let segment_len = usize::from(jpeg[pos + 2]) << 8 | usize::from(jpeg[pos + 3]);
        pos += 2 + segment_len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal JPEG: SOI, SOF0 with 80x120, EOI.
    fn sample_jpeg() -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46];
        // SOF0 segment: marker, length 11, precision 8, height 120, width 80, 1 component
        jpeg.extend_from_slice(&[
            0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x78, 0x00, 0x50, 0x01, 0x01, 0x11, 0x00,
        ]);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    fn wrap_in_fac(payload: &[u8]) -> Vec<u8> {
        let mut dg2 = vec![0x75, 0x10, 0x7F, 0x61, 0x02, 0x01, 0x01];
        dg2.extend_from_slice(&FAC_MAGIC);
        dg2.extend_from_slice(&[0x30, 0x31, 0x30, 0x00, 0x00, 0x00]); // version + header bytes
        dg2.extend_from_slice(payload);
        dg2
    }

    #[test]
    fn test_extract_jpeg_from_fac_container() {
        let dg2 = wrap_in_fac(&sample_jpeg());
        let images = parse_dg2(&dg2).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].format, ImageFormat::Jpeg);
        assert_eq!(images[0].width, Some(80));
        assert_eq!(images[0].height, Some(120));
        assert_eq!(images[0].data.first(), Some(&0xFF));
        assert_eq!(images[0].data.last(), Some(&0xD9));
    }

    #[test]
    fn test_extract_jpeg2000() {
        let mut payload = JP2_SIGNATURE.to_vec();
        payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x14]);
        let dg2 = wrap_in_fac(&payload);
        let images = parse_dg2(&dg2).unwrap();
        assert_eq!(images[0].format, ImageFormat::Jpeg2000);
        assert_eq!(images[0].mime_type(), "image/jp2");
    }

    #[test]
    fn test_bare_jpeg_without_container() {
        let images = parse_dg2(&sample_jpeg()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].width, Some(80));
    }

    #[test]
    fn test_no_image_is_an_error() {
        assert!(parse_dg2(&[0x00, 0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_data_url_prefix() {
        let images = parse_dg2(&sample_jpeg()).unwrap();
        assert!(images[0].data_url().starts_with("data:image/jpeg;base64,"));
    }
}
