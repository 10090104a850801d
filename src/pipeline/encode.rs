//! Image encoding: `DynamicImage` → PNG bytes, and base64 for inline output.
//!
//! PNG keeps rendered text lossless. With `optimize` the encoder spends more
//! CPU on the best zlib level and adaptive filtering, which typically shrinks
//! rendered pages by 10–30 %.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::DynamicImage;
use tracing::debug;

/// Encode a rendered page as PNG.
pub fn encode_png(img: &DynamicImage, optimize: bool) -> Result<Vec<u8>, image::ImageError> {
    let (compression, filter) = if optimize {
        (CompressionType::Best, FilterType::Adaptive)
    } else {
        (CompressionType::Fast, FilterType::Sub)
    };

    let mut buf = Vec::new();
    img.write_with_encoder(PngEncoder::new_with_quality(&mut buf, compression, filter))?;

    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        for optimize in [true, false] {
            let png = encode_png(&img, optimize).expect("encode should succeed");
            assert!(png.starts_with(PNG_MAGIC));
            let decoded = image::load_from_memory(&png).expect("valid png");
            assert_eq!(decoded.width(), 10);
        }
    }

    #[test]
    fn base64_inline_payload() {
        let encoded = to_base64(PNG_MAGIC);
        assert_eq!(encoded, "iVBORw0KGgo=");
        assert_eq!(STANDARD.decode(&encoded).unwrap(), PNG_MAGIC);
    }
}
