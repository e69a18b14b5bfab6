//! Signature image decoding and box fitting.

use crate::error::{FormStampError, Result};
use base64::Engine;
use ::image::GenericImageView;

/// Image payload ready to become an image XObject.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfImage {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: u8,
    /// `Some("DCTDecode")` for pass-through JPEG; raw samples otherwise.
    pub filter: Option<&'static str>,
    pub data: Vec<u8>,
    /// 8-bit soft mask, present only when some pixel is not opaque.
    pub alpha: Option<Vec<u8>>,
}

impl PdfImage {
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

/// Accepts a `data:image/...;base64,` URI or bare base64.
pub fn decode_image_source(source: &str) -> Result<PdfImage> {
    let source = source.trim();
    if let Some((mime, data)) = parse_data_uri(source)? {
        return decode_image_bytes(&data, Some(&mime));
    }
    let data = base64::engine::general_purpose::STANDARD
        .decode(source)
        .map_err(|err| FormStampError::Image(format!("image value is not base64: {err}")))?;
    decode_image_bytes(&data, None)
}

pub fn decode_image_bytes(data: &[u8], mime: Option<&str>) -> Result<PdfImage> {
    let format = match mime {
        Some(mime) if mime.contains("png") => ::image::ImageFormat::Png,
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => ::image::ImageFormat::Jpeg,
        Some(mime) => {
            return Err(FormStampError::Image(format!(
                "unsupported image type {mime}"
            )));
        }
        None => ::image::guess_format(data)
            .map_err(|err| FormStampError::Image(format!("unrecognized image data: {err}")))?,
    };
    if !matches!(format, ::image::ImageFormat::Png | ::image::ImageFormat::Jpeg) {
        return Err(FormStampError::Image(format!(
            "unsupported image format {format:?}"
        )));
    }

    let decoded = ::image::load_from_memory_with_format(data, format)
        .map_err(|err| FormStampError::Image(format!("image decode failed: {err}")))?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(FormStampError::Image("image has no pixels".to_string()));
    }

    if format == ::image::ImageFormat::Jpeg {
        let color_space = match decoded.color() {
            ::image::ColorType::L8 | ::image::ColorType::La8 => "DeviceGray",
            _ => "DeviceRGB",
        };
        return Ok(PdfImage {
            width,
            height,
            color_space,
            bits_per_component: 8,
            filter: Some("DCTDecode"),
            data: data.to_vec(),
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    Ok(PdfImage {
        width,
        height,
        color_space: "DeviceRGB",
        bits_per_component: 8,
        filter: None,
        data: rgb,
        alpha: has_alpha.then_some(alpha),
    })
}

/// `Ok(None)` when `uri` is not a data URI at all.
fn parse_data_uri(uri: &str) -> Result<Option<(String, Vec<u8>)>> {
    let Some(rest) = uri.strip_prefix("data:") else {
        return Ok(None);
    };
    let Some((header, data_part)) = rest.split_once(',') else {
        return Err(FormStampError::Image("data uri has no payload".to_string()));
    };
    let mime = header
        .split(';')
        .next()
        .filter(|mime| !mime.is_empty())
        .unwrap_or("application/octet-stream")
        .to_ascii_lowercase();
    let data = if header.contains("base64") {
        base64::engine::general_purpose::STANDARD
            .decode(data_part.trim())
            .map_err(|err| FormStampError::Image(format!("data uri payload is not base64: {err}")))?
    } else {
        data_part.as_bytes().to_vec()
    };
    Ok(Some((mime, data)))
}

/// Placement of an image inside its box, relative to the box's top-left
/// corner, in the box's units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageFit {
    pub offset_x: f32,
    pub offset_y: f32,
    pub width: f32,
    pub height: f32,
}

/// Full box width first, then capped by height; aspect ratio preserved and
/// the result centered both ways.
pub fn fit_image(aspect_ratio: f32, box_width: f32, box_height: f32) -> ImageFit {
    let aspect = if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
        aspect_ratio
    } else {
        1.0
    };
    let mut width = box_width;
    let mut height = width / aspect;
    if height > box_height {
        height = box_height;
        width = height * aspect;
    }
    ImageFit {
        offset_x: (box_width - width) / 2.0,
        offset_y: (box_height - height) / 2.0,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, alpha: u8) -> Vec<u8> {
        let img = ::image::RgbaImage::from_pixel(width, height, ::image::Rgba([10, 20, 30, alpha]));
        let mut out = Cursor::new(Vec::new());
        ::image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ::image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn decodes_png_data_uri() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(4, 2, 255));
        let image = decode_image_source(&format!("data:image/png;base64,{encoded}")).expect("decode");
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.data.len(), 4 * 2 * 3);
        assert!(image.alpha.is_none());
        assert_eq!(image.filter, None);
    }

    #[test]
    fn keeps_soft_mask_for_translucent_png() {
        let image = decode_image_bytes(&png_bytes(2, 2, 128), None).expect("decode");
        assert_eq!(image.alpha.as_deref(), Some(&[128u8, 128, 128, 128][..]));
    }

    #[test]
    fn accepts_bare_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(1, 1, 255));
        assert!(decode_image_source(&encoded).is_ok());
    }

    #[test]
    fn rejects_corrupt_and_unsupported_data() {
        assert!(matches!(
            decode_image_source("data:image/png;base64,AAAA"),
            Err(FormStampError::Image(_))
        ));
        assert!(matches!(
            decode_image_source("data:image/gif;base64,R0lGODlh"),
            Err(FormStampError::Image(_))
        ));
        assert!(decode_image_source("not an image!").is_err());
    }

    #[test]
    fn wide_image_fills_width_and_centers_vertically() {
        let fit = fit_image(4.0, 40.0, 15.0);
        assert_eq!(fit.width, 40.0);
        assert_eq!(fit.height, 10.0);
        assert_eq!(fit.offset_x, 0.0);
        assert_eq!(fit.offset_y, 2.5);
    }

    #[test]
    fn tall_image_is_capped_by_height() {
        let fit = fit_image(0.5, 40.0, 15.0);
        assert_eq!(fit.height, 15.0);
        assert_eq!(fit.width, 7.5);
        assert_eq!(fit.offset_x, 16.25);
        assert_eq!(fit.offset_y, 0.0);
    }
}
