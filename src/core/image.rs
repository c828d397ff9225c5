//! Image sample decoding.
//!
//! Image XObjects and inline images end up here once their byte filters
//! have run. Samples are normalized to 8 bits per component in either
//! grayscale or RGB so the renderer never deals with packed bits,
//! palettes or CMYK. JPEG data (DCTDecode) is decoded with zune-jpeg.

use super::error::{PDFError, PDFResult};
use super::parser::PDFObject;

/// Color space of image samples.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageColorSpace {
    /// Grayscale (1 channel)
    Gray,
    /// RGB (3 channels)
    RGB,
    /// CMYK (4 channels)
    CMYK,
    /// Palette lookup into a base space
    Indexed {
        base: Box<ImageColorSpace>,
        hival: u8,
        lookup: Vec<u8>,
    },
    /// Unknown space with the given channel count
    Unknown(u8),
}

impl ImageColorSpace {
    /// Number of components per sample as stored in the stream.
    pub fn components(&self) -> u8 {
        match self {
            ImageColorSpace::Gray => 1,
            ImageColorSpace::RGB => 3,
            ImageColorSpace::CMYK => 4,
            ImageColorSpace::Indexed { .. } => 1,
            ImageColorSpace::Unknown(n) => *n,
        }
    }

    /// Parses a color space object.
    ///
    /// `resolve` follows references (ICC profile streams, palette strings).
    pub fn from_object(obj: &PDFObject, resolve: &dyn Fn(&PDFObject) -> PDFObject) -> Self {
        match obj {
            PDFObject::Name(name) => Self::from_name(name),
            PDFObject::Array(items) => {
                let family = items.first().map(resolve);
                let Some(family) = family.as_ref().and_then(|f| f.as_name()) else {
                    return ImageColorSpace::RGB;
                };
                match family {
                    "CalGray" | "Separation" => ImageColorSpace::Gray,
                    "CalRGB" | "Lab" => ImageColorSpace::RGB,
                    "DeviceN" => {
                        let count = items
                            .get(1)
                            .map(resolve)
                            .and_then(|names| names.as_array().map(|a| a.len()))
                            .unwrap_or(1);
                        match count {
                            1 => ImageColorSpace::Gray,
                            3 => ImageColorSpace::RGB,
                            4 => ImageColorSpace::CMYK,
                            n => ImageColorSpace::Unknown(n.min(32) as u8),
                        }
                    }
                    "ICCBased" => {
                        let n = items
                            .get(1)
                            .map(resolve)
                            .and_then(|s| s.as_dict().and_then(|d| d.get("N")).and_then(|n| n.as_int()))
                            .unwrap_or(3);
                        match n {
                            1 => ImageColorSpace::Gray,
                            4 => ImageColorSpace::CMYK,
                            _ => ImageColorSpace::RGB,
                        }
                    }
                    "Indexed" | "I" => {
                        let base = items
                            .get(1)
                            .map(|b| Self::from_object(&resolve(b), resolve))
                            .unwrap_or(ImageColorSpace::RGB);
                        let hival = items
                            .get(2)
                            .map(resolve)
                            .and_then(|h| h.as_int())
                            .unwrap_or(0)
                            .clamp(0, 255) as u8;
                        let lookup = match items.get(3).map(resolve) {
                            Some(PDFObject::String(s)) | Some(PDFObject::HexString(s)) => s,
                            Some(PDFObject::Stream(stream)) => stream.raw().to_vec(),
                            _ => Vec::new(),
                        };
                        ImageColorSpace::Indexed {
                            base: Box::new(base),
                            hival,
                            lookup,
                        }
                    }
                    other => Self::from_name(other),
                }
            }
            _ => ImageColorSpace::RGB,
        }
    }

    /// Converts one color value in this space to 8-bit RGB.
    ///
    /// Components are in `0.0..=1.0`, except for `Indexed` where the single
    /// component is the palette index.
    pub fn color_to_rgb(&self, comps: &[f64]) -> [u8; 3] {
        let c = |i: usize| comps.get(i).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let byte = |v: f64| (v * 255.0).round() as u8;
        match self {
            ImageColorSpace::Gray => {
                let v = byte(c(0));
                [v, v, v]
            }
            ImageColorSpace::RGB => [byte(c(0)), byte(c(1)), byte(c(2))],
            ImageColorSpace::CMYK => cmyk_to_rgb(byte(c(0)), byte(c(1)), byte(c(2)), byte(c(3))),
            ImageColorSpace::Indexed { base, hival, lookup } => {
                let index = comps
                    .first()
                    .copied()
                    .unwrap_or(0.0)
                    .round()
                    .clamp(0.0, *hival as f64) as usize;
                let n = base.components().max(1) as usize;
                let entry: Vec<f64> = (0..n)
                    .map(|i| lookup.get(index * n + i).copied().unwrap_or(0) as f64 / 255.0)
                    .collect();
                base.color_to_rgb(&entry)
            }
            ImageColorSpace::Unknown(n) => match n {
                1 => ImageColorSpace::Gray.color_to_rgb(comps),
                4 => ImageColorSpace::CMYK.color_to_rgb(comps),
                _ => ImageColorSpace::RGB.color_to_rgb(comps),
            },
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "DeviceGray" | "G" | "CalGray" => ImageColorSpace::Gray,
            "DeviceRGB" | "RGB" | "CalRGB" => ImageColorSpace::RGB,
            "DeviceCMYK" | "CMYK" => ImageColorSpace::CMYK,
            _ => ImageColorSpace::Unknown(3),
        }
    }
}

/// Decoded image: 8-bit samples, 1 (gray) or 3 (RGB) channels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Channels per pixel in `data`
    pub channels: u8,
    /// True for stencil masks, where `data` is coverage (255 = paint)
    pub is_mask: bool,
    pub data: Vec<u8>,
}

impl DecodedImage {
    /// A blank image used when samples cannot be produced.
    pub fn placeholder(width: u32, height: u32) -> Self {
        DecodedImage {
            width,
            height,
            channels: 1,
            is_mask: false,
            data: Vec::new(),
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Unpacks `bpc`-bit samples to 8 bits, row by row.
fn unpack_samples(data: &[u8], width: usize, height: usize, comps: usize, bpc: usize) -> Vec<u8> {
    let row_bits = width * comps * bpc;
    let row_bytes = row_bits.div_ceil(8);
    let samples_per_row = width * comps;
    let max = ((1u32 << bpc) - 1).max(1);
    let mut out = Vec::with_capacity(samples_per_row * height);

    for row in 0..height {
        let row_start = row * row_bytes;
        for s in 0..samples_per_row {
            let bit = s * bpc;
            let value = match bpc {
                8 => data.get(row_start + s).copied().unwrap_or(0) as u32,
                16 => data.get(row_start + s * 2).copied().unwrap_or(0) as u32,
                _ => {
                    let byte = data.get(row_start + bit / 8).copied().unwrap_or(0) as u32;
                    let shift = 8 - (bit % 8) - bpc;
                    (byte >> shift) & max
                }
            };
            let scaled = match bpc {
                8 | 16 => value,
                _ => value * 255 / max,
            };
            out.push(scaled as u8);
        }
    }
    out
}

fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let k = 255 - k as u32;
    [
        ((255 - c as u32) * k / 255) as u8,
        ((255 - m as u32) * k / 255) as u8,
        ((255 - y as u32) * k / 255) as u8,
    ]
}

/// Converts unpacked samples of `space` to gray or RGB.
fn normalize(samples: Vec<u8>, space: &ImageColorSpace, bpc: usize) -> (Vec<u8>, u8) {
    match space {
        ImageColorSpace::Gray => (samples, 1),
        ImageColorSpace::RGB => (samples, 3),
        ImageColorSpace::CMYK => {
            let rgb = samples
                .chunks_exact(4)
                .flat_map(|p| cmyk_to_rgb(p[0], p[1], p[2], p[3]))
                .collect();
            (rgb, 3)
        }
        ImageColorSpace::Indexed { base, hival, lookup } => {
            let base_comps = base.components().max(1) as usize;
            let max = ((1u32 << bpc) - 1).max(1);
            let mut palette_out = Vec::with_capacity(samples.len() * base_comps);
            for sample in samples {
                // Undo the 8-bit scaling to recover the palette index
                let index = if bpc < 8 { sample as u32 * max / 255 } else { sample as u32 };
                let index = index.min(*hival as u32) as usize;
                for c in 0..base_comps {
                    palette_out.push(lookup.get(index * base_comps + c).copied().unwrap_or(0));
                }
            }
            normalize(palette_out, base, 8)
        }
        ImageColorSpace::Unknown(n) => {
            let n = (*n).max(1) as usize;
            let gray = samples.chunks_exact(n).map(|p| p[0]).collect();
            (gray, 1)
        }
    }
}

/// Decodes raw (already unfiltered) image samples.
pub fn decode_raw_image(
    data: &[u8],
    width: u32,
    height: u32,
    bits_per_component: u8,
    color_space: &ImageColorSpace,
) -> PDFResult<DecodedImage> {
    let bpc = bits_per_component as usize;
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(PDFError::syntax(format!("Invalid BitsPerComponent {}", bpc)));
    }
    let comps = color_space.components().max(1) as usize;
    let (w, h) = (width as usize, height as usize);

    let expected = (w * comps * bpc).div_ceil(8) * h;
    if data.len() < expected {
        tracing::warn!(
            "Image data too short: expected {} bytes, got {}; padding",
            expected,
            data.len()
        );
    }

    let samples = unpack_samples(data, w, h, comps, bpc);
    let (data, channels) = normalize(samples, color_space, bpc);

    Ok(DecodedImage {
        width,
        height,
        channels,
        is_mask: false,
        data,
    })
}

/// Decodes a 1-bit stencil mask. With `/Decode [1 0]` set bits are transparent.
pub fn decode_image_mask(data: &[u8], width: u32, height: u32, inverted: bool) -> DecodedImage {
    let samples = unpack_samples(data, width as usize, height as usize, 1, 1);
    // Unset bits (0) paint by default
    let data = samples
        .into_iter()
        .map(|s| {
            let paints = (s == 0) != inverted;
            if paints { 255 } else { 0 }
        })
        .collect();
    DecodedImage {
        width,
        height,
        channels: 1,
        is_mask: true,
        data,
    }
}

/// Decodes JPEG (DCTDecode) data with zune-jpeg.
pub fn decode_jpeg(data: &[u8]) -> PDFResult<DecodedImage> {
    #[cfg(feature = "jpeg-decoding")]
    {
        use std::io::Cursor;
        use zune_jpeg::zune_core::options::DecoderOptions;

        let options = DecoderOptions::default()
            .set_max_width(u16::MAX as usize)
            .set_max_height(u16::MAX as usize);

        let mut decoder = zune_jpeg::JpegDecoder::new_with_options(Cursor::new(data), options);

        decoder
            .decode_headers()
            .map_err(|e| PDFError::syntax(format!("JPEG header decode error: {:?}", e)))?;

        let info = decoder
            .info()
            .ok_or_else(|| PDFError::syntax("Failed to get JPEG info"))?;

        let width = info.width as u32;
        let height = info.height as u32;

        let pixels = decoder
            .decode()
            .map_err(|e| PDFError::syntax(format!("JPEG decode error: {:?}", e)))?;

        let pixel_count = (width as usize * height as usize).max(1);
        let channels = pixels.len() / pixel_count;
        let (data, channels) = match channels {
            1 => (pixels, 1),
            3 => (pixels, 3),
            4 => normalize(pixels, &ImageColorSpace::CMYK, 8),
            n => {
                return Err(PDFError::syntax(format!("Unexpected JPEG channel count {}", n)));
            }
        };

        Ok(DecodedImage {
            width,
            height,
            channels,
            is_mask: false,
            data,
        })
    }

    #[cfg(not(feature = "jpeg-decoding"))]
    {
        let _ = data;
        Err(PDFError::UnsupportedFilter("DCTDecode".to_string()))
    }
}
