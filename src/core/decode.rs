//! Stream filter pipeline.
//!
//! A stream's `/Filter` entry names an ordered chain of decoders that are
//! applied left to right, each one's output feeding the next. Byte filters
//! turn bytes into bytes; an image codec may only appear last and yields
//! structured samples instead (see [`FilterCategory`]).

use super::error::{PDFError, PDFResult};
use super::image::{self, DecodedImage};
use super::lexer::Lexer;
use super::parser::{Dict, PDFObject, PdfStream};
use flate2::read::{DeflateDecoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::borrow::Cow;
use std::io::Read;

/// What a filter produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCategory {
    /// Bytes in, bytes out.
    Bytes,
    /// Final-stage decoder producing image samples.
    ImageCodec,
}

/// A named decode filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Flate,
    Lzw,
    AsciiHex,
    Ascii85,
    RunLength,
    Crypt,
    Dct,
    Jpx,
    Jbig2,
    CcittFax,
    /// A name no decoder exists for.
    Unsupported(String),
}

impl Filter {
    /// Maps a filter name (full or inline-image abbreviation) onto a filter.
    pub fn from_name(name: &str) -> Self {
        match name {
            "FlateDecode" | "Fl" => Filter::Flate,
            "LZWDecode" | "LZW" => Filter::Lzw,
            "ASCIIHexDecode" | "AHx" => Filter::AsciiHex,
            "ASCII85Decode" | "A85" => Filter::Ascii85,
            "RunLengthDecode" | "RL" => Filter::RunLength,
            "Crypt" => Filter::Crypt,
            "DCTDecode" | "DCT" => Filter::Dct,
            "JPXDecode" => Filter::Jpx,
            "JBIG2Decode" => Filter::Jbig2,
            "CCITTFaxDecode" | "CCF" => Filter::CcittFax,
            other => Filter::Unsupported(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Filter::Flate => "FlateDecode",
            Filter::Lzw => "LZWDecode",
            Filter::AsciiHex => "ASCIIHexDecode",
            Filter::Ascii85 => "ASCII85Decode",
            Filter::RunLength => "RunLengthDecode",
            Filter::Crypt => "Crypt",
            Filter::Dct => "DCTDecode",
            Filter::Jpx => "JPXDecode",
            Filter::Jbig2 => "JBIG2Decode",
            Filter::CcittFax => "CCITTFaxDecode",
            Filter::Unsupported(name) => name,
        }
    }

    pub fn category(&self) -> FilterCategory {
        match self {
            Filter::Dct | Filter::Jpx | Filter::Jbig2 | Filter::CcittFax => {
                FilterCategory::ImageCodec
            }
            _ => FilterCategory::Bytes,
        }
    }
}

/// Parameters from a `/DecodeParms` dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
    pub predictor: i32,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
    pub early_change: i32,
    /// `/Name` of a `Crypt` filter; only `Identity` is accepted.
    pub crypt_name: Option<String>,
}

impl Default for DecodeParams {
    fn default() -> Self {
        DecodeParams {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
            early_change: 1,
            crypt_name: None,
        }
    }
}

impl DecodeParams {
    pub fn from_dict(dict: &Dict) -> Self {
        let int = |key: &str, default: i64| {
            dict.get(key).and_then(|v| v.as_int()).unwrap_or(default)
        };
        DecodeParams {
            predictor: int("Predictor", 1) as i32,
            colors: int("Colors", 1).clamp(1, 32) as usize,
            bits_per_component: int("BitsPerComponent", 8).clamp(1, 16) as usize,
            columns: int("Columns", 1).max(1) as usize,
            early_change: int("EarlyChange", 1) as i32,
            crypt_name: dict.get("Name").and_then(|v| v.as_name()).map(str::to_string),
        }
    }
}

/// Output of a filter chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Bytes(Vec<u8>),
    Image(DecodedImage),
}

impl Decoded {
    /// Flattens the result to bytes; image samples are returned as-is.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Decoded::Bytes(bytes) => bytes,
            Decoded::Image(image) => image.data,
        }
    }
}

/// Reads the `/Filter` and `/DecodeParms` entries of a stream dictionary.
///
/// `resolve` follows one level of indirection for values stored as references.
pub fn filter_chain(
    dict: &Dict,
    resolve: &dyn Fn(&PDFObject) -> PDFObject,
) -> (Vec<Filter>, Vec<DecodeParams>) {
    let filter_obj = dict.get("Filter").or_else(|| dict.get("F")).map(resolve);
    let params_obj = dict
        .get("DecodeParms")
        .or_else(|| dict.get("DP"))
        .map(resolve);

    let filters: Vec<Filter> = match &filter_obj {
        Some(PDFObject::Name(name)) => vec![Filter::from_name(name)],
        Some(PDFObject::Array(items)) => items
            .iter()
            .filter_map(|item| resolve(item).as_name().map(Filter::from_name))
            .collect(),
        _ => Vec::new(),
    };

    let params_for = |obj: PDFObject| match obj.as_dict() {
        Some(d) => DecodeParams::from_dict(d),
        None => DecodeParams::default(),
    };
    let mut params: Vec<DecodeParams> = match params_obj {
        Some(PDFObject::Array(items)) => items.iter().map(|item| params_for(resolve(item))).collect(),
        Some(obj) => vec![params_for(obj)],
        None => Vec::new(),
    };
    params.resize(filters.len(), DecodeParams::default());

    (filters, params)
}

/// Decodes a stream whose dictionary only holds direct values.
pub fn decode_stream(stream: &PdfStream) -> PDFResult<Decoded> {
    let (filters, params) = filter_chain(&stream.dict, &|obj| obj.clone());
    decode(stream.raw(), &filters, &params)
}

/// Runs `raw` through `filters` left to right.
///
/// An image codec must be the final filter; it turns the accumulated bytes
/// into [`Decoded::Image`].
pub fn decode(raw: &[u8], filters: &[Filter], params: &[DecodeParams]) -> PDFResult<Decoded> {
    let default_params = DecodeParams::default();
    let mut data: Cow<[u8]> = Cow::Borrowed(raw);

    for (i, filter) in filters.iter().enumerate() {
        let p = params.get(i).unwrap_or(&default_params);
        match filter.category() {
            FilterCategory::ImageCodec => {
                if i + 1 != filters.len() {
                    return Err(PDFError::UnsupportedFilter(format!(
                        "{} followed by further filters",
                        filter.name()
                    )));
                }
                return decode_image_codec(filter, &data).map(Decoded::Image);
            }
            FilterCategory::Bytes => {
                data = Cow::Owned(decode_bytes(filter, &data, p)?);
            }
        }
    }

    Ok(Decoded::Bytes(data.into_owned()))
}

fn decode_bytes(filter: &Filter, data: &[u8], params: &DecodeParams) -> PDFResult<Vec<u8>> {
    match filter {
        Filter::Flate => apply_predictor(decode_flate(data)?, params),
        Filter::Lzw => apply_predictor(decode_lzw(data, params.early_change)?, params),
        Filter::AsciiHex => decode_ascii_hex(data),
        Filter::Ascii85 => decode_ascii85(data),
        Filter::RunLength => decode_run_length(data),
        Filter::Crypt => match params.crypt_name.as_deref() {
            None | Some("Identity") => Ok(data.to_vec()),
            Some(other) => Err(PDFError::UnsupportedFilter(format!("Crypt /{}", other))),
        },
        other => Err(PDFError::UnsupportedFilter(other.name().to_string())),
    }
}

fn decode_image_codec(filter: &Filter, data: &[u8]) -> PDFResult<DecodedImage> {
    match filter {
        Filter::Dct => image::decode_jpeg(data),
        other => Err(PDFError::UnsupportedFilter(other.name().to_string())),
    }
}

/// Encodes `data` so that decoding with the same chain reproduces it.
///
/// Filters are applied right to left. Image codecs have no encoder.
pub fn encode(data: &[u8], filters: &[Filter], params: &[DecodeParams]) -> PDFResult<Vec<u8>> {
    let default_params = DecodeParams::default();
    let mut out = data.to_vec();
    for (i, filter) in filters.iter().enumerate().rev() {
        let p = params.get(i).unwrap_or(&default_params);
        out = match filter {
            Filter::Flate => encode_flate(&out)?,
            Filter::Lzw => encode_lzw(&out, p.early_change)?,
            Filter::AsciiHex => encode_ascii_hex(&out),
            Filter::Ascii85 => encode_ascii85(&out),
            Filter::RunLength => encode_run_length(&out),
            Filter::Crypt => out,
            other => return Err(PDFError::UnsupportedFilter(format!("{} encoder", other.name()))),
        };
    }
    Ok(out)
}

/// Decodes a FlateDecode (zlib/deflate) compressed stream.
///
/// Streams with a broken zlib header are retried as raw deflate, and a
/// truncated stream yields whatever was inflated before the error.
pub fn decode_flate(compressed_data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    let zlib_result = ZlibDecoder::new(compressed_data).read_to_end(&mut decompressed);

    match zlib_result {
        Ok(_) => Ok(decompressed),
        Err(e) if !decompressed.is_empty() => {
            tracing::warn!("FlateDecode stopped early ({}), keeping {} bytes", e, decompressed.len());
            Ok(decompressed)
        }
        Err(e) => {
            let mut raw = Vec::new();
            match DeflateDecoder::new(compressed_data).read_to_end(&mut raw) {
                Ok(_) => Ok(raw),
                Err(_) if !raw.is_empty() => Ok(raw),
                Err(_) => Err(PDFError::syntax(format!("FlateDecode error: {}", e))),
            }
        }
    }
}

pub fn encode_flate(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::default());
    let mut compressed = Vec::new();
    encoder
        .read_to_end(&mut compressed)
        .map_err(|e| PDFError::syntax(format!("FlateDecode encode error: {}", e)))?;
    Ok(compressed)
}

/// Decodes LZW data. `EarlyChange` 1 (the default) switches code width one code early.
pub fn decode_lzw(data: &[u8], early_change: i32) -> PDFResult<Vec<u8>> {
    let mut decoder = if early_change == 0 {
        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
    } else {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    };
    let mut output = Vec::new();
    let result = decoder.into_vec(&mut output).decode(data);
    if let Err(e) = result.status {
        if output.is_empty() {
            return Err(PDFError::syntax(format!("LZWDecode error: {:?}", e)));
        }
        tracing::warn!("LZWDecode stopped early ({:?}), keeping {} bytes", e, output.len());
    }
    Ok(output)
}

pub fn encode_lzw(data: &[u8], early_change: i32) -> PDFResult<Vec<u8>> {
    let mut encoder = if early_change == 0 {
        weezl::encode::Encoder::new(weezl::BitOrder::Msb, 8)
    } else {
        weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    };
    encoder
        .encode(data)
        .map_err(|e| PDFError::syntax(format!("LZW encode error: {:?}", e)))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

pub fn decode_ascii_hex(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;
    for &b in data {
        if b == b'>' {
            break;
        }
        let Some(v) = hex_value(b) else {
            continue;
        };
        match high.take() {
            Some(h) => out.push((h << 4) | v),
            None => high = Some(v),
        }
    }
    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

pub fn encode_ascii_hex(data: &[u8]) -> Vec<u8> {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = Vec::with_capacity(data.len() * 2 + 1);
    for &b in data {
        out.push(DIGITS[(b >> 4) as usize]);
        out.push(DIGITS[(b & 0x0F) as usize]);
    }
    out.push(b'>');
    out
}

pub fn decode_ascii85(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut count = 0;

    let mut bytes = data;
    if bytes.starts_with(b"<~") {
        bytes = &bytes[2..];
    }

    for &b in bytes {
        match b {
            b'~' => break,
            b'z' if count == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[count] = b - b'!';
                count += 1;
                if count == 5 {
                    let value = group.iter().fold(0u64, |acc, d| acc * 85 + *d as u64);
                    if value > u32::MAX as u64 {
                        return Err(PDFError::syntax("ASCII85Decode group overflow"));
                    }
                    out.extend_from_slice(&(value as u32).to_be_bytes());
                    count = 0;
                }
            }
            _ if Lexer::is_whitespace(b) => {}
            _ => return Err(PDFError::syntax(format!("Invalid ASCII85 character: {}", b))),
        }
    }

    if count > 0 {
        // Pad a partial group with 'u' and keep count - 1 bytes
        for slot in group.iter_mut().skip(count) {
            *slot = 84;
        }
        let value = group.iter().fold(0u64, |acc, d| acc * 85 + *d as u64);
        let value = value.min(u32::MAX as u64) as u32;
        out.extend_from_slice(&value.to_be_bytes()[..count - 1]);
    }

    Ok(out)
}

pub fn encode_ascii85(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 5 / 4 + 2);
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        let mut value = u32::from_be_bytes(word);

        if chunk.len() == 4 && value == 0 {
            out.push(b'z');
            continue;
        }

        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = (value % 85) as u8 + b'!';
            value /= 85;
        }
        out.extend_from_slice(&digits[..chunk.len() + 1]);
    }
    out.extend_from_slice(b"~>");
    out
}

pub fn decode_run_length(data: &[u8]) -> PDFResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        let length = data[i];
        i += 1;
        match length {
            128 => break,
            0..=127 => {
                let n = length as usize + 1;
                let end = (i + n).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                let Some(&b) = data.get(i) else {
                    break;
                };
                out.extend(std::iter::repeat_n(b, 257 - length as usize));
                i += 1;
            }
        }
    }
    Ok(out)
}

pub fn encode_run_length(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 2);
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        let mut run = 1;
        while i + run < data.len() && data[i + run] == b && run < 128 {
            run += 1;
        }

        if run >= 2 {
            out.push((257 - run) as u8);
            out.push(b);
            i += run;
            continue;
        }

        // Literal segment up to the next repeat
        let start = i;
        while i < data.len() && i - start < 128 {
            if i + 1 < data.len() && data[i] == data[i + 1] {
                break;
            }
            i += 1;
        }
        if i == start {
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&data[start..i]);
    }
    out.push(128);
    out
}

/// Undoes a TIFF (2) or PNG (10-15) predictor.
pub fn apply_predictor(data: Vec<u8>, params: &DecodeParams) -> PDFResult<Vec<u8>> {
    if params.predictor <= 1 {
        return Ok(data);
    }

    let bits_per_pixel = params.colors * params.bits_per_component;
    let bytes_per_pixel = bits_per_pixel.div_ceil(8);
    let bytes_per_row = (bits_per_pixel * params.columns).div_ceil(8);

    match params.predictor {
        2 => Ok(tiff_predictor(&data, bytes_per_row, params)),
        10..=15 => Ok(png_predictor(&data, bytes_per_row, bytes_per_pixel)),
        other => {
            tracing::warn!("Unsupported predictor {}, returning data unchanged", other);
            Ok(data)
        }
    }
}

fn tiff_predictor(data: &[u8], bytes_per_row: usize, params: &DecodeParams) -> Vec<u8> {
    if params.bits_per_component != 8 {
        tracing::warn!(
            "TIFF predictor with {} bits per component is not supported",
            params.bits_per_component
        );
        return data.to_vec();
    }
    let colors = params.colors;
    let mut out = data.to_vec();
    for row in out.chunks_mut(bytes_per_row.max(1)) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    out
}

fn png_predictor(data: &[u8], bytes_per_row: usize, bytes_per_pixel: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; bytes_per_row];
    let mut row = vec![0u8; bytes_per_row];

    for chunk in data.chunks(bytes_per_row + 1) {
        let filter_type = chunk[0];
        let encoded = &chunk[1..];
        row.fill(0);
        row[..encoded.len()].copy_from_slice(encoded);

        for i in 0..bytes_per_row {
            let left = if i >= bytes_per_pixel { row[i - bytes_per_pixel] } else { 0 };
            let up = prev_row[i];
            let up_left = if i >= bytes_per_pixel { prev_row[i - bytes_per_pixel] } else { 0 };
            let predicted = match filter_type {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                _ => 0,
            };
            row[i] = row[i].wrapping_add(predicted);
        }

        out.extend_from_slice(&row[..encoded.len()]);
        std::mem::swap(&mut prev_row, &mut row);
    }
    out
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain(names: &[&str]) -> Vec<Filter> {
        names.iter().map(|n| Filter::from_name(n)).collect()
    }

    fn decode_bytes_of(data: &[u8], filters: &[Filter]) -> Vec<u8> {
        match decode(data, filters, &[]).unwrap() {
            Decoded::Bytes(bytes) => bytes,
            Decoded::Image(_) => panic!("expected bytes"),
        }
    }

    #[test]
    fn test_decode_flate_simple() {
        let original = b"Hello, PDF world! This is test data.";
        let compressed = encode_flate(original).unwrap();
        assert_eq!(decode_flate(&compressed).unwrap(), original);
    }

    #[test]
    fn test_flate_raw_deflate_fallback() {
        use flate2::write::DeflateEncoder;
        use std::io::Write;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"raw deflate body").unwrap();
        let raw = encoder.finish().unwrap();
        assert_eq!(decode_flate(&raw).unwrap(), b"raw deflate body");
    }

    #[test]
    fn test_no_filter_is_identity() {
        assert_eq!(decode_bytes_of(b"plain", &[]), b"plain");
    }

    #[test]
    fn test_unsupported_filter() {
        let result = decode(b"data", &chain(&["FooDecode"]), &[]);
        assert_eq!(result, Err(PDFError::UnsupportedFilter("FooDecode".into())));
        assert_eq!(
            result.unwrap_err().kind(),
            crate::core::error::ErrorKind::UnsupportedFilter
        );
    }

    #[test]
    fn test_image_codec_category() {
        assert_eq!(Filter::from_name("DCT").category(), FilterCategory::ImageCodec);
        assert_eq!(Filter::from_name("JBIG2Decode").category(), FilterCategory::ImageCodec);
        assert_eq!(Filter::from_name("FlateDecode").category(), FilterCategory::Bytes);
        // Image codec must be the final stage
        let err = decode(b"x", &chain(&["DCTDecode", "FlateDecode"]), &[]).unwrap_err();
        assert!(matches!(err, PDFError::UnsupportedFilter(_)));
        let err = decode(b"x", &chain(&["JBIG2Decode"]), &[]).unwrap_err();
        assert_eq!(err, PDFError::UnsupportedFilter("JBIG2Decode".into()));
    }

    #[test]
    fn test_filters_apply_left_to_right() {
        // Hex of the flate stream: AHx must run first
        let flated = encode_flate(b"ordered").unwrap();
        let hexed = encode_ascii_hex(&flated);
        assert_eq!(decode_bytes_of(&hexed, &chain(&["AHx", "Fl"])), b"ordered");
    }

    #[test]
    fn test_ascii_hex_odd_and_whitespace() {
        assert_eq!(decode_ascii_hex(b"48 65\n6C6C6F>").unwrap(), b"Hello");
        assert_eq!(decode_ascii_hex(b"414>").unwrap(), vec![0x41, 0x40]);
    }

    #[test]
    fn test_ascii85_known_values() {
        assert_eq!(decode_ascii85(b"87cURD]i,\"Ebo80~>").unwrap(), b"Hello World!");
        assert_eq!(decode_ascii85(b"z~>").unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(encode_ascii85(&[0, 0, 0, 0]), b"z~>");
    }

    #[test]
    fn test_run_length_known_values() {
        assert_eq!(decode_run_length(&[2, b'a', b'b', b'c', 254, b'x', 128]).unwrap(), b"abcxxx");
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of 3 bytes, second row uses the Up filter
        let data = vec![0, 1, 2, 3, 2, 1, 1, 1];
        let params = DecodeParams {
            predictor: 12,
            columns: 3,
            ..DecodeParams::default()
        };
        assert_eq!(apply_predictor(data, &params).unwrap(), vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_tiff_predictor() {
        let params = DecodeParams {
            predictor: 2,
            columns: 4,
            ..DecodeParams::default()
        };
        assert_eq!(apply_predictor(vec![10, 1, 1, 1], &params).unwrap(), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_filter_chain_from_dict() {
        let mut parms = Dict::new();
        parms.insert("Predictor".into(), PDFObject::Number(12.0));
        parms.insert("Columns".into(), PDFObject::Number(5.0));
        let mut dict = Dict::new();
        dict.insert(
            "Filter".into(),
            PDFObject::Array(vec![
                PDFObject::Name("ASCII85Decode".into()),
                PDFObject::Name("FlateDecode".into()),
            ]),
        );
        dict.insert(
            "DecodeParms".into(),
            PDFObject::Array(vec![PDFObject::Null, PDFObject::Dictionary(parms)]),
        );

        let (filters, params) = filter_chain(&dict, &|o| o.clone());
        assert_eq!(filters, vec![Filter::Ascii85, Filter::Flate]);
        assert_eq!(params[0], DecodeParams::default());
        assert_eq!(params[1].predictor, 12);
        assert_eq!(params[1].columns, 5);
    }

    const BYTE_FILTERS: [&str; 5] = [
        "FlateDecode",
        "LZWDecode",
        "ASCIIHexDecode",
        "ASCII85Decode",
        "RunLengthDecode",
    ];

    proptest! {
        #[test]
        fn prop_single_filter_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512), idx in 0usize..5) {
            let filters = chain(&[BYTE_FILTERS[idx]]);
            let encoded = encode(&data, &filters, &[]).unwrap();
            prop_assert_eq!(decode_bytes_of(&encoded, &filters), data);
        }

        #[test]
        fn prop_two_filter_chain_round_trip(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            a in 0usize..5,
            b in 0usize..5,
        ) {
            let filters = chain(&[BYTE_FILTERS[a], BYTE_FILTERS[b]]);
            let encoded = encode(&data, &filters, &[]).unwrap();
            prop_assert_eq!(decode_bytes_of(&encoded, &filters), data);
        }
    }
}
