//! ToUnicode CMap parsing.
//!
//! CMaps map character codes to Unicode text. The /ToUnicode entry in a font
//! dictionary points to a CMap stream that defines these mappings. Codespace
//! ranges also tell composite fonts how many bytes each code occupies.

use super::encodings::glyph_name_to_unicode;
use super::error::PDFResult;
use super::lexer::{Lexer, Token};
use rustc_hash::FxHashMap;

/// Upper bound on codes expanded from a single `bfrange` line.
const MAX_RANGE_SPAN: u32 = 0x1_0000;

/// Character code to Unicode map.
///
/// CMaps support two types of mappings:
/// - **bfchar**: Single character mappings (code -> Unicode)
/// - **bfrange**: Range mappings (code range -> Unicode range or array)
///
/// Example CMap stream:
/// ```text
/// /CIDInit /ProcSet findresource begin
/// 12 dict begin
/// begincmap
/// 1 begincodespacerange
/// <0000> <FFFF>
/// endcodespacerange
/// 2 beginbfchar
/// <0003> <0020>
/// <0005> <0041>
/// endbfchar
/// 1 beginbfrange
/// <0010> <0020> <0030>
/// endbfrange
/// endcmap
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CMap {
    mappings: FxHashMap<u32, String>,

    /// `(low, high, byte length)` from `begincodespacerange`
    codespace: Vec<(u32, u32, usize)>,
}

impl CMap {
    /// Creates an empty CMap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a decoded /ToUnicode CMap stream.
    ///
    /// Unrecognized PostScript around the mapping sections is skipped. A
    /// tokenizer error ends parsing but keeps the mappings read so far.
    ///
    /// # Example
    /// ```
    /// use pdf_x_worker::core::cmap::CMap;
    ///
    /// let cmap = CMap::parse(b"1 beginbfchar\n<03> <0020>\nendbfchar\n").unwrap();
    /// assert_eq!(cmap.to_unicode(3), Some(" "));
    /// ```
    pub fn parse(stream_data: &[u8]) -> PDFResult<Self> {
        let mut cmap = CMap::new();
        let mut lexer = Lexer::from_bytes(stream_data.to_vec())?;

        loop {
            let token = match lexer.get_object() {
                Ok(Token::EOF) => break,
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!("Stopping CMap parse early: {}", e);
                    break;
                }
            };

            let Token::Command(cmd) = token else {
                continue;
            };
            let section = match cmd.as_str() {
                "begincodespacerange" => cmap.parse_codespace(&mut lexer),
                "beginbfchar" => cmap.parse_bfchar(&mut lexer),
                "beginbfrange" => cmap.parse_bfrange(&mut lexer),
                _ => Ok(()),
            };
            if let Err(e) = section {
                tracing::warn!("Malformed CMap section {}: {}", cmd, e);
                break;
            }
        }

        Ok(cmap)
    }

    fn parse_codespace(&mut self, lexer: &mut Lexer) -> PDFResult<()> {
        loop {
            let low = match lexer.get_object()? {
                Token::HexString(bytes) => bytes,
                _ => return Ok(()),
            };
            let Token::HexString(high) = lexer.get_object()? else {
                return Ok(());
            };
            self.codespace
                .push((be_value(&low), be_value(&high), low.len().clamp(1, 4)));
        }
    }

    /// Format: `<srcCode> <dstString>` or `<srcCode> /glyphName`
    fn parse_bfchar(&mut self, lexer: &mut Lexer) -> PDFResult<()> {
        loop {
            let src = match lexer.get_object()? {
                Token::HexString(bytes) | Token::String(bytes) => bytes,
                _ => return Ok(()),
            };
            match lexer.get_object()? {
                Token::HexString(dst) | Token::String(dst) => {
                    self.mappings.insert(be_value(&src), utf16be_to_string(&dst));
                }
                Token::Name(name) => {
                    if let Some(text) = glyph_name_to_unicode(&name) {
                        self.mappings.insert(be_value(&src), text);
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Format: `<lo> <hi> <dstStart>` or `<lo> <hi> [<dst1> <dst2> ...]`
    fn parse_bfrange(&mut self, lexer: &mut Lexer) -> PDFResult<()> {
        loop {
            let low = match lexer.get_object()? {
                Token::HexString(bytes) => be_value(&bytes),
                _ => return Ok(()),
            };
            let Token::HexString(high) = lexer.get_object()? else {
                return Ok(());
            };
            let high = be_value(&high).min(low.saturating_add(MAX_RANGE_SPAN - 1));

            match lexer.get_object()? {
                Token::HexString(dst) => {
                    let mut units = utf16_units(&dst);
                    if units.is_empty() {
                        continue;
                    }
                    let last = units.len() - 1;
                    let base = units[last];
                    for (i, code) in (low..=high).enumerate() {
                        units[last] = base.wrapping_add(i as u16);
                        self.mappings.insert(code, String::from_utf16_lossy(&units));
                    }
                }
                Token::ArrayStart => {
                    let mut code = low;
                    loop {
                        match lexer.get_object()? {
                            Token::HexString(dst) | Token::String(dst) => {
                                if code <= high {
                                    self.mappings.insert(code, utf16be_to_string(&dst));
                                }
                                code = code.saturating_add(1);
                            }
                            Token::ArrayEnd | Token::EOF => break,
                            _ => {}
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Maps a character code to Unicode text.
    #[inline]
    pub fn to_unicode(&self, code: u32) -> Option<&str> {
        self.mappings.get(&code).map(String::as_str)
    }

    /// Byte length of the code starting at `bytes[0]`, per the codespace ranges.
    ///
    /// Without codespace ranges every code is `default_len` bytes.
    pub fn code_length(&self, bytes: &[u8], default_len: usize) -> usize {
        if self.codespace.is_empty() {
            return default_len;
        }
        for n in 1..=4.min(bytes.len()) {
            let value = be_value(&bytes[..n]);
            if self
                .codespace
                .iter()
                .any(|&(low, high, len)| len == n && (low..=high).contains(&value))
            {
                return n;
            }
        }
        default_len
    }

    /// Returns the number of mappings in this CMap.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if this CMap has no mappings.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

fn be_value(bytes: &[u8]) -> u32 {
    bytes.iter().take(4).fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    if bytes.len() == 1 {
        return vec![bytes[0] as u16];
    }
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => *single as u16,
            _ => 0,
        })
        .collect()
}

fn utf16be_to_string(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_bfchar() {
        let cmap = CMap::parse(b"1 beginbfchar\n<03> <0020>\nendbfchar\n").unwrap();
        assert_eq!(cmap.to_unicode(3), Some(" "));
        assert_eq!(cmap.to_unicode(4), None);
    }

    #[test]
    fn test_parse_bfrange() {
        let cmap = CMap::parse(b"1 beginbfrange\n<0010> <0012> <0041>\nendbfrange\n").unwrap();
        assert_eq!(cmap.to_unicode(0x10), Some("A"));
        assert_eq!(cmap.to_unicode(0x11), Some("B"));
        assert_eq!(cmap.to_unicode(0x12), Some("C"));
        assert_eq!(cmap.to_unicode(0x13), None);
    }

    #[test]
    fn test_bfrange_array_and_ligature() {
        let cmap = CMap::parse(
            b"1 beginbfrange\n<05> <06> [<0066006C> <D83DDE00>]\nendbfrange\n\
              1 beginbfchar\n<07> /eacute\nendbfchar\n",
        )
        .unwrap();
        assert_eq!(cmap.to_unicode(5), Some("fl"));
        assert_eq!(cmap.to_unicode(6), Some("\u{1F600}"));
        assert_eq!(cmap.to_unicode(7), Some("\u{e9}"));
    }

    #[test]
    fn test_real_world_cmap() {
        let cmap_data = b"\
/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo
<< /Registry (Adobe)
/Ordering (UCS)
/Supplement 0
>> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0005> <0041>
endbfchar
1 beginbfrange
<0010> <0020> <0061>
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end
";
        let cmap = CMap::parse(cmap_data).unwrap();
        assert_eq!(cmap.to_unicode(3), Some(" "));
        assert_eq!(cmap.to_unicode(0x15), Some("f"));
        assert_eq!(cmap.to_unicode(0x20), Some("q"));
        assert_eq!(cmap.len(), 19);
        assert_eq!(cmap.code_length(&[0x00, 0x03], 1), 2);
    }

    #[test]
    fn test_code_length_without_codespace() {
        let cmap = CMap::new();
        assert_eq!(cmap.code_length(&[0x41], 1), 1);
        assert_eq!(cmap.code_length(&[0x00, 0x41], 2), 2);
    }

    #[test]
    fn test_truncated_cmap_keeps_mappings() {
        let cmap = CMap::parse(b"2 beginbfchar\n<01> <0041>\n<02>").unwrap();
        assert_eq!(cmap.to_unicode(1), Some("A"));
    }

    #[test]
    fn test_empty_cmap() {
        let cmap = CMap::parse(b"").unwrap();
        assert!(cmap.is_empty());
    }
}
