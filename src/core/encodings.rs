//! Simple-font encodings and glyph-name resolution.
//!
//! Byte codes in simple fonts select glyphs by *name*: a base encoding
//! (`StandardEncoding`, `WinAnsiEncoding`, `MacRomanEncoding`) maps each
//! code to a glyph name, a `/Differences` array overrides individual codes,
//! and the font program maps names onto its own glyph indices.

use super::parser::PDFObject;

/// Named base encodings a font dictionary may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseEncoding {
    Standard,
    WinAnsi,
    MacRoman,
}

impl BaseEncoding {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "StandardEncoding" => Some(BaseEncoding::Standard),
            "WinAnsiEncoding" => Some(BaseEncoding::WinAnsi),
            "MacRomanEncoding" => Some(BaseEncoding::MacRoman),
            _ => None,
        }
    }

    fn table(self) -> &'static [&'static str; 256] {
        match self {
            BaseEncoding::Standard => &STANDARD_ENCODING,
            BaseEncoding::WinAnsi => &WIN_ANSI_ENCODING,
            BaseEncoding::MacRoman => &MAC_ROMAN_ENCODING,
        }
    }
}

/// Code to glyph-name table for a simple font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    names: Vec<Option<String>>,
}

impl Encoding {
    /// An encoding with no codes assigned.
    pub fn empty() -> Self {
        Encoding {
            names: vec![None; 256],
        }
    }

    pub fn from_base(base: BaseEncoding) -> Self {
        let names = base
            .table()
            .iter()
            .map(|name| (!name.is_empty()).then(|| name.to_string()))
            .collect();
        Encoding { names }
    }

    /// Builds an encoding from a program's built-in `(code, name)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (u8, &'a str)>) -> Self {
        let mut encoding = Self::empty();
        for (code, name) in pairs {
            encoding.set(code, name);
        }
        encoding
    }

    pub fn set(&mut self, code: u8, name: &str) {
        self.names[code as usize] = Some(name.to_string());
    }

    /// Applies a `/Differences` array: `[code name name ... code name ...]`.
    ///
    /// Each number resets the current code; each name fills the current
    /// code and advances it. Names before the first number are ignored.
    pub fn apply_differences(&mut self, differences: &[PDFObject]) {
        let mut code: Option<u32> = None;
        for item in differences {
            match item {
                PDFObject::Number(n) => code = Some(*n as u32),
                PDFObject::Name(name) => {
                    if let Some(c) = code {
                        if c < 256 {
                            self.names[c as usize] = Some(name.clone());
                        }
                        code = Some(c + 1);
                    }
                }
                _ => {}
            }
        }
    }

    /// Glyph name for a code, if any.
    pub fn name(&self, code: u8) -> Option<&str> {
        self.names[code as usize].as_deref()
    }

    /// Iterates over assigned `(code, name)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(code, name)| name.as_deref().map(|n| (code as u8, n)))
    }

    pub fn is_empty(&self) -> bool {
        self.names.iter().all(Option::is_none)
    }
}

/// Resolves a glyph name to Unicode text.
///
/// Handles `uniXXXX[XXXX...]`, `uXXXX[XX]`, suffixes after `.`, ligature
/// names joined by `_`, and the Latin glyph names of the base encodings.
pub fn glyph_name_to_unicode(name: &str) -> Option<String> {
    let name = name.split('.').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }

    let mut text = String::new();
    for part in name.split('_') {
        text.push_str(&component_to_unicode(part)?);
    }
    Some(text)
}

fn component_to_unicode(part: &str) -> Option<String> {
    if let Ok(idx) = GLYPH_UNICODE.binary_search_by(|(name, _)| (*name).cmp(part)) {
        return Some(GLYPH_UNICODE[idx].1.to_string());
    }

    let is_hex = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit());

    if let Some(hex) = part.strip_prefix("uni") {
        if hex.len() >= 4 && hex.len() % 4 == 0 && is_hex(hex) {
            let mut text = String::new();
            for chunk in hex.as_bytes().chunks(4) {
                let cp = u32::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
                text.push(char::from_u32(cp)?);
            }
            return Some(text);
        }
    }

    if let Some(hex) = part.strip_prefix('u') {
        if (4..=6).contains(&hex.len()) && is_hex(hex) {
            let cp = u32::from_str_radix(hex, 16).ok()?;
            return char::from_u32(cp).map(String::from);
        }
    }

    // Single-letter names such as `a` or `Z`
    let mut chars = part.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Some(c.to_string()),
        _ => None,
    }
}

/// Reverse lookup of a Unicode scalar to a Latin glyph name.
pub fn unicode_to_glyph_name(ch: char) -> Option<&'static str> {
    GLYPH_UNICODE.iter().find(|(_, c)| *c == ch).map(|(name, _)| *name)
}

pub const STANDARD_ENCODING: [&str; 256] = [
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "space", "exclam", "quotedbl", "numbersign", "dollar", "percent", "ampersand", "quoteright",
    "parenleft", "parenright", "asterisk", "plus", "comma", "hyphen", "period", "slash",
    "zero", "one", "two", "three", "four", "five", "six", "seven",
    "eight", "nine", "colon", "semicolon", "less", "equal", "greater", "question",
    "at", "A", "B", "C", "D", "E", "F", "G",
    "H", "I", "J", "K", "L", "M", "N", "O",
    "P", "Q", "R", "S", "T", "U", "V", "W",
    "X", "Y", "Z", "bracketleft", "backslash", "bracketright", "asciicircum", "underscore",
    "quoteleft", "a", "b", "c", "d", "e", "f", "g",
    "h", "i", "j", "k", "l", "m", "n", "o",
    "p", "q", "r", "s", "t", "u", "v", "w",
    "x", "y", "z", "braceleft", "bar", "braceright", "asciitilde", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "exclamdown", "cent", "sterling", "fraction", "yen", "florin", "section",
    "currency", "quotesingle", "quotedblleft", "guillemotleft", "guilsinglleft", "guilsinglright", "fi", "fl",
    "", "endash", "dagger", "daggerdbl", "periodcentered", "", "paragraph", "bullet",
    "quotesinglbase", "quotedblbase", "quotedblright", "guillemotright", "ellipsis", "perthousand", "", "questiondown",
    "", "grave", "acute", "circumflex", "tilde", "macron", "breve", "dotaccent",
    "dieresis", "", "ring", "cedilla", "", "hungarumlaut", "ogonek", "caron",
    "emdash", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "AE", "", "ordfeminine", "", "", "", "",
    "Lslash", "Oslash", "OE", "ordmasculine", "", "", "", "",
    "", "ae", "", "", "", "dotlessi", "", "",
    "lslash", "oslash", "oe", "germandbls", "", "", "", "",
];

pub const MAC_ROMAN_ENCODING: [&str; 256] = [
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "space", "exclam", "quotedbl", "numbersign", "dollar", "percent", "ampersand", "quotesingle",
    "parenleft", "parenright", "asterisk", "plus", "comma", "hyphen", "period", "slash",
    "zero", "one", "two", "three", "four", "five", "six", "seven",
    "eight", "nine", "colon", "semicolon", "less", "equal", "greater", "question",
    "at", "A", "B", "C", "D", "E", "F", "G",
    "H", "I", "J", "K", "L", "M", "N", "O",
    "P", "Q", "R", "S", "T", "U", "V", "W",
    "X", "Y", "Z", "bracketleft", "backslash", "bracketright", "asciicircum", "underscore",
    "grave", "a", "b", "c", "d", "e", "f", "g",
    "h", "i", "j", "k", "l", "m", "n", "o",
    "p", "q", "r", "s", "t", "u", "v", "w",
    "x", "y", "z", "braceleft", "bar", "braceright", "asciitilde", "",
    "Adieresis", "Aring", "Ccedilla", "Eacute", "Ntilde", "Odieresis", "Udieresis", "aacute",
    "agrave", "acircumflex", "adieresis", "atilde", "aring", "ccedilla", "eacute", "egrave",
    "ecircumflex", "edieresis", "iacute", "igrave", "icircumflex", "idieresis", "ntilde", "oacute",
    "ograve", "ocircumflex", "odieresis", "otilde", "uacute", "ugrave", "ucircumflex", "udieresis",
    "dagger", "degree", "cent", "sterling", "section", "bullet", "paragraph", "germandbls",
    "registered", "copyright", "trademark", "acute", "dieresis", "", "AE", "Oslash",
    "", "plusminus", "", "", "yen", "mu", "", "",
    "", "", "", "ordfeminine", "ordmasculine", "", "ae", "oslash",
    "questiondown", "exclamdown", "logicalnot", "", "florin", "", "", "guillemotleft",
    "guillemotright", "ellipsis", "nbspace", "Agrave", "Atilde", "Otilde", "OE", "oe",
    "endash", "emdash", "quotedblleft", "quotedblright", "quoteleft", "quoteright", "divide", "",
    "ydieresis", "Ydieresis", "fraction", "currency", "guilsinglleft", "guilsinglright", "fi", "fl",
    "daggerdbl", "periodcentered", "quotesinglbase", "quotedblbase", "perthousand", "Acircumflex", "Ecircumflex", "Aacute",
    "Edieresis", "Egrave", "Iacute", "Icircumflex", "Idieresis", "Igrave", "Oacute", "Ocircumflex",
    "", "Ograve", "Uacute", "Ucircumflex", "Ugrave", "dotlessi", "circumflex", "tilde",
    "macron", "breve", "dotaccent", "ring", "cedilla", "hungarumlaut", "ogonek", "caron",
];

pub const WIN_ANSI_ENCODING: [&str; 256] = [
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "space", "exclam", "quotedbl", "numbersign", "dollar", "percent", "ampersand", "quotesingle",
    "parenleft", "parenright", "asterisk", "plus", "comma", "hyphen", "period", "slash",
    "zero", "one", "two", "three", "four", "five", "six", "seven",
    "eight", "nine", "colon", "semicolon", "less", "equal", "greater", "question",
    "at", "A", "B", "C", "D", "E", "F", "G",
    "H", "I", "J", "K", "L", "M", "N", "O",
    "P", "Q", "R", "S", "T", "U", "V", "W",
    "X", "Y", "Z", "bracketleft", "backslash", "bracketright", "asciicircum", "underscore",
    "grave", "a", "b", "c", "d", "e", "f", "g",
    "h", "i", "j", "k", "l", "m", "n", "o",
    "p", "q", "r", "s", "t", "u", "v", "w",
    "x", "y", "z", "braceleft", "bar", "braceright", "asciitilde", "",
    "Euro", "", "quotesinglbase", "florin", "quotedblbase", "ellipsis", "dagger", "daggerdbl",
    "circumflex", "perthousand", "Scaron", "guilsinglleft", "OE", "", "Zcaron", "",
    "", "quoteleft", "quoteright", "quotedblleft", "quotedblright", "bullet", "endash", "emdash",
    "tilde", "trademark", "scaron", "guilsinglright", "oe", "", "zcaron", "Ydieresis",
    "nbspace", "exclamdown", "cent", "sterling", "currency", "yen", "brokenbar", "section",
    "dieresis", "copyright", "ordfeminine", "guillemotleft", "logicalnot", "hyphen", "registered", "macron",
    "degree", "plusminus", "twosuperior", "threesuperior", "acute", "mu", "paragraph", "periodcentered",
    "cedilla", "onesuperior", "ordmasculine", "guillemotright", "onequarter", "onehalf", "threequarters", "questiondown",
    "Agrave", "Aacute", "Acircumflex", "Atilde", "Adieresis", "Aring", "AE", "Ccedilla",
    "Egrave", "Eacute", "Ecircumflex", "Edieresis", "Igrave", "Iacute", "Icircumflex", "Idieresis",
    "Eth", "Ntilde", "Ograve", "Oacute", "Ocircumflex", "Otilde", "Odieresis", "multiply",
    "Oslash", "Ugrave", "Uacute", "Ucircumflex", "Udieresis", "Yacute", "Thorn", "germandbls",
    "agrave", "aacute", "acircumflex", "atilde", "adieresis", "aring", "ae", "ccedilla",
    "egrave", "eacute", "ecircumflex", "edieresis", "igrave", "iacute", "icircumflex", "idieresis",
    "eth", "ntilde", "ograve", "oacute", "ocircumflex", "otilde", "odieresis", "divide",
    "oslash", "ugrave", "uacute", "ucircumflex", "udieresis", "yacute", "thorn", "ydieresis",
];

const GLYPH_UNICODE: &[(&str, char)] = &[
    ("A", '\u{0041}'),
    ("AE", '\u{00c6}'),
    ("Aacute", '\u{00c1}'),
    ("Acircumflex", '\u{00c2}'),
    ("Adieresis", '\u{00c4}'),
    ("Agrave", '\u{00c0}'),
    ("Aring", '\u{00c5}'),
    ("Atilde", '\u{00c3}'),
    ("B", '\u{0042}'),
    ("C", '\u{0043}'),
    ("Ccedilla", '\u{00c7}'),
    ("D", '\u{0044}'),
    ("E", '\u{0045}'),
    ("Eacute", '\u{00c9}'),
    ("Ecircumflex", '\u{00ca}'),
    ("Edieresis", '\u{00cb}'),
    ("Egrave", '\u{00c8}'),
    ("Eth", '\u{00d0}'),
    ("Euro", '\u{20ac}'),
    ("F", '\u{0046}'),
    ("G", '\u{0047}'),
    ("H", '\u{0048}'),
    ("I", '\u{0049}'),
    ("Iacute", '\u{00cd}'),
    ("Icircumflex", '\u{00ce}'),
    ("Idieresis", '\u{00cf}'),
    ("Igrave", '\u{00cc}'),
    ("J", '\u{004a}'),
    ("K", '\u{004b}'),
    ("L", '\u{004c}'),
    ("Lslash", '\u{0141}'),
    ("M", '\u{004d}'),
    ("N", '\u{004e}'),
    ("Ntilde", '\u{00d1}'),
    ("O", '\u{004f}'),
    ("OE", '\u{0152}'),
    ("Oacute", '\u{00d3}'),
    ("Ocircumflex", '\u{00d4}'),
    ("Odieresis", '\u{00d6}'),
    ("Ograve", '\u{00d2}'),
    ("Oslash", '\u{00d8}'),
    ("Otilde", '\u{00d5}'),
    ("P", '\u{0050}'),
    ("Q", '\u{0051}'),
    ("R", '\u{0052}'),
    ("S", '\u{0053}'),
    ("Scaron", '\u{0160}'),
    ("T", '\u{0054}'),
    ("Thorn", '\u{00de}'),
    ("U", '\u{0055}'),
    ("Uacute", '\u{00da}'),
    ("Ucircumflex", '\u{00db}'),
    ("Udieresis", '\u{00dc}'),
    ("Ugrave", '\u{00d9}'),
    ("V", '\u{0056}'),
    ("W", '\u{0057}'),
    ("X", '\u{0058}'),
    ("Y", '\u{0059}'),
    ("Yacute", '\u{00dd}'),
    ("Ydieresis", '\u{0178}'),
    ("Z", '\u{005a}'),
    ("Zcaron", '\u{017d}'),
    ("a", '\u{0061}'),
    ("aacute", '\u{00e1}'),
    ("acircumflex", '\u{00e2}'),
    ("acute", '\u{00b4}'),
    ("adieresis", '\u{00e4}'),
    ("ae", '\u{00e6}'),
    ("agrave", '\u{00e0}'),
    ("ampersand", '\u{0026}'),
    ("aring", '\u{00e5}'),
    ("asciicircum", '\u{005e}'),
    ("asciitilde", '\u{007e}'),
    ("asterisk", '\u{002a}'),
    ("at", '\u{0040}'),
    ("atilde", '\u{00e3}'),
    ("b", '\u{0062}'),
    ("backslash", '\u{005c}'),
    ("bar", '\u{007c}'),
    ("braceleft", '\u{007b}'),
    ("braceright", '\u{007d}'),
    ("bracketleft", '\u{005b}'),
    ("bracketright", '\u{005d}'),
    ("breve", '\u{02d8}'),
    ("brokenbar", '\u{00a6}'),
    ("bullet", '\u{2022}'),
    ("c", '\u{0063}'),
    ("caron", '\u{02c7}'),
    ("ccedilla", '\u{00e7}'),
    ("cedilla", '\u{00b8}'),
    ("cent", '\u{00a2}'),
    ("circumflex", '\u{02c6}'),
    ("colon", '\u{003a}'),
    ("comma", '\u{002c}'),
    ("copyright", '\u{00a9}'),
    ("currency", '\u{00a4}'),
    ("d", '\u{0064}'),
    ("dagger", '\u{2020}'),
    ("daggerdbl", '\u{2021}'),
    ("degree", '\u{00b0}'),
    ("dieresis", '\u{00a8}'),
    ("divide", '\u{00f7}'),
    ("dollar", '\u{0024}'),
    ("dotaccent", '\u{02d9}'),
    ("dotlessi", '\u{0131}'),
    ("e", '\u{0065}'),
    ("eacute", '\u{00e9}'),
    ("ecircumflex", '\u{00ea}'),
    ("edieresis", '\u{00eb}'),
    ("egrave", '\u{00e8}'),
    ("eight", '\u{0038}'),
    ("ellipsis", '\u{2026}'),
    ("emdash", '\u{2014}'),
    ("endash", '\u{2013}'),
    ("equal", '\u{003d}'),
    ("eth", '\u{00f0}'),
    ("exclam", '\u{0021}'),
    ("exclamdown", '\u{00a1}'),
    ("f", '\u{0066}'),
    ("fi", '\u{fb01}'),
    ("five", '\u{0035}'),
    ("fl", '\u{fb02}'),
    ("florin", '\u{0192}'),
    ("four", '\u{0034}'),
    ("fraction", '\u{2044}'),
    ("g", '\u{0067}'),
    ("germandbls", '\u{00df}'),
    ("grave", '\u{0060}'),
    ("greater", '\u{003e}'),
    ("guillemotleft", '\u{00ab}'),
    ("guillemotright", '\u{00bb}'),
    ("guilsinglleft", '\u{2039}'),
    ("guilsinglright", '\u{203a}'),
    ("h", '\u{0068}'),
    ("hungarumlaut", '\u{02dd}'),
    ("hyphen", '\u{002d}'),
    ("i", '\u{0069}'),
    ("iacute", '\u{00ed}'),
    ("icircumflex", '\u{00ee}'),
    ("idieresis", '\u{00ef}'),
    ("igrave", '\u{00ec}'),
    ("j", '\u{006a}'),
    ("k", '\u{006b}'),
    ("l", '\u{006c}'),
    ("less", '\u{003c}'),
    ("logicalnot", '\u{00ac}'),
    ("lslash", '\u{0142}'),
    ("m", '\u{006d}'),
    ("macron", '\u{00af}'),
    ("minus", '\u{2212}'),
    ("mu", '\u{00b5}'),
    ("multiply", '\u{00d7}'),
    ("n", '\u{006e}'),
    ("nbspace", '\u{00a0}'),
    ("nine", '\u{0039}'),
    ("ntilde", '\u{00f1}'),
    ("numbersign", '\u{0023}'),
    ("o", '\u{006f}'),
    ("oacute", '\u{00f3}'),
    ("ocircumflex", '\u{00f4}'),
    ("odieresis", '\u{00f6}'),
    ("oe", '\u{0153}'),
    ("ogonek", '\u{02db}'),
    ("ograve", '\u{00f2}'),
    ("one", '\u{0031}'),
    ("onehalf", '\u{00bd}'),
    ("onequarter", '\u{00bc}'),
    ("onesuperior", '\u{00b9}'),
    ("ordfeminine", '\u{00aa}'),
    ("ordmasculine", '\u{00ba}'),
    ("oslash", '\u{00f8}'),
    ("otilde", '\u{00f5}'),
    ("p", '\u{0070}'),
    ("paragraph", '\u{00b6}'),
    ("parenleft", '\u{0028}'),
    ("parenright", '\u{0029}'),
    ("percent", '\u{0025}'),
    ("period", '\u{002e}'),
    ("periodcentered", '\u{00b7}'),
    ("perthousand", '\u{2030}'),
    ("plus", '\u{002b}'),
    ("plusminus", '\u{00b1}'),
    ("q", '\u{0071}'),
    ("question", '\u{003f}'),
    ("questiondown", '\u{00bf}'),
    ("quotedbl", '\u{0022}'),
    ("quotedblbase", '\u{201e}'),
    ("quotedblleft", '\u{201c}'),
    ("quotedblright", '\u{201d}'),
    ("quoteleft", '\u{2018}'),
    ("quoteright", '\u{2019}'),
    ("quotesinglbase", '\u{201a}'),
    ("quotesingle", '\u{0027}'),
    ("r", '\u{0072}'),
    ("registered", '\u{00ae}'),
    ("ring", '\u{02da}'),
    ("s", '\u{0073}'),
    ("scaron", '\u{0161}'),
    ("section", '\u{00a7}'),
    ("semicolon", '\u{003b}'),
    ("seven", '\u{0037}'),
    ("six", '\u{0036}'),
    ("slash", '\u{002f}'),
    ("space", '\u{0020}'),
    ("sterling", '\u{00a3}'),
    ("t", '\u{0074}'),
    ("thorn", '\u{00fe}'),
    ("three", '\u{0033}'),
    ("threequarters", '\u{00be}'),
    ("threesuperior", '\u{00b3}'),
    ("tilde", '\u{02dc}'),
    ("trademark", '\u{2122}'),
    ("two", '\u{0032}'),
    ("twosuperior", '\u{00b2}'),
    ("u", '\u{0075}'),
    ("uacute", '\u{00fa}'),
    ("ucircumflex", '\u{00fb}'),
    ("udieresis", '\u{00fc}'),
    ("ugrave", '\u{00f9}'),
    ("underscore", '\u{005f}'),
    ("v", '\u{0076}'),
    ("w", '\u{0077}'),
    ("x", '\u{0078}'),
    ("y", '\u{0079}'),
    ("yacute", '\u{00fd}'),
    ("ydieresis", '\u{00ff}'),
    ("yen", '\u{00a5}'),
    ("z", '\u{007a}'),
    ("zcaron", '\u{017e}'),
    ("zero", '\u{0030}'),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glyph_table_sorted() {
        assert!(GLYPH_UNICODE.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_base_encodings() {
        let win = Encoding::from_base(BaseEncoding::WinAnsi);
        assert_eq!(win.name(b'A'), Some("A"));
        assert_eq!(win.name(0x80), Some("Euro"));
        assert_eq!(win.name(0x01), None);

        let standard = Encoding::from_base(BaseEncoding::Standard);
        assert_eq!(standard.name(0x27), Some("quoteright"));
        assert_eq!(standard.name(0xAE), Some("fi"));

        let mac = Encoding::from_base(BaseEncoding::MacRoman);
        assert_eq!(mac.name(0x80), Some("Adieresis"));
    }

    #[test]
    fn test_differences() {
        let mut enc = Encoding::from_base(BaseEncoding::Standard);
        enc.apply_differences(&[
            PDFObject::Name("ignored".into()),
            PDFObject::Number(65.0),
            PDFObject::Name("Alpha".into()),
            PDFObject::Name("Beta".into()),
            PDFObject::Number(255.0),
            PDFObject::Name("last".into()),
            PDFObject::Name("overflow".into()),
        ]);
        assert_eq!(enc.name(65), Some("Alpha"));
        assert_eq!(enc.name(66), Some("Beta"));
        assert_eq!(enc.name(67), Some("C"));
        assert_eq!(enc.name(255), Some("last"));
    }

    #[test]
    fn test_glyph_name_to_unicode() {
        assert_eq!(glyph_name_to_unicode("A").as_deref(), Some("A"));
        assert_eq!(glyph_name_to_unicode("eacute").as_deref(), Some("\u{e9}"));
        assert_eq!(glyph_name_to_unicode("uni20AC").as_deref(), Some("\u{20ac}"));
        assert_eq!(glyph_name_to_unicode("u1F600").as_deref(), Some("\u{1f600}"));
        assert_eq!(glyph_name_to_unicode("f_i").as_deref(), Some("fi"));
        assert_eq!(glyph_name_to_unicode("a.sc").as_deref(), Some("a"));
        assert_eq!(glyph_name_to_unicode(".notdef"), None);
        assert_eq!(glyph_name_to_unicode("g123"), None);
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(unicode_to_glyph_name('A'), Some("A"));
        assert_eq!(unicode_to_glyph_name(' '), Some("space"));
    }
}
