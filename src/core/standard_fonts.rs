//! Standard 14 font families: name matching and horizontal metrics.
//!
//! Used for fonts that are not embedded and as the substitute glyph set
//! when an embedded program cannot be decoded.

/// Font descriptor `/Flags` bits.
pub mod flags {
    pub const FIXED_PITCH: i64 = 1 << 0;
    pub const SERIF: i64 = 1 << 1;
    pub const SYMBOLIC: i64 = 1 << 2;
    pub const NONSYMBOLIC: i64 = 1 << 5;
    pub const ITALIC: i64 = 1 << 6;
    pub const FORCE_BOLD: i64 = 1 << 18;
}

/// Substitute glyph shape set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFamily {
    Helvetica,
    Times,
    Courier,
    Symbol,
    ZapfDingbats,
}

/// A standard font resolved from a `/BaseFont` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardFont {
    pub family: StandardFamily,
    pub bold: bool,
    pub italic: bool,
}

impl StandardFont {
    /// Matches a `/BaseFont` name against the standard families.
    ///
    /// Subset prefixes (`ABCDEF+`) are stripped and common aliases
    /// (`Arial`, `TimesNewRoman`, `CourierNew`) are accepted.
    pub fn from_base_font(base_font: &str) -> Option<Self> {
        let name = strip_subset_prefix(base_font);
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | ',' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        let family = if normalized.starts_with("helvetica") || normalized.starts_with("arial") {
            StandardFamily::Helvetica
        } else if normalized.starts_with("times") {
            StandardFamily::Times
        } else if normalized.starts_with("courier") {
            StandardFamily::Courier
        } else if normalized.starts_with("symbol") {
            StandardFamily::Symbol
        } else if normalized.starts_with("zapfdingbats") || normalized.starts_with("dingbats") {
            StandardFamily::ZapfDingbats
        } else {
            return None;
        };

        Some(StandardFont {
            family,
            bold: normalized.contains("bold"),
            italic: normalized.contains("italic") || normalized.contains("oblique"),
        })
    }

    /// Picks a substitute from descriptor flags and the font name.
    pub fn substitute(base_font: &str, descriptor_flags: i64) -> Self {
        if let Some(font) = Self::from_base_font(base_font) {
            return font;
        }
        let lower = base_font.to_ascii_lowercase();
        let family = if descriptor_flags & flags::FIXED_PITCH != 0 || lower.contains("mono") {
            StandardFamily::Courier
        } else if descriptor_flags & flags::SERIF != 0 || lower.contains("serif") && !lower.contains("sans") {
            StandardFamily::Times
        } else {
            StandardFamily::Helvetica
        };
        StandardFont {
            family,
            bold: descriptor_flags & flags::FORCE_BOLD != 0 || lower.contains("bold"),
            italic: descriptor_flags & flags::ITALIC != 0 || lower.contains("italic"),
        }
    }

    /// Advance width (1/1000 em) of a glyph name in this font, if known.
    pub fn glyph_width(&self, glyph_name: &str) -> Option<f64> {
        match self.family {
            StandardFamily::Courier => Some(600.0),
            StandardFamily::Helvetica => lookup_width(&HELVETICA_WIDTHS, glyph_name),
            StandardFamily::Times => lookup_width(&TIMES_WIDTHS, glyph_name),
            StandardFamily::Symbol | StandardFamily::ZapfDingbats => None,
        }
    }

    /// True for families whose built-in encoding is not Latin text.
    pub fn is_symbolic(&self) -> bool {
        matches!(self.family, StandardFamily::Symbol | StandardFamily::ZapfDingbats)
    }
}

/// Removes a six-letter subset tag such as `ABCDEF+`.
pub fn strip_subset_prefix(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => rest,
        _ => name,
    }
}

fn lookup_width(table: &[(&str, u16)], glyph_name: &str) -> Option<f64> {
    if let Some((_, w)) = table.iter().find(|(name, _)| *name == glyph_name) {
        return Some(*w as f64);
    }
    // Accented letters share the advance of their base letter
    let base = ACCENT_SUFFIXES
        .iter()
        .find_map(|suffix| glyph_name.strip_suffix(suffix))
        .filter(|base| base.len() == 1)?;
    table.iter().find(|(name, _)| *name == base).map(|(_, w)| *w as f64)
}

const ACCENT_SUFFIXES: [&str; 9] = [
    "acute", "grave", "circumflex", "dieresis", "tilde", "ring", "cedilla", "caron", "slash",
];

const HELVETICA_WIDTHS: [(&str, u16); 105] = [
    ("space", 278), ("exclam", 278), ("quotedbl", 355), ("numbersign", 556),
    ("dollar", 556), ("percent", 889), ("ampersand", 667), ("quoteright", 222),
    ("quotesingle", 191), ("parenleft", 333), ("parenright", 333), ("asterisk", 389),
    ("plus", 584), ("comma", 278), ("hyphen", 333), ("period", 278), ("slash", 278),
    ("zero", 556), ("one", 556), ("two", 556), ("three", 556), ("four", 556),
    ("five", 556), ("six", 556), ("seven", 556), ("eight", 556), ("nine", 556),
    ("colon", 278), ("semicolon", 278), ("less", 584), ("equal", 584), ("greater", 584),
    ("question", 556), ("at", 1015), ("A", 667), ("B", 667), ("C", 722), ("D", 722),
    ("E", 667), ("F", 611), ("G", 778), ("H", 722), ("I", 278), ("J", 500), ("K", 667),
    ("L", 556), ("M", 833), ("N", 722), ("O", 778), ("P", 667), ("Q", 778), ("R", 722),
    ("S", 667), ("T", 611), ("U", 722), ("V", 667), ("W", 944), ("X", 667), ("Y", 667),
    ("Z", 611), ("bracketleft", 278), ("backslash", 278), ("bracketright", 278),
    ("asciicircum", 469), ("underscore", 556), ("quoteleft", 222), ("grave", 333),
    ("a", 556), ("b", 556), ("c", 500), ("d", 556), ("e", 556), ("f", 278), ("g", 556),
    ("h", 556), ("i", 222), ("j", 222), ("k", 500), ("l", 222), ("m", 833), ("n", 556),
    ("o", 556), ("p", 556), ("q", 556), ("r", 333), ("s", 500), ("t", 278), ("u", 556),
    ("v", 500), ("w", 722), ("x", 500), ("y", 500), ("z", 500), ("braceleft", 334),
    ("bar", 260), ("braceright", 334), ("asciitilde", 584), ("bullet", 350),
    ("endash", 556), ("emdash", 1000), ("quotedblleft", 333), ("quotedblright", 333),
    ("ellipsis", 1000), ("fi", 500), ("fl", 500),
];

const TIMES_WIDTHS: [(&str, u16); 105] = [
    ("space", 250), ("exclam", 333), ("quotedbl", 408), ("numbersign", 500),
    ("dollar", 500), ("percent", 833), ("ampersand", 778), ("quoteright", 333),
    ("quotesingle", 180), ("parenleft", 333), ("parenright", 333), ("asterisk", 500),
    ("plus", 564), ("comma", 250), ("hyphen", 333), ("period", 250), ("slash", 278),
    ("zero", 500), ("one", 500), ("two", 500), ("three", 500), ("four", 500),
    ("five", 500), ("six", 500), ("seven", 500), ("eight", 500), ("nine", 500),
    ("colon", 278), ("semicolon", 278), ("less", 564), ("equal", 564), ("greater", 564),
    ("question", 444), ("at", 921), ("A", 722), ("B", 667), ("C", 667), ("D", 722),
    ("E", 611), ("F", 556), ("G", 722), ("H", 722), ("I", 333), ("J", 389), ("K", 722),
    ("L", 611), ("M", 889), ("N", 722), ("O", 722), ("P", 556), ("Q", 722), ("R", 667),
    ("S", 556), ("T", 611), ("U", 722), ("V", 722), ("W", 944), ("X", 722), ("Y", 722),
    ("Z", 611), ("bracketleft", 333), ("backslash", 278), ("bracketright", 333),
    ("asciicircum", 469), ("underscore", 500), ("quoteleft", 333), ("grave", 333),
    ("a", 444), ("b", 500), ("c", 444), ("d", 500), ("e", 444), ("f", 333), ("g", 500),
    ("h", 500), ("i", 278), ("j", 278), ("k", 500), ("l", 278), ("m", 778), ("n", 500),
    ("o", 500), ("p", 500), ("q", 500), ("r", 333), ("s", 389), ("t", 278), ("u", 500),
    ("v", 500), ("w", 722), ("x", 500), ("y", 500), ("z", 444), ("braceleft", 480),
    ("bar", 200), ("braceright", 480), ("asciitilde", 541), ("bullet", 350),
    ("endash", 500), ("emdash", 1000), ("quotedblleft", 444), ("quotedblright", 444),
    ("ellipsis", 1000), ("fi", 556), ("fl", 556),
];
