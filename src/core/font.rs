//! Font resources: dispatch to the program decoders and descriptor building.
//!
//! A font resource dictionary becomes a [`FontDescriptor`]: the code to glyph
//! mapping, advance widths, outlines and Unicode text for every code the
//! content stream can show. The embedded program (if any) is decoded by the
//! sub-decoder matching its declared type:
//!
//! - **FontFile**: Type 1 (eexec, charstrings) via [`type1`](super::type1)
//! - **FontFile2**: TrueType via [`truetype`](super::truetype)
//! - **FontFile3**: CFF (`Type1C`, `CIDFontType0C`) via [`cff`](super::cff),
//!   or OpenType via [`truetype`](super::truetype)
//!
//! Type 3 fonts carry glyph procedures instead of a program. Loading never
//! fails: a broken program yields a descriptor built from the declared widths
//! with a standard substitute glyph set.

use super::cmap::CMap;
use super::document::PDFDocument;
use super::encodings::{BaseEncoding, Encoding, glyph_name_to_unicode};
use super::error::{PDFError, PDFResult};
use super::parser::{Dict, PDFObject, PdfStream};
use super::standard_fonts::{StandardFamily, StandardFont, flags, strip_subset_prefix};
use super::{cff, truetype, type1};
use rustc_hash::FxHashMap;

/// Advance used when neither the font dictionary nor the program knows a width.
pub const DEFAULT_GLYPH_WIDTH: f64 = 250.0;

/// Default `/DW` of a CID font.
const DEFAULT_CID_WIDTH: f64 = 1000.0;

/// Glyph space of every non-Type3 font: 1000 units per em.
pub const STANDARD_FONT_MATRIX: [f64; 6] = [0.001, 0.0, 0.0, 0.001, 0.0, 0.0];

/// Upper bound on codes expanded from one `/W` range.
const MAX_WIDTH_RANGE: i64 = 0x1_0000;

/// PDF font type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontType {
    /// Type1 font
    Type1,
    /// Type1 Compact Font Format (CFF)
    Type1C,
    /// TrueType font
    TrueType,
    /// Type3 font (user-defined glyphs)
    Type3,
    /// Composite font
    Type0,
    /// CID font (multi-byte character ID)
    CIDFontType0,
    /// CID TrueType font
    CIDFontType2,
    /// Unknown font type
    Unknown,
}

impl FontType {
    /// Parse font type from PDF font dictionary Subtype.
    pub fn from_subtype(subtype: &str) -> Self {
        match subtype {
            "Type1" | "MMType1" => FontType::Type1,
            "Type1C" => FontType::Type1C,
            "TrueType" => FontType::TrueType,
            "Type3" => FontType::Type3,
            "Type0" => FontType::Type0,
            "CIDFontType0" => FontType::CIDFontType0,
            "CIDFontType2" => FontType::CIDFontType2,
            _ => FontType::Unknown,
        }
    }

    /// Returns true if this is a CID font (multi-byte character IDs).
    pub fn is_cid_font(&self) -> bool {
        matches!(self, FontType::CIDFontType0 | FontType::CIDFontType2)
    }
}

/// Embedded font program formats, keyed by the descriptor entry and `/Subtype`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramKind {
    Type1,
    Cff,
    TrueType,
    OpenType,
    /// A `/FontFile3` subtype with no decoder.
    Unsupported(String),
}

impl ProgramKind {
    fn from_descriptor_key(key: &str, subtype: Option<&str>) -> Self {
        match (key, subtype) {
            ("FontFile", _) => ProgramKind::Type1,
            ("FontFile2", _) => ProgramKind::TrueType,
            (_, Some("Type1C") | Some("CIDFontType0C")) => ProgramKind::Cff,
            (_, Some("OpenType")) => ProgramKind::OpenType,
            (_, other) => ProgramKind::Unsupported(other.unwrap_or("none").to_string()),
        }
    }

    /// Corrects the declared kind from the program's magic bytes.
    ///
    /// Producers regularly store TrueType data under `/FontFile3` or raw
    /// CFF under `/FontFile`.
    fn sniff(self, data: &[u8]) -> Self {
        match data {
            [0x00, 0x01, 0x00, 0x00, ..] | [b't', b'r', b'u', b'e', ..] => ProgramKind::TrueType,
            [b'O', b'T', b'T', b'O', ..] => ProgramKind::OpenType,
            [0x80, 0x01, ..] | [b'%', b'!', ..] => ProgramKind::Type1,
            [1, 0, hdr, _, ..] if *hdr >= 4 => ProgramKind::Cff,
            _ => self,
        }
    }
}

/// Where the glyph shapes of a descriptor come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlyphSource {
    /// Outlines decoded from the embedded program.
    Embedded(ProgramKind),
    /// Glyph procedures executed as content streams.
    Type3,
    /// A non-embedded standard 14 font.
    Standard(StandardFamily),
    /// A standard shape set standing in for a missing or broken program.
    Substitute(StandardFamily),
}

/// One glyph outline command, in 1000-unit glyph space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathOp {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    QuadTo(f64, f64, f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Close,
}

/// How character codes reach glyphs inside an embedded program.
#[derive(Debug, Clone, Copy)]
pub enum CodeMapping<'a> {
    /// One-byte codes through glyph names.
    Simple {
        declared: Option<&'a DeclaredEncoding>,
        symbolic: bool,
    },
    /// Two-byte CIDs, optionally remapped by `/CIDToGIDMap`.
    Cid { cid_to_gid: Option<&'a [u16]> },
}

/// What a sub-decoder hands back: its glyph index space mapped onto codes.
#[derive(Debug, Default)]
pub struct GlyphProgram {
    pub code_to_gid: FxHashMap<u32, u32>,
    /// Program advance widths by code, 1000 units per em.
    pub widths: FxHashMap<u32, f64>,
    /// Outlines by glyph id.
    pub outlines: FxHashMap<u32, Vec<PathOp>>,
    /// Effective code to name table for simple fonts.
    pub encoding: Option<Encoding>,
}

/// The `/Encoding` entry of a simple font before the base is known.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredEncoding {
    pub base: Option<BaseEncoding>,
    pub differences: Vec<PDFObject>,
}

impl DeclaredEncoding {
    fn from_font(doc: &PDFDocument, dict: &Dict) -> Option<Self> {
        match doc.get_dict_value(dict, "Encoding")? {
            PDFObject::Name(name) => match BaseEncoding::from_name(&name) {
                Some(base) => Some(DeclaredEncoding {
                    base: Some(base),
                    differences: Vec::new(),
                }),
                None => {
                    tracing::debug!("Ignoring unknown simple-font encoding /{}", name);
                    None
                }
            },
            PDFObject::Dictionary(enc) => {
                let base = enc
                    .get("BaseEncoding")
                    .and_then(|b| b.as_name())
                    .and_then(BaseEncoding::from_name);
                let differences = match doc.get_dict_value(&enc, "Differences") {
                    Some(PDFObject::Array(items)) => {
                        items.iter().map(|i| doc.fetch_if_ref(i)).collect()
                    }
                    _ => Vec::new(),
                };
                Some(DeclaredEncoding { base, differences })
            }
            _ => None,
        }
    }
}

/// Final code to name table: the declared base (or the program's built-in
/// encoding, or `StandardEncoding`) with `/Differences` applied on top.
pub fn effective_encoding(declared: Option<&DeclaredEncoding>, builtin: Option<&Encoding>) -> Encoding {
    let mut encoding = match (declared.and_then(|d| d.base), builtin) {
        (Some(base), _) => Encoding::from_base(base),
        (None, Some(builtin)) => builtin.clone(),
        (None, None) => Encoding::from_base(BaseEncoding::Standard),
    };
    if let Some(declared) = declared {
        encoding.apply_differences(&declared.differences);
    }
    encoding
}

/// Collects outline commands, mapping program units into 1000-unit glyph space.
///
/// An open subpath is closed before the next `move_to`.
pub(crate) struct PathSink {
    ops: Vec<PathOp>,
    matrix: [f64; 6],
    open: bool,
}

impl PathSink {
    pub fn new(matrix: [f64; 6]) -> Self {
        PathSink {
            ops: Vec::new(),
            matrix,
            open: false,
        }
    }

    /// A sink for programs whose FontMatrix maps onto 1/1000 em.
    pub fn from_font_matrix(fm: [f64; 6]) -> Self {
        Self::new(fm.map(|v| v * 1000.0))
    }

    pub fn scaled(scale: f64) -> Self {
        Self::new([scale, 0.0, 0.0, scale, 0.0, 0.0])
    }

    fn map(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.close();
        let (x, y) = self.map(x, y);
        self.ops.push(PathOp::MoveTo(x, y));
        self.open = true;
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        let (x, y) = self.map(x, y);
        self.ops.push(PathOp::LineTo(x, y));
    }

    pub fn quad_to(&mut self, x1: f64, y1: f64, x: f64, y: f64) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.ops.push(PathOp::QuadTo(x1, y1, x, y));
    }

    pub fn curve_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x: f64, y: f64) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.ops.push(PathOp::CurveTo(x1, y1, x2, y2, x, y));
    }

    pub fn close(&mut self) {
        if self.open {
            self.ops.push(PathOp::Close);
            self.open = false;
        }
    }

    pub fn finish(mut self) -> Vec<PathOp> {
        self.close();
        self.ops
    }
}

/// A shown glyph: the code, where it lands in the program and how far it advances.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub code: u32,
    pub gid: Option<u32>,
    pub unicode: Option<String>,
    /// Advance in glyph space (1000 units per em unless Type 3).
    pub width: f64,
    /// Single-byte code 32, which receives word spacing.
    pub is_space: bool,
}

/// Everything the interpreter needs to show text with one font resource.
///
/// Built once per distinct font object and shared by every page using it.
#[derive(Debug, Clone, PartialEq)]
pub struct FontDescriptor {
    pub name: String,
    pub font_type: FontType,
    pub source: GlyphSource,
    /// True when the embedded program was unusable and a substitute was synthesized.
    pub fallback: bool,
    pub font_matrix: [f64; 6],
    pub default_width: f64,
    composite: bool,
    widths: FxHashMap<u32, f64>,
    code_to_gid: FxHashMap<u32, u32>,
    glyph_names: FxHashMap<u32, String>,
    to_unicode: Option<CMap>,
    outlines: FxHashMap<u32, Vec<PathOp>>,
    char_procs: FxHashMap<u32, PdfStream>,
    resources: Option<Dict>,
}

impl FontDescriptor {
    fn new(name: String, font_type: FontType, source: GlyphSource) -> Self {
        FontDescriptor {
            name,
            font_type,
            source,
            fallback: false,
            font_matrix: STANDARD_FONT_MATRIX,
            default_width: DEFAULT_GLYPH_WIDTH,
            composite: false,
            widths: FxHashMap::default(),
            code_to_gid: FxHashMap::default(),
            glyph_names: FxHashMap::default(),
            to_unicode: None,
            outlines: FxHashMap::default(),
            char_procs: FxHashMap::default(),
            resources: None,
        }
    }

    /// Composite fonts read two-byte codes.
    pub fn is_composite(&self) -> bool {
        self.composite
    }

    pub fn is_type3(&self) -> bool {
        self.source == GlyphSource::Type3
    }

    /// Splits a shown string into character codes.
    pub fn char_codes(&self, bytes: &[u8]) -> Vec<u32> {
        if !self.composite {
            return bytes.iter().map(|b| *b as u32).collect();
        }
        bytes
            .chunks(2)
            .map(|pair| pair.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
            .collect()
    }

    /// Advance width of a code in glyph space.
    pub fn width(&self, code: u32) -> f64 {
        self.widths.get(&code).copied().unwrap_or(self.default_width)
    }

    /// Advance of a code in text space for a font size of 1.
    pub fn advance(&self, code: u32) -> f64 {
        self.width(code) * self.font_matrix[0]
    }

    pub fn glyph_id(&self, code: u32) -> Option<u32> {
        self.code_to_gid.get(&code).copied()
    }

    pub fn glyph_name(&self, code: u32) -> Option<&str> {
        self.glyph_names.get(&code).map(String::as_str)
    }

    /// Unicode text for a code: `/ToUnicode` first, then the glyph name.
    pub fn unicode(&self, code: u32) -> Option<String> {
        if let Some(text) = self.to_unicode.as_ref().and_then(|cmap| cmap.to_unicode(code)) {
            return Some(text.to_string());
        }
        if let Some(text) = self.glyph_name(code).and_then(glyph_name_to_unicode) {
            return Some(text);
        }
        if !self.composite && (0x20..0x7f).contains(&code) {
            return char::from_u32(code).map(String::from);
        }
        None
    }

    /// Outline of a glyph id, in 1000-unit glyph space.
    pub fn outline(&self, gid: u32) -> Option<&[PathOp]> {
        self.outlines.get(&gid).map(Vec::as_slice)
    }

    pub fn outline_count(&self) -> usize {
        self.outlines.len()
    }

    /// Type 3 glyph procedure for a code.
    pub fn char_proc(&self, code: u32) -> Option<&PdfStream> {
        self.char_procs.get(&code)
    }

    /// Type 3 `/Resources`, if the font declares its own.
    pub fn resources(&self) -> Option<&Dict> {
        self.resources.as_ref()
    }

    pub fn glyph(&self, code: u32) -> Glyph {
        Glyph {
            code,
            gid: self.glyph_id(code),
            unicode: self.unicode(code),
            width: self.width(code),
            is_space: !self.composite && code == 32,
        }
    }

    /// Glyphs for every code in a shown string.
    pub fn glyphs(&self, bytes: &[u8]) -> Vec<Glyph> {
        self.char_codes(bytes).into_iter().map(|code| self.glyph(code)).collect()
    }
}

/// Builds the descriptor for a font resource dictionary.
///
/// Never fails: if the font cannot be decoded a substitute is synthesized
/// from the declared widths.
pub fn load_font(doc: &PDFDocument, dict: &Dict) -> FontDescriptor {
    let subtype = dict.get("Subtype").and_then(|s| s.as_name()).unwrap_or("Type1");
    let loaded = match subtype {
        "Type0" => load_composite(doc, dict),
        "Type3" => load_type3(doc, dict),
        _ => load_simple(doc, dict),
    };
    match loaded {
        Ok(font) => font,
        Err(e) => {
            tracing::warn!("Font {} falls back to a substitute: {}", base_font(dict), e);
            synthesize(doc, dict)
        }
    }
}

fn base_font(dict: &Dict) -> String {
    dict.get("BaseFont")
        .and_then(|b| b.as_name())
        .map(|name| strip_subset_prefix(name).to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn descriptor_flags(descriptor: Option<&Dict>) -> i64 {
    descriptor
        .and_then(|d| d.get("Flags"))
        .and_then(|f| f.as_int())
        .unwrap_or(0)
}

fn is_symbolic(descriptor_flags: i64) -> bool {
    descriptor_flags & flags::SYMBOLIC != 0 && descriptor_flags & flags::NONSYMBOLIC == 0
}

fn load_to_unicode(doc: &PDFDocument, dict: &Dict) -> Option<CMap> {
    let PDFObject::Stream(stream) = doc.get_dict_value(dict, "ToUnicode")? else {
        return None;
    };
    let parsed = doc
        .get_stream_bytes(&stream)
        .and_then(|bytes| CMap::parse(&bytes));
    match parsed {
        Ok(cmap) if !cmap.is_empty() => Some(cmap),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Ignoring unreadable /ToUnicode: {}", e);
            None
        }
    }
}

/// `/FirstChar` + `/Widths` as a code to width map.
fn declared_widths(doc: &PDFDocument, dict: &Dict) -> FxHashMap<u32, f64> {
    let mut widths = FxHashMap::default();
    let first = doc
        .get_dict_value(dict, "FirstChar")
        .and_then(|f| f.as_int())
        .unwrap_or(0)
        .clamp(0, u32::MAX as i64) as u32;
    if let Some(PDFObject::Array(items)) = doc.get_dict_value(dict, "Widths") {
        for (i, item) in items.iter().enumerate() {
            let Some(code) = u32::try_from(i).ok().and_then(|i| first.checked_add(i)) else {
                break;
            };
            if let Some(w) = doc.fetch_if_ref(item).as_number() {
                widths.insert(code, w);
            }
        }
    }
    widths
}

/// CID `/W` array: `c [w1 w2 ...]` and `c_first c_last w` forms.
fn cid_widths(doc: &PDFDocument, items: &[PDFObject]) -> FxHashMap<u32, f64> {
    let mut widths = FxHashMap::default();
    let items: Vec<PDFObject> = items.iter().map(|i| doc.fetch_if_ref(i)).collect();
    let mut i = 0;
    while i + 1 < items.len() {
        let Some(first) = items[i].as_int() else {
            i += 1;
            continue;
        };
        let first = first.clamp(0, u32::MAX as i64);
        match &items[i + 1] {
            PDFObject::Array(list) => {
                for (k, w) in list.iter().enumerate() {
                    let Some(cid) = i64::try_from(k)
                        .ok()
                        .and_then(|k| first.checked_add(k))
                        .and_then(|cid| u32::try_from(cid).ok())
                    else {
                        break;
                    };
                    if let Some(w) = doc.fetch_if_ref(w).as_number() {
                        widths.insert(cid, w);
                    }
                }
                i += 2;
            }
            last => {
                let (Some(last), Some(w)) = (last.as_int(), items.get(i + 2).and_then(|w| w.as_number())) else {
                    break;
                };
                let last = last
                    .min(first.saturating_add(MAX_WIDTH_RANGE - 1))
                    .min(u32::MAX as i64);
                for cid in first..=last {
                    widths.insert(cid as u32, w);
                }
                i += 3;
            }
        }
    }
    widths
}

/// Finds the embedded program stream of a font descriptor.
fn embedded_program(doc: &PDFDocument, descriptor: &Dict) -> PDFResult<Option<(ProgramKind, Vec<u8>)>> {
    for key in ["FontFile", "FontFile2", "FontFile3"] {
        let Some(PDFObject::Stream(stream)) = doc.get_dict_value(descriptor, key) else {
            continue;
        };
        let subtype = stream.get("Subtype").and_then(|s| s.as_name());
        let declared = ProgramKind::from_descriptor_key(key, subtype);
        let data = doc
            .get_stream_bytes(&stream)
            .map_err(|e| PDFError::font(format!("{key} does not decode: {e}")))?;
        if data.is_empty() {
            return Err(PDFError::font(format!("{key} is empty")));
        }
        let kind = declared.sniff(&data);
        return Ok(Some((kind, data.to_vec())));
    }
    Ok(None)
}

fn decode_program(kind: &ProgramKind, data: &[u8], mapping: CodeMapping<'_>) -> PDFResult<GlyphProgram> {
    match kind {
        ProgramKind::TrueType | ProgramKind::OpenType => truetype::decode(data, mapping),
        ProgramKind::Cff => cff::decode(data, mapping),
        ProgramKind::Type1 => type1::decode(data, mapping),
        ProgramKind::Unsupported(subtype) => Err(PDFError::font(format!(
            "no decoder for /FontFile3 subtype {subtype}"
        ))),
    }
}

fn load_simple(doc: &PDFDocument, dict: &Dict) -> PDFResult<FontDescriptor> {
    let name = base_font(dict);
    let subtype = dict.get("Subtype").and_then(|s| s.as_name()).unwrap_or("Type1");
    let descriptor = doc.get_dict(dict, "FontDescriptor");
    let font_flags = descriptor_flags(descriptor.as_ref());
    let declared = DeclaredEncoding::from_font(doc, dict);

    let embedded = match &descriptor {
        Some(d) => embedded_program(doc, d)?,
        None => None,
    };

    let (source, program) = match embedded {
        Some((kind, data)) => {
            let mapping = CodeMapping::Simple {
                declared: declared.as_ref(),
                symbolic: is_symbolic(font_flags),
            };
            let program = decode_program(&kind, &data, mapping)?;
            (GlyphSource::Embedded(kind), Some(program))
        }
        None => match StandardFont::from_base_font(&name) {
            Some(standard) => (GlyphSource::Standard(standard.family), None),
            None => {
                let substitute = StandardFont::substitute(&name, font_flags);
                tracing::debug!("Font {} is not embedded, using {:?}", name, substitute.family);
                (GlyphSource::Substitute(substitute.family), None)
            }
        },
    };

    let mut font = FontDescriptor::new(name, FontType::from_subtype(subtype), source);
    font.to_unicode = load_to_unicode(doc, dict);
    font.default_width = missing_width(descriptor.as_ref()).unwrap_or(DEFAULT_GLYPH_WIDTH);

    let (encoding, program_widths) = match program {
        Some(program) => {
            font.code_to_gid = program.code_to_gid;
            font.outlines = program.outlines;
            (program.encoding, program.widths)
        }
        None => {
            let symbolic_standard = matches!(
                font.source,
                GlyphSource::Standard(StandardFamily::Symbol | StandardFamily::ZapfDingbats)
            );
            let encoding = if symbolic_standard && declared.is_none() {
                None
            } else {
                Some(effective_encoding(declared.as_ref(), None))
            };
            (encoding, FxHashMap::default())
        }
    };

    if let Some(encoding) = &encoding {
        for (code, glyph) in encoding.iter() {
            font.glyph_names.insert(code as u32, glyph.to_string());
        }
    }
    font.widths = resolve_simple_widths(doc, dict, &font, &program_widths);
    Ok(font)
}

fn missing_width(descriptor: Option<&Dict>) -> Option<f64> {
    descriptor
        .and_then(|d| d.get("MissingWidth"))
        .and_then(|w| w.as_number())
        .filter(|w| *w > 0.0)
}

/// Widths by code, nearest source first: `/Widths`, the program, then
/// standard metrics for the glyph name.
fn resolve_simple_widths(
    doc: &PDFDocument,
    dict: &Dict,
    font: &FontDescriptor,
    program_widths: &FxHashMap<u32, f64>,
) -> FxHashMap<u32, f64> {
    let mut widths = declared_widths(doc, dict);
    for (code, w) in program_widths {
        widths.entry(*code).or_insert(*w);
    }

    let metrics = match &font.source {
        GlyphSource::Standard(_) | GlyphSource::Substitute(_) => {
            StandardFont::from_base_font(&font.name).or_else(|| match font.source {
                GlyphSource::Substitute(family) => Some(StandardFont {
                    family,
                    bold: false,
                    italic: false,
                }),
                _ => None,
            })
        }
        _ => None,
    };
    if let Some(metrics) = metrics {
        for (code, glyph) in &font.glyph_names {
            if let Some(w) = metrics.glyph_width(glyph) {
                widths.entry(*code).or_insert(w);
            }
        }
    }
    widths
}

fn load_composite(doc: &PDFDocument, dict: &Dict) -> PDFResult<FontDescriptor> {
    let name = base_font(dict);

    match doc.get_dict_value(dict, "Encoding") {
        Some(PDFObject::Name(cmap)) if cmap == "Identity-H" || cmap == "Identity-V" => {}
        Some(other) => tracing::warn!(
            "Font {}: encoding CMap {} read as two-byte identity",
            name,
            other.as_name().unwrap_or("stream")
        ),
        None => tracing::warn!("Font {} has no /Encoding, assuming Identity-H", name),
    }

    let descendant = match doc.get_dict_value(dict, "DescendantFonts") {
        Some(PDFObject::Array(items)) => items.first().map(|d| doc.fetch_if_ref(d)),
        _ => None,
    };
    let Some(PDFObject::Dictionary(cid_font)) = descendant else {
        return Err(PDFError::font(format!("Type0 font {name} has no descendant font")));
    };

    let cid_subtype = cid_font.get("Subtype").and_then(|s| s.as_name()).unwrap_or("CIDFontType2");
    let descriptor = doc.get_dict(&cid_font, "FontDescriptor");
    let cid_to_gid = read_cid_to_gid(doc, &cid_font);

    let embedded = match &descriptor {
        Some(d) => embedded_program(doc, d)?,
        None => None,
    };
    let (source, program) = match embedded {
        Some((kind, data)) => {
            let mapping = CodeMapping::Cid {
                cid_to_gid: cid_to_gid.as_deref(),
            };
            let program = decode_program(&kind, &data, mapping)?;
            (GlyphSource::Embedded(kind), Some(program))
        }
        None => {
            let substitute = StandardFont::substitute(&name, descriptor_flags(descriptor.as_ref()));
            (GlyphSource::Substitute(substitute.family), None)
        }
    };

    let mut font = FontDescriptor::new(name, FontType::from_subtype(cid_subtype), source);
    font.composite = true;
    font.to_unicode = load_to_unicode(doc, dict);
    apply_cid_metrics(doc, &cid_font, &mut font);
    if let Some(program) = program {
        font.code_to_gid = program.code_to_gid;
        font.outlines = program.outlines;
    }
    Ok(font)
}

fn apply_cid_metrics(doc: &PDFDocument, cid_font: &Dict, font: &mut FontDescriptor) {
    font.default_width = doc
        .get_dict_value(cid_font, "DW")
        .and_then(|w| w.as_number())
        .unwrap_or(DEFAULT_CID_WIDTH);
    if let Some(PDFObject::Array(items)) = doc.get_dict_value(cid_font, "W") {
        font.widths = cid_widths(doc, &items);
    }
}

/// `/CIDToGIDMap` as a table; `None` for `/Identity` or absent.
fn read_cid_to_gid(doc: &PDFDocument, cid_font: &Dict) -> Option<Vec<u16>> {
    let PDFObject::Stream(stream) = doc.get_dict_value(cid_font, "CIDToGIDMap")? else {
        return None;
    };
    match doc.get_stream_bytes(&stream) {
        Ok(bytes) => Some(
            bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect(),
        ),
        Err(e) => {
            tracing::warn!("Unreadable /CIDToGIDMap, using identity: {}", e);
            None
        }
    }
}

fn load_type3(doc: &PDFDocument, dict: &Dict) -> PDFResult<FontDescriptor> {
    let name = dict
        .get("Name")
        .and_then(|n| n.as_name())
        .map(str::to_string)
        .unwrap_or_else(|| base_font(dict));

    let font_matrix = match doc.get_dict_value(dict, "FontMatrix") {
        Some(PDFObject::Array(items)) if items.len() == 6 => {
            let mut m = [0.0; 6];
            for (slot, item) in m.iter_mut().zip(&items) {
                *slot = doc
                    .fetch_if_ref(item)
                    .as_number()
                    .ok_or_else(|| PDFError::font("non-numeric /FontMatrix entry"))?;
            }
            m
        }
        _ => STANDARD_FONT_MATRIX,
    };

    let char_procs = doc
        .get_dict(dict, "CharProcs")
        .ok_or_else(|| PDFError::font(format!("Type3 font {name} has no /CharProcs")))?;

    let declared = DeclaredEncoding::from_font(doc, dict);
    let mut encoding = match declared.as_ref().and_then(|d| d.base) {
        Some(base) => Encoding::from_base(base),
        None => Encoding::empty(),
    };
    if let Some(declared) = &declared {
        encoding.apply_differences(&declared.differences);
    }

    let mut font = FontDescriptor::new(name, FontType::Type3, GlyphSource::Type3);
    font.font_matrix = font_matrix;
    font.default_width = 0.0;
    font.to_unicode = load_to_unicode(doc, dict);
    font.resources = doc.get_dict(dict, "Resources");
    font.widths = declared_widths(doc, dict);

    for (code, glyph) in encoding.iter() {
        font.glyph_names.insert(code as u32, glyph.to_string());
        match doc.get_dict_value(&char_procs, glyph) {
            Some(PDFObject::Stream(proc_stream)) => {
                font.char_procs.insert(code as u32, proc_stream);
            }
            _ => tracing::trace!("Type3 font {} has no procedure for /{}", font.name, glyph),
        }
    }
    Ok(font)
}

/// A descriptor built only from the dictionary: declared widths, the
/// declared encoding and a standard substitute shape set.
fn synthesize(doc: &PDFDocument, dict: &Dict) -> FontDescriptor {
    let name = base_font(dict);
    let subtype = dict.get("Subtype").and_then(|s| s.as_name()).unwrap_or("Type1");

    let cid_font = if subtype == "Type0" {
        match doc.get_dict_value(dict, "DescendantFonts") {
            Some(PDFObject::Array(items)) => items
                .first()
                .and_then(|d| doc.fetch_if_ref(d).as_dict().cloned()),
            _ => None,
        }
    } else {
        None
    };

    let descriptor = match &cid_font {
        Some(cid) => doc.get_dict(cid, "FontDescriptor"),
        None => doc.get_dict(dict, "FontDescriptor"),
    };
    let family = StandardFont::substitute(&name, descriptor_flags(descriptor.as_ref())).family;

    let mut font = FontDescriptor::new(name, FontType::from_subtype(subtype), GlyphSource::Substitute(family));
    font.fallback = true;
    font.to_unicode = load_to_unicode(doc, dict);

    match cid_font {
        Some(cid_font) => {
            font.composite = true;
            apply_cid_metrics(doc, &cid_font, &mut font);
        }
        None => {
            let declared = DeclaredEncoding::from_font(doc, dict);
            let encoding = effective_encoding(declared.as_ref(), None);
            for (code, glyph) in encoding.iter() {
                font.glyph_names.insert(code as u32, glyph.to_string());
            }
            font.default_width = missing_width(descriptor.as_ref()).unwrap_or(DEFAULT_GLYPH_WIDTH);
            font.widths = resolve_simple_widths(doc, dict, &font, &FxHashMap::default());
        }
    }
    font
}
