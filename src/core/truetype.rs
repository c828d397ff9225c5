//! TrueType and OpenType programs (`/FontFile2`, `/FontFile3 /OpenType`).
//!
//! Table parsing and outline extraction go through `ttf-parser`; this module
//! only decides which `cmap` subtable a PDF character code goes through.

use super::encodings::{MAC_ROMAN_ENCODING, glyph_name_to_unicode};
use super::error::{PDFError, PDFResult};
use super::font::{CodeMapping, DeclaredEncoding, GlyphProgram, PathSink, effective_encoding};
use rustc_hash::FxHashSet;
use ttf_parser::cmap::Subtable;
use ttf_parser::{Face, GlyphId, OutlineBuilder, PlatformId};

struct Pen(PathSink);

impl OutlineBuilder for Pen {
    fn move_to(&mut self, x: f32, y: f32) {
        self.0.move_to(x as f64, y as f64);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.0.line_to(x as f64, y as f64);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.0.quad_to(x1 as f64, y1 as f64, x as f64, y as f64);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.0
            .curve_to(x1 as f64, y1 as f64, x2 as f64, y2 as f64, x as f64, y as f64);
    }

    fn close(&mut self) {
        self.0.close();
    }
}

/// The cmap subtables a PDF viewer consults, in preference order.
struct CharMaps<'a> {
    unicode: Option<Subtable<'a>>,
    symbol: Option<Subtable<'a>>,
    mac_roman: Option<Subtable<'a>>,
}

impl<'a> CharMaps<'a> {
    fn new(face: &Face<'a>) -> Self {
        let subtables: Vec<Subtable<'a>> = face
            .tables()
            .cmap
            .iter()
            .flat_map(|cmap| cmap.subtables)
            .collect();
        let find = |platform: PlatformId, encoding: u16| {
            subtables
                .iter()
                .find(|s| s.platform_id == platform && s.encoding_id == encoding)
                .copied()
        };
        CharMaps {
            unicode: find(PlatformId::Windows, 1)
                .or_else(|| find(PlatformId::Windows, 10))
                .or_else(|| subtables.iter().find(|s| s.platform_id == PlatformId::Unicode).copied()),
            symbol: find(PlatformId::Windows, 0),
            mac_roman: find(PlatformId::Macintosh, 0),
        }
    }

    /// Looks a raw byte code up in the symbol or Mac table.
    ///
    /// Symbol cmaps usually place codes in the `0xF000` private use page.
    fn by_code(&self, code: u32) -> Option<u16> {
        if let Some(symbol) = &self.symbol {
            for page in [0x0000, 0xF000, 0xF100, 0xF200] {
                if let Some(gid) = symbol.glyph_index(page | code) {
                    return Some(gid.0);
                }
            }
        }
        if let Some(gid) = self.mac_roman.as_ref().and_then(|mac| mac.glyph_index(code)) {
            return Some(gid.0);
        }
        self.unicode
            .as_ref()
            .and_then(|unicode| unicode.glyph_index(code))
            .map(|gid| gid.0)
    }

    fn by_name(&self, face: &Face<'_>, name: &str) -> Option<u16> {
        let unicode = glyph_name_to_unicode(name).and_then(|text| text.chars().next());
        if let (Some(table), Some(ch)) = (&self.unicode, unicode) {
            if let Some(gid) = table.glyph_index(ch as u32) {
                return Some(gid.0);
            }
        }
        if let Some(mac) = &self.mac_roman {
            let mac_code = MAC_ROMAN_ENCODING.iter().position(|n| *n == name);
            if let Some(gid) = mac_code.and_then(|code| mac.glyph_index(code as u32)) {
                return Some(gid.0);
            }
        }
        face.glyph_index_by_name(name).map(|gid| gid.0)
    }
}

/// Decodes a TrueType/OpenType program and maps it onto PDF codes.
pub fn decode(data: &[u8], mapping: CodeMapping<'_>) -> PDFResult<GlyphProgram> {
    let face = Face::parse(data, 0).map_err(|e| PDFError::font(format!("TrueType: {e}")))?;
    let units_per_em = face.units_per_em();
    if units_per_em == 0 {
        return Err(PDFError::font("TrueType: unitsPerEm is zero"));
    }
    let scale = 1000.0 / units_per_em as f64;
    let num_glyphs = face.number_of_glyphs() as u32;

    let mut program = GlyphProgram::default();
    match mapping {
        CodeMapping::Simple { declared, symbolic } => {
            map_simple(&face, declared, symbolic, &mut program);
            for (code, gid) in &program.code_to_gid {
                if let Some(advance) = face.glyph_hor_advance(GlyphId(*gid as u16)) {
                    program.widths.insert(*code, advance as f64 * scale);
                }
            }
        }
        CodeMapping::Cid { cid_to_gid } => match cid_to_gid {
            Some(table) => {
                for (cid, gid) in table.iter().enumerate() {
                    if (*gid != 0 || cid == 0) && (*gid as u32) < num_glyphs {
                        program.code_to_gid.insert(cid as u32, *gid as u32);
                    }
                }
            }
            None => program.code_to_gid.extend((0..num_glyphs).map(|gid| (gid, gid))),
        },
    }

    let gids: FxHashSet<u32> = program.code_to_gid.values().copied().collect();
    for gid in gids {
        let mut pen = Pen(PathSink::scaled(scale));
        face.outline_glyph(GlyphId(gid as u16), &mut pen);
        program.outlines.insert(gid, pen.0.finish());
    }

    tracing::debug!(
        "TrueType program: {} glyphs, {} mapped codes",
        num_glyphs,
        program.code_to_gid.len()
    );
    Ok(program)
}

fn map_simple(face: &Face<'_>, declared: Option<&DeclaredEncoding>, symbolic: bool, program: &mut GlyphProgram) {
    let maps = CharMaps::new(face);

    // Symbolic fonts without an /Encoding index their cmap by raw code
    if symbolic && declared.is_none() {
        for code in 0..256u32 {
            if let Some(gid) = maps.by_code(code) {
                program.code_to_gid.insert(code, gid as u32);
            }
        }
        return;
    }

    let encoding = effective_encoding(declared, None);
    for code in 0..256u32 {
        let by_name = encoding
            .name(code as u8)
            .and_then(|name| maps.by_name(face, name));
        if let Some(gid) = by_name.or_else(|| maps.by_code(code)) {
            program.code_to_gid.insert(code, gid as u32);
        }
    }
    program.encoding = Some(encoding);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::font::PathOp;

    fn table(tag: &[u8; 4], data: Vec<u8>) -> ([u8; 4], Vec<u8>) {
        (*tag, data)
    }

    fn be16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    /// A two-glyph font: .notdef and a 400x700 box mapped from U+0041.
    fn build_font() -> Vec<u8> {
        let mut head = vec![0u8; 54];
        head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
        head[18..20].copy_from_slice(&1000u16.to_be_bytes());
        head[40..42].copy_from_slice(&500i16.to_be_bytes());
        head[42..44].copy_from_slice(&700i16.to_be_bytes());

        let mut hhea = vec![0u8; 36];
        hhea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        hhea[4..6].copy_from_slice(&800i16.to_be_bytes());
        hhea[6..8].copy_from_slice(&(-200i16).to_be_bytes());
        hhea[10..12].copy_from_slice(&600u16.to_be_bytes());
        hhea[34..36].copy_from_slice(&2u16.to_be_bytes());

        let mut maxp = Vec::new();
        maxp.extend_from_slice(&0x0000_5000u32.to_be_bytes());
        be16(&mut maxp, 2);

        let mut hmtx = Vec::new();
        for (advance, lsb) in [(500u16, 0i16), (600, 100)] {
            be16(&mut hmtx, advance);
            hmtx.extend_from_slice(&lsb.to_be_bytes());
        }

        let mut glyph = Vec::new();
        for v in [1i16, 100, 0, 500, 700] {
            glyph.extend_from_slice(&v.to_be_bytes());
        }
        be16(&mut glyph, 3);
        be16(&mut glyph, 0);
        glyph.extend_from_slice(&[0x01; 4]);
        for dx in [100i16, 400, 0, -400] {
            glyph.extend_from_slice(&dx.to_be_bytes());
        }
        for dy in [0i16, 0, 700, 0] {
            glyph.extend_from_slice(&dy.to_be_bytes());
        }
        if glyph.len() % 2 == 1 {
            glyph.push(0);
        }

        let mut loca = Vec::new();
        for offset in [0, 0, glyph.len() as u16] {
            be16(&mut loca, offset / 2);
        }

        let mut cmap = Vec::new();
        for v in [0u16, 1, 3, 1] {
            be16(&mut cmap, v);
        }
        cmap.extend_from_slice(&12u32.to_be_bytes());
        for v in [4u16, 32, 0, 4, 4, 1, 0] {
            be16(&mut cmap, v);
        }
        for v in [0x41u16, 0xFFFF, 0, 0x41, 0xFFFF, 1u16.wrapping_sub(0x41), 1, 0, 0] {
            be16(&mut cmap, v);
        }

        let tables = vec![
            table(b"cmap", cmap),
            table(b"glyf", glyph),
            table(b"head", head),
            table(b"hhea", hhea),
            table(b"hmtx", hmtx),
            table(b"loca", loca),
            table(b"maxp", maxp),
        ];

        let mut font = Vec::new();
        font.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        for v in [tables.len() as u16, 64, 2, 48] {
            be16(&mut font, v);
        }
        let mut offset = 12 + 16 * tables.len();
        for (tag, data) in &tables {
            font.extend_from_slice(tag);
            font.extend_from_slice(&0u32.to_be_bytes());
            font.extend_from_slice(&(offset as u32).to_be_bytes());
            font.extend_from_slice(&(data.len() as u32).to_be_bytes());
            offset += (data.len() + 3) & !3;
        }
        for (_, data) in &tables {
            font.extend_from_slice(data);
            while font.len() % 4 != 0 {
                font.push(0);
            }
        }
        font
    }

    #[test]
    fn test_simple_mapping_through_unicode_cmap() {
        let program = decode(
            &build_font(),
            CodeMapping::Simple {
                declared: None,
                symbolic: false,
            },
        )
        .unwrap();

        assert_eq!(program.code_to_gid.get(&65), Some(&1));
        assert_eq!(program.widths.get(&65), Some(&600.0));
        assert!(program.encoding.is_some());

        let outline = &program.outlines[&1];
        assert_eq!(outline.first(), Some(&PathOp::MoveTo(100.0, 0.0)));
        assert_eq!(outline.last(), Some(&PathOp::Close));
        assert!(outline.contains(&PathOp::LineTo(500.0, 700.0)));
    }

    #[test]
    fn test_differences_rename_code() {
        let declared = DeclaredEncoding {
            base: None,
            differences: vec![
                crate::core::parser::PDFObject::Number(66.0),
                crate::core::parser::PDFObject::Name("A".into()),
            ],
        };
        let program = decode(
            &build_font(),
            CodeMapping::Simple {
                declared: Some(&declared),
                symbolic: false,
            },
        )
        .unwrap();
        assert_eq!(program.code_to_gid.get(&66), Some(&1));
    }

    #[test]
    fn test_cid_identity_and_table() {
        let program = decode(&build_font(), CodeMapping::Cid { cid_to_gid: None }).unwrap();
        assert_eq!(program.code_to_gid.len(), 2);
        assert!(program.widths.is_empty());

        let map = [0u16, 0, 0, 1];
        let program = decode(&build_font(), CodeMapping::Cid { cid_to_gid: Some(&map) }).unwrap();
        assert_eq!(program.code_to_gid.get(&3), Some(&1));
        assert_eq!(program.code_to_gid.get(&1), None);
    }

    #[test]
    fn test_garbage_is_corrupt_font() {
        let err = decode(b"definitely not a font", CodeMapping::Cid { cid_to_gid: None }).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::CorruptFontProgram);
    }
}
