//! Compact Font Format programs (`/FontFile3` with `/Type1C` or `/CIDFontType0C`).
//!
//! Parses the INDEX and DICT structures, the charset and built-in encoding,
//! and interprets Type 2 charstrings into outlines. CID-keyed fonts select a
//! private dictionary per glyph through `FDSelect`.

use super::encodings::{Encoding, STANDARD_ENCODING};
use super::error::{PDFError, PDFResult};
use super::font::{CodeMapping, GlyphProgram, PathOp, PathSink, STANDARD_FONT_MATRIX, effective_encoding};
use rustc_hash::{FxHashMap, FxHashSet};

/// Subroutine nesting limit.
const MAX_SUBR_DEPTH: usize = 10;

/// Type 2 argument stack limit.
const MAX_STACK: usize = 513;

/// DICT keys: one-byte operators map to themselves, `12 x` to `1200 + x`.
mod key {
    pub const CHARSET: u16 = 15;
    pub const ENCODING: u16 = 16;
    pub const CHAR_STRINGS: u16 = 17;
    pub const PRIVATE: u16 = 18;
    pub const SUBRS: u16 = 19;
    pub const DEFAULT_WIDTH_X: u16 = 20;
    pub const NOMINAL_WIDTH_X: u16 = 21;
    pub const CHARSTRING_TYPE: u16 = 1206;
    pub const FONT_MATRIX: u16 = 1207;
    pub const ROS: u16 = 1230;
    pub const FD_ARRAY: u16 = 1236;
    pub const FD_SELECT: u16 = 1237;
}

type Dict = FxHashMap<u16, Vec<f64>>;

fn byte(data: &[u8], pos: usize) -> PDFResult<u8> {
    data.get(pos)
        .copied()
        .ok_or_else(|| PDFError::font(format!("CFF: read past end at {pos}")))
}

fn card16(data: &[u8], pos: usize) -> PDFResult<u16> {
    Ok(u16::from_be_bytes([byte(data, pos)?, byte(data, pos + 1)?]))
}

fn offset(data: &[u8], pos: usize, size: u8) -> PDFResult<usize> {
    let mut value = 0usize;
    for i in 0..size as usize {
        value = (value << 8) | byte(data, pos + i)? as usize;
    }
    Ok(value)
}

/// Reads an INDEX at `pos`, returning its items and the position after it.
fn read_index(data: &[u8], pos: usize) -> PDFResult<(Vec<&[u8]>, usize)> {
    let count = card16(data, pos)? as usize;
    if count == 0 {
        return Ok((Vec::new(), pos + 2));
    }
    let off_size = byte(data, pos + 2)?;
    if !(1..=4).contains(&off_size) {
        return Err(PDFError::font(format!("CFF: bad INDEX offSize {off_size}")));
    }
    let offsets_start = pos + 3;
    let data_start = offsets_start + (count + 1) * off_size as usize - 1;

    let mut items = Vec::with_capacity(count);
    let mut start = offset(data, offsets_start, off_size)?;
    for i in 1..=count {
        let end = offset(data, offsets_start + i * off_size as usize, off_size)?;
        let item = data
            .get(data_start + start..data_start + end)
            .ok_or_else(|| PDFError::font("CFF: INDEX item out of range"))?;
        items.push(item);
        start = end;
    }
    Ok((items, data_start + start))
}

fn parse_real(data: &[u8], mut pos: usize) -> PDFResult<(f64, usize)> {
    let mut text = String::new();
    'outer: loop {
        let b = byte(data, pos)?;
        pos += 1;
        for nibble in [b >> 4, b & 0x0f] {
            match nibble {
                0..=9 => text.push((b'0' + nibble) as char),
                0xa => text.push('.'),
                0xb => text.push('E'),
                0xc => text.push_str("E-"),
                0xe => text.push('-'),
                0xf => break 'outer,
                _ => {}
            }
        }
    }
    Ok((text.parse().unwrap_or(0.0), pos))
}

fn parse_dict(data: &[u8]) -> PDFResult<Dict> {
    let mut dict = Dict::default();
    let mut operands = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let b0 = data[pos];
        pos += 1;
        match b0 {
            0..=21 => {
                let op = if b0 == 12 {
                    let b1 = byte(data, pos)?;
                    pos += 1;
                    1200 + b1 as u16
                } else {
                    b0 as u16
                };
                dict.insert(op, std::mem::take(&mut operands));
            }
            28 => {
                operands.push(i16::from_be_bytes([byte(data, pos)?, byte(data, pos + 1)?]) as f64);
                pos += 2;
            }
            29 => {
                let bytes = [byte(data, pos)?, byte(data, pos + 1)?, byte(data, pos + 2)?, byte(data, pos + 3)?];
                operands.push(i32::from_be_bytes(bytes) as f64);
                pos += 4;
            }
            30 => {
                let (value, next) = parse_real(data, pos)?;
                operands.push(value);
                pos = next;
            }
            32..=246 => operands.push(b0 as f64 - 139.0),
            247..=250 => {
                operands.push((b0 as f64 - 247.0) * 256.0 + byte(data, pos)? as f64 + 108.0);
                pos += 1;
            }
            251..=254 => {
                operands.push(-(b0 as f64 - 251.0) * 256.0 - byte(data, pos)? as f64 - 108.0);
                pos += 1;
            }
            _ => return Err(PDFError::font(format!("CFF: reserved DICT byte {b0}"))),
        }
    }
    Ok(dict)
}

fn dict_int(dict: &Dict, key: u16) -> Option<usize> {
    dict.get(&key)
        .and_then(|v| v.first())
        .filter(|v| **v >= 0.0)
        .map(|v| *v as usize)
}

#[derive(Debug, Clone, Default)]
struct PrivateDict<'a> {
    subrs: Vec<&'a [u8]>,
    default_width: f64,
    nominal_width: f64,
}

impl<'a> PrivateDict<'a> {
    /// Reads the Private DICT named by a `[size offset]` operand pair.
    fn read(data: &'a [u8], operands: Option<&Vec<f64>>) -> PDFResult<Self> {
        let Some([size, start]) = operands.map(Vec::as_slice) else {
            return Ok(PrivateDict::default());
        };
        let (size, start) = (*size as usize, *start as usize);
        let bytes = data
            .get(start..start + size)
            .ok_or_else(|| PDFError::font("CFF: Private DICT out of range"))?;
        let dict = parse_dict(bytes)?;
        let subrs = match dict_int(&dict, key::SUBRS) {
            Some(rel) => read_index(data, start + rel)?.0,
            None => Vec::new(),
        };
        let number = |k| dict.get(&k).and_then(|v| v.first()).copied().unwrap_or(0.0);
        Ok(PrivateDict {
            subrs,
            default_width: number(key::DEFAULT_WIDTH_X),
            nominal_width: number(key::NOMINAL_WIDTH_X),
        })
    }
}

/// A parsed CFF font (the first font of the FontSet).
pub struct CffFont<'a> {
    strings: Vec<&'a [u8]>,
    global_subrs: Vec<&'a [u8]>,
    char_strings: Vec<&'a [u8]>,
    /// SID per glyph, or CID for CID-keyed fonts.
    charset: Vec<u16>,
    builtin_encoding: Option<Encoding>,
    private: PrivateDict<'a>,
    fd_privates: Vec<PrivateDict<'a>>,
    fd_select: Vec<u8>,
    font_matrix: [f64; 6],
    is_cid: bool,
}

impl<'a> CffFont<'a> {
    pub fn parse(data: &'a [u8]) -> PDFResult<Self> {
        let major = byte(data, 0)?;
        if major != 1 {
            return Err(PDFError::font(format!("CFF: unsupported major version {major}")));
        }
        let header_size = byte(data, 2)? as usize;
        let (_names, pos) = read_index(data, header_size)?;
        let (top_dicts, pos) = read_index(data, pos)?;
        let (strings, pos) = read_index(data, pos)?;
        let (global_subrs, _) = read_index(data, pos)?;

        let top = parse_dict(top_dicts.first().ok_or_else(|| PDFError::font("CFF: empty Top DICT INDEX"))?)?;
        if dict_int(&top, key::CHARSTRING_TYPE).unwrap_or(2) != 2 {
            return Err(PDFError::font("CFF: only Type 2 charstrings are supported"));
        }

        let char_strings_at =
            dict_int(&top, key::CHAR_STRINGS).ok_or_else(|| PDFError::font("CFF: no CharStrings"))?;
        let (char_strings, _) = read_index(data, char_strings_at)?;
        let num_glyphs = char_strings.len();
        if num_glyphs == 0 {
            return Err(PDFError::font("CFF: no glyphs"));
        }

        let is_cid = top.contains_key(&key::ROS);
        let charset = read_charset(data, dict_int(&top, key::CHARSET).unwrap_or(0), num_glyphs, is_cid)?;

        let font_matrix = match top.get(&key::FONT_MATRIX) {
            Some(m) if m.len() == 6 && m[0] != 0.0 => [m[0], m[1], m[2], m[3], m[4], m[5]],
            _ => STANDARD_FONT_MATRIX,
        };

        let mut font = CffFont {
            strings,
            global_subrs,
            char_strings,
            charset,
            builtin_encoding: None,
            private: PrivateDict::read(data, top.get(&key::PRIVATE))?,
            fd_privates: Vec::new(),
            fd_select: Vec::new(),
            font_matrix,
            is_cid,
        };

        if is_cid {
            if let Some(fd_array_at) = dict_int(&top, key::FD_ARRAY) {
                let (font_dicts, _) = read_index(data, fd_array_at)?;
                for fd in font_dicts {
                    let fd = parse_dict(fd)?;
                    font.fd_privates.push(PrivateDict::read(data, fd.get(&key::PRIVATE))?);
                }
            }
            if let Some(fd_select_at) = dict_int(&top, key::FD_SELECT) {
                font.fd_select = read_fd_select(data, fd_select_at, num_glyphs)?;
            }
        } else {
            font.builtin_encoding = Some(font.read_encoding(data, dict_int(&top, key::ENCODING).unwrap_or(0))?);
        }
        Ok(font)
    }

    pub fn num_glyphs(&self) -> usize {
        self.char_strings.len()
    }

    /// Glyph name for a string id.
    fn string(&self, sid: u16) -> Option<&str> {
        match STANDARD_STRINGS.get(sid as usize) {
            Some(name) => Some(name),
            None => std::str::from_utf8(self.strings.get(sid as usize - STANDARD_STRINGS.len())?).ok(),
        }
    }

    pub fn glyph_name(&self, gid: u32) -> Option<&str> {
        if self.is_cid {
            return None;
        }
        self.string(*self.charset.get(gid as usize)?)
    }

    fn name_to_gid(&self) -> FxHashMap<&str, u32> {
        (0..self.num_glyphs() as u32)
            .filter_map(|gid| self.glyph_name(gid).map(|name| (name, gid)))
            .collect()
    }

    fn read_encoding(&self, data: &[u8], at: usize) -> PDFResult<Encoding> {
        match at {
            0 => return Ok(Encoding::from_pairs(
                STANDARD_ENCODING
                    .iter()
                    .enumerate()
                    .filter(|(_, name)| !name.is_empty())
                    .map(|(code, name)| (code as u8, *name)),
            )),
            1 => {
                tracing::debug!("CFF: expert encoding is not mapped");
                return Ok(Encoding::empty());
            }
            _ => {}
        }

        let mut codes: Vec<(u8, u32)> = Vec::new();
        let format = byte(data, at)?;
        let mut pos = at + 1;
        match format & 0x7f {
            0 => {
                let n = byte(data, pos)? as u32;
                for gid in 1..=n {
                    codes.push((byte(data, pos + gid as usize)?, gid));
                }
                pos += 1 + n as usize;
            }
            1 => {
                let ranges = byte(data, pos)? as usize;
                let mut gid = 1u32;
                for r in 0..ranges {
                    let first = byte(data, pos + 1 + r * 2)?;
                    let left = byte(data, pos + 2 + r * 2)?;
                    for k in 0..=left {
                        codes.push((first.wrapping_add(k), gid));
                        gid += 1;
                    }
                }
                pos += 1 + ranges * 2;
            }
            other => return Err(PDFError::font(format!("CFF: unknown encoding format {other}"))),
        }

        let mut encoding = Encoding::empty();
        for (code, gid) in codes {
            if let Some(name) = self.glyph_name(gid) {
                encoding.set(code, name);
            }
        }

        if format & 0x80 != 0 {
            let sups = byte(data, pos)? as usize;
            for s in 0..sups {
                let code = byte(data, pos + 1 + s * 3)?;
                let sid = card16(data, pos + 2 + s * 3)?;
                if let Some(name) = self.string(sid) {
                    encoding.set(code, name);
                }
            }
        }
        Ok(encoding)
    }

    fn private_for(&self, gid: u32) -> &PrivateDict<'a> {
        if !self.is_cid || self.fd_privates.is_empty() {
            return &self.private;
        }
        let fd = self.fd_select.get(gid as usize).copied().unwrap_or(0) as usize;
        self.fd_privates.get(fd).unwrap_or(&self.private)
    }

    /// Outline and advance width (charstring units) of a glyph.
    pub fn glyph_outline(&self, gid: u32) -> PDFResult<(Vec<PathOp>, f64)> {
        self.outline_with_depth(gid, 0)
    }

    fn outline_with_depth(&self, gid: u32, depth: usize) -> PDFResult<(Vec<PathOp>, f64)> {
        let code = self
            .char_strings
            .get(gid as usize)
            .ok_or_else(|| PDFError::font(format!("CFF: no charstring for glyph {gid}")))?;
        let private = self.private_for(gid);
        let mut interp = Type2Interpreter::new(
            &self.global_subrs,
            &private.subrs,
            PathSink::from_font_matrix(self.font_matrix),
        );
        interp.run(code, 0)?;

        let width = interp.width.map_or(private.default_width, |w| private.nominal_width + w);
        let seac = interp.seac;
        let mut ops = interp.sink.finish();

        if let Some((adx, ady, base, accent)) = seac {
            if depth > 0 {
                return Err(PDFError::font("CFF: nested accented glyph"));
            }
            let names = self.name_to_gid();
            let lookup = |code: u8| names.get(STANDARD_ENCODING[code as usize]).copied();
            let (Some(base_gid), Some(accent_gid)) = (lookup(base), lookup(accent)) else {
                return Err(PDFError::font("CFF: seac component is not in the font"));
            };
            ops = self.outline_with_depth(base_gid, depth + 1)?.0;
            let (accent_ops, _) = self.outline_with_depth(accent_gid, depth + 1)?;
            let scale = self.font_matrix[0] * 1000.0;
            ops.extend(translate(&accent_ops, adx * scale, ady * scale));
        }
        Ok((ops, width))
    }
}

fn translate(ops: &[PathOp], dx: f64, dy: f64) -> impl Iterator<Item = PathOp> + '_ {
    ops.iter().map(move |op| match *op {
        PathOp::MoveTo(x, y) => PathOp::MoveTo(x + dx, y + dy),
        PathOp::LineTo(x, y) => PathOp::LineTo(x + dx, y + dy),
        PathOp::QuadTo(x1, y1, x, y) => PathOp::QuadTo(x1 + dx, y1 + dy, x + dx, y + dy),
        PathOp::CurveTo(x1, y1, x2, y2, x, y) => {
            PathOp::CurveTo(x1 + dx, y1 + dy, x2 + dx, y2 + dy, x + dx, y + dy)
        }
        PathOp::Close => PathOp::Close,
    })
}

fn read_charset(data: &[u8], at: usize, num_glyphs: usize, is_cid: bool) -> PDFResult<Vec<u16>> {
    if at <= 2 {
        if at != 0 || is_cid {
            tracing::debug!("CFF: predefined charset {} read as identity", at);
        }
        return Ok((0..num_glyphs as u16).collect());
    }

    let mut charset = Vec::with_capacity(num_glyphs);
    charset.push(0);
    let format = byte(data, at)?;
    let mut pos = at + 1;
    match format {
        0 => {
            while charset.len() < num_glyphs {
                charset.push(card16(data, pos)?);
                pos += 2;
            }
        }
        1 | 2 => {
            while charset.len() < num_glyphs {
                let first = card16(data, pos)?;
                let left = if format == 1 {
                    pos += 3;
                    byte(data, pos - 1)? as u16
                } else {
                    pos += 4;
                    card16(data, pos - 2)?
                };
                for k in 0..=left {
                    if charset.len() == num_glyphs {
                        break;
                    }
                    charset.push(first.wrapping_add(k));
                }
            }
        }
        other => return Err(PDFError::font(format!("CFF: unknown charset format {other}"))),
    }
    Ok(charset)
}

fn read_fd_select(data: &[u8], at: usize, num_glyphs: usize) -> PDFResult<Vec<u8>> {
    match byte(data, at)? {
        0 => (0..num_glyphs).map(|gid| byte(data, at + 1 + gid)).collect(),
        3 => {
            let ranges = card16(data, at + 1)? as usize;
            let mut select = vec![0u8; num_glyphs];
            for r in 0..ranges {
                let base = at + 3 + r * 3;
                let first = card16(data, base)? as usize;
                let fd = byte(data, base + 2)?;
                let end = (card16(data, base + 3)? as usize).min(num_glyphs);
                for slot in select.iter_mut().take(end).skip(first) {
                    *slot = fd;
                }
            }
            Ok(select)
        }
        other => Err(PDFError::font(format!("CFF: unknown FDSelect format {other}"))),
    }
}

fn subr_bias(count: usize) -> i64 {
    if count < 1240 {
        107
    } else if count < 33900 {
        1131
    } else {
        32768
    }
}

/// Type 2 charstring interpreter.
struct Type2Interpreter<'a, 'b> {
    global_subrs: &'b [&'a [u8]],
    local_subrs: &'b [&'a [u8]],
    sink: PathSink,
    stack: Vec<f64>,
    x: f64,
    y: f64,
    stems: usize,
    /// Width operand relative to nominalWidthX, if the glyph has one.
    width: Option<f64>,
    width_checked: bool,
    /// `endchar` accent composition: adx, ady, base code, accent code.
    seac: Option<(f64, f64, u8, u8)>,
}

impl<'a, 'b> Type2Interpreter<'a, 'b> {
    fn new(global_subrs: &'b [&'a [u8]], local_subrs: &'b [&'a [u8]], sink: PathSink) -> Self {
        Type2Interpreter {
            global_subrs,
            local_subrs,
            sink,
            stack: Vec::new(),
            x: 0.0,
            y: 0.0,
            stems: 0,
            width: None,
            width_checked: false,
            seac: None,
        }
    }

    /// The first stack-clearing operator may carry the advance width as an
    /// extra leading operand.
    fn check_width(&mut self, has_extra: bool) {
        if !self.width_checked {
            self.width_checked = true;
            if has_extra && !self.stack.is_empty() {
                self.width = Some(self.stack.remove(0));
            }
        }
    }

    fn pop(&mut self) -> PDFResult<f64> {
        self.stack.pop().ok_or_else(|| PDFError::font("CFF: charstring stack underflow"))
    }

    fn line(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
        self.sink.line_to(self.x, self.y);
    }

    fn curve(&mut self, dx1: f64, dy1: f64, dx2: f64, dy2: f64, dx3: f64, dy3: f64) {
        let (x1, y1) = (self.x + dx1, self.y + dy1);
        let (x2, y2) = (x1 + dx2, y1 + dy2);
        self.x = x2 + dx3;
        self.y = y2 + dy3;
        self.sink.curve_to(x1, y1, x2, y2, self.x, self.y);
    }

    fn move_by(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
        self.sink.move_to(self.x, self.y);
    }

    /// Runs a charstring; returns true once `endchar` is reached.
    fn run(&mut self, code: &[u8], depth: usize) -> PDFResult<bool> {
        if depth > MAX_SUBR_DEPTH {
            return Err(PDFError::font("CFF: subroutines nest too deeply"));
        }

        let mut pos = 0;
        while pos < code.len() {
            let b0 = code[pos];
            pos += 1;

            if b0 >= 32 || b0 == 28 {
                let value = match b0 {
                    28 => {
                        let v = i16::from_be_bytes([byte(code, pos)?, byte(code, pos + 1)?]);
                        pos += 2;
                        v as f64
                    }
                    32..=246 => b0 as f64 - 139.0,
                    247..=250 => {
                        pos += 1;
                        (b0 as f64 - 247.0) * 256.0 + byte(code, pos - 1)? as f64 + 108.0
                    }
                    251..=254 => {
                        pos += 1;
                        -(b0 as f64 - 251.0) * 256.0 - byte(code, pos - 1)? as f64 - 108.0
                    }
                    _ => {
                        let bytes = [byte(code, pos)?, byte(code, pos + 1)?, byte(code, pos + 2)?, byte(code, pos + 3)?];
                        pos += 4;
                        i32::from_be_bytes(bytes) as f64 / 65536.0
                    }
                };
                if self.stack.len() >= MAX_STACK {
                    return Err(PDFError::font("CFF: charstring stack overflow"));
                }
                self.stack.push(value);
                continue;
            }

            match b0 {
                1 | 3 | 18 | 23 => {
                    self.check_width(self.stack.len() % 2 == 1);
                    self.stems += self.stack.len() / 2;
                    self.stack.clear();
                }
                19 | 20 => {
                    self.check_width(self.stack.len() % 2 == 1);
                    self.stems += self.stack.len() / 2;
                    self.stack.clear();
                    pos += self.stems.div_ceil(8);
                }
                21 => {
                    self.check_width(self.stack.len() > 2);
                    let dy = self.pop()?;
                    let dx = self.pop()?;
                    self.stack.clear();
                    self.move_by(dx, dy);
                }
                22 | 4 => {
                    self.check_width(self.stack.len() > 1);
                    let d = self.pop()?;
                    self.stack.clear();
                    if b0 == 22 {
                        self.move_by(d, 0.0);
                    } else {
                        self.move_by(0.0, d);
                    }
                }
                5 => {
                    let args = std::mem::take(&mut self.stack);
                    for pair in args.chunks_exact(2) {
                        self.line(pair[0], pair[1]);
                    }
                }
                6 | 7 => {
                    let args = std::mem::take(&mut self.stack);
                    let mut horizontal = b0 == 6;
                    for d in args {
                        if horizontal {
                            self.line(d, 0.0);
                        } else {
                            self.line(0.0, d);
                        }
                        horizontal = !horizontal;
                    }
                }
                8 => {
                    let args = std::mem::take(&mut self.stack);
                    for c in args.chunks_exact(6) {
                        self.curve(c[0], c[1], c[2], c[3], c[4], c[5]);
                    }
                }
                24 => {
                    let args = std::mem::take(&mut self.stack);
                    if args.len() >= 8 {
                        let (curves, line) = args.split_at(args.len() - 2);
                        for c in curves.chunks_exact(6) {
                            self.curve(c[0], c[1], c[2], c[3], c[4], c[5]);
                        }
                        self.line(line[0], line[1]);
                    }
                }
                25 => {
                    let args = std::mem::take(&mut self.stack);
                    if args.len() >= 8 {
                        let (lines, c) = args.split_at(args.len() - 6);
                        for pair in lines.chunks_exact(2) {
                            self.line(pair[0], pair[1]);
                        }
                        self.curve(c[0], c[1], c[2], c[3], c[4], c[5]);
                    }
                }
                26 => {
                    let mut args = std::mem::take(&mut self.stack);
                    let mut dx1 = if args.len() % 2 == 1 { args.remove(0) } else { 0.0 };
                    for c in args.chunks_exact(4) {
                        self.curve(dx1, c[0], c[1], c[2], 0.0, c[3]);
                        dx1 = 0.0;
                    }
                }
                27 => {
                    let mut args = std::mem::take(&mut self.stack);
                    let mut dy1 = if args.len() % 2 == 1 { args.remove(0) } else { 0.0 };
                    for c in args.chunks_exact(4) {
                        self.curve(c[0], dy1, c[1], c[2], c[3], 0.0);
                        dy1 = 0.0;
                    }
                }
                30 | 31 => {
                    let args = std::mem::take(&mut self.stack);
                    let mut horizontal = b0 == 31;
                    let mut i = 0;
                    while i + 4 <= args.len() {
                        let tail = if args.len() - i == 5 { args[i + 4] } else { 0.0 };
                        if horizontal {
                            self.curve(args[i], 0.0, args[i + 1], args[i + 2], tail, args[i + 3]);
                        } else {
                            self.curve(0.0, args[i], args[i + 1], args[i + 2], args[i + 3], tail);
                        }
                        i += 4;
                        horizontal = !horizontal;
                    }
                }
                10 | 29 => {
                    let subrs = if b0 == 10 { self.local_subrs } else { self.global_subrs };
                    let index = self.pop()? as i64 + subr_bias(subrs.len());
                    let subr = usize::try_from(index)
                        .ok()
                        .and_then(|i| subrs.get(i))
                        .ok_or_else(|| PDFError::font(format!("CFF: subroutine {index} out of range")))?;
                    if self.run(subr, depth + 1)? {
                        return Ok(true);
                    }
                }
                11 => return Ok(false),
                14 => {
                    self.check_width(self.stack.len() == 1 || self.stack.len() == 5);
                    if self.stack.len() >= 4 {
                        let n = self.stack.len();
                        let (adx, ady) = (self.stack[n - 4], self.stack[n - 3]);
                        let (base, accent) = (self.stack[n - 2] as u8, self.stack[n - 1] as u8);
                        self.seac = Some((adx, ady, base, accent));
                    }
                    self.stack.clear();
                    self.sink.close();
                    return Ok(true);
                }
                12 => {
                    let b1 = byte(code, pos)?;
                    pos += 1;
                    self.escape(b1)?;
                }
                _ => {
                    tracing::trace!("CFF: reserved charstring operator {}", b0);
                    self.stack.clear();
                }
            }
        }
        Ok(false)
    }

    fn escape(&mut self, op: u8) -> PDFResult<()> {
        let args = std::mem::take(&mut self.stack);
        match op {
            // flex
            35 if args.len() >= 12 => {
                self.curve(args[0], args[1], args[2], args[3], args[4], args[5]);
                self.curve(args[6], args[7], args[8], args[9], args[10], args[11]);
            }
            // hflex
            34 if args.len() >= 7 => {
                let start_y = self.y;
                self.curve(args[0], 0.0, args[1], args[2], args[3], 0.0);
                self.curve(args[4], 0.0, args[5], start_y - self.y, args[6], 0.0);
            }
            // hflex1
            36 if args.len() >= 9 => {
                let start_y = self.y;
                self.curve(args[0], args[1], args[2], args[3], args[4], 0.0);
                let dy6 = start_y - (self.y + args[7]);
                self.curve(args[5], 0.0, args[6], args[7], args[8], dy6);
            }
            // flex1
            37 if args.len() >= 11 => {
                let (start_x, start_y) = (self.x, self.y);
                let dx: f64 = args[..10].iter().step_by(2).sum();
                let dy: f64 = args[1..10].iter().step_by(2).sum();
                self.curve(args[0], args[1], args[2], args[3], args[4], args[5]);
                let (x5, y5) = (self.x + args[6] + args[8], self.y + args[7] + args[9]);
                let (dx6, dy6) = if dx.abs() > dy.abs() {
                    (start_x + dx + args[10] - x5, start_y - y5)
                } else {
                    (start_x - x5, start_y + dy + args[10] - y5)
                };
                self.curve(args[6], args[7], args[8], args[9], dx6, dy6);
            }
            // Arithmetic operators keep the stack alive
            9 | 10 | 11 | 12 | 14 | 18 | 24 | 26 | 27 | 28 => {
                self.stack = args;
                self.arithmetic(op)?;
            }
            _ => tracing::trace!("CFF: ignoring escape operator 12 {}", op),
        }
        Ok(())
    }

    fn arithmetic(&mut self, op: u8) -> PDFResult<()> {
        match op {
            9 => {
                let a = self.pop()?;
                self.stack.push(a.abs());
            }
            10 | 11 | 12 | 24 => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(match op {
                    10 => a + b,
                    11 => a - b,
                    12 if b != 0.0 => a / b,
                    12 => 0.0,
                    _ => a * b,
                });
            }
            14 => {
                let a = self.pop()?;
                self.stack.push(-a);
            }
            18 => {
                self.pop()?;
            }
            26 => {
                let a = self.pop()?;
                self.stack.push(a.max(0.0).sqrt());
            }
            27 => {
                let a = self.pop()?;
                self.stack.extend([a, a]);
            }
            28 => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.extend([b, a]);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Decodes a CFF program and maps it onto PDF codes.
pub fn decode(data: &[u8], mapping: CodeMapping<'_>) -> PDFResult<GlyphProgram> {
    let font = CffFont::parse(data)?;
    let mut program = GlyphProgram::default();

    match mapping {
        CodeMapping::Simple { declared, symbolic } => {
            let builtin = font.builtin_encoding.as_ref();
            let encoding = if symbolic && declared.is_none() {
                builtin.cloned().unwrap_or_else(Encoding::empty)
            } else {
                effective_encoding(declared, builtin)
            };
            let names = font.name_to_gid();
            for (code, name) in encoding.iter() {
                let gid = names.get(name).copied().or_else(|| {
                    // Fall back to whatever glyph the program's own encoding puts here
                    builtin
                        .and_then(|b| b.name(code))
                        .and_then(|builtin_name| names.get(builtin_name).copied())
                });
                if let Some(gid) = gid {
                    program.code_to_gid.insert(code as u32, gid);
                }
            }
            program.encoding = Some(encoding);
        }
        CodeMapping::Cid { .. } => {
            for gid in 0..font.num_glyphs() as u32 {
                let cid = if font.is_cid { font.charset[gid as usize] as u32 } else { gid };
                program.code_to_gid.entry(cid).or_insert(gid);
            }
        }
    }

    let scale = font.font_matrix[0] * 1000.0;
    let mut widths_by_gid = FxHashMap::default();
    let gids: FxHashSet<u32> = program.code_to_gid.values().copied().collect();
    for gid in gids {
        match font.glyph_outline(gid) {
            Ok((ops, width)) => {
                program.outlines.insert(gid, ops);
                widths_by_gid.insert(gid, width * scale);
            }
            Err(e) => tracing::debug!("CFF glyph {} has no outline: {}", gid, e),
        }
    }
    if matches!(mapping, CodeMapping::Simple { .. }) {
        for (code, gid) in &program.code_to_gid {
            if let Some(w) = widths_by_gid.get(gid) {
                program.widths.insert(*code, *w);
            }
        }
    }

    tracing::debug!(
        "CFF program: {} glyphs, {} mapped codes, cid-keyed={}",
        font.num_glyphs(),
        program.code_to_gid.len(),
        font.is_cid
    );
    Ok(program)
}

const STANDARD_STRINGS: [&str; 391] = [
    ".notdef", "space", "exclam", "quotedbl", "numbersign", "dollar", "percent", "ampersand",
    "quoteright", "parenleft", "parenright", "asterisk", "plus", "comma", "hyphen", "period",
    "slash", "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
    "colon", "semicolon", "less", "equal", "greater", "question", "at", "A", "B", "C", "D", "E",
    "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S", "T", "U", "V", "W",
    "X", "Y", "Z", "bracketleft", "backslash", "bracketright", "asciicircum", "underscore",
    "quoteleft", "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p",
    "q", "r", "s", "t", "u", "v", "w", "x", "y", "z", "braceleft", "bar", "braceright",
    "asciitilde", "exclamdown", "cent", "sterling", "fraction", "yen", "florin", "section",
    "currency", "quotesingle", "quotedblleft", "guillemotleft", "guilsinglleft",
    "guilsinglright", "fi", "fl", "endash", "dagger", "daggerdbl", "periodcentered",
    "paragraph", "bullet", "quotesinglbase", "quotedblbase", "quotedblright", "guillemotright",
    "ellipsis", "perthousand", "questiondown", "grave", "acute", "circumflex", "tilde",
    "macron", "breve", "dotaccent", "dieresis", "ring", "cedilla", "hungarumlaut", "ogonek",
    "caron", "emdash", "AE", "ordfeminine", "Lslash", "Oslash", "OE", "ordmasculine", "ae",
    "dotlessi", "lslash", "oslash", "oe", "germandbls", "onesuperior", "logicalnot", "mu",
    "trademark", "Eth", "onehalf", "plusminus", "Thorn", "onequarter", "divide", "brokenbar",
    "degree", "thorn", "threequarters", "twosuperior", "registered", "minus", "eth", "multiply",
    "threesuperior", "copyright", "Aacute", "Acircumflex", "Adieresis", "Agrave", "Aring",
    "Atilde", "Ccedilla", "Eacute", "Ecircumflex", "Edieresis", "Egrave", "Iacute",
    "Icircumflex", "Idieresis", "Igrave", "Ntilde", "Oacute", "Ocircumflex", "Odieresis",
    "Ograve", "Otilde", "Scaron", "Uacute", "Ucircumflex", "Udieresis", "Ugrave", "Yacute",
    "Ydieresis", "Zcaron", "aacute", "acircumflex", "adieresis", "agrave", "aring", "atilde",
    "ccedilla", "eacute", "ecircumflex", "edieresis", "egrave", "iacute", "icircumflex",
    "idieresis", "igrave", "ntilde", "oacute", "ocircumflex", "odieresis", "ograve", "otilde",
    "scaron", "uacute", "ucircumflex", "udieresis", "ugrave", "yacute", "ydieresis", "zcaron",
    "exclamsmall", "Hungarumlautsmall", "dollaroldstyle", "dollarsuperior", "ampersandsmall",
    "Acutesmall", "parenleftsuperior", "parenrightsuperior", "twodotenleader", "onedotenleader",
    "zerooldstyle", "oneoldstyle", "twooldstyle", "threeoldstyle", "fouroldstyle",
    "fiveoldstyle", "sixoldstyle", "sevenoldstyle", "eightoldstyle", "nineoldstyle",
    "commasuperior", "threequartersemdash", "periodsuperior", "questionsmall", "asuperior",
    "bsuperior", "centsuperior", "dsuperior", "esuperior", "isuperior", "lsuperior",
    "msuperior", "nsuperior", "osuperior", "rsuperior", "ssuperior", "tsuperior", "ff", "ffi",
    "ffl", "parenleftinferior", "parenrightinferior", "Circumflexsmall", "hyphensuperior",
    "Gravesmall", "Asmall", "Bsmall", "Csmall", "Dsmall", "Esmall", "Fsmall", "Gsmall",
    "Hsmall", "Ismall", "Jsmall", "Ksmall", "Lsmall", "Msmall", "Nsmall", "Osmall", "Psmall",
    "Qsmall", "Rsmall", "Ssmall", "Tsmall", "Usmall", "Vsmall", "Wsmall", "Xsmall", "Ysmall",
    "Zsmall", "colonmonetary", "onefitted", "rupiah", "Tildesmall", "exclamdownsmall",
    "centoldstyle", "Lslashsmall", "Scaronsmall", "Zcaronsmall", "Dieresissmall", "Brevesmall",
    "Caronsmall", "Dotaccentsmall", "Macronsmall", "figuredash", "hypheninferior",
    "Ogoneksmall", "Ringsmall", "Cedillasmall", "questiondownsmall", "oneeighth",
    "threeeighths", "fiveeighths", "seveneighths", "onethird", "twothirds", "zerosuperior",
    "foursuperior", "fivesuperior", "sixsuperior", "sevensuperior", "eightsuperior",
    "ninesuperior", "zeroinferior", "oneinferior", "twoinferior", "threeinferior",
    "fourinferior", "fiveinferior", "sixinferior", "seveninferior", "eightinferior",
    "nineinferior", "centinferior", "dollarinferior", "periodinferior", "commainferior",
    "Agravesmall", "Aacutesmall", "Acircumflexsmall", "Atildesmall", "Adieresissmall",
    "Aringsmall", "AEsmall", "Ccedillasmall", "Egravesmall", "Eacutesmall", "Ecircumflexsmall",
    "Edieresissmall", "Igravesmall", "Iacutesmall", "Icircumflexsmall", "Idieresissmall",
    "Ethsmall", "Ntildesmall", "Ogravesmall", "Oacutesmall", "Ocircumflexsmall", "Otildesmall",
    "Odieresissmall", "OEsmall", "Oslashsmall", "Ugravesmall", "Uacutesmall",
    "Ucircumflexsmall", "Udieresissmall", "Yacutesmall", "Thornsmall", "Ydieresissmall",
    "001.000", "001.001", "001.002", "001.003", "Black", "Bold", "Book", "Light", "Medium",
    "Regular", "Roman", "Semibold",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn index(items: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(items.len() as u16).to_be_bytes());
        if items.is_empty() {
            return out;
        }
        out.push(1);
        let mut offset = 1u8;
        out.push(offset);
        for item in items {
            offset += item.len() as u8;
            out.push(offset);
        }
        for item in items {
            out.extend_from_slice(item);
        }
        out
    }

    /// Charstring integer operand.
    fn num(v: i32) -> Vec<u8> {
        match v {
            -107..=107 => vec![(v + 139) as u8],
            108..=1131 => {
                let v = v - 108;
                vec![(v / 256 + 247) as u8, (v % 256) as u8]
            }
            -1131..=-108 => {
                let v = -v - 108;
                vec![(v / 256 + 251) as u8, (v % 256) as u8]
            }
            _ => {
                let mut out = vec![28];
                out.extend_from_slice(&(v as i16).to_be_bytes());
                out
            }
        }
    }

    fn cs(parts: &[&[i32]], op: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            for v in *part {
                out.extend(num(*v));
            }
        }
        out.extend_from_slice(op);
        out
    }

    /// DICT integer in the fixed five-byte form.
    fn dict_num(v: i32) -> Vec<u8> {
        let mut out = vec![29];
        out.extend_from_slice(&v.to_be_bytes());
        out
    }

    /// A font with `.notdef` and a 400x700 box named `A`.
    fn build_font(glyph_a: Vec<u8>, private: Vec<u8>, local_subrs: &[&[u8]]) -> Vec<u8> {
        let header = [1u8, 0, 4, 1];
        let names = index(&[b"Test"]);
        let strings = index(&[]);
        let globals = index(&[]);
        let charset = vec![0u8, 0, 34];
        let char_strings = index(&[&[14], &glyph_a]);
        let subrs = index(local_subrs);

        // Top DICT has a fixed size, so offsets can be computed up front
        let top_len = 3 * 5 + 5 + 3;
        let top_index_len = 2 + 1 + 2 + top_len;
        let charset_at = header.len() + names.len() + top_index_len + strings.len() + globals.len();
        let char_strings_at = charset_at + charset.len();
        let private_at = char_strings_at + char_strings.len();

        let mut private_dict = private;
        if !local_subrs.is_empty() {
            let subrs_rel = private_dict.len() as i32 + 6;
            private_dict.extend(dict_num(subrs_rel));
            private_dict.push(19);
        }

        let mut top = Vec::new();
        top.extend(dict_num(charset_at as i32));
        top.push(15);
        top.extend(dict_num(char_strings_at as i32));
        top.push(17);
        top.extend(dict_num(private_dict.len() as i32));
        top.extend(dict_num(private_at as i32));
        top.push(18);
        assert_eq!(top.len(), top_len);

        let mut font = header.to_vec();
        font.extend(names);
        font.extend(index(&[&top]));
        font.extend(strings);
        font.extend(globals);
        font.extend(charset);
        font.extend(char_strings);
        font.extend(private_dict);
        if !local_subrs.is_empty() {
            font.extend(subrs);
        }
        font
    }

    fn box_glyph() -> Vec<u8> {
        let mut glyph = cs(&[&[500, 100, 0]], &[21]);
        glyph.extend(cs(&[&[400, 0, 0, 700, -400, 0]], &[5]));
        glyph.push(14);
        glyph
    }

    fn simple() -> CodeMapping<'static> {
        CodeMapping::Simple {
            declared: None,
            symbolic: false,
        }
    }

    #[test]
    fn test_decode_maps_standard_encoding() {
        let font = build_font(box_glyph(), Vec::new(), &[]);
        let program = decode(&font, simple()).unwrap();

        assert_eq!(program.code_to_gid.get(&65), Some(&1));
        assert_eq!(program.widths.get(&65), Some(&500.0));
        assert_eq!(
            program.outlines[&1],
            vec![
                PathOp::MoveTo(100.0, 0.0),
                PathOp::LineTo(500.0, 0.0),
                PathOp::LineTo(500.0, 700.0),
                PathOp::LineTo(100.0, 700.0),
                PathOp::Close,
            ]
        );
    }

    #[test]
    fn test_nominal_width_and_local_subr() {
        // nominalWidthX 100, and the lines live in local subr 0 (biased index -107)
        let mut private = dict_num(100);
        private.push(21);
        let mut subr = cs(&[&[400, 0, 0, 700]], &[5]);
        subr.push(11);

        let mut glyph = cs(&[&[50, 100, 0]], &[21]);
        glyph.extend(cs(&[&[-107]], &[10]));
        glyph.push(14);

        let font = build_font(glyph, private, &[&subr]);
        let parsed = CffFont::parse(&font).unwrap();
        let (ops, width) = parsed.glyph_outline(1).unwrap();
        assert_eq!(width, 150.0);
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[2], PathOp::LineTo(500.0, 700.0));
    }

    #[test]
    fn test_hintmask_bytes_are_skipped() {
        // Two stem pairs then a one-byte mask that would otherwise read as an operand
        let mut glyph = cs(&[&[0, 10, 20, 10]], &[18]);
        glyph.extend_from_slice(&[19, 0xff]);
        glyph.extend(cs(&[&[10, 20]], &[21]));
        glyph.extend(cs(&[&[30]], &[6]));
        glyph.push(14);

        let font = build_font(glyph, Vec::new(), &[]);
        let (ops, width) = CffFont::parse(&font).unwrap().glyph_outline(1).unwrap();
        assert_eq!(width, 0.0);
        assert_eq!(ops[0], PathOp::MoveTo(10.0, 20.0));
        assert_eq!(ops[1], PathOp::LineTo(40.0, 20.0));
    }

    #[test]
    fn test_flex_emits_two_curves() {
        let mut glyph = cs(&[&[0, 0]], &[21]);
        glyph.extend(cs(&[&[10, 10, 10, 10, 10, 0, 10, 0, 10, -10, 10, -10, 50]], &[12, 35]));
        glyph.push(14);

        let font = build_font(glyph, Vec::new(), &[]);
        let (ops, _) = CffFont::parse(&font).unwrap().glyph_outline(1).unwrap();
        let curves = ops.iter().filter(|op| matches!(op, PathOp::CurveTo(..))).count();
        assert_eq!(curves, 2);
        assert!(matches!(ops[2], PathOp::CurveTo(.., x, y) if x == 60.0 && y == 0.0));
    }

    #[test]
    fn test_glyph_names_and_strings() {
        let font = build_font(box_glyph(), Vec::new(), &[]);
        let parsed = CffFont::parse(&font).unwrap();
        assert_eq!(parsed.glyph_name(0), Some(".notdef"));
        assert_eq!(parsed.glyph_name(1), Some("A"));
        assert_eq!(STANDARD_STRINGS[390], "Semibold");
    }

    #[test]
    fn test_truncated_font_is_corrupt() {
        let font = build_font(box_glyph(), Vec::new(), &[]);
        let err = decode(&font[..20], simple()).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::CorruptFontProgram);
    }
}
