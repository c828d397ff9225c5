//! Type 1 font programs (`/FontFile`).
//!
//! The program is a cleartext PostScript header followed by an
//! eexec-encrypted private section holding `/Subrs` and `/CharStrings`.
//! Charstrings are encrypted again and interpreted into outlines.

use super::encodings::{BaseEncoding, Encoding, STANDARD_ENCODING};
use super::error::{PDFError, PDFResult};
use super::font::{CodeMapping, GlyphProgram, PathOp, PathSink, STANDARD_FONT_MATRIX, effective_encoding};
use rustc_hash::{FxHashMap, FxHashSet};

const EEXEC_KEY: u16 = 55665;
const CHARSTRING_KEY: u16 = 4330;
const DEFAULT_LEN_IV: usize = 4;
const MAX_SUBR_DEPTH: usize = 10;

/// Decrypts eexec or charstring data and drops the `skip` leading bytes.
fn decrypt(data: &[u8], key: u16, skip: usize) -> Vec<u8> {
    let mut r = key;
    let mut out = Vec::with_capacity(data.len());
    for &c in data {
        out.push(c ^ (r >> 8) as u8);
        r = (c as u16).wrapping_add(r).wrapping_mul(52845).wrapping_add(22719);
    }
    out.split_off(skip.min(out.len()))
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0')
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'[' | b']' | b'{' | b'}' | b'(' | b')' | b'<' | b'>' | b'/' | b'%')
}

/// PostScript token scanner that can also hand out raw binary runs.
struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Scanner { data, pos }
    }

    fn token(&mut self) -> Option<&'a [u8]> {
        while self.pos < self.data.len() && is_space(self.data[self.pos]) {
            self.pos += 1;
        }
        let start = self.pos;
        let first = *self.data.get(start)?;
        self.pos += 1;
        if first == b'/' || !is_delimiter(first) {
            while self.pos < self.data.len() && !is_space(self.data[self.pos]) && !is_delimiter(self.data[self.pos]) {
                self.pos += 1;
            }
        }
        Some(&self.data[start..self.pos])
    }

    fn number(&mut self) -> Option<f64> {
        std::str::from_utf8(self.token()?).ok()?.parse().ok()
    }

    /// Reads the binary payload that follows an `RD`/`-|` token.
    fn binary(&mut self, len: usize) -> Option<&'a [u8]> {
        // Exactly one separator byte precedes the data
        let start = self.pos + 1;
        let bytes = self.data.get(start..start + len)?;
        self.pos = start + len;
        Some(bytes)
    }

    fn seek_to(&mut self, needle: &[u8]) -> bool {
        match find(&self.data[self.pos.min(self.data.len())..], needle) {
            Some(at) => {
                self.pos += at + needle.len();
                true
            }
            None => false,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits a program into its cleartext and (still encrypted) private parts.
fn split_program(data: &[u8]) -> PDFResult<(Vec<u8>, Vec<u8>)> {
    if data.starts_with(&[0x80, 0x01]) {
        return split_pfb(data);
    }
    let at = find(data, b"eexec").ok_or_else(|| PDFError::font("Type1: no eexec section"))?;
    let mut start = at + 5;
    while start < data.len() && is_space(data[start]) {
        start += 1;
    }
    let mut encrypted = data[start..].to_vec();

    // The private section may be stored as hex
    if encrypted.len() >= 4 && encrypted[..4].iter().all(u8::is_ascii_hexdigit) {
        let digits: Vec<u8> = encrypted.iter().copied().filter(u8::is_ascii_hexdigit).collect();
        encrypted = digits
            .chunks_exact(2)
            .filter_map(|pair| u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok())
            .collect();
    }
    Ok((data[..at].to_vec(), encrypted))
}

/// PFB segments: `0x80 type len(u32 LE) data`, type 1 ASCII, 2 binary, 3 EOF.
fn split_pfb(data: &[u8]) -> PDFResult<(Vec<u8>, Vec<u8>)> {
    let (mut cleartext, mut encrypted) = (Vec::new(), Vec::new());
    let mut pos = 0;
    while pos + 6 <= data.len() && data[pos] == 0x80 {
        let kind = data[pos + 1];
        if kind == 3 {
            break;
        }
        let len = u32::from_le_bytes([data[pos + 2], data[pos + 3], data[pos + 4], data[pos + 5]]) as usize;
        let segment = data
            .get(pos + 6..pos + 6 + len)
            .ok_or_else(|| PDFError::font("Type1: truncated PFB segment"))?;
        match kind {
            1 => cleartext.extend_from_slice(segment),
            2 => encrypted.extend_from_slice(segment),
            _ => return Err(PDFError::font(format!("Type1: unknown PFB segment {kind}"))),
        }
        pos += 6 + len;
    }
    if encrypted.is_empty() {
        return Err(PDFError::font("Type1: PFB has no binary segment"));
    }
    Ok((cleartext, encrypted))
}

/// A parsed Type 1 program with decrypted charstrings.
pub struct Type1Font {
    builtin_encoding: Option<Encoding>,
    font_matrix: [f64; 6],
    subrs: Vec<Vec<u8>>,
    /// Charstrings in file order; the position is the glyph id.
    char_strings: Vec<(String, Vec<u8>)>,
}

impl Type1Font {
    pub fn parse(data: &[u8]) -> PDFResult<Self> {
        let (cleartext, encrypted) = split_program(data)?;
        let private = decrypt(&encrypted, EEXEC_KEY, 4);

        let mut scanner = Scanner::new(&private, 0);
        let len_iv = if scanner.seek_to(b"/lenIV") {
            scanner.number().map(|n| n as i64).unwrap_or(DEFAULT_LEN_IV as i64)
        } else {
            DEFAULT_LEN_IV as i64
        };
        let decrypt_charstring = |bytes: &[u8]| {
            if len_iv < 0 {
                bytes.to_vec()
            } else {
                decrypt(bytes, CHARSTRING_KEY, len_iv as usize)
            }
        };

        let mut subrs = Vec::new();
        let mut scanner = Scanner::new(&private, 0);
        if scanner.seek_to(b"/Subrs") {
            let count = scanner.number().unwrap_or(0.0).max(0.0) as usize;
            subrs = vec![Vec::new(); count];
            // `array`
            scanner.token();
            loop {
                let mark = scanner.pos;
                if scanner.token() != Some(b"dup".as_slice()) {
                    scanner.pos = mark;
                    break;
                }
                let (Some(index), Some(len)) = (scanner.number(), scanner.number()) else {
                    break;
                };
                scanner.token();
                let Some(bytes) = scanner.binary(len as usize) else {
                    break;
                };
                if let Some(slot) = subrs.get_mut(index as usize) {
                    *slot = decrypt_charstring(bytes);
                }
                // `NP` or `noaccess put`
                let mark = scanner.pos;
                match scanner.token() {
                    Some(b"noaccess") => {
                        scanner.token();
                    }
                    Some(b"NP") | Some(b"|") => {}
                    _ => scanner.pos = mark,
                }
            }
        }

        let mut char_strings = Vec::new();
        let mut scanner = Scanner::new(&private, 0);
        if !scanner.seek_to(b"/CharStrings") {
            return Err(PDFError::font("Type1: no /CharStrings"));
        }
        if !scanner.seek_to(b"begin") {
            return Err(PDFError::font("Type1: malformed /CharStrings"));
        }
        while let Some(token) = scanner.token() {
            if token == b"end" {
                break;
            }
            let Some(name) = token.strip_prefix(b"/") else {
                continue;
            };
            let Some(len) = scanner.number() else {
                break;
            };
            scanner.token();
            let Some(bytes) = scanner.binary(len as usize) else {
                return Err(PDFError::font("Type1: charstring runs past the program"));
            };
            char_strings.push((String::from_utf8_lossy(name).into_owned(), decrypt_charstring(bytes)));
        }
        if char_strings.is_empty() {
            return Err(PDFError::font("Type1: no charstrings"));
        }

        Ok(Type1Font {
            builtin_encoding: parse_encoding(&cleartext),
            font_matrix: parse_font_matrix(&cleartext).unwrap_or(STANDARD_FONT_MATRIX),
            subrs,
            char_strings,
        })
    }

    pub fn num_glyphs(&self) -> usize {
        self.char_strings.len()
    }

    fn name_to_gid(&self) -> FxHashMap<&str, u32> {
        self.char_strings
            .iter()
            .enumerate()
            .map(|(gid, (name, _))| (name.as_str(), gid as u32))
            .collect()
    }

    /// Outline and advance width (charstring units) of a glyph.
    pub fn glyph_outline(&self, gid: u32) -> PDFResult<(Vec<PathOp>, f64)> {
        self.outline_with_depth(gid, &self.name_to_gid(), 0)
    }

    fn outline_with_depth(&self, gid: u32, names: &FxHashMap<&str, u32>, depth: usize) -> PDFResult<(Vec<PathOp>, f64)> {
        let (_, code) = self
            .char_strings
            .get(gid as usize)
            .ok_or_else(|| PDFError::font(format!("Type1: no charstring for glyph {gid}")))?;
        let mut interp = Type1Interpreter::new(&self.subrs, PathSink::from_font_matrix(self.font_matrix));
        interp.run(code, 0)?;

        let width = interp.width;
        let lsb = interp.sbx;
        let seac = interp.seac;
        let mut ops = interp.sink.finish();

        if let Some(seac) = seac {
            if depth > 0 {
                return Err(PDFError::font("Type1: nested seac"));
            }
            let lookup = |code: f64| {
                let name = STANDARD_ENCODING.get(code as usize).copied().unwrap_or("");
                names.get(name).copied()
            };
            let (Some(base), Some(accent)) = (lookup(seac.base), lookup(seac.accent)) else {
                return Err(PDFError::font("Type1: seac component is not in the font"));
            };
            ops = self.outline_with_depth(base, names, depth + 1)?.0;
            let (accent_ops, _) = self.outline_with_depth(accent, names, depth + 1)?;
            let scale = self.font_matrix[0] * 1000.0;
            let (dx, dy) = ((lsb + seac.adx - seac.asb) * scale, seac.ady * scale);
            ops.extend(accent_ops.into_iter().map(|op| match op {
                PathOp::MoveTo(x, y) => PathOp::MoveTo(x + dx, y + dy),
                PathOp::LineTo(x, y) => PathOp::LineTo(x + dx, y + dy),
                PathOp::QuadTo(x1, y1, x, y) => PathOp::QuadTo(x1 + dx, y1 + dy, x + dx, y + dy),
                PathOp::CurveTo(x1, y1, x2, y2, x, y) => {
                    PathOp::CurveTo(x1 + dx, y1 + dy, x2 + dx, y2 + dy, x + dx, y + dy)
                }
                PathOp::Close => PathOp::Close,
            }));
        }
        Ok((ops, width))
    }
}

fn parse_font_matrix(cleartext: &[u8]) -> Option<[f64; 6]> {
    let mut scanner = Scanner::new(cleartext, 0);
    if !scanner.seek_to(b"/FontMatrix") {
        return None;
    }
    if !matches!(scanner.token()?, b"[" | b"{") {
        return None;
    }
    let mut matrix = [0.0; 6];
    for slot in &mut matrix {
        *slot = scanner.number()?;
    }
    (matrix[0] != 0.0).then_some(matrix)
}

/// The cleartext `/Encoding`: `StandardEncoding` or `dup code /name put` entries.
fn parse_encoding(cleartext: &[u8]) -> Option<Encoding> {
    let mut scanner = Scanner::new(cleartext, 0);
    if !scanner.seek_to(b"/Encoding") {
        return None;
    }
    let mut encoding = Encoding::empty();
    while let Some(token) = scanner.token() {
        match token {
            b"StandardEncoding" => return Some(Encoding::from_base(BaseEncoding::Standard)),
            b"def" | b"readonly" => break,
            b"dup" => {
                let code = scanner.number();
                let name = scanner.token().and_then(|n| n.strip_prefix(b"/"));
                if let (Some(code), Some(name)) = (code, name) {
                    if (0.0..256.0).contains(&code) {
                        encoding.set(code as u8, &String::from_utf8_lossy(name));
                    }
                }
            }
            _ => {}
        }
    }
    Some(encoding)
}

#[derive(Debug, Clone, Copy)]
struct Seac {
    asb: f64,
    adx: f64,
    ady: f64,
    base: f64,
    accent: f64,
}

/// Type 1 charstring interpreter.
struct Type1Interpreter<'a> {
    subrs: &'a [Vec<u8>],
    sink: PathSink,
    stack: Vec<f64>,
    /// Results of `callothersubr`, read back by `pop`.
    ps_stack: Vec<f64>,
    x: f64,
    y: f64,
    sbx: f64,
    width: f64,
    flex: Option<Vec<(f64, f64)>>,
    seac: Option<Seac>,
}

impl<'a> Type1Interpreter<'a> {
    fn new(subrs: &'a [Vec<u8>], sink: PathSink) -> Self {
        Type1Interpreter {
            subrs,
            sink,
            stack: Vec::new(),
            ps_stack: Vec::new(),
            x: 0.0,
            y: 0.0,
            sbx: 0.0,
            width: 0.0,
            flex: None,
            seac: None,
        }
    }

    fn pop(&mut self) -> PDFResult<f64> {
        self.stack
            .pop()
            .ok_or_else(|| PDFError::font("Type1: charstring stack underflow"))
    }

    fn args<const N: usize>(&mut self) -> PDFResult<[f64; N]> {
        if self.stack.len() < N {
            return Err(PDFError::font("Type1: charstring stack underflow"));
        }
        let start = self.stack.len() - N;
        let mut out = [0.0; N];
        out.copy_from_slice(&self.stack[start..]);
        self.stack.clear();
        Ok(out)
    }

    fn move_by(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
        match &mut self.flex {
            Some(points) => points.push((self.x, self.y)),
            None => self.sink.move_to(self.x, self.y),
        }
    }

    fn line_by(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
        self.sink.line_to(self.x, self.y);
    }

    fn curve_by(&mut self, dx1: f64, dy1: f64, dx2: f64, dy2: f64, dx3: f64, dy3: f64) {
        let (x1, y1) = (self.x + dx1, self.y + dy1);
        let (x2, y2) = (x1 + dx2, y1 + dy2);
        self.x = x2 + dx3;
        self.y = y2 + dy3;
        self.sink.curve_to(x1, y1, x2, y2, self.x, self.y);
    }

    /// Runs a charstring; returns true once `endchar` (or `seac`) is reached.
    fn run(&mut self, code: &[u8], depth: usize) -> PDFResult<bool> {
        if depth > MAX_SUBR_DEPTH {
            return Err(PDFError::font("Type1: subroutines nest too deeply"));
        }
        let byte_at = |pos: usize| {
            code.get(pos)
                .copied()
                .ok_or_else(|| PDFError::font("Type1: truncated charstring"))
        };

        let mut pos = 0;
        while pos < code.len() {
            let v = code[pos];
            pos += 1;
            match v {
                32..=246 => self.stack.push(v as f64 - 139.0),
                247..=250 => {
                    self.stack.push((v as f64 - 247.0) * 256.0 + byte_at(pos)? as f64 + 108.0);
                    pos += 1;
                }
                251..=254 => {
                    self.stack.push(-(v as f64 - 251.0) * 256.0 - byte_at(pos)? as f64 - 108.0);
                    pos += 1;
                }
                255 => {
                    let bytes = [byte_at(pos)?, byte_at(pos + 1)?, byte_at(pos + 2)?, byte_at(pos + 3)?];
                    self.stack.push(i32::from_be_bytes(bytes) as f64);
                    pos += 4;
                }
                1 | 3 => self.stack.clear(),
                4 => {
                    let [dy] = self.args()?;
                    self.move_by(0.0, dy);
                }
                5 => {
                    let [dx, dy] = self.args()?;
                    self.line_by(dx, dy);
                }
                6 => {
                    let [dx] = self.args()?;
                    self.line_by(dx, 0.0);
                }
                7 => {
                    let [dy] = self.args()?;
                    self.line_by(0.0, dy);
                }
                8 => {
                    let [dx1, dy1, dx2, dy2, dx3, dy3] = self.args()?;
                    self.curve_by(dx1, dy1, dx2, dy2, dx3, dy3);
                }
                9 => {
                    self.stack.clear();
                    self.sink.close();
                }
                10 => {
                    let index = self.pop()? as usize;
                    let subrs = self.subrs;
                    let subr = subrs
                        .get(index)
                        .ok_or_else(|| PDFError::font(format!("Type1: subr {index} out of range")))?;
                    if self.run(subr, depth + 1)? {
                        return Ok(true);
                    }
                }
                11 => return Ok(false),
                12 => {
                    let op = byte_at(pos)?;
                    pos += 1;
                    if self.escape(op)? {
                        return Ok(true);
                    }
                }
                13 => {
                    let [sbx, wx] = self.args()?;
                    self.sbx = sbx;
                    self.width = wx;
                    self.x = sbx;
                    self.y = 0.0;
                }
                14 => {
                    self.stack.clear();
                    self.sink.close();
                    return Ok(true);
                }
                21 => {
                    let [dx, dy] = self.args()?;
                    self.move_by(dx, dy);
                }
                22 => {
                    let [dx] = self.args()?;
                    self.move_by(dx, 0.0);
                }
                30 => {
                    let [dy1, dx2, dy2, dx3] = self.args()?;
                    self.curve_by(0.0, dy1, dx2, dy2, dx3, 0.0);
                }
                31 => {
                    let [dx1, dx2, dy2, dy3] = self.args()?;
                    self.curve_by(dx1, 0.0, dx2, dy2, 0.0, dy3);
                }
                _ => {
                    tracing::trace!("Type1: reserved charstring operator {}", v);
                    self.stack.clear();
                }
            }
        }
        Ok(false)
    }

    /// Two-byte operators; returns true when the glyph is complete.
    fn escape(&mut self, op: u8) -> PDFResult<bool> {
        match op {
            // seac
            6 => {
                let [asb, adx, ady, base, accent] = self.args()?;
                self.seac = Some(Seac { asb, adx, ady, base, accent });
                return Ok(true);
            }
            // sbw
            7 => {
                let [sbx, sby, wx, _wy] = self.args()?;
                self.sbx = sbx;
                self.width = wx;
                self.x = sbx;
                self.y = sby;
            }
            // div
            12 => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(if b != 0.0 { a / b } else { 0.0 });
            }
            16 => self.call_other_subr()?,
            // pop
            17 => {
                let value = self.ps_stack.pop().unwrap_or(0.0);
                self.stack.push(value);
            }
            // setcurrentpoint
            33 => {
                let [x, y] = self.args()?;
                self.x = x;
                self.y = y;
            }
            // dotsection, vstem3, hstem3
            _ => self.stack.clear(),
        }
        Ok(false)
    }

    fn call_other_subr(&mut self) -> PDFResult<()> {
        let other = self.pop()? as i64;
        let count = (self.pop()?.max(0.0) as usize).min(self.stack.len());
        let args = self.stack.split_off(self.stack.len() - count);

        match other {
            // Flex end: two curves through the seven collected points
            0 => {
                let points = self.flex.take().unwrap_or_default();
                if points.len() >= 7 {
                    let p = &points;
                    self.sink.curve_to(p[1].0, p[1].1, p[2].0, p[2].1, p[3].0, p[3].1);
                    self.sink.curve_to(p[4].0, p[4].1, p[5].0, p[5].1, p[6].0, p[6].1);
                    (self.x, self.y) = p[6];
                }
                if let [_, x, y] = args[..] {
                    self.ps_stack.extend([y, x]);
                }
            }
            // Flex start
            1 => self.flex = Some(Vec::with_capacity(7)),
            // Flex point: recorded by the moveto that follows
            2 => {}
            _ => self.ps_stack.extend(args.into_iter().rev()),
        }
        Ok(())
    }
}

/// Decodes a Type 1 program and maps it onto PDF codes.
pub fn decode(data: &[u8], mapping: CodeMapping<'_>) -> PDFResult<GlyphProgram> {
    let font = Type1Font::parse(data)?;
    let names = font.name_to_gid();
    let mut program = GlyphProgram::default();

    match mapping {
        CodeMapping::Simple { declared, .. } => {
            let encoding = effective_encoding(declared, font.builtin_encoding.as_ref());
            for (code, name) in encoding.iter() {
                if let Some(gid) = names.get(name) {
                    program.code_to_gid.insert(code as u32, *gid);
                }
            }
            program.encoding = Some(encoding);
        }
        CodeMapping::Cid { .. } => {
            program.code_to_gid.extend((0..font.num_glyphs() as u32).map(|gid| (gid, gid)));
        }
    }

    let scale = font.font_matrix[0] * 1000.0;
    let gids: FxHashSet<u32> = program.code_to_gid.values().copied().collect();
    let mut widths_by_gid = FxHashMap::default();
    for gid in gids {
        match font.outline_with_depth(gid, &names, 0) {
            Ok((ops, width)) => {
                program.outlines.insert(gid, ops);
                widths_by_gid.insert(gid, width * scale);
            }
            Err(e) => tracing::debug!("Type1 glyph {} has no outline: {}", gid, e),
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
        "Type1 program: {} charstrings, {} mapped codes",
        font.num_glyphs(),
        program.code_to_gid.len()
    );
    Ok(program)
}
