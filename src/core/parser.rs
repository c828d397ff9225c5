use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Dictionary value type: name keys without the leading slash.
pub type Dict = HashMap<String, PDFObject>;

/// Identifier of an indirect object: object number plus generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ref {
    pub num: u32,
    pub generation: u32,
}

impl Ref {
    pub fn new(num: u32, generation: u32) -> Self {
        Ref { num, generation }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

/// Memoized result of running a stream's filter chain.
pub type DecodedCell = OnceLock<PDFResult<Arc<Vec<u8>>>>;

/// A stream object: its dictionary plus the raw (still encoded) bytes.
///
/// Clones share both the raw bytes and the decoded-bytes cell, so a stream
/// pulled from the document cache is decoded at most once no matter how many
/// requests hold a copy of it.
#[derive(Clone)]
pub struct PdfStream {
    pub dict: Dict,
    raw: Arc<Vec<u8>>,
    decoded: Arc<DecodedCell>,
}

impl PdfStream {
    pub fn new(dict: Dict, raw: Vec<u8>) -> Self {
        PdfStream {
            dict,
            raw: Arc::new(raw),
            decoded: Arc::new(OnceLock::new()),
        }
    }

    /// Raw bytes as stored in the file, before any filter runs.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        self.dict.get(key)
    }

    /// The lazily populated decoded-bytes cell shared by every clone.
    pub fn decoded_cell(&self) -> &DecodedCell {
        &self.decoded
    }
}

impl fmt::Debug for PdfStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfStream")
            .field("dict", &self.dict)
            .field("raw_len", &self.raw.len())
            .field("decoded", &self.decoded.get().is_some())
            .finish()
    }
}

impl PartialEq for PdfStream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.raw == other.raw
    }
}

/// PDF object types.
///
/// The complete set of primitive values that can appear in a document,
/// plus `EOF` and `Command` which only exist while parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    /// Null value
    Null,

    /// Boolean value
    Boolean(bool),

    /// Numeric value (integers and reals)
    Number(f64),

    /// String value (from literal strings like (hello))
    String(Vec<u8>),

    /// Hex string value (from hex strings like <48656c6c6f>)
    HexString(Vec<u8>),

    /// Name value (from /Name)
    Name(String),

    /// Array of objects
    Array(Vec<PDFObject>),

    /// Dictionary (key-value pairs)
    Dictionary(Dict),

    /// Stream object (dictionary + raw byte range + decoded cache)
    Stream(PdfStream),

    /// Indirect object reference (like "5 0 R")
    Ref(Ref),

    /// End of file marker
    EOF,

    /// Command/operator (like 'q', 'Q', 'cm', 'Tj').
    /// Only produced while parsing content streams and xref tables.
    Command(String),
}

impl PDFObject {
    /// Returns true if this object is the EOF marker.
    pub fn is_eof(&self) -> bool {
        matches!(self, PDFObject::EOF)
    }

    /// Returns true if this object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    /// Returns true if this object is the given command.
    pub fn is_command(&self, cmd: &str) -> bool {
        matches!(self, PDFObject::Command(command) if command == cmd)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PDFObject::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer view of a number; reals are truncated.
    pub fn as_int(&self) -> Option<i64> {
        self.as_number().map(|n| n as i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PDFObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PDFObject::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Bytes of a literal or hex string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PDFObject::String(s) | PDFObject::HexString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PDFObject]> {
        match self {
            PDFObject::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary view; for a stream this is the stream dictionary.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            PDFObject::Dictionary(dict) => Some(dict),
            PDFObject::Stream(stream) => Some(&stream.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PDFObject::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<Ref> {
        match self {
            PDFObject::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Short type label used in log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PDFObject::Null => "null",
            PDFObject::Boolean(_) => "boolean",
            PDFObject::Number(_) => "number",
            PDFObject::String(_) | PDFObject::HexString(_) => "string",
            PDFObject::Name(_) => "name",
            PDFObject::Array(_) => "array",
            PDFObject::Dictionary(_) => "dictionary",
            PDFObject::Stream(_) => "stream",
            PDFObject::Ref(_) => "reference",
            PDFObject::EOF => "eof",
            PDFObject::Command(_) => "command",
        }
    }
}

/// Resolves an indirect `/Length` while a stream body is being located.
pub type LengthResolver<'a> = Box<dyn Fn(Ref) -> Option<usize> + 'a>;

/// Builds PDF objects from lexer tokens.
///
/// The parser keeps a two-token lookahead buffer to detect indirect
/// references (`N G R`) and stream objects (a dictionary followed by the
/// `stream` keyword). It never lexes past an inline image's `ID` keyword,
/// since the bytes that follow are binary sample data.
pub struct Parser<'a> {
    /// The lexer that provides tokens
    lexer: Lexer,

    /// First lookahead token
    buf1: Option<Token>,

    /// Second lookahead token
    buf2: Option<Token>,

    /// Resolves `/Length N G R` when a stream's length is indirect
    length_resolver: Option<LengthResolver<'a>>,
}

impl<'a> Parser<'a> {
    /// Creates a new Parser from a Lexer.
    pub fn new(mut lexer: Lexer) -> PDFResult<Self> {
        let buf1 = lexer.get_object()?;
        let buf2 = if is_inline_data_marker(&buf1) {
            None
        } else {
            Some(lexer.get_object()?)
        };

        Ok(Parser {
            lexer,
            buf1: Some(buf1),
            buf2,
            length_resolver: None,
        })
    }

    /// Creates a parser over an owned byte buffer.
    pub fn from_bytes(data: Vec<u8>) -> PDFResult<Self> {
        Self::new(Lexer::from_bytes(data)?)
    }

    /// Installs the callback used to resolve indirect stream lengths.
    pub fn with_length_resolver(mut self, resolver: LengthResolver<'a>) -> Self {
        self.length_resolver = Some(resolver);
        self
    }

    /// Shifts the token buffer, advancing to the next token.
    fn shift(&mut self) -> PDFResult<()> {
        if matches!(&self.buf2, Some(token) if is_inline_data_marker(token)) {
            // Keep the lexer parked right after `ID`
            self.buf1 = self.buf2.take();
            return Ok(());
        }
        self.buf1 = self.buf2.take();
        self.buf2 = Some(self.lexer.get_object()?);
        Ok(())
    }

    /// Discards the lookahead and refills it from an absolute offset.
    fn refill_at(&mut self, pos: usize) -> PDFResult<()> {
        self.lexer.set_position(pos)?;
        self.buf1 = Some(self.lexer.get_object()?);
        self.buf2 = Some(self.lexer.get_object()?);
        Ok(())
    }

    /// Gets the next PDF object from the stream.
    ///
    /// Handles arrays, dictionaries, streams, indirect references,
    /// inline images and simple objects.
    pub fn get_object(&mut self) -> PDFResult<PDFObject> {
        let token = match self.buf1.take() {
            Some(token) => token,
            None => {
                // A lexer error during the last shift left the buffer short
                self.buf1 = match self.buf2.take() {
                    Some(token) => Some(token),
                    None => Some(self.lexer.get_object()?),
                };
                return self.get_object();
            }
        };

        if let Token::Command(cmd) = &token {
            if cmd == "BI" {
                self.shift()?;
                return self.parse_inline_image();
            }
        }

        self.shift()?;

        match token {
            Token::ArrayStart => self.parse_array(),
            Token::DictStart => self.parse_dictionary(),

            Token::ArrayEnd => Err(PDFError::syntax("Unexpected array end token")),
            Token::DictEnd => Err(PDFError::syntax("Unexpected dictionary end token")),

            // Number: could be the start of an indirect reference (N1 N2 R)
            Token::Number(n) => {
                if let (Some(Token::Number(generation)), Some(Token::Command(cmd))) =
                    (&self.buf1, &self.buf2)
                {
                    if cmd == "R" && is_object_number(n) && is_object_number(*generation) {
                        let reference = Ref::new(n as u32, *generation as u32);
                        self.shift()?; // Consume generation number
                        self.shift()?; // Consume 'R'
                        return Ok(PDFObject::Ref(reference));
                    }
                }
                Ok(PDFObject::Number(n))
            }

            Token::EOF => Ok(PDFObject::EOF),
            Token::Boolean(b) => Ok(PDFObject::Boolean(b)),
            Token::Null => Ok(PDFObject::Null),
            Token::String(s) => Ok(PDFObject::String(s)),
            Token::HexString(s) => Ok(PDFObject::HexString(s)),
            Token::Name(n) => Ok(PDFObject::Name(n)),
            Token::Command(c) => Ok(PDFObject::Command(c)),
        }
    }

    /// Parses `N G obj <object> endobj`, returning the reference and the object.
    pub fn parse_indirect_object(&mut self) -> PDFResult<(Ref, PDFObject)> {
        let num = self.get_object()?;
        let generation = self.get_object()?;
        let keyword = self.get_object()?;

        let reference = match (num, generation) {
            (PDFObject::Number(n), PDFObject::Number(g))
                if is_object_number(n) && is_object_number(g) =>
            {
                Ref::new(n as u32, g as u32)
            }
            _ => return Err(PDFError::syntax("Expected object header")),
        };
        if !keyword.is_command("obj") {
            return Err(PDFError::syntax(format!(
                "Expected 'obj' after {} {}",
                reference.num, reference.generation
            )));
        }

        let object = self.get_object()?;
        if matches!(&self.buf1, Some(Token::Command(cmd)) if cmd == "endobj") {
            self.shift()?;
        }
        Ok((reference, object))
    }

    /// Parses an array: [ obj1 obj2 ... ]
    fn parse_array(&mut self) -> PDFResult<PDFObject> {
        let mut array = Vec::new();

        loop {
            match &self.buf1 {
                Some(Token::ArrayEnd) => {
                    self.shift()?;
                    break;
                }
                Some(Token::EOF) | None => {
                    return Err(PDFError::syntax("Unterminated array (missing ']')"));
                }
                Some(Token::DictEnd) => {
                    // `]` missing before the enclosing dictionary closes
                    tracing::warn!("Array closed by '>>', treating as terminated");
                    break;
                }
                _ => {}
            }

            match self.get_object() {
                Ok(obj) => array.push(obj),
                Err(e) => {
                    tracing::warn!("Error parsing array element: {}, using null", e);
                    array.push(PDFObject::Null);
                }
            }
        }

        Ok(PDFObject::Array(array))
    }

    /// Parses a dictionary: << /Key1 value1 /Key2 value2 ... >>
    ///
    /// When the closing `>>` is followed by the `stream` keyword the result
    /// is a stream object instead.
    fn parse_dictionary(&mut self) -> PDFResult<PDFObject> {
        let mut dict = Dict::new();

        loop {
            let key = match &self.buf1 {
                // Don't shift yet: buf2 may be the `stream` keyword
                Some(Token::DictEnd) => break,
                Some(Token::EOF) | None => {
                    return Err(PDFError::syntax("Unterminated dictionary (missing '>>')"));
                }
                Some(Token::Name(name)) => name.clone(),
                Some(other) => {
                    tracing::warn!("Malformed dictionary: key is not a name ({:?})", other);
                    self.shift()?;
                    continue;
                }
            };

            self.shift()?; // Consume the key

            match &self.buf1 {
                Some(Token::EOF) | None => {
                    return Err(PDFError::syntax("Unterminated dictionary (EOF after key)"));
                }
                Some(Token::DictEnd) => {
                    dict.insert(key, PDFObject::Null);
                    break;
                }
                _ => {}
            }

            let value = match self.get_object() {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Error parsing dictionary value for key '{}': {}, using null", key, e);
                    PDFObject::Null
                }
            };
            dict.insert(key, value);
        }

        if matches!(&self.buf2, Some(Token::Command(cmd)) if cmd == "stream") {
            // The lexer sits right after `stream`; the token buffer is stale from here
            self.buf1 = None;
            self.buf2 = None;
            return self.parse_stream(dict);
        }

        self.shift()?; // Consume the '>>'
        Ok(PDFObject::Dictionary(dict))
    }

    fn declared_length(&self, dict: &Dict) -> Option<usize> {
        match dict.get("Length")? {
            PDFObject::Number(n) if *n >= 0.0 => Some(*n as usize),
            PDFObject::Ref(reference) => match &self.length_resolver {
                Some(resolver) => {
                    let resolved = resolver(*reference);
                    if resolved.is_none() {
                        tracing::warn!("Unable to resolve /Length {}, scanning for endstream", reference);
                    }
                    resolved
                }
                None => None,
            },
            _ => None,
        }
    }

    /// Reads the body of a stream object and positions the parser after `endstream`.
    fn parse_stream(&mut self, dict: Dict) -> PDFResult<PDFObject> {
        self.lexer.skip_to_next_line()?;
        let start = self.lexer.position();
        let end_of_input = self.lexer.end();

        let declared_end = self
            .declared_length(&dict)
            .and_then(|len| start.checked_add(len))
            .filter(|end| *end <= end_of_input);

        let data_end = match declared_end {
            Some(end) if self.endstream_follows(end) => end,
            _ => {
                if declared_end.is_some() {
                    tracing::warn!("Stream /Length does not end at 'endstream', scanning");
                }
                self.scan_for_endstream(start)?
            }
        };

        let data = self.lexer.byte_range(start, data_end)?;

        self.refill_at(data_end)?;
        if matches!(&self.buf1, Some(Token::Command(cmd)) if cmd == "endstream") {
            self.shift()?;
        } else {
            tracing::warn!("Missing 'endstream' after stream data");
        }

        Ok(PDFObject::Stream(PdfStream::new(dict, data)))
    }

    /// Checks that only whitespace separates `pos` from an `endstream` keyword.
    fn endstream_follows(&self, pos: usize) -> bool {
        let end = self.lexer.end();
        let window_end = (pos + 32).min(end);
        let Ok(window) = self.lexer.byte_range(pos, window_end) else {
            return false;
        };
        let skipped = window
            .iter()
            .take_while(|b| Lexer::is_whitespace(**b))
            .count();
        window[skipped..].starts_with(b"endstream")
    }

    /// Finds the end of stream data by searching for `endstream`.
    ///
    /// The end-of-line marker that precedes the keyword is not part of the data.
    fn scan_for_endstream(&self, start: usize) -> PDFResult<usize> {
        let end = self.lexer.end();
        let haystack = self.lexer.byte_range(start, end)?;
        let Some(found) = find_subsequence(&haystack, b"endstream") else {
            tracing::warn!("Missing 'endstream', stream runs to end of input");
            return Ok(end);
        };

        let mut data_len = found;
        if data_len > 0 && haystack[data_len - 1] == b'\n' {
            data_len -= 1;
        }
        if data_len > 0 && haystack[data_len - 1] == b'\r' {
            data_len -= 1;
        }
        Ok(start + data_len)
    }

    /// Parses `BI <key value>* ID <data> EI` into a stream object.
    ///
    /// Afterwards `buf1` holds the `EI` command so the content stream
    /// reader sees `<image> EI` like any other operation.
    fn parse_inline_image(&mut self) -> PDFResult<PDFObject> {
        let mut dict = Dict::new();

        loop {
            match &self.buf1 {
                Some(Token::Command(cmd)) if cmd == "ID" => break,
                Some(Token::EOF) | None => {
                    return Err(PDFError::syntax("Inline image without ID"));
                }
                Some(Token::Name(name)) => {
                    let key = expand_inline_key(name).to_string();
                    self.shift()?;
                    let value = self.get_object()?;
                    let value = expand_inline_value(&key, value);
                    dict.insert(key, value);
                }
                Some(other) => {
                    tracing::warn!("Unexpected token in inline image dictionary: {:?}", other);
                    self.shift()?;
                }
            }
        }

        // The lexer stopped on the single whitespace byte that follows `ID`
        let start = (self.lexer.position() + 1).min(self.lexer.end());
        let end_of_input = self.lexer.end();

        let declared = dict
            .get("Length")
            .and_then(|v| v.as_number())
            .filter(|n| *n >= 0.0)
            .map(|n| start + n as usize)
            .filter(|end| *end <= end_of_input);

        let tail = self.lexer.byte_range(start, end_of_input)?;
        let (data_end, resume_at) = match declared {
            Some(end) => {
                let rest = &tail[end - start..];
                match find_inline_end(rest) {
                    Some(ei) => (end, end + ei + 2),
                    None => (end, end),
                }
            }
            None => match find_inline_end(&tail) {
                Some(ei) => {
                    let mut data_len = ei;
                    if data_len > 0 && Lexer::is_whitespace(tail[data_len - 1]) {
                        data_len -= 1;
                    }
                    (start + data_len, start + ei + 2)
                }
                None => {
                    tracing::warn!("Inline image without EI, consuming rest of stream");
                    (end_of_input, end_of_input)
                }
            },
        };

        let data = tail[..data_end - start].to_vec();

        self.lexer.set_position(resume_at)?;
        self.buf1 = Some(Token::Command("EI".to_string()));
        self.buf2 = Some(self.lexer.get_object()?);

        Ok(PDFObject::Stream(PdfStream::new(dict, data)))
    }

    /// Byte offset of the lexer, past any buffered lookahead.
    pub fn position(&self) -> usize {
        self.lexer.position()
    }

    /// Checks if there are more objects to parse.
    pub fn has_more(&self) -> bool {
        !matches!(&self.buf1, Some(Token::EOF))
    }
}

fn is_inline_data_marker(token: &Token) -> bool {
    matches!(token, Token::Command(cmd) if cmd == "ID")
}

fn is_object_number(n: f64) -> bool {
    n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Offset of an `EI` keyword delimited by whitespace (or the start of data) before
/// and by whitespace or end of input after.
fn find_inline_end(data: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == b'E' && data[i + 1] == b'I' {
            let before_ok = i == 0 || Lexer::is_whitespace(data[i - 1]);
            let after_ok = i + 2 >= data.len()
                || Lexer::is_whitespace(data[i + 2])
                || Lexer::is_delimiter(data[i + 2]);
            if before_ok && after_ok {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

fn expand_inline_key(key: &str) -> &str {
    match key {
        "BPC" => "BitsPerComponent",
        "CS" => "ColorSpace",
        "D" => "Decode",
        "DP" => "DecodeParms",
        "F" => "Filter",
        "H" => "Height",
        "W" => "Width",
        "I" => "Interpolate",
        "IM" => "ImageMask",
        "L" => "Length",
        other => other,
    }
}

fn expand_filter_name(name: &str) -> &str {
    match name {
        "AHx" => "ASCIIHexDecode",
        "A85" => "ASCII85Decode",
        "LZW" => "LZWDecode",
        "Fl" => "FlateDecode",
        "RL" => "RunLengthDecode",
        "CCF" => "CCITTFaxDecode",
        "DCT" => "DCTDecode",
        other => other,
    }
}

fn expand_color_space_name(name: &str) -> &str {
    match name {
        "G" => "DeviceGray",
        "RGB" => "DeviceRGB",
        "CMYK" => "DeviceCMYK",
        "I" => "Indexed",
        other => other,
    }
}

fn expand_inline_value(key: &str, value: PDFObject) -> PDFObject {
    let expand: fn(&str) -> &str = match key {
        "Filter" => expand_filter_name,
        "ColorSpace" => expand_color_space_name,
        _ => return value,
    };
    match value {
        PDFObject::Name(name) => PDFObject::Name(expand(&name).to_string()),
        PDFObject::Array(items) => PDFObject::Array(
            items
                .into_iter()
                .map(|item| match item {
                    PDFObject::Name(name) => PDFObject::Name(expand(&name).to_string()),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}
