use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use super::stream::Stream;

/// A single lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of input
    EOF,
    Boolean(bool),
    Null,
    /// Integers and reals share one representation
    Number(f64),
    /// Literal string `( ... )` with escapes resolved
    String(Vec<u8>),
    /// Hexadecimal string `< ... >`
    HexString(Vec<u8>),
    /// Name without the leading slash, `#xx` escapes resolved
    Name(String),
    /// Any other bare keyword: operators, `obj`, `R`, `stream`
    Command(String),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
}

const MAX_COMMAND_LEN: usize = 128;

/// Tokenizer over a byte cursor.
///
/// Holds one byte of lookahead in `cur` (`None` once the input is exhausted).
/// Malformed input is repaired where readers commonly agree on a meaning:
/// unterminated strings end at EOF, stray hex digits are dropped, and a lone
/// sign reads as zero.
pub struct Lexer {
    stream: Box<dyn BaseStream>,
    cur: Option<u8>,
    buf: Vec<u8>,
}

impl Lexer {
    pub fn new(mut stream: Box<dyn BaseStream>) -> PDFResult<Self> {
        let cur = Self::pull(stream.as_mut())?;
        Ok(Lexer {
            stream,
            cur,
            buf: Vec::new(),
        })
    }

    /// Creates a Lexer over an owned byte buffer.
    pub fn from_bytes(data: Vec<u8>) -> PDFResult<Self> {
        Self::new(Box::new(Stream::from_bytes(data)))
    }

    fn pull(stream: &mut dyn BaseStream) -> PDFResult<Option<u8>> {
        match stream.get_byte() {
            Ok(byte) => Ok(Some(byte)),
            Err(PDFError::UnexpectedEndOfStream) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn bump(&mut self) -> PDFResult<Option<u8>> {
        self.cur = Self::pull(self.stream.as_mut())?;
        Ok(self.cur)
    }

    /// Byte after the lookahead, without consuming anything.
    fn peek(&mut self) -> PDFResult<Option<u8>> {
        match self.stream.peek_byte() {
            Ok(byte) => Ok(Some(byte)),
            Err(PDFError::UnexpectedEndOfStream) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Absolute offset of the byte the lexer will examine next.
    pub fn position(&self) -> usize {
        match self.cur {
            Some(_) => self.stream.pos() - 1,
            None => self.stream.pos(),
        }
    }

    /// Moves the cursor to an absolute offset and reloads the lookahead.
    pub fn set_position(&mut self, pos: usize) -> PDFResult<()> {
        self.stream.set_pos(pos)?;
        self.bump()?;
        Ok(())
    }

    /// Absolute offset one past the last readable byte.
    pub fn end(&self) -> usize {
        self.stream.end()
    }

    /// Raw bytes between two absolute offsets; the cursor does not move.
    pub fn byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>> {
        self.stream.get_byte_range(begin, end)
    }

    /// Consumes the rest of the current line and its CR, LF or CRLF terminator.
    pub fn skip_to_next_line(&mut self) -> PDFResult<()> {
        while let Some(b) = self.cur {
            self.bump()?;
            match b {
                b'\n' => break,
                b'\r' => {
                    if self.cur == Some(b'\n') {
                        self.bump()?;
                    }
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// NUL, TAB, LF, FF, CR and SPACE.
    pub(crate) fn is_whitespace(b: u8) -> bool {
        matches!(b, 0x00 | b'\t' | b'\n' | 0x0C | b'\r' | b' ')
    }

    pub(crate) fn is_delimiter(b: u8) -> bool {
        matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
        )
    }

    fn ends_token(b: Option<u8>) -> bool {
        match b {
            None => true,
            Some(b) => Self::is_whitespace(b) || Self::is_delimiter(b),
        }
    }

    fn hex_value(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    fn skip_blank(&mut self) -> PDFResult<()> {
        let mut in_comment = false;
        while let Some(b) = self.cur {
            if in_comment {
                in_comment = b != b'\n' && b != b'\r';
            } else if b == b'%' {
                in_comment = true;
            } else if !Self::is_whitespace(b) {
                break;
            }
            self.bump()?;
        }
        Ok(())
    }

    /// Reads the next token; `Token::EOF` once the input is exhausted.
    pub fn get_object(&mut self) -> PDFResult<Token> {
        self.skip_blank()?;
        let Some(b) = self.cur else {
            return Ok(Token::EOF);
        };

        match b {
            b'0'..=b'9' | b'+' | b'-' | b'.' => self.read_number(),
            b'(' => self.read_literal_string(),
            b'/' => self.read_name(),
            b'<' => {
                if self.bump()? == Some(b'<') {
                    self.bump()?;
                    Ok(Token::DictStart)
                } else {
                    self.read_hex_string()
                }
            }
            b'>' => match self.bump()? {
                Some(b'>') => {
                    self.bump()?;
                    Ok(Token::DictEnd)
                }
                other => Err(PDFError::syntax(format!(
                    "expected '>>', found '>' followed by {:?}",
                    other.map(char::from)
                ))),
            },
            b'[' | b']' => {
                self.bump()?;
                Ok(if b == b'[' {
                    Token::ArrayStart
                } else {
                    Token::ArrayEnd
                })
            }
            // PostScript calculator braces
            b'{' | b'}' => {
                self.bump()?;
                Ok(Token::Command(char::from(b).to_string()))
            }
            b')' => {
                self.bump()?;
                Err(PDFError::syntax("unbalanced ')'"))
            }
            _ => self.read_command(),
        }
    }

    /// Integers, reals and exponents, with the usual reader leniency: a doubled
    /// leading minus, line breaks after the sign and stray inner minus signs are
    /// all ignored.
    fn read_number(&mut self) -> PDFResult<Token> {
        let mut negative = false;
        match self.cur {
            Some(b'-') => {
                negative = true;
                if self.bump()? == Some(b'-') {
                    self.bump()?;
                }
            }
            Some(b'+') => {
                self.bump()?;
            }
            _ => {}
        }
        while matches!(self.cur, Some(b'\r' | b'\n')) {
            self.bump()?;
        }

        let mut mantissa = 0.0f64;
        let mut frac_digits: Option<i32> = None;
        let mut exponent: Option<(bool, i32)> = None;
        let mut saw_digit = false;

        while let Some(b) = self.cur {
            match b {
                b'0'..=b'9' => {
                    let digit = i32::from(b - b'0');
                    saw_digit = true;
                    match exponent.as_mut() {
                        Some((_, e)) => *e = e.saturating_mul(10).saturating_add(digit),
                        None => {
                            mantissa = mantissa * 10.0 + f64::from(digit);
                            if let Some(n) = frac_digits.as_mut() {
                                *n += 1;
                            }
                        }
                    }
                }
                b'.' if frac_digits.is_none() && exponent.is_none() => frac_digits = Some(0),
                b'-' if saw_digit => {}
                b'e' | b'E' if saw_digit && exponent.is_none() => {
                    let negative_exp = match self.peek()? {
                        Some(s @ (b'+' | b'-')) => {
                            self.bump()?;
                            s == b'-'
                        }
                        Some(b'0'..=b'9') => false,
                        // An operator such as `eoclip` starts here
                        _ => break,
                    };
                    exponent = Some((negative_exp, 0));
                }
                _ => break,
            }
            self.bump()?;
        }

        if !saw_digit {
            return match self.cur {
                None | Some(b'(' | b'<') => Ok(Token::Number(0.0)),
                Some(b) if Self::is_whitespace(b) => Ok(Token::Number(0.0)),
                Some(b) => Err(PDFError::syntax(format!(
                    "invalid character {:?} in number",
                    char::from(b)
                ))),
            };
        }

        let mut value = mantissa;
        if let Some(n) = frac_digits {
            value /= 10f64.powi(n);
        }
        if let Some((negative_exp, e)) = exponent {
            let scale = 10f64.powi(e);
            value = if negative_exp { value / scale } else { value * scale };
        }
        Ok(Token::Number(if negative { -value } else { value }))
    }

    fn read_literal_string(&mut self) -> PDFResult<Token> {
        self.buf.clear();
        let mut depth = 1usize;
        self.bump()?;

        loop {
            let Some(b) = self.cur else {
                tracing::debug!("unterminated literal string");
                break;
            };
            match b {
                b'(' => {
                    depth += 1;
                    self.buf.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.bump()?;
                        break;
                    }
                    self.buf.push(b);
                }
                b'\\' => {
                    self.read_escape()?;
                    // The escape reader leaves the lookahead on the next
                    // unconsumed byte
                    continue;
                }
                _ => self.buf.push(b),
            }
            self.bump()?;
        }

        Ok(Token::String(std::mem::take(&mut self.buf)))
    }

    /// Decodes the escape after a backslash into `buf`.
    fn read_escape(&mut self) -> PDFResult<()> {
        let Some(b) = self.bump()? else {
            return Ok(());
        };
        let simple = match b {
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'0'..=b'7' => None,
            // Line continuation
            b'\n' => {
                self.bump()?;
                return Ok(());
            }
            b'\r' => {
                if self.bump()? == Some(b'\n') {
                    self.bump()?;
                }
                return Ok(());
            }
            other => Some(other),
        };
        if let Some(byte) = simple {
            self.buf.push(byte);
            self.bump()?;
            return Ok(());
        }

        // Up to three octal digits; overflow wraps
        let mut value = b - b'0';
        for _ in 0..2 {
            match self.bump()? {
                Some(d @ b'0'..=b'7') => value = value.wrapping_shl(3).wrapping_add(d - b'0'),
                _ => {
                    self.buf.push(value);
                    return Ok(());
                }
            }
        }
        self.buf.push(value);
        self.bump()?;
        Ok(())
    }

    fn read_hex_string(&mut self) -> PDFResult<Token> {
        self.buf.clear();
        let mut high: Option<u8> = None;

        loop {
            let Some(b) = self.cur else {
                tracing::debug!("unterminated hex string");
                break;
            };
            if b == b'>' {
                self.bump()?;
                break;
            }
            match Self::hex_value(b) {
                Some(v) => match high.take() {
                    Some(h) => self.buf.push((h << 4) | v),
                    None => high = Some(v),
                },
                None if Self::is_whitespace(b) => {}
                None => tracing::debug!("dropping {:#04x} inside hex string", b),
            }
            self.bump()?;
        }

        // A trailing odd digit is padded with 0
        if let Some(h) = high {
            self.buf.push(h << 4);
        }
        Ok(Token::HexString(std::mem::take(&mut self.buf)))
    }

    fn read_name(&mut self) -> PDFResult<Token> {
        self.buf.clear();
        self.bump()?;

        while let Some(b) = self.cur {
            if Self::ends_token(Some(b)) {
                break;
            }
            if b == b'#' {
                let first = self.bump()?;
                let decoded = match first.and_then(Self::hex_value) {
                    Some(h) => self.peek()?.and_then(Self::hex_value).map(|l| (h << 4) | l),
                    None => None,
                };
                match decoded {
                    Some(byte) => {
                        self.bump()?;
                        self.buf.push(byte);
                        self.bump()?;
                    }
                    // Not an escape: keep the '#' and lex what follows as-is
                    None => self.buf.push(b'#'),
                }
                continue;
            }
            self.buf.push(b);
            self.bump()?;
        }

        Ok(Token::Name(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    fn read_command(&mut self) -> PDFResult<Token> {
        let mut word = String::new();
        while let Some(b) = self.cur {
            if Self::ends_token(Some(b)) {
                break;
            }
            if word.len() >= MAX_COMMAND_LEN {
                return Err(PDFError::syntax(format!(
                    "keyword longer than {} bytes",
                    MAX_COMMAND_LEN
                )));
            }
            word.push(char::from(b));
            self.bump()?;
        }

        Ok(match word.as_str() {
            "true" => Token::Boolean(true),
            "false" => Token::Boolean(false),
            "null" => Token::Null,
            _ => Token::Command(word),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all(data: &[u8]) -> Vec<Token> {
        let mut lexer = Lexer::from_bytes(data.to_vec()).unwrap();
        let mut out = Vec::new();
        loop {
            match lexer.get_object().unwrap() {
                Token::EOF => return out,
                token => out.push(token),
            }
        }
    }

    fn one(data: &[u8]) -> Token {
        Lexer::from_bytes(data.to_vec()).unwrap().get_object().unwrap()
    }

    #[test]
    fn test_character_classes() {
        for b in [0x00, b'\t', b'\n', 0x0C, b'\r', b' '] {
            assert!(Lexer::is_whitespace(b));
        }
        for b in b"()<>[]{}/%" {
            assert!(Lexer::is_delimiter(*b));
        }
        assert!(!Lexer::is_whitespace(b'A'));
        assert!(!Lexer::is_delimiter(b'A'));
    }

    #[test]
    fn test_structural_tokens_and_comments() {
        assert_eq!(all(b""), vec![]);
        assert_eq!(
            all(b"% leading\n[ ] << >> % trailing"),
            vec![Token::ArrayStart, Token::ArrayEnd, Token::DictStart, Token::DictEnd]
        );
    }

    #[test]
    fn test_numbers() {
        let expected = [123.0, -456.0, 789.0, 3.14, -2.718, 0.5, 150.0, 0.03, 2000.0];
        let got = all(b"123 -456 +789 3.14 -2.718 .5 1.5e2 3e-2 2E3");
        assert_eq!(got, expected.map(Token::Number).to_vec());
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(one(b"--5"), Token::Number(-5.0));
        assert_eq!(one(b"- "), Token::Number(0.0));
        assert_eq!(one(b"-\n3"), Token::Number(-3.0));
        assert_eq!(one(b"12-3"), Token::Number(123.0));
        assert_eq!(all(b"1.2.3"), vec![Token::Number(1.2), Token::Number(0.3)]);
        assert!(Lexer::from_bytes(b"-x".to_vec()).unwrap().get_object().is_err());
    }

    #[test]
    fn test_number_followed_by_e_operator() {
        assert_eq!(
            all(b"1e"),
            vec![Token::Number(1.0), Token::Command("e".into())]
        );
    }

    #[test]
    fn test_literal_strings() {
        assert_eq!(one(b"(hello (nested) world)"), Token::String(b"hello (nested) world".to_vec()));
        assert_eq!(
            one(b"(line1\\nline2\\ttab\\\\backslash)"),
            Token::String(b"line1\nline2\ttab\\backslash".to_vec())
        );
        assert_eq!(one(b"(\\(\\))"), Token::String(b"()".to_vec()));
        assert_eq!(one(b"(\\101\\102\\103)"), Token::String(b"ABC".to_vec()));
        assert_eq!(one(b"(\\0612)"), Token::String(b"12".to_vec()));
        assert_eq!(one(b"(\\7x)"), Token::String(vec![0x07, b'x']));
        assert_eq!(one(b"(ab\\\r\ncd)"), Token::String(b"abcd".to_vec()));
        assert_eq!(one(b"(unterminated"), Token::String(b"unterminated".to_vec()));
    }

    #[test]
    fn test_hex_strings() {
        assert_eq!(one(b"<48656c6c6f>"), Token::HexString(b"Hello".to_vec()));
        assert_eq!(one(b"<48 65 6C\n6C 6F>"), Token::HexString(b"Hello".to_vec()));
        assert_eq!(one(b"<414>"), Token::HexString(vec![0x41, 0x40]));
        assert_eq!(one(b"<4z1>"), Token::HexString(vec![0x41]));
    }

    #[test]
    fn test_names() {
        assert_eq!(
            all(b"/Type /My#20Name /A#2FB /Odd#G1 /End#"),
            vec![
                Token::Name("Type".into()),
                Token::Name("My Name".into()),
                Token::Name("A/B".into()),
                Token::Name("Odd#G1".into()),
                Token::Name("End#".into()),
            ]
        );
    }

    #[test]
    fn test_keywords_and_commands() {
        assert_eq!(
            all(b"true false null q T* ' {"),
            vec![
                Token::Boolean(true),
                Token::Boolean(false),
                Token::Null,
                Token::Command("q".into()),
                Token::Command("T*".into()),
                Token::Command("'".into()),
                Token::Command("{".into()),
            ]
        );
        let long = vec![b'k'; MAX_COMMAND_LEN + 1];
        assert!(Lexer::from_bytes(long).unwrap().get_object().is_err());
    }

    #[test]
    fn test_position_and_line_skipping() {
        let mut lexer = Lexer::from_bytes(b"stream\r\nDATA".to_vec()).unwrap();
        assert_eq!(lexer.get_object().unwrap(), Token::Command("stream".into()));
        lexer.skip_to_next_line().unwrap();
        assert_eq!(lexer.position(), 8);
        assert_eq!(lexer.byte_range(8, 12).unwrap(), b"DATA".to_vec());

        let mut lexer = Lexer::from_bytes(b"1 2 3".to_vec()).unwrap();
        lexer.set_position(4).unwrap();
        assert_eq!(lexer.get_object().unwrap(), Token::Number(3.0));
        assert_eq!(lexer.position(), 5);
    }

    proptest! {
        #[test]
        fn prop_decimal_reals(whole in 0u32..100_000, frac in 0u32..1000) {
            let text = format!("{}.{:03}", whole, frac);
            let expected: f64 = text.parse().unwrap();
            match one(text.as_bytes()) {
                Token::Number(n) => prop_assert!((n - expected).abs() < 1e-9),
                other => prop_assert!(false, "unexpected token {:?}", other),
            }
        }
    }
}
