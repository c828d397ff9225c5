//! Content stream tokenizing.
//!
//! A content stream is a postfix program: operands are pushed until an
//! operator keyword consumes them. [`ContentStreamEvaluator`] turns the
//! token stream into [`Operation`]s, checking each operator against its
//! arity before the interpreter sees it.

use super::error::{PDFError, PDFResult};
use super::parser::{PDFObject, Parser};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::OnceLock;

/// Declares [`OpCode`] together with its keyword table so the two cannot
/// drift apart.
macro_rules! opcodes {
    (
        stream { $($(#[$doc:meta])* $op:ident = $code:literal => $kw:literal,)* }
        emitted { $($(#[$idoc:meta])* $iop:ident = $icode:literal => $iname:literal,)* }
    ) => {
        /// Operator codes carried in operator-list entries.
        ///
        /// Codes 2 to 73 are content stream operators. Codes from 74 up are
        /// only produced by the interpreter when it expands `Do` and inline
        /// images. Zero is never a valid code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $($(#[$doc])* $op = $code,)*
            $($(#[$idoc])* $iop = $icode,)*
        }

        const KEYWORDS: &[(&str, OpCode)] = &[$(($kw, OpCode::$op),)*];

        impl OpCode {
            /// Keyword as written in a content stream; interpreter-only
            /// codes return a descriptive name.
            pub fn to_command(&self) -> &'static str {
                match self {
                    $(OpCode::$op => $kw,)*
                    $(OpCode::$iop => $iname,)*
                }
            }
        }
    };
}

opcodes! {
    stream {
        SetLineWidth = 2 => "w",
        SetLineCap = 3 => "J",
        SetLineJoin = 4 => "j",
        SetMiterLimit = 5 => "M",
        SetDash = 6 => "d",
        SetRenderingIntent = 7 => "ri",
        SetFlatness = 8 => "i",
        /// Applies an ExtGState dictionary
        SetGState = 9 => "gs",
        Save = 10 => "q",
        Restore = 11 => "Q",
        /// Concatenates onto the CTM
        Transform = 12 => "cm",

        MoveTo = 13 => "m",
        LineTo = 14 => "l",
        CurveTo = 15 => "c",
        /// Curve whose first control point is the current point
        CurveTo2 = 16 => "v",
        /// Curve whose second control point is the end point
        CurveTo3 = 17 => "y",
        ClosePath = 18 => "h",
        Rectangle = 19 => "re",

        Stroke = 20 => "S",
        CloseStroke = 21 => "s",
        Fill = 22 => "f",
        EOFill = 23 => "f*",
        FillStroke = 24 => "B",
        EOFillStroke = 25 => "B*",
        CloseFillStroke = 26 => "b",
        CloseEOFillStroke = 27 => "b*",
        EndPath = 28 => "n",
        Clip = 29 => "W",
        EOClip = 30 => "W*",

        BeginText = 31 => "BT",
        EndText = 32 => "ET",
        SetCharSpacing = 33 => "Tc",
        SetWordSpacing = 34 => "Tw",
        SetHScale = 35 => "Tz",
        SetLeading = 36 => "TL",
        SetFont = 37 => "Tf",
        SetTextRenderingMode = 38 => "Tr",
        SetTextRise = 39 => "Ts",
        MoveText = 40 => "Td",
        SetLeadingMoveText = 41 => "TD",
        SetTextMatrix = 42 => "Tm",
        NextLine = 43 => "T*",
        ShowText = 44 => "Tj",
        ShowSpacedText = 45 => "TJ",
        NextLineShowText = 46 => "'",
        NextLineSetSpacingShowText = 47 => "\"",

        /// Type 3 glyph width
        SetCharWidth = 48 => "d0",
        /// Type 3 glyph width and bounding box
        SetCharWidthAndBounds = 49 => "d1",

        SetStrokeColorSpace = 50 => "CS",
        SetFillColorSpace = 51 => "cs",
        SetStrokeColor = 52 => "SC",
        SetStrokeColorN = 53 => "SCN",
        SetFillColor = 54 => "sc",
        SetFillColorN = 55 => "scn",
        SetStrokeGray = 56 => "G",
        SetFillGray = 57 => "g",
        SetStrokeRGBColor = 58 => "RG",
        SetFillRGBColor = 59 => "rg",
        SetStrokeCMYKColor = 60 => "K",
        SetFillCMYKColor = 61 => "k",
        ShadingFill = 62 => "sh",

        BeginInlineImage = 63 => "BI",
        BeginImageData = 64 => "ID",
        /// Carries the whole inline image as its operand
        EndInlineImage = 65 => "EI",
        PaintXObject = 66 => "Do",

        MarkPoint = 67 => "MP",
        MarkPointProps = 68 => "DP",
        BeginMarkedContent = 69 => "BMC",
        BeginMarkedContentProps = 70 => "BDC",
        EndMarkedContent = 71 => "EMC",
        BeginCompat = 72 => "BX",
        EndCompat = 73 => "EX",
    }
    emitted {
        /// Opens a form XObject: matrix and bbox operands
        PaintFormXObjectBegin = 74 => "paintFormXObjectBegin",
        PaintFormXObjectEnd = 75 => "paintFormXObjectEnd",
        /// Stencil mask image filled with the current fill color
        PaintImageMaskXObject = 83 => "paintImageMaskXObject",
        /// Image XObject referenced by resource id
        PaintImageXObject = 85 => "paintImageXObject",
        /// Inline image referenced by resource id
        PaintInlineImageXObject = 86 => "paintInlineImageXObject",
    }
}

/// Operand count an operator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// Anywhere from zero to `max` operands
    Variadic { max: usize },
}

impl OpCode {
    /// Looks up a content stream keyword.
    ///
    /// Unknown operators are an `OperatorFault`.
    pub fn from_command(cmd: &str) -> PDFResult<OpCode> {
        static LOOKUP: OnceLock<FxHashMap<&'static str, OpCode>> = OnceLock::new();
        let table = LOOKUP.get_or_init(|| {
            let mut map: FxHashMap<&'static str, OpCode> = KEYWORDS.iter().copied().collect();
            // Obsolete synonym for `f`
            map.insert("F", OpCode::Fill);
            map
        });
        table
            .get(cmd)
            .copied()
            .ok_or_else(|| PDFError::operator(format!("Unknown operator '{}'", cmd)))
    }

    /// Operands the operator consumes in a content stream.
    pub fn arity(&self) -> Arity {
        use Arity::{Fixed, Variadic};
        match self {
            OpCode::Save
            | OpCode::Restore
            | OpCode::ClosePath
            | OpCode::Stroke
            | OpCode::CloseStroke
            | OpCode::Fill
            | OpCode::EOFill
            | OpCode::FillStroke
            | OpCode::EOFillStroke
            | OpCode::CloseFillStroke
            | OpCode::CloseEOFillStroke
            | OpCode::EndPath
            | OpCode::Clip
            | OpCode::EOClip
            | OpCode::BeginText
            | OpCode::EndText
            | OpCode::NextLine
            | OpCode::BeginInlineImage
            | OpCode::BeginImageData
            | OpCode::EndMarkedContent
            | OpCode::BeginCompat
            | OpCode::EndCompat
            | OpCode::PaintFormXObjectEnd => Fixed(0),

            OpCode::SetLineWidth
            | OpCode::SetLineCap
            | OpCode::SetLineJoin
            | OpCode::SetMiterLimit
            | OpCode::SetRenderingIntent
            | OpCode::SetFlatness
            | OpCode::SetGState
            | OpCode::SetCharSpacing
            | OpCode::SetWordSpacing
            | OpCode::SetHScale
            | OpCode::SetLeading
            | OpCode::SetTextRenderingMode
            | OpCode::SetTextRise
            | OpCode::ShowText
            | OpCode::ShowSpacedText
            | OpCode::NextLineShowText
            | OpCode::SetStrokeColorSpace
            | OpCode::SetFillColorSpace
            | OpCode::SetStrokeGray
            | OpCode::SetFillGray
            | OpCode::ShadingFill
            | OpCode::EndInlineImage
            | OpCode::PaintXObject
            | OpCode::MarkPoint
            | OpCode::BeginMarkedContent
            | OpCode::PaintImageMaskXObject
            | OpCode::PaintImageXObject
            | OpCode::PaintInlineImageXObject => Fixed(1),

            OpCode::SetDash
            | OpCode::MoveTo
            | OpCode::LineTo
            | OpCode::SetFont
            | OpCode::MoveText
            | OpCode::SetLeadingMoveText
            | OpCode::SetCharWidth
            | OpCode::MarkPointProps
            | OpCode::BeginMarkedContentProps
            | OpCode::PaintFormXObjectBegin => Fixed(2),

            OpCode::NextLineSetSpacingShowText
            | OpCode::SetStrokeRGBColor
            | OpCode::SetFillRGBColor => Fixed(3),

            OpCode::CurveTo2
            | OpCode::CurveTo3
            | OpCode::Rectangle
            | OpCode::SetStrokeCMYKColor
            | OpCode::SetFillCMYKColor => Fixed(4),

            OpCode::Transform
            | OpCode::CurveTo
            | OpCode::SetTextMatrix
            | OpCode::SetCharWidthAndBounds => Fixed(6),

            OpCode::SetStrokeColor | OpCode::SetFillColor => Variadic { max: 4 },
            // DeviceN allows up to 32 components, plus a pattern name
            OpCode::SetStrokeColorN | OpCode::SetFillColorN => Variadic { max: 33 },
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_command())
    }
}

/// Operand stack of one operation; six covers every fixed-arity operator.
pub type Operands = SmallVec<[PDFObject; 6]>;

/// An operator with the operands it consumed, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub op: OpCode,
    pub args: Operands,
}

impl Operation {
    pub fn new(op: OpCode, args: Operands) -> Self {
        Operation { op, args }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.op)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", arg)?;
        }
        write!(f, ")")
    }
}

/// Reads operations from a content stream.
///
/// Operators with too few operands, unknown operators and syntax errors
/// come back as errors, after the offending operator and its operands have
/// been consumed; the next call continues with the following operator.
/// Unknown operators inside `BX`/`EX` are skipped silently, and the
/// compatibility markers themselves are never returned.
pub struct ContentStreamEvaluator {
    parser: Parser<'static>,

    /// Open `BX` sections
    compat_depth: usize,

    /// Lexer offset of the last syntax error, to stop on a stuck lexer
    last_error_at: Option<usize>,

    exhausted: bool,
}

impl ContentStreamEvaluator {
    /// Creates a new content stream evaluator.
    ///
    /// # Arguments
    /// * `parser` - Parser positioned at the start of the content stream
    pub fn new(parser: Parser<'static>) -> Self {
        ContentStreamEvaluator {
            parser,
            compat_depth: 0,
            last_error_at: None,
            exhausted: false,
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> PDFResult<Self> {
        Ok(Self::new(Parser::from_bytes(data)?))
    }

    /// Reads the next operation.
    ///
    /// # Returns
    /// * `Ok(Some(operation))` - An operator with the operands it takes
    /// * `Ok(None)` - End of stream
    /// * `Err(OperatorFault)` - Operator skipped; call again to continue
    /// * `Err(MalformedSyntax)` - Tokens skipped; call again to continue
    ///
    /// # Example
    /// ```
    /// use pdf_x_worker::core::content_stream::{ContentStreamEvaluator, OpCode};
    ///
    /// let mut reader = ContentStreamEvaluator::from_bytes(b"1 0 0 1 5 5 cm".to_vec()).unwrap();
    /// let op = reader.read_operation().unwrap().unwrap();
    /// assert_eq!(op.op, OpCode::Transform);
    /// assert_eq!(op.args.len(), 6);
    /// ```
    pub fn read_operation(&mut self) -> PDFResult<Option<Operation>> {
        let mut args = Operands::new();

        loop {
            if self.exhausted || !self.parser.has_more() {
                if !args.is_empty() {
                    tracing::warn!("Content stream ended with {} unused operands", args.len());
                }
                return Ok(None);
            }

            let obj = match self.parser.get_object() {
                Ok(obj) => obj,
                Err(e) => {
                    let position = self.parser.position();
                    if self.last_error_at == Some(position) {
                        tracing::warn!("Content stream stuck at offset {}, stopping", position);
                        self.exhausted = true;
                    }
                    self.last_error_at = Some(position);
                    return Err(e);
                }
            };

            let cmd = match obj {
                PDFObject::EOF => {
                    self.exhausted = true;
                    continue;
                }
                PDFObject::Command(cmd) => cmd,
                operand => {
                    args.push(operand);
                    continue;
                }
            };

            let op = match OpCode::from_command(&cmd) {
                Ok(OpCode::BeginCompat) => {
                    self.compat_depth += 1;
                    args.clear();
                    continue;
                }
                Ok(OpCode::EndCompat) => {
                    self.compat_depth = self.compat_depth.saturating_sub(1);
                    args.clear();
                    continue;
                }
                Ok(op) => op,
                Err(e) => {
                    if self.compat_depth > 0 {
                        tracing::trace!("Skipping '{}' inside BX/EX", cmd);
                        args.clear();
                        continue;
                    }
                    return Err(e);
                }
            };

            match op.arity() {
                Arity::Fixed(n) | Arity::Variadic { max: n } if args.len() > n => {
                    if matches!(op.arity(), Arity::Fixed(_)) {
                        tracing::debug!(
                            "'{}' takes {} operands, got {}; keeping the last {}",
                            cmd,
                            n,
                            args.len(),
                            n
                        );
                    }
                    args.drain(..args.len() - n);
                }
                Arity::Fixed(n) if args.len() < n => {
                    return Err(PDFError::operator(format!(
                        "'{}' takes {} operands, got {}",
                        cmd,
                        n,
                        args.len()
                    )));
                }
                _ => {}
            }

            return Ok(Some(Operation::new(op, args)));
        }
    }

    /// Checks if there are more operations to read.
    pub fn has_more(&self) -> bool {
        !self.exhausted && self.parser.has_more()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(content: &str) -> ContentStreamEvaluator {
        ContentStreamEvaluator::from_bytes(content.as_bytes().to_vec()).unwrap()
    }

    fn read_all(content: &str) -> (Vec<Operation>, Vec<PDFError>) {
        let mut reader = reader(content);
        let mut ops = Vec::new();
        let mut faults = Vec::new();
        loop {
            match reader.read_operation() {
                Ok(Some(op)) => ops.push(op),
                Ok(None) => break,
                Err(e) => faults.push(e),
            }
        }
        (ops, faults)
    }

    #[test]
    fn test_opcode_from_command() {
        assert_eq!(OpCode::from_command("m").unwrap(), OpCode::MoveTo);
        assert_eq!(OpCode::from_command("F").unwrap(), OpCode::Fill);
        assert_eq!(OpCode::from_command("\"").unwrap(), OpCode::NextLineSetSpacingShowText);
        let err = OpCode::from_command("XYZ").unwrap_err();
        assert_eq!(err.kind(), super::super::error::ErrorKind::OperatorFault);
    }

    #[test]
    fn test_every_keyword_resolves_to_its_code() {
        assert_eq!(KEYWORDS.len(), 72);
        for (kw, op) in KEYWORDS {
            assert_eq!(OpCode::from_command(kw).unwrap(), *op);
            assert_eq!(op.to_command(), *kw);
            assert!((2..=73).contains(&(*op as u8)));
        }
        assert!(OpCode::from_command(OpCode::PaintImageXObject.to_command()).is_err());
    }

    #[test]
    fn test_arity_table() {
        assert_eq!(OpCode::Transform.arity(), Arity::Fixed(6));
        assert_eq!(OpCode::Save.arity(), Arity::Fixed(0));
        assert_eq!(OpCode::NextLineSetSpacingShowText.arity(), Arity::Fixed(3));
        assert_eq!(OpCode::SetFillColorN.arity(), Arity::Variadic { max: 33 });
    }

    #[test]
    fn test_read_simple_path() {
        let (ops, faults) = read_all("10 20 m 30 40 l 1 2 3 4 5 6 c h S");
        assert!(faults.is_empty());
        let codes: Vec<OpCode> = ops.iter().map(|o| o.op).collect();
        assert_eq!(
            codes,
            vec![OpCode::MoveTo, OpCode::LineTo, OpCode::CurveTo, OpCode::ClosePath, OpCode::Stroke]
        );
        assert_eq!(&ops[0].args[..], &[PDFObject::Number(10.0), PDFObject::Number(20.0)]);
    }

    #[test]
    fn test_too_few_operands_skips_operator() {
        let (ops, faults) = read_all("5 m 0 0 10 10 re f");
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind(), super::super::error::ErrorKind::OperatorFault);
        assert_eq!(ops.iter().map(|o| o.op).collect::<Vec<_>>(), vec![OpCode::Rectangle, OpCode::Fill]);
    }

    #[test]
    fn test_extra_operands_keep_trailing() {
        let (ops, _) = read_all("9 8 7 2 w");
        assert_eq!(&ops[0].args[..], &[PDFObject::Number(2.0)]);
    }

    #[test]
    fn test_unknown_operator_then_paint() {
        let (ops, faults) = read_all("1 2 foo 0 0 5 5 re f");
        assert_eq!(faults.len(), 1);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].args.len(), 4);
        assert_eq!(ops[1].op, OpCode::Fill);
    }

    #[test]
    fn test_unknown_operator_inside_compat_is_silent() {
        let (ops, faults) = read_all("BX 1 foo EX q Q");
        assert!(faults.is_empty());
        assert_eq!(ops.iter().map(|o| o.op).collect::<Vec<_>>(), vec![OpCode::Save, OpCode::Restore]);
    }

    #[test]
    fn test_variadic_color_operands() {
        let (ops, faults) = read_all("0.1 0.2 0.3 sc /P1 scn");
        assert!(faults.is_empty());
        assert_eq!(ops[0].args.len(), 3);
        assert_eq!(&ops[1].args[..], &[PDFObject::Name("P1".into())]);
    }

    #[test]
    fn test_inline_image_is_operand_of_ei() {
        let (ops, faults) = read_all("q BI /W 1 /H 1 /BPC 8 /CS /G ID \x7f EI Q");
        assert!(faults.is_empty());
        assert_eq!(ops[1].op, OpCode::EndInlineImage);
        let stream = ops[1].args[0].as_stream().unwrap();
        assert_eq!(stream.raw(), b"\x7f");
        assert_eq!(ops[2].op, OpCode::Restore);
    }

    #[test]
    fn test_trailing_operands_are_dropped() {
        let (ops, faults) = read_all("q 1 2 3");
        assert!(faults.is_empty());
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_syntax_error_resumes() {
        let (ops, faults) = read_all("q 1 0 0 1 0 0 cm ) Q");
        assert!(!faults.is_empty());
        assert_eq!(ops.first().map(|o| o.op), Some(OpCode::Save));
        assert_eq!(ops.last().map(|o| o.op), Some(OpCode::Restore));
    }
}
