use thiserror::Error;

/// Classification every fault collapses onto.
///
/// Only `Fatal` escapes the worker as a request failure; every other class
/// is absorbed by the layer that observes it and degrades the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required region could not be tokenized or parsed.
    MalformedSyntax,
    /// Dangling or free object reference (evaluates to null).
    UnresolvedReference,
    /// Decode chain names a codec that is not implemented.
    UnsupportedFilter,
    /// An embedded font program is structurally broken.
    CorruptFontProgram,
    /// Bad arity or unknown operator in a content stream.
    OperatorFault,
    /// The request was cancelled by the controller.
    Cancelled,
    /// The document could not be opened, or the transport failed.
    Fatal,
}

impl ErrorKind {
    /// Returns true if faults of this kind must fail the request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Fatal)
    }
}

/// Universal error type for the worker core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PDFError {
    /// End of stream reached unexpectedly
    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Invalid byte range requested
    #[error("Invalid byte range: {begin}..{end}")]
    InvalidByteRange { begin: usize, end: usize },

    /// Invalid stream position
    #[error("Invalid position {pos} for stream of length {length}")]
    InvalidPosition { pos: usize, length: usize },

    #[error("Malformed syntax: {0}")]
    MalformedSyntax(String),

    #[error("Unresolved reference {num} {generation} R")]
    UnresolvedReference { num: u32, generation: u32 },

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Corrupt font program: {0}")]
    CorruptFontProgram(String),

    #[error("Operator fault: {0}")]
    OperatorFault(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl PDFError {
    pub fn syntax(msg: impl Into<String>) -> Self {
        PDFError::MalformedSyntax(msg.into())
    }

    pub fn font(msg: impl Into<String>) -> Self {
        PDFError::CorruptFontProgram(msg.into())
    }

    pub fn operator(msg: impl Into<String>) -> Self {
        PDFError::OperatorFault(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        PDFError::Fatal(msg.into())
    }

    /// Maps this error onto the seven-class taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PDFError::UnexpectedEndOfStream
            | PDFError::InvalidByteRange { .. }
            | PDFError::InvalidPosition { .. }
            | PDFError::MalformedSyntax(_) => ErrorKind::MalformedSyntax,
            PDFError::UnresolvedReference { .. } => ErrorKind::UnresolvedReference,
            PDFError::UnsupportedFilter(_) => ErrorKind::UnsupportedFilter,
            PDFError::CorruptFontProgram(_) => ErrorKind::CorruptFontProgram,
            PDFError::OperatorFault(_) => ErrorKind::OperatorFault,
            PDFError::Cancelled => ErrorKind::Cancelled,
            PDFError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns true for `Cancelled`, which is a terminal state rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PDFError::Cancelled)
    }
}

/// Result type alias for worker operations
pub type PDFResult<T> = Result<T, PDFError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_errors_classify_as_syntax() {
        assert_eq!(PDFError::UnexpectedEndOfStream.kind(), ErrorKind::MalformedSyntax);
        assert_eq!(
            PDFError::InvalidByteRange { begin: 4, end: 2 }.kind(),
            ErrorKind::MalformedSyntax
        );
    }

    #[test]
    fn test_only_fatal_is_fatal() {
        let all = [
            PDFError::syntax("x"),
            PDFError::UnresolvedReference { num: 1, generation: 0 },
            PDFError::UnsupportedFilter("JBIG2Decode".into()),
            PDFError::font("bad"),
            PDFError::operator("bad"),
            PDFError::Cancelled,
        ];
        for err in &all {
            assert!(!err.kind().is_fatal(), "{err} should not be fatal");
        }
        assert!(PDFError::fatal("no trailer").kind().is_fatal());
    }

    #[test]
    fn test_display() {
        let err = PDFError::UnresolvedReference { num: 12, generation: 0 };
        assert_eq!(err.to_string(), "Unresolved reference 12 0 R");
    }
}
