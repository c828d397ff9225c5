pub mod core;
pub mod transport;

// Re-export main types for convenience
pub use core::{
    CancellationToken, ErrorKind, EvaluatorOptions, Lexer, OpCode, OperatorChunk, PDFDocument,
    PDFError, PDFObject, PDFResult, PartialEvaluator, Parser, Stream, Token, WorkerOptions, XRef,
    XRefEntry,
};
pub use transport::{Controller, RenderParams, RenderTask};
