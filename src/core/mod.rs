pub mod base_stream;
pub mod cff;
pub mod cmap;
pub mod content_stream;
pub mod decode;
pub mod document;
pub mod encodings;
pub mod error;
pub mod evaluator;
pub mod font;
pub mod graphics_state;
pub mod image;
pub mod lexer;
pub mod operator_list;
pub mod options;
pub mod page;
pub mod parser;
pub mod standard_fonts;
pub mod stream;
pub mod truetype;
pub mod type1;
pub mod xref;

pub use base_stream::BaseStream;
pub use content_stream::{ContentStreamEvaluator, OpCode, Operands, Operation};
pub use decode::{Decoded, Filter};
pub use document::PDFDocument;
pub use error::{ErrorKind, PDFError, PDFResult};
pub use evaluator::PartialEvaluator;
pub use font::{FontDescriptor, Glyph};
pub use graphics_state::{GraphicsState, StateManager};
pub use image::{DecodedImage, ImageColorSpace};
pub use lexer::{Lexer, Token};
pub use operator_list::{
    CancellationToken, ChunkSink, DecodedResource, OpArg, OperatorChunk, OperatorEntry,
    OperatorList, ResourceId,
};
pub use options::{EvaluatorOptions, WorkerOptions};
pub use page::Page;
pub use parser::{Dict, PDFObject, Parser, PdfStream, Ref};
pub use stream::Stream;
pub use xref::{XRef, XRefEntry};
