//! The interpreter's output: an ordered, chunked list of drawing operators.
//!
//! Entries are appended in execution order and handed to a [`ChunkSink`]
//! every `chunk_size` operators. Decoded resources (fonts, images) travel
//! with the first chunk containing an operator that references them.

use super::content_stream::OpCode;
use super::error::{PDFError, PDFResult};
use super::font::{FontDescriptor, Glyph};
use super::image::DecodedImage;
use super::parser::PDFObject;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one request.
///
/// Checked between operators and before each chunk is handed off.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Name under which a decoded resource is referenced from operands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(kind: &str, index: u32) -> Self {
        ResourceId(format!("{}_{}", kind, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resource decoded on the worker side, ready for the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResource {
    Font(Arc<FontDescriptor>),
    Image(Arc<DecodedImage>),
}

/// A glyph placed on the page, origin in user space.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedGlyph {
    pub glyph: Glyph,
    pub x: f64,
    pub y: f64,
}

/// One operand of an emitted operator.
#[derive(Debug, Clone, PartialEq)]
pub enum OpArg {
    Null,
    Bool(bool),
    Number(f64),
    Name(String),
    String(Vec<u8>),
    Array(Vec<OpArg>),
    /// Dictionary operand with keys in sorted order
    Dict(Vec<(String, OpArg)>),
    /// Normalized device color
    Rgb([u8; 3]),
    Resource(ResourceId),
    Glyphs(Vec<PositionedGlyph>),
}

impl OpArg {
    /// Converts a direct operand. References have no meaning past the
    /// worker and become `Null`; streams keep only their dictionary.
    pub fn from_object(obj: &PDFObject) -> Self {
        match obj {
            PDFObject::Null | PDFObject::EOF | PDFObject::Ref(_) => OpArg::Null,
            PDFObject::Boolean(b) => OpArg::Bool(*b),
            PDFObject::Number(n) => OpArg::Number(*n),
            PDFObject::String(s) | PDFObject::HexString(s) => OpArg::String(s.clone()),
            PDFObject::Name(n) | PDFObject::Command(n) => OpArg::Name(n.clone()),
            PDFObject::Array(items) => OpArg::Array(items.iter().map(Self::from_object).collect()),
            PDFObject::Dictionary(dict) => Self::from_dict(dict),
            PDFObject::Stream(stream) => Self::from_dict(&stream.dict),
        }
    }

    fn from_dict(dict: &super::parser::Dict) -> Self {
        let mut entries: Vec<(String, OpArg)> = dict
            .iter()
            .map(|(k, v)| (k.clone(), Self::from_object(v)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        OpArg::Dict(entries)
    }

    pub fn numbers(values: &[f64]) -> Self {
        OpArg::Array(values.iter().map(|v| OpArg::Number(*v)).collect())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            OpArg::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&ResourceId> {
        match self {
            OpArg::Resource(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_glyphs(&self) -> Option<&[PositionedGlyph]> {
        match self {
            OpArg::Glyphs(glyphs) => Some(glyphs),
            _ => None,
        }
    }
}

/// One emitted operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorEntry {
    pub op: OpCode,
    pub args: Vec<OpArg>,
}

/// A contiguous slice of a page's operator list.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorChunk {
    /// Position of this chunk within its request, starting at 0
    pub index: usize,
    pub entries: Vec<OperatorEntry>,
    /// Resources first referenced by `entries`
    pub resources: Vec<(ResourceId, DecodedResource)>,
    /// True for the final chunk of a request
    pub last: bool,
}

/// Receives chunks in the order they are produced.
pub trait ChunkSink {
    /// Delivers one chunk. An error stops the interpreter.
    fn send(&mut self, chunk: OperatorChunk) -> PDFResult<()>;
}

impl ChunkSink for Vec<OperatorChunk> {
    fn send(&mut self, chunk: OperatorChunk) -> PDFResult<()> {
        self.push(chunk);
        Ok(())
    }
}

/// Append-only operator list that flushes to a sink in fixed-size chunks.
pub struct OperatorList<'s> {
    sink: &'s mut dyn ChunkSink,
    chunk_size: usize,
    entries: Vec<OperatorEntry>,
    pending: Vec<(ResourceId, DecodedResource)>,
    delivered: FxHashSet<ResourceId>,
    chunks_sent: usize,
    total: usize,
    cancel: Option<CancellationToken>,
}

impl<'s> OperatorList<'s> {
    pub fn new(sink: &'s mut dyn ChunkSink, chunk_size: usize) -> Self {
        OperatorList {
            sink,
            chunk_size: chunk_size.max(1),
            entries: Vec::new(),
            pending: Vec::new(),
            delivered: FxHashSet::default(),
            chunks_sent: 0,
            total: 0,
            cancel: None,
        }
    }

    /// Stops delivery once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Queues a resource for delivery unless it already went out.
    pub fn add_dependency(&mut self, id: ResourceId, resource: DecodedResource) {
        if self.delivered.insert(id.clone()) {
            self.pending.push((id, resource));
        }
    }

    pub fn push(&mut self, op: OpCode, args: Vec<OpArg>) -> PDFResult<()> {
        tracing::trace!("emit {} ({} args)", op, args.len());
        self.entries.push(OperatorEntry { op, args });
        self.total += 1;
        if self.entries.len() >= self.chunk_size {
            self.flush(false)?;
        }
        Ok(())
    }

    fn flush(&mut self, last: bool) -> PDFResult<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(PDFError::Cancelled);
        }
        let chunk = OperatorChunk {
            index: self.chunks_sent,
            entries: std::mem::take(&mut self.entries),
            resources: std::mem::take(&mut self.pending),
            last,
        };
        self.chunks_sent += 1;
        self.sink.send(chunk)
    }

    /// Sends the final chunk (possibly empty) and returns the operator count.
    pub fn finish(mut self) -> PDFResult<usize> {
        self.flush(true)?;
        Ok(self.total)
    }

    /// Operators emitted so far, including flushed ones.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> DecodedResource {
        DecodedResource::Image(Arc::new(DecodedImage::placeholder(1, 1)))
    }

    #[test]
    fn test_chunking_and_order() {
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let mut list = OperatorList::new(&mut chunks, 2);
        for i in 0..5 {
            list.push(OpCode::SetLineWidth, vec![OpArg::Number(i as f64)]).unwrap();
        }
        assert_eq!(list.finish().unwrap(), 5);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(chunks[2].last && !chunks[1].last);
        let widths: Vec<f64> = chunks
            .iter()
            .flat_map(|c| c.entries.iter().map(|e| e.args[0].as_number().unwrap()))
            .collect();
        assert_eq!(widths, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_resources_ride_with_first_reference() {
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let mut list = OperatorList::new(&mut chunks, 1);
        let id = ResourceId::new("img", 1);

        list.push(OpCode::Save, vec![]).unwrap();
        list.add_dependency(id.clone(), image());
        list.push(OpCode::PaintImageXObject, vec![OpArg::Resource(id.clone())]).unwrap();
        list.add_dependency(id.clone(), image());
        list.push(OpCode::PaintImageXObject, vec![OpArg::Resource(id.clone())]).unwrap();
        list.finish().unwrap();

        assert!(chunks[0].resources.is_empty());
        assert_eq!(chunks[1].resources.len(), 1);
        assert_eq!(chunks[1].resources[0].0, id);
        assert!(chunks[2].resources.is_empty());
    }

    #[test]
    fn test_cancelled_list_stops_delivering() {
        let token = CancellationToken::new();
        let mut chunks: Vec<OperatorChunk> = Vec::new();
        let mut list = OperatorList::new(&mut chunks, 1).with_cancellation(token.clone());
        list.push(OpCode::Save, vec![]).unwrap();
        token.cancel();
        assert_eq!(list.push(OpCode::Restore, vec![]), Err(PDFError::Cancelled));
        drop(list);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_from_object_sorts_dict_and_drops_refs() {
        let mut dict = super::super::parser::Dict::new();
        dict.insert("Z".into(), PDFObject::Number(1.0));
        dict.insert("A".into(), PDFObject::Ref(super::super::parser::Ref::new(3, 0)));
        let arg = OpArg::from_object(&PDFObject::Dictionary(dict));
        assert_eq!(
            arg,
            OpArg::Dict(vec![("A".into(), OpArg::Null), ("Z".into(), OpArg::Number(1.0))])
        );
    }
}
