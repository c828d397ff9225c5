//! Messages exchanged between the controller and the worker.

use crate::core::error::{ErrorKind, PDFError};
use crate::core::operator_list::{CancellationToken, OperatorChunk};
use crate::core::parser::Ref;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one render request for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// Handle to a document opened in the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

impl DocumentId {
    pub(crate) fn next() -> Self {
        DocumentId(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Where the worker reads document bytes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl From<Vec<u8>> for DocumentSource {
    fn from(bytes: Vec<u8>) -> Self {
        DocumentSource::Bytes(bytes)
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        DocumentSource::Path(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderIntent {
    #[default]
    Display,
    Print,
}

/// Per-request render settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderParams {
    pub intent: RenderIntent,
    /// Overrides the worker's configured chunk size
    pub chunk_size: Option<usize>,
}

/// Structured failure delivered to the controller.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?}: {message}")]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    pub page_index: Option<usize>,
    pub object: Option<Ref>,
}

impl ErrorPayload {
    pub fn fatal(message: impl Into<String>) -> Self {
        ErrorPayload {
            kind: ErrorKind::Fatal,
            message: message.into(),
            page_index: None,
            object: None,
        }
    }

    pub fn cancelled(request: RequestId) -> Self {
        ErrorPayload {
            kind: ErrorKind::Cancelled,
            message: format!("{} was cancelled", request),
            page_index: None,
            object: None,
        }
    }

    pub fn with_page(mut self, page_index: usize) -> Self {
        self.page_index = Some(page_index);
        self
    }
}

impl From<PDFError> for ErrorPayload {
    fn from(err: PDFError) -> Self {
        let object = match &err {
            PDFError::UnresolvedReference { num, generation } => Some(Ref::new(*num, *generation)),
            _ => None,
        };
        ErrorPayload {
            kind: err.kind(),
            message: err.to_string(),
            page_index: None,
            object,
        }
    }
}

/// One item of a render response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Chunk(OperatorChunk),
    /// Every chunk has been delivered
    Done { operators: usize },
    /// The worker stopped at a cancellation checkpoint
    Cancelled,
    Error(ErrorPayload),
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ErrorPayload>>;

/// Controller → worker commands.
pub(crate) enum Command {
    Open {
        source: DocumentSource,
        reply: Reply<DocumentId>,
    },
    GetPageCount {
        document: DocumentId,
        reply: Reply<usize>,
    },
    RenderPage {
        request: RequestId,
        document: DocumentId,
        page_index: usize,
        params: RenderParams,
        /// Shared with the controller-side task
        cancel: CancellationToken,
        events: mpsc::Sender<RenderEvent>,
    },
    Cancel {
        request: RequestId,
    },
    Close {
        document: DocumentId,
        reply: Reply<()>,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Open { .. } => f.write_str("Open"),
            Command::GetPageCount { document, .. } => write!(f, "GetPageCount({})", document),
            Command::RenderPage {
                request,
                document,
                page_index,
                ..
            } => write!(f, "RenderPage({}, {}, page {})", request, document, page_index),
            Command::Cancel { request } => write!(f, "Cancel({})", request),
            Command::Close { document, .. } => write!(f, "Close({})", document),
        }
    }
}

/// Tokens of the renders still running, by request.
pub(crate) type InFlight = rustc_hash::FxHashMap<RequestId, CancellationToken>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert_ne!(DocumentId::next(), DocumentId::next());
    }

    #[test]
    fn test_payload_from_error() {
        let payload = ErrorPayload::from(PDFError::UnresolvedReference { num: 7, generation: 0 });
        assert_eq!(payload.kind, ErrorKind::UnresolvedReference);
        assert_eq!(payload.object, Some(Ref::new(7, 0)));

        let payload = ErrorPayload::cancelled(RequestId(9));
        assert_eq!(payload.kind, ErrorKind::Cancelled);
        assert!(!payload.kind.is_fatal());

        let payload = ErrorPayload::from(PDFError::fatal("no catalog")).with_page(3);
        assert!(payload.kind.is_fatal());
        assert_eq!(payload.page_index, Some(3));
        assert!(payload.message.contains("no catalog"));
    }
}
