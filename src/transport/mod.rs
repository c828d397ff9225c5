//! Message-passing boundary between a controller and the worker context.
//!
//! The worker owns every open [`PDFDocument`](crate::core::PDFDocument) and
//! runs on its own thread with its own tokio runtime. The [`Controller`] is
//! the async client: requests go over a command channel, replies come back
//! on oneshot channels, and page renders stream [`RenderEvent`]s over a
//! bounded per-request channel.

pub mod controller;
pub mod message;
mod worker;

pub use controller::{Controller, RenderTask, RequestState};
pub use message::{
    DocumentId, DocumentSource, ErrorPayload, RenderEvent, RenderIntent, RenderParams, RequestId,
};
