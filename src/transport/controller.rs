//! Async client side of the transport.

use super::message::{
    Command, DocumentId, DocumentSource, ErrorPayload, InFlight, RenderEvent, RenderParams,
    RequestId,
};
use super::worker;
use crate::core::operator_list::{CancellationToken, OperatorChunk};
use crate::core::options::WorkerOptions;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};

/// Lifecycle of a render request as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Failed
        )
    }
}

/// Owns a worker context and issues requests to it.
///
/// Dropping the controller (and every [`RenderTask`] it handed out) shuts
/// the worker down.
#[derive(Debug, Clone)]
pub struct Controller {
    commands: mpsc::Sender<Command>,
    chunk_capacity: usize,
    /// Cancellation flags of renders whose task has not reached a terminal
    /// state yet
    in_flight: Arc<Mutex<InFlight>>,
}

fn worker_gone() -> ErrorPayload {
    ErrorPayload::fatal("worker is not running")
}

impl Controller {
    /// Starts a worker with `options`.
    pub fn spawn(options: WorkerOptions) -> Self {
        let chunk_capacity = options.chunk_channel_capacity.max(1);
        Controller {
            commands: worker::spawn_worker(options),
            chunk_capacity,
            in_flight: Arc::default(),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ErrorPayload>>) -> Command,
    ) -> Result<T, ErrorPayload> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).await.map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }

    /// Opens a document in the worker.
    pub async fn open(&self, source: impl Into<DocumentSource>) -> Result<DocumentId, ErrorPayload> {
        let source = source.into();
        self.request(|reply| Command::Open { source, reply }).await
    }

    pub async fn page_count(&self, document: DocumentId) -> Result<usize, ErrorPayload> {
        self.request(|reply| Command::GetPageCount { document, reply })
            .await
    }

    /// Starts rendering a page. Chunks are read from the returned task.
    pub async fn render_page(
        &self,
        document: DocumentId,
        page_index: usize,
        params: RenderParams,
    ) -> Result<RenderTask, ErrorPayload> {
        let request = RequestId::next();
        let cancel = CancellationToken::new();
        let (events_tx, events) = mpsc::channel(self.chunk_capacity);
        self.commands
            .send(Command::RenderPage {
                request,
                document,
                page_index,
                params,
                cancel: cancel.clone(),
                events: events_tx,
            })
            .await
            .map_err(|_| worker_gone())?;
        lock(&self.in_flight).insert(request, cancel.clone());
        Ok(RenderTask {
            id: request,
            events,
            commands: self.commands.clone(),
            cancel,
            in_flight: self.in_flight.clone(),
            state: RequestState::Pending,
        })
    }

    /// Cancels a render by id.
    ///
    /// The task handed out for `request` yields nothing further and ends in
    /// [`RequestState::Cancelled`]; the worker stops at its next chunk
    /// boundary. Unknown or finished requests are ignored.
    pub async fn cancel(&self, request: RequestId) -> Result<(), ErrorPayload> {
        if let Some(token) = lock(&self.in_flight).get(&request) {
            token.cancel();
        }
        self.commands
            .send(Command::Cancel { request })
            .await
            .map_err(|_| worker_gone())
    }

    /// Drops the worker's handle; renders already running keep their copy.
    pub async fn close(&self, document: DocumentId) -> Result<(), ErrorPayload> {
        self.request(|reply| Command::Close { document, reply }).await
    }
}

fn lock(in_flight: &Mutex<InFlight>) -> std::sync::MutexGuard<'_, InFlight> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The stream of events for one `RenderPage` request.
#[derive(Debug)]
pub struct RenderTask {
    id: RequestId,
    events: mpsc::Receiver<RenderEvent>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    in_flight: Arc<Mutex<InFlight>>,
    state: RequestState,
}

impl RenderTask {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Next event in generation order, or `None` once the request reached a
    /// terminal state.
    pub async fn next(&mut self) -> Option<RenderEvent> {
        if self.state.is_terminal() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finish(RequestState::Cancelled);
            return None;
        }
        let event = self.events.recv().await;
        // A cancel that raced the receive discards whatever arrived
        if self.cancel.is_cancelled() {
            self.finish(RequestState::Cancelled);
            return None;
        }
        let event = match event {
            Some(event) => event,
            None => RenderEvent::Error(ErrorPayload::fatal("worker dropped the request")),
        };
        match &event {
            RenderEvent::Chunk(_) => self.state = RequestState::Streaming,
            RenderEvent::Done { .. } => self.finish(RequestState::Completed),
            RenderEvent::Cancelled => self.finish(RequestState::Cancelled),
            RenderEvent::Error(_) => self.finish(RequestState::Failed),
        }
        Some(event)
    }

    fn finish(&mut self, state: RequestState) {
        self.state = state;
        if state == RequestState::Cancelled {
            self.events.close();
        }
        lock(&self.in_flight).remove(&self.id);
    }

    /// Cancels the request. No further events are yielded, even ones the
    /// worker had already queued.
    pub async fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.cancel.cancel();
        self.finish(RequestState::Cancelled);
        if self.commands.send(Command::Cancel { request: self.id }).await.is_err() {
            tracing::debug!("Worker gone while cancelling {}", self.id);
        }
    }

    /// Reads every chunk until `Done`.
    pub async fn collect(mut self) -> Result<Vec<OperatorChunk>, ErrorPayload> {
        let mut chunks = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                RenderEvent::Chunk(chunk) => chunks.push(chunk),
                RenderEvent::Done { .. } => return Ok(chunks),
                RenderEvent::Cancelled => break,
                RenderEvent::Error(payload) => return Err(payload),
            }
        }
        match self.state {
            RequestState::Cancelled => Err(ErrorPayload::cancelled(self.id)),
            _ => Err(ErrorPayload::fatal(format!("{} ended without completing", self.id))),
        }
    }
}

impl Drop for RenderTask {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.cancel.cancel();
        }
        lock(&self.in_flight).remove(&self.id);
    }
}
