//! The isolated worker context: one thread, one tokio runtime, every open
//! document.

use super::message::{
    Command, DocumentId, DocumentSource, ErrorPayload, InFlight, RenderEvent, RenderParams,
    RequestId,
};
use crate::core::document::PDFDocument;
use crate::core::error::{PDFError, PDFResult};
use crate::core::evaluator::PartialEvaluator;
use crate::core::operator_list::{CancellationToken, ChunkSink, OperatorChunk};
use crate::core::options::{EvaluatorOptions, WorkerOptions};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

type Documents = Arc<RwLock<FxHashMap<DocumentId, Arc<PDFDocument>>>>;

/// Starts the worker thread and returns its command queue.
///
/// The worker runs until every sender of the queue is dropped.
pub(crate) fn spawn_worker(options: WorkerOptions) -> mpsc::Sender<Command> {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(options.channel_capacity.max(1));

    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.worker_threads.max(1))
            .thread_name("pdf-worker")
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Failed to create worker runtime: {}", e);
                return;
            }
        };

        rt.block_on(async move {
            let documents: Documents = Arc::default();
            let in_flight: Arc<Mutex<InFlight>> = Arc::default();

            while let Some(cmd) = cmd_rx.recv().await {
                tracing::trace!("worker <- {:?}", cmd);
                match cmd {
                    Command::Open { source, reply } => {
                        // Opening may run a full recovery scan; the loop keeps
                        // serving other commands meanwhile
                        let documents = documents.clone();
                        tokio::spawn(async move {
                            let result = tokio::task::spawn_blocking(move || open_document(source)).await;
                            let reply_value = match result {
                                Ok(Ok(doc)) => {
                                    let id = DocumentId::next();
                                    tracing::info!("Opened {} with {} pages", id, doc.page_count());
                                    write(&documents).insert(id, Arc::new(doc));
                                    Ok(id)
                                }
                                Ok(Err(e)) => Err(ErrorPayload::from(e)),
                                Err(e) => Err(ErrorPayload::fatal(format!("Task join error: {}", e))),
                            };
                            let _ = reply.send(reply_value);
                        });
                    }
                    Command::GetPageCount { document, reply } => {
                        let count = read(&documents)
                            .get(&document)
                            .map(|doc| doc.page_count())
                            .ok_or_else(|| unknown_document(document));
                        let _ = reply.send(count);
                    }
                    Command::RenderPage {
                        request,
                        document,
                        page_index,
                        params,
                        cancel,
                        events,
                    } => {
                        let doc = read(&documents).get(&document).cloned();
                        let Some(doc) = doc else {
                            let _ = events
                                .send(RenderEvent::Error(unknown_document(document).with_page(page_index)))
                                .await;
                            continue;
                        };
                        in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(request, cancel.clone());

                        let evaluator_options = match params.chunk_size {
                            Some(size) => options.evaluator.clone().with_chunk_size(size),
                            None => options.evaluator.clone(),
                        };
                        let in_flight = in_flight.clone();
                        tokio::spawn(async move {
                            let result = tokio::task::spawn_blocking(move || {
                                render_page(&doc, page_index, &params, evaluator_options, cancel, events)
                            })
                            .await;
                            if let Err(e) = result {
                                tracing::error!("Render task for {} failed: {}", request, e);
                            }
                            in_flight
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&request);
                        });
                    }
                    Command::Cancel { request } => {
                        let token = in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get(&request)
                            .cloned();
                        match token {
                            Some(token) => {
                                tracing::debug!("Cancelling {}", request);
                                token.cancel();
                            }
                            None => tracing::debug!("Cancel for {} which is not running", request),
                        }
                    }
                    Command::Close { document, reply } => {
                        let removed = write(&documents).remove(&document);
                        let result = match removed {
                            Some(_) => {
                                tracing::info!("Closed {}", document);
                                Ok(())
                            }
                            None => Err(unknown_document(document)),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::debug!("Worker command channel closed, shutting down");
        });
    });

    cmd_tx
}

fn read(documents: &Documents) -> std::sync::RwLockReadGuard<'_, FxHashMap<DocumentId, Arc<PDFDocument>>> {
    documents.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(documents: &Documents) -> std::sync::RwLockWriteGuard<'_, FxHashMap<DocumentId, Arc<PDFDocument>>> {
    documents.write().unwrap_or_else(PoisonError::into_inner)
}

fn unknown_document(document: DocumentId) -> ErrorPayload {
    ErrorPayload::fatal(format!("unknown document {}", document))
}

fn open_document(source: DocumentSource) -> PDFResult<PDFDocument> {
    let bytes = match source {
        DocumentSource::Bytes(bytes) => bytes,
        DocumentSource::Path(path) => std::fs::read(&path)
            .map_err(|e| PDFError::fatal(format!("Cannot read {}: {}", path.display(), e)))?,
    };
    PDFDocument::open(bytes)
}

/// Delivers chunks over the request's event channel.
///
/// A closed channel means the controller stopped listening, which the
/// interpreter treats as cancellation.
struct ChannelSink<'a> {
    events: &'a mpsc::Sender<RenderEvent>,
}

impl ChunkSink for ChannelSink<'_> {
    fn send(&mut self, chunk: OperatorChunk) -> PDFResult<()> {
        self.events
            .blocking_send(RenderEvent::Chunk(chunk))
            .map_err(|_| PDFError::Cancelled)
    }
}

/// Runs one render request to its terminal event.
fn render_page(
    doc: &PDFDocument,
    page_index: usize,
    params: &RenderParams,
    options: EvaluatorOptions,
    cancel: CancellationToken,
    events: mpsc::Sender<RenderEvent>,
) {
    let span = tracing::debug_span!("render", page = page_index, intent = ?params.intent);
    let _enter = span.enter();

    let result = doc.get_page(page_index).and_then(|page| {
        let mut sink = ChannelSink { events: &events };
        PartialEvaluator::new(doc, options)
            .with_cancellation(cancel)
            .get_operator_list(&page, &mut sink)
    });

    let terminal = match result {
        Ok(operators) => RenderEvent::Done { operators },
        Err(PDFError::Cancelled) => {
            tracing::debug!("Render of page {} cancelled", page_index);
            RenderEvent::Cancelled
        }
        Err(e) => {
            tracing::warn!("Render of page {} failed: {}", page_index, e);
            RenderEvent::Error(ErrorPayload::from(e).with_page(page_index))
        }
    };
    let _ = events.blocking_send(terminal);
}
