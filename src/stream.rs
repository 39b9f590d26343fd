//! Bridges a [`GenerationStream`] into caller callbacks with cancellation.
//!
//! Every callback is preceded by a liveness check, so once the handle is
//! cancelled nothing more is delivered, including partials the producer had
//! already queued. At most one terminal callback ever fires; the type system
//! enforces it by consuming the callbacks.

use crate::error::ExplainError;
use crate::llm::GenerationStream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub trait StreamCallbacks<T>: Send + 'static {
    fn on_progress(&mut self, partial: &Value);

    fn on_complete(self: Box<Self>, value: T);

    fn on_error(self: Box<Self>, error: ExplainError);
}

/// [`StreamCallbacks`] assembled from three closures.
pub struct FnCallbacks<P, C, E> {
    on_progress: P,
    on_complete: C,
    on_error: E,
}

impl<P, C, E> FnCallbacks<P, C, E> {
    pub fn new(on_progress: P, on_complete: C, on_error: E) -> Self {
        Self {
            on_progress,
            on_complete,
            on_error,
        }
    }
}

impl<T, P, C, E> StreamCallbacks<T> for FnCallbacks<P, C, E>
where
    P: FnMut(&Value) + Send + 'static,
    C: FnOnce(T) + Send + 'static,
    E: FnOnce(ExplainError) + Send + 'static,
{
    fn on_progress(&mut self, partial: &Value) {
        (self.on_progress)(partial)
    }

    fn on_complete(self: Box<Self>, value: T) {
        (self.on_complete)(value)
    }

    fn on_error(self: Box<Self>, error: ExplainError) {
        (self.on_error)(error)
    }
}

/// Cancels a running generation. Cloneable and idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Consumes `stream`, forwarding partials to `on_progress` and the final
/// value to `on_complete` after `persist` has run on it.
///
/// A final value that does not deserialize into `T` is reported as
/// [`ExplainError::InvalidOutput`]. Nothing is persisted on error or
/// cancellation.
pub async fn run_stream<T, F, Fut>(
    mut stream: GenerationStream,
    mut callbacks: Box<dyn StreamCallbacks<T>>,
    cancel: CancellationToken,
    persist: F,
) -> StreamOutcome
where
    T: DeserializeOwned + 'static,
    F: FnOnce(&T) -> Fut,
    Fut: Future<Output = ()>,
{
    let upstream = stream.cancel_token();
    let cancelled = || {
        upstream.cancel();
        debug!("Generation cancelled");
        StreamOutcome::Cancelled
    };

    loop {
        let partial = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(),
            partial = stream.next_partial() => partial,
        };
        let Some(partial) = partial else {
            break;
        };
        if cancel.is_cancelled() {
            return cancelled();
        }
        callbacks.on_progress(&partial);
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(),
        result = stream.result() => result,
    };

    let value = match result.map_err(ExplainError::from).and_then(|value| {
        serde_json::from_value::<T>(value).map_err(|e| ExplainError::InvalidOutput(e.to_string()))
    }) {
        Ok(value) => value,
        Err(e) => {
            if cancel.is_cancelled() {
                return cancelled();
            }
            callbacks.on_error(e);
            return StreamOutcome::Failed;
        }
    };

    if cancel.is_cancelled() {
        return cancelled();
    }
    // A write the store has already accepted may still land after a cancel.
    if cancel.run_until_cancelled(persist(&value)).await.is_none() {
        return cancelled();
    }

    if cancel.is_cancelled() {
        return cancelled();
    }
    callbacks.on_complete(value);
    StreamOutcome::Completed
}

/// Runs [`run_stream`] on a background task.
pub fn spawn_stream<T, F, Fut>(
    stream: GenerationStream,
    callbacks: Box<dyn StreamCallbacks<T>>,
    persist: F,
) -> (CancelHandle, JoinHandle<StreamOutcome>)
where
    T: DeserializeOwned + Send + 'static,
    F: FnOnce(&T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = CancelHandle::new();
    let token = handle.token();
    let task = tokio::spawn(run_stream(stream, callbacks, token, persist));
    (handle, task)
}

/// Delivers an error that happened before any generation started, unless the
/// caller has already cancelled.
pub fn fail<T: 'static>(
    callbacks: Box<dyn StreamCallbacks<T>>,
    cancel: &CancellationToken,
    error: impl Into<ExplainError>,
) -> StreamOutcome {
    if cancel.is_cancelled() {
        return StreamOutcome::Cancelled;
    }
    callbacks.on_error(error.into());
    StreamOutcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Summary {
        summary: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Progress(Value),
        Persisted,
        Complete(Summary),
        Error(String),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct Recorder {
        log: Log,
        cancel_on_progress: Option<CancelHandle>,
    }

    impl StreamCallbacks<Summary> for Recorder {
        fn on_progress(&mut self, partial: &Value) {
            self.log.lock().unwrap().push(Event::Progress(partial.clone()));
            if let Some(handle) = &self.cancel_on_progress {
                handle.cancel();
            }
        }

        fn on_complete(self: Box<Self>, value: Summary) {
            self.log.lock().unwrap().push(Event::Complete(value));
        }

        fn on_error(self: Box<Self>, error: ExplainError) {
            self.log.lock().unwrap().push(Event::Error(error.to_string()));
        }
    }

    fn recorder(log: &Log) -> Box<Recorder> {
        Box::new(Recorder {
            log: log.clone(),
            cancel_on_progress: None,
        })
    }

    fn persist_into(
        log: &Log,
    ) -> impl FnOnce(&Summary) -> std::future::Ready<()> + Send + 'static {
        let log = log.clone();
        move |_: &Summary| {
            log.lock().unwrap().push(Event::Persisted);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn test_progress_then_single_completion() {
        let log: Log = Arc::default();
        let (sink, stream) = GenerationStream::channel();

        tokio::spawn(async move {
            sink.send_partial(json!({})).await;
            sink.send_partial(json!({"summary": "Dep"})).await;
            sink.finish(Ok(json!({"summary": "Deposit"})));
        });

        let outcome = run_stream(
            stream,
            recorder(&log),
            CancellationToken::new(),
            persist_into(&log),
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Progress(json!({})),
                Event::Progress(json!({"summary": "Dep"})),
                Event::Persisted,
                Event::Complete(Summary {
                    summary: "Deposit".to_string()
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_generation_error_is_terminal_and_not_persisted() {
        let log: Log = Arc::default();
        let (sink, stream) = GenerationStream::channel();

        tokio::spawn(async move {
            sink.send_partial(json!({"summary": "Dep"})).await;
            sink.finish(Err(LlmError::Api {
                status: 429,
                body: "rate limited".to_string(),
            }));
        });

        let outcome = run_stream(
            stream,
            recorder(&log),
            CancellationToken::new(),
            persist_into(&log),
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Failed);
        let events = log.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Event::Error(msg) if msg.contains("429")));
    }

    #[tokio::test]
    async fn test_invalid_final_object() {
        let log: Log = Arc::default();
        let (sink, stream) = GenerationStream::channel();
        sink.finish(Ok(json!({"overview": "not a summary"})));

        let outcome = run_stream(
            stream,
            recorder(&log),
            CancellationToken::new(),
            persist_into(&log),
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Failed);
        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Error(msg) if msg.contains("expected schema")));
    }

    #[tokio::test]
    async fn test_producer_vanishing_is_an_error() {
        let log: Log = Arc::default();
        let (sink, stream) = GenerationStream::channel();
        drop(sink);

        let outcome = run_stream(
            stream,
            recorder(&log),
            CancellationToken::new(),
            persist_into(&log),
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Failed);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_queued_work() {
        let log: Log = Arc::default();
        let (sink, stream) = GenerationStream::channel();
        let upstream = stream.cancel_token();
        let handle = CancelHandle::new();

        let callbacks = Box::new(Recorder {
            log: log.clone(),
            cancel_on_progress: Some(handle.clone()),
        });

        let producer = tokio::spawn(async move {
            sink.send_partial(json!({"summary": "D"})).await;
            sink.send_partial(json!({"summary": "De"})).await;
            sink.finish(Ok(json!({"summary": "Deposit"})));
        });

        let outcome = run_stream(stream, callbacks, handle.token(), persist_into(&log)).await;
        producer.await.unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(upstream.is_cancelled());
        assert_eq!(
            *log.lock().unwrap(),
            vec![Event::Progress(json!({"summary": "D"}))]
        );

        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_during_persist_skips_the_write() {
        let log: Log = Arc::default();
        let (sink, stream) = GenerationStream::channel();
        sink.finish(Ok(json!({"summary": "Deposit"})));

        let handle = CancelHandle::new();
        let cancel_on_persist = handle.clone();
        let persist_log = log.clone();
        let persist = move |_: &Summary| {
            cancel_on_persist.cancel();
            async move {
                persist_log.lock().unwrap().push(Event::Persisted);
            }
        };

        let outcome = run_stream(stream, recorder(&log), handle.token(), persist).await;

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let log: Log = Arc::default();
        let (sink, stream) = GenerationStream::channel();
        sink.finish(Ok(json!({"summary": "Deposit"})));

        let handle = CancelHandle::new();
        handle.cancel();
        handle.cancel();

        let outcome = run_stream(stream, recorder(&log), handle.token(), persist_into(&log)).await;

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_stream_with_closures() {
        let (sink, stream) = GenerationStream::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let progress = Arc::new(Mutex::new(0));
        let seen = progress.clone();

        let callbacks = FnCallbacks::new(
            move |_: &Value| *seen.lock().unwrap() += 1,
            move |value: Summary| {
                let _ = done_tx.send(value);
            },
            |_: ExplainError| {},
        );

        let (_handle, task) = spawn_stream(stream, Box::new(callbacks), |_: &Summary| async {});
        sink.send_partial(json!({"summary": ""})).await;
        sink.finish(Ok(json!({"summary": "Deposit"})));

        assert_eq!(task.await.unwrap(), StreamOutcome::Completed);
        assert_eq!(done_rx.await.unwrap().summary, "Deposit");
        assert_eq!(*progress.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fail_respects_cancellation() {
        let log: Log = Arc::default();
        let cancel = CancellationToken::new();

        let not_found = || ExplainError::EventNotFound("Slashed".to_string());

        assert_eq!(
            fail::<Summary>(recorder(&log), &cancel, not_found()),
            StreamOutcome::Failed
        );
        cancel.cancel();
        assert_eq!(
            fail::<Summary>(recorder(&log), &cancel, not_found()),
            StreamOutcome::Cancelled
        );
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
