//! Result streams and live re-resolution.
//!
//! Every request answers with a [`ResultStream`]. A plain fetch emits once
//! and completes. A live operation emits its first result, then attaches a
//! store listener to every target that asked for updates and re-runs the
//! whole operation on each push, until it is cancelled or fails.

use crate::backend::{Backend, ListenerRegistration};
use crate::executor::{Executor, Response};
use docql_core::{LinkError, LinkResult, Operation};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The results of one request, in emission order.
///
/// Dropping the stream cancels it.
#[derive(Debug)]
pub struct ResultStream {
    receiver: mpsc::Receiver<LinkResult<Response>>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ResultStream {
    /// Wraps a running producer task.
    ///
    /// The task is expected to stop once `cancel` fires or is dropped.
    pub fn new(
        receiver: mpsc::Receiver<LinkResult<Response>>,
        cancel: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            receiver,
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    /// Creates a finished stream that yields `results` and completes.
    pub fn from_results(results: Vec<LinkResult<Response>>) -> Self {
        let (sender, receiver) = mpsc::channel(results.len().max(1));
        for result in results {
            let _ = sender.try_send(result);
        }
        Self {
            receiver,
            cancel: None,
            task: None,
        }
    }

    /// Waits for the next result. Returns `None` once the stream is done.
    pub async fn next(&mut self) -> Option<LinkResult<Response>> {
        self.receiver.recv().await
    }

    /// Stops the stream and waits until its listeners are released.
    pub async fn cancel(mut self) {
        self.signal_cancel();
        self.receiver.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn signal_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Stream for ResultStream {
    type Item = LinkResult<Response>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.signal_cancel();
    }
}

/// Starts resolving `operation` on a background task.
///
/// With `live` set the stream stays open after the first result and
/// re-resolves on every store push. Must be called from a tokio runtime.
pub fn spawn_resolution<B>(
    executor: Executor<B>,
    operation: Operation,
    live: bool,
    buffer: usize,
) -> ResultStream
where
    B: Backend + ?Sized + 'static,
{
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let task = tokio::spawn(run(executor, operation, live, sender, cancel_rx));
    ResultStream::new(receiver, cancel_tx, task)
}

async fn run<B>(
    executor: Executor<B>,
    operation: Operation,
    live: bool,
    sender: mpsc::Sender<LinkResult<Response>>,
    mut cancel: oneshot::Receiver<()>,
) where
    B: Backend + ?Sized + 'static,
{
    let first = tokio::select! {
        biased;
        _ = &mut cancel => return,
        result = executor.execute_tracked(&operation) => result,
    };
    let (response, targets) = match first {
        Ok(first) => first,
        Err(err) if err.is_benign() => {
            warn!(error = %err, "first pass aborted, completing without a result");
            return;
        }
        Err(err) => {
            let _ = sender.send(Err(err)).await;
            return;
        }
    };
    if sender.send(Ok(response)).await.is_err() || !live {
        return;
    }

    let (sink, mut notices) = mpsc::unbounded_channel();
    let mut registrations: Vec<ListenerRegistration> = Vec::with_capacity(targets.len());
    for target in targets {
        debug!(target = %target, "listening");
        match executor.backend().listen(target, sink.clone()) {
            Ok(registration) => registrations.push(registration),
            Err(err) => {
                let _ = sender.send(Err(err.into())).await;
                return;
            }
        }
    }
    drop(sink);

    loop {
        let notice = tokio::select! {
            biased;
            _ = &mut cancel => break,
            notice = notices.recv() => notice,
        };
        let target = match notice {
            None => break,
            Some(Ok(target)) => target,
            Some(Err(err)) => {
                let err = LinkError::from(err);
                if err.is_benign() {
                    warn!(error = %err, "listener aborted, still listening");
                    continue;
                }
                let _ = sender.send(Err(err)).await;
                break;
            }
        };

        info!(target = %target, "snapshot push, re-resolving");
        let result = tokio::select! {
            biased;
            _ = &mut cancel => break,
            result = executor.execute(&operation) => result,
        };
        match result {
            Ok(response) => {
                if sender.send(Ok(response)).await.is_err() {
                    break;
                }
            }
            Err(err) if err.is_benign() => {
                warn!(error = %err, "re-run aborted, skipping");
            }
            Err(err) => {
                let _ = sender.send(Err(err)).await;
                break;
            }
        }
    }

    debug!(listeners = registrations.len(), "releasing listeners");
    drop(registrations);
}
