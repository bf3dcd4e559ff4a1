//! The request entry point.

use crate::backend::Backend;
use crate::directives::has_subscribe_directive;
use crate::executor::{Executor, ExecutorConfig};
use crate::subscription::{spawn_resolution, ResultStream};
use docql_core::Operation;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Link configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Executor settings.
    pub executor: ExecutorConfig,
    /// Results buffered per stream before the producer waits.
    pub stream_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            stream_buffer: 16,
        }
    }
}

impl LinkConfig {
    /// Sets the executor configuration.
    #[must_use]
    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the stream buffer size.
    #[must_use]
    pub fn stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size;
        self
    }
}

/// A request handler further down a link chain.
pub trait NextLink: Send + Sync {
    /// Handles an operation.
    fn request(&self, operation: Operation) -> ResultStream;
}

/// Returns true if the operation targets the document store.
pub fn is_document_operation(operation: &Operation) -> bool {
    operation.has_directive("query") || operation.has_directive("mutation")
}

/// Resolves operations marked `@query` or `@mutation` against a store and
/// forwards everything else.
pub struct DocumentLink<B: ?Sized> {
    executor: Executor<B>,
    config: LinkConfig,
}

impl<B: ?Sized> std::fmt::Debug for DocumentLink<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLink")
            .field("config", &self.config)
            .finish()
    }
}

impl<B: Backend + ?Sized + 'static> DocumentLink<B> {
    /// Creates a link with the default configuration.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, LinkConfig::default())
    }

    /// Creates a link with configuration.
    pub fn with_config(backend: Arc<B>, config: LinkConfig) -> Self {
        Self {
            executor: Executor::with_config(backend, config.executor.clone()),
            config,
        }
    }

    /// Returns the executor.
    pub fn executor(&self) -> &Executor<B> {
        &self.executor
    }

    /// Handles `operation`, or hands it to `forward` when it carries no
    /// `@query` or `@mutation` directive.
    ///
    /// Must be called from a tokio runtime.
    pub fn request(&self, operation: Operation, forward: Option<&dyn NextLink>) -> ResultStream {
        if !is_document_operation(&operation) {
            if let Some(next) = forward {
                info!(name = operation.name.as_deref(), "forwarding operation");
                return next.request(operation);
            }
        }

        let live = has_subscribe_directive(&operation);
        info!(
            name = operation.name.as_deref(),
            kind = %operation.kind,
            live,
            "handling operation"
        );
        spawn_resolution(
            self.executor.clone(),
            operation,
            live,
            self.config.stream_buffer,
        )
    }
}

impl<B: Backend + ?Sized + 'static> NextLink for DocumentLink<B> {
    fn request(&self, operation: Operation) -> ResultStream {
        DocumentLink::request(self, operation, None)
    }
}
