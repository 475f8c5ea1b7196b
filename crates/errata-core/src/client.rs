//! Completion client: a [`ChatBackend`] plus the call policies used by each stage.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;

use crate::backend::{ChatBackend, ChatMessage, CompletionError};
use crate::retry::{CallOutcome, RetryPolicy};

pub struct CompletionClient {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    batch_concurrency: usize,
}

impl CompletionClient {
    pub fn new(backend: Arc<dyn ChatBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            batch_concurrency: 8,
        }
    }

    /// Bound on requests in flight inside [`batch`](Self::batch).
    pub fn with_batch_concurrency(mut self, n: usize) -> Self {
        self.batch_concurrency = n.max(1);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// A single call, no retry.
    pub async fn invoke(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, CompletionError> {
        self.backend.complete(model, messages).await
    }

    /// Call under the retry policy. Never fails; exhaustion is reported in the outcome.
    pub async fn invoke_with_retry(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> CallOutcome<String, CompletionError> {
        self.retry
            .run(|attempt| {
                tracing::debug!(
                    backend = self.backend.name(),
                    model,
                    attempt,
                    "sending completion request"
                );
                self.invoke(model, messages)
            })
            .await
    }

    /// One call per prompt, each attempted once; slot `i` of the result
    /// belongs to `prompts[i]`.
    pub async fn batch(
        &self,
        model: &str,
        prompts: &[Vec<ChatMessage>],
    ) -> Vec<Result<String, CompletionError>> {
        stream::iter(prompts.iter().map(|messages| self.invoke(model, messages)))
            .buffered(self.batch_concurrency)
            .collect()
            .await
    }
}
