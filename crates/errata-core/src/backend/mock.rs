//! Mock chat backend for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ChatBackend, ChatMessage, CompletionError};

/// A configurable mock response for [`MockBackend`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this text as the completion.
    Text(String),
    /// Simulate a 429 rate-limit response.
    RateLimited,
    /// Simulate a non-success HTTP status.
    Status(u16),
    /// Simulate a body that is not a chat completion.
    Malformed,
}

impl MockResponse {
    pub fn text(s: impl Into<String>) -> Self {
        MockResponse::Text(s.into())
    }

    fn into_result(self) -> Result<String, CompletionError> {
        match self {
            MockResponse::Text(s) => Ok(s),
            MockResponse::RateLimited => Err(CompletionError::RateLimited),
            MockResponse::Status(status) => Err(CompletionError::Status {
                status,
                body: "mock failure".into(),
            }),
            MockResponse::Malformed => Err(CompletionError::Malformed("mock".into())),
        }
    }
}

type Router = Box<dyn Fn(&[ChatMessage]) -> Option<MockResponse> + Send + Sync>;

/// A hand-rolled mock implementing [`ChatBackend`] for tests.
///
/// Responses are chosen in this order:
/// - a router closure inspecting the messages, if one is set and returns `Some`;
/// - the next entry of a scripted sequence (the last entry repeats);
/// - the fallback response.
///
/// Every call is counted and the `(model, messages)` pair is recorded.
pub struct MockBackend {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    router: Option<Router>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl MockBackend {
    /// Create a mock that always returns `response`.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            router: None,
            delay: None,
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that returns responses in order, repeating the last one.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        // Reversed so pop() yields the front.
        responses.reverse();
        let fallback = responses[0].clone();
        let mut mock = Self::new(fallback);
        mock.responses = Mutex::new(responses);
        mock
    }

    /// Route responses by message content; `None` falls through to the sequence.
    pub fn with_router(
        mut self,
        router: impl Fn(&[ChatMessage]) -> Option<MockResponse> + Send + Sync + 'static,
    ) -> Self {
        self.router = Some(Box::new(router));
        self
    }

    /// Set simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Recorded `(model, messages)` pairs, in call order.
    pub fn calls(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_response(&self, messages: &[ChatMessage]) -> MockResponse {
        if let Some(routed) = self.router.as_ref().and_then(|r| r(messages)) {
            return routed;
        }
        let mut seq = match self.responses.lock() {
            Ok(seq) => seq,
            Err(_) => return self.fallback.clone(),
        };
        if seq.len() > 1 {
            seq.pop().unwrap_or_else(|| self.fallback.clone())
        } else {
            seq.first().cloned().unwrap_or_else(|| self.fallback.clone())
        }
    }
}

impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>> {
        Box::pin(async move {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((model.to_string(), messages.to_vec()));
            }
            let response = self.next_response(messages);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            response.into_result()
        })
    }
}
