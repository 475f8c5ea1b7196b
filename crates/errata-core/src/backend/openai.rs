//! OpenAI-compatible `/chat/completions` backend.
//!
//! Model ids select the provider: `openrouter/<vendor>/<model>` goes to
//! OpenRouter with the prefix stripped, `openai/<model>` goes to OpenAI with
//! the prefix stripped, and anything else is sent to OpenAI verbatim.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ChatBackend, ChatMessage, CompletionError};
use crate::Endpoints;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// The provider a model id is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    OpenRouter,
}

impl Provider {
    pub fn for_model(model_id: &str) -> Self {
        if model_id.starts_with("openrouter/") {
            Provider::OpenRouter
        } else {
            Provider::OpenAi
        }
    }

    /// Environment variable conventionally holding this provider's API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

/// Where a model id is sent, and under which provider-side name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    pub provider: Provider,
    pub base_url: &'a str,
    pub model: &'a str,
}

pub fn route<'a>(model_id: &'a str, endpoints: &'a Endpoints) -> Route<'a> {
    match Provider::for_model(model_id) {
        Provider::OpenRouter => Route {
            provider: Provider::OpenRouter,
            base_url: &endpoints.openrouter_base_url,
            model: model_id.strip_prefix("openrouter/").unwrap_or(model_id),
        },
        Provider::OpenAi => Route {
            provider: Provider::OpenAi,
            base_url: &endpoints.openai_base_url,
            model: model_id.strip_prefix("openai/").unwrap_or(model_id),
        },
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Pull `choices[0].message.content` out of a completion body.
pub fn content_from_body(body: &str) -> Result<String, CompletionError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| CompletionError::Malformed(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::Malformed("no choices".into()))?;
    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(CompletionError::EmptyContent),
    }
}

/// Error for a non-success HTTP status; 429 is reported as rate limiting.
pub fn status_error(status: u16, body: &str) -> CompletionError {
    if status == 429 {
        CompletionError::RateLimited
    } else {
        CompletionError::Status {
            status,
            body: truncate_body(body),
        }
    }
}

/// HTTP chat backend for OpenAI and OpenRouter.
pub struct OpenAiCompatible {
    client: reqwest::Client,
    endpoints: Endpoints,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatible {
    pub fn new(endpoints: Endpoints, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoints,
            api_key,
            timeout,
        }
    }
}

impl std::fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("endpoints", &self.endpoints)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ChatBackend for OpenAiCompatible {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn complete<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>> {
        Box::pin(async move {
            let route = route(model, &self.endpoints);
            let url = format!("{}/chat/completions", route.base_url.trim_end_matches('/'));

            let mut req = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&ChatRequest {
                    model: route.model,
                    messages,
                });
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(status_error(status.as_u16(), &body));
            }

            tracing::debug!(model = route.model, bytes = body.len(), "completion received");
            content_from_body(&body)
        })
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
