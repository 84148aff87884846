//! LLM capability contract.
//!
//! The core never talks to a concrete provider. Everything that needs model
//! output goes through the [`LlmClient`] trait; the process hosting this crate
//! supplies the implementation (HTTP client, local model, whatever).

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call completion options. Providers may ignore fields they don't support.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Errors an LLM capability can produce.
#[derive(Debug, Clone)]
pub enum LlmError {
    /// The provider could not be reached or returned a hard failure.
    Unavailable(String),
    /// The call did not complete within the configured deadline.
    Timeout(Duration),
    /// The surrounding request was cancelled while the call was in flight.
    Cancelled,
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Unavailable(msg) => write!(f, "LLM unavailable: {}", msg),
            LlmError::Timeout(d) => write!(f, "LLM call timed out after {:?}", d),
            LlmError::Cancelled => write!(f, "LLM call cancelled"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Opaque "invoke LLM with messages, get text back" capability.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;
}

/// Run a completion with a deadline and a cancellation token.
///
/// These are the only two ways an in-flight model call can be interrupted:
/// the configured timeout elapses (`LlmError::Timeout`) or the owning request
/// is cancelled (`LlmError::Cancelled`). Callers decide which of the two are
/// recoverable; the router treats a timeout exactly like provider failure.
pub async fn complete_bounded(
    llm: &dyn LlmClient,
    messages: &[Message],
    options: &CompletionOptions,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        outcome = tokio::time::timeout(deadline, llm.complete(messages, options)) => {
            match outcome {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(deadline)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;

    #[tokio::test]
    async fn test_complete_bounded_cancellation() {
        let llm = ScriptedLlm::new();
        llm.push_delayed_reply("too late", Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = complete_bounded(
            &llm,
            &[Message::user("hi")],
            &CompletionOptions::default(),
            Duration::from_secs(10),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(LlmError::Cancelled)));
    }

    #[tokio::test]
    async fn test_complete_bounded_timeout() {
        let llm = ScriptedLlm::new();
        llm.push_delayed_reply("too late", Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let result = complete_bounded(
            &llm,
            &[Message::user("hi")],
            &CompletionOptions::default(),
            Duration::from_millis(10),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }
}
