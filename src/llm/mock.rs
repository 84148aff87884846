//! Scripted LLM client for tests.
//!
//! Replies are queued up front and handed back in order, so control-flow
//! around the classifier and the ReAct loop can be exercised without a
//! provider. Not compiled out of the crate because integration tests and
//! downstream harnesses need it too.

use super::{CompletionOptions, LlmClient, LlmError, Message};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

enum ScriptedReply {
    Text(String),
    DelayedText(String, Duration),
    Error(LlmError),
}

/// An [`LlmClient`] that replays a fixed script.
///
/// When the script runs dry the client returns the default reply if one was
/// set, otherwise `LlmError::Unavailable`. Every call's messages are recorded
/// for assertions.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<ScriptedReply>>,
    default_reply: Mutex<Option<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        ScriptedLlm {
            script: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain text reply.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.script
            .lock()
            .push_back(ScriptedReply::Text(text.into()));
    }

    /// Queue a reply that only resolves after `delay` (for timeout tests).
    pub fn push_delayed_reply(&self, text: impl Into<String>, delay: Duration) {
        self.script
            .lock()
            .push_back(ScriptedReply::DelayedText(text.into(), delay));
    }

    /// Queue an error.
    pub fn push_error(&self, error: LlmError) {
        self.script.lock().push_back(ScriptedReply::Error(error));
    }

    /// Reply with `text` whenever the script is exhausted.
    pub fn set_default_reply(&self, text: impl Into<String>) {
        *self.default_reply.lock() = Some(text.into());
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Messages of the `n`-th completion call.
    pub fn call_messages(&self, n: usize) -> Option<Vec<Message>> {
        self.calls.lock().get(n).cloned()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        self.calls.lock().push(messages.to_vec());

        let next = self.script.lock().pop_front();
        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::DelayedText(text, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(ScriptedReply::Error(error)) => Err(error),
            None => match self.default_reply.lock().clone() {
                Some(text) => Ok(text),
                None => Err(LlmError::Unavailable("scripted LLM exhausted".to_string())),
            },
        }
    }
}

/// An [`LlmClient`] that fails every call. Used to prove the leader-fallback
/// total-coverage property.
pub struct UnavailableLlm;

#[async_trait]
impl LlmClient for UnavailableLlm {
    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        Err(LlmError::Unavailable("provider down".to_string()))
    }
}
