//! The four canonical chain steps.

use super::{ChainContext, ChainError, ChainStep, IntentMode, IntentResult};
use crate::config::CoreConfig;
use crate::llm::{complete_bounded, CompletionOptions, LlmClient, LlmError, Message};
use crate::react::{ReActAction, ReActExecutor};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use std::sync::Arc;

/// Step 1: classify the request as `direct` or `react`.
///
/// Never mutates the conversation. A classifier outage is absorbed here by
/// defaulting to direct mode — the chain only aborts if the agent itself
/// cannot answer.
pub struct IntentAnalysisStep {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: CoreConfig,
}

impl IntentAnalysisStep {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: CoreConfig) -> Self {
        IntentAnalysisStep { llm, tools, config }
    }
}

#[async_trait]
impl ChainStep for IntentAnalysisStep {
    fn name(&self) -> &'static str {
        "intent_analysis"
    }

    async fn execute(&self, ctx: &mut ChainContext) -> Result<(), ChainError> {
        if self.tools.is_empty() {
            // Nothing to act with; react mode would be pointless.
            ctx.intent = Some(IntentResult {
                mode: IntentMode::Direct,
                reason: "no tools registered".to_string(),
            });
            return Ok(());
        }

        let tool_names: Vec<String> = self
            .tools
            .definitions()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        let request_text = latest_user_text(&ctx.messages);
        let prompt = format!(
            "Decide how to answer the user request below.\n\
             Available tools: {}.\n\n\
             Request:\n{}\n\n\
             Reply with `direct` if a plain answer suffices, or `react` if tool use or \
             multi-step reasoning is needed. Optionally follow with a colon and a short reason.",
            tool_names.join(", "),
            request_text
        );

        let intent = match complete_bounded(
            self.llm.as_ref(),
            &[Message::user(prompt)],
            &CompletionOptions {
                max_tokens: Some(32),
                temperature: Some(0.0),
            },
            self.config.llm_timeout,
            &ctx.cancel,
        )
        .await
        {
            Ok(answer) => parse_intent(&answer),
            Err(LlmError::Cancelled) => return Err(ChainError::Cancelled),
            Err(e) => {
                log::warn!(
                    "[CHAIN] request={} intent classifier failed ({}); defaulting to direct",
                    ctx.request_id,
                    e
                );
                IntentResult {
                    mode: IntentMode::Direct,
                    reason: "intent classifier unavailable".to_string(),
                }
            }
        };

        log::info!(
            "[CHAIN] request={} intent={} ({})",
            ctx.request_id,
            intent.mode,
            intent.reason
        );
        ctx.intent = Some(intent);
        Ok(())
    }
}

fn parse_intent(answer: &str) -> IntentResult {
    let trimmed = answer.trim();
    let (mode_part, reason_part) = match trimmed.split_once(':') {
        Some((m, r)) => (m, r.trim()),
        None => (trimmed, ""),
    };
    let mode_token = mode_part.trim().trim_matches('`').to_lowercase();

    let mode = match mode_token.as_str() {
        "react" => IntentMode::React,
        "direct" => IntentMode::Direct,
        _ => {
            log::warn!("[CHAIN] Unrecognized intent answer {:?}; using direct", answer);
            return IntentResult {
                mode: IntentMode::Direct,
                reason: "unrecognized classification".to_string(),
            };
        }
    };
    IntentResult {
        mode,
        reason: if reason_part.is_empty() {
            "classified".to_string()
        } else {
            reason_part.to_string()
        },
    }
}

/// Step 2: single model call for direct-mode requests.
pub struct DirectResponseStep {
    llm: Arc<dyn LlmClient>,
    config: CoreConfig,
}

impl DirectResponseStep {
    pub fn new(llm: Arc<dyn LlmClient>, config: CoreConfig) -> Self {
        DirectResponseStep { llm, config }
    }
}

#[async_trait]
impl ChainStep for DirectResponseStep {
    fn name(&self) -> &'static str {
        "direct_response"
    }

    fn should_run(&self, ctx: &ChainContext) -> bool {
        matches!(
            ctx.intent,
            Some(IntentResult {
                mode: IntentMode::Direct,
                ..
            })
        )
    }

    async fn execute(&self, ctx: &mut ChainContext) -> Result<(), ChainError> {
        let mut transcript = Vec::with_capacity(ctx.messages.len() + 1);
        transcript.push(Message::system(format!(
            "You are the agent '{}'. {}",
            ctx.agent.name, ctx.agent.description
        )));
        transcript.extend_from_slice(&ctx.messages);

        let answer = complete_bounded(
            self.llm.as_ref(),
            &transcript,
            &CompletionOptions::default(),
            self.config.llm_timeout,
            &ctx.cancel,
        )
        .await?;

        ctx.final_answer = Some(answer);
        Ok(())
    }
}

/// Step 3: delegate react-mode requests to the bounded executor.
pub struct ReactExecutionStep {
    executor: ReActExecutor,
}

impl ReactExecutionStep {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: CoreConfig) -> Self {
        ReactExecutionStep {
            executor: ReActExecutor::new(llm, tools, config),
        }
    }
}

#[async_trait]
impl ChainStep for ReactExecutionStep {
    fn name(&self) -> &'static str {
        "react_execution"
    }

    fn should_run(&self, ctx: &ChainContext) -> bool {
        matches!(
            ctx.intent,
            Some(IntentResult {
                mode: IntentMode::React,
                ..
            })
        )
    }

    async fn execute(&self, ctx: &mut ChainContext) -> Result<(), ChainError> {
        let outcome = self.executor.run(&ctx.messages, &ctx.cancel).await?;
        ctx.react_steps.extend(outcome.steps);
        ctx.final_answer = Some(outcome.answer);
        Ok(())
    }
}

/// Step 4: always runs last. Formats the answer without changing what it says;
/// for tool-assisted answers it may append the tools consulted.
pub struct ResponseEnhancementStep;

#[async_trait]
impl ChainStep for ResponseEnhancementStep {
    fn name(&self) -> &'static str {
        "response_enhancement"
    }

    async fn execute(&self, ctx: &mut ChainContext) -> Result<(), ChainError> {
        let Some(answer) = ctx.final_answer.take() else {
            return Err(ChainError::EmptyAnswer);
        };
        let mut enhanced = answer.trim().to_string();

        if ctx.options.cite_tools {
            let mut tools_used: Vec<&str> = Vec::new();
            for step in &ctx.react_steps {
                if let ReActAction::Tool { name, .. } = &step.action {
                    if !step.observation_is_error && !tools_used.contains(&name.as_str()) {
                        tools_used.push(name);
                    }
                }
            }
            if !tools_used.is_empty() {
                enhanced.push_str(&format!("\n\n[tools consulted: {}]", tools_used.join(", ")));
            }
        }

        ctx.final_answer = Some(enhanced);
        Ok(())
    }
}

fn latest_user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, crate::llm::MessageRole::User))
        .map(|m| m.content.clone())
        .unwrap_or_default()
}
