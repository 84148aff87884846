//! Per-agent execution chain.
//!
//! A fixed, ordered pipeline of steps over one mutable [`ChainContext`]:
//! intent analysis → direct response | ReAct execution → response
//! enhancement. Steps skip themselves by predicate; the order itself is a
//! structural invariant, not data.

pub mod steps;

use crate::agent::AgentDefinition;
use crate::config::CoreConfig;
use crate::llm::{LlmClient, LlmError, Message};
use crate::react::{ReActStep, ReactError};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use strum::Display;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How the chain should produce the answer for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IntentMode {
    /// Answerable with a single model call, no tools.
    Direct,
    /// Needs tool use / multi-step reasoning.
    React,
}

/// Written once by the intent step, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub mode: IntentMode,
    pub reason: String,
}

/// Per-chain options supplied by the caller.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Append a "tools consulted" line to ReAct answers.
    pub cite_tools: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        ChainOptions { cite_tools: true }
    }
}

/// Single-request state threaded through every step. Created by the
/// orchestrator, discarded when the chain completes or fails.
pub struct ChainContext {
    pub request_id: Uuid,
    pub agent: Arc<AgentDefinition>,
    pub messages: Vec<Message>,
    pub options: ChainOptions,
    pub intent: Option<IntentResult>,
    pub react_steps: Vec<ReActStep>,
    pub final_answer: Option<String>,
    pub cancel: CancellationToken,
}

impl ChainContext {
    pub fn new(
        request_id: Uuid,
        agent: Arc<AgentDefinition>,
        messages: Vec<Message>,
        options: ChainOptions,
        cancel: CancellationToken,
    ) -> Self {
        ChainContext {
            request_id,
            agent,
            messages,
            options,
            intent: None,
            react_steps: Vec::new(),
            final_answer: None,
            cancel,
        }
    }
}

/// Unrecoverable chain failure. The orchestrator wraps this as the request's
/// terminal error.
#[derive(Debug, Clone)]
pub enum ChainError {
    /// A step hit an error it could not absorb.
    Step {
        step: &'static str,
        message: String,
    },
    Llm(LlmError),
    React(ReactError),
    /// The chain finished but produced no answer. Guarded against by the
    /// runner so callers never see a silent empty answer.
    EmptyAnswer,
    Cancelled,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Step { step, message } => write!(f, "step '{}' failed: {}", step, message),
            ChainError::Llm(e) => write!(f, "{}", e),
            ChainError::React(e) => write!(f, "{}", e),
            ChainError::EmptyAnswer => write!(f, "chain completed without a final answer"),
            ChainError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<LlmError> for ChainError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => ChainError::Cancelled,
            other => ChainError::Llm(other),
        }
    }
}

impl From<ReactError> for ChainError {
    fn from(e: ReactError) -> Self {
        match e {
            ReactError::Cancelled => ChainError::Cancelled,
            other => ChainError::React(other),
        }
    }
}

/// One stage of the chain.
#[async_trait]
pub trait ChainStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Skip predicate. Steps that don't apply to the current context return
    /// false and the runner moves on.
    fn should_run(&self, _ctx: &ChainContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut ChainContext) -> Result<(), ChainError>;
}

/// The fixed step pipeline for one agent run.
pub struct AgentChain {
    steps: Vec<Arc<dyn ChainStep>>,
}

impl AgentChain {
    /// The canonical four-step pipeline.
    pub fn standard(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        config: CoreConfig,
    ) -> Self {
        AgentChain {
            steps: vec![
                Arc::new(steps::IntentAnalysisStep::new(
                    llm.clone(),
                    tools.clone(),
                    config.clone(),
                )),
                Arc::new(steps::DirectResponseStep::new(llm.clone(), config.clone())),
                Arc::new(steps::ReactExecutionStep::new(llm, tools, config)),
                Arc::new(steps::ResponseEnhancementStep),
            ],
        }
    }

    /// Run every applicable step in order. Aborts on the first step error;
    /// retries belong to the capability layer, not here.
    pub async fn run(&self, ctx: &mut ChainContext) -> Result<(), ChainError> {
        for step in &self.steps {
            if ctx.cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            if !step.should_run(ctx) {
                log::debug!(
                    "[CHAIN] request={} skipping step '{}'",
                    ctx.request_id,
                    step.name()
                );
                continue;
            }
            log::debug!(
                "[CHAIN] request={} running step '{}'",
                ctx.request_id,
                step.name()
            );
            step.execute(ctx).await?;
        }

        // Chain invariant: a completed context carries a non-empty answer.
        match &ctx.final_answer {
            Some(answer) if !answer.trim().is_empty() => Ok(()),
            _ => Err(ChainError::EmptyAnswer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedLlm;

    fn context_with(cancel: CancellationToken) -> ChainContext {
        ChainContext::new(
            Uuid::new_v4(),
            Arc::new(AgentDefinition::new("leader", "controller").leader()),
            vec![Message::user("hello")],
            ChainOptions::default(),
            cancel,
        )
    }

    struct FixedAnswerStep(&'static str);

    #[async_trait]
    impl ChainStep for FixedAnswerStep {
        fn name(&self) -> &'static str {
            "fixed_answer"
        }

        async fn execute(&self, ctx: &mut ChainContext) -> Result<(), ChainError> {
            ctx.final_answer = Some(self.0.to_string());
            Ok(())
        }
    }

    struct SkippedStep;

    #[async_trait]
    impl ChainStep for SkippedStep {
        fn name(&self) -> &'static str {
            "skipped"
        }

        fn should_run(&self, _ctx: &ChainContext) -> bool {
            false
        }

        async fn execute(&self, _ctx: &mut ChainContext) -> Result<(), ChainError> {
            panic!("skipped step must not execute");
        }
    }

    #[tokio::test]
    async fn test_skip_predicate_respected() {
        let chain = AgentChain {
            steps: vec![Arc::new(SkippedStep), Arc::new(FixedAnswerStep("ok"))],
        };
        let mut ctx = context_with(CancellationToken::new());
        chain.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.final_answer.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_empty_answer_is_an_error_not_silence() {
        let chain = AgentChain {
            steps: vec![Arc::new(FixedAnswerStep("   "))],
        };
        let mut ctx = context_with(CancellationToken::new());
        let err = chain.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ChainError::EmptyAnswer));
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_before_steps() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chain = AgentChain {
            steps: vec![Arc::new(FixedAnswerStep("never"))],
        };
        let mut ctx = context_with(cancel);
        let err = chain.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ChainError::Cancelled));
    }

    #[tokio::test]
    async fn test_standard_chain_direct_path() {
        let llm = Arc::new(ScriptedLlm::new());
        // No tools registered: the intent step forces direct mode without a
        // classifier call, so the only scripted reply is the answer itself.
        llm.push_reply("Hello there!");

        let chain = AgentChain::standard(
            llm,
            Arc::new(ToolRegistry::new()),
            CoreConfig::default(),
        );
        let mut ctx = context_with(CancellationToken::new());
        chain.run(&mut ctx).await.unwrap();

        assert_eq!(ctx.intent.as_ref().unwrap().mode, IntentMode::Direct);
        assert_eq!(ctx.final_answer.as_deref(), Some("Hello there!"));
        assert!(ctx.react_steps.is_empty());
    }
}
