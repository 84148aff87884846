//! Agent resolution and execution pipeline.
//!
//! A request enters through the [`orchestrator::Orchestrator`], which resolves
//! it to one or more registered agents (explicit selection, LLM routing, or
//! the guaranteed leader fallback) and runs each agent's
//! [`chain::AgentChain`]: intent analysis, then either a direct model reply or
//! a bounded ReAct tool loop, then response enhancement.
//!
//! The crate is transport-agnostic: callers bring their own
//! [`llm::LlmClient`] implementation and [`tools::Tool`] set.

pub mod agent;
pub mod chain;
pub mod config;
pub mod llm;
pub mod orchestrator;
pub mod react;
pub mod router;
pub mod tools;

pub use agent::{AgentDefinition, AgentManager, AgentMeta, AgentStarter, RegistryError};
pub use chain::{
    AgentChain, ChainContext, ChainError, ChainOptions, ChainStep, IntentMode, IntentResult,
};
pub use config::CoreConfig;
pub use llm::{CompletionOptions, LlmClient, LlmError, Message, MessageRole};
pub use orchestrator::{AgentRequest, AgentRunReport, Orchestrator, OrchestratorError};
pub use react::{ReActAction, ReActExecutor, ReActOutcome, ReActStep, ReactError};
pub use router::{Router, RouterError};
pub use tools::{Tool, ToolContent, ToolDefinition, ToolError, ToolRegistry, ToolResult};
