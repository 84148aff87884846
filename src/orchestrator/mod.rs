//! The single public entry point.
//!
//! Resolution is an explicit ordered list of strategies — explicit caller
//! intent, classifier selection, leader fallback — each returning a
//! result-or-miss value, short-circuiting on the first one that produces a
//! selection. Router failures are expected and absorbed here; the only
//! failures surfaced to the caller are an explicit-selection miss and the
//! resolved agent's own chain failing.

use crate::agent::{AgentDefinition, AgentManager};
use crate::chain::{AgentChain, ChainContext, ChainError, ChainOptions};
use crate::config::CoreConfig;
use crate::llm::{LlmClient, Message, MessageRole};
use crate::router::Router;
use crate::tools::ToolRegistry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// An inbound request. `id` identifies the run for cancellation.
#[derive(Clone)]
pub struct AgentRequest {
    pub id: Uuid,
    pub messages: Vec<Message>,
    /// Caller-supplied agent identifier; honored exactly, never re-routed.
    pub explicit_agent: Option<String>,
    pub options: ChainOptions,
}

impl AgentRequest {
    pub fn from_text(text: impl Into<String>) -> Self {
        AgentRequest {
            id: Uuid::new_v4(),
            messages: vec![Message::user(text)],
            explicit_agent: None,
            options: ChainOptions::default(),
        }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        AgentRequest {
            id: Uuid::new_v4(),
            messages,
            explicit_agent: None,
            options: ChainOptions::default(),
        }
    }

    pub fn with_agent(mut self, identifier: impl Into<String>) -> Self {
        self.explicit_agent = Some(identifier.into());
        self
    }

    /// Text handed to the classifier: the latest user message.
    pub fn request_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, MessageRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

/// Per-agent result of a fan-out run, positionally aligned with the resolved
/// agent list. Outputs are not merged here; merging is a caller concern.
#[derive(Debug)]
pub struct AgentRunReport {
    pub agent: String,
    pub outcome: Result<String, OrchestratorError>,
}

#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// Explicit selection named an unknown agent. "No agent could handle this."
    AgentNotFound(String),
    /// No leader agent registered; construction-time failure.
    NoLeader,
    /// The resolved agent's chain failed. "The agent failed while handling this."
    ChainAborted {
        agent: String,
        source: ChainError,
    },
    /// The request was cancelled before an agent could finish.
    Cancelled,
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::AgentNotFound(name) => {
                write!(f, "no agent could handle this request: unknown agent '{}'", name)
            }
            OrchestratorError::NoLeader => {
                write!(f, "no leader agent registered; orchestrator cannot guarantee coverage")
            }
            OrchestratorError::ChainAborted { agent, source } => {
                write!(f, "agent '{}' failed while handling the request: {}", agent, source)
            }
            OrchestratorError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// In-flight map entry tied to the lifetime of a run's future.
///
/// Cleanup lives in `Drop`, not on the straight-line path: when the caller
/// drops the future mid-run (client disconnect, `select!` losing arm) the
/// token is cancelled — stopping any spawned fan-out chains via their child
/// tokens — and the map entry is removed.
struct ActiveRun<'a> {
    active: &'a DashMap<Uuid, CancellationToken>,
    id: Uuid,
    token: CancellationToken,
}

impl<'a> ActiveRun<'a> {
    fn register(active: &'a DashMap<Uuid, CancellationToken>, id: Uuid) -> Self {
        let token = CancellationToken::new();
        active.insert(id, token.clone());
        ActiveRun { active, id, token }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        self.active.remove(&self.id);
    }
}

/// Routes a request to agent(s) and runs their chains.
pub struct Orchestrator {
    manager: Arc<AgentManager>,
    router: Router,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: CoreConfig,
    /// In-flight runs, keyed by request id, for external cancellation.
    active: DashMap<Uuid, CancellationToken>,
}

impl Orchestrator {
    /// Fails fast when the registry has no leader: total coverage is a
    /// construction-time invariant, not a runtime hope.
    pub fn new(
        manager: Arc<AgentManager>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        config: CoreConfig,
    ) -> Result<Self, OrchestratorError> {
        if manager.leader().is_none() {
            return Err(OrchestratorError::NoLeader);
        }
        let router = Router::new(llm.clone(), &config);
        Ok(Orchestrator {
            manager,
            router,
            llm,
            tools,
            config,
            active: DashMap::new(),
        })
    }

    /// Resolve one agent and run its chain. Always resolves *some* agent —
    /// the leader at worst — and only fails if explicit selection misses or
    /// the resolved agent's chain fails.
    pub async fn run_with_leader(&self, request: AgentRequest) -> Result<String, OrchestratorError> {
        let run = ActiveRun::register(&self.active, request.id);
        let agent = self.resolve_single(&request, run.token()).await?;
        log::info!(
            "[ORCHESTRATOR] request={} dispatching to agent '{}'",
            request.id,
            agent.name
        );
        run_chain_task(
            self.llm.clone(),
            self.tools.clone(),
            self.config.clone(),
            agent,
            request.messages.clone(),
            request.options.clone(),
            request.id,
            run.token().clone(),
        )
        .await
    }

    /// Resolve a fan-out set and run each agent's chain as an isolated task.
    /// One chain failing never aborts the others; each report carries its own
    /// outcome.
    pub async fn run_with_multiple_agents(
        &self,
        request: AgentRequest,
    ) -> Result<Vec<AgentRunReport>, OrchestratorError> {
        let run = ActiveRun::register(&self.active, request.id);
        let agents = self.resolve_fan_out(&request, run.token()).await?;
        log::info!(
            "[ORCHESTRATOR] request={} fanning out to {} agent(s)",
            request.id,
            agents.len()
        );

        let mut handles = Vec::with_capacity(agents.len());
        for agent in &agents {
            handles.push(tokio::spawn(run_chain_task(
                self.llm.clone(),
                self.tools.clone(),
                self.config.clone(),
                agent.clone(),
                request.messages.clone(),
                request.options.clone(),
                request.id,
                run.token().child_token(),
            )));
        }

        let joined = futures_util::future::join_all(handles).await;
        let reports = agents
            .iter()
            .zip(joined)
            .map(|(agent, join_result)| AgentRunReport {
                agent: agent.name.clone(),
                outcome: match join_result {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(OrchestratorError::ChainAborted {
                        agent: agent.name.clone(),
                        source: ChainError::Step {
                            step: "fan_out",
                            message: format!("task failed: {}", join_error),
                        },
                    }),
                },
            })
            .collect();
        Ok(reports)
    }

    /// Cancel an in-flight run. Propagates to that run's LLM/tool waits only;
    /// other contexts are unaffected. Returns false when the id is unknown.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        match self.active.get(&request_id) {
            Some(entry) => {
                log::info!("[ORCHESTRATOR] Cancelling request {}", request_id);
                entry.cancel();
                true
            }
            None => false,
        }
    }

    /// Direct access to the classifier for advanced callers bypassing full
    /// orchestration.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn manager(&self) -> &Arc<AgentManager> {
        &self.manager
    }

    /// Single-agent resolution: explicit → routed → leader. The return type
    /// guarantees exactly one agent comes out.
    async fn resolve_single(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<AgentDefinition>, OrchestratorError> {
        if let Some(agent) = self.explicit_layer(request)? {
            return Ok(agent);
        }
        if let Some(agent) = self.routed_layer(request, cancel).await? {
            return Ok(agent);
        }
        self.leader_layer()
    }

    /// Fan-out resolution: explicit (a set of one) → multi-select → leader.
    /// A failed multi-select drops to the leader rather than re-asking the
    /// same classifier for a single pick.
    async fn resolve_fan_out(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<AgentDefinition>>, OrchestratorError> {
        if let Some(agent) = self.explicit_layer(request)? {
            return Ok(vec![agent]);
        }
        if let Some(agents) = self.multi_layer(request, cancel).await? {
            return Ok(agents);
        }
        Ok(vec![self.leader_layer()?])
    }

    /// Explicit intent is honored exactly; a miss is a hard error, never a
    /// silent re-route.
    fn explicit_layer(
        &self,
        request: &AgentRequest,
    ) -> Result<Option<Arc<AgentDefinition>>, OrchestratorError> {
        match &request.explicit_agent {
            Some(identifier) => match self.manager.get(identifier) {
                Some(agent) => Ok(Some(agent)),
                None => Err(OrchestratorError::AgentNotFound(identifier.clone())),
            },
            None => Ok(None),
        }
    }

    async fn routed_layer(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<AgentDefinition>>, OrchestratorError> {
        let candidates = self.manager.list_all();
        match self
            .router
            .select_agent(&request.request_text(), &candidates, cancel)
            .await
        {
            Ok(agent) => Ok(Some(agent)),
            Err(e) if e.is_cancelled() => Err(OrchestratorError::Cancelled),
            Err(e) => {
                log::warn!(
                    "[ORCHESTRATOR] request={} routing failed ({}); falling back to leader",
                    request.id,
                    e
                );
                Ok(None)
            }
        }
    }

    async fn multi_layer(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Arc<AgentDefinition>>>, OrchestratorError> {
        let candidates = self.manager.list_all();
        match self
            .router
            .select_agents(&request.request_text(), &candidates, cancel)
            .await
        {
            Ok(agents) => Ok(Some(agents)),
            Err(e) if e.is_cancelled() => Err(OrchestratorError::Cancelled),
            Err(e) => {
                log::warn!(
                    "[ORCHESTRATOR] request={} multi-agent selection failed ({}); falling back to leader",
                    request.id,
                    e
                );
                Ok(None)
            }
        }
    }

    fn leader_layer(&self) -> Result<Arc<AgentDefinition>, OrchestratorError> {
        self.manager.leader().ok_or(OrchestratorError::NoLeader)
    }
}

/// Run one agent's chain over an isolated context. Owned arguments so the
/// fan-out path can move it into a spawned task.
#[allow(clippy::too_many_arguments)]
async fn run_chain_task(
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: CoreConfig,
    agent: Arc<AgentDefinition>,
    messages: Vec<Message>,
    options: ChainOptions,
    request_id: Uuid,
    cancel: CancellationToken,
) -> Result<String, OrchestratorError> {
    let chain = AgentChain::standard(llm, tools, config);
    let mut ctx = ChainContext::new(request_id, agent.clone(), messages, options, cancel);

    match chain.run(&mut ctx).await {
        Ok(()) => match ctx.final_answer {
            Some(answer) => Ok(answer),
            None => Err(OrchestratorError::ChainAborted {
                agent: agent.name.clone(),
                source: ChainError::EmptyAnswer,
            }),
        },
        Err(ChainError::Cancelled) => Err(OrchestratorError::Cancelled),
        Err(e) => {
            log::warn!(
                "[ORCHESTRATOR] request={} chain aborted for agent '{}': {}",
                request_id,
                agent.name,
                e
            );
            Err(OrchestratorError::ChainAborted {
                agent: agent.name.clone(),
                source: e,
            })
        }
    }
}
