//! LLM-based agent classifier.
//!
//! The router is a pure "classify or fail" unit: it builds a classification
//! prompt from candidate metadata, asks the model, and parses the answer
//! against the candidate set. It never falls back internally — fallback policy
//! belongs to the orchestrator, which keeps the total-coverage guarantee in
//! one auditable place.

use crate::agent::AgentDefinition;
use crate::config::CoreConfig;
use crate::llm::{complete_bounded, CompletionOptions, LlmClient, LlmError, Message};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum RouterError {
    /// The model's answer did not resolve to known identifier(s).
    AmbiguousSelection { answer: String },
    /// The classifier call itself failed (unavailable, timed out, cancelled).
    Llm(LlmError),
    /// Nothing to classify against.
    NoCandidates,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::AmbiguousSelection { answer } => {
                write!(f, "classifier answer did not match any agent: {:?}", answer)
            }
            RouterError::Llm(e) => write!(f, "classifier call failed: {}", e),
            RouterError::NoCandidates => write!(f, "no candidate agents to classify against"),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<LlmError> for RouterError {
    fn from(e: LlmError) -> Self {
        RouterError::Llm(e)
    }
}

impl RouterError {
    /// True when the failure came from the request being cancelled, in which
    /// case the orchestrator must abort instead of falling back.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RouterError::Llm(LlmError::Cancelled))
    }
}

/// LLM classifier over a candidate agent set.
pub struct Router {
    llm: Arc<dyn LlmClient>,
    llm_timeout: Duration,
    max_multi_agents: usize,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>, config: &CoreConfig) -> Self {
        Router {
            llm,
            llm_timeout: config.llm_timeout,
            max_multi_agents: config.max_multi_agents.max(1),
        }
    }

    /// Pick exactly one agent for `request_text`.
    pub async fn select_agent(
        &self,
        request_text: &str,
        candidates: &[Arc<AgentDefinition>],
        cancel: &CancellationToken,
    ) -> Result<Arc<AgentDefinition>, RouterError> {
        if candidates.is_empty() {
            return Err(RouterError::NoCandidates);
        }

        let prompt = build_classifier_prompt(request_text, candidates, 1);
        let answer = self.ask(&prompt, cancel).await?;

        match match_identifier(answer.trim(), candidates) {
            Some(agent) => {
                log::info!("[ROUTER] Selected agent '{}'", agent.name);
                Ok(agent)
            }
            None => {
                log::warn!("[ROUTER] Unmatched classifier answer: {:?}", answer);
                Err(RouterError::AmbiguousSelection { answer })
            }
        }
    }

    /// Pick an ordered, deduplicated set of 1..=max agents for `request_text`.
    pub async fn select_agents(
        &self,
        request_text: &str,
        candidates: &[Arc<AgentDefinition>],
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<AgentDefinition>>, RouterError> {
        if candidates.is_empty() {
            return Err(RouterError::NoCandidates);
        }

        let prompt = build_classifier_prompt(request_text, candidates, self.max_multi_agents);
        let answer = self.ask(&prompt, cancel).await?;

        let mut selected: Vec<Arc<AgentDefinition>> = Vec::new();
        for line in answer.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let agent = match match_identifier(line, candidates) {
                Some(agent) => agent,
                None => {
                    log::warn!("[ROUTER] Unmatched line in multi-select answer: {:?}", line);
                    return Err(RouterError::AmbiguousSelection {
                        answer: answer.clone(),
                    });
                }
            };
            if !selected.iter().any(|a| a.name == agent.name) {
                selected.push(agent);
            }
            if selected.len() == self.max_multi_agents {
                break;
            }
        }

        if selected.is_empty() {
            return Err(RouterError::AmbiguousSelection { answer });
        }
        log::info!(
            "[ROUTER] Selected {} agent(s): {}",
            selected.len(),
            selected
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(selected)
    }

    async fn ask(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, RouterError> {
        let messages = [Message::user(prompt)];
        let options = CompletionOptions {
            // Identifiers only; keep the answer short and boring.
            max_tokens: Some(64),
            temperature: Some(0.0),
        };
        let answer = complete_bounded(
            self.llm.as_ref(),
            &messages,
            &options,
            self.llm_timeout,
            cancel,
        )
        .await?;
        Ok(answer)
    }
}

/// Classification prompt: one block per candidate (name, description,
/// keywords), then the answer-grammar instruction. The model must reply with
/// bare agent names, one per line.
fn build_classifier_prompt(
    request_text: &str,
    candidates: &[Arc<AgentDefinition>],
    max_picks: usize,
) -> String {
    let mut prompt = String::from(
        "You are a request router. Pick the agent(s) best suited to handle the user request.\n\nAgents:\n",
    );
    for agent in candidates {
        prompt.push_str(&format!("- {}: {}", agent.name, agent.description));
        if !agent.meta.keywords.is_empty() {
            prompt.push_str(&format!(" (keywords: {})", agent.meta.keywords.join(", ")));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nUser request:\n{}\n\n", request_text));
    if max_picks == 1 {
        prompt.push_str("Answer with exactly one agent name and nothing else.");
    } else {
        prompt.push_str(&format!(
            "Answer with between 1 and {} agent names, one per line, best match first, and nothing else.",
            max_picks
        ));
    }
    prompt
}

/// Exact match first, then a normalized (lowercase, whitespace-collapsed)
/// match. No substring guessing.
fn match_identifier(
    answer: &str,
    candidates: &[Arc<AgentDefinition>],
) -> Option<Arc<AgentDefinition>> {
    if let Some(agent) = candidates.iter().find(|a| a.matches_identifier(answer)) {
        return Some(agent.clone());
    }
    let normalized = normalize(answer);
    candidates
        .iter()
        .find(|a| {
            normalize(&a.name) == normalized
                || a.meta.aliases.iter().any(|al| normalize(al) == normalized)
        })
        .cloned()
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{ScriptedLlm, UnavailableLlm};

    fn candidates() -> Vec<Arc<AgentDefinition>> {
        vec![
            Arc::new(AgentDefinition::new("leader", "General controller").leader()),
            Arc::new(
                AgentDefinition::new("research", "Web research").with_aliases(&["scholar"]),
            ),
            Arc::new(AgentDefinition::new("finance", "Market data")),
        ]
    }

    fn router_with(llm: Arc<dyn LlmClient>) -> Router {
        Router::new(llm, &CoreConfig::default())
    }

    #[tokio::test]
    async fn test_select_agent_exact_match() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_reply("research");
        let router = router_with(llm);

        let agent = router
            .select_agent("find papers", &candidates(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(agent.name, "research");
    }

    #[tokio::test]
    async fn test_select_agent_normalized_and_alias_match() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_reply("  Scholar \n");
        let router = router_with(llm);

        let agent = router
            .select_agent("find papers", &candidates(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(agent.name, "research");
    }

    #[tokio::test]
    async fn test_select_agent_unmatched_is_ambiguous_not_guess() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_reply("the research one, probably");
        let router = router_with(llm);

        let err = router
            .select_agent("find papers", &candidates(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::AmbiguousSelection { .. }));
    }

    #[tokio::test]
    async fn test_select_agents_dedup_order_and_cap() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_reply("finance\nresearch\nfinance\nleader");
        let router = router_with(llm);

        let agents = router
            .select_agents("everything", &candidates(), &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["finance", "research", "leader"]);
    }

    #[tokio::test]
    async fn test_select_agents_rejects_unknown_identifier() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_reply("finance\nblockchain-wizard");
        let router = router_with(llm);

        let err = router
            .select_agents("hmm", &candidates(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::AmbiguousSelection { .. }));
    }

    #[tokio::test]
    async fn test_classifier_failure_propagates_for_orchestrator_fallback() {
        let router = router_with(Arc::new(UnavailableLlm));
        let err = router
            .select_agent("anything", &candidates(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Llm(LlmError::Unavailable(_))));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_candidate_set() {
        let llm = Arc::new(ScriptedLlm::new());
        let router = router_with(llm);
        let err = router
            .select_agent("anything", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoCandidates));
    }

    #[tokio::test]
    async fn test_prompt_contains_candidate_metadata() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_reply("finance");
        let router = router_with(llm.clone());

        let cands = vec![Arc::new(
            AgentDefinition::new("finance", "Market data").with_keywords(&["price", "token"]),
        )];
        router
            .select_agent("price of X", &cands, &CancellationToken::new())
            .await
            .unwrap();

        let prompt = &llm.call_messages(0).unwrap()[0].content;
        assert!(prompt.contains("finance: Market data"));
        assert!(prompt.contains("keywords: price, token"));
        assert!(prompt.contains("price of X"));
    }
}
