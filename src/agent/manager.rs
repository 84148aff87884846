use super::AgentDefinition;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Bootstrap-time registry error. Fatal to startup.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// The agent's name or one of its aliases collides with an existing entry.
    DuplicateAgent {
        name: String,
        conflicts_with: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateAgent {
                name,
                conflicts_with,
            } => write!(
                f,
                "cannot register agent '{}': identifier collides with '{}'",
                name, conflicts_with
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

/// In-memory agent registry.
///
/// Registration happens during a single-threaded startup phase (`&mut self`),
/// after which the manager is shared behind an `Arc` and read without locking.
/// The only interior mutability is the retained starter handles.
pub struct AgentManager {
    /// Registration order is load-bearing: it is the tie-break for
    /// classification and keyword matching.
    agents: Vec<Arc<AgentDefinition>>,
    bootstrapped: AtomicBool,
    starter_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentManager {
    pub fn new() -> Self {
        AgentManager {
            agents: Vec::new(),
            bootstrapped: AtomicBool::new(false),
            starter_handles: Mutex::new(Vec::new()),
        }
    }

    /// Register an agent. Every identifier (name and aliases) must be unique
    /// across the registry, case-insensitively.
    pub fn register(&mut self, agent: AgentDefinition) -> Result<(), RegistryError> {
        let mut incoming: HashSet<String> = HashSet::new();
        incoming.insert(agent.name.to_lowercase());
        for alias in &agent.meta.aliases {
            incoming.insert(alias.to_lowercase());
        }

        for existing in &self.agents {
            let mut taken: Vec<String> = vec![existing.name.to_lowercase()];
            taken.extend(existing.meta.aliases.iter().map(|a| a.to_lowercase()));
            if taken.iter().any(|id| incoming.contains(id)) {
                return Err(RegistryError::DuplicateAgent {
                    name: agent.name.clone(),
                    conflicts_with: existing.name.clone(),
                });
            }
        }

        log::info!("[REGISTRY] Registered agent '{}'", agent.name);
        self.agents.push(Arc::new(agent));
        Ok(())
    }

    /// Resolve an identifier: exact name first, then alias, case-insensitively.
    /// A miss is an expected outcome, not an error.
    pub fn get(&self, identifier: &str) -> Option<Arc<AgentDefinition>> {
        self.agents
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(identifier))
            .or_else(|| {
                self.agents.iter().find(|a| {
                    a.meta
                        .aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(identifier))
                })
            })
            .cloned()
    }

    /// All agents in registration order.
    pub fn list_all(&self) -> Vec<Arc<AgentDefinition>> {
        self.agents.clone()
    }

    /// Agents whose keyword set intersects the tokens of `text`, ordered by
    /// match count descending, then registration order.
    pub fn keyword_match(&self, text: &str) -> Vec<Arc<AgentDefinition>> {
        let tokens: HashSet<String> = tokenize(text).into_iter().collect();

        let mut scored: Vec<(usize, Arc<AgentDefinition>)> = self
            .agents
            .iter()
            .filter_map(|agent| {
                let hits = agent
                    .meta
                    .keywords
                    .iter()
                    .filter(|k| tokens.contains(&k.to_lowercase()))
                    .count();
                if hits > 0 {
                    Some((hits, agent.clone()))
                } else {
                    None
                }
            })
            .collect();

        // Stable sort keeps registration order within equal match counts.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, agent)| agent).collect()
    }

    /// The distinguished fallback agent: first registered with the leader flag.
    pub fn leader(&self) -> Option<Arc<AgentDefinition>> {
        self.agents.iter().find(|a| a.meta.leader).cloned()
    }

    /// Run every agent's starter exactly once and retain the spawned handles.
    /// Calling bootstrap a second time is a no-op.
    pub async fn bootstrap(&self) {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            log::warn!("[REGISTRY] bootstrap() called twice; ignoring");
            return;
        }

        for agent in &self.agents {
            if let Some(starter) = &agent.starter {
                let handles = starter.start().await;
                if !handles.is_empty() {
                    log::info!(
                        "[REGISTRY] Agent '{}' spawned {} sub-resource(s)",
                        agent.name,
                        handles.len()
                    );
                }
                self.starter_handles.lock().extend(handles);
            }
        }
    }

    /// Abort every retained sub-resource handle.
    pub fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.starter_handles.lock());
        for handle in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            log::info!("[REGISTRY] Aborted {} sub-resource(s)", handles.len());
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentManager {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStarter;
    use async_trait::async_trait;

    fn fixture_manager() -> AgentManager {
        let mut manager = AgentManager::new();
        manager
            .register(
                AgentDefinition::new("leader", "General-purpose system controller")
                    .with_keywords(&["help", "general"])
                    .leader(),
            )
            .unwrap();
        manager
            .register(
                AgentDefinition::new("research", "Looks things up on the web")
                    .with_keywords(&["search", "web", "paper"])
                    .with_aliases(&["scholar"]),
            )
            .unwrap();
        manager
            .register(
                AgentDefinition::new("finance", "Prices, portfolios, markets")
                    .with_keywords(&["price", "market", "token"]),
            )
            .unwrap();
        manager
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut manager = fixture_manager();
        let err = manager
            .register(AgentDefinition::new("Research", "dup"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgent { .. }));
    }

    #[test]
    fn test_alias_collision_rejected() {
        let mut manager = fixture_manager();
        // Alias colliding with an existing name
        let err = manager
            .register(AgentDefinition::new("other", "x").with_aliases(&["FINANCE"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgent { .. }));
        // Name colliding with an existing alias
        let err = manager
            .register(AgentDefinition::new("Scholar", "x"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgent { .. }));
    }

    #[test]
    fn test_get_name_before_alias_case_insensitive() {
        let manager = fixture_manager();
        assert_eq!(manager.get("RESEARCH").unwrap().name, "research");
        assert_eq!(manager.get("scholar").unwrap().name, "research");
        assert!(manager.get("unknown").is_none());
    }

    #[test]
    fn test_list_all_registration_order() {
        let manager = fixture_manager();
        let names: Vec<String> = manager.list_all().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["leader", "research", "finance"]);
    }

    #[test]
    fn test_keyword_match_ordering() {
        let manager = fixture_manager();
        // Two research keywords, one finance keyword
        let matched = manager.keyword_match("search the web for the token whitepaper");
        let names: Vec<String> = matched.iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["research", "finance"]);
    }

    #[test]
    fn test_keyword_match_tie_break_is_registration_order() {
        let manager = fixture_manager();
        let matched = manager.keyword_match("help me check a price");
        let names: Vec<String> = matched.iter().map(|a| a.name.clone()).collect();
        // One hit each; leader registered first.
        assert_eq!(names, vec!["leader", "finance"]);
    }

    #[test]
    fn test_leader_lookup() {
        let manager = fixture_manager();
        assert_eq!(manager.leader().unwrap().name, "leader");
        assert!(AgentManager::new().leader().is_none());
    }

    struct CountingStarter {
        spawned: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl AgentStarter for CountingStarter {
        async fn start(&self) -> Vec<JoinHandle<()>> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            vec![tokio::spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            })]
        }
    }

    #[tokio::test]
    async fn test_bootstrap_runs_starters_exactly_once() {
        let spawned = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut manager = AgentManager::new();
        manager
            .register(
                AgentDefinition::new("leader", "controller")
                    .leader()
                    .with_starter(Arc::new(CountingStarter {
                        spawned: spawned.clone(),
                    })),
            )
            .unwrap();

        manager.bootstrap().await;
        manager.bootstrap().await;
        assert_eq!(spawned.load(Ordering::SeqCst), 1);

        manager.shutdown();
    }
}
