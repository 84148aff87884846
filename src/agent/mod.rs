//! Agent definitions and the registry that owns them.
//!
//! An agent is a named, described capability unit. Agents are registered once
//! during single-threaded startup and are immutable afterwards; the
//! [`manager::AgentManager`] owns them for process lifetime.

pub mod manager;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub use manager::{AgentManager, RegistryError};

/// Async initializer run once at bootstrap. Returns handles for any background
/// sub-resources it spawned; the manager retains them for shutdown.
#[async_trait]
pub trait AgentStarter: Send + Sync {
    async fn start(&self) -> Vec<JoinHandle<()>>;
}

/// Structural metadata used for classification and lookup.
#[derive(Debug, Clone, Default)]
pub struct AgentMeta {
    /// Lexical match tokens for [`AgentManager::keyword_match`].
    pub keywords: Vec<String>,
    /// Alternate names accepted by [`AgentManager::get`].
    pub aliases: Vec<String>,
    /// Marks the default/system controller used as the fallback of last resort.
    pub leader: bool,
}

/// A registered agent: fixed metadata plus an optional startup hook.
pub struct AgentDefinition {
    pub name: String,
    /// Free text shown to the LLM classifier.
    pub description: String,
    pub meta: AgentMeta,
    pub starter: Option<Arc<dyn AgentStarter>>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        AgentDefinition {
            name: name.into(),
            description: description.into(),
            meta: AgentMeta::default(),
            starter: None,
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.meta.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.meta.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn leader(mut self) -> Self {
        self.meta.leader = true;
        self
    }

    pub fn with_starter(mut self, starter: Arc<dyn AgentStarter>) -> Self {
        self.starter = Some(starter);
        self
    }

    /// True when `identifier` equals the agent's name or any alias,
    /// case-insensitively.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.name.eq_ignore_ascii_case(identifier)
            || self
                .meta
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(identifier))
    }
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("meta", &self.meta)
            .field("has_starter", &self.starter.is_some())
            .finish()
    }
}
