use std::env;
use std::time::Duration;

/// Core knobs for routing and chain execution.
///
/// Defaults are deliberately small: the ReAct loop is a budgeted fallback, not
/// an open-ended planner.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Maximum ReAct reasoning rounds before a best-effort answer is synthesized.
    pub max_react_steps: usize,
    /// Tool failures tolerated inside one ReAct run before the executor gives up.
    pub max_tool_errors: usize,
    /// Unparseable model turns tolerated before a ReAct run fails.
    pub max_parse_retries: usize,
    /// Upper bound on identifiers the multi-agent classifier may return.
    pub max_multi_agents: usize,
    /// Deadline applied to every individual LLM call.
    pub llm_timeout: Duration,
    /// Record every ReAct state transition at info level.
    pub verbose: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            max_react_steps: 6,
            max_tool_errors: 3,
            max_parse_retries: 2,
            max_multi_agents: 3,
            llm_timeout: Duration::from_secs(30),
            verbose: false,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let defaults = CoreConfig::default();
        CoreConfig {
            max_react_steps: env_usize("SWITCHBOARD_MAX_REACT_STEPS", defaults.max_react_steps),
            max_tool_errors: env_usize("SWITCHBOARD_MAX_TOOL_ERRORS", defaults.max_tool_errors),
            max_parse_retries: env_usize(
                "SWITCHBOARD_MAX_PARSE_RETRIES",
                defaults.max_parse_retries,
            ),
            max_multi_agents: env_usize("SWITCHBOARD_MAX_MULTI_AGENTS", defaults.max_multi_agents),
            llm_timeout: Duration::from_secs(env_u64(
                "SWITCHBOARD_LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )),
            verbose: env::var("SWITCHBOARD_VERBOSE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.verbose),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
