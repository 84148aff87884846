//! Bounded ReAct (reason → act → observe) executor.
//!
//! The loop is an explicit state machine so the step budget and cancellation
//! are enforced at a single checkpoint, not scattered through callbacks:
//!
//! ```text
//! Thinking → Acting → Observing → (Thinking | Done | Failed)
//! ```
//!
//! Tool failures are observations fed back to the model, not executor errors,
//! until the error budget runs out. Running out of the step budget is an
//! expected outcome: the executor finishes `Done` with a best-effort answer
//! synthesized from the most recent observation.

use crate::config::CoreConfig;
use crate::llm::{complete_bounded, CompletionOptions, LlmClient, LlmError, Message};
use crate::tools::ToolRegistry;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use strum::Display;
use tokio_util::sync::CancellationToken;

/// The action a reasoning turn settled on.
#[derive(Debug, Clone)]
pub enum ReActAction {
    Tool { name: String, params: Value },
    FinalAnswer(String),
}

/// One completed round of the loop. Steps accumulate in arrival order and are
/// never reordered; they are the audit trail of the run.
#[derive(Debug, Clone)]
pub struct ReActStep {
    pub index: usize,
    pub thought: String,
    pub action: ReActAction,
    /// Flattened tool output, or the structured error text fed back to the
    /// model. `None` for final-answer rounds.
    pub observation: Option<String>,
    pub observation_is_error: bool,
    pub observed_at: DateTime<Utc>,
}

/// Terminal result of a ReAct run.
#[derive(Debug)]
pub struct ReActOutcome {
    pub answer: String,
    pub steps: Vec<ReActStep>,
    /// True when the step budget ran out and `answer` is best-effort.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub enum ReactError {
    Llm(LlmError),
    /// The model kept producing unparseable turns past the retry budget.
    ParseBudgetExceeded { last_answer: String },
    /// Tools kept failing past the error budget.
    ToolBudgetExceeded { last_error: String },
    Cancelled,
}

impl fmt::Display for ReactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactError::Llm(e) => write!(f, "reasoning call failed: {}", e),
            ReactError::ParseBudgetExceeded { last_answer } => write!(
                f,
                "model output stayed unparseable past the retry budget; last answer: {:?}",
                truncate(last_answer, 120)
            ),
            ReactError::ToolBudgetExceeded { last_error } => {
                write!(f, "tool error budget exceeded; last error: {}", last_error)
            }
            ReactError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for ReactError {}

/// Loop states. `Acting` and `Observing` carry the data of the round in
/// flight so the transition function owns all control flow.
#[derive(Display)]
#[strum(serialize_all = "UPPERCASE")]
enum ExecState {
    Thinking,
    Acting {
        thought: String,
        tool: String,
        params: Value,
    },
    Observing {
        thought: String,
        tool: String,
        params: Value,
        observation: String,
        is_error: bool,
    },
}

enum Control {
    Continue(ExecState),
    Finished(ReActOutcome),
}

/// Bounded reasoning/acting executor over an LLM and a tool registry.
pub struct ReActExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: CoreConfig,
}

struct RunState {
    steps: Vec<ReActStep>,
    thinking_retries: usize,
    tool_errors: usize,
    /// Feedback injected into the next prompt after a malformed turn or an
    /// upstream model error.
    corrective: Option<String>,
}

impl ReActExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: CoreConfig) -> Self {
        ReActExecutor { llm, tools, config }
    }

    /// Run the loop over `messages` until a final answer, the step budget, or
    /// a budget-exceeding failure.
    pub async fn run(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ReActOutcome, ReactError> {
        let mut run = RunState {
            steps: Vec::new(),
            thinking_retries: 0,
            tool_errors: 0,
            corrective: None,
        };
        let mut state = ExecState::Thinking;

        loop {
            // The single checkpoint: every transition passes through here.
            if cancel.is_cancelled() {
                return Err(ReactError::Cancelled);
            }
            if self.config.verbose {
                log::info!(
                    "[REACT] state={} completed_steps={} tool_errors={}",
                    state,
                    run.steps.len(),
                    run.tool_errors
                );
            }
            match self.advance(state, &mut run, messages, cancel).await? {
                Control::Continue(next) => state = next,
                Control::Finished(outcome) => return Ok(outcome),
            }
        }
    }

    async fn advance(
        &self,
        state: ExecState,
        run: &mut RunState,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Control, ReactError> {
        match state {
            ExecState::Thinking => self.think(run, messages, cancel).await,
            ExecState::Acting {
                thought,
                tool,
                params,
            } => self.act(run, thought, tool, params).await,
            ExecState::Observing {
                thought,
                tool,
                params,
                observation,
                is_error,
            } => {
                run.steps.push(ReActStep {
                    index: run.steps.len(),
                    thought,
                    action: ReActAction::Tool { name: tool, params },
                    observation: Some(observation),
                    observation_is_error: is_error,
                    observed_at: Utc::now(),
                });
                Ok(Control::Continue(ExecState::Thinking))
            }
        }
    }

    async fn think(
        &self,
        run: &mut RunState,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Control, ReactError> {
        if run.steps.len() >= self.config.max_react_steps {
            log::info!(
                "[REACT] Step budget of {} reached; synthesizing best-effort answer",
                self.config.max_react_steps
            );
            return Ok(Control::Finished(self.best_effort_outcome(run)));
        }

        let transcript = self.build_transcript(messages, run);
        let options = CompletionOptions::default();
        let answer = match complete_bounded(
            self.llm.as_ref(),
            &transcript,
            &options,
            self.config.llm_timeout,
            cancel,
        )
        .await
        {
            Ok(answer) => answer,
            Err(LlmError::Cancelled) => return Err(ReactError::Cancelled),
            Err(e) => {
                // A timeout here behaves exactly like any other step-level
                // model failure: bounded retry, then propagate.
                run.thinking_retries += 1;
                if run.thinking_retries > self.config.max_parse_retries {
                    return Err(ReactError::Llm(e));
                }
                log::warn!(
                    "[REACT] Reasoning call failed ({}); retry {}/{}",
                    e,
                    run.thinking_retries,
                    self.config.max_parse_retries
                );
                return Ok(Control::Continue(ExecState::Thinking));
            }
        };

        match parse_turn(&answer) {
            Some(ParsedTurn {
                thought,
                action: ReActAction::FinalAnswer(final_answer),
            }) => {
                run.steps.push(ReActStep {
                    index: run.steps.len(),
                    thought,
                    action: ReActAction::FinalAnswer(final_answer.clone()),
                    observation: None,
                    observation_is_error: false,
                    observed_at: Utc::now(),
                });
                Ok(Control::Finished(ReActOutcome {
                    answer: final_answer,
                    steps: std::mem::take(&mut run.steps),
                    exhausted: false,
                }))
            }
            Some(ParsedTurn {
                thought,
                action: ReActAction::Tool { name, params },
            }) => {
                run.corrective = None;
                Ok(Control::Continue(ExecState::Acting {
                    thought,
                    tool: name,
                    params,
                }))
            }
            None => {
                run.thinking_retries += 1;
                if run.thinking_retries > self.config.max_parse_retries {
                    return Err(ReactError::ParseBudgetExceeded {
                        last_answer: answer,
                    });
                }
                log::warn!(
                    "[REACT] Unparseable model turn; retry {}/{}",
                    run.thinking_retries,
                    self.config.max_parse_retries
                );
                run.corrective = Some(
                    "Your previous reply was not a single valid JSON object. \
                     Reply with exactly one JSON object per the required format."
                        .to_string(),
                );
                Ok(Control::Continue(ExecState::Thinking))
            }
        }
    }

    async fn act(
        &self,
        run: &mut RunState,
        thought: String,
        tool: String,
        params: Value,
    ) -> Result<Control, ReactError> {
        match self.tools.invoke(&tool, params.clone()).await {
            Ok(result) => Ok(Control::Continue(ExecState::Observing {
                thought,
                tool,
                params,
                observation: result.display_text(),
                is_error: false,
            })),
            Err(tool_error) => {
                run.tool_errors += 1;
                let error_text = tool_error.to_string();
                if run.tool_errors > self.config.max_tool_errors {
                    log::warn!(
                        "[REACT] Tool error budget of {} exceeded by '{}'",
                        self.config.max_tool_errors,
                        tool_error.tool_name()
                    );
                    return Err(ReactError::ToolBudgetExceeded {
                        last_error: error_text,
                    });
                }
                // The failure goes back to the model as an observation, not up
                // to the caller.
                log::info!(
                    "[REACT] Tool error {}/{} fed back as observation: {}",
                    run.tool_errors,
                    self.config.max_tool_errors,
                    error_text
                );
                Ok(Control::Continue(ExecState::Observing {
                    thought,
                    tool,
                    params,
                    observation: format!("ERROR: {}", error_text),
                    is_error: true,
                }))
            }
        }
    }

    fn best_effort_outcome(&self, run: &mut RunState) -> ReActOutcome {
        let last_observation = run
            .steps
            .iter()
            .rev()
            .find_map(|s| s.observation.as_deref().filter(|_| !s.observation_is_error));
        let answer = match last_observation {
            Some(obs) => format!(
                "I could not fully complete the task within the reasoning budget. \
                 Based on the most recent result: {}",
                obs
            ),
            None => {
                "I could not complete the task within the reasoning budget and no usable \
                 tool results were collected."
                    .to_string()
            }
        };
        ReActOutcome {
            answer,
            steps: std::mem::take(&mut run.steps),
            exhausted: true,
        }
    }

    fn build_transcript(&self, messages: &[Message], run: &RunState) -> Vec<Message> {
        let mut transcript = Vec::with_capacity(messages.len() + 2);
        transcript.push(Message::system(self.system_prompt()));
        transcript.extend_from_slice(messages);

        let mut scratchpad = String::new();
        for step in &run.steps {
            if let ReActAction::Tool { name, params } = &step.action {
                scratchpad.push_str(&format!(
                    "Thought: {}\nAction: {}[{}]\nObservation: {}\n\n",
                    step.thought,
                    name,
                    params,
                    step.observation.as_deref().unwrap_or("")
                ));
            }
        }
        if let Some(corrective) = &run.corrective {
            scratchpad.push_str(corrective);
            scratchpad.push_str("\n\n");
        }
        scratchpad.push_str("Reply with the next JSON object.");
        transcript.push(Message::user(scratchpad));
        transcript
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You solve the user's request step by step, using tools when needed.\n\nTools:\n",
        );
        for def in self.tools.definitions() {
            prompt.push_str(&format!(
                "- {}: {} (parameters: {})\n",
                def.name, def.description, def.parameters
            ));
        }
        prompt.push_str(
            "\nEvery reply must be exactly one JSON object in one of two forms:\n\
             {\"thought\": \"...\", \"action\": {\"tool\": \"<name>\", \"params\": {...}}}\n\
             {\"thought\": \"...\", \"final_answer\": \"...\"}\n",
        );
        prompt
    }
}

struct ParsedTurn {
    thought: String,
    action: ReActAction,
}

#[derive(Deserialize)]
struct RawTurn {
    #[serde(default)]
    thought: String,
    action: Option<RawAction>,
    final_answer: Option<String>,
}

#[derive(Deserialize)]
struct RawAction {
    tool: String,
    #[serde(default)]
    params: Value,
}

static JSON_BLOCK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid regex"));

/// Parse a model turn into a thought + action.
///
/// Extraction ladder: direct JSON parse, then a fenced ```json block, then the
/// first balanced `{...}` span anywhere in the content. Anything else is
/// malformed and counts against the retry budget.
fn parse_turn(content: &str) -> Option<ParsedTurn> {
    let content = content.trim();

    if let Some(turn) = try_raw_turn(content) {
        return Some(turn);
    }

    if let Some(captures) = JSON_BLOCK_PATTERN.captures(content) {
        if let Some(block) = captures.get(1) {
            if let Some(turn) = try_raw_turn(block.as_str().trim()) {
                return Some(turn);
            }
        }
    }

    if let Some(start) = content.find('{') {
        if let Some(extracted) = extract_balanced_json(content, start) {
            if let Some(turn) = try_raw_turn(&extracted) {
                return Some(turn);
            }
        }
    }

    None
}

fn try_raw_turn(content: &str) -> Option<ParsedTurn> {
    let raw: RawTurn = serde_json::from_str(content).ok()?;
    if let Some(final_answer) = raw.final_answer {
        return Some(ParsedTurn {
            thought: raw.thought,
            action: ReActAction::FinalAnswer(final_answer),
        });
    }
    let action = raw.action?;
    let params = match action.params {
        Value::Null => serde_json::json!({}),
        other => other,
    };
    Some(ParsedTurn {
        thought: raw.thought,
        action: ReActAction::Tool {
            name: action.tool,
            params,
        },
    })
}

fn extract_balanced_json(content: &str, start: usize) -> Option<String> {
    let mut depth = 0;
    let mut end = start;

    for (i, c) in content[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if end > start && depth == 0 {
        Some(content[start..end].to_string())
    } else {
        None
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
