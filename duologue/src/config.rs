//! Run configuration — agent identities, sampling parameters, and the
//! per-run conversation settings supplied by the embedding caller.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::Speaker;

/// Path appended to an agent's base URL when no override is configured.
pub const DEFAULT_CHAT_PATH: &str = "/api/chat";

/// Per-call deadline enforced by the scheduler.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors that prevent a run from starting.
///
/// Surfaced by [`ConversationConfig::validate`] before any run state is
/// created; a run that has started never produces these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("discussion topic must not be empty")]
    EmptyTopic,

    #[error("turn count must be at least 1")]
    NoRounds,

    #[error("agent {0} has no endpoint URL")]
    MissingEndpoint(String),

    #[error("agent {0} has no model name")]
    MissingModel(String),
}

/// Sampling parameters forwarded on the wire with each chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    /// Stop sequences, omitted from the request when unset.
    pub stop: Option<Vec<String>>,
    /// Forwarded verbatim; the client still collects the full text.
    pub stream: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            top_p: 1.0,
            stop: None,
            stream: false,
        }
    }
}

/// One configured participant: endpoint, model, and sampling identity.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Display name, also used for transcript lines.
    pub name: String,
    /// Base URL of the chat endpoint (scheme + host + port).
    pub endpoint: String,
    /// Optional path override appended to the base URL instead of
    /// [`DEFAULT_CHAT_PATH`].
    pub api_path: Option<String>,
    /// Model name sent in the request body.
    pub model: String,
    /// Assembled persona text appended to the system prompt.
    pub persona: Option<String>,
    pub params: SamplingParams,
    /// Character budget for this agent's replies (no limit when unset).
    pub max_chars: Option<usize>,
}

impl AgentIdentity {
    pub fn new(name: &str, endpoint: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            api_path: None,
            model: model.to_string(),
            persona: None,
            params: SamplingParams::default(),
            max_chars: None,
        }
    }

    /// Set the persona text.
    pub fn with_persona(mut self, persona: &str) -> Self {
        self.persona = Some(persona.to_string());
        self
    }

    /// Set an API path override.
    pub fn with_api_path(mut self, path: &str) -> Self {
        self.api_path = Some(path.to_string());
        self
    }

    /// Set the reply character budget.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }

    /// Full chat URL: base endpoint joined with the configured or default
    /// API path, with `/` normalized between the two.
    pub fn chat_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let path = self.api_path.as_deref().unwrap_or(DEFAULT_CHAT_PATH);
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Assemble a persona string from its optional pieces, `" | "`-joined.
pub fn build_persona(
    base: Option<&str>,
    age: Option<&str>,
    background: Option<&str>,
    quirk: Option<&str>,
) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(base) = base {
        if !base.trim().is_empty() {
            parts.push(base.trim().to_string());
        }
    }
    if let Some(age) = age {
        parts.push(format!("Age: {age}"));
    }
    if let Some(background) = background {
        parts.push(format!("Background: {background}"));
    }
    if let Some(quirk) = quirk {
        parts.push(format!("Quirk: {quirk}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

/// Everything a single run needs, created once before `start` and
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Discussion topic both agents are steered toward.
    pub topic: String,
    /// Number of rounds; each round is one B-then-A reply pair.
    pub turns: u32,
    /// Inter-turn delay, interruptible by cancellation.
    pub delay: Duration,
    pub agent_a: AgentIdentity,
    pub agent_b: AgentIdentity,
    /// Prefer a single complete first sentence over the char budget.
    pub short_turn: bool,
    /// Conversational register: short human-style system instruction and
    /// a greeting-style opening prompt.
    pub humanize: bool,
    /// Explicit opening prompt; overrides the humanize/topic defaults.
    pub greeting: Option<String>,
    /// Append-only transcript target (disabled when unset).
    pub log_path: Option<PathBuf>,
    /// Apply the topic-adherence corrective retry after each reply.
    pub enforce_topic: bool,
    /// Emit an `EndpointUsed` event after each reply.
    pub announce_endpoints: bool,
    /// Deadline for each individual agent call.
    pub call_timeout: Duration,
}

impl ConversationConfig {
    pub fn new(topic: &str, agent_a: AgentIdentity, agent_b: AgentIdentity) -> Self {
        Self {
            topic: topic.to_string(),
            turns: 4,
            delay: Duration::from_secs(1),
            agent_a,
            agent_b,
            short_turn: false,
            humanize: false,
            greeting: None,
            log_path: None,
            enforce_topic: false,
            announce_endpoints: false,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// The identity speaking for the given side.
    pub fn agent(&self, speaker: Speaker) -> &AgentIdentity {
        match speaker {
            Speaker::A => &self.agent_a,
            Speaker::B => &self.agent_b,
        }
    }

    /// Check the parameters a run cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.turns == 0 {
            return Err(ConfigError::NoRounds);
        }
        for agent in [&self.agent_a, &self.agent_b] {
            if agent.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingEndpoint(agent.name.clone()));
            }
            if agent.model.trim().is_empty() {
                return Err(ConfigError::MissingModel(agent.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> AgentIdentity {
        AgentIdentity::new("Alpha", "http://localhost:11434", "llama2")
    }

    fn config_pair() -> ConversationConfig {
        ConversationConfig::new(
            "tea",
            AgentIdentity::new("Alpha", "http://localhost:11434", "llama2"),
            AgentIdentity::new("Beta", "http://localhost:11434", "llama2"),
        )
    }

    #[test]
    fn test_chat_url_default_path() {
        assert_eq!(identity().chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_chat_url_trailing_slash() {
        let agent = AgentIdentity::new("Alpha", "http://localhost:11434/", "llama2");
        assert_eq!(agent.chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_chat_url_api_path_override() {
        let agent = identity().with_api_path("v1/chat/completions");
        assert_eq!(
            agent.chat_url(),
            "http://localhost:11434/v1/chat/completions"
        );

        let agent = identity().with_api_path("/v1/chat/completions");
        assert_eq!(
            agent.chat_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_build_persona_all_parts() {
        let persona = build_persona(
            Some("A cheerful historian"),
            Some("42"),
            Some("naval history"),
            Some("quotes dates constantly"),
        )
        .unwrap();
        assert_eq!(
            persona,
            "A cheerful historian | Age: 42 | Background: naval history | Quirk: quotes dates constantly"
        );
    }

    #[test]
    fn test_build_persona_empty() {
        assert_eq!(build_persona(None, None, None, None), None);
        assert_eq!(build_persona(Some("   "), None, None, None), None);
    }

    #[test]
    fn test_validate_ok() {
        assert!(config_pair().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_topic() {
        let mut config = config_pair();
        config.topic = "  ".to_string();
        assert_eq!(config.validate().unwrap_err(), ConfigError::EmptyTopic);
    }

    #[test]
    fn test_validate_zero_turns() {
        let mut config = config_pair();
        config.turns = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::NoRounds);
    }

    #[test]
    fn test_validate_missing_endpoint() {
        let mut config = config_pair();
        config.agent_b.endpoint = String::new();
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::MissingEndpoint("Beta".to_string())
        );
    }

    #[test]
    fn test_validate_missing_model() {
        let mut config = config_pair();
        config.agent_a.model = "  ".to_string();
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::MissingModel("Alpha".to_string())
        );
    }

    #[test]
    fn test_sampling_defaults() {
        let params = SamplingParams::default();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 512);
        assert_eq!(params.top_p, 1.0);
        assert!(params.stop.is_none());
        assert!(!params.stream);
    }
}
