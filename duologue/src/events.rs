//! Typed events emitted by a running conversation.
//!
//! Consumed by the embedding caller (UI, CLI, or test harness); `Done` is
//! the sole completion signal and is emitted exactly once per run.

use serde::{Deserialize, Serialize};

/// Which of the two configured agents is speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    A,
    B,
}

impl Speaker {
    /// The opposite side of the table.
    pub fn peer(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "a"),
            Self::B => write!(f, "b"),
        }
    }
}

/// Everything a run reports back while it executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A sanitized reply from one agent.
    AgentReply { who: Speaker, text: String },

    /// Progress or diagnostic text.
    StatusUpdate { text: String },

    /// Which endpoint served a reply (emitted only when configured).
    EndpointUsed { who: Speaker, url: String },

    /// A mid-run user message accepted into both histories.
    UserInjected { text: String },

    /// Terminal marker; exactly one per run, on every exit path.
    Done,
}

impl TurnEvent {
    /// Stable tag, matching the serialized `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentReply { .. } => "agent_reply",
            Self::StatusUpdate { .. } => "status_update",
            Self::EndpointUsed { .. } => "endpoint_used",
            Self::UserInjected { .. } => "user_injected",
            Self::Done => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_peer() {
        assert_eq!(Speaker::A.peer(), Speaker::B);
        assert_eq!(Speaker::B.peer(), Speaker::A);
    }

    #[test]
    fn test_speaker_display() {
        assert_eq!(Speaker::A.to_string(), "a");
        assert_eq!(Speaker::B.to_string(), "b");
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = TurnEvent::AgentReply {
            who: Speaker::B,
            text: "ok.".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "agent_reply");
        assert_eq!(value["who"], "b");
        assert_eq!(value["text"], "ok.");
    }

    #[test]
    fn test_event_round_trip() {
        let events = vec![
            TurnEvent::StatusUpdate {
                text: "Turn 1/4".to_string(),
            },
            TurnEvent::UserInjected {
                text: "hello".to_string(),
            },
            TurnEvent::Done,
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: TurnEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }

    #[test]
    fn test_event_type_tags() {
        assert_eq!(TurnEvent::Done.event_type(), "done");
        assert_eq!(
            TurnEvent::EndpointUsed {
                who: Speaker::A,
                url: "http://x".to_string()
            }
            .event_type(),
            "endpoint_used"
        );
    }
}
