//! Scripted transport double shared by the integration tests.
//!
//! Replies are keyed by full chat URL: one-shot outcomes queue ahead of a
//! fixed per-endpoint reply; an endpoint with neither configured fails as
//! unreachable. Every call is recorded for assertions.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use duologue::{AgentError, AgentIdentity, ChatTransport, Message, SamplingParams};

pub const A_CHAT: &str = "http://a.test/api/chat";
pub const B_CHAT: &str = "http://b.test/api/chat";

pub fn agent_a() -> AgentIdentity {
    AgentIdentity::new("Alpha", "http://a.test", "test-model")
}

pub fn agent_b() -> AgentIdentity {
    AgentIdentity::new("Beta", "http://b.test", "test-model")
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub model: String,
    pub messages: Vec<Message>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<String, AgentError>>>>,
    fixed: Mutex<HashMap<String, String>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constant reply for an endpoint, used whenever its queue is empty.
    pub fn set_reply(&self, endpoint: &str, reply: &str) {
        self.fixed
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), reply.to_string());
    }

    /// One-shot reply consumed ahead of the fixed reply.
    pub fn queue_reply(&self, endpoint: &str, reply: &str) {
        self.queued
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Ok(reply.to_string()));
    }

    /// One-shot failure consumed ahead of the fixed reply.
    pub fn queue_failure(&self, endpoint: &str, err: AgentError) {
        self.queued
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Err(err));
    }

    /// Simulated service latency before an endpoint answers.
    pub fn set_delay(&self, endpoint: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(
        &self,
        endpoint: &str,
        model: &str,
        messages: &[Message],
        _params: &SamplingParams,
    ) -> Result<String, AgentError> {
        self.calls.lock().unwrap().push(RecordedCall {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            messages: messages.to_vec(),
        });

        let delay = self.delays.lock().unwrap().get(endpoint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(queue) = self.queued.lock().unwrap().get_mut(endpoint) {
            if let Some(outcome) = queue.pop_front() {
                return outcome;
            }
        }
        if let Some(reply) = self.fixed.lock().unwrap().get(endpoint) {
            return Ok(reply.clone());
        }
        Err(AgentError::Unreachable {
            endpoint: endpoint.to_string(),
            detail: "no scripted reply".to_string(),
        })
    }
}
