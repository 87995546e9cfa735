//! Three-phase merge protocol — independent answers, cross critique, and
//! merged synthesis across the same two agents.
//!
//! Runs once per question, no looping. A failed call anywhere becomes
//! inline error text and the later phases proceed with it as if it were a
//! real answer; only the final synthesis has a fallback chain so the
//! result is never empty while any draft exists.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{call_with_deadline, ChatTransport, Message};
use crate::config::AgentIdentity;
use crate::sanitize;

/// Per-call deadline for merge phases.
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Sentinel emitted when no phase produced any usable text.
pub const NO_OUTPUT_SENTINEL: &str = "[ERROR: no merged output]";

const ANSWER_SYSTEM: &str = "You are an assistant answering a question.";
const CRITIQUE_SYSTEM: &str = "You are an objective critic.";
const MERGE_SYSTEM: &str = "You are an expert assistant that merges and synthesizes answers.";
const SYNTH_SYSTEM: &str = "You are an expert synthesizer.";

/// Everything the protocol produced, field by field as each phase set it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub question: String,
    pub answer_a: String,
    pub answer_b: String,
    pub critique_a: String,
    pub critique_b: String,
    pub draft_a: String,
    pub draft_b: String,
    pub final_answer: String,
}

/// The answer -> critique -> merge/synthesize protocol over one agent pair.
pub struct MergePipeline {
    transport: Arc<dyn ChatTransport>,
    agent_a: AgentIdentity,
    agent_b: AgentIdentity,
    timeout: Duration,
}

impl MergePipeline {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        agent_a: AgentIdentity,
        agent_b: AgentIdentity,
    ) -> Self {
        Self {
            transport,
            agent_a,
            agent_b,
            timeout: DEFAULT_MERGE_TIMEOUT,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run all three phases for one question.
    pub async fn run(&self, question: &str) -> MergeRecord {
        info!(question, "merge pipeline starting");

        // Phase 1: both agents answer the same neutral prompt. The calls
        // are independent, so they run concurrently.
        let prompt = format!(
            "Phase: initial_answer.\n\
             Instruction: Give your best answer. Be clear, concise, and factual.\n\
             Question: {question}"
        );
        let messages = vec![Message::system(ANSWER_SYSTEM), Message::user(prompt)];
        let (answer_a, answer_b) = tokio::join!(
            self.ask(&self.agent_a, messages.clone()),
            self.ask(&self.agent_b, messages),
        );
        info!(
            answer_a_chars = answer_a.len(),
            answer_b_chars = answer_b.len(),
            "initial answers collected"
        );

        // Phase 2: each agent critiques the other's answer.
        let (critique_a, critique_b) = tokio::join!(
            self.ask(
                &self.agent_a,
                critique_messages(&answer_a, &answer_b),
            ),
            self.ask(
                &self.agent_b,
                critique_messages(&answer_b, &answer_a),
            ),
        );

        // Phase 3: both agents draft a merged answer from the full record.
        let merge_prompt = format!(
            "Phase: final_merge.\n\
             Question: {question}\n\
             Answer A: {answer_a}\n\
             Answer B: {answer_b}\n\
             Critique A: {critique_a}\n\
             Critique B: {critique_b}\n\
             Instruction: Produce a single combined answer that integrates the best \
             ideas from both models, fixes errors, and is clearer and more complete \
             than either answer alone."
        );
        let merge_messages = vec![Message::system(MERGE_SYSTEM), Message::user(merge_prompt)];
        let (draft_a, draft_b) = tokio::join!(
            self.ask(&self.agent_a, merge_messages.clone()),
            self.ask(&self.agent_b, merge_messages),
        );

        // Final synthesis on agent A by convention, with the fallback
        // chain: synthesis -> draft A -> draft B -> sentinel.
        let synth_prompt = format!(
            "Phase: synthesize.\n\
             Instruction: Synthesize the two drafts into one concise final answer \
             and briefly mention any conflicts you resolved.\n\
             Draft A: {draft_a}\n\
             Draft B: {draft_b}"
        );
        let synth_messages = vec![Message::system(SYNTH_SYSTEM), Message::user(synth_prompt)];
        let final_answer = match self.try_ask(&self.agent_a, synth_messages).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("synthesis returned empty text; falling back to drafts");
                pick_draft(&draft_a, &draft_b)
            }
            Err(err) => {
                warn!(error = %err, "synthesis call failed; falling back to drafts");
                pick_draft(&draft_a, &draft_b)
            }
        };
        info!(final_chars = final_answer.len(), "merge pipeline finished");

        MergeRecord {
            question: question.to_string(),
            answer_a,
            answer_b,
            critique_a,
            critique_b,
            draft_a,
            draft_b,
            final_answer,
        }
    }

    /// One call with the shared error policy: failures become inline text
    /// and the pipeline keeps going.
    async fn ask(&self, agent: &AgentIdentity, messages: Vec<Message>) -> String {
        match self.try_ask(agent, messages).await {
            Ok(text) => text,
            Err(err) => {
                warn!(endpoint = %agent.chat_url(), error = %err, "merge call failed");
                err.inline_text()
            }
        }
    }

    async fn try_ask(
        &self,
        agent: &AgentIdentity,
        messages: Vec<Message>,
    ) -> Result<String, crate::client::AgentError> {
        let text = call_with_deadline(
            Arc::clone(&self.transport),
            &agent.chat_url(),
            &agent.model,
            messages,
            agent.params.clone(),
            self.timeout,
        )
        .await?;
        Ok(sanitize::dedupe(&sanitize::strip_artifacts(&text)))
    }
}

fn critique_messages(own: &str, other: &str) -> Vec<Message> {
    let prompt = format!(
        "Phase: critique.\n\
         Instruction: Identify strengths, weaknesses, missing details, and incorrect \
         reasoning in the other model's answer. Be objective and brief.\n\
         Your answer: {own}\n\
         Other answer: {other}"
    );
    vec![Message::system(CRITIQUE_SYSTEM), Message::user(prompt)]
}

fn pick_draft(draft_a: &str, draft_b: &str) -> String {
    if !draft_a.trim().is_empty() {
        draft_a.to_string()
    } else if !draft_b.trim().is_empty() {
        draft_b.to_string()
    } else {
        NO_OUTPUT_SENTINEL.to_string()
    }
}
