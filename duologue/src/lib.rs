//! duologue — turn-based dialogue orchestration for paired model agents.
//!
//! Drives an alternating conversation between two independently hosted
//! chat endpoints: per-call deadlines, reply sanitization, optional
//! topic-adherence enforcement, mid-run message injection, and a typed
//! event stream that always ends in exactly one `Done`. A separate
//! three-phase merge protocol (independent answers -> cross critique ->
//! merged synthesis) combines both agents' answers to one question into a
//! single result.
//!
//! The embedding caller supplies a [`ConversationConfig`], consumes
//! [`TurnEvent`]s from the [`RunHandle`], and may inject user messages
//! while the run is active. Everything else — UI, persistence, model
//! management — lives outside this crate.

pub mod client;
pub mod config;
pub mod events;
pub mod merge;
pub mod sanitize;
pub mod scheduler;
pub mod topic;
pub mod transcript;

pub use client::{AgentError, ChatTransport, HttpAgentClient, Message, Role};
pub use config::{build_persona, AgentIdentity, ConfigError, ConversationConfig, SamplingParams};
pub use events::{Speaker, TurnEvent};
pub use merge::{MergePipeline, MergeRecord};
pub use sanitize::TruncationPolicy;
pub use scheduler::{RunHandle, RunOutcome, RunPhase, TurnScheduler};
