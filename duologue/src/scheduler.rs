//! Turn scheduler — drives the alternating two-agent loop.
//!
//! One background task per run: seeds both histories, executes B-then-A
//! rounds with per-call deadlines, applies sanitization and optional
//! topic enforcement, drains injected user messages, and emits a typed
//! event stream ending in exactly one `Done`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{call_with_deadline, ChatTransport, Message, Role};
use crate::config::{AgentIdentity, ConfigError, ConversationConfig};
use crate::events::{Speaker, TurnEvent};
use crate::sanitize::{self, TruncationPolicy};
use crate::topic;
use crate::transcript::Transcript;

/// Capacity of the mid-run injection queue; pushes beyond it are dropped.
pub const INJECT_QUEUE_CAPACITY: usize = 32;

const SYSTEM_INSTRUCTION: &str = "Important: In every reply, explicitly reference the \
     discussion topic and keep responses focused on it. Begin each response by briefly \
     restating the topic and avoid unrelated tangents. Always respond in complete \
     sentences. Do not use sentence fragments or single-word replies; each response \
     should be a full sentence ending with appropriate punctuation.";

const HUMANIZE_INSTRUCTION: &str = "Speak like a friendly human: keep replies short, \
     natural, use contractions and greetings, and occasionally use small talk.";

const DEFAULT_HUMANIZE_GREETING: &str = "Hello, how are you?";

/// Phase of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Created but not started.
    Idle,
    /// Executing rounds.
    Running,
    /// Cancellation observed; finishing the current sub-step.
    Stopping,
    /// Ended by cancellation.
    Stopped,
    /// All rounds executed.
    Completed,
    /// Ended by an internal error.
    Failed,
}

impl RunPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [RunPhase] {
        match self {
            Self::Idle => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Stopping, Self::Completed, Self::Failed],
            Self::Stopping => &[Self::Stopped, Self::Failed],
            Self::Stopped | Self::Completed | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A recorded phase change.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PhaseTransition {
    pub from: RunPhase,
    pub to: RunPhase,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Error for a phase change the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: RunPhase,
    pub to: RunPhase,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid run transition {} -> {} (allowed: {:?})",
            self.from,
            self.to,
            self.from.valid_transitions()
        )
    }
}

impl std::error::Error for TransitionError {}

/// Mutable state owned exclusively by one run task.
#[derive(Debug, Clone)]
pub struct RunState {
    pub history_a: Vec<Message>,
    pub history_b: Vec<Message>,
    /// Current round, 1-indexed; 0 before the first round starts.
    pub round: u32,
    pub phase: RunPhase,
    pub transitions: Vec<PhaseTransition>,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    /// Seed both histories: per-agent system prompt, then the shared
    /// opening prompt as a `user` turn on both sides so both agents open
    /// by answering the same text.
    fn new(config: &ConversationConfig) -> Self {
        let sys_a = system_prompt(config, &config.agent_a, &config.agent_b);
        let sys_b = system_prompt(config, &config.agent_b, &config.agent_a);
        let opening = initial_prompt(config);

        let history_a = vec![Message::system(sys_a), Message::user(opening.clone())];
        let history_b = vec![Message::system(sys_b), Message::user(opening)];

        Self {
            history_a,
            history_b,
            round: 0,
            phase: RunPhase::Idle,
            transitions: Vec::new(),
            started_at: Utc::now(),
        }
    }

    fn history(&self, speaker: Speaker) -> &[Message] {
        match speaker {
            Speaker::A => &self.history_a,
            Speaker::B => &self.history_b,
        }
    }

    fn history_mut(&mut self, speaker: Speaker) -> &mut Vec<Message> {
        match speaker {
            Speaker::A => &mut self.history_a,
            Speaker::B => &mut self.history_b,
        }
    }

    /// Record an accepted reply: assistant turn for the speaker, user
    /// turn for the peer.
    fn record_reply(&mut self, speaker: Speaker, text: &str) {
        self.history_mut(speaker).push(Message::assistant(text));
        self.history_mut(speaker.peer()).push(Message::user(text));
    }

    fn transition(&mut self, to: RunPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }
        debug!(from = %self.phase, to = %to, reason, "run phase change");
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }
}

fn system_prompt(config: &ConversationConfig, me: &AgentIdentity, peer: &AgentIdentity) -> String {
    let mut parts = vec![
        SYSTEM_INSTRUCTION.to_string(),
        format!("You are {}.", me.name),
        format!("Discuss '{}' with {}.", config.topic, peer.name),
    ];
    if let Some(persona) = &me.persona {
        parts.push(persona.clone());
    }
    if config.humanize {
        parts.push(HUMANIZE_INSTRUCTION.to_string());
    }
    parts.join(" ")
}

fn initial_prompt(config: &ConversationConfig) -> String {
    if let Some(greeting) = &config.greeting {
        greeting.clone()
    } else if config.humanize {
        DEFAULT_HUMANIZE_GREETING.to_string()
    } else {
        format!("Let's discuss {}. I think...", config.topic)
    }
}

/// Everything the run task works against; replaces any global state.
struct RunContext {
    config: ConversationConfig,
    transport: Arc<dyn ChatTransport>,
    events: mpsc::UnboundedSender<TurnEvent>,
    inject: mpsc::Receiver<String>,
    cancel: CancellationToken,
}

/// Final snapshot of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub phase: RunPhase,
    pub rounds_completed: u32,
    pub history_a: Vec<Message>,
    pub history_b: Vec<Message>,
    pub transitions: Vec<PhaseTransition>,
}

impl RunOutcome {
    fn failed() -> Self {
        Self {
            phase: RunPhase::Failed,
            rounds_completed: 0,
            history_a: Vec::new(),
            history_b: Vec::new(),
            transitions: Vec::new(),
        }
    }
}

/// Caller-side handle to a spawned run.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<TurnEvent>,
    injector: mpsc::Sender<String>,
    cancel: CancellationToken,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Next event from the run; `None` after the channel has drained past
    /// `Done`.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Best-effort mid-run message injection. Returns whether the text
    /// was queued; a full queue or a finished run drops it silently.
    pub fn inject(&self, text: impl Into<String>) -> bool {
        self.injector.try_send(text.into()).is_ok()
    }

    /// A cloneable injection sender for a separate producer task.
    pub fn injector(&self) -> mpsc::Sender<String> {
        self.injector.clone()
    }

    /// Request cooperative cancellation; the run observes it at its next
    /// checkpoint.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token for wiring cancellation into a separate listener task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run task and take its final snapshot.
    pub async fn join(self) -> RunOutcome {
        self.join.await.unwrap_or_else(|err| {
            warn!(error = %err, "run task join failed");
            RunOutcome::failed()
        })
    }
}

/// Spawns and tracks at most one conversation run at a time.
pub struct TurnScheduler {
    transport: Arc<dyn ChatTransport>,
    active: Arc<AtomicBool>,
}

impl TurnScheduler {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a run is currently active.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Validate the config and spawn the run task.
    ///
    /// Returns `Ok(None)` without side effects when a run is already
    /// active: duplicate starts are ignored, not errors. Configuration
    /// problems are fatal and surface before any run state exists.
    pub fn start(&self, config: ConversationConfig) -> Result<Option<RunHandle>, ConfigError> {
        config.validate()?;

        if self.active.swap(true, Ordering::SeqCst) {
            info!("run already active; ignoring duplicate start");
            return Ok(None);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inject_tx, inject_rx) = mpsc::channel(INJECT_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let ctx = RunContext {
            config,
            transport: Arc::clone(&self.transport),
            events: event_tx.clone(),
            inject: inject_rx,
            cancel: cancel.clone(),
        };
        let active = Arc::clone(&self.active);

        let join = tokio::spawn(async move {
            // The loop runs on its own task so a panic inside it is
            // contained here instead of killing the host process.
            let inner = tokio::spawn(run_loop(ctx));
            let outcome = match inner.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    warn!(error = %err, "run failed");
                    let _ = event_tx.send(TurnEvent::StatusUpdate {
                        text: format!("Error: {err}"),
                    });
                    RunOutcome::failed()
                }
                Err(err) => {
                    warn!(error = %err, "run task died");
                    let _ = event_tx.send(TurnEvent::StatusUpdate {
                        text: "Error: internal run task failure".to_string(),
                    });
                    RunOutcome::failed()
                }
            };
            let _ = event_tx.send(TurnEvent::Done);
            active.store(false, Ordering::SeqCst);
            outcome
        });

        Ok(Some(RunHandle {
            events: event_rx,
            injector: inject_tx,
            cancel,
            join,
        }))
    }
}

async fn run_loop(mut ctx: RunContext) -> Result<RunOutcome> {
    let mut state = RunState::new(&ctx.config);
    state.transition(RunPhase::Running, "run started")?;
    info!(
        topic = %ctx.config.topic,
        turns = ctx.config.turns,
        agent_a = %ctx.config.agent_a.name,
        agent_b = %ctx.config.agent_b.name,
        "conversation starting"
    );

    let mut transcript = Transcript::open(ctx.config.log_path.as_deref());
    let turns = ctx.config.turns;

    'rounds: for round in 1..=turns {
        if ctx.cancel.is_cancelled() {
            state.transition(RunPhase::Stopping, "stop requested")?;
            break;
        }
        state.round = round;
        emit(
            &ctx.events,
            TurnEvent::StatusUpdate {
                text: format!("Turn {round}/{turns}"),
            },
        );

        drain_injections(&mut ctx.inject, &mut state, &ctx.events);

        // B then A: B's reply becomes part of A's input for this round.
        for speaker in [Speaker::B, Speaker::A] {
            let text = agent_turn(&ctx, &mut state, speaker).await;
            emit(
                &ctx.events,
                TurnEvent::AgentReply {
                    who: speaker,
                    text: text.clone(),
                },
            );
            if ctx.config.announce_endpoints {
                emit(
                    &ctx.events,
                    TurnEvent::EndpointUsed {
                        who: speaker,
                        url: ctx.config.agent(speaker).chat_url(),
                    },
                );
            }
            transcript.append(&ctx.config.agent(speaker).name, &text);
            state.record_reply(speaker, &text);

            if ctx.cancel.is_cancelled() {
                state.transition(RunPhase::Stopping, "stop requested")?;
                break 'rounds;
            }
        }

        pause(&ctx.cancel, ctx.config.delay).await;
    }

    let terminal = if state.phase == RunPhase::Stopping {
        state.transition(RunPhase::Stopped, "stop honored")?;
        RunPhase::Stopped
    } else {
        state.transition(RunPhase::Completed, "all rounds executed")?;
        RunPhase::Completed
    };
    info!(phase = %terminal, rounds = state.round, "conversation finished");

    Ok(RunOutcome {
        phase: terminal,
        rounds_completed: state.round,
        history_a: state.history_a,
        history_b: state.history_b,
        transitions: state.transitions,
    })
}

/// One agent's reply for the current round: call with deadline, substitute
/// inline error text on failure, sanitize, and optionally enforce topic
/// adherence with a single corrective retry.
async fn agent_turn(ctx: &RunContext, state: &mut RunState, speaker: Speaker) -> String {
    let agent = ctx.config.agent(speaker);
    let policy = TruncationPolicy {
        short_turn: ctx.config.short_turn,
        max_chars: agent.max_chars,
    };

    let mut text = call_and_sanitize(ctx, agent, state.history(speaker), &policy).await;

    if ctx.config.enforce_topic {
        let first_score = topic::score(&text, &ctx.config.topic);
        if first_score < topic::RETRY_THRESHOLD {
            debug!(
                who = %speaker,
                score = first_score,
                "reply off-topic; issuing one corrective retry"
            );
            let corrective = topic::corrective_prompt(&ctx.config.topic);
            state
                .history_mut(speaker)
                .push(Message::user(corrective.clone()));

            let retry = call_and_sanitize(ctx, agent, state.history(speaker), &policy).await;
            if topic::score(&retry, &ctx.config.topic) > first_score {
                text = retry;
            }

            // The synthetic prompt must not survive in history; pop it
            // only if it is still the last entry.
            let history = state.history_mut(speaker);
            if history
                .last()
                .is_some_and(|m| m.role == Role::User && m.content == corrective)
            {
                history.pop();
            }
        }
    }

    text
}

async fn call_and_sanitize(
    ctx: &RunContext,
    agent: &AgentIdentity,
    history: &[Message],
    policy: &TruncationPolicy,
) -> String {
    let url = agent.chat_url();
    let raw = match call_with_deadline(
        Arc::clone(&ctx.transport),
        &url,
        &agent.model,
        history.to_vec(),
        agent.params.clone(),
        ctx.config.call_timeout,
    )
    .await
    {
        Ok(text) => text,
        Err(err) => {
            warn!(endpoint = %url, error = %err, "agent call failed; substituting inline error");
            err.inline_text()
        }
    };
    sanitize::sanitize(&raw, policy)
}

/// Drain the injection queue once; each accepted message is broadcast to
/// both histories so both agents answer it.
fn drain_injections(
    inject: &mut mpsc::Receiver<String>,
    state: &mut RunState,
    events: &mpsc::UnboundedSender<TurnEvent>,
) {
    while let Ok(text) = inject.try_recv() {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        state.history_a.push(Message::user(trimmed));
        state.history_b.push(Message::user(trimmed));
        emit(
            events,
            TurnEvent::UserInjected {
                text: trimmed.to_string(),
            },
        );
        info!(chars = trimmed.len(), "user message injected");
    }
}

/// Inter-turn delay, interruptible by cancellation.
async fn pause(cancel: &CancellationToken, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

fn emit(events: &mpsc::UnboundedSender<TurnEvent>, event: TurnEvent) {
    if events.send(event).is_err() {
        debug!("event receiver dropped; continuing run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConversationConfig {
        ConversationConfig::new(
            "tea",
            AgentIdentity::new("Alpha", "http://a.test", "m"),
            AgentIdentity::new("Beta", "http://b.test", "m"),
        )
    }

    #[test]
    fn test_phase_terminality() {
        assert!(!RunPhase::Idle.is_terminal());
        assert!(!RunPhase::Running.is_terminal());
        assert!(!RunPhase::Stopping.is_terminal());
        assert!(RunPhase::Stopped.is_terminal());
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(RunPhase::Idle.valid_transitions().contains(&RunPhase::Running));
        assert!(RunPhase::Running
            .valid_transitions()
            .contains(&RunPhase::Stopping));
        assert!(RunPhase::Stopping
            .valid_transitions()
            .contains(&RunPhase::Stopped));
        assert!(RunPhase::Completed.valid_transitions().is_empty());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut state = RunState::new(&config());
        let err = state.transition(RunPhase::Completed, "skip").unwrap_err();
        assert_eq!(err.from, RunPhase::Idle);
        assert_eq!(err.to, RunPhase::Completed);
        assert!(err.to_string().contains("idle"));
    }

    #[test]
    fn test_transitions_recorded() {
        let mut state = RunState::new(&config());
        state.transition(RunPhase::Running, "run started").unwrap();
        state.transition(RunPhase::Stopping, "stop requested").unwrap();
        state.transition(RunPhase::Stopped, "stop honored").unwrap();
        assert_eq!(state.transitions.len(), 3);
        assert_eq!(state.transitions[0].from, RunPhase::Idle);
        assert_eq!(state.transitions[2].to, RunPhase::Stopped);
    }

    #[test]
    fn test_seeded_histories() {
        let state = RunState::new(&config());
        for history in [&state.history_a, &state.history_b] {
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].role, Role::System);
            assert_eq!(history[1].role, Role::User);
            assert_eq!(history[1].content, "Let's discuss tea. I think...");
        }
        assert!(state.history_a[0].content.contains("You are Alpha."));
        assert!(state.history_a[0].content.contains("Discuss 'tea' with Beta."));
        assert!(state.history_b[0].content.contains("You are Beta."));
    }

    #[test]
    fn test_seed_prefers_explicit_greeting() {
        let mut cfg = config();
        cfg.humanize = true;
        cfg.greeting = Some("Good morning!".to_string());
        let state = RunState::new(&cfg);
        assert_eq!(state.history_b[1].content, "Good morning!");
    }

    #[test]
    fn test_humanize_default_greeting_and_instruction() {
        let mut cfg = config();
        cfg.humanize = true;
        let state = RunState::new(&cfg);
        assert_eq!(state.history_b[1].content, DEFAULT_HUMANIZE_GREETING);
        assert!(state.history_a[0].content.contains("friendly human"));
    }

    #[test]
    fn test_persona_lands_in_system_prompt() {
        let mut cfg = config();
        cfg.agent_a = cfg.agent_a.clone().with_persona("A pirate | Quirk: says arr");
        let state = RunState::new(&cfg);
        assert!(state.history_a[0].content.contains("A pirate | Quirk: says arr"));
        assert!(!state.history_b[0].content.contains("pirate"));
    }

    #[test]
    fn test_record_reply_mirrors_roles() {
        let mut state = RunState::new(&config());
        state.record_reply(Speaker::B, "ok.");
        assert_eq!(state.history_b.last().unwrap().role, Role::Assistant);
        assert_eq!(state.history_a.last().unwrap().role, Role::User);
        assert_eq!(state.history_a.last().unwrap().content, "ok.");
    }
}
