//! duologue CLI — run a two-agent conversation or the merge protocol
//! from the terminal.
//!
//! Agent endpoints default from `AGENT_A_URL`/`AGENT_B_URL` (and the
//! matching `_MODEL`, `_NAME`, `_PERSONA` variables); flags override the
//! environment. During a conversation, stdin lines are forwarded into the
//! run: `stop`, `q`, or `quit` cancels it, anything else is injected as a
//! user message for both agents.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use duologue::{
    build_persona, AgentIdentity, ConversationConfig, HttpAgentClient, MergePipeline, Speaker,
    TurnEvent, TurnScheduler,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "duologue", about = "Two-agent model conversations and answer merging")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a turn-based conversation between the two configured agents.
    Converse(ConverseArgs),
    /// Answer one question with the three-phase critique/merge protocol.
    Merge(MergeArgs),
}

#[derive(Args)]
struct ConverseArgs {
    /// Discussion topic.
    #[arg(short, long, default_value = "the benefits of remote work")]
    topic: String,

    /// Number of rounds (each round: B replies, then A).
    #[arg(long, default_value_t = 4)]
    turns: u32,

    /// Seconds to wait between rounds.
    #[arg(long, default_value_t = 1.0)]
    delay: f64,

    /// Append the transcript to this file.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Short, human-style replies and a greeting-style opening.
    #[arg(long)]
    humanize: bool,

    /// Explicit opening prompt.
    #[arg(long)]
    greeting: Option<String>,

    /// Persona base text for agent A.
    #[arg(long)]
    persona_a: Option<String>,
    #[arg(long)]
    persona_a_age: Option<String>,
    #[arg(long)]
    persona_a_background: Option<String>,
    #[arg(long)]
    persona_a_quirk: Option<String>,

    /// Persona base text for agent B.
    #[arg(long)]
    persona_b: Option<String>,
    #[arg(long)]
    persona_b_age: Option<String>,
    #[arg(long)]
    persona_b_background: Option<String>,
    #[arg(long)]
    persona_b_quirk: Option<String>,

    /// Model for agent A (overrides AGENT_A_MODEL).
    #[arg(long)]
    model_a: Option<String>,

    /// Model for agent B (overrides AGENT_B_MODEL).
    #[arg(long)]
    model_b: Option<String>,

    /// Character budget per reply.
    #[arg(long)]
    max_chars: Option<usize>,

    /// Force replies down to a single complete sentence.
    #[arg(long)]
    short_turn: bool,

    /// Print which endpoint served each reply.
    #[arg(long)]
    show_endpoints: bool,
}

#[derive(Args)]
struct MergeArgs {
    /// The question both agents answer.
    question: String,

    /// Model for agent A (overrides AGENT_A_MODEL).
    #[arg(long)]
    model_a: Option<String>,

    /// Model for agent B (overrides AGENT_B_MODEL).
    #[arg(long)]
    model_b: Option<String>,

    /// Per-call timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn agent_from_env(side: char, model_override: Option<&str>) -> AgentIdentity {
    let upper = side.to_ascii_uppercase();
    let url = env_or(&format!("AGENT_{upper}_URL"), "http://localhost:11434");
    let model = model_override
        .map(str::to_string)
        .unwrap_or_else(|| env_or(&format!("AGENT_{upper}_MODEL"), "llama2"));
    let name = env_or(&format!("AGENT_{upper}_NAME"), &format!("Agent_{upper}"));
    let mut agent = AgentIdentity::new(&name, &url, &model);
    if let Ok(persona) = std::env::var(format!("AGENT_{upper}_PERSONA")) {
        agent.persona = Some(persona);
    }
    agent
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Converse(args) => converse(args).await,
        Command::Merge(args) => merge(args).await,
    }
}

async fn converse(args: ConverseArgs) -> Result<()> {
    let mut agent_a = agent_from_env('a', args.model_a.as_deref());
    let mut agent_b = agent_from_env('b', args.model_b.as_deref());

    let persona_a = build_persona(
        args.persona_a.as_deref().or(agent_a.persona.as_deref()),
        args.persona_a_age.as_deref(),
        args.persona_a_background.as_deref(),
        args.persona_a_quirk.as_deref(),
    );
    if let Some(persona) = persona_a {
        agent_a.persona = Some(persona);
    }
    let persona_b = build_persona(
        args.persona_b.as_deref().or(agent_b.persona.as_deref()),
        args.persona_b_age.as_deref(),
        args.persona_b_background.as_deref(),
        args.persona_b_quirk.as_deref(),
    );
    if let Some(persona) = persona_b {
        agent_b.persona = Some(persona);
    }
    if let Some(max_chars) = args.max_chars {
        agent_a.max_chars = Some(max_chars);
        agent_b.max_chars = Some(max_chars);
    }

    let name_a = agent_a.name.clone();
    let name_b = agent_b.name.clone();

    let mut config = ConversationConfig::new(&args.topic, agent_a, agent_b);
    config.turns = args.turns;
    config.delay = Duration::from_secs_f64(args.delay.max(0.0));
    config.log_path = args.log.clone();
    config.humanize = args.humanize;
    config.greeting = args.greeting.clone();
    config.short_turn = args.short_turn;
    config.announce_endpoints = args.show_endpoints;
    // Terminal runs get the strict variant: keep the agents on topic.
    config.enforce_topic = true;

    println!("--- Starting conversation on: '{}' ---", args.topic);
    println!("Type 'stop' and press Enter at any time to end the conversation.");
    println!("Any other line is injected into the conversation as a user message.");

    let scheduler = TurnScheduler::new(Arc::new(HttpAgentClient::new()));
    let mut handle = match scheduler.start(config)? {
        Some(handle) => handle,
        None => return Ok(()),
    };

    // Stdin listener: cancels on the stop keywords, injects everything
    // else. Detached; it dies with the process after the run finishes.
    let injector = handle.injector();
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if matches!(trimmed.to_lowercase().as_str(), "stop" | "q" | "quit") {
                info!("stop requested from stdin");
                cancel.cancel();
                break;
            }
            if injector.try_send(trimmed.to_string()).is_err() {
                warn!("injection queue full or run finished; message dropped");
            }
        }
    });

    while let Some(event) = handle.next_event().await {
        match event {
            TurnEvent::StatusUpdate { text } => println!("--- {text}"),
            TurnEvent::AgentReply { who, text } => {
                let name = match who {
                    Speaker::A => &name_a,
                    Speaker::B => &name_b,
                };
                println!("{name}: {text}");
            }
            TurnEvent::EndpointUsed { who, url } => println!("  ({who} via {url})"),
            TurnEvent::UserInjected { text } => println!("[you]: {text}"),
            TurnEvent::Done => break,
        }
    }

    let outcome = handle.join().await;
    println!("--- Conversation finished ({}) ---", outcome.phase);
    if let Some(path) = &args.log {
        println!("Transcript saved to: {}", path.display());
    }
    Ok(())
}

async fn merge(args: MergeArgs) -> Result<()> {
    let agent_a = agent_from_env('a', args.model_a.as_deref());
    let agent_b = agent_from_env('b', args.model_b.as_deref());

    let pipeline = MergePipeline::new(Arc::new(HttpAgentClient::new()), agent_a, agent_b)
        .with_timeout(Duration::from_secs(args.timeout));
    let record = pipeline.run(&args.question).await;

    println!("Question: {}", record.question);
    println!("\n== Initial Answers ==");
    println!("\n-- Model A --\n{}", record.answer_a);
    println!("\n-- Model B --\n{}", record.answer_b);
    println!("\n== Critiques ==");
    println!("\n-- Critique A --\n{}", record.critique_a);
    println!("\n-- Critique B --\n{}", record.critique_b);
    println!("\n== Merge Drafts ==");
    println!("\n-- Draft A --\n{}", record.draft_a);
    println!("\n-- Draft B --\n{}", record.draft_b);
    println!("\n== Final Merged Answer ==\n");
    println!("{}", record.final_answer);
    Ok(())
}
