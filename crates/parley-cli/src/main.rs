//! Parley CLI — chat with OpenRouter, GPTGOD or Hugging Face models,
//! enhanced by MCP tool servers.

use anyhow::{Context, Result};
use clap::Parser;
use parley_config::{CliOverrides, ParleyConfig};
use parley_core::{ChatEvent, ChatOrchestrator};
use parley_mcp::{ConnectionState, McpManager};
use parley_types::ChatMessage;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "parley", version, about = "Chat with language models, enhanced by MCP tools")]
struct Cli {
    /// Send a single message and print the response (non-interactive)
    #[arg(short, long)]
    print: Option<String>,

    /// Provider to use: openrouter, gptgod or huggingface
    #[arg(long)]
    provider: Option<String>,

    /// Model to use
    #[arg(long)]
    model: Option<String>,

    /// Maximum tokens in the response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// API key (overrides the provider's environment variable)
    #[arg(long)]
    api_key: Option<String>,

    /// Start no MCP tool servers
    #[arg(long)]
    no_mcp: bool,

    /// List the tools of the connected MCP servers and exit
    #[arg(long)]
    list_tools: bool,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = ParleyConfig::load(CliOverrides {
        provider: cli.provider.clone(),
        model: cli.model.clone(),
        api_key: cli.api_key.clone(),
        max_tokens: cli.max_tokens,
        no_mcp: cli.no_mcp,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let manager = Arc::new(McpManager::start(&config.mcp).await);
    let connected = manager.list_connected();
    if !connected.is_empty() {
        tracing::info!("MCP servers connected: {}", connected.join(", "));
    }

    let result = run(&cli, &config, &manager).await;
    manager.shutdown_all().await;
    result
}

async fn run(cli: &Cli, config: &ParleyConfig, manager: &Arc<McpManager>) -> Result<()> {
    if cli.list_tools {
        print_tools(manager).await;
        return Ok(());
    }

    let options = config
        .provider_options()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let provider = parley_providers::build_provider(&options)
        .context("Failed to create provider")?;

    let mut orchestrator = ChatOrchestrator::new(provider, config.model.clone())
        .with_tools(manager.clone())
        .with_thinker(manager.clone())
        .with_policy(config.tools.clone())
        .with_max_tokens(config.max_tokens);
    if let Some(temperature) = config.temperature {
        orchestrator = orchestrator.with_temperature(temperature);
    }

    if let Some(message) = &cli.print {
        let messages = vec![ChatMessage::user(message.as_str())];
        let reply = run_turn(&orchestrator, &messages).await?;
        println!("{reply}");
        return Ok(());
    }

    repl(&orchestrator, manager).await
}

async fn repl(orchestrator: &ChatOrchestrator, manager: &McpManager) -> Result<()> {
    let stdin = io::stdin();
    let mut messages: Vec<ChatMessage> = Vec::new();

    eprintln!(
        "parley v{} (provider: {}, model: {}, tool servers: {})",
        env!("CARGO_PKG_VERSION"),
        orchestrator.provider_name(),
        orchestrator.model(),
        manager.list_connected().len()
    );
    eprintln!("Type your message. Press Ctrl+D to exit, /help for commands.\n");

    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let mut input = String::new();
        let bytes_read = stdin.lock().read_line(&mut input)?;
        if bytes_read == 0 {
            eprintln!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(handled) = handle_slash_command(input, &mut messages, orchestrator, manager).await
        {
            match handled {
                SlashResult::Continue => continue,
                SlashResult::Break => break,
                SlashResult::Unknown => {
                    eprintln!("Unknown command: {input}. Type /help for available commands.");
                    continue;
                }
            }
        }

        messages.push(ChatMessage::user(input));
        match run_turn(orchestrator, &messages).await {
            Ok(reply) => {
                println!("{reply}");
                messages.push(ChatMessage::assistant(reply));
            }
            Err(e) => {
                eprintln!("\nError: {e}");
                // Remove the failed user message
                messages.pop();
            }
        }
        println!();
    }

    Ok(())
}

/// Run one turn, reporting tool activity on stderr. Ctrl+C cancels the turn.
async fn run_turn(orchestrator: &ChatOrchestrator, messages: &[ChatMessage]) -> Result<String> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut err = io::stderr();
    let result = orchestrator
        .run(messages, cancel, |event| match event {
            ChatEvent::ToolStart { call } => {
                let _ = writeln!(err, "  [tool: {call}]");
            }
            ChatEvent::ToolEnd { call, ok: false } => {
                let _ = writeln!(err, "  [tool {call} failed, continuing without it]");
            }
            ChatEvent::ToolEnd { .. } => {}
            ChatEvent::Thinking(step) => {
                let _ = writeln!(err, "\x1b[2m  {}\x1b[0m", step.transcript_line());
            }
            ChatEvent::Done => {}
        })
        .await;
    watcher.abort();

    let reply = result.map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(reply.text)
}

enum SlashResult {
    Continue,
    Break,
    Unknown,
}

async fn handle_slash_command(
    input: &str,
    messages: &mut Vec<ChatMessage>,
    orchestrator: &ChatOrchestrator,
    manager: &McpManager,
) -> Option<SlashResult> {
    if !input.starts_with('/') {
        return None;
    }

    let cmd = input.split_whitespace().next().unwrap_or(input);
    match cmd {
        "/quit" | "/exit" => Some(SlashResult::Break),
        "/clear" => {
            messages.clear();
            eprintln!("Conversation cleared.");
            Some(SlashResult::Continue)
        }
        "/help" => {
            print_help();
            Some(SlashResult::Continue)
        }
        "/model" => {
            eprintln!(
                "Current model: {} ({})",
                orchestrator.model(),
                orchestrator.provider_name()
            );
            Some(SlashResult::Continue)
        }
        "/servers" => {
            print_servers(manager);
            Some(SlashResult::Continue)
        }
        "/tools" => {
            print_tools(manager).await;
            Some(SlashResult::Continue)
        }
        _ => Some(SlashResult::Unknown),
    }
}

fn print_servers(manager: &McpManager) {
    let names = manager.server_names();
    if names.is_empty() {
        eprintln!("No MCP servers registered.");
        return;
    }
    eprintln!("MCP servers:");
    for name in names {
        let Some(client) = manager.get_server(&name) else {
            continue;
        };
        let state = match client.state() {
            ConnectionState::Connected => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Disconnected => "disconnected",
        };
        let version = client
            .server_info()
            .map(|info| format!(" ({} {})", info.name, info.version))
            .unwrap_or_default();
        eprintln!("  {name:<20} {state}{version}");
    }
}

async fn print_tools(manager: &McpManager) {
    let tools = manager.tools().await;
    if tools.is_empty() {
        eprintln!("No MCP tools available.");
        return;
    }
    for (server, tool) in tools {
        let description = tool.description.lines().next().unwrap_or_default();
        println!("{server}/{:<28} {description}", tool.name);
    }
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /help     — Show this help");
    eprintln!("  /model    — Show current provider and model");
    eprintln!("  /servers  — Show MCP servers and their state");
    eprintln!("  /tools    — List tools of connected MCP servers");
    eprintln!("  /clear    — Clear conversation");
    eprintln!("  /quit     — Exit");
}
