use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use agent_bridge::bridge::{QueryEvent, QueryEventReceiver};
use agent_bridge::config::load_settings;
use agent_bridge::{
    AgentBridge, BridgeError, BridgeSettings, Conversation, NoTools, QueryRequest, TurnReport,
};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Drive a long-lived agent process over line-delimited JSON
#[derive(Parser)]
#[command(name = "agent-bridge")]
#[command(version)]
#[command(about = "Drive a long-lived agent process over line-delimited JSON")]
struct Cli {
    /// Config file layered over the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bridge script to run instead of the configured one
    #[arg(long, global = true)]
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat; a line typed while the agent works becomes a follow-up
    Chat {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Send one prompt and print the outcome as JSON
    Ask {
        /// The prompt to send
        prompt: String,

        #[command(flatten)]
        query: QueryArgs,
    },
    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Args, Clone)]
struct QueryArgs {
    /// System prompt sent with every query
    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT)]
    system_prompt: String,

    /// Working directory for the agent session
    #[arg(long)]
    cwd: Option<String>,

    /// Model to request
    #[arg(long)]
    model: Option<String>,

    /// Agent mode (e.g. "ask", "act")
    #[arg(long)]
    mode: Option<String>,
}

impl QueryArgs {
    fn request(&self, prompt: String) -> QueryRequest {
        QueryRequest {
            cwd: self.cwd.clone(),
            mode: self.mode.clone(),
            model: self.model.clone(),
            ..QueryRequest::new(prompt, self.system_prompt.clone())
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let mut settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(script) = cli.script {
        settings.script = Some(script);
    }

    let code = match cli.command {
        Commands::Config => print_config(&settings),
        Commands::Ask { prompt, query } => ask(settings, query.request(prompt)).await,
        Commands::Chat { query } => chat(settings, query).await,
    };
    std::process::exit(code);
}

fn print_config(settings: &BridgeSettings) -> i32 {
    match toml::to_string_pretty(settings) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn report_error(error: &BridgeError) {
    eprintln!("Error: {} ({})", error.user_message(), error);
}

async fn start_bridge(settings: BridgeSettings) -> Option<Arc<AgentBridge>> {
    let bridge = Arc::new(AgentBridge::new(settings));
    match bridge.start().await {
        Ok(()) => Some(bridge),
        Err(e) => {
            report_error(&e);
            None
        }
    }
}

/// Print streamed progress. Text goes to stdout only when `text_to_stdout`
/// is set; everything else goes to stderr.
fn spawn_event_printer(
    mut events: QueryEventReceiver,
    text_to_stdout: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                QueryEvent::TextDelta { text } if text_to_stdout => {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
                QueryEvent::TextDelta { text } => {
                    eprint!("{}", text);
                }
                QueryEvent::ToolActivity { name, status, .. } => {
                    eprintln!("[tool {} {:?}]", name, status);
                }
                QueryEvent::AuthRequired { auth_url, .. } => {
                    eprintln!(
                        "[authentication required{}]",
                        auth_url.map(|url| format!(": {}", url)).unwrap_or_default()
                    );
                }
                QueryEvent::AuthSucceeded => eprintln!("[authenticated]"),
                QueryEvent::SessionStarted { .. }
                | QueryEvent::ThinkingDelta { .. }
                | QueryEvent::ToolResultDisplay { .. } => {}
            }
        }
    })
}

async fn ask(settings: BridgeSettings, request: QueryRequest) -> i32 {
    let Some(bridge) = start_bridge(settings).await else {
        return 1;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_event_printer(rx, false);
    let result = bridge.query(request, &tx, &NoTools).await;
    drop(tx);
    let _ = printer.await;
    eprintln!();
    bridge.stop().await;

    match result {
        Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Err(e) => {
            report_error(&e);
            1
        }
    }
}

fn report_turn(report: &TurnReport) {
    println!();
    if let Err(error) = &report.result {
        if !matches!(error, BridgeError::Stopped) {
            report_error(error);
        }
    }
}

async fn chat(settings: BridgeSettings, query: QueryArgs) -> i32 {
    let Some(bridge) = start_bridge(settings).await else {
        return 1;
    };
    let conversation = Arc::new(Conversation::new(Arc::clone(&bridge)));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = spawn_event_printer(events_rx, true);

    eprintln!("Connected. Type a message, /quit to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turn: Option<tokio::task::JoinHandle<()>> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        let text = line.trim().to_string();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            if conversation.is_busy().await {
                bridge.interrupt().await;
            }
            break;
        }
        if conversation.queue_follow_up(text.clone()).await {
            eprintln!("[follow-up queued]");
            continue;
        }
        if let Some(previous) = turn.take() {
            let _ = previous.await;
        }

        let conversation = Arc::clone(&conversation);
        let events = events_tx.clone();
        let request = query.request(text);
        turn = Some(tokio::spawn(async move {
            for report in conversation.submit(request, &events, &NoTools).await {
                report_turn(&report);
            }
        }));
    }

    if let Some(turn) = turn {
        let _ = turn.await;
    }
    bridge.stop().await;
    drop(events_tx);
    let _ = printer.await;
    0
}
