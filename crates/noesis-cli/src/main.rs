use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use noesis_core::config::BootstrapConfig;
use noesis_core::event::Event;
use noesis_runtime::{OpenAiCompatibleProvider, Runtime};
use noesis_store::Store;
use tokio_util::sync::CancellationToken;

/// noesis — terminal surface over the agent runtime.
#[derive(Parser)]
#[command(name = "noesis", version, about = "Self-directed agent runtime (Rust CLI)")]
struct Cli {
    /// Override the bootstrap config path (default: ~/.noesis/config.json)
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// LLM API key
    #[arg(long, env = "NOESIS_API_KEY")]
    api_key: Option<String>,
    /// LLM API base URL
    #[arg(long, env = "NOESIS_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agent turn and print the resulting events
    Agent {
        /// The message to send
        #[arg(short, long)]
        message: String,
        /// Session id to resume (default: "default")
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Interactive read-eval-print loop over one session
    Repl {
        #[arg(long, default_value = "default")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "noesis=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let runtime = bootstrap(&cli).await?;

    match cli.command {
        Some(Commands::Agent { message, session }) => run_turn(&runtime, &session, &message).await,
        Some(Commands::Repl { session }) => run_repl(&runtime, &session).await,
        None => run_repl(&runtime, "default").await,
    }
}

async fn bootstrap(cli: &Cli) -> anyhow::Result<Arc<Runtime>> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = noesis_core::config::load_bootstrap_config(&config_path).unwrap_or_default();

    let db_path = config
        .db_path
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| default_config_path().with_file_name("noesis.db"));
    let store = Arc::new(Store::open(&db_path)?);

    let api_key = cli
        .api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("API key required: set NOESIS_API_KEY or pass --api-key"))?;
    let primary: Arc<dyn noesis_core::llm::LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(
        &cli.base_url,
        &api_key,
        &config.model,
    ));
    let reflection: Arc<dyn noesis_core::llm::LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(
        &cli.base_url,
        &api_key,
        &config.model,
    ));

    Ok(Runtime::bootstrap(config, store, primary, reflection))
}

fn default_config_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".noesis")
        .join("config.json")
}

async fn run_turn(runtime: &Runtime, session: &str, message: &str) -> anyhow::Result<()> {
    let req = noesis_agent::RunRequest {
        session_id: session.to_string(),
        user_message: message.to_string(),
        images: Vec::new(),
        max_iterations: None,
        cancel: runtime.shutdown.token(),
    };
    let mut rx = runtime
        .run_chat(req)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    while let Some(event) = rx.recv().await {
        print_event(&event);
    }
    Ok(())
}

async fn run_repl(runtime: &Runtime, session: &str) -> anyhow::Result<()> {
    println!("{}", "noesis — type a message, Ctrl+D to exit".dimmed());
    let mut input = String::new();
    loop {
        print!("{} ", ">".cyan());
        std::io::stdout().flush()?;
        input.clear();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let message = input.trim();
        if message.is_empty() {
            continue;
        }
        run_turn(runtime, session, message).await?;
    }
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Thinking { text } => println!("{}", format!("(thinking) {text}").dimmed()),
        Event::Text { text } => println!("{text}"),
        Event::ToolCall { name, args } => {
            println!("{}", format!("→ {name}({args})").yellow())
        }
        Event::ToolResult { name, result } => {
            let line = format!("← {name}: {}", result.output);
            if result.success {
                println!("{}", line.green());
            } else {
                println!("{}", line.red());
            }
        }
        Event::StuckWarning { message } => println!("{}", format!("⚠ {message}").yellow()),
        Event::Error { message } => println!("{}", format!("error: {message}").red()),
        Event::Done { summary } => println!("{}", format!("✓ {summary}").bold()),
        Event::Heartbeat => {}
    }
}
