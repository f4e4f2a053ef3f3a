//! ptc-agent - run programmatic tool calling tasks from the command line

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use ptc_agent::agent::{AgentConfig, AgentController, StopReason};
use ptc_agent::executor::{CodeExecutor, ExecutionLanguage, ExecutionMode, ExecutorConfig};
use ptc_agent::model::ollama::DEFAULT_OLLAMA_URL;
use ptc_agent::model::OllamaChat;
use ptc_agent::tools::{CommandTool, Tool, ToolServer, ToolSet};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "ptc-agent")]
#[command(about = "Let a model solve tasks by writing code that calls your tools", long_about = None)]
#[command(version)]
struct Cli {
    /// OTLP collector endpoint for trace export
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ToolArgs {
    /// JSON manifest describing command tools
    #[arg(short, long, env = "PTC_TOOLS")]
    tools: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a task with the agent loop
    Run {
        /// The task to accomplish
        task: String,

        #[command(flatten)]
        tools: ToolArgs,

        /// Ollama model name
        #[arg(short, long, env = "PTC_MODEL", default_value = "qwen2.5-coder")]
        model: String,

        /// Ollama base URL
        #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL)]
        ollama_url: String,

        /// Language the model writes (python or go)
        #[arg(short, long, default_value = "python")]
        language: ExecutionLanguage,

        /// Maximum number of model calls
        #[arg(long, default_value = "10")]
        max_iterations: usize,

        /// Timeout for one code execution in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Text placed in front of the generated system prompt
        #[arg(long)]
        system_prompt: Option<String>,
    },
    /// Serve the manifest's tools until Ctrl-C
    Serve {
        #[command(flatten)]
        tools: ToolArgs,
    },
    /// Print the tool catalog as the model sees it
    Tools {
        #[command(flatten)]
        tools: ToolArgs,

        /// Language used for call signatures
        #[arg(short, long, default_value = "python")]
        language: ExecutionLanguage,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = ptc_agent::tracing::init_tracing(
        "ptc-agent",
        cli.otlp_endpoint.as_deref(),
        cli.json_logs,
    ) {
        eprintln!("Warning: failed to initialize tracing: {}", e);
    }

    let result = run(cli.command).await;
    ptc_agent::tracing::shutdown_tracing();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[AGENT] Interrupted, shutting down...");
            token.cancel();
        }
    });
    cancel
}

fn load_tools(args: &ToolArgs) -> Result<ToolSet, BoxError> {
    let tools = CommandTool::load_manifest(&args.tools)?
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn Tool>)
        .collect();
    Ok(ToolSet::new(tools)?)
}

async fn run(command: Commands) -> Result<(), BoxError> {
    match command {
        Commands::Run {
            task,
            tools,
            model,
            ollama_url,
            language,
            max_iterations,
            timeout,
            system_prompt,
        } => {
            let config = AgentConfig {
                model,
                language,
                mode: ExecutionMode::Server,
                max_iterations,
                execution_timeout_secs: timeout,
                system_prompt,
                ..AgentConfig::default()
            };
            cmd_run(&task, load_tools(&tools)?, &ollama_url, config).await
        }
        Commands::Serve { tools } => cmd_serve(load_tools(&tools)?).await,
        Commands::Tools { tools, language } => cmd_tools(load_tools(&tools)?, language),
    }
}

async fn cmd_run(
    task: &str,
    tools: ToolSet,
    ollama_url: &str,
    config: AgentConfig,
) -> Result<(), BoxError> {
    let cancel = cancel_on_ctrl_c();
    let model = Arc::new(OllamaChat::new(ollama_url, config.model.clone()));

    println!("[AGENT] Model: {} ({})", config.model, ollama_url);
    println!("[AGENT] Language: {}", config.language.display_name());
    println!("[AGENT] Tools: {}", tools.names().join(", "));

    let agent = AgentController::start(model, tools, config, &cancel).await?;
    let outcome = agent.run_task(&cancel, task).await;
    agent.close(&CancellationToken::new()).await?;
    let run = outcome?;

    println!("[AGENT] Trace ID: {}", run.trace_id);
    for (i, record) in run.executions.iter().enumerate() {
        let status = if record.succeeded() { "ok" } else { "failed" };
        println!(
            "[EXEC] #{} {} ({:.2}ms, {})",
            i + 1,
            record.language,
            record.result.duration_ms,
            status
        );
        println!("┌─────────────────────────────────────────");
        for line in record.code.lines() {
            println!("│ {}", line);
        }
        println!("└─────────────────────────────────────────");
        if let Some(error) = &record.error {
            println!("[EXEC] {}", error);
        }
    }
    if run.stop_reason == StopReason::MaxIterations {
        println!("[AGENT] Stopped after {} iterations", run.iterations);
    } else {
        println!("[AGENT] Completed in {} iterations", run.iterations);
    }

    println!();
    println!("{}", run.final_response);
    Ok(())
}

async fn cmd_serve(tools: ToolSet) -> Result<(), BoxError> {
    let cancel = cancel_on_ctrl_c();
    let server = ToolServer::new(tools.clone());
    server.start(&cancel).await?;

    println!("[SERVER] Listening on {}", server.base_url());
    for name in tools.names() {
        println!("[SERVER]   {}", name);
    }

    cancel.cancelled().await;
    server.stop(&CancellationToken::new()).await?;
    println!("[SERVER] Stopped");
    Ok(())
}

fn cmd_tools(tools: ToolSet, language: ExecutionLanguage) -> Result<(), BoxError> {
    let executor = CodeExecutor::new(
        tools,
        ExecutorConfig {
            language,
            ..ExecutorConfig::default()
        },
    )?;
    let catalog = ptc_agent::agent::prompt::render_tool_catalog(&executor.tool_definitions());
    println!("{}", catalog);
    Ok(())
}
