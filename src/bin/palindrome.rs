//! palindrome CLI: run the message server or check text locally.

use clap::{Parser, Subcommand};
use palindrome_rs::api;
use palindrome_rs::config::Config;
use palindrome_rs::model::Fingerprint;
use palindrome_rs::orchestrator::{OrchestratorConfig, WorkOrchestrator};
use palindrome_rs::service::Messages;
use palindrome_rs::store::MessageStore;
use palindrome_rs::telemetry::{TelemetryConfig, init_telemetry};
use palindrome_rs::work::{Palindrome, WorkFunction};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "palindrome", about = "Messages with background palindrome checks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check whether some text is a palindrome
    Check {
        /// Text to check
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port } => cmd_serve(port).await,
        Command::Check { text } => cmd_check(&text),
    }
}

async fn cmd_serve(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "palindrome".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let orchestrator = WorkOrchestrator::new(
        Palindrome,
        OrchestratorConfig {
            work_delay: config.work_delay,
            channel_capacity: config.notify_capacity,
        },
    )?;
    let messages = Messages::new(Arc::new(MessageStore::new()), Arc::new(orchestrator));

    tracing::info!(
        delay_secs = config.work_delay.as_secs(),
        notify_capacity = config.notify_capacity,
        "starting server"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    api::serve(listener, messages, async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;
    Ok(())
}

fn cmd_check(text: &str) -> anyhow::Result<()> {
    let outcome = Palindrome.compute(text);
    let answer = match outcome.as_option() {
        Some(true) => "palindrome",
        Some(false) => "not a palindrome",
        None => "unknown",
    };
    println!("{answer}");
    println!("fingerprint: {}", Fingerprint::of(text).as_str());
    Ok(())
}
