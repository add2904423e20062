use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use proverbs_core::config::Config;
use proverbs_gateway::GatewayState;
use proverbs_surface::{CopilotConfig, ProverbsPage, SessionHost};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

mod logging;

#[derive(Parser)]
#[command(
    name = "proverbs",
    about = "AG-UI agent gateway and Proverbs interaction surface",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8080)
        #[arg(long)]
        port: Option<u16>,

        /// Also serve the Proverbs page
        #[arg(long)]
        ui: bool,
    },

    /// Chat with the agent from the terminal (one-shot or interactive)
    Chat {
        /// Message to send (omit for interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Runtime endpoint URL (default: this gateway's endpoint)
        #[arg(long)]
        runtime_url: Option<String>,

        /// Write the final page as HTML to this file
        #[arg(long)]
        html: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .as_deref()
        .map(Config::expand_path)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, ui } => serve(config, port, ui).await?,
        Commands::Chat {
            message,
            runtime_url,
            html,
        } => chat(&config, message, runtime_url, html).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
        },
        Commands::Status => status(&config, &config_path).await,
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>, ui: bool) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid config:\n  {}", errors.join("\n  "));
    }

    let port = port.unwrap_or_else(|| config.gateway_port());

    let ui_router = if ui {
        let mut copilot = CopilotConfig::from_config(&config);
        // The page talks to this gateway unless told otherwise.
        if config
            .surface
            .as_ref()
            .and_then(|s| s.runtime_url.as_ref())
            .is_none()
        {
            copilot.runtime_url = config.gateway_url(port);
        }
        let host = Arc::new(SessionHost::new(copilot));
        let page = Arc::new(ProverbsPage::mount(host));
        Some(proverbs_web::ui_router(page))
    } else {
        None
    };

    let state = GatewayState::from_config(config)?;
    tracing::info!("Starting Proverbs gateway on port {port}");
    proverbs_gateway::start_gateway(Arc::new(state), port, ui_router).await
}

async fn chat(
    config: &Config,
    message: Option<String>,
    runtime_url: Option<String>,
    html: Option<String>,
) -> anyhow::Result<()> {
    let mut copilot = CopilotConfig::from_config(config);
    if let Some(url) = runtime_url {
        copilot.runtime_url = url;
    }
    let host = Arc::new(SessionHost::new(copilot));
    let page = ProverbsPage::mount(host);

    match message {
        Some(message) => {
            let result = turn(&page, &message).await;
            write_html(&page, html.as_deref())?;
            result?;
        }
        None => {
            println!("{}", page.render().to_text());
            println!("\nType a message, or /quit to exit.");

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdout = tokio::io::stdout();
            loop {
                stdout.write_all(b"> ").await?;
                stdout.flush().await?;
                let Some(line) = lines.next_line().await? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" || line == "/exit" {
                    break;
                }
                // Errors are already shown from the transcript.
                if let Err(e) = turn(&page, line).await {
                    tracing::debug!(error = %e, "Turn failed");
                }
            }
            write_html(&page, html.as_deref())?;
        }
    }

    Ok(())
}

/// Send one message and print what it changed.
async fn turn(page: &ProverbsPage, message: &str) -> anyhow::Result<()> {
    // The user's own line is not echoed back.
    let start = page.host().transcript().len() + 1;
    let theme_before = page.theme_color();
    let proverbs_before = page.proverbs();

    let result = page.host().send_message(message).await;

    let output = page.render_transcript_since(start).to_text();
    if !output.is_empty() {
        println!("{output}");
    }
    let theme = page.theme_color();
    if theme != theme_before {
        println!("[theme] {theme}");
    }
    let proverbs = page.proverbs();
    if proverbs != proverbs_before {
        println!("[proverbs]");
        for proverb in &proverbs {
            println!("  - {proverb}");
        }
    }

    result?;
    Ok(())
}

fn write_html(page: &ProverbsPage, path: Option<&str>) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let path = Config::expand_path(path);
    std::fs::write(&path, proverbs_web::render_document(&page.render()))
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Page written to {}", path.display());
    Ok(())
}

async fn status(config: &Config, config_path: &std::path::Path) {
    let port = config.gateway_port();
    println!("Proverbs v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());
    println!("Gateway: {}:{port}{}", config.bind_addr(), config.endpoint());
    println!("Default agent: {}", config.default_agent());
    for registration in config.agent_registrations() {
        println!("  {} -> {}", registration.name, registration.resolve_url());
    }

    let url = format!("http://127.0.0.1:{port}/health");
    let health = async {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        let body = client.get(&url).send().await?.json::<serde_json::Value>().await?;
        Ok::<_, reqwest::Error>(body)
    };
    match health.await {
        Ok(body) => println!(
            "Status: running (v{}, {} agent(s))",
            body["version"].as_str().unwrap_or("?"),
            body["agents"]
        ),
        Err(_) => println!("Status: not running"),
    }
}
