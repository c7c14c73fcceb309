use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use eventhub_client::{ClientConfig, CredentialStore, EventHubClient, SessionSink};
use reqwest::Method;

mod logging;

use logging::init_logging;

#[derive(Parser)]
#[command(name = "eventhub")]
#[command(about = "Command-line client for the EventHub service")]
#[command(version)]
struct Cli {
    /// API base URL (overrides config.toml)
    #[arg(long, env = "EVENTHUB_API_BASE")]
    api_base: Option<String>,

    /// Directory holding the saved session
    #[arg(long, env = "EVENTHUB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and save the session
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "EVENTHUB_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the saved session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// GET a path and print the JSON response
    Get {
        path: String,
        /// Query parameter as key=value, repeatable
        #[arg(long = "query", short = 'q', value_parser = parse_query_pair)]
        query: Vec<(String, String)>,
    },
    /// Send an arbitrary request with an optional JSON body
    Send {
        method: String,
        path: String,
        #[arg(long)]
        data: Option<String>,
    },
}

/// Tells the user the saved session is gone once a refresh fails.
struct ConsoleSessionSink;

impl SessionSink for ConsoleSessionSink {
    fn clear(&self) {
        log::warn!("Session ended, sign in again with `eventhub login`");
    }
}

fn parse_query_pair(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow!("invalid HTTP method {raw:?}"))
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn build_client(cli: &Cli) -> Result<EventHubClient> {
    let mut config = ClientConfig::load();
    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }
    log::debug!("Using API base {}", config.api_base);

    let store = CredentialStore::open(config.credentials_path())
        .with_context(|| format!("failed to open {:?}", config.credentials_path()))?;
    Ok(EventHubClient::with_parts(
        config,
        Arc::new(store),
        Arc::new(ConsoleSessionSink),
    )?)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let client = build_client(&cli)?;

    match cli.command {
        Commands::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let session = client.login(&email, &password).await?;
            let roles: Vec<_> = session.roles.iter().map(String::as_str).collect();
            println!(
                "Signed in as {} (org {}, roles: {})",
                session.email,
                session.org_id,
                roles.join(", ")
            );
        }
        Commands::Logout => {
            client.logout()?;
            println!("Signed out");
        }
        Commands::Whoami => match client.session() {
            Some(session) => print_json(&serde_json::to_value(session)?)?,
            None => println!("Not signed in"),
        },
        Commands::Get { path, query } => {
            let query: Vec<(&str, &str)> = query
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect();
            let body: serde_json::Value = client.get_json(&path, &query).await?;
            print_json(&body)?;
        }
        Commands::Send { method, path, data } => {
            let mut builder = client.request(parse_method(&method)?, &path);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data must be valid JSON")?;
                builder = builder.json(&body);
            }
            let response = client.send(builder).await?;
            let text = response.text().await?;
            if text.is_empty() {
                println!("OK");
            } else {
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => print_json(&value)?,
                    Err(_) => println!("{text}"),
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    run(cli).await
}
