//! AOF client command-line entry point.
//!
//! Starts a [`Client`] against the configured session socket, runs one
//! command, and prints the result as JSON.
//!
//! # Usage
//!
//! ```text
//! aof-client [OPTIONS] <COMMAND>
//!
//! Commands:
//!   get <KEY> [--partials] [--watch]   load a resource key and print it
//!   call <KEY> [--data JSON]           run a mutating handler
//!   unlock                             unlock the crypto session
//!
//! Options:
//!   --config <PATH>            config file [default: platform config dir]
//!   --url <URL>                session socket URL
//!   --session-cookie <COOKIE>  Cookie header issued by the HTTP login
//!   --password <PASSWORD>      password tried before prompting
//!   --persist                  remember the password across runs
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable             | Option             |
//! |----------------------|--------------------|
//! | `AOF_CONFIG`         | `--config`         |
//! | `AOF_URL`            | `--url`            |
//! | `AOF_SESSION_COOKIE` | `--session-cookie` |
//! | `AOF_PASSWORD`       | `--password`       |
//!
//! Options override the config file, which overrides the built-in defaults.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use aof_client::application::session::{LoginCredentials, PromptResponse};
use aof_client::domain::config::{load_config, load_config_from};
use aof_client::{Client, ClientConfig, PasswordPrompt, ViewEvent, ViewOptions};
use aof_core::{Persistence, UnlockFailure};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use rmpv::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Command-line client for the AOF service.
#[derive(Debug, Parser)]
#[command(name = "aof-client", about = "Command-line client for the AOF service", version)]
struct Cli {
    /// Config file to read instead of the platform default.
    #[arg(long, env = "AOF_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket URL of the session endpoint.
    #[arg(long, env = "AOF_URL")]
    url: Option<String>,

    /// Cookie header value issued by the HTTP login endpoint.
    #[arg(long, env = "AOF_SESSION_COOKIE", hide_env_values = true)]
    session_cookie: Option<String>,

    /// Password tried before prompting on stdin.
    #[arg(long, env = "AOF_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Remember the password on disk instead of for this run only.
    #[arg(long)]
    persist: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a resource key and print its value.
    Get {
        key: String,
        /// Print streamed partial values while the response arrives.
        #[arg(long)]
        partials: bool,
        /// Keep printing every change until Ctrl+C.
        #[arg(long)]
        watch: bool,
    },
    /// Run a handler with JSON arguments and print its result.
    Call {
        key: String,
        #[arg(long)]
        data: Option<String>,
    },
    /// Unlock the crypto session and print its status.
    Unlock,
}

impl Cli {
    /// Reads the config file and overlays the command-line options.
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => load_config().context("failed to load config")?,
        };
        if let Some(url) = &self.url {
            config.server.url = url.clone();
        }
        if let Some(cookie) = &self.session_cookie {
            config.server.session_cookie = Some(cookie.clone());
        }
        Ok(config)
    }

    fn persistence(&self) -> Persistence {
        if self.persist {
            Persistence::Durable
        } else {
            Persistence::Session
        }
    }
}

// ── Password prompt ───────────────────────────────────────────────────────────

/// Offers the `--password` value first, then reads lines from stdin.  An empty
/// line or end of input cancels.
struct StdinPrompt {
    preset: Mutex<Option<String>>,
    lines: Mutex<Lines<BufReader<Stdin>>>,
    persistence: Persistence,
}

impl StdinPrompt {
    fn new(preset: Option<String>, persistence: Persistence) -> Self {
        Self {
            preset: Mutex::new(preset),
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            persistence,
        }
    }
}

#[async_trait]
impl PasswordPrompt for StdinPrompt {
    async fn request_password(
        &self,
        last_failure: Option<UnlockFailure>,
    ) -> Option<PromptResponse> {
        if let Some(password) = self.preset.lock().await.take() {
            return Some(PromptResponse {
                password,
                persistence: self.persistence,
            });
        }

        let message = match last_failure {
            Some(failure) => format!("{failure}, password: "),
            None => "password: ".to_string(),
        };
        let mut stderr = tokio::io::stderr();
        let _ = stderr.write_all(message.as_bytes()).await;
        let _ = stderr.flush().await;

        let line = match self.lines.lock().await.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                warn!("could not read password: {e}");
                return None;
            }
        };
        let password = line.trim_end_matches('\r').to_string();
        if password.is_empty() {
            return None;
        }
        Some(PromptResponse {
            password,
            persistence: self.persistence,
        })
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

fn to_json(value: &Value) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(value).context("value has no JSON representation")
}

fn print_value(value: Option<&Value>) -> anyhow::Result<()> {
    let json = match value {
        Some(value) => to_json(value)?,
        None => serde_json::Value::Null,
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn parse_data(data: Option<&str>) -> anyhow::Result<Value> {
    let Some(data) = data else {
        return Ok(Value::Nil);
    };
    let json: serde_json::Value = serde_json::from_str(data).context("--data is not valid JSON")?;
    rmpv::ext::to_value(json).context("--data has no MessagePack representation")
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn get(client: &Client, key: String, partials: bool, watch: bool) -> anyhow::Result<()> {
    if !watch && !partials {
        let value = client
            .lazy_load(key.as_str())
            .await
            .with_context(|| format!("failed to load {key}"))?;
        return print_value(value.as_deref());
    }

    let view = client.view(
        key.as_str(),
        ViewOptions {
            keep_last_value: true,
            accept_partials: partials,
        },
    );
    let mut events = view.subscribe();
    if view.loaded() {
        print_value(view.get().as_deref())?;
        if !watch {
            return Ok(());
        }
    }

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        match event {
            Ok(ViewEvent::Update(value)) => {
                print_value(value.as_deref())?;
                if !watch && view.loaded() {
                    break;
                }
            }
            Ok(ViewEvent::Ping(value)) => print_value(Some(&value))?,
            Ok(ViewEvent::Error(e)) => {
                if !watch {
                    return Err(e).with_context(|| format!("failed to load {key}"));
                }
                warn!("{key}: {e}");
            }
            Err(RecvError::Lagged(skipped)) => warn!("skipped {skipped} updates"),
            Err(RecvError::Closed) => break,
        }
    }
    view.dispose();
    Ok(())
}

async fn call(client: &Client, key: String, data: Option<String>) -> anyhow::Result<()> {
    let data = parse_data(data.as_deref())?;
    let result = client
        .load(key.as_str(), data)
        .await
        .with_context(|| format!("{key} failed"))?;
    print_value(Some(&result))
}

async fn unlock(client: &Client, credentials: Option<LoginCredentials>) -> anyhow::Result<()> {
    let session = client.session();
    let result = match credentials {
        Some(credentials) => session.unlock_with_login(credentials).await,
        None => session.session(true).await,
    };
    result.context("failed to unlock the session")?;
    print_value(Some(&session.status().to_value()))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.client_config()?;
    info!("aof-client connecting to {}", config.server.url);

    // `unlock` hands the password to the login path; other commands offer it
    // to the prompt when a handler first needs the session.
    let (credentials, preset) = match (&cli.command, cli.password.clone()) {
        (Command::Unlock, Some(password)) => (
            Some(LoginCredentials {
                password,
                persist: cli.persist,
            }),
            None,
        ),
        (_, password) => (None, password),
    };
    let prompt = Arc::new(StdinPrompt::new(preset, cli.persistence()));
    let client = Client::start(&config, prompt).context("failed to start the client")?;

    let result = match cli.command {
        Command::Get {
            key,
            partials,
            watch,
        } => get(&client, key, partials, watch).await,
        Command::Call { key, data } => call(&client, key, data).await,
        Command::Unlock => unlock(&client, credentials).await,
    };

    client.shutdown().await;
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
