use std::path::PathBuf;
use std::process::ExitCode;

use auth_session::config::{ConfigError, parse_base_url};
use auth_session::{
    ClientConfig, Destination, RegisterRequest, RouteDecision, SessionError, SessionManager, destination_for_path,
};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{}", .0.user_message())]
    Session(#[from] SessionError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "auth-cli", about = "Sign in, inspect and end API sessions from the terminal")]
struct Cli {
    /// API base URL including the version prefix.
    #[arg(long, env = "API_BASE_URL")]
    base_url: Option<String>,

    /// Directory holding the persisted session record.
    #[arg(long, env = "AUTH_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in as it.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    /// End the session locally and on the server.
    Logout,
    /// Show the signed-in user.
    Me {
        /// Skip the cache and ask the server.
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Show the locally stored session without touching the network.
    Status,
    /// Show where the route guard would send a navigation to `path`.
    Guard { path: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let manager = SessionManager::from_config(&resolve_config(cli.base_url, cli.store_dir)?)?;

    match cli.command {
        Command::Login { email, password } => {
            let payload = manager.login(&email, &password).await?;
            print_json(&json!({ "authenticated": true, "user": payload.user }))
        }
        Command::Register { email, username, password, confirm_password } => {
            let request = RegisterRequest { email, username, password, confirm_password };
            let payload = manager.register(&request).await?;
            print_json(&json!({ "authenticated": true, "user": payload.user }))
        }
        Command::Logout => {
            manager.logout().await;
            print_json(&json!({ "authenticated": false }))
        }
        Command::Me { refresh } => {
            let user = if refresh { manager.refresh_current_user().await? } else { manager.current_user().await? };
            print_json(&serde_json::to_value(user)?)
        }
        Command::Status => {
            let session = manager.session();
            print_json(&json!({ "authenticated": session.is_authenticated(), "user": session.user() }))
        }
        Command::Guard { path } => {
            let destination = destination_for_path(&path);
            let decision = manager.route_guard_check(destination);
            print_json(&guard_report(&path, destination, decision))
        }
    }
}

fn resolve_config(base_url: Option<String>, store_dir: Option<PathBuf>) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(raw) = base_url {
        config.base_url = parse_base_url(Some(&raw))?;
    }
    if let Some(dir) = store_dir {
        config.store_dir = dir;
    }
    Ok(config)
}

fn guard_report(path: &str, destination: Destination, decision: RouteDecision) -> Value {
    let destination = match destination {
        Destination::Public => "public",
        Destination::Protected => "protected",
        Destination::AuthOnly => "auth_only",
    };
    match decision {
        RouteDecision::Allow => json!({ "path": path, "destination": destination, "decision": "allow" }),
        RouteDecision::Redirect(surface) => json!({
            "path": path,
            "destination": destination,
            "decision": "redirect",
            "redirect_to": surface.path(),
        }),
    }
}

fn report(error: &CliError) {
    eprintln!("error: {error}");
    if let CliError::Session(SessionError::Validation { fields }) = error {
        for (field, messages) in fields {
            for message in messages {
                eprintln!("  {field}: {message}");
            }
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
