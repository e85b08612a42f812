//! sessionkeeper - resume a session against the Authentication Service and
//! issue authenticated requests that survive access token expiry.

mod cli;

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::ArgMatches;
use futures::future::join_all;
use serde_json::Value;
use sessionkeeper_core::{Config, Navigator, SessionClient, SessionState};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the password for non-interactive logins.
const PASSWORD_ENV: &str = "SESSIONKEEPER_PASSWORD";

/// A terminal has no pages to move between, so a redirect to login is
/// reported to the user instead.
struct TerminalNavigator {
    location: Mutex<String>,
}

impl TerminalNavigator {
    fn new() -> Self {
        Self {
            location: Mutex::new("/".to_string()),
        }
    }
}

impl Navigator for TerminalNavigator {
    fn current_location(&self) -> String {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn redirect(&self, location: &str) {
        eprintln!("Session expired. Log in again to continue.");
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = location.to_string();
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env()?;
    if let Some(url) = matches.get_one::<String>("base-url") {
        config.base_url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let matches = cli::new().get_matches();
    init_tracing(matches.get_one::<String>("log-level").map(String::as_str));

    let config = load_config(&matches)?;
    info!(base_url = %config.base_url, "sessionkeeper starting");

    let client = SessionClient::new(config, Arc::new(TerminalNavigator::new()))?;

    match matches.subcommand() {
        Some(("whoami", _)) => whoami(&client).await,
        Some(("get", sub)) => {
            let paths: Vec<String> = sub
                .get_many::<String>("paths")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            get(&client, sub.get_one::<String>("email").map(String::as_str), &paths).await
        }
        _ => anyhow::bail!("No command given, see --help"),
    }
}

async fn whoami(client: &SessionClient) -> Result<()> {
    match client.bootstrap().await? {
        SessionState::Authenticated => {
            let user = client
                .session()
                .current_user()
                .context("Session resumed without a user")?;
            println!("{} <{}>", user.display_name(), user.email);
        }
        state => println!("Not logged in ({})", state.as_str()),
    }
    Ok(())
}

async fn get(client: &SessionClient, email: Option<&str>, paths: &[String]) -> Result<()> {
    match email {
        Some(email) => {
            let password = read_password(email)?;
            let user = client.login(email, &password).await?;
            debug!(user_id = %user.id, "Logged in");
        }
        None => {
            client.bootstrap().await?;
        }
    }

    let results = join_all(paths.iter().map(|path| client.get_json::<Value>(path))).await;

    let mut failures = 0;
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", path, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} requests failed", failures, paths.len());
    }
    Ok(())
}

fn read_password(email: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")
}
