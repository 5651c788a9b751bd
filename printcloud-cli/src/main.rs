//! printcloud CLI
//!
//! Command-line client for the printcloud REST API.
//!
//! # Usage
//!
//! ```bash
//! # Print the URL to log in with, then paste back where the browser landed
//! printcloud login-url
//! printcloud complete-login --state <state> 'http://localhost:9876/#access_token=...&state=...'
//!
//! # Inspect cached credentials
//! printcloud status
//!
//! # Call an endpoint and wait for a deferred result
//! printcloud request POST /geom/meshes/import --body '{"file_id": "f1"}' --wait
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use printcloud_core::{
    ApiClient, Credential, CredentialKind, LoginFlow, Method, ProgressCallback, RedirectParams,
    SecretStore, WaitOptions, create_store,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use printcloud_cli::config::{self, CliConfig};

#[derive(Parser)]
#[command(name = "printcloud")]
#[command(about = "Client for the printcloud 3D printing API")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the URL a user opens to log in
    LoginUrl {
        /// Open the registration form instead of the login form
        #[arg(long)]
        register: bool,

        /// Use the authorization code flow instead of the implicit flow
        #[arg(long)]
        server: bool,
    },

    /// Finish a login from the URL the browser was redirected to
    CompleteLogin {
        /// The full redirect URL, including its query or fragment
        redirect_url: String,

        /// Exchange an authorization code instead of reading a token
        #[arg(long)]
        server: bool,

        /// The state printed by login-url; the redirect must echo it
        #[arg(long)]
        state: Option<String>,
    },

    /// Get a guest token, fetching one if needed
    GuestToken,

    /// Show the state of cached credentials
    Status,

    /// Refresh the access token
    Refresh,

    /// Forget the logged-in user
    Logout,

    /// Wait for a running task to finish
    WaitTask {
        /// Task identifier
        task_id: String,

        /// Delay between polls in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Send a request to an API endpoint
    Request {
        /// HTTP method (GET, POST, PUT, DELETE)
        method: String,

        /// Endpoint path relative to the API root, e.g. /print/printers
        endpoint: String,

        /// Authorize with the guest token instead of the access token
        #[arg(long)]
        guest: bool,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,

        /// Wait for the result if the server defers it
        #[arg(long)]
        wait: bool,
    },
}

type Client = ApiClient<Box<dyn SecretStore>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    init_logging(&config.log_level, cli.verbose);
    info!("Loaded configuration from {:?}", config.config_path);

    let client = build_client(&config)?;

    match cli.command {
        Commands::LoginUrl { register, server } => login_url(&client, register, flow(server)),
        Commands::CompleteLogin {
            redirect_url,
            server,
            state,
        } => complete_login(&client, &redirect_url, flow(server), state.as_deref()).await,
        Commands::GuestToken => guest_token(&client).await,
        Commands::Status => status(&client).await,
        Commands::Refresh => refresh(&client).await,
        Commands::Logout => logout(&client).await,
        Commands::WaitTask {
            task_id,
            interval_ms,
            timeout_ms,
        } => wait_task(&client, &task_id, interval_ms, timeout_ms).await,
        Commands::Request {
            method,
            endpoint,
            guest,
            body,
            wait,
        } => request(&client, &method, &endpoint, guest, body.as_deref(), wait).await,
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(config: &CliConfig) -> Result<Client> {
    let client_config = config.client_config()?;
    let store = create_store(&config.store_backend()).context("Failed to open credential store")?;
    ApiClient::new(client_config, store).context("Failed to create API client")
}

fn flow(server: bool) -> LoginFlow {
    if server {
        LoginFlow::Server
    } else {
        LoginFlow::Implicit
    }
}

fn login_url(client: &Client, register: bool, flow: LoginFlow) -> Result<()> {
    let redirect = client.tokens().login_redirect_url(register, flow)?;
    println!("{}", redirect.url);
    println!("state: {}", redirect.state.secret());
    Ok(())
}

async fn complete_login(
    client: &Client,
    redirect_url: &str,
    flow: LoginFlow,
    state: Option<&str>,
) -> Result<()> {
    let params = RedirectParams::from_url(redirect_url)
        .with_context(|| format!("Not a valid redirect URL: {}", redirect_url))?;
    let tokens = client.tokens();
    let credential = match state {
        Some(state) => tokens.complete_login_with_state(flow, &params, state).await?,
        None => {
            warn!("Redirect state not verified; pass --state to check it");
            tokens.complete_login(flow, &params).await?
        }
    };

    println!("Logged in to {}", client.config().api_name());
    print_expiry("access token", &credential);
    Ok(())
}

async fn guest_token(client: &Client) -> Result<()> {
    let credential = client.tokens().get_guest_credential().await?;
    println!("{}", credential.access_token.expose());
    print_expiry("guest token", &credential);
    Ok(())
}

async fn status(client: &Client) -> Result<()> {
    let config = client.config();
    println!("API: {} ({})", config.api_root, config.api_name());
    println!("Client: {}", config.client_id);

    match client.tokens().get_access_credential().await? {
        Some(credential) if credential.is_valid() => {
            println!("Access token: valid");
            print_expiry("access token", &credential);
        }
        Some(_) if config.refresh_token_url.is_some() => {
            println!("Access token: expired (will refresh on next use)");
        }
        Some(_) => println!("Access token: expired"),
        None => println!("Access token: not logged in"),
    }

    let guest_key = config.storage_key(CredentialKind::Guest);
    let guest = client.tokens().store().exists(&guest_key).await?;
    println!("Guest token: {}", if guest { "cached" } else { "none" });
    Ok(())
}

async fn refresh(client: &Client) -> Result<()> {
    let credential = client.tokens().refresh_access_credential().await?;
    println!("Access token refreshed");
    print_expiry("access token", &credential);
    Ok(())
}

async fn logout(client: &Client) -> Result<()> {
    client.tokens().logout().await?;
    println!("Logged out");
    Ok(())
}

async fn wait_task(
    client: &Client,
    task_id: &str,
    interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let defaults = WaitOptions::from(&client.config().tasks);
    let options = WaitOptions::new(
        interval_ms.map(Duration::from_millis).unwrap_or(defaults.poll_interval),
        timeout_ms.map(Duration::from_millis).unwrap_or(defaults.timeout),
    );

    let waiter = printcloud_core::TaskWaiter::new(client.clone(), options)
        .with_progress(progress_printer());
    let token = waiter.cancellation_token();

    let result = tokio::select! {
        result = waiter.wait_for(task_id) => result?,
        _ = tokio::signal::ctrl_c() => {
            token.cancel();
            bail!("Interrupted while waiting for task {}", task_id);
        }
    };

    print_json(&result)
}

async fn request(
    client: &Client,
    method: &str,
    endpoint: &str,
    guest: bool,
    body: Option<&str>,
    wait: bool,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let kind = if guest {
        CredentialKind::Guest
    } else {
        CredentialKind::Access
    };

    let mut request = client.request(kind, method, endpoint).await?;
    if let Some(body) = body {
        let body = serde_json::from_str(body).context("Request body is not valid JSON")?;
        request = request.with_body(body);
    }

    if wait {
        let result = client
            .send_and_wait(request, Some(progress_printer()))
            .await?;
        print_json(&result)
    } else {
        let response = client.send(request).await?;
        eprintln!("HTTP {}", response.status);
        print_json(&response.body)
    }
}

fn progress_printer() -> ProgressCallback {
    Arc::new(|progress| eprintln!("progress: {:.0}%", progress * 100.0))
}

fn print_expiry(label: &str, credential: &Credential) {
    if let Some(expires_at) = credential.expires_at {
        println!("  {} expires {} ({})", label, expires_at.to_rfc3339(), remaining(expires_at));
    }
}

fn remaining(expires_at: DateTime<Utc>) -> String {
    let left = expires_at - Utc::now();
    if left.num_seconds() <= 0 {
        "expired".to_string()
    } else if left.num_hours() > 0 {
        format!("in {}h {}m", left.num_hours(), left.num_minutes() % 60)
    } else {
        format!("in {}m {}s", left.num_minutes(), left.num_seconds() % 60)
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
