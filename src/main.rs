use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;

use mailwire_server::{HttpOauthExchange, OauthConfig, ServerConfig};
use mailwire_store::Database;
use mailwire_telemetry::TelemetryConfig;

/// Webmail backend: auth routes plus the real-time wire relay.
#[derive(Parser, Debug)]
#[command(name = "mailwire", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9090)]
    port: u16,

    /// SQLite database path. Defaults to ~/.mailwire/mailwire.db.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Backend RPC endpoint, e.g. http://127.0.0.1:9450/rpc.
    /// Falls back to the API_SERVER_LOC env var.
    #[arg(long)]
    backend: Option<String>,

    /// Upper bound on one backend relay call, in seconds.
    #[arg(long, default_value_t = 30)]
    relay_timeout: u64,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    mailwire_telemetry::init_telemetry(TelemetryConfig {
        json: args.json_logs,
        ..Default::default()
    });

    tracing::info!("starting mailwire");

    let cookie_secret = SecretString::from(
        std::env::var("COOKIE_SECRET")
            .expect("COOKIE_SECRET must be set for secure cookie generation"),
    );

    let backend_endpoint = args
        .backend
        .or_else(|| std::env::var("API_SERVER_LOC").ok())
        .expect("backend RPC endpoint required (--backend or API_SERVER_LOC)");

    let db_path = args
        .database
        .unwrap_or_else(|| dirs_home().join(".mailwire").join("mailwire.db"));
    let db = Database::open(&db_path).expect("failed to open database");

    let oauth = Arc::new(HttpOauthExchange::new(oauth_config_from_env()));

    let config = ServerConfig {
        port: args.port,
        relay_timeout_secs: args.relay_timeout,
        ..Default::default()
    };

    let state = mailwire_server::app_state(config, db, &cookie_secret, backend_endpoint, oauth);
    let handle = mailwire_server::serve(state)
        .await
        .expect("failed to start server");

    tracing::info!(port = handle.port, "mailwire ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}

fn oauth_config_from_env() -> OauthConfig {
    let domain = std::env::var("SERVER_DOMAIN_NAME").unwrap_or_default();
    if domain.is_empty() {
        tracing::warn!("SERVER_DOMAIN_NAME unset; OAuth login will not work");
    }

    OauthConfig {
        auth_url: std::env::var("OAUTH_AUTH_URL")
            .unwrap_or_else(|_| "https://accounts.google.com/o/oauth2/auth".into()),
        token_url: std::env::var("OAUTH_TOKEN_URL")
            .unwrap_or_else(|_| "https://accounts.google.com/o/oauth2/token".into()),
        client_id: std::env::var("OAUTH_CLIENT_ID").unwrap_or_default(),
        client_secret: SecretString::from(
            std::env::var("OAUTH_CLIENT_SECRET").unwrap_or_default(),
        ),
        redirect_uri: format!("https://{domain}/auth/callback"),
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
