use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use relay_server::auth::jwt::{self, IdentityVerifier};
use relay_server::config::{generate_config_template, Config};
use relay_server::directory::SqliteDirectory;
use relay_server::state::AppState;
use relay_server::{db, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Handle --issue-token: print a credential and exit.
    // Must stay ahead of logging init: stdout carries only the token.
    if let Some(username) = &config.issue_token {
        let secret = jwt::resolve_secret(config.jwt_secret.as_deref(), &config.data_dir)?;
        println!("{}", jwt::issue_token(&secret, username, None)?);
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Relay server v{} starting", env!("CARGO_PKG_VERSION"));

    let jwt_secret = jwt::resolve_secret(config.jwt_secret.as_deref(), &config.data_dir)?;

    let db = db::init_db(&config.data_dir)?;
    let directory = Arc::new(SqliteDirectory::new(db));

    let app_state = AppState::new(
        IdentityVerifier::new(&jwt_secret),
        directory,
        config.session(),
    );

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
