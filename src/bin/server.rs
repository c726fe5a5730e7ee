use serde::Deserialize;
use sharehouse_guard::server::{AppState, StaticCredentials, serve};
use sharehouse_guard::{Governance, GovernanceConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Optional single account for trying the login flow locally
#[derive(Debug, Default, Deserialize)]
struct DemoAccount {
    email: Option<String>,
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sharehouse_guard=info,guard_server=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = GovernanceConfig::from_env()?;
    tracing::info!(
        address = %config.server_addr(),
        mode = ?config.mode,
        "Configuration loaded"
    );

    let demo: DemoAccount = figment::Figment::new()
        .merge(figment::providers::Env::prefixed("GUARD_DEMO_"))
        .extract()?;
    let mut credentials = StaticCredentials::new();
    if let (Some(email), Some(password)) = (demo.email, demo.password) {
        tracing::info!("Demo account enabled");
        credentials = credentials.with_account(&email, password, "demo-user");
    }

    let state = AppState {
        governance: Arc::new(Governance::new(config.clone())),
        verifier: Arc::new(credentials),
    };

    serve(&config, state).await
}
