mod app;
mod config;
mod github;
#[cfg(test)]
mod test_utils;
mod webhook;

use crate::config::AppConfig;
use crate::github::client::GitHubClient;
use crate::github::events::pull_request::{PullRequestOpened, PULL_REQUEST_OPENED};
use crate::webhook::WebhookDispatcher;
use std::process;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const WEBHOOK_PATH: &str = "/api/webhook";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cfg!(debug_assertions) { "debug" } else { "info" })
        }))
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            error!("{}", e.remediation());
            process::exit(1);
        },
    };

    let github = match GitHubClient::new(&config) {
        Ok(github) => github,
        Err(e) => {
            error!(%e, "Could not set up the GitHub client");
            process::exit(1);
        },
    };

    match github.identify().await {
        Ok(name) => debug!("Authenticated as '{}'", name),
        Err(e) => warn!(%e, "Could not identify the GitHub App, continuing anyway"),
    }

    let mut dispatcher = WebhookDispatcher::new(&config.webhook_secret, Arc::new(github));
    dispatcher.on(
        PULL_REQUEST_OPENED,
        PullRequestOpened::new(config.comment_template.clone()),
    );
    dispatcher.on_error(webhook::log_error);

    let router = dispatcher
        .as_router(WEBHOOK_PATH)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;

    info!(
        "Server is listening for events at: http://localhost:{}{}",
        config.port, WEBHOOK_PATH
    );
    info!("Press Ctrl + C to quit.");

    axum::serve(listener, router).await?;

    Ok(())
}
