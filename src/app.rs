use crate::webhook::WebhookDispatcher;
use axum::extract::FromRef;
use axum_github_webhook_extract::GithubToken;
use std::sync::Arc;

#[derive(Clone)]
pub struct App {
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl FromRef<App> for GithubToken {
    fn from_ref(state: &App) -> Self {
        state.dispatcher.token().clone()
    }
}
