use crate::github::client::{ApiError, CommentPoster, CommentRequest};
use crate::webhook::{EventHandler, WebhookDelivery};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

pub const PULL_REQUEST_OPENED: &str = "pull_request.opened";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestOpenedEvent {
    pub repository_owner: String,
    pub repository_name: String,
    pub pull_request_number: u64,
}

#[derive(Deserialize)]
struct Payload {
    repository: Repository,
    pull_request: PullRequest,
}

#[derive(Deserialize)]
struct Repository {
    name: String,
    owner: Owner,
}

#[derive(Deserialize)]
struct Owner {
    login: String,
}

#[derive(Deserialize)]
struct PullRequest {
    number: u64,
}

impl PullRequestOpenedEvent {
    pub fn from_delivery(delivery: &WebhookDelivery) -> serde_json::Result<Self> {
        let payload = Payload::deserialize(&delivery.payload)?;

        Ok(Self {
            repository_owner: payload.repository.owner.login,
            repository_name: payload.repository.name,
            pull_request_number: payload.pull_request.number,
        })
    }

    pub fn comment(&self, body: &str) -> CommentRequest {
        CommentRequest {
            owner: self.repository_owner.clone(),
            repo: self.repository_name.clone(),
            issue_number: self.pull_request_number,
            body: body.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentOutcome {
    Commented,
    Failed(ApiError),
}

/// Posts `template` on the pull request. Failures are logged and returned, never retried.
pub async fn handle(
    event: &PullRequestOpenedEvent,
    template: &str,
    client: &dyn CommentPoster,
) -> CommentOutcome {
    let number = event.pull_request_number;
    info!("Received a pull request event for #{}", number);

    match client.create_comment(&event.comment(template)).await {
        Ok(()) => {
            info!("Successfully commented on PR #{}", number);
            CommentOutcome::Commented
        },
        Err(e) => {
            error!(pull_request = number, "{}", e);
            CommentOutcome::Failed(e)
        },
    }
}

/// Greets every newly opened pull request with the same comment.
pub struct PullRequestOpened {
    template: String,
}

impl PullRequestOpened {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl EventHandler for PullRequestOpened {
    async fn handle(
        &self,
        client: Arc<dyn CommentPoster>,
        delivery: &WebhookDelivery,
    ) -> anyhow::Result<()> {
        let event = PullRequestOpenedEvent::from_delivery(delivery)?;
        handle(&event, &self.template, client.as_ref()).await;
        Ok(())
    }
}
