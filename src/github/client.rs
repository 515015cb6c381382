use crate::config::AppConfig;
use async_trait::async_trait;
use jsonwebtoken::EncodingKey;
use octocrab::models::{AppId, InstallationId};
use octocrab::Octocrab;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single GitHub API call, classified for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// GitHub answered with an error status and message.
    Api { status: u16, message: String },
    /// Transport failures, token exchange failures, anything without a GitHub error body.
    Unexpected(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Api { status, message } => {
                write!(f, "Error! Status: {}. Message: {}", status, message)
            },
            ApiError::Unexpected(error) => write!(f, "Unexpected error: {}", error),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<octocrab::Error> for ApiError {
    fn from(error: octocrab::Error) -> Self {
        match error {
            octocrab::Error::GitHub { source, .. } => ApiError::Api {
                status: source.status_code.as_u16(),
                message: source.message.clone(),
            },
            other => ApiError::Unexpected(format!("{:?}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("private key is not a valid RSA PEM: {0}")]
    PrivateKey(#[from] jsonwebtoken::errors::Error),

    #[error("failed to build GitHub client: {0}")]
    Build(#[from] octocrab::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentRequest {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub body: String,
}

#[async_trait]
pub trait CommentPoster: Send + Sync {
    /// Creates one comment on an issue or pull request. Never retried.
    async fn create_comment(&self, request: &CommentRequest) -> Result<(), ApiError>;
}

/// Hands out clients authenticated as a specific installation of the app.
pub trait GitHubApp: Send + Sync {
    fn installation(&self, id: u64) -> Result<Arc<dyn CommentPoster>, ApiError>;
}

/// The app-level client, authenticated with the app's JWT.
#[derive(Clone)]
pub struct GitHubClient {
    octocrab: Octocrab,
}

impl GitHubClient {
    pub fn new(config: &AppConfig) -> Result<Self, ClientError> {
        let key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())?;

        let mut builder = Octocrab::builder().app(AppId(config.app_id), key);
        if let Some(hostname) = &config.enterprise_hostname {
            builder = builder.base_uri(enterprise_base_uri(hostname))?;
        }

        Ok(Self {
            octocrab: builder.build()?,
        })
    }

    /// Asks GitHub who we are, returning the app's name.
    pub async fn identify(&self) -> Result<String, ApiError> {
        let app = self.octocrab.current().app().await?;
        Ok(app.name)
    }
}

impl GitHubApp for GitHubClient {
    fn installation(&self, id: u64) -> Result<Arc<dyn CommentPoster>, ApiError> {
        let octocrab = self.octocrab.installation(InstallationId(id))?;
        Ok(Arc::new(InstallationClient { octocrab }))
    }
}

struct InstallationClient {
    octocrab: Octocrab,
}

#[async_trait]
impl CommentPoster for InstallationClient {
    async fn create_comment(&self, request: &CommentRequest) -> Result<(), ApiError> {
        self.octocrab
            .issues(&request.owner, &request.repo)
            .create_comment(request.issue_number, &request.body)
            .await?;
        Ok(())
    }
}

pub fn enterprise_base_uri(hostname: &str) -> String {
    format!("https://{}/api/v3", hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = include_str!("../../testdata/test-app-key.pem");

    fn config(enterprise_hostname: Option<&str>) -> AppConfig {
        AppConfig {
            app_id: 12345,
            private_key: TEST_KEY.to_string(),
            webhook_secret: "development".to_string(),
            enterprise_hostname: enterprise_hostname.map(str::to_string),
            port: 3000,
            comment_template: "Hello".to_string(),
        }
    }

    #[tokio::test]
    async fn builds_public_client_and_installation_clients() {
        let client = GitHubClient::new(&config(None)).unwrap();

        assert!(client.installation(1).is_ok());
        assert!(client.installation(2).is_ok());
    }

    #[tokio::test]
    async fn builds_enterprise_client() {
        assert!(GitHubClient::new(&config(Some("ghe.example.com"))).is_ok());
    }

    #[tokio::test]
    async fn rejects_garbage_private_key() {
        let mut config = config(None);
        config.private_key = "not a key".to_string();

        assert!(matches!(
            GitHubClient::new(&config),
            Err(ClientError::PrivateKey(_))
        ));
    }

    #[test]
    fn enterprise_hosts_use_api_v3() {
        assert_eq!(
            enterprise_base_uri("ghe.example.com"),
            "https://ghe.example.com/api/v3"
        );
    }

    #[test]
    fn api_errors_render_status_and_message() {
        let error = ApiError::Api {
            status: 403,
            message: "Forbidden".to_string(),
        };
        assert_eq!(error.to_string(), "Error! Status: 403. Message: Forbidden");

        let error = ApiError::Unexpected("connection reset".to_string());
        assert_eq!(error.to_string(), "Unexpected error: connection reset");
    }
}
