use crate::app::App;
use crate::github::client::{ApiError, CommentPoster, GitHubApp};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequest, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use axum_github_webhook_extract::{GithubEvent, GithubToken};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const HEADER_EVENT: &str = "X-GitHub-Event";
const HEADER_DELIVERY: &str = "X-GitHub-Delivery";

const SIGNATURE_REJECTIONS: [&str; 4] = [
    "signature missing",
    "signature prefix missing",
    "signature malformed",
    "signature mismatch",
];
const REJECTION_LIMIT: usize = 4096;

type Rejection = <GithubEvent<Value> as FromRequest<App>>::Rejection;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("signature verification failed for {}", .event.as_deref().unwrap_or("unknown event"))]
    Verification { event: Option<String> },

    #[error("missing X-GitHub-Event header")]
    MissingEvent,

    #[error("malformed {event} payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("{event} delivery carries no installation")]
    MissingInstallation { event: String },

    #[error("could not authenticate as installation {id}: {source}")]
    Installation { id: u64, source: ApiError },

    #[error("handler for {event} failed: {source}")]
    Handler { event: String, source: anyhow::Error },
}

impl WebhookError {
    fn status(&self) -> StatusCode {
        match self {
            WebhookError::Verification { .. } => StatusCode::BAD_REQUEST,
            WebhookError::MissingEvent => StatusCode::BAD_REQUEST,
            WebhookError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            WebhookError::MissingInstallation { .. } => StatusCode::BAD_REQUEST,
            WebhookError::Installation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::Handler { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A verified delivery, ready to route.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub event: String,
    pub action: Option<String>,
    pub delivery_id: Option<String>,
    pub installation_id: Option<u64>,
    pub payload: Value,
}

#[derive(Deserialize)]
struct Envelope {
    action: Option<String>,
    installation: Option<Installation>,
}

#[derive(Deserialize)]
struct Installation {
    id: u64,
}

impl WebhookDelivery {
    pub fn new(
        event: impl Into<String>,
        delivery_id: Option<String>,
        payload: Value,
    ) -> Result<Self, WebhookError> {
        let event = event.into();
        if !payload.is_object() {
            return Err(WebhookError::MalformedPayload {
                event,
                reason: "body is not a JSON object".to_string(),
            });
        }

        let envelope =
            Envelope::deserialize(&payload).map_err(|e| WebhookError::MalformedPayload {
                event: event.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            event,
            action: envelope.action,
            delivery_id,
            installation_id: envelope.installation.map(|installation| installation.id),
            payload,
        })
    }

    /// `event.action`, or just `event` for deliveries without an action.
    pub fn name(&self) -> String {
        match &self.action {
            Some(action) => format!("{}.{}", self.event, action),
            None => self.event.clone(),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        client: Arc<dyn CommentPoster>,
        delivery: &WebhookDelivery,
    ) -> anyhow::Result<()>;
}

pub type ErrorHandler = Arc<dyn Fn(&WebhookError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Handled(usize),
    Unhandled,
}

pub struct WebhookDispatcher {
    token: GithubToken,
    github: Arc<dyn GitHubApp>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    error_handler: ErrorHandler,
}

impl WebhookDispatcher {
    pub fn new(secret: &str, github: Arc<dyn GitHubApp>) -> Self {
        Self {
            token: GithubToken(Arc::new(secret.to_string())),
            github,
            handlers: HashMap::new(),
            error_handler: Arc::new(log_error),
        }
    }

    /// Registers `handler` for `event_name`, either `event` or `event.action`.
    /// Registering the same name again replaces the previous handler.
    pub fn on(&mut self, event_name: &str, handler: impl EventHandler + 'static) {
        self.handlers.insert(event_name.to_string(), Arc::new(handler));
    }

    pub fn on_error(&mut self, handler: impl Fn(&WebhookError) + Send + Sync + 'static) {
        self.error_handler = Arc::new(handler);
    }

    pub fn token(&self) -> &GithubToken {
        &self.token
    }

    pub fn report(&self, error: &WebhookError) {
        (self.error_handler)(error);
    }

    pub async fn dispatch(&self, delivery: &WebhookDelivery) -> Result<Dispatched, WebhookError> {
        let name = delivery.name();

        let mut handlers = Vec::new();
        if let Some(handler) = self.handlers.get(&delivery.event) {
            handlers.push(handler.clone());
        }
        if name != delivery.event {
            if let Some(handler) = self.handlers.get(&name) {
                handlers.push(handler.clone());
            }
        }

        if handlers.is_empty() {
            debug!(event = %name, "No handler registered, ignoring");
            return Ok(Dispatched::Unhandled);
        }

        let id = delivery
            .installation_id
            .ok_or_else(|| WebhookError::MissingInstallation { event: name.clone() })?;
        let client = self
            .github
            .installation(id)
            .map_err(|source| WebhookError::Installation { id, source })?;

        for handler in &handlers {
            handler
                .handle(client.clone(), delivery)
                .await
                .map_err(|source| WebhookError::Handler {
                    event: name.clone(),
                    source,
                })?;
        }

        Ok(Dispatched::Handled(handlers.len()))
    }

    /// Routes `POST {path}` to this dispatcher. Anything else is left to the router's 404/405.
    pub fn as_router(self, path: &str) -> Router {
        Router::new()
            .route(path, post(receive))
            .with_state(App {
                dispatcher: Arc::new(self),
            })
    }
}

/// The default error handler.
pub fn log_error(error: &WebhookError) {
    match error {
        WebhookError::Verification { event } => {
            warn!(
                "Error processing request: {}",
                event.as_deref().unwrap_or("unknown event")
            )
        },
        other => error!("Webhook error: {}", other),
    }
}

async fn receive(
    State(app): State<App>,
    headers: HeaderMap,
    payload: Result<GithubEvent<Value>, Rejection>,
) -> Response {
    let dispatcher = &app.dispatcher;
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let event = header(HEADER_EVENT);
    let delivery_id = header(HEADER_DELIVERY);

    let payload = match payload {
        Ok(GithubEvent(payload)) => payload,
        Err(rejection) => return reject(dispatcher, event, rejection.into_response()).await,
    };

    let result = match event {
        Some(event) => WebhookDelivery::new(event, delivery_id, payload),
        None => Err(WebhookError::MissingEvent),
    };
    let delivery = match result {
        Ok(delivery) => delivery,
        Err(e) => return fail(dispatcher, e),
    };

    info!(
        event = %delivery.name(),
        delivery = delivery.delivery_id.as_deref().unwrap_or("-"),
        "Received webhook"
    );

    match dispatcher.dispatch(&delivery).await {
        Ok(Dispatched::Handled(handlers)) => {
            debug!(event = %delivery.name(), handlers, "Delivery handled");
            StatusCode::OK.into_response()
        },
        Ok(Dispatched::Unhandled) => StatusCode::OK.into_response(),
        Err(e) => fail(dispatcher, e),
    }
}

/// The extractor answers every failure with a 400 and a plain-text reason. Only the
/// signature reasons are verification failures; the rest are unreadable bodies.
async fn reject(
    dispatcher: &WebhookDispatcher,
    event: Option<String>,
    rejection: Response,
) -> Response {
    let (parts, body) = rejection.into_parts();
    let reason = axum::body::to_bytes(body, REJECTION_LIMIT)
        .await
        .unwrap_or_default();
    let reason = String::from_utf8_lossy(&reason).into_owned();

    let error = if SIGNATURE_REJECTIONS.contains(&reason.trim()) {
        WebhookError::Verification { event }
    } else {
        WebhookError::MalformedPayload {
            event: event.unwrap_or_else(|| "unknown event".to_string()),
            reason: reason.clone(),
        }
    };
    dispatcher.report(&error);

    Response::from_parts(parts, Body::from(reason))
}

fn fail(dispatcher: &WebhookDispatcher, error: WebhookError) -> Response {
    dispatcher.report(&error);
    (error.status(), error.to_string()).into_response()
}
