//! Test doubles shared by the unit tests.

use crate::github::client::{ApiError, CommentPoster, CommentRequest, GitHubApp};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::io;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Records every comment request together with the installation it was made for.
#[derive(Clone, Default)]
pub struct FakeGitHub {
    calls: Arc<Mutex<Vec<(u64, CommentRequest)>>>,
    failure: Option<ApiError>,
}

impl FakeGitHub {
    pub fn failing(error: ApiError) -> Self {
        Self {
            calls: Arc::default(),
            failure: Some(error),
        }
    }

    pub fn calls(&self) -> Vec<(u64, CommentRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn poster(&self, installation: u64) -> FakeInstallation {
        FakeInstallation {
            installation,
            github: self.clone(),
        }
    }
}

impl GitHubApp for FakeGitHub {
    fn installation(&self, id: u64) -> Result<Arc<dyn CommentPoster>, ApiError> {
        Ok(Arc::new(self.poster(id)))
    }
}

pub struct FakeInstallation {
    installation: u64,
    github: FakeGitHub,
}

#[async_trait]
impl CommentPoster for FakeInstallation {
    async fn create_comment(&self, request: &CommentRequest) -> Result<(), ApiError> {
        self.github
            .calls
            .lock()
            .unwrap()
            .push((self.installation, request.clone()));

        match &self.github.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Builds a webhook delivery signed with `secret`, the way GitHub signs them.
pub fn signed_request(path: &str, secret: &str, event: &str, payload: &Value) -> Request<Body> {
    signed_raw_request(path, secret, event, serde_json::to_vec(payload).unwrap())
}

/// Same as [`signed_request`] for bodies that need not be JSON.
pub fn signed_raw_request(path: &str, secret: &str, event: &str, body: Vec<u8>) -> Request<Body> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(&body);
    let signature = hex::encode(mac.finalize().into_bytes());

    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
        .header("x-hub-signature-256", format!("sha256={}", signature))
        .body(Body::from(body))
        .unwrap()
}

/// Log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Routes this thread's log events into a buffer until the guard drops.
pub fn capture_logs() -> (LogBuffer, DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}
