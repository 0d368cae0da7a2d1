use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::error::{LoginError, PollError, TransportError};
use crate::models::location::{PositionReport, Snapshot};

/// Acknowledgement of a successful push. The server may send any body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushAck {
    pub status: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub token: String,
    pub redirect: String,
}

/// The registry's write and read contracts as seen by the agents.
#[async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    async fn push_location(&self, report: &PositionReport) -> Result<PushAck, TransportError>;
    async fn fetch_locations(&self) -> Result<Snapshot, PollError>;
}

pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::from_client(reqwest::Client::new(), base_url)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::from_client(http, base_url))
    }

    pub fn from_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.read().is_some()
    }

    /// Logs in as a driver and keeps the session token for later pushes.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginSuccess, LoginError> {
        let response = self
            .http
            .post(self.url("/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Login failed")
                .to_string();
            return Err(LoginError::Rejected { status, message });
        }

        let Some(token) = body.get("token").and_then(Value::as_str) else {
            return Err(LoginError::Rejected { status, message: "Login failed".to_string() });
        };
        let redirect = body
            .get("redirect")
            .and_then(Value::as_str)
            .unwrap_or("/driver")
            .to_string();

        self.set_token(Some(token.to_string()));
        Ok(LoginSuccess { token: token.to_string(), redirect })
    }
}

async fn rejection(response: Response) -> TransportError {
    let status = response.status();
    let message = match response.json::<Value>().await {
        Ok(body) => body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(_) => None,
    };
    TransportError::Status {
        status,
        message: message.unwrap_or_else(|| status.to_string()),
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn push_location(&self, report: &PositionReport) -> Result<PushAck, TransportError> {
        let mut request = self.http.post(self.url("/update_location")).json(report);
        let token = self.token.read().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        Ok(response.json().await.unwrap_or_default())
    }

    async fn fetch_locations(&self) -> Result<Snapshot, PollError> {
        let response = self
            .http
            .get(self.url("/get_locations"))
            .send()
            .await
            .map_err(TransportError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Registry reports no locations yet");
            return Err(PollError::EmptyResult);
        }
        if !response.status().is_success() {
            return Err(rejection(response).await.into());
        }
        Ok(response.json().await.map_err(TransportError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let client = HttpRegistryClient::new("http://localhost:5000/");
        assert_eq!(client.url("/get_locations"), "http://localhost:5000/get_locations");
        assert!(!client.is_logged_in());
        client.set_token(Some("t".into()));
        assert!(client.is_logged_in());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // port 9 (discard) is essentially never listening on loopback
        let client =
            HttpRegistryClient::with_timeout("http://127.0.0.1:9", Duration::from_secs(2))
                .unwrap();
        assert!(matches!(
            client.fetch_locations().await,
            Err(PollError::Transport(TransportError::Network(_)))
        ));
        assert!(matches!(
            client.push_location(&PositionReport::new(1.0, 2.0, 3.0)).await,
            Err(TransportError::Network(_))
        ));
        let err = client.login("driver1", "pass123").await.unwrap_err();
        assert_eq!(err.to_string(), "Connection error. Please try again.");
    }
}
