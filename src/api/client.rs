use std::time::Duration;

use tracing::debug;

use crate::api::{
    extract_detail, ApiError, CompletionRequest, TokenResponse, COMPLETION_PATH, REGISTER_PATH,
    TOKEN_PATH,
};

/// Join a base URL and an endpoint path without doubling or dropping the
/// separating slash.
///
/// ```
/// use eesyai::api::client::endpoint_url;
///
/// assert_eq!(endpoint_url("http://localhost:8000/", "/api/ai"), "http://localhost:8000/api/ai");
/// assert_eq!(endpoint_url("https://chat.example.com/v1", "auth/token"), "https://chat.example.com/v1/auth/token");
/// ```
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// HTTP client for the authentication and completion endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, connect_timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for a bearer token (`POST /auth/token`).
    pub async fn request_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, ApiError> {
        let url = endpoint_url(&self.base_url, TOKEN_PATH);
        debug!(url = %url, username = %username, "Requesting token");
        let response = self
            .http
            .post(url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    /// Create an account (`POST /auth/register`).
    pub async fn register(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let url = endpoint_url(&self.base_url, REGISTER_PATH);
        debug!(url = %url, username = %username, "Registering account");
        let response = self
            .http
            .post(url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Start a completion (`POST /api/ai`). The returned response has a
    /// success status and an unread, streamed text body.
    pub async fn open_completion(
        &self,
        token: &str,
        request: &CompletionRequest,
    ) -> Result<reqwest::Response, ApiError> {
        let url = endpoint_url(&self.base_url, COMPLETION_PATH);
        debug!(
            url = %url,
            history = request.history.len(),
            "Opening completion stream"
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), body = %body, "Request rejected");
    Err(ApiError::Status {
        status: status.as_u16(),
        detail: extract_detail(&body),
    })
}
