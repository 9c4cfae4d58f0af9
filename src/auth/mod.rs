//! Session handling: the stored bearer token, login, signup, logout and the
//! screen gate that keeps unauthenticated users on the login screen.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::core::storage::{Storage, StorageError};

pub mod prompt;

/// Storage key of the bearer token.
pub const TOKEN_KEY: &str = "token";

const LOGIN_FAILED: &str = "Login failed";
const SIGNUP_FAILED: &str = "Signup failed";

/// The current user's token, cached in memory and mirrored to storage.
pub struct Session {
    storage: Arc<dyn Storage>,
    token: Option<String>,
}

impl Session {
    /// Load the stored token, if any. Unreadable storage counts as logged out.
    pub fn open(storage: Arc<dyn Storage>) -> Self {
        let token = match storage.get(TOKEN_KEY) {
            Ok(token) => token.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                warn!(error = %err, "Could not read stored session token");
                None
            }
        };
        Self { storage, token }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn store_token(&mut self, token: impl Into<String>) -> Result<(), StorageError> {
        let token = token.into();
        self.storage.set(TOKEN_KEY, &token)?;
        self.token = Some(token);
        Ok(())
    }

    /// Forget the token. The in-memory copy is dropped even when removing
    /// the stored copy fails.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.token = None;
        self.storage.remove(TOKEN_KEY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Main,
    Login,
    Signup,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Main => "/",
            Route::Login => "/login",
            Route::Signup => "/signup",
        }
    }

    pub fn requires_session(self) -> bool {
        matches!(self, Route::Main)
    }
}

/// Decide which screen to show for `requested`: the chat needs a token, and
/// the login and signup screens are skipped once there is one.
pub fn gate(requested: Route, session: &Session) -> Route {
    match (requested.requires_session(), session.is_authenticated()) {
        (true, false) => Route::Login,
        (false, true) => Route::Main,
        _ => requested,
    }
}

#[derive(Debug)]
pub enum AuthError {
    /// The server refused the credentials; carries its explanation.
    Rejected(String),
    /// No usable answer came back.
    Network,
    Storage(StorageError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Rejected(detail) => f.write_str(detail),
            AuthError::Network => f.write_str("Network error"),
            AuthError::Storage(err) => write!(f, "Could not save session: {err}"),
        }
    }
}

impl StdError for AuthError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            AuthError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

fn auth_error(err: ApiError, fallback: &str) -> AuthError {
    match err {
        ApiError::Status { detail, .. } => {
            AuthError::Rejected(detail.unwrap_or_else(|| fallback.to_string()))
        }
        ApiError::Transport(_) | ApiError::Decode(_) => AuthError::Network,
    }
}

/// Exchange credentials for a token without touching the session.
pub async fn login(api: &ApiClient, username: &str, password: &str) -> Result<String, AuthError> {
    let response = api
        .request_token(username, password)
        .await
        .map_err(|err| auth_error(err, LOGIN_FAILED))?;
    if response.access_token.trim().is_empty() {
        return Err(AuthError::Network);
    }
    info!(username = %username, "Logged in");
    Ok(response.access_token)
}

/// Log in and remember the token. A failed login leaves the session as it was.
pub async fn login_and_store(
    api: &ApiClient,
    session: &mut Session,
    username: &str,
    password: &str,
) -> Result<Route, AuthError> {
    let token = login(api, username, password).await?;
    session.store_token(token)?;
    Ok(Route::Main)
}

/// Register a new account. On success the user is sent to the login screen.
pub async fn signup(api: &ApiClient, username: &str, password: &str) -> Result<Route, AuthError> {
    api.register(username, password)
        .await
        .map_err(|err| auth_error(err, SIGNUP_FAILED))?;
    info!(username = %username, "Account created");
    Ok(Route::Login)
}

pub fn logout(session: &mut Session) -> Result<Route, StorageError> {
    session.clear()?;
    info!("Logged out");
    Ok(Route::Login)
}
