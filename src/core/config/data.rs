use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Environment variable that overrides the configured server address.
pub const BASE_URL_ENV: &str = "EESYAI_BASE_URL";

/// Where the session token is kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    /// Plain file in the data directory, next to the conversation list.
    #[default]
    File,
    /// Platform keyring (Secret Service, Keychain, Credential Manager).
    Keyring,
}

impl TokenStoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenStoreKind::File => "file",
            TokenStoreKind::Keyring => "keyring",
        }
    }
}

impl fmt::Display for TokenStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(TokenStoreKind::File),
            "keyring" => Ok(TokenStoreKind::Keyring),
            other => Err(format!(
                "unknown token store '{other}' (expected 'file' or 'keyring')"
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server hosting `/auth/*` and `/api/ai`
    pub base_url: Option<String>,
    /// Backend used for the session token
    pub token_store: Option<TokenStoreKind>,
    /// Connect timeout for API requests, in seconds
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    /// Resolve the server address: explicit override, then environment,
    /// then config file, then the built-in default.
    pub fn resolve_base_url(&self, override_url: Option<&str>) -> String {
        let from_env = std::env::var(BASE_URL_ENV).ok();
        override_url
            .map(str::to_string)
            .or(from_env)
            .or_else(|| self.base_url.clone())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn token_store(&self) -> TokenStoreKind {
        self.token_store.unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn print_all(&self) {
        println!("eesyai configuration:");
        match &self.base_url {
            Some(url) => println!("  base-url: {url}"),
            None => println!("  base-url: (unset, using {DEFAULT_BASE_URL})"),
        }
        println!("  token-store: {}", self.token_store());
        match self.request_timeout_secs {
            Some(secs) => println!("  request-timeout: {secs}s"),
            None => println!("  request-timeout: (unset)"),
        }
    }
}

/// Get a user-friendly display string for a path, using `~` for the home
/// directory on Unix-like systems.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
