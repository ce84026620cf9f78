//! asciichat-directory — resolves peer handles to network addresses.
//!
//! The directory is a flat JSON object mapping handle → address:
//!
//! ```json
//! { "alice_1": "100.64.0.7", "bob": "bob-laptop.tailnet.ts.net" }
//! ```
//!
//! Backends:
//! - [`JsonFileDirectory`]: a local file, shared by hand or over a sync folder
//! - [`GithubDirectory`]: `directory.json` in a GitHub repository, via the
//!   contents API

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

pub mod file;
pub mod github;

pub use file::JsonFileDirectory;
pub use github::{GithubConfig, GithubDirectory};

/// Handle → address entries, ordered for stable serialization.
pub type Entries = BTreeMap<String, String>;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Address registered for `handle`, `None` if the handle is unknown.
    async fn lookup(&self, handle: &str) -> Result<Option<String>, DirectoryError>;

    /// Adds or replaces the entry for `handle`.
    async fn register(&self, handle: &str, address: &str) -> Result<(), DirectoryError>;
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Invalid handle '{0}'")]
    InvalidHandle(String),

    #[error("Directory is not a JSON object of strings: {0}")]
    Malformed(String),

    #[error("GITHUB_TOKEN is not set")]
    MissingToken,

    #[error("Directory request failed: {0}")]
    Request(String),

    #[error("Directory server returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DirectoryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

/// Handles are non-empty and free of whitespace and control characters.
pub fn validate_handle(handle: &str) -> Result<(), DirectoryError> {
    if handle.is_empty() || handle.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DirectoryError::InvalidHandle(handle.to_string()));
    }
    Ok(())
}
