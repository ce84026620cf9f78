//! Directory kept as `directory.json` in a GitHub repository.
//!
//! ```text
//! GET  /repos/{repo}/contents/{path}  → { "content": base64(json), "sha": ... }
//!                                       404 → empty directory
//! PUT  /repos/{repo}/contents/{path}  ← { message, content, branch, sha? }
//! ```
//!
//! Every register is a read-modify-write; the blob `sha` from the read makes
//! GitHub refuse the write if someone else updated the file in between.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{validate_handle, Directory, DirectoryError, Entries};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_FILE: &str = "directory.json";
pub const DEFAULT_BRANCH: &str = "main";
pub const TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// `owner/name`.
    pub repo: String,
    pub file: String,
    pub branch: String,
    pub api_base: String,
    pub token: String,
    pub timeout: Duration,
}

impl GithubConfig {
    /// Config for `repo` with the token taken from `GITHUB_TOKEN`.
    pub fn from_env(repo: impl Into<String>) -> Result<Self, DirectoryError> {
        let token = std::env::var(TOKEN_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(DirectoryError::MissingToken)?;
        Ok(Self::new(repo, token))
    }

    pub fn new(repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            file: DEFAULT_FILE.to_string(),
            branch: DEFAULT_BRANCH.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(10),
        }
    }

    fn contents_url(&self) -> String {
        format!("{}/repos/{}/contents/{}", self.api_base.trim_end_matches('/'), self.repo, self.file)
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

/// Decodes the `content` field; GitHub wraps the base64 every 60 characters.
fn decode_contents(content: &str) -> Result<Entries, DirectoryError> {
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let json = STANDARD
        .decode(compact)
        .map_err(|e| DirectoryError::Malformed(format!("content is not base64: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}

fn encode_contents(entries: &Entries) -> Result<String, DirectoryError> {
    Ok(STANDARD.encode(serde_json::to_vec_pretty(entries)?))
}

// ── GithubDirectory ───────────────────────────────────────────────────────────

pub struct GithubDirectory {
    config: GithubConfig,
    client: Client,
}

impl GithubDirectory {
    pub fn new(config: GithubConfig) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("asciichat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    /// Current entries and the blob sha to update against (`None` if the file
    /// does not exist yet).
    pub async fn fetch(&self) -> Result<(Entries, Option<String>), DirectoryError> {
        let url = self.config.contents_url();
        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", self.config.token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let body: ContentsResponse = resp.json().await?;
                Ok((decode_contents(&body.content)?, Some(body.sha)))
            }
            StatusCode::NOT_FOUND => Ok((Entries::new(), None)),
            status => Err(DirectoryError::Http { status: status.as_u16(), body: resp.text().await.unwrap_or_default() }),
        }
    }

    async fn update(&self, entries: &Entries, sha: Option<&str>) -> Result<(), DirectoryError> {
        let body = UpdateRequest {
            message: "Update directory",
            content: encode_contents(entries)?,
            branch: &self.config.branch,
            sha,
        };
        let resp = self
            .client
            .put(self.config.contents_url())
            .header("Authorization", format!("token {}", self.config.token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            Ok(())
        } else {
            Err(DirectoryError::Http { status: status.as_u16(), body: resp.text().await.unwrap_or_default() })
        }
    }
}

#[async_trait]
impl Directory for GithubDirectory {
    async fn lookup(&self, handle: &str) -> Result<Option<String>, DirectoryError> {
        let (mut entries, _) = self.fetch().await?;
        Ok(entries.remove(handle))
    }

    async fn register(&self, handle: &str, address: &str) -> Result<(), DirectoryError> {
        validate_handle(handle)?;
        let (mut entries, sha) = self.fetch().await?;
        entries.insert(handle.to_string(), address.to_string());
        self.update(&entries, sha.as_deref()).await?;
        info!("Registered {} -> {} in {}/{}", handle, address, self.config.repo, self.config.file);
        Ok(())
    }
}
