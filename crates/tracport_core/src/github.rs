use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::TracportConfig;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const PAGE_SIZE: usize = 100;
const ACCEPT_HEADER: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "2022-11-28";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Open,
    Closed,
}

impl RecordState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Fields of an issue create/update call. Unset fields are left out of the
/// request so an update only touches what it names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssuePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RecordState>,
}

impl IssuePayload {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn close() -> Self {
        Self {
            state: Some(RecordState::Closed),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestonePayload {
    pub title: String,
    pub state: RecordState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentPayload {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteLabel {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteMilestone {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub state: Option<RecordState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteIssue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: Option<RecordState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteComment {
    pub id: u64,
}

/// Remote issue tracker operations used by the ticket migration.
pub trait IssueTrackerApi {
    fn list_labels(&mut self) -> Result<Vec<RemoteLabel>>;
    fn create_label(&mut self, label: &LabelPayload) -> Result<RemoteLabel>;
    fn list_milestones(&mut self, state: RecordState) -> Result<Vec<RemoteMilestone>>;
    fn create_milestone(&mut self, milestone: &MilestonePayload) -> Result<RemoteMilestone>;
    fn create_issue(&mut self, issue: &IssuePayload) -> Result<RemoteIssue>;
    fn update_issue(&mut self, number: u64, issue: &IssuePayload) -> Result<RemoteIssue>;
    fn create_comment(&mut self, number: u64, comment: &CommentPayload) -> Result<RemoteComment>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub api_url: String,
    pub repo: String,
    pub token: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    /// Defaults to zero: a duplicated create shifts issue numbering.
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl GitHubClientConfig {
    pub fn from_config(config: &TracportConfig) -> Self {
        Self::from_lookup(
            config.github.repo.as_deref().unwrap_or(""),
            &config.user_agent(),
            &|key: &str| match key {
                "GITHUB_API_URL" => env::var(key)
                    .ok()
                    .or_else(|| config.github.api_url.clone()),
                _ => env::var(key).ok(),
            },
        )
    }

    pub fn from_lookup(
        repo_default: &str,
        user_agent_default: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        Self {
            api_url: text("GITHUB_API_URL", DEFAULT_API_URL),
            repo: text("GITHUB_REPO", repo_default),
            token: lookup("GITHUB_TOKEN")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            user_agent: text("TRACPORT_USER_AGENT", user_agent_default),
            timeout_ms: number("TRACPORT_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: number("TRACPORT_RATE_LIMIT_MS", 1_000),
            max_retries: usize::try_from(number("TRACPORT_HTTP_RETRIES", 2)).unwrap_or(2),
            max_write_retries: usize::try_from(number("TRACPORT_HTTP_WRITE_RETRIES", 0))
                .unwrap_or(0),
            retry_delay_ms: number("TRACPORT_HTTP_RETRY_DELAY_MS", 1_000),
        }
    }

    pub fn with_repo(mut self, repo: Option<&str>) -> Self {
        if let Some(repo) = repo.map(str::trim).filter(|repo| !repo.is_empty()) {
            self.repo = repo.to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_repo_slug(&self.repo)?;
        if self.token.is_none() {
            bail!("GITHUB_TOKEN is not set; a token with repo scope is required");
        }
        Url::parse(&self.api_url)
            .with_context(|| format!("invalid GITHUB_API_URL: {}", self.api_url))?;
        Ok(())
    }
}

pub fn validate_repo_slug(repo: &str) -> Result<()> {
    let Some((owner, name)) = repo.split_once('/') else {
        bail!("GitHub repository must be given as owner/name, got `{repo}`");
    };
    if owner.trim().is_empty() || name.trim().is_empty() || name.contains('/') {
        bail!("GitHub repository must be given as owner/name, got `{repo}`");
    }
    Ok(())
}

pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn repo(&self) -> &str {
        &self.config.repo
    }

    fn repo_url(&self, path: &str) -> Result<Url> {
        repo_endpoint(&self.config.api_url, &self.config.repo, path)
    }

    fn request<T: DeserializeOwned>(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T> {
        let url = self.repo_url(path)?;
        let is_write = method != Method::GET;
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };

        for attempt in 0..=max_retries {
            self.apply_rate_limit();
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header("Accept", ACCEPT_HEADER)
                .header("X-GitHub-Api-Version", API_VERSION_HEADER)
                .header("User-Agent", self.config.user_agent.clone())
                .query(query);
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            debug!(%method, path, attempt, "GitHub API request");

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        let message = response
                            .json::<Value>()
                            .ok()
                            .and_then(|payload| {
                                payload
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .map(ToString::to_string)
                            })
                            .unwrap_or_else(|| "no message".to_string());
                        bail!("GitHub API {method} {path} failed with HTTP {status}: {message}");
                    }
                    return response
                        .json::<T>()
                        .with_context(|| {
                            format!("failed to decode GitHub API response for {path}")
                        });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("failed to call GitHub API {method} {path}"));
                }
            }
        }

        bail!("GitHub API request exhausted retry budget")
    }

    fn list_paginated<T: DeserializeOwned>(
        &mut self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let mut query = extra.to_vec();
            query.push(("per_page", PAGE_SIZE.to_string()));
            query.push(("page", page.to_string()));
            let batch: Vec<T> = self.request(Method::GET, path, &query, None)?;
            let count = batch.len();
            items.extend(batch);
            if count < PAGE_SIZE {
                return Ok(items);
            }
            page += 1;
        }
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl IssueTrackerApi for GitHubClient {
    fn list_labels(&mut self) -> Result<Vec<RemoteLabel>> {
        self.list_paginated("labels", &[])
    }

    fn create_label(&mut self, label: &LabelPayload) -> Result<RemoteLabel> {
        let body = serde_json::to_value(label).context("failed to encode label payload")?;
        self.request(Method::POST, "labels", &[], Some(&body))
    }

    fn list_milestones(&mut self, state: RecordState) -> Result<Vec<RemoteMilestone>> {
        self.list_paginated("milestones", &[("state", state.as_str().to_string())])
    }

    fn create_milestone(&mut self, milestone: &MilestonePayload) -> Result<RemoteMilestone> {
        let body = serde_json::to_value(milestone).context("failed to encode milestone payload")?;
        self.request(Method::POST, "milestones", &[], Some(&body))
    }

    fn create_issue(&mut self, issue: &IssuePayload) -> Result<RemoteIssue> {
        let body = serde_json::to_value(issue).context("failed to encode issue payload")?;
        self.request(Method::POST, "issues", &[], Some(&body))
    }

    fn update_issue(&mut self, number: u64, issue: &IssuePayload) -> Result<RemoteIssue> {
        let body = serde_json::to_value(issue).context("failed to encode issue payload")?;
        self.request(Method::PATCH, &format!("issues/{number}"), &[], Some(&body))
    }

    fn create_comment(&mut self, number: u64, comment: &CommentPayload) -> Result<RemoteComment> {
        let body = serde_json::to_value(comment).context("failed to encode comment payload")?;
        self.request(
            Method::POST,
            &format!("issues/{number}/comments"),
            &[],
            Some(&body),
        )
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn repo_endpoint(api_url: &str, repo: &str, path: &str) -> Result<Url> {
    let base = api_url.trim_end_matches('/');
    let raw = format!("{base}/repos/{repo}/{path}");
    Url::parse(&raw).with_context(|| format!("invalid GitHub API endpoint: {raw}"))
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
