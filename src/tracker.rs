//! External tracking-ticket collaborator.
//!
//! The queue makes phases externally visible by creating one tracking
//! record per phase (plus one parent record per chain). The call is
//! treated as opaque, synchronous-per-call, and failable; the scheduler
//! performs no retry — failures propagate to the orchestrator's caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{QueueError, Result};

const GITHUB_API_URL: &str = "https://api.github.com";

/// Creates external tracking records for phases.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    /// Create one tracking record and return its external id.
    async fn create_task(&self, title: &str, body: &str, labels: &[String]) -> Result<i64>;
}

/// Request body for the GitHub issue-creation endpoint.
#[derive(Debug, Serialize)]
struct NewIssueRequest<'a> {
    title: &'a str,
    body: &'a str,
    labels: &'a [String],
}

/// Subset of the created-issue response we care about.
#[derive(Debug, Deserialize)]
struct CreatedIssue {
    number: i64,
}

/// GitHub Issues implementation of `TaskTracker`.
pub struct GitHubTracker {
    client: reqwest::Client,
    token: String,
    owner_repo: String,
}

impl GitHubTracker {
    /// `owner_repo` is the `owner/repo` slug the issues are created in.
    pub fn new(token: impl Into<String>, owner_repo: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            owner_repo: owner_repo.into(),
        }
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/issues", GITHUB_API_URL, self.owner_repo)
    }
}

#[async_trait]
impl TaskTracker for GitHubTracker {
    async fn create_task(&self, title: &str, body: &str, labels: &[String]) -> Result<i64> {
        let request = NewIssueRequest { title, body, labels };
        let issue: CreatedIssue = self
            .client
            .post(self.issues_url())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "hopper-queue")
            .header("Accept", "application/vnd.github+json")
            .json(&request)
            .send()
            .await
            .map_err(|e| QueueError::Tracker(format!("failed to send issue request: {}", e)))?
            .error_for_status()
            .map_err(|e| QueueError::Tracker(format!("issue creation rejected: {}", e)))?
            .json()
            .await
            .map_err(|e| QueueError::Tracker(format!("failed to parse issue response: {}", e)))?;
        Ok(issue.number)
    }
}
