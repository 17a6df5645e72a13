//! External challenge solving service
//!
//! The crawler never solves challenges itself. When a solving endpoint is
//! configured, the challenged page is submitted as a task and the task is
//! polled until the service reports a result. Callers bound the whole
//! exchange with a timeout.

use crate::config::ChallengeConfig;
use crate::crawler::session::FetchedPage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Characters of the challenged page sent along with a task
const HTML_EXCERPT_CHARS: usize = 8 * 1024;

/// Errors talking to a solving service
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Solver request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Solver rejected the task: {0}")]
    Rejected(String),

    #[error("Unexpected solver response: {0}")]
    Malformed(String),
}

/// Something that can clear a challenge on our behalf
#[async_trait]
pub trait SolvingService: Send + Sync {
    /// Returns Ok(true) when the challenge was cleared
    async fn solve(&self, page: &FetchedPage) -> Result<bool, SolverError>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    page_url: &'a str,
    html_excerpt: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    solved: Option<bool>,
}

/// JSON task API client: `POST {endpoint}/tasks`, then `GET {endpoint}/tasks/{id}`
pub struct HttpSolvingService {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    poll_interval: Duration,
}

impl HttpSolvingService {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        poll_interval: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            poll_interval,
        })
    }

    /// Builds the service from config, or None when no endpoint is set
    pub fn from_config(config: &ChallengeConfig) -> Result<Option<Self>, reqwest::Error> {
        match &config.solver_endpoint {
            Some(endpoint) => Ok(Some(Self::new(
                endpoint.clone(),
                config.solver_api_key.clone(),
                Duration::from_millis(config.solver_poll_interval_ms),
            )?)),
            None => Ok(None),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl SolvingService for HttpSolvingService {
    async fn solve(&self, page: &FetchedPage) -> Result<bool, SolverError> {
        let body = SubmitRequest {
            page_url: &page.final_url,
            html_excerpt: page.body.chars().take(HTML_EXCERPT_CHARS).collect(),
        };

        let response = self
            .authorized(self.client.post(format!("{}/tasks", self.endpoint)))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SolverError::Rejected(format!(
                "submit answered {}",
                response.status()
            )));
        }
        let task: SubmitResponse = response.json().await?;
        tracing::info!("Submitted challenge for {} as task {}", page.url, task.task_id);

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .authorized(
                    self.client
                        .get(format!("{}/tasks/{}", self.endpoint, task.task_id)),
                )
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(SolverError::Rejected(format!(
                    "poll answered {}",
                    response.status()
                )));
            }

            let state: TaskResponse = response.json().await?;
            match state.status.as_str() {
                "processing" | "pending" => continue,
                "ready" => return Ok(state.solved.unwrap_or(true)),
                "failed" => return Ok(false),
                other => return Err(SolverError::Malformed(format!("status '{}'", other))),
            }
        }
    }
}
