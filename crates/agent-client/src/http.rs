use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AgentError, AgentResult};

/// Where a service lives and how long a single call may take
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ServiceEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout,
        }
    }
}

/// Shared JSON-over-HTTP plumbing for every scoring client
#[derive(Clone)]
pub struct JsonTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl JsonTransport {
    pub fn new(endpoint: &ServiceEndpoint) -> AgentResult<Self> {
        let client = reqwest::Client::builder().timeout(endpoint.timeout).build()?;
        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post<Req, Resp>(&self, path: &str, body: &Req) -> AgentResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout
            } else {
                AgentError::RequestFailed(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AgentError::RateLimited(format!("{} returned {}", url, status)));
        }
        if status.is_server_error() {
            return Err(AgentError::ServiceUnavailable(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(AgentError::Rejected(format!("{} returned {}", url, status)));
        }

        let text = response.text().await?;
        serde_json::from_str::<Resp>(&text).map_err(|e| AgentError::InvalidResponse(format!("{}: {}", url, e)))
    }

    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
