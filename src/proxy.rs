//! Forwarding of authorized requests to the local inference endpoint.
//!
//! Every outbound call carries its own deadline and is attempted exactly
//! once. Dropping the returned future (client went away) abandons the call.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::UpstreamConfig;
use crate::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryLength {
    Short,
    Long,
}

impl SummaryLength {
    pub fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw.map(str::trim) {
            None | Some("") | Some("short") => Ok(SummaryLength::Short),
            Some("long") => Ok(SummaryLength::Long),
            Some(other) => Err(ApiError::BadRequest(format!(
                "length must be 'short' or 'long', got {:?}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryLength::Short => "short",
            SummaryLength::Long => "long",
        }
    }
}

/// What the caller asked for. Modes differ only in how the upstream prompt
/// is built and in their deadline.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Generate { prompt: String },
    Summarize { text: String, length: SummaryLength },
    ResolveTicket { ticket_id: String, ticket: Value },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Generate { .. } => "generate",
            Operation::Summarize { .. } => "summarize",
            Operation::ResolveTicket { .. } => "ticket_resolve",
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            Operation::Generate { prompt } => prompt.clone(),
            Operation::Summarize { text, length } => summarize_prompt(text, *length),
            Operation::ResolveTicket { ticket_id, ticket } => ticket_prompt(ticket_id, ticket),
        }
    }
}

pub fn summarize_prompt(text: &str, length: SummaryLength) -> String {
    format!(
        "Summarize the following text in a {} summary:\n\n{}",
        length.as_str(),
        text
    )
}

pub fn ticket_prompt(ticket_id: &str, ticket: &Value) -> String {
    let field = |names: &[&str]| {
        names
            .iter()
            .filter_map(|name| ticket.get(*name).and_then(Value::as_str))
            .find(|value| !value.is_empty())
            .map(str::to_string)
    };
    let subject = field(&["subject", "title"]).unwrap_or_else(|| format!("Ticket {}", ticket_id));
    let description = field(&["description", "body"]).unwrap_or_default();

    format!(
        "You are an assistant that helps support engineers.\n\
         Summarize the ticket and propose a short resolution message to send to the reporter.\n\n\
         Subject: {}\n\nDescription:\n{}\n\n\
         Provide: 1) Short summary 2) Proposed response 3) Steps to reproduce or fix (if any).",
        subject, description
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamProbe {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayProxy {
    client: Client,
    config: UpstreamConfig,
}

impl GatewayProxy {
    pub fn new(config: UpstreamConfig) -> Result<Self, ApiError> {
        Url::parse(&config.url)
            .map_err(|e| ApiError::Config(format!("upstream url {:?}: {}", config.url, e)))?;

        let client = Client::builder()
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn timeout_for(&self, operation: &Operation) -> Duration {
        let timeouts = &self.config.timeouts;
        match operation {
            Operation::Generate { .. } => timeouts.generate,
            Operation::Summarize { .. } => timeouts.summarize,
            Operation::ResolveTicket { .. } => timeouts.ticket_resolve,
        }
    }

    /// Endpoints speaking the `/v1/responses` dialect take `input`; the
    /// classic generate API takes `prompt` and must be told not to stream.
    pub fn build_payload(&self, prompt: &str) -> Value {
        if self.config.url.contains("/v1/responses") {
            json!({ "model": self.config.model, "input": prompt })
        } else {
            json!({ "model": self.config.model, "prompt": prompt, "stream": false })
        }
    }

    /// Sends the operation's prompt upstream and returns the parsed JSON body.
    pub async fn forward(&self, operation: &Operation) -> Result<Value, ApiError> {
        let payload = self.build_payload(&operation.prompt());
        let timeout = self.timeout_for(operation);

        let response = self
            .client
            .post(&self.config.url)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| upstream_failure(operation.name(), "request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(operation = operation.name(), %status, "upstream returned error status");
            return Err(ApiError::Upstream(format!("upstream returned HTTP {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| upstream_failure(operation.name(), "invalid JSON body", e))
    }

    /// Downloads text to summarize. Failures are the caller's problem (bad
    /// URL, unreachable host), so they come back as `BadRequest`.
    pub async fn fetch_text(&self, url: &str) -> Result<String, ApiError> {
        let parsed = Url::parse(url)
            .map_err(|e| ApiError::BadRequest(format!("Could not parse URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::BadRequest(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let limit = self.config.max_fetch_bytes;
        let too_large = || ApiError::BadRequest(format!("URL body exceeds {} bytes", limit));

        let mut response = self
            .client
            .get(parsed)
            .timeout(self.config.timeouts.url_fetch)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::BadRequest(format!("Could not fetch URL: {}", e)))?;

        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Could not read URL body: {}", e)))?
        {
            if body.len() + chunk.len() > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Looks a ticket up on the configured third-party endpoint.
    pub async fn lookup_ticket(&self, ticket_id: &str) -> Result<Value, ApiError> {
        let lookup_url = self
            .config
            .ticket_lookup_url
            .as_deref()
            .ok_or_else(|| ApiError::Config("TICKET_LOOKUP_URL not configured".to_string()))?;

        let response = self
            .client
            .get(lookup_url)
            .query(&[("ticket_id", ticket_id)])
            .timeout(self.config.timeouts.ticket_lookup)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| upstream_failure("ticket_lookup", "Error fetching ticket", e))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| upstream_failure("ticket_lookup", "Ticket endpoint returned non-JSON", e))
    }

    /// Reachability only; any HTTP answer counts as reachable.
    pub async fn probe(&self) -> UpstreamProbe {
        match self
            .client
            .get(&self.config.url)
            .timeout(self.config.timeouts.health_probe)
            .send()
            .await
        {
            Ok(response) => UpstreamProbe {
                reachable: true,
                status: Some(response.status().as_u16()),
                error: None,
            },
            Err(e) => UpstreamProbe {
                reachable: false,
                status: None,
                error: Some(e.to_string()),
            },
        }
    }
}

fn upstream_failure(operation: &str, what: &str, err: reqwest::Error) -> ApiError {
    let detail = if err.is_timeout() {
        format!("{}: timed out", what)
    } else {
        format!("{}: {}", what, err)
    };
    tracing::error!(operation, error = %err, "{}", what);
    ApiError::Upstream(detail)
}
