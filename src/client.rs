// Signed HTTP client for the upstream surfaces
use crate::config::UpstreamConfig;
use crate::document;
use crate::error::FailureKind;
use crate::signing::{canonical_query, RequestSigner, SigningContext, Verb};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub verb: Verb,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Verb::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Verb::Post, path)
    }

    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// One authenticated round trip to an upstream surface.
#[async_trait]
pub trait UpstreamTransport: Send + Sync + 'static {
    async fn call(&self, request: UpstreamRequest) -> Result<String, FailureKind>;
}

pub fn build_http_client(config: &UpstreamConfig) -> Result<reqwest::Client, FailureKind> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| FailureKind::ConfigurationError(format!("HTTP client: {e}")))
}

// No retries here; the caller owns any retry policy.
pub struct SignedRequestClient<S: RequestSigner> {
    http: reqwest::Client,
    base_url: String,
    signer: S,
}

impl<S: RequestSigner> SignedRequestClient<S> {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, signer: S) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }
}

#[async_trait]
impl<S: RequestSigner> UpstreamTransport for SignedRequestClient<S> {
    async fn call(&self, request: UpstreamRequest) -> Result<String, FailureKind> {
        let query = canonical_query(&request.query);
        let ctx = SigningContext {
            verb: request.verb,
            path: &request.path,
            query: &query,
            timestamp: Utc::now(),
        };
        let headers = self.signer.sign(&ctx)?;
        let url = format!("{}{}", self.base_url, ctx.endpoint());

        debug!(verb = request.verb.as_str(), path = %request.path, "calling upstream");

        let mut builder = self
            .http
            .request(request.verb.into(), &url)
            .headers(headers)
            .header(ACCEPT, self.signer.accept());
        if let Some(body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, self.signer.content_type())
                .body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FailureKind::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FailureKind::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = rejection_message(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "upstream error".to_string());
            warn!(status = status.as_u16(), path = %request.path, %message, "upstream rejected request");
            return Err(FailureKind::rejected(status.as_u16(), message));
        }
        Ok(body)
    }
}

fn rejection_message(body: &str) -> Option<String> {
    let doc = document::parse(body).ok()?;
    document::text(document::at(&doc, &["error"]))
        .or_else(|| document::text(document::at(&doc, &["message"])))
}
