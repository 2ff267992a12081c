//! HTTP backend for an external model server.
//!
//! Wire format (JSON):
//! - `POST {base}/fit` `{scope, epochs, examples: [{source_lang, target_lang, input, label}]}`
//!   → `{artifact_id, metrics: {name: value}}`
//! - `POST {base}/generate` `{artifact_id, text, source_lang, target_lang}`
//!   → `{text, score}`

use super::{
    FitOutput, Generation, ModelError, Scope, TrainingExample, TranslationModel,
    TranslationModelBackend,
};
use crate::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound for one request, connect through reading the body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct FitRequest<'a> {
    scope: String,
    epochs: u32,
    examples: Vec<FitExample<'a>>,
}

#[derive(Debug, Serialize)]
struct FitExample<'a> {
    source_lang: &'a str,
    target_lang: &'a str,
    input: &'a [String],
    label: &'a [String],
}

#[derive(Debug, Deserialize)]
struct FitResponse {
    artifact_id: String,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    artifact_id: &'a str,
    text: &'a str,
    source_lang: &'a str,
    target_lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
    score: f64,
}

/// Map an HTTP status to the retry taxonomy: 429 and 5xx are transient, other
/// 4xx are the server telling us the request itself is wrong.
fn status_error(status: reqwest::StatusCode, body: String) -> ModelError {
    let message = format!("model server error ({}): {}", status, body);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ModelError::Transient(message)
    } else {
        ModelError::Rejected(message)
    }
}

async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    body: &Req,
    timeout: Duration,
) -> Result<Resp, ModelError>
where
    Req: Serialize + ?Sized,
    Resp: for<'de> Deserialize<'de>,
{
    let response = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| ModelError::Transient(format!("request to {} failed: {}", url, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
        return Err(status_error(status, body));
    }

    response.json().await.map_err(|e| {
        if e.is_timeout() {
            ModelError::Transient(format!("request to {} timed out: {}", url, e))
        } else {
            ModelError::Rejected(format!("malformed response from {}: {}", url, e))
        }
    })
}

/// An artifact hosted by the model server.
#[derive(Debug, Clone)]
pub struct RemoteModel {
    client: reqwest::Client,
    base_url: String,
    artifact_id: String,
    timeout: Duration,
}

impl RemoteModel {
    pub fn new(client: reqwest::Client, base_url: &str, artifact_id: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            artifact_id: artifact_id.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }
}

#[async_trait]
impl TranslationModel for RemoteModel {
    async fn generate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Generation, ModelError> {
        let request = GenerateRequest {
            artifact_id: &self.artifact_id,
            text,
            source_lang,
            target_lang,
        };
        let url = format!("{}/generate", self.base_url);
        let response: GenerateResponse =
            post_json(&self.client, &url, &request, self.timeout).await?;
        Ok(Generation {
            text: response.text,
            confidence: response.score,
        })
    }
}

/// Backend delegating `fit` to the model server.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    timeout: Duration,
}

impl RemoteBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::remote_fit(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Per-request timeout, shared with every artifact this backend trains.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl TranslationModelBackend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    async fn fit(
        &self,
        scope: &Scope,
        examples: &[TrainingExample],
        epochs: u32,
    ) -> Result<FitOutput, ModelError> {
        let request = FitRequest {
            scope: scope.label(),
            epochs,
            examples: examples
                .iter()
                .map(|example| FitExample {
                    source_lang: &example.source_lang,
                    target_lang: &example.target_lang,
                    input: &example.input,
                    label: &example.label,
                })
                .collect(),
        };
        let url = format!("{}/fit", self.base_url);

        let response: FitResponse = with_retry_if(
            &self.retry,
            &format!("Remote fit for {}", scope),
            || post_json(&self.client, &url, &request, self.timeout),
            ModelError::is_transient,
        )
        .await?;

        info!(
            "Model server trained artifact {} for {} ({} examples)",
            response.artifact_id,
            scope,
            examples.len()
        );

        Ok(FitOutput {
            artifact: Arc::new(
                RemoteModel::new(self.client.clone(), &self.base_url, &response.artifact_id)
                    .with_timeout(self.timeout),
            ),
            metrics: response.metrics,
        })
    }
}
