//! Context retrieval for prompt augmentation.
//!
//! The retrieval service is best-effort: callers treat any error as "no
//! augmentation". The HTTP client speaks a small JSON exchange:
//!
//! ```text
//! POST <base_url>/<endpoint>
//! {"UserID": "ai_user_1712345678901", "UserPrompt": "what is ..."}
//!
//! {"status": "success", "rag_context": "...", "message": null, "error": null}
//! ```

use crate::config::RetrievalConfig;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Looks up supplementary context for a query.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Return context text for `query`, or an error if none could be found.
    async fn search(&self, user_id: &str, query: &str) -> Result<String>;
}

/// Request body for the retrieval service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(rename = "UserPrompt")]
    pub user_prompt: String,
}

/// Response body from the retrieval service. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalResponse {
    pub user_id: Option<String>,
    pub user_prompt: Option<String>,
    pub rag_context: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl RetrievalResponse {
    /// Interpret the response: non-blank context with `status == "success"`
    /// wins; otherwise the service's `error`, then `message`, becomes the failure.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Retrieval`] when no usable context is present.
    pub fn into_context(self) -> Result<String> {
        let success = self.status.as_deref() == Some("success");
        match (success, non_blank(self.rag_context)) {
            (true, Some(context)) => Ok(context),
            _ => {
                if let Some(error) = non_blank(self.error) {
                    Err(ChatError::Retrieval(format!("service error: {error}")))
                } else if let Some(message) = non_blank(self.message) {
                    Err(ChatError::Retrieval(format!("service message: {message}")))
                } else {
                    Err(ChatError::Retrieval(
                        "unknown service error or empty context".to_owned(),
                    ))
                }
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// HTTP/JSON retrieval client.
pub struct HttpContextRetriever {
    client: reqwest::Client,
    url: String,
}

impl HttpContextRetriever {
    /// Build a client with the configured connect and request timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.search_url(),
        })
    }
}

#[async_trait]
impl ContextRetriever for HttpContextRetriever {
    async fn search(&self, user_id: &str, query: &str) -> Result<String> {
        let request = RetrievalRequest {
            user_id: user_id.to_owned(),
            user_prompt: query.to_owned(),
        };
        debug!(url = %self.url, "retrieval request");
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Retrieval(format!("network error during search: {e}")))?;
        let body: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Retrieval(format!("unreadable search response: {e}")))?;
        body.into_context()
    }
}

/// Retriever that never finds anything; used when augmentation is unavailable.
pub struct NoContextRetriever;

#[async_trait]
impl ContextRetriever for NoContextRetriever {
    async fn search(&self, _user_id: &str, _query: &str) -> Result<String> {
        Err(ChatError::Retrieval("no retrieval service configured".to_owned()))
    }
}

/// Build the augmented prompt: retrieved context first, then the original question.
pub fn augmented_prompt(context: &str, query: &str) -> String {
    format!(
        "Context Information:\n{context}\n\nBased on the above context, please answer this question:\n{query}"
    )
}
