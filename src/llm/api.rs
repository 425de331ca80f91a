//! OpenAI-compatible HTTP backend.
//!
//! Supports any server implementing the OpenAI models and chat completions API:
//! - Ollama (`http://localhost:11434`)
//! - MLX server (`http://localhost:8080`)
//! - vLLM, llama.cpp server, etc.
//!
//! Remote servers have no download step, so every listed model counts as
//! downloaded and "downloading" a listed model completes immediately.

use super::sse::SseParser;
use super::{DownloadStream, GenerationClient, ModelInfo, TokenStream};
use crate::config::ApiConfig;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use tracing::{debug, info};

/// Generation client backed by an OpenAI-compatible server.
pub struct ApiGenerationClient {
    client: reqwest::Client,
    config: ApiConfig,
    /// Model used for `generate_stream`, set by `load_model`.
    loaded: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl ApiGenerationClient {
    pub fn new(config: ApiConfig) -> Self {
        info!("API generation backend configured: {}", config.base_url);
        Self {
            client: reqwest::Client::new(),
            config,
            loaded: Mutex::new(None),
        }
    }

    /// Currently loaded model id.
    pub fn loaded_model(&self) -> Option<String> {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/{path}")
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.config.api_key)
        }
    }

    async fn is_listed(&self, model_id: &str) -> Result<bool> {
        Ok(self.list_models().await?.iter().any(|m| m.id == model_id))
    }
}

#[async_trait]
impl GenerationClient for ApiGenerationClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authorized(self.client.get(self.url("models")))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Model(format!("model list failed: HTTP {status}")));
        }
        let list: ModelList = response.json().await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo::new(m.id.clone(), m.id, true))
            .collect())
    }

    async fn load_model(&self, model_id: &str) -> Result<bool> {
        if !self.is_listed(model_id).await? {
            return Ok(false);
        }
        *self.loaded.lock().unwrap_or_else(|e| e.into_inner()) = Some(model_id.to_owned());
        info!("API backend using model {model_id}");
        Ok(true)
    }

    async fn download_model(&self, model_id: &str) -> Result<DownloadStream> {
        if !self.is_listed(model_id).await? {
            return Err(ChatError::Model(format!(
                "model {model_id} is not served by {}",
                self.config.base_url
            )));
        }
        Ok(Box::pin(futures_util::stream::iter([Ok(1.0_f32)])))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        let model = self
            .loaded_model()
            .ok_or_else(|| ChatError::Generation("no model loaded".to_owned()))?;

        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": true,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .authorized(self.client.post(self.url("chat/completions")))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Generation(format!(
                "completion request failed: HTTP {status}: {text}"
            )));
        }

        debug!("completion stream opened for model {model}");
        Ok(Box::pin(completion_tokens(response.bytes_stream())))
    }
}

struct CompletionState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    parser: SseParser,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl CompletionState {
    /// Queue the content delta carried by one SSE data payload.
    fn absorb(&mut self, data: &str) {
        if self.finished {
            return;
        }
        if data.trim() == "[DONE]" {
            self.finished = true;
            return;
        }
        let chunk: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                self.pending
                    .push_back(Err(ChatError::Generation(format!("bad stream chunk: {e}"))));
                self.finished = true;
                return;
            }
        };
        let choice = &chunk["choices"][0];
        if let Some(content) = choice["delta"]["content"].as_str()
            && !content.is_empty()
        {
            self.pending.push_back(Ok(content.to_owned()));
        }
        if choice["finish_reason"].as_str().is_some() {
            self.finished = true;
        }
    }
}

/// Turn an SSE byte stream into content fragments.
fn completion_tokens(
    bytes: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    let state = CompletionState {
        bytes: Box::pin(bytes),
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for event in state.parser.push(&chunk) {
                        state.absorb(&event.data);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(ChatError::Generation(format!("stream read error: {e}"))),
                        state,
                    ));
                }
                None => {
                    if let Some(event) = state.parser.flush() {
                        state.absorb(&event.data);
                    }
                    state.finished = true;
                }
            }
        }
    })
}
