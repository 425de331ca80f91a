//! Language model access.
//!
//! The assistant never runs inference itself. It talks to a
//! [`GenerationClient`], which covers model discovery, download, loading and
//! token streaming. [`api::ApiGenerationClient`] implements it over any
//! OpenAI-compatible HTTP server; on-device SDKs implement it directly.

pub mod api;
pub mod sse;

pub use api::ApiGenerationClient;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Stream of generated text fragments. Dropping it cancels generation.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream of download progress fractions in `[0, 1]`; completion is the stream closing.
pub type DownloadStream = Pin<Box<dyn Stream<Item = Result<f32>> + Send>>;

/// A model known to the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    /// Display name; also drives the text profile selection.
    pub name: String,
    pub is_downloaded: bool,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, is_downloaded: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_downloaded,
        }
    }
}

/// Model management and streaming generation.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// List known models. May fail while the backend is still initializing.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Load a model for generation. `Ok(false)` means the backend refused it.
    async fn load_model(&self, model_id: &str) -> Result<bool>;

    /// Start downloading a model.
    async fn download_model(&self, model_id: &str) -> Result<DownloadStream>;

    /// Generate a response to `prompt` with the loaded model.
    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream>;
}
