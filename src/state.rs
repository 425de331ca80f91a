//! Observable application state.
//!
//! [`AppState`] is an immutable snapshot. The coordinator publishes a fresh
//! one after every mutation, inside the same critical section that made the
//! change, so subscribers never see a half-applied update.

use crate::config::ChatConfig;
use crate::llm::ModelInfo;
use crate::profile::{TextConfig, default_profile};
use crate::session::{Message, SessionId, SessionSummary};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppPhase {
    Initializing,
    /// No usable model yet; the user has to download one.
    FirstLaunchSetup,
    ModelDownloading,
    ModelLoading,
    Ready,
    /// Recoverable through refresh or model selection.
    Error,
}

impl fmt::Display for AppPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initializing => "initializing",
            Self::FirstLaunchSetup => "first-launch-setup",
            Self::ModelDownloading => "model-downloading",
            Self::ModelLoading => "model-loading",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Snapshot of everything the UI observes.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub phase: AppPhase,
    pub active_session_id: Option<SessionId>,
    /// Message log of the active session.
    pub messages: Vec<Message>,
    /// Session list, newest first.
    pub sessions: Vec<SessionSummary>,
    pub is_generating: bool,
    pub is_listening: bool,
    pub is_speaking: bool,
    /// Continuous voice conversation. Implies `voice_mode`.
    pub conversation_mode: bool,
    pub voice_mode: bool,
    pub context_augmentation: bool,
    /// Interim recognition text shown while the user speaks.
    pub partial_speech: String,
    /// Single channel for operational feedback.
    pub status_text: String,
    pub retrieval_status: Option<String>,
    pub current_model_id: Option<String>,
    pub current_model_name: Option<String>,
    pub available_models: Vec<ModelInfo>,
    pub download_progress: Option<f32>,
    pub text_config: TextConfig,
}

impl AppState {
    /// Startup state derived from configuration defaults.
    pub fn initial(config: &ChatConfig) -> Self {
        Self {
            phase: AppPhase::Initializing,
            active_session_id: None,
            messages: Vec::new(),
            sessions: Vec::new(),
            is_generating: false,
            is_listening: false,
            is_speaking: false,
            conversation_mode: false,
            voice_mode: config.voice.voice_mode,
            context_augmentation: config.retrieval.enabled,
            partial_speech: String::new(),
            status_text: "Welcome to AI Assistant".to_owned(),
            retrieval_status: None,
            current_model_id: None,
            current_model_name: None,
            available_models: Vec::new(),
            download_progress: None,
            text_config: default_profile().text_config(),
        }
    }
}
