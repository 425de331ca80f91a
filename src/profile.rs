//! Model profiles: user-facing text chosen from a model's display name.
//!
//! Each selectable model maps to a fixed tuple of strings (welcome, status,
//! placeholder, error, thinking) plus a short label used in fallback
//! responses. The mapping is a case-insensitive substring match against an
//! ordered keyword table; the first match wins and no match yields the
//! generic profile.
//!
//! # Examples
//!
//! ```
//! use voxchat::profile::profile_for_model_name;
//!
//! assert_eq!(profile_for_model_name("Code AI - Programming").keyword, Some("code"));
//! assert_eq!(profile_for_model_name("qwen2.5-0.5b").keyword, None);
//! ```

use serde::{Deserialize, Serialize};

/// A model profile entry.
#[derive(Debug, PartialEq, Eq)]
pub struct ModelProfile {
    /// Lowercase keyword matched against the model name (`None` = generic).
    pub keyword: Option<&'static str>,
    /// Short assistant name used in fallback responses.
    pub label: &'static str,
    pub welcome: &'static str,
    pub status: &'static str,
    pub placeholder: &'static str,
    pub error: &'static str,
    pub thinking: &'static str,
}

/// Owned copy of a profile's display strings, published in app state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextConfig {
    pub welcome: String,
    pub status: String,
    pub placeholder: String,
    pub error: String,
    pub thinking: String,
}

impl ModelProfile {
    pub fn text_config(&self) -> TextConfig {
        TextConfig {
            welcome: self.welcome.to_owned(),
            status: self.status.to_owned(),
            placeholder: self.placeholder.to_owned(),
            error: self.error.to_owned(),
            thinking: self.thinking.to_owned(),
        }
    }

    /// Clearly-labelled placeholder used when generation produced nothing.
    pub fn fallback_response(&self, query: &str) -> String {
        format!(
            "[fallback] {} could not produce an answer to \"{query}\". \
             The model did not respond; check that it is downloaded and loaded, then try again.",
            self.label
        )
    }
}

/// Ordered keyword table. **Order matters**: the first match wins.
static PROFILES: &[ModelProfile] = &[
    ModelProfile {
        keyword: Some("lightning"),
        label: "Lightning AI",
        welcome: "Hi! I'm Lightning AI, tuned for fast, efficient answers.",
        status: "Lightning AI ready - fast responses",
        placeholder: "Ask me anything for a quick answer...",
        error: "Lightning AI hit a processing issue",
        thinking: "Lightning AI is working on it...",
    },
    ModelProfile {
        keyword: Some("conversational"),
        label: "Conversational AI",
        welcome: "Hello! I'm Conversational AI, here for natural dialogue.",
        status: "Conversational AI ready - natural dialogue",
        placeholder: "Let's talk...",
        error: "Conversational AI needs a moment",
        thinking: "Conversational AI is composing a reply...",
    },
    ModelProfile {
        keyword: Some("precision"),
        label: "Precision AI",
        welcome: "Greetings! I'm Precision AI, built for careful, detailed analysis.",
        status: "Precision AI ready - detailed analysis",
        placeholder: "Ask for a detailed analysis...",
        error: "Precision AI hit an analysis issue",
        thinking: "Precision AI is analysing...",
    },
    ModelProfile {
        keyword: Some("expert"),
        label: "Expert AI",
        welcome: "Welcome! I'm Expert AI, with specialised knowledge across domains.",
        status: "Expert AI ready - advanced reasoning",
        placeholder: "Ask an expert-level question...",
        error: "Expert AI needs to recalibrate",
        thinking: "Expert AI is reasoning...",
    },
    ModelProfile {
        keyword: Some("code"),
        label: "Code AI",
        welcome: "Hey! I'm Code AI, your assistant for programming questions.",
        status: "Code AI ready - programming help",
        placeholder: "Ask about code, algorithms or tooling...",
        error: "Code AI hit a snag",
        thinking: "Code AI is working through it...",
    },
    ModelProfile {
        keyword: Some("creative"),
        label: "Creative AI",
        welcome: "Hello there! I'm Creative AI, here for ideas and writing.",
        status: "Creative AI ready - ideas and writing",
        placeholder: "Let's make something together...",
        error: "Creative AI hit a creative block",
        thinking: "Creative AI is drafting...",
    },
];

static GENERIC: ModelProfile = ModelProfile {
    keyword: None,
    label: "AI Assistant",
    welcome: "Hello! I'm your AI Assistant, ready to help with questions, tasks or conversation.",
    status: "AI Assistant ready",
    placeholder: "Ask me anything...",
    error: "AI Assistant encountered an issue",
    thinking: "AI Assistant is thinking...",
};

/// The generic profile used when no model (or no matching model) is active.
pub fn default_profile() -> &'static ModelProfile {
    &GENERIC
}

/// Select the profile for a model display name.
pub fn profile_for_model_name(name: &str) -> &'static ModelProfile {
    let lower = name.to_lowercase();
    PROFILES
        .iter()
        .find(|p| p.keyword.is_some_and(|k| lower.contains(k)))
        .unwrap_or(&GENERIC)
}
