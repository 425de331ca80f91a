//! Voxchat: conversation core for an on-device AI chat assistant.
//!
//! The crate owns the decision logic around a language model it never runs
//! itself:
//! Input (text or speech) → Context retrieval → Streaming generation → Session log → Speech
//!
//! # Architecture
//!
//! - **Coordinator**: [`pipeline::ConversationCoordinator`] owns application
//!   state, the single generation slot, sessions and the model lifecycle
//! - **Stopping policy**: [`pipeline::stopping`] ends runaway or looping generations
//! - **Sessions**: [`session::SessionStore`] keeps per-session message logs and summaries
//! - **Collaborators**: [`llm::GenerationClient`], [`retrieval::ContextRetriever`]
//!   and [`speech::SpeechCapability`] are traits; HTTP and console
//!   implementations are included
//!
//! State is observed through [`pipeline::ConversationCoordinator::subscribe_state`]
//! snapshots and ordered [`runtime::ChatEvent`]s.

pub mod config;
pub mod error;
pub mod llm;
pub mod model_selection;
pub mod pipeline;
pub mod profile;
pub mod retrieval;
pub mod runtime;
pub mod session;
pub mod speech;
pub mod startup;
pub mod state;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use pipeline::{ConversationCoordinator, DropReason, TurnOrigin, TurnOutcome};
pub use runtime::ChatEvent;
pub use state::{AppPhase, AppState};
