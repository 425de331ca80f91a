//! Runtime events emitted by the coordinator for UI and observability.
//!
//! State snapshots only show the latest value; these events preserve order,
//! so observers can tell that a user message was appended before its reply.

use crate::pipeline::stopping::StopReason;
use crate::session::{Message, SessionId};
use crate::state::AppPhase;

/// Events that describe what the assistant is doing "right now".
#[derive(Debug, Clone)]
pub enum ChatEvent {
    PhaseChanged(AppPhase),
    /// A message was appended to a session log.
    MessageAppended {
        session_id: SessionId,
        message: Message,
    },
    /// The session list changed (created, deleted or switched).
    SessionsChanged,
    GenerationStarted { session_id: SessionId },
    /// Throttled token progress; informational only.
    GenerationProgress { tokens: usize, chars: usize },
    /// The stopping policy ended consumption before the stream closed.
    GenerationStopped { reason: StopReason },
    /// A turn finished; `fallback` is set when a placeholder replaced the answer.
    GenerationFinished { session_id: SessionId, fallback: bool },
    DownloadProgress { model_id: String, fraction: f32 },
}
