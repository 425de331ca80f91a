//! Conversation pipeline: the coordinator and the turn, voice and stopping
//! logic it drives.

pub mod coordinator;
pub mod stopping;
pub mod turn;
pub mod voice;

pub use coordinator::ConversationCoordinator;
pub use stopping::{ResponseAccumulator, StopReason, TokenOutcome};
pub use turn::{DropReason, TurnOrigin, TurnOutcome};
