//! Turn execution: admit, augment, stream, finalize, speak.

use crate::error::{ChatError, Result};
use crate::retrieval::augmented_prompt;
use crate::runtime::ChatEvent;
use crate::session::{Message, now_ms};
use crate::state::AppPhase;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::coordinator::ConversationCoordinator;
use super::stopping::{ResponseAccumulator, TokenOutcome};

const NOT_READY_STATUS: &str = "AI assistant not ready. Please wait...";
const NO_MODEL_APOLOGY: &str = "Sorry, no AI model is selected. Choose or download a model and try again.";

/// Where a turn's input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOrigin {
    Typed,
    Voice,
}

impl TurnOrigin {
    fn is_voice(self) -> bool {
        self == Self::Voice
    }
}

/// Why a submission was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotReady,
    /// Another generation is in flight. Submissions are dropped, not queued.
    Busy,
    EmptyInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A response was appended. `fallback` marks a placeholder answer.
    Completed { fallback: bool },
    /// No session was active; one was created and the input was not run.
    Deferred,
    Dropped(DropReason),
    /// Shutdown interrupted the turn. No response was appended or spoken.
    Cancelled,
}

/// Holds the single generation slot; releasing it clears `is_generating`.
pub(super) struct GenerationSlot {
    coordinator: ConversationCoordinator,
}

impl GenerationSlot {
    /// Wrap a slot that was already claimed inside an update.
    pub(super) fn held(coordinator: ConversationCoordinator) -> Self {
        Self { coordinator }
    }
}

impl Drop for GenerationSlot {
    fn drop(&mut self) {
        self.coordinator.update(|core| core.is_generating = false);
    }
}

enum Admission {
    Admitted(String),
    NotReady,
    NoSession,
    Busy,
}

struct Augmentation {
    prompt: String,
    has_context: bool,
}

impl ConversationCoordinator {
    /// Submit user input as a turn.
    ///
    /// The user message is appended and the generation slot claimed in one
    /// state update, so observers see the message before any response.
    pub async fn submit_turn(&self, text: &str, origin: TurnOrigin) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Dropped(DropReason::EmptyInput);
        }

        let admission = self.update(|core| {
            if core.phase != AppPhase::Ready {
                core.status = NOT_READY_STATUS.to_owned();
                return Admission::NotReady;
            }
            let Some(session_id) = core.active_session.clone() else {
                return Admission::NoSession;
            };
            if core.is_generating {
                return Admission::Busy;
            }
            if let Err(e) = core.append_message(&session_id, Message::user(text, origin.is_voice())) {
                warn!("failed to append user message: {e}");
            }
            core.is_generating = true;
            Admission::Admitted(session_id)
        });

        match admission {
            Admission::Admitted(session_id) => {
                let slot = GenerationSlot::held(self.clone());
                self.run_turn(&session_id, text, slot).await
            }
            Admission::NotReady => {
                warn!("turn dropped: assistant not ready");
                TurnOutcome::Dropped(DropReason::NotReady)
            }
            Admission::NoSession => {
                self.start_new_session();
                info!("no active session; created one and deferred the turn");
                TurnOutcome::Deferred
            }
            Admission::Busy => {
                warn!("turn dropped: a generation is already in flight");
                TurnOutcome::Dropped(DropReason::Busy)
            }
        }
    }

    /// Run the pipeline for an already-appended user message.
    pub(super) async fn run_turn(
        &self,
        session_id: &str,
        query: &str,
        slot: GenerationSlot,
    ) -> TurnOutcome {
        self.update(|core| {
            core.status = core.profile.thinking.to_owned();
            core.emit(ChatEvent::GenerationStarted {
                session_id: session_id.to_owned(),
            });
        });

        let delay = self.shared.config.generation.pre_generation_delay_ms;
        if !self.pause(std::time::Duration::from_millis(delay)).await {
            info!(session_id, "turn abandoned by shutdown");
            return TurnOutcome::Cancelled;
        }

        let augmentation = self.augment(query).await;
        let generated = self.stream_response(&augmentation.prompt).await;
        if self.shared.cancel.is_cancelled() {
            info!(session_id, "turn abandoned by shutdown");
            return TurnOutcome::Cancelled;
        }

        let (text, has_context, fallback) = match generated {
            Ok(text) if !text.is_empty() => (text, augmentation.has_context, false),
            Ok(_) => {
                warn!(session_id, "generation produced no text, using fallback");
                (self.fallback_text(query), false, true)
            }
            Err(e) => {
                warn!(session_id, "generation failed, using fallback: {e}");
                (self.fallback_text(query), false, true)
            }
        };

        let voice_mode = self.update(|core| {
            if let Err(e) = core.append_message(session_id, Message::assistant(&text, has_context)) {
                warn!("response dropped: {e}");
            }
            if fallback {
                core.status = core.profile.error.to_owned();
                if core.context_augmentation {
                    core.retrieval_status = Some("Generation failed".to_owned());
                }
            } else {
                core.status = core.profile.status.to_owned();
                if has_context {
                    core.retrieval_status = Some("Enhanced with online data".to_owned());
                }
            }
            core.emit(ChatEvent::GenerationFinished {
                session_id: session_id.to_owned(),
                fallback,
            });
            core.voice_mode
        });
        info!(session_id, fallback, has_context, "turn complete");

        if voice_mode && let Err(e) = self.shared.speech.speak(&text) {
            warn!("failed to speak response: {e}");
        }

        drop(slot);
        TurnOutcome::Completed { fallback }
    }

    fn fallback_text(&self, query: &str) -> String {
        self.read(|core| {
            if core.current_model.is_none() {
                NO_MODEL_APOLOGY.to_owned()
            } else {
                core.profile.fallback_response(query)
            }
        })
    }

    /// Build the generation prompt, enriched with retrieved context when possible.
    async fn augment(&self, query: &str) -> Augmentation {
        let plain = Augmentation {
            prompt: query.to_owned(),
            has_context: false,
        };
        if !self.read(|core| core.context_augmentation) {
            return plain;
        }

        self.update(|core| core.retrieval_status = Some("Searching online...".to_owned()));
        let config = &self.shared.config.retrieval;
        let user_id = format!("{}{}", config.user_id_prefix, now_ms());
        let lookup = tokio::time::timeout(
            config.request_timeout(),
            self.shared.retriever.search(&user_id, query),
        )
        .await
        .unwrap_or_else(|_| Err(ChatError::Retrieval("lookup timed out".to_owned())));

        let (augmentation, status) = match lookup {
            Ok(context) if !context.trim().is_empty() => {
                debug!("retrieved {} chars of context", context.len());
                let augmented = Augmentation {
                    prompt: augmented_prompt(&context, query),
                    has_context: true,
                };
                (augmented, "Online research ready")
            }
            Ok(_) => {
                debug!("retrieval returned no context");
                (plain, "No online data found")
            }
            Err(e) => {
                warn!("context retrieval failed, using plain prompt: {e}");
                (plain, "Online search unavailable")
            }
        };
        self.update(|core| core.retrieval_status = Some(status.to_owned()));
        augmentation
    }

    /// Consume the token stream under the stopping policy.
    async fn stream_response(&self, prompt: &str) -> Result<String> {
        let limits = &self.shared.config.generation;
        let mut stream = self.shared.generation.generate_stream(prompt).await?;
        let mut acc = ResponseAccumulator::new(limits);
        let every = limits.progress_every_tokens.max(1);
        let mut logged_chars = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => {
                    info!("generation interrupted by shutdown");
                    break;
                }
                next = stream.next() => next,
            };
            let Some(token) = next else {
                break;
            };
            let outcome = acc.push(&token?);

            if acc.tokens() % every == 0 {
                debug!(tokens = acc.tokens(), chars = acc.chars(), "generation progress");
                self.emit(ChatEvent::GenerationProgress {
                    tokens: acc.tokens(),
                    chars: acc.chars(),
                });
            }
            if acc.chars() >= logged_chars + 50 {
                logged_chars = acc.chars();
                debug!(chars = logged_chars, "response length");
            }

            if let TokenOutcome::Stop(reason) = outcome {
                info!(%reason, tokens = acc.tokens(), chars = acc.chars(), "stopping generation");
                self.emit(ChatEvent::GenerationStopped { reason });
                break;
            }
        }

        drop(stream);
        Ok(acc.finish())
    }
}
