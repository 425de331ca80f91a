//! Speech-event handling and voice commands.
//!
//! Speech events arrive on an unbounded channel for the coordinator's whole
//! lifetime. Final transcripts run as their own tasks so barge-in and state
//! events keep flowing while a voice turn generates.

use crate::session::Message;
use crate::speech::{RecognitionError, SpeechEvent};
use crate::state::AppPhase;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::coordinator::ConversationCoordinator;
use super::turn::GenerationSlot;

impl ConversationCoordinator {
    /// Drain speech events until shutdown or until the sender closes.
    pub fn attach_speech_events(&self, mut rx: mpsc::UnboundedReceiver<SpeechEvent>) {
        let this = self.clone();
        let cancel = self.shared.cancel.clone();
        self.shared.tasks.spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => event,
                };
                let Some(event) = event else {
                    debug!("speech event channel closed");
                    break;
                };
                if matches!(event, SpeechEvent::FinalText(_)) {
                    let turn = this.clone();
                    this.spawn(async move { turn.handle_speech_event(event).await });
                } else {
                    this.handle_speech_event(event).await;
                }
            }
        });
    }

    /// Apply one speech event. Final transcripts run the whole voice turn.
    pub async fn handle_speech_event(&self, event: SpeechEvent) {
        match event {
            SpeechEvent::FinalText(text) => self.on_final_text(&text).await,
            SpeechEvent::PartialText(text) => self.update(|core| core.partial_speech = text),
            SpeechEvent::SpeechStarted => self.on_speech_started(),
            SpeechEvent::ListeningChanged(listening) => {
                self.update(|core| core.is_listening = listening);
            }
            SpeechEvent::SpeakingChanged(speaking) => self.on_speaking_changed(speaking),
            SpeechEvent::Error(error) => self.on_recognition_error(error),
        }
    }

    async fn on_final_text(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if self.ensure_session() && !self.pause(self.shared.config.voice.session_settle()).await {
            return;
        }

        let session_id = self.update(|core| {
            core.partial_speech.clear();
            let id = core.active_session.clone()?;
            if let Err(e) = core.append_message(&id, Message::user(text, true)) {
                warn!("failed to append transcript: {e}");
                return None;
            }
            Some(id)
        });
        let Some(session_id) = session_id else {
            return;
        };
        info!(session_id = %session_id, "voice transcript received");

        if !self.pause(self.shared.config.voice.transcript_display()).await {
            return;
        }

        let admitted = self.update(|core| {
            if core.phase == AppPhase::Ready && !core.is_generating {
                core.is_generating = true;
                true
            } else {
                false
            }
        });
        if !admitted {
            warn!("voice transcript kept without a response: generation busy or not ready");
            return;
        }
        let slot = GenerationSlot::held(self.clone());
        self.run_turn(&session_id, text, slot).await;
    }

    fn on_speech_started(&self) {
        if self.read(|core| core.is_speaking) {
            info!("barge-in: user started speaking, stopping playback");
            self.stop_speaking();
        }
    }

    fn on_speaking_changed(&self, speaking: bool) {
        let resume = self.update(|core| {
            core.is_speaking = speaking;
            !speaking && core.conversation_mode && !core.is_listening
        });
        if resume {
            self.schedule_listening(self.shared.config.voice.resume_listening_delay());
        }
    }

    fn on_recognition_error(&self, error: RecognitionError) {
        if error.is_silence() {
            debug!("speech recognition: {error}");
        } else {
            warn!("speech recognition error: {error}");
        }

        let recover = self.update(|core| {
            core.is_listening = false;
            if error.is_permanent() {
                core.status = format!("Voice input unavailable: {error}");
            } else if !error.is_silence() {
                core.status = format!("Voice input error: {error}");
            }
            core.conversation_mode
        });
        if recover {
            self.schedule_listening(self.shared.config.voice.error_recovery_delay());
        }
    }

    /// Resume listening after `delay` if the conversation is still idle then.
    fn schedule_listening(&self, delay: Duration) {
        let this = self.clone();
        self.spawn(async move {
            if !this.pause(delay).await {
                return;
            }
            let idle = this.read(|core| {
                core.conversation_mode
                    && core.phase == AppPhase::Ready
                    && !core.is_listening
                    && !core.is_speaking
                    && !core.is_generating
            });
            if idle {
                debug!("resuming listening");
                if let Err(e) = this.shared.speech.start_listening() {
                    warn!("failed to resume listening: {e}");
                }
            }
        });
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Start listening for one utterance. Ignored unless voice mode is on and
    /// the assistant is ready.
    pub fn start_voice_input(&self) {
        let (allowed, speaking) = self.read(|core| {
            (
                core.voice_mode && core.phase == AppPhase::Ready && !core.is_listening,
                core.is_speaking,
            )
        });
        if !allowed {
            debug!("voice input not available right now");
            return;
        }
        if speaking {
            self.stop_speaking();
        }
        if let Err(e) = self.shared.speech.start_listening() {
            warn!("failed to start listening: {e}");
        }
    }

    pub fn stop_voice_input(&self) {
        if let Err(e) = self.shared.speech.stop_listening() {
            warn!("failed to stop listening: {e}");
        }
        self.update(|core| {
            core.is_listening = false;
            core.partial_speech.clear();
        });
    }

    pub fn stop_speaking(&self) {
        if let Err(e) = self.shared.speech.stop_speaking() {
            warn!("failed to stop speaking: {e}");
        }
        self.update(|core| core.is_speaking = false);
    }

    /// Flip voice mode and return the new value. Turning it off while a
    /// conversation is running ends the conversation too.
    pub fn toggle_voice_mode(&self) -> bool {
        let (enabled, was_conversation) = self.update(|core| {
            core.voice_mode = !core.voice_mode;
            let was_conversation = core.conversation_mode;
            if !core.voice_mode {
                core.conversation_mode = false;
            }
            (core.voice_mode, was_conversation)
        });
        if !enabled && was_conversation {
            self.stop_all_voice();
        }
        info!(enabled, "voice mode toggled");
        enabled
    }

    /// Flip conversation mode and return the new value.
    pub fn toggle_conversation_mode(&self) -> bool {
        let enabled = self.update(|core| {
            core.conversation_mode = !core.conversation_mode;
            if core.conversation_mode {
                core.voice_mode = true;
                core.status = "Conversation mode on".to_owned();
            }
            core.conversation_mode
        });
        info!(enabled, "conversation mode toggled");
        if enabled {
            self.start_voice_input();
        } else {
            self.stop_all_voice();
            self.update(|core| core.status = "Conversation mode off".to_owned());
        }
        enabled
    }

    /// Flip context augmentation and return the new value.
    pub fn toggle_context_augmentation(&self) -> bool {
        let enabled = self.update(|core| {
            core.context_augmentation = !core.context_augmentation;
            core.retrieval_status = None;
            core.status = if core.context_augmentation {
                "Online context enabled".to_owned()
            } else {
                "Online context disabled".to_owned()
            };
            core.context_augmentation
        });
        info!(enabled, "context augmentation toggled");
        enabled
    }

    /// Stop listening and speaking and leave conversation mode.
    fn stop_all_voice(&self) {
        if let Err(e) = self.shared.speech.stop_listening() {
            warn!("failed to stop listening: {e}");
        }
        if let Err(e) = self.shared.speech.stop_speaking() {
            warn!("failed to stop speaking: {e}");
        }
        self.update(|core| {
            core.conversation_mode = false;
            core.is_listening = false;
            core.is_speaking = false;
            core.partial_speech.clear();
        });
    }
}
