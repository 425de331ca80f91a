//! Terminal stand-in for device speech services.
//!
//! Utterances are written to stdout; there is no recognizer, so listening
//! reports [`RecognitionError::Unavailable`].

use super::{RecognitionError, SpeechCapability, SpeechEvent};
use crate::error::{ChatError, Result};
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

pub struct ConsoleSpeech {
    events: mpsc::UnboundedSender<SpeechEvent>,
    out: Mutex<Box<dyn Write + Send>>,
    speaking: AtomicBool,
    closed: AtomicBool,
}

impl ConsoleSpeech {
    /// Create the capability and the event receiver to hand to the coordinator.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SpeechEvent>) {
        Self::with_output(Box::new(std::io::stdout()))
    }

    /// Same as [`ConsoleSpeech::new`], writing utterances to `out`.
    pub fn with_output(out: Box<dyn Write + Send>) -> (Self, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let speech = Self {
            events,
            out: Mutex::new(out),
            speaking: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        (speech, rx)
    }

    fn emit(&self, event: SpeechEvent) {
        if self.events.send(event).is_err() {
            debug!("speech event receiver dropped");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl SpeechCapability for ConsoleSpeech {
    fn start_listening(&self) -> Result<()> {
        if !self.is_closed() {
            self.emit(SpeechEvent::Error(RecognitionError::Unavailable));
        }
        Ok(())
    }

    fn stop_listening(&self) -> Result<()> {
        Ok(())
    }

    fn speak(&self, text: &str) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.speaking.store(true, Ordering::Release);
        self.emit(SpeechEvent::SpeakingChanged(true));
        let written = {
            let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
            writeln!(out, "(spoken) {text}").and_then(|()| out.flush())
        };
        if self.speaking.swap(false, Ordering::AcqRel) {
            self.emit(SpeechEvent::SpeakingChanged(false));
        }
        written.map_err(|e| ChatError::Speech(format!("console output failed: {e}")))
    }

    fn stop_speaking(&self) -> Result<()> {
        if self.speaking.swap(false, Ordering::AcqRel) {
            self.emit(SpeechEvent::SpeakingChanged(false));
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.stop_speaking()
    }
}
