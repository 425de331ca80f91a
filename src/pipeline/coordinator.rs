//! The conversation coordinator: owner of application state.
//!
//! [`ConversationCoordinator`] is a cheap clonable handle. All mutable state
//! lives in one [`Core`] behind a mutex; every mutation goes through
//! [`ConversationCoordinator::update`], which republishes the state snapshot
//! and flushes queued events before the lock is released. The lock is never
//! held across an await point.
//!
//! Turn execution lives in [`super::turn`], speech handling in
//! [`super::voice`]. This file covers construction, lifecycle, sessions and
//! model management.

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::llm::{GenerationClient, ModelInfo};
use crate::model_selection::{StartupDecision, decide_startup, first_downloaded};
use crate::profile::{ModelProfile, default_profile, profile_for_model_name};
use crate::retrieval::ContextRetriever;
use crate::runtime::ChatEvent;
use crate::session::{Message, SessionId, SessionStore};
use crate::speech::SpeechCapability;
use crate::startup::wait_for_backend;
use crate::state::{AppPhase, AppState};
use futures_util::StreamExt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::turn::GenerationSlot;

const EVENT_CAPACITY: usize = 256;
/// Tokens pulled from the stream by the post-load self-check.
const VERIFY_TOKENS: usize = 5;
const VERIFY_PROMPT: &str = "Hello";

/// Mutable application state. Only touched inside [`ConversationCoordinator::update`].
pub(super) struct Core {
    pub(super) phase: AppPhase,
    pub(super) sessions: SessionStore,
    pub(super) active_session: Option<SessionId>,
    pub(super) is_generating: bool,
    pub(super) is_listening: bool,
    pub(super) is_speaking: bool,
    pub(super) conversation_mode: bool,
    pub(super) voice_mode: bool,
    pub(super) context_augmentation: bool,
    pub(super) partial_speech: String,
    pub(super) status: String,
    pub(super) retrieval_status: Option<String>,
    pub(super) current_model: Option<ModelInfo>,
    pub(super) available_models: Vec<ModelInfo>,
    pub(super) download_progress: Option<f32>,
    pub(super) profile: &'static ModelProfile,
    pending: Vec<ChatEvent>,
}

impl Core {
    fn new(config: &ChatConfig) -> Self {
        let initial = AppState::initial(config);
        Self {
            phase: initial.phase,
            sessions: SessionStore::new(),
            active_session: None,
            is_generating: false,
            is_listening: false,
            is_speaking: false,
            conversation_mode: false,
            voice_mode: initial.voice_mode,
            context_augmentation: initial.context_augmentation,
            partial_speech: String::new(),
            status: initial.status_text,
            retrieval_status: None,
            current_model: None,
            available_models: Vec::new(),
            download_progress: None,
            profile: default_profile(),
            pending: Vec::new(),
        }
    }

    fn snapshot(&self) -> AppState {
        let messages = self
            .active_session
            .as_deref()
            .and_then(|id| self.sessions.messages(id))
            .map(<[Message]>::to_vec)
            .unwrap_or_default();
        AppState {
            phase: self.phase,
            active_session_id: self.active_session.clone(),
            messages,
            sessions: self.sessions.summaries().to_vec(),
            is_generating: self.is_generating,
            is_listening: self.is_listening,
            is_speaking: self.is_speaking,
            conversation_mode: self.conversation_mode,
            voice_mode: self.voice_mode,
            context_augmentation: self.context_augmentation,
            partial_speech: self.partial_speech.clone(),
            status_text: self.status.clone(),
            retrieval_status: self.retrieval_status.clone(),
            current_model_id: self.current_model.as_ref().map(|m| m.id.clone()),
            current_model_name: self.current_model.as_ref().map(|m| m.name.clone()),
            available_models: self.available_models.clone(),
            download_progress: self.download_progress,
            text_config: self.profile.text_config(),
        }
    }

    /// Queue an event; flushed when the enclosing update returns.
    pub(super) fn emit(&mut self, event: ChatEvent) {
        self.pending.push(event);
    }

    pub(super) fn set_phase(&mut self, phase: AppPhase) {
        if self.phase != phase {
            info!(from = %self.phase, to = %phase, "phase transition");
            self.phase = phase;
            self.emit(ChatEvent::PhaseChanged(phase));
        }
    }

    pub(super) fn append_message(&mut self, session_id: &str, message: Message) -> Result<()> {
        self.sessions.append(session_id, message.clone())?;
        self.emit(ChatEvent::MessageAppended {
            session_id: session_id.to_owned(),
            message,
        });
        Ok(())
    }

    /// Create a session opened by the profile's welcome text and make it active.
    pub(super) fn create_session(&mut self) -> SessionId {
        let id = self.sessions.create();
        let welcome = Message::assistant(self.profile.welcome, false);
        if let Err(e) = self.append_message(&id, welcome) {
            warn!("failed to add welcome message: {e}");
        }
        self.active_session = Some(id.clone());
        self.emit(ChatEvent::SessionsChanged);
        id
    }

    fn apply_profile(&mut self, model: ModelInfo) {
        self.profile = profile_for_model_name(&model.name);
        self.current_model = Some(model);
    }
}

pub(super) struct Shared {
    pub(super) config: ChatConfig,
    pub(super) generation: Arc<dyn GenerationClient>,
    pub(super) retriever: Arc<dyn ContextRetriever>,
    pub(super) speech: Arc<dyn SpeechCapability>,
    core: Mutex<Core>,
    state_tx: watch::Sender<AppState>,
    events_tx: broadcast::Sender<ChatEvent>,
    pub(super) cancel: CancellationToken,
    pub(super) tasks: TaskTracker,
}

/// Sequences turns, voice interaction, sessions and the model lifecycle.
///
/// Clone freely; all clones share one state.
#[derive(Clone)]
pub struct ConversationCoordinator {
    pub(super) shared: Arc<Shared>,
}

impl ConversationCoordinator {
    pub fn new(
        config: ChatConfig,
        generation: Arc<dyn GenerationClient>,
        retriever: Arc<dyn ContextRetriever>,
        speech: Arc<dyn SpeechCapability>,
    ) -> Self {
        let core = Core::new(&config);
        let (state_tx, _) = watch::channel(core.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                generation,
                retriever,
                speech,
                core: Mutex::new(core),
                state_tx,
                events_tx,
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.shared.config
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> AppState {
        self.shared.state_tx.borrow().clone()
    }

    /// Observe state snapshots. Each mutation is published before the mutating call returns.
    pub fn subscribe_state(&self) -> watch::Receiver<AppState> {
        self.shared.state_tx.subscribe()
    }

    /// Observe ordered runtime events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Mutate state, then publish the snapshot and queued events under the same lock.
    pub(super) fn update<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let mut core = self.shared.core.lock().unwrap_or_else(|e| e.into_inner());
        let out = f(&mut core);
        self.shared.state_tx.send_replace(core.snapshot());
        for event in core.pending.drain(..) {
            let _ = self.shared.events_tx.send(event);
        }
        out
    }

    pub(super) fn read<R>(&self, f: impl FnOnce(&Core) -> R) -> R {
        let core = self.shared.core.lock().unwrap_or_else(|e| e.into_inner());
        f(&core)
    }

    /// Send an event that carries no state change.
    pub(super) fn emit(&self, event: ChatEvent) {
        let _ = self.shared.events_tx.send(event);
    }

    /// Spawn a background task that ends with the coordinator.
    pub(super) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.shared.cancel.clone();
        self.shared.tasks.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = task => {}
            }
        });
    }

    /// Sleep unless shut down first. Returns `false` on shutdown.
    pub(super) async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.shared.cancel.is_cancelled();
        }
        tokio::select! {
            () = self.shared.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Run the startup sequence: wait for the backend, list models, then
    /// auto-select a downloaded model or enter first-launch setup.
    pub async fn initialize(&self) {
        info!("initializing conversation coordinator");
        let readiness = wait_for_backend(self.shared.generation.as_ref(), &self.shared.config.startup).await;
        if !readiness.is_ready() {
            warn!("continuing startup with an unresponsive generation backend");
        }

        let models = match self.reload_models().await {
            Ok(models) => models,
            Err(e) => {
                error!("initialization failed: {e}");
                self.update(|core| {
                    core.set_phase(AppPhase::Error);
                    core.status = format!("Initialization failed: {e}");
                });
                return;
            }
        };

        match decide_startup(&models) {
            StartupDecision::AutoSelect(model) => {
                info!(model = %model.id, "auto-selecting downloaded model");
                if self.select_model(&model.id).await.is_ok() {
                    self.start_new_session();
                }
            }
            StartupDecision::DownloadRequired(models) => {
                info!("{} model(s) available, none downloaded", models.len());
                self.update(|core| {
                    core.set_phase(AppPhase::FirstLaunchSetup);
                    core.status = "Download a model to get started".to_owned();
                });
            }
            StartupDecision::NoModels => {
                warn!("generation backend reported no models");
                self.update(|core| {
                    core.set_phase(AppPhase::FirstLaunchSetup);
                    core.status = "No models available. Refresh to try again.".to_owned();
                });
            }
        }
    }

    /// Cancel background work and release speech resources.
    pub async fn shutdown(&self) {
        info!("shutting down conversation coordinator");
        self.shared.cancel.cancel();
        let speech = &self.shared.speech;
        if let Err(e) = speech.stop_listening() {
            warn!("failed to stop listening during shutdown: {e}");
        }
        if let Err(e) = speech.stop_speaking() {
            warn!("failed to stop speaking during shutdown: {e}");
        }
        if let Err(e) = speech.shutdown() {
            warn!("failed to release speech resources: {e}");
        }
        self.update(|core| {
            core.is_listening = false;
            core.is_speaking = false;
            core.conversation_mode = false;
            core.partial_speech.clear();
        });
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
    }

    // ---------------------------------------------------------------------
    // Sessions
    // ---------------------------------------------------------------------

    /// Create a new session and make it active.
    pub fn start_new_session(&self) -> SessionId {
        let id = self.update(Core::create_session);
        info!(session_id = %id, "started new session");
        id
    }

    /// Create a session only if none is active. Returns whether one was created.
    pub(super) fn ensure_session(&self) -> bool {
        let created = self.update(|core| {
            if core.active_session.is_none() {
                core.create_session();
                true
            } else {
                false
            }
        });
        if created {
            debug!("created session on demand");
        }
        created
    }

    pub fn select_session(&self, id: &str) -> Result<()> {
        self.update(|core| {
            if !core.sessions.contains(id) {
                return Err(ChatError::Session(format!("unknown session {id}")));
            }
            core.active_session = Some(id.to_owned());
            core.emit(ChatEvent::SessionsChanged);
            Ok(())
        })
    }

    /// Delete a session. Deleting the active one opens a fresh session.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        self.update(|core| {
            core.sessions.remove(id)?;
            if core.active_session.as_deref() == Some(id) {
                core.active_session = None;
                core.create_session();
            }
            core.emit(ChatEvent::SessionsChanged);
            Ok::<(), ChatError>(())
        })?;
        info!(session_id = %id, "deleted session");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Models
    // ---------------------------------------------------------------------

    async fn reload_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self.shared.generation.list_models().await?;
        debug!("backend lists {} model(s)", models.len());
        let published = models.clone();
        self.update(|core| core.available_models = published);
        Ok(models)
    }

    /// Load a listed model and make it current.
    ///
    /// # Errors
    ///
    /// [`ChatError::Model`] for unknown ids (state unchanged) or a refused
    /// load; backend errors pass through. Load failures leave the phase at
    /// [`AppPhase::Error`].
    pub async fn select_model(&self, model_id: &str) -> Result<()> {
        let model = self
            .read(|core| {
                core.available_models
                    .iter()
                    .find(|m| m.id == model_id)
                    .cloned()
            })
            .ok_or_else(|| ChatError::Model(format!("unknown model {model_id}")))?;

        self.update(|core| {
            core.set_phase(AppPhase::ModelLoading);
            core.status = format!("Loading {}...", model.name);
        });

        let failure = match self.shared.generation.load_model(&model.id).await {
            Ok(true) => None,
            Ok(false) => Some(ChatError::Model(format!("backend refused to load {}", model.id))),
            Err(e) => Some(e),
        };

        if let Some(e) = failure {
            error!(model = %model.id, "model load failed: {e}");
            let name = model.name.clone();
            self.update(|core| {
                core.set_phase(AppPhase::Error);
                core.status = format!("Failed to load {name}");
            });
            return Err(e);
        }

        info!(model = %model.id, "model loaded");
        self.update(|core| {
            core.apply_profile(model);
            core.set_phase(AppPhase::Ready);
            core.status = core.profile.status.to_owned();
        });

        if self.shared.config.startup.verify_after_load {
            let this = self.clone();
            self.spawn(async move {
                if this.pause(this.shared.config.startup.verify_delay()).await {
                    this.verify_loaded_model().await;
                }
            });
        }
        Ok(())
    }

    /// Download a model, then load it and make sure a session is open.
    pub async fn download_model(&self, model_id: &str) -> Result<()> {
        self.update(|core| {
            core.set_phase(AppPhase::ModelDownloading);
            core.download_progress = Some(0.0);
            core.status = "Downloading: 0%".to_owned();
        });

        if let Err(e) = self.receive_download(model_id).await {
            error!(model = %model_id, "model download failed: {e}");
            self.update(|core| {
                core.set_phase(AppPhase::Error);
                core.download_progress = None;
                core.status = format!("Download failed: {e}");
            });
            return Err(e);
        }

        info!(model = %model_id, "model download complete");
        self.update(|core| {
            core.download_progress = None;
            core.status = "Download complete".to_owned();
        });

        if let Err(e) = self.reload_models().await {
            self.update(|core| {
                core.set_phase(AppPhase::Error);
                core.status = format!("Failed to refresh models: {e}");
            });
            return Err(e);
        }
        self.select_model(model_id).await?;
        self.ensure_session();
        Ok(())
    }

    async fn receive_download(&self, model_id: &str) -> Result<()> {
        let mut progress = self.shared.generation.download_model(model_id).await?;
        loop {
            let next = tokio::select! {
                () = self.shared.cancel.cancelled() => {
                    return Err(ChatError::Model("download cancelled by shutdown".to_owned()));
                }
                next = progress.next() => next,
            };
            let Some(fraction) = next else {
                return Ok(());
            };
            let fraction = fraction?.clamp(0.0, 1.0);
            self.update(|core| {
                core.download_progress = Some(fraction);
                core.status = format!("Downloading: {}%", (fraction * 100.0).round() as u32);
                core.emit(ChatEvent::DownloadProgress {
                    model_id: model_id.to_owned(),
                    fraction,
                });
            });
        }
    }

    /// Reload the model list; from [`AppPhase::Error`], try to get back to ready.
    pub async fn refresh_models(&self) -> Result<()> {
        let models = match self.reload_models().await {
            Ok(models) => models,
            Err(e) => {
                warn!("model refresh failed: {e}");
                self.update(|core| core.status = format!("Failed to refresh models: {e}"));
                return Err(e);
            }
        };

        let (phase, current) = self.read(|core| (core.phase, core.current_model.clone()));
        if phase != AppPhase::Error {
            return Ok(());
        }

        if let Some(current) = current
            && models.iter().any(|m| m.id == current.id && m.is_downloaded)
        {
            info!(model = %current.id, "recovered with loaded model");
            self.update(|core| {
                core.set_phase(AppPhase::Ready);
                core.status = core.profile.status.to_owned();
            });
        } else if let Some(model) = first_downloaded(&models) {
            self.select_model(&model.id).await?;
        } else {
            self.update(|core| core.status = "No downloaded models available".to_owned());
            return Ok(());
        }
        self.ensure_session();
        Ok(())
    }

    /// Post-load self-check. Reports through the status text only.
    async fn verify_loaded_model(&self) {
        let acquired = self.update(|core| {
            if core.phase == AppPhase::Ready && !core.is_generating && core.active_session.is_some()
            {
                core.is_generating = true;
                true
            } else {
                false
            }
        });
        if !acquired {
            debug!("skipping model verification");
            return;
        }
        let _slot = GenerationSlot::held(self.clone());

        let result = async {
            self.shared.generation.list_models().await?;
            let mut stream = self.shared.generation.generate_stream(VERIFY_PROMPT).await?;
            let mut tokens = 0;
            while tokens < VERIFY_TOKENS {
                match stream.next().await {
                    Some(token) => {
                        token?;
                        tokens += 1;
                    }
                    None => break,
                }
            }
            Ok::<_, ChatError>(tokens)
        }
        .await;

        match result {
            Ok(tokens) if tokens > 0 => {
                info!("model verification produced {tokens} token(s)");
                self.update(|core| core.status = format!("{} (verified)", core.profile.status));
            }
            Ok(_) => {
                warn!("model verification produced no tokens");
                self.update(|core| core.status = "Model check: no response".to_owned());
            }
            Err(e) => {
                warn!("model verification failed: {e}");
                self.update(|core| core.status = format!("Model check failed: {e}"));
            }
        }
    }
}
