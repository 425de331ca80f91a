//! Shared scripted collaborators for integration tests.

use async_trait::async_trait;
use futures_util::stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use voxchat::llm::{DownloadStream, GenerationClient, ModelInfo, TokenStream};
use voxchat::retrieval::ContextRetriever;
use voxchat::speech::SpeechCapability;
use voxchat::{AppState, ChatConfig, ChatError, ConversationCoordinator, Result};

/// One scripted response of the generation backend.
pub enum Script {
    Tokens(Vec<&'static str>),
    /// Yields the tokens, then a stream error.
    FailAfter(Vec<&'static str>),
    /// `generate_stream` itself fails.
    Refuse,
    /// Distinct words forever: " w0", " w1", ...
    EndlessWords,
    /// The same single-character token forever.
    EndlessChar,
}

/// Generation backend driven by a queue of scripts.
pub struct ScriptedBackend {
    models: Mutex<Vec<ModelInfo>>,
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<String>>,
    /// Tokens pulled out of generation streams.
    pub pulled: Arc<AtomicUsize>,
    pub load_ok: AtomicBool,
    pub download_fails: AtomicBool,
    /// `list_models` fails until this many calls were made.
    pub list_failures: AtomicU32,
    list_calls: AtomicU32,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedBackend {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self {
            models: Mutex::new(models),
            scripts: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
            load_ok: AtomicBool::new(true),
            download_fails: AtomicBool::new(false),
            list_failures: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Make every following `generate_stream` wait for [`Self::release`].
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }

    pub fn set_models(&self, models: Vec<ModelInfo>) {
        *self.models.lock().unwrap() = models;
    }
}

#[async_trait]
impl GenerationClient for ScriptedBackend {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.list_failures.load(Ordering::SeqCst) {
            return Err(ChatError::Model("backend still starting".to_owned()));
        }
        Ok(self.models.lock().unwrap().clone())
    }

    async fn load_model(&self, _model_id: &str) -> Result<bool> {
        Ok(self.load_ok.load(Ordering::SeqCst))
    }

    async fn download_model(&self, model_id: &str) -> Result<DownloadStream> {
        if self.download_fails.load(Ordering::SeqCst) {
            let items: Vec<Result<f32>> = vec![
                Ok(0.3),
                Err(ChatError::Model("connection reset".to_owned())),
            ];
            return Ok(Box::pin(stream::iter(items)));
        }
        for model in self.models.lock().unwrap().iter_mut() {
            if model.id == model_id {
                model.is_downloaded = true;
            }
        }
        Ok(Box::pin(stream::iter(vec![Ok(0.25_f32), Ok(0.5), Ok(1.0)])))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Tokens(vec!["Sure."]));
        let pulled = self.pulled.clone();
        let count = move |token: String| -> Result<String> {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(token)
        };

        let tokens: TokenStream = match script {
            Script::Tokens(tokens) => Box::pin(stream::iter(
                tokens.into_iter().map(move |t| count(t.to_owned())),
            )),
            Script::FailAfter(tokens) => {
                let mut items: Vec<Result<String>> =
                    tokens.into_iter().map(|t| count(t.to_owned())).collect();
                items.push(Err(ChatError::Generation("stream broke".to_owned())));
                Box::pin(stream::iter(items))
            }
            Script::Refuse => {
                return Err(ChatError::Generation("model crashed".to_owned()));
            }
            Script::EndlessWords => Box::pin(stream::iter(
                (0_usize..).map(move |i| count(format!(" w{i}"))),
            )),
            Script::EndlessChar => Box::pin(stream::iter(
                std::iter::repeat_with(move || count("x".to_owned())),
            )),
        };
        Ok(tokens)
    }
}

/// Retriever with a fixed answer; records queries.
pub struct ScriptedRetriever {
    answer: Mutex<std::result::Result<String, String>>,
    queries: Mutex<Vec<(String, String)>>,
}

impl ScriptedRetriever {
    pub fn answering(context: &str) -> Self {
        Self {
            answer: Mutex::new(Ok(context.to_owned())),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            answer: Mutex::new(Err(reason.to_owned())),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextRetriever for ScriptedRetriever {
    async fn search(&self, user_id: &str, query: &str) -> Result<String> {
        self.queries
            .lock()
            .unwrap()
            .push((user_id.to_owned(), query.to_owned()));
        self.answer
            .lock()
            .unwrap()
            .clone()
            .map_err(ChatError::Retrieval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechCall {
    StartListening,
    StopListening,
    Speak(String),
    StopSpeaking,
    Shutdown,
}

/// Speech capability that only records the commands it receives.
#[derive(Default)]
pub struct RecordingSpeech {
    calls: Mutex<Vec<SpeechCall>>,
}

impl RecordingSpeech {
    pub fn calls(&self) -> Vec<SpeechCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &SpeechCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: SpeechCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl SpeechCapability for RecordingSpeech {
    fn start_listening(&self) -> Result<()> {
        self.record(SpeechCall::StartListening)
    }

    fn stop_listening(&self) -> Result<()> {
        self.record(SpeechCall::StopListening)
    }

    fn speak(&self, text: &str) -> Result<()> {
        self.record(SpeechCall::Speak(text.to_owned()))
    }

    fn stop_speaking(&self) -> Result<()> {
        self.record(SpeechCall::StopSpeaking)
    }

    fn shutdown(&self) -> Result<()> {
        self.record(SpeechCall::Shutdown)
    }
}

/// Config with fast retries and short voice delays.
pub fn test_config() -> ChatConfig {
    let mut config = ChatConfig::default();
    config.startup.ready_retry_delay_ms = 1;
    config.startup.verify_after_load = false;
    config.retrieval.enabled = false;
    config.voice.resume_listening_delay_ms = 20;
    config.voice.error_recovery_delay_ms = 20;
    config.voice.session_settle_ms = 0;
    config.voice.transcript_display_ms = 0;
    config
}

pub fn downloaded_model() -> ModelInfo {
    ModelInfo::new("general-1b", "General Model", true)
}

pub struct Harness {
    pub coordinator: ConversationCoordinator,
    pub backend: Arc<ScriptedBackend>,
    pub retriever: Arc<ScriptedRetriever>,
    pub speech: Arc<RecordingSpeech>,
}

impl Harness {
    pub fn new(config: ChatConfig, models: Vec<ModelInfo>, retriever: ScriptedRetriever) -> Self {
        let backend = Arc::new(ScriptedBackend::new(models));
        let retriever = Arc::new(retriever);
        let speech = Arc::new(RecordingSpeech::default());
        let coordinator = ConversationCoordinator::new(
            config,
            backend.clone(),
            retriever.clone(),
            speech.clone(),
        );
        Self {
            coordinator,
            backend,
            retriever,
            speech,
        }
    }

    /// Initialized with one downloaded model: phase ready, one session open.
    pub async fn ready() -> Self {
        Self::ready_with(test_config(), ScriptedRetriever::failing("unused")).await
    }

    pub async fn ready_with(config: ChatConfig, retriever: ScriptedRetriever) -> Self {
        let harness = Self::new(config, vec![downloaded_model()], retriever);
        harness.coordinator.initialize().await;
        assert_eq!(harness.coordinator.snapshot().phase, voxchat::AppPhase::Ready);
        harness
    }

    pub fn state(&self) -> AppState {
        self.coordinator.snapshot()
    }
}

/// Wait until the published state satisfies `pred`.
pub async fn wait_for_state(
    coordinator: &ConversationCoordinator,
    pred: impl Fn(&AppState) -> bool,
) -> AppState {
    let mut rx = coordinator.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if pred(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("state condition not reached in time")
}

/// Poll until `cond` holds.
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
