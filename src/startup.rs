//! Startup readiness checks for the generation backend.
//!
//! On-device SDKs finish their own initialization asynchronously, so the
//! first model-list calls may fail. Startup polls a bounded number of times
//! and then continues regardless: a slow backend degrades startup, it never
//! hangs it.

use crate::config::StartupConfig;
use crate::llm::GenerationClient;
use tracing::{debug, info, warn};

/// Outcome of the readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendReadiness {
    /// The model list answered on attempt `attempts` (1-based).
    Ready { attempts: u32 },
    /// Every attempt failed; startup continues in degraded mode.
    TimedOut { attempts: u32 },
}

impl BackendReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Poll `list_models` until it succeeds or the retry budget runs out.
pub async fn wait_for_backend(
    client: &dyn GenerationClient,
    config: &StartupConfig,
) -> BackendReadiness {
    for attempt in 1..=config.ready_retries {
        match client.list_models().await {
            Ok(_) => {
                info!("generation backend ready after {attempt} attempt(s)");
                return BackendReadiness::Ready { attempts: attempt };
            }
            Err(e) => debug!("generation backend not ready (attempt {attempt}): {e}"),
        }
        tokio::time::sleep(config.ready_retry_delay()).await;
    }
    warn!(
        "generation backend readiness check timed out after {} attempts, continuing",
        config.ready_retries
    );
    BackendReadiness::TimedOut {
        attempts: config.ready_retries,
    }
}
