//! Startup model selection.
//!
//! Decides which lifecycle path startup takes from the backend's model list:
//! auto-select a downloaded model, or send the user to first-launch setup.

use crate::llm::ModelInfo;

/// Decision about model selection at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupDecision {
    /// Load this model and open a session.
    AutoSelect(ModelInfo),
    /// Models exist but none is on the device yet.
    DownloadRequired(Vec<ModelInfo>),
    /// The backend reports no models at all.
    NoModels,
}

/// Decide what startup should do with the listed models.
///
/// # Decision Logic
///
/// - No models → `NoModels`
/// - Any downloaded model → `AutoSelect(first downloaded, in list order)`
/// - Otherwise → `DownloadRequired(all models)`
///
/// # Examples
///
/// ```
/// use voxchat::llm::ModelInfo;
/// use voxchat::model_selection::{decide_startup, StartupDecision};
///
/// assert_eq!(decide_startup(&[]), StartupDecision::NoModels);
///
/// let models = vec![
///     ModelInfo::new("a", "Remote", false),
///     ModelInfo::new("b", "Local", true),
/// ];
/// match decide_startup(&models) {
///     StartupDecision::AutoSelect(m) => assert_eq!(m.id, "b"),
///     _ => panic!("expected AutoSelect"),
/// }
/// ```
pub fn decide_startup(models: &[ModelInfo]) -> StartupDecision {
    if models.is_empty() {
        return StartupDecision::NoModels;
    }
    match models.iter().find(|m| m.is_downloaded) {
        Some(model) => StartupDecision::AutoSelect(model.clone()),
        None => StartupDecision::DownloadRequired(models.to_vec()),
    }
}

/// First downloaded model, if any.
pub fn first_downloaded(models: &[ModelInfo]) -> Option<&ModelInfo> {
    models.iter().find(|m| m.is_downloaded)
}
