//! Error types for the capture-and-compare engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Common(#[from] shotline_common::Error),

    /// Navigation, script or screenshot failure; contained to one context
    #[error("Capture failed for {context}: {reason}")]
    Capture { context: String, reason: String },

    /// Image decode failure; degrades to a "no comparison possible" result
    #[error("Comparison failed: {0}")]
    Comparison(String),

    /// Resource exhaustion or an abort; ends the whole job
    #[error("Job aborted: {0}")]
    JobFatal(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl EngineError {
    pub fn capture(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        EngineError::Capture {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error stays within one context instead of ending the job
    pub fn is_context_scoped(&self) -> bool {
        matches!(
            self,
            EngineError::Capture { .. }
                | EngineError::Comparison(_)
                | EngineError::Browser(_)
                | EngineError::Http(_)
                | EngineError::Image(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
