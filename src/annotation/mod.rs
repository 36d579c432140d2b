//! Place annotation of photos: the provider interface, the remote vision-language
//! implementation and the degraded on-device classifier.

pub mod local;
pub mod response;
pub mod vision;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalSceneClassifier;
pub use vision::VisionLanguageProvider;

/// Structured description of what a photo shows and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub landmark_name: String,
    pub place_label: Option<String>,
    pub caption: String,
    pub description: String,
    pub facts: Vec<String>,
}

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Image could not be prepared for upload: {0}")]
    Encoding(String),

    #[error("Inference request failed: {0}")]
    Transport(String),

    #[error("Inference request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Inference API key missing or rejected")]
    Unauthorized,

    #[error("Inference quota exhausted: {0}")]
    RateLimited(String),

    #[error("Inference API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed inference response: {0}")]
    Malformed(String),
}

/// "Given image bytes and an optional place hint, describe the place."
///
/// When `place_hint` is supplied the returned `place_label` must be exactly that hint.
#[async_trait]
pub trait AnnotationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn annotate(
        &self,
        image: &[u8],
        place_hint: Option<&str>,
    ) -> Result<Annotation, AnnotationError>;
}
