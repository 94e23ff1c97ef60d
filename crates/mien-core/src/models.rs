//! Model collaborator interfaces.
//!
//! Implementations may be slow or blocking. They are shared across concurrent
//! requests, so any interior state must be synchronized by the implementor.

use crate::emotion::Emotion;
use crate::error::ModelError;
use crate::types::{Detection, Embedding};
use image::RgbImage;

/// Face detector over a full image.
pub trait Detector: Send + Sync {
    /// Detected faces in model output order. May be empty.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError>;
}

/// Identity embedder over aligned face crops.
pub trait Embedder: Send + Sync {
    /// One embedding per crop, same order, fixed dimensionality.
    fn embed(&self, crops: &[RgbImage]) -> Result<Vec<Embedding>, ModelError>;
}

/// Emotion classifier over aligned face crops.
pub trait EmotionClassifier: Send + Sync {
    /// One emotion per crop, same order.
    fn classify(&self, crops: &[RgbImage]) -> Result<Vec<Emotion>, ModelError>;
}
