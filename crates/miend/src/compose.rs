//! Composition root: builds the store, model collaborators and pipeline.

use crate::config::Config;
use mien_core::placeholder::{PixelSeedEmbedder, PixelSeedEmotionClassifier, WholeImageDetector};
use mien_core::{Detector, Embedder, EmotionClassifier, FacePipeline, PersonStore, SimilarityIndex};
use mien_store::SqliteStore;
use std::sync::Arc;

pub fn build_pipeline(config: &Config) -> anyhow::Result<FacePipeline> {
    let index = SimilarityIndex::new(config.similarity_threshold);
    let store: Arc<dyn PersonStore> = if config.in_memory_db() {
        tracing::warn!("using in-memory face store; enrollments will not persist");
        Arc::new(SqliteStore::open_in_memory(index)?)
    } else {
        Arc::new(SqliteStore::open(&config.db_path, index)?)
    };

    let models = load_models(config);

    tracing::info!(
        threshold = index.threshold(),
        top_k = config.top_k,
        enroll_policy = ?config.enroll_policy,
        "pipeline ready"
    );

    Ok(FacePipeline::new(models.detector, models.embedder, models.emotion, store)
        .with_enroll_policy(config.enroll_policy))
}

struct Models {
    detector: Arc<dyn Detector>,
    embedder: Arc<dyn Embedder>,
    emotion: Arc<dyn EmotionClassifier>,
}

#[cfg(feature = "onnx")]
fn load_models(config: &Config) -> Models {
    use mien_core::onnx::{ArcFaceEmbedder, OnnxEmotionClassifier, ScrfdDetector};

    let detector: Arc<dyn Detector> = match ScrfdDetector::load(&config.detection_model_path()) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::warn!(error = %e, "detection model unavailable; treating each image as one face");
            Arc::new(WholeImageDetector)
        }
    };
    let embedder: Arc<dyn Embedder> = match ArcFaceEmbedder::load(&config.embedding_model_path()) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::warn!(error = %e, "embedding model unavailable; using placeholder embeddings");
            Arc::new(PixelSeedEmbedder::default())
        }
    };
    let emotion: Arc<dyn EmotionClassifier> = match OnnxEmotionClassifier::load(&config.emotion_model_path()) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::warn!(error = %e, "emotion model unavailable; using placeholder classifier");
            Arc::new(PixelSeedEmotionClassifier)
        }
    };
    Models {
        detector,
        embedder,
        emotion,
    }
}

#[cfg(not(feature = "onnx"))]
fn load_models(config: &Config) -> Models {
    tracing::warn!(
        model_dir = %config.model_dir.display(),
        "built without the `onnx` feature; using whole-image detector and placeholder models"
    );
    Models {
        detector: Arc::new(WholeImageDetector),
        embedder: Arc::new(PixelSeedEmbedder::default()),
        emotion: Arc::new(PixelSeedEmotionClassifier),
    }
}
