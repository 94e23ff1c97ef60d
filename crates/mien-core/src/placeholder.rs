//! Deterministic stand-ins for the detection, embedding and emotion models.
//!
//! Used when no model files are available. Outputs are derived from pixel
//! sums, so identical crops always produce identical results.

use crate::emotion::{Emotion, EmotionLabel};
use crate::error::ModelError;
use crate::models::{Detector, Embedder, EmotionClassifier};
use crate::types::{BoundingBox, Detection, Embedding, Landmarks, EMBEDDING_DIM};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

const EMBEDDING_SEED_MODULUS: u64 = 97;

fn pixel_sum(image: &RgbImage) -> u64 {
    image.as_raw().iter().map(|&b| b as u64).sum()
}

/// Reports a single face covering the whole (non-empty) image.
#[derive(Debug, Default, Clone, Copy)]
pub struct WholeImageDetector;

impl Detector for WholeImageDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: w as f32,
                height: h as f32,
            },
            landmarks: Landmarks::default(),
            score: 1.0,
        }])
    }
}

/// Pseudo-random embeddings seeded from the crop's pixel sum.
#[derive(Debug, Clone, Copy)]
pub struct PixelSeedEmbedder {
    dim: usize,
}

impl Default for PixelSeedEmbedder {
    fn default() -> Self {
        Self { dim: EMBEDDING_DIM }
    }
}

impl Embedder for PixelSeedEmbedder {
    fn embed(&self, crops: &[RgbImage]) -> Result<Vec<Embedding>, ModelError> {
        Ok(crops
            .par_iter()
            .map(|crop| {
                let mut rng = StdRng::seed_from_u64(pixel_sum(crop) % EMBEDDING_SEED_MODULUS);
                Embedding::new((0..self.dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            })
            .collect())
    }
}

/// One-hot logits at `pixel_sum % 7`, passed through softmax.
#[derive(Debug, Default, Clone, Copy)]
pub struct PixelSeedEmotionClassifier;

impl EmotionClassifier for PixelSeedEmotionClassifier {
    fn classify(&self, crops: &[RgbImage]) -> Result<Vec<Emotion>, ModelError> {
        Ok(crops
            .par_iter()
            .map(|crop| {
                let mut logits = [0.0f32; EmotionLabel::COUNT];
                logits[(pixel_sum(crop) % EmotionLabel::COUNT as u64) as usize] = 1.0;
                Emotion::from_logits(&logits)
            })
            .collect())
    }
}
