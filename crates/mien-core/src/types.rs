use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output dimensionality of identity embeddings (ArcFace-style).
pub const EMBEDDING_DIM: usize = 512;

/// Axis-aligned face bounding box in source image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Named five-point facial landmarks. Any point may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Option<(f32, f32)>,
    pub right_eye: Option<(f32, f32)>,
    pub nose: Option<(f32, f32)>,
    pub left_mouth: Option<(f32, f32)>,
    pub right_mouth: Option<(f32, f32)>,
}

impl Landmarks {
    /// Both eye positions, if the detector produced them.
    pub fn eyes(&self) -> Option<((f32, f32), (f32, f32))> {
        Some((self.left_eye?, self.right_eye?))
    }

    /// Shift every present point by `(-dx, -dy)`, e.g. into a crop's frame.
    pub fn relative_to(&self, dx: f32, dy: f32) -> Self {
        let shift = |p: Option<(f32, f32)>| p.map(|(x, y)| (x - dx, y - dy));
        Self {
            left_eye: shift(self.left_eye),
            right_eye: shift(self.right_eye),
            nose: shift(self.nose),
            left_mouth: shift(self.left_mouth),
            right_mouth: shift(self.right_mouth),
        }
    }
}

/// A single detected face. Immutable once produced by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    /// Detector confidence in [0, 1].
    pub score: f32,
}

/// Face identity embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Element-wise mean of equally sized embeddings.
    ///
    /// Returns `None` for an empty slice or when dimensions disagree.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.values.len();
        if samples.iter().any(|s| s.values.len() != dim) {
            return None;
        }

        let mut acc = vec![0.0f32; dim];
        for sample in samples {
            for (a, v) in acc.iter_mut().zip(&sample.values) {
                *a += v;
            }
        }
        let n = samples.len() as f32;
        acc.iter_mut().for_each(|a| *a /= n);
        Some(Embedding::new(acc))
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Cosine similarity between two vectors, plus the L2 norm of `b`.
///
/// Single pass over both vectors with no allocation. Similarity is 0.0 when
/// either norm is zero.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> (f32, f32) {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_b = norm_b.sqrt();
    let denom = norm_a.sqrt() * norm_b;
    let similarity = if denom > 0.0 { dot / denom } else { 0.0 };
    (similarity, norm_b)
}

/// A ranked identity match produced by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    /// Name of the enrolled person.
    pub person: String,
    /// Cosine similarity of the match [-1, 1].
    pub similarity: f32,
    /// L2 norm of the stored vector that matched.
    pub embedding_norm: f32,
}

/// An enrolled identity as listed by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub embedding_count: usize,
    pub created_at: DateTime<Utc>,
}
