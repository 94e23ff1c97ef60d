//! Emotion categories and logit post-processing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed, ordered set of emotion categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprise,
    Fear,
    Disgust,
}

impl EmotionLabel {
    pub const COUNT: usize = 7;

    /// All categories in model output order.
    pub const ALL: [EmotionLabel; Self::COUNT] = [
        EmotionLabel::Neutral,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Surprise,
        EmotionLabel::Fear,
        EmotionLabel::Disgust,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Disgust => "disgust",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numerically stable softmax: the maximum logit is subtracted before
/// exponentiating, so large logits cannot overflow.
///
/// NaN logits count as `-inf`. A `+inf` logit takes all the mass (the first
/// one wins if there are several); all `-inf` yields a uniform distribution.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    if let Some(hot) = logits.iter().position(|&l| l == f32::INFINITY) {
        let mut probs = vec![0.0; logits.len()];
        probs[hot] = 1.0;
        return probs;
    }

    let clean = |l: f32| if l.is_nan() { f32::NEG_INFINITY } else { l };
    let max = logits.iter().copied().map(clean).fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        let uniform = 1.0 / logits.len() as f32;
        return vec![uniform; logits.len()];
    }

    let exps: Vec<f32> = logits.iter().map(|&l| (clean(l) - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Classified emotion for one face: the most probable label plus the full
/// distribution over [`EmotionLabel::ALL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emotion {
    pub label: EmotionLabel,
    pub probabilities: [f32; EmotionLabel::COUNT],
}

impl Emotion {
    /// Convert raw model logits into a probability distribution and label.
    ///
    /// Ties resolve to the category that comes first in [`EmotionLabel::ALL`].
    pub fn from_logits(logits: &[f32; EmotionLabel::COUNT]) -> Self {
        let probs = softmax(logits);
        let mut probabilities = [0.0f32; EmotionLabel::COUNT];
        probabilities.copy_from_slice(&probs);

        let mut best = 0;
        for (i, &p) in probabilities.iter().enumerate().skip(1) {
            if p > probabilities[best] {
                best = i;
            }
        }

        Self {
            label: EmotionLabel::ALL[best],
            probabilities,
        }
    }

    pub fn probability(&self, label: EmotionLabel) -> f32 {
        self.probabilities[label.index()]
    }

    /// `(label, probability)` pairs in category order.
    pub fn distribution(&self) -> impl Iterator<Item = (EmotionLabel, f32)> + '_ {
        EmotionLabel::ALL.iter().copied().zip(self.probabilities.iter().copied())
    }
}
