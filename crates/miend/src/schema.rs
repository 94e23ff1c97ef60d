//! JSON response bodies returned over the service boundary.

use mien_core::pipeline::{STAGE_DETECT, STAGE_EMBED, STAGE_EMOTION, STAGE_RECOGNIZE};
use mien_core::timing::TOTAL;
use mien_core::{Detection, Emotion, EmotionLabel, Enrollment, Landmarks, PersonRecord, PipelineResult, Recognition};
use serde::Serialize;

/// Label reported for faces with no enrolled match above threshold.
pub const UNKNOWN_PERSON: &str = "Unknown";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LandmarkSet {
    pub l_eye: Option<[f32; 2]>,
    pub r_eye: Option<[f32; 2]>,
    pub nose: Option<[f32; 2]>,
    pub l_mouth: Option<[f32; 2]>,
    pub r_mouth: Option<[f32; 2]>,
}

impl From<&Landmarks> for LandmarkSet {
    fn from(lm: &Landmarks) -> Self {
        let point = |p: Option<(f32, f32)>| p.map(|(x, y)| [x, y]);
        Self {
            l_eye: point(lm.left_eye),
            r_eye: point(lm.right_eye),
            nose: point(lm.nose),
            l_mouth: point(lm.left_mouth),
            r_mouth: point(lm.right_mouth),
        }
    }
}

fn bbox(d: &Detection) -> [f32; 4] {
    [d.bbox.x, d.bbox.y, d.bbox.width, d.bbox.height]
}

#[derive(Debug, Serialize)]
pub struct FaceDetection {
    pub id: usize,
    pub bbox: [f32; 4],
    pub landmarks: LandmarkSet,
    pub score: f32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Identity {
    pub person: String,
    pub similarity: f32,
    pub embedding_norm: Option<f32>,
}

impl Identity {
    /// No enrolled match; still reports the query embedding's norm.
    pub fn unknown(embedding_norm: Option<f32>) -> Self {
        Self {
            person: UNKNOWN_PERSON.to_string(),
            similarity: 0.0,
            embedding_norm,
        }
    }
}

impl From<&Recognition> for Identity {
    fn from(r: &Recognition) -> Self {
        Self {
            person: r.person.clone(),
            similarity: r.similarity,
            embedding_norm: Some(r.embedding_norm),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmotionProbabilities {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub surprise: f32,
    pub fear: f32,
    pub disgust: f32,
}

#[derive(Debug, Serialize)]
pub struct EmotionResponse {
    pub emotion: EmotionLabel,
    pub probabilities: EmotionProbabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
}

impl EmotionResponse {
    fn new(emotion: &Emotion, bbox: Option<[f32; 4]>) -> Self {
        let p = |label| emotion.probability(label);
        Self {
            emotion: emotion.label,
            probabilities: EmotionProbabilities {
                neutral: p(EmotionLabel::Neutral),
                happy: p(EmotionLabel::Happy),
                sad: p(EmotionLabel::Sad),
                angry: p(EmotionLabel::Angry),
                surprise: p(EmotionLabel::Surprise),
                fear: p(EmotionLabel::Fear),
                disgust: p(EmotionLabel::Disgust),
            },
            bbox,
        }
    }
}

/// One face in a recognize response; absent matches become "Unknown".
#[derive(Debug, Serialize)]
pub struct RecognizedFace {
    #[serde(flatten)]
    pub identity: Identity,
    pub bbox: [f32; 4],
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct PipelineFace {
    pub bbox: [f32; 4],
    pub landmarks: LandmarkSet,
    pub score: f32,
    pub identity: Option<Identity>,
    pub emotion: Option<EmotionResponse>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PipelineTiming {
    pub total: f64,
    pub detect: Option<f64>,
    pub embed: Option<f64>,
    pub recognize: Option<f64>,
    pub emotion: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PipelineResponse {
    pub faces: Vec<PipelineFace>,
    pub timing_ms: PipelineTiming,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub person_id: i64,
    pub name: String,
    pub samples: usize,
}

#[derive(Debug, Serialize)]
pub struct PersonsResponse {
    pub results: Vec<PersonRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

pub fn detections(result: &PipelineResult) -> Vec<FaceDetection> {
    result
        .detections
        .iter()
        .enumerate()
        .map(|(id, d)| FaceDetection {
            id,
            bbox: bbox(d),
            landmarks: LandmarkSet::from(&d.landmarks),
            score: d.score,
        })
        .collect()
}

pub fn recognitions(result: &PipelineResult) -> Vec<RecognizedFace> {
    result
        .faces()
        .zip(&result.embedding_norms)
        .map(|((d, r, _), &norm)| RecognizedFace {
            identity: r.map(Identity::from).unwrap_or_else(|| Identity::unknown(norm)),
            bbox: bbox(d),
            score: d.score,
        })
        .collect()
}

pub fn emotions(result: &PipelineResult) -> Vec<EmotionResponse> {
    result
        .faces()
        .filter_map(|(d, _, e)| e.map(|e| EmotionResponse::new(e, Some(bbox(d)))))
        .collect()
}

pub fn pipeline(result: &PipelineResult) -> PipelineResponse {
    let faces = result
        .faces()
        .map(|(d, r, e)| PipelineFace {
            bbox: bbox(d),
            landmarks: LandmarkSet::from(&d.landmarks),
            score: d.score,
            identity: r.map(Identity::from),
            emotion: e.map(|e| EmotionResponse::new(e, None)),
        })
        .collect();

    let stage = |name: &str| result.timings.get(name).copied();
    PipelineResponse {
        faces,
        timing_ms: PipelineTiming {
            total: stage(TOTAL).unwrap_or(0.0),
            detect: stage(STAGE_DETECT),
            embed: stage(STAGE_EMBED),
            recognize: stage(STAGE_RECOGNIZE),
            emotion: stage(STAGE_EMOTION),
        },
    }
}

pub fn enrollment(e: &Enrollment) -> EnrollResponse {
    EnrollResponse {
        person_id: e.person.id,
        name: e.person.name.clone(),
        samples: e.samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::BoundingBox;
    use std::collections::BTreeMap;

    fn detection() -> Detection {
        Detection {
            bbox: BoundingBox { x: 1.0, y: 2.0, width: 3.0, height: 4.0 },
            landmarks: Landmarks {
                left_eye: Some((1.5, 2.5)),
                ..Default::default()
            },
            score: 0.8,
        }
    }

    fn result(recognition: Option<Recognition>, emotion: Option<Emotion>) -> PipelineResult {
        PipelineResult {
            detections: vec![detection()],
            recognitions: vec![recognition],
            embedding_norms: vec![Some(0.5)],
            emotions: vec![emotion],
            timings: BTreeMap::from([("total".to_string(), 4.0), ("detect".to_string(), 1.5)]),
        }
    }

    #[test]
    fn test_unmatched_face_is_unknown() {
        let faces = recognitions(&result(None, None));
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].identity, Identity::unknown(Some(0.5)));

        let json = serde_json::to_value(&faces[0]).unwrap();
        assert_eq!(json["person"], "Unknown");
        assert_eq!(json["similarity"], 0.0);
        assert_eq!(json["embedding_norm"], 0.5);
        assert_eq!(json["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_matched_face_carries_identity() {
        let r = Recognition {
            person: "Alice".into(),
            similarity: 0.93,
            embedding_norm: 1.0,
        };
        let faces = recognitions(&result(Some(r), None));
        assert_eq!(faces[0].identity.person, "Alice");
        assert_eq!(faces[0].identity.embedding_norm, Some(1.0));
    }

    #[test]
    fn test_pipeline_response_shape() {
        let emotion = Emotion::from_logits(&[0.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let response = pipeline(&result(None, Some(emotion)));

        assert_eq!(
            response.timing_ms,
            PipelineTiming {
                total: 4.0,
                detect: Some(1.5),
                embed: None,
                recognize: None,
                emotion: None,
            }
        );

        let json = serde_json::to_value(&response).unwrap();
        let face = &json["faces"][0];
        assert!(face["identity"].is_null());
        assert_eq!(face["emotion"]["emotion"], "happy");
        assert!(face["emotion"].get("bbox").is_none());
        assert_eq!(face["landmarks"]["l_eye"], serde_json::json!([1.5, 2.5]));
        assert!(face["landmarks"]["r_eye"].is_null());
    }

    #[test]
    fn test_emotion_probabilities_sum_to_one() {
        let emotion = Emotion::from_logits(&[1.0, 0.2, -0.5, 0.0, 2.0, 0.1, 0.3]);
        let out = emotions(&result(None, Some(emotion)));
        let p = &out[0].probabilities;
        let sum = p.neutral + p.happy + p.sad + p.angry + p.surprise + p.fear + p.disgust;
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(out[0].bbox, Some([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_detections_are_numbered() {
        let mut r = result(None, None);
        r.detections.push(detection());
        r.recognitions.push(None);
        r.embedding_norms.push(None);
        r.emotions.push(None);
        let out = detections(&r);
        assert_eq!(out.iter().map(|d| d.id).collect::<Vec<_>>(), vec![0, 1]);
    }
}
