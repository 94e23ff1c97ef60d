//! ONNX Runtime model collaborators.
//!
//! Drop-in replacements for the placeholder detector, embedder and emotion
//! classifier. Sessions are guarded by a mutex because `Session::run` needs
//! `&mut self`.

use crate::emotion::{Emotion, EmotionLabel};
use crate::error::ModelError;
use crate::models::{Detector, Embedder, EmotionClassifier};
use crate::pipeline::ensure_len;
use crate::types::{BoundingBox, Detection, Embedding, Landmarks, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

// --- SCRFD ---
const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_OUTPUTS: usize = 9;

// --- ArcFace ---
const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;

// --- Emotion (FER-style, single channel) ---
const EMOTION_INPUT_SIZE: u32 = 64;

impl From<ort::Error> for ModelError {
    fn from(err: ort::Error) -> Self {
        ModelError::Inference(format!("ort: {err}"))
    }
}

fn load_session(model_path: &Path, kind: &str) -> Result<Session, ModelError> {
    if !model_path.exists() {
        return Err(ModelError::ModelNotFound(model_path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = %model_path.display(),
        kind,
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );

    Ok(session)
}

fn lock(session: &Mutex<Session>) -> Result<std::sync::MutexGuard<'_, Session>, ModelError> {
    session
        .lock()
        .map_err(|_| ModelError::Inference("session lock poisoned".into()))
}

/// Placement of the resized image inside the square detector input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    /// Fit a `width × height` image inside the detector input, centred.
    fn fit(width: u32, height: u32) -> Self {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        Self {
            scale,
            width: new_w,
            height: new_h,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    /// Map a point from detector input space back to source image pixels.
    fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD face detector (insightface `det_10g.onnx`) with five-point landmarks.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        let session = load_session(model_path, "detection")?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < SCRFD_OUTPUTS {
            return Err(ModelError::OutputMismatch {
                stage: "detect",
                expected: SCRFD_OUTPUTS,
                actual: names.len(),
            });
        }
        let stride_outputs = output_indices(&names);
        tracing::debug!(?stride_outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            stride_outputs,
        })
    }

    /// Letterbox into a 640×640 NCHW tensor. Padding normalizes to 0.0.
    fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let letterbox = Letterbox::fit(image.width(), image.height());
        let side = SCRFD_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

        let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl Detector for ScrfdDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = Self::preprocess(image);

        let mut session = lock(&self.session)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(&self.stride_outputs) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Inference(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::Inference(format!("kps stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Map output tensors to strides by name (`score_8`, `bbox_16`, `kps_32`, ...),
/// falling back to positional order: scores 0-2, bboxes 3-5, kps 6-8.
fn output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized; using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode anchor-free detections above threshold for one stride level,
/// in source image coordinates.
fn decode_stride(scores: &[f32], bboxes: &[f32], kps: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCRFD_CONFIDENCE_THRESHOLD {
            continue;
        }
        let Some(off) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_image(anchor_x - off[0] * step, anchor_y - off[1] * step);
        let (x2, y2) = letterbox.to_image(anchor_x + off[2] * step, anchor_y + off[3] * step);

        let landmarks = match kps.get(idx * 10..idx * 10 + 10) {
            Some(points) => {
                let point = |i: usize| {
                    Some(letterbox.to_image(anchor_x + points[i * 2] * step, anchor_y + points[i * 2 + 1] * step))
                };
                Landmarks {
                    left_eye: point(0),
                    right_eye: point(1),
                    nose: point(2),
                    left_mouth: point(3),
                    right_mouth: point(4),
                }
            }
            None => Landmarks::default(),
        };

        detections.push(Detection {
            bbox: BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
            },
            landmarks,
            score,
        });
    }

    detections
}

/// Greedy non-maximum suppression. Survivors come back highest score first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// ArcFace-style identity embedder.
pub struct ArcFaceEmbedder {
    session: Mutex<Session>,
}

impl ArcFaceEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            session: Mutex::new(load_session(model_path, "embedding")?),
        })
    }

    /// Resize crops to 112×112 and pack them into an NCHW batch.
    fn preprocess(crops: &[RgbImage]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((crops.len(), 3, size, size));

        for (n, crop) in crops.iter().enumerate() {
            if crop.width() == 0 || crop.height() == 0 {
                continue;
            }
            let resized = imageops::resize(crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[n, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
                }
            }
        }

        tensor
    }
}

impl Embedder for ArcFaceEmbedder {
    fn embed(&self, crops: &[RgbImage]) -> Result<Vec<Embedding>, ModelError> {
        if crops.is_empty() {
            return Ok(Vec::new());
        }
        let input = Self::preprocess(crops);

        let mut session = lock(&self.session)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("embedding extraction: {e}")))?;

        if raw.len() != crops.len() * EMBEDDING_DIM {
            return Err(ModelError::Inference(format!(
                "expected {} values ({} × {EMBEDDING_DIM}), got {}",
                crops.len() * EMBEDDING_DIM,
                crops.len(),
                raw.len()
            )));
        }

        Ok(raw
            .chunks_exact(EMBEDDING_DIM)
            .map(|chunk| {
                // L2-normalize each embedding
                let norm: f32 = chunk.iter().map(|x| x * x).sum::<f32>().sqrt();
                let values = if norm > 0.0 {
                    chunk.iter().map(|x| x / norm).collect()
                } else {
                    chunk.to_vec()
                };
                Embedding::new(values)
            })
            .collect())
    }
}

/// Emotion classifier producing seven logits per face.
pub struct OnnxEmotionClassifier {
    session: Mutex<Session>,
}

impl OnnxEmotionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            session: Mutex::new(load_session(model_path, "emotion")?),
        })
    }

    /// Grayscale, 64×64, scaled to [0, 1].
    fn preprocess(crops: &[RgbImage]) -> Array4<f32> {
        let size = EMOTION_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((crops.len(), 1, size, size));

        for (n, crop) in crops.iter().enumerate() {
            if crop.width() == 0 || crop.height() == 0 {
                continue;
            }
            let gray = imageops::grayscale(crop);
            let resized = imageops::resize(&gray, EMOTION_INPUT_SIZE, EMOTION_INPUT_SIZE, FilterType::Triangle);
            for (x, y, pixel) in resized.enumerate_pixels() {
                tensor[[n, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            }
        }

        tensor
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn classify(&self, crops: &[RgbImage]) -> Result<Vec<Emotion>, ModelError> {
        if crops.is_empty() {
            return Ok(Vec::new());
        }
        let input = Self::preprocess(crops);

        let mut session = lock(&self.session)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("emotion logits: {e}")))?;

        let emotions: Vec<Emotion> = raw
            .chunks_exact(EmotionLabel::COUNT)
            .filter_map(|chunk| <&[f32; EmotionLabel::COUNT]>::try_from(chunk).ok())
            .map(Emotion::from_logits)
            .collect();
        ensure_len("emotion", crops.len(), emotions.len())?;
        Ok(emotions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_arcface_preprocess_shape_and_normalization() {
        let crops = vec![RgbImage::from_pixel(40, 30, Rgb([255, 127, 0])), RgbImage::new(0, 0)];
        let tensor = ArcFaceEmbedder::preprocess(&crops);
        assert_eq!(tensor.shape(), &[2, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
        // empty crops stay zero-filled
        assert_eq!(tensor[[1, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_emotion_preprocess_shape() {
        let crops = vec![RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]))];
        let tensor = OnnxEmotionClassifier::preprocess(&crops);
        assert_eq!(tensor.shape(), &[1, 1, 64, 64]);
        assert!((tensor[[0, 0, 3, 3]] - 1.0).abs() < 1e-6);
    }

    fn face(x: f32, y: f32, size: f32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x, y, width: size, height: size },
            landmarks: Landmarks::default(),
            score,
        }
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let b = BoundingBox { x: 5.0, y: 0.0, width: 10.0, height: 10.0 };
        let far = BoundingBox { x: 20.0, y: 20.0, width: 10.0, height: 10.0 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &far), 0.0);
    }

    #[test]
    fn test_nms_keeps_distinct_faces_best_first() {
        let kept = nms(
            vec![
                face(5.0, 5.0, 100.0, 0.8),
                face(300.0, 40.0, 50.0, 0.7),
                face(0.0, 0.0, 100.0, 0.9),
            ],
            SCRFD_NMS_THRESHOLD,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), SCRFD_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_output_indices_by_name_and_position() {
        let named: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(output_indices(&named), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numeric: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        assert_eq!(output_indices(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_letterbox_maps_back_to_image() {
        let lb = Letterbox::fit(320, 240);
        assert_eq!((lb.width, lb.height, lb.pad_x, lb.pad_y), (640, 480, 0, 80));

        let (x, y) = lb.to_image(100.0 * lb.scale, 50.0 * lb.scale + 80.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4, "({x}, {y})");
    }

    #[test]
    fn test_scrfd_preprocess_pads_with_zero() {
        let image = RgbImage::from_pixel(320, 240, Rgb([255, 255, 255]));
        let (tensor, lb) = ScrfdDetector::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        let inside = tensor[[0, 1, (lb.pad_y + 10) as usize, 10]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_maps_box_and_landmarks() {
        let stride = 32;
        let grid = 640 / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        // second anchor of cell (row 3, col 4)
        let idx = (3 * grid + 4) * SCRFD_ANCHORS_PER_CELL + 1;

        let mut scores = vec![0.1f32; anchors];
        scores[idx] = 0.92;
        let mut bboxes = vec![0.0f32; anchors * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 2.0]);
        let mut kps = vec![0.0f32; anchors * 10];
        kps[idx * 10..idx * 10 + 10]
            .copy_from_slice(&[-0.5, -0.25, 0.5, -0.25, 0.0, 0.25, -0.25, 0.75, 0.25, 0.75]);

        let lb = Letterbox::fit(640, 640);
        let found = decode_stride(&scores, &bboxes, &kps, stride, &lb);
        assert_eq!(found.len(), 1);

        let d = &found[0];
        assert_eq!(d.score, 0.92);
        // anchor at (128, 96)
        assert_eq!(d.bbox, BoundingBox { x: 96.0, y: 64.0, width: 64.0, height: 96.0 });
        assert_eq!(d.landmarks.eyes(), Some(((112.0, 88.0), (144.0, 88.0))));
        assert_eq!(d.landmarks.nose, Some((128.0, 104.0)));
        assert_eq!(d.landmarks.right_mouth, Some((136.0, 120.0)));
    }

    #[test]
    fn test_decode_stride_without_keypoints() {
        let anchors = 20 * 20 * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.9;
        let found = decode_stride(&scores, &vec![0.5f32; anchors * 4], &[], 32, &Letterbox::fit(640, 640));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].landmarks, Landmarks::default());
    }

    #[test]
    fn test_missing_model_reports_path() {
        let err = ArcFaceEmbedder::load(Path::new("/nonexistent/arcface.onnx")).err().unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(ref p) if p.contains("arcface")));
        let err = ScrfdDetector::load(Path::new("/nonexistent/det_10g.onnx")).err().unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(ref p) if p.contains("det_10g")));
    }
}
