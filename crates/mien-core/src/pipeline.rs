//! Multi-stage face inference orchestration.
//!
//! detect → crop/align → embed → recognize → classify emotion, with every
//! stage after detection optional and timed.

use crate::alignment;
use crate::emotion::Emotion;
use crate::error::{ModelError, PipelineError};
use crate::models::{Detector, Embedder, EmotionClassifier};
use crate::registry::EnrollPolicy;
use crate::store::PersonStore;
use crate::timing::{TimingCollector, TOTAL};
use crate::types::{Detection, Recognition};
use image::RgbImage;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const STAGE_DETECT: &str = "detect";
pub const STAGE_EMBED: &str = "embed";
pub const STAGE_RECOGNIZE: &str = "recognize";
pub const STAGE_EMOTION: &str = "emotion";

/// Default number of candidate matches requested per face.
pub const DEFAULT_TOP_K: usize = 3;

/// Per-request stage selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub recognize: bool,
    pub emotions: bool,
    pub top_k: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            recognize: true,
            emotions: true,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl PipelineOptions {
    /// Detection only.
    pub fn detect_only() -> Self {
        Self {
            recognize: false,
            emotions: false,
            ..Self::default()
        }
    }
}

/// One entry per detected face in each vector, plus stage timings in
/// milliseconds keyed by stage name.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub detections: Vec<Detection>,
    pub recognitions: Vec<Option<Recognition>>,
    /// L2 norm of each face's query embedding; `None` when embedding was skipped.
    pub embedding_norms: Vec<Option<f32>>,
    pub emotions: Vec<Option<Emotion>>,
    pub timings: BTreeMap<String, f64>,
}

impl PipelineResult {
    fn empty(total_ms: f64) -> Self {
        Self {
            detections: Vec::new(),
            recognitions: Vec::new(),
            embedding_norms: Vec::new(),
            emotions: Vec::new(),
            timings: BTreeMap::from([(TOTAL.to_string(), total_ms)]),
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Per-face `(detection, recognition, emotion)` triples.
    pub fn faces(&self) -> impl Iterator<Item = (&Detection, Option<&Recognition>, Option<&Emotion>)> {
        self.detections
            .iter()
            .zip(&self.recognitions)
            .zip(&self.emotions)
            .map(|((d, r), e)| (d, r.as_ref(), e.as_ref()))
    }
}

/// Stateless orchestrator over injected collaborators.
///
/// Holds no per-request state; a single instance can serve concurrent callers.
pub struct FacePipeline {
    detector: Arc<dyn Detector>,
    embedder: Arc<dyn Embedder>,
    emotion: Arc<dyn EmotionClassifier>,
    pub(crate) store: Arc<dyn PersonStore>,
    pub(crate) enroll_policy: EnrollPolicy,
}

impl FacePipeline {
    pub fn new(
        detector: Arc<dyn Detector>,
        embedder: Arc<dyn Embedder>,
        emotion: Arc<dyn EmotionClassifier>,
        store: Arc<dyn PersonStore>,
    ) -> Self {
        Self {
            detector,
            embedder,
            emotion,
            store,
            enroll_policy: EnrollPolicy::default(),
        }
    }

    pub fn with_enroll_policy(mut self, policy: EnrollPolicy) -> Self {
        self.enroll_policy = policy;
        self
    }

    pub fn enroll_policy(&self) -> EnrollPolicy {
        self.enroll_policy
    }

    /// Run the pipeline over one image.
    ///
    /// Any collaborator failure aborts the run; partial results are dropped.
    pub fn run(&self, image: &RgbImage, options: &PipelineOptions) -> Result<PipelineResult, PipelineError> {
        let mut timings = TimingCollector::new();

        let detections = timings.track(STAGE_DETECT, || self.detector.detect(image))?;
        if detections.is_empty() {
            tracing::debug!("no faces detected; skipping downstream stages");
            return Ok(PipelineResult::empty(timings.total()));
        }
        let faces = detections.len();

        let crops = self.crops(image, &detections);

        let mut recognitions = vec![None; faces];
        let mut embedding_norms = vec![None; faces];
        if options.recognize {
            let embeddings = timings.track(STAGE_EMBED, || self.embedder.embed(&crops))?;
            ensure_len(STAGE_EMBED, faces, embeddings.len())?;
            embedding_norms = embeddings.iter().map(|e| Some(e.norm())).collect();

            recognitions = timings.track(STAGE_RECOGNIZE, || {
                embeddings
                    .iter()
                    .map(|e| {
                        self.store
                            .topk_similar(&e.values, options.top_k)
                            .map(|matches| matches.into_iter().next())
                    })
                    .collect::<Result<Vec<_>, _>>()
            })?;
        }

        let mut emotions = vec![None; faces];
        if options.emotions {
            let classified = timings.track(STAGE_EMOTION, || self.emotion.classify(&crops))?;
            ensure_len(STAGE_EMOTION, faces, classified.len())?;
            emotions = classified.into_iter().map(Some).collect();
        }

        let timings = timings.finish();
        tracing::debug!(
            faces,
            recognized = recognitions.iter().filter(|r| r.is_some()).count(),
            total_ms = timings[TOTAL],
            "pipeline run complete"
        );

        Ok(PipelineResult {
            detections,
            recognitions,
            embedding_norms,
            emotions,
            timings,
        })
    }

    pub(crate) fn detector(&self) -> &dyn Detector {
        self.detector.as_ref()
    }

    pub(crate) fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    fn crops(&self, image: &RgbImage, detections: &[Detection]) -> Vec<RgbImage> {
        detections
            .iter()
            .map(|d| alignment::crop_and_align(image, d))
            .collect()
    }
}

pub(crate) fn ensure_len(stage: &'static str, expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected != actual {
        return Err(ModelError::OutputMismatch {
            stage,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::emotion::EmotionLabel;
    use crate::placeholder::{PixelSeedEmbedder, PixelSeedEmotionClassifier, WholeImageDetector};
    use crate::similarity::SimilarityIndex;
    use crate::store::MemoryStore;
    use crate::types::{BoundingBox, Embedding, Landmarks};
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Detector returning a fixed set of boxes.
    pub(crate) struct FixedDetector(pub Vec<Detection>);

    impl Detector for FixedDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _crops: &[RgbImage]) -> Result<Vec<Embedding>, ModelError> {
            Err(ModelError::Inference("model unavailable".into()))
        }
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn embed(&self, _crops: &[RgbImage]) -> Result<Vec<Embedding>, ModelError> {
            Ok(Vec::new())
        }
    }

    /// Counts batched calls and crop totals.
    #[derive(Default)]
    struct CountingClassifier {
        calls: AtomicUsize,
    }

    impl EmotionClassifier for CountingClassifier {
        fn classify(&self, crops: &[RgbImage]) -> Result<Vec<Emotion>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(crops.iter().map(|_| Emotion::from_logits(&[0.0; EmotionLabel::COUNT])).collect())
        }
    }

    fn boxed(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x, y, width: w, height: h },
            landmarks: Landmarks::default(),
            score: 0.9,
        }
    }

    fn test_image() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, ((x + y) * 3) as u8]))
    }

    fn pipeline_with(detector: Arc<dyn Detector>, embedder: Arc<dyn Embedder>) -> (FacePipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(SimilarityIndex::default()));
        let pipeline = FacePipeline::new(
            detector,
            embedder,
            Arc::new(PixelSeedEmotionClassifier),
            store.clone(),
        );
        (pipeline, store)
    }

    #[test]
    fn test_parallel_arrays_have_equal_length() {
        let detector = FixedDetector(vec![boxed(0.0, 0.0, 16.0, 16.0), boxed(16.0, 16.0, 16.0, 16.0)]);
        let (pipeline, _) = pipeline_with(Arc::new(detector), Arc::new(PixelSeedEmbedder::default()));

        let result = pipeline.run(&test_image(), &PipelineOptions::default()).unwrap();
        assert_eq!(result.detections.len(), 2);
        assert_eq!(result.recognitions.len(), 2);
        assert_eq!(result.embedding_norms.len(), 2);
        assert_eq!(result.emotions.len(), 2);
        assert!(result.emotions.iter().all(Option::is_some));
        for stage in [STAGE_DETECT, STAGE_EMBED, STAGE_RECOGNIZE, STAGE_EMOTION, TOTAL] {
            assert!(result.timings.contains_key(stage), "missing {stage}");
        }
    }

    #[test]
    fn test_zero_faces_only_total_timing() {
        let classifier = Arc::new(CountingClassifier::default());
        let store = Arc::new(MemoryStore::default());
        let pipeline = FacePipeline::new(
            Arc::new(FixedDetector(Vec::new())),
            Arc::new(FailingEmbedder),
            classifier.clone(),
            store,
        );

        let result = pipeline.run(&test_image(), &PipelineOptions::default()).unwrap();
        assert!(result.is_empty());
        assert!(result.recognitions.is_empty() && result.emotions.is_empty());
        assert_eq!(result.timings.keys().collect::<Vec<_>>(), vec![TOTAL]);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_skipped_stages_are_placeholders() {
        let (pipeline, _) = pipeline_with(Arc::new(WholeImageDetector), Arc::new(FailingEmbedder));

        let result = pipeline.run(&test_image(), &PipelineOptions::detect_only()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.recognitions, vec![None]);
        assert_eq!(result.embedding_norms, vec![None]);
        assert_eq!(result.emotions, vec![None]);
        assert!(result.timings.get(STAGE_EMBED).is_none());
        assert!(result.timings.get(STAGE_EMOTION).is_none());
        assert!(result.timings.contains_key(STAGE_DETECT));
    }

    #[test]
    fn test_recognizes_enrolled_identity() {
        let (pipeline, store) = pipeline_with(Arc::new(WholeImageDetector), Arc::new(PixelSeedEmbedder::default()));
        let image = test_image();
        let embedding = PixelSeedEmbedder::default().embed(&[image.clone()]).unwrap().remove(0);
        store.add_person("alice", &[embedding], None).unwrap();

        let result = pipeline.run(&image, &PipelineOptions::default()).unwrap();
        let best = result.recognitions[0].as_ref().unwrap();
        assert_eq!(best.person, "alice");
        assert!((best.similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_no_match_is_absent() {
        let (pipeline, store) = pipeline_with(Arc::new(WholeImageDetector), Arc::new(PixelSeedEmbedder::default()));
        let mut other = vec![0.0f32; crate::types::EMBEDDING_DIM];
        other[0] = 1.0;
        store.add_person("bob", &[Embedding::new(other)], None).unwrap();

        let options = PipelineOptions {
            emotions: false,
            ..Default::default()
        };
        let image = test_image();
        let query = PixelSeedEmbedder::default().embed(&[image.clone()]).unwrap().remove(0);

        let result = pipeline.run(&image, &options).unwrap();
        assert_eq!(result.recognitions, vec![None]);
        // unmatched faces still report their query norm
        let norm = result.embedding_norms[0].unwrap();
        assert!(norm > 0.0 && (norm - query.norm()).abs() < 1e-5);
        assert!(result.timings.contains_key(STAGE_RECOGNIZE));
    }

    #[test]
    fn test_collaborator_failure_aborts() {
        let (pipeline, _) = pipeline_with(Arc::new(WholeImageDetector), Arc::new(FailingEmbedder));
        let err = pipeline.run(&test_image(), &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Collaborator(ModelError::Inference(_))));
    }

    #[test]
    fn test_short_batch_is_rejected() {
        let (pipeline, _) = pipeline_with(Arc::new(WholeImageDetector), Arc::new(ShortEmbedder));
        let err = pipeline.run(&test_image(), &PipelineOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Collaborator(ModelError::OutputMismatch { expected: 1, actual: 0, .. })
        ));
    }

    #[test]
    fn test_detector_order_preserved() {
        let detections = vec![boxed(20.0, 0.0, 8.0, 8.0), boxed(0.0, 0.0, 8.0, 8.0)];
        let (pipeline, _) = pipeline_with(Arc::new(FixedDetector(detections.clone())), Arc::new(PixelSeedEmbedder::default()));
        let result = pipeline.run(&test_image(), &PipelineOptions::default()).unwrap();
        assert_eq!(result.detections, detections);
    }

    #[test]
    fn test_concurrent_runs_share_pipeline() {
        let (pipeline, _) = pipeline_with(Arc::new(WholeImageDetector), Arc::new(PixelSeedEmbedder::default()));
        let pipeline = Arc::new(pipeline);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = pipeline.clone();
                std::thread::spawn(move || p.run(&test_image(), &PipelineOptions::default()).map(|r| r.len()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().unwrap(), 1);
        }
    }
}
