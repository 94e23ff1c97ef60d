use crate::config::MAX_TOP_K;
use crate::schema;
use mien_core::{decode_image, FacePipeline, PipelineError, PipelineOptions};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use zbus::{fdo, interface};

/// Bus name claimed by the daemon.
pub const BUS_NAME: &str = "org.mien.Mien1";
/// Object path of the service.
pub const OBJECT_PATH: &str = "/org/mien/Mien1";

/// Largest page `ListPersons` will return.
const MAX_PAGE: u32 = 100;

/// D-Bus interface for the Mien face recognition daemon.
///
/// Bus name: org.mien.Mien1
/// Object path: /org/mien/Mien1
///
/// Every method returns a JSON document. Inference runs on tokio's blocking
/// pool so concurrent callers are served in parallel.
pub struct MienService {
    pipeline: Arc<FacePipeline>,
    runtime: Handle,
    default_top_k: usize,
}

#[interface(name = "org.mien.Mien1")]
impl MienService {
    /// Liveness and version.
    async fn health(&self) -> fdo::Result<String> {
        to_json(&schema::HealthResponse::ok())
    }

    /// Detect faces in an encoded image.
    async fn detect(&self, image: Vec<u8>) -> fdo::Result<String> {
        let result = self
            .run_image(image, PipelineOptions::detect_only())
            .await?;
        to_json(&schema::detections(&result))
    }

    /// Identify every face in an encoded image. `top_k` of 0 uses the default.
    async fn recognize(&self, image: Vec<u8>, top_k: u32) -> fdo::Result<String> {
        let options = PipelineOptions {
            recognize: true,
            emotions: false,
            top_k: self.top_k(top_k),
        };
        let result = self.run_image(image, options).await?;
        to_json(&schema::recognitions(&result))
    }

    /// Classify the emotion of every face in an encoded image.
    async fn emotion(&self, image: Vec<u8>) -> fdo::Result<String> {
        let options = PipelineOptions {
            recognize: false,
            emotions: true,
            ..PipelineOptions::default()
        };
        let result = self.run_image(image, options).await?;
        to_json(&schema::emotions(&result))
    }

    /// Full pipeline with per-stage timings.
    async fn pipeline(&self, image: Vec<u8>, recognize: bool, emotions: bool, top_k: u32) -> fdo::Result<String> {
        let options = PipelineOptions {
            recognize,
            emotions,
            top_k: self.top_k(top_k),
        };
        let result = self.run_image(image, options).await?;
        to_json(&schema::pipeline(&result))
    }

    /// Enroll a named person from one or more encoded images.
    async fn enroll(&self, name: String, images: Vec<Vec<u8>>, notes: String) -> fdo::Result<String> {
        tracing::info!(name = %name, images = images.len(), "enroll requested");
        let enrollment = self
            .blocking(move |pipeline| {
                let decoded = images
                    .iter()
                    .map(|bytes| decode_image(bytes))
                    .collect::<Result<Vec<_>, _>>()?;
                let notes = Some(notes.as_str()).filter(|n| !n.is_empty());
                pipeline.enroll(&name, &decoded, notes)
            })
            .await?;
        to_json(&schema::enrollment(&enrollment))
    }

    /// A page of enrolled persons, newest first.
    async fn list_persons(&self, limit: u32, offset: u32) -> fdo::Result<String> {
        let limit = limit.clamp(1, MAX_PAGE) as usize;
        let (results, total) = self
            .blocking(move |pipeline| pipeline.list_persons(limit, offset as usize))
            .await?;
        to_json(&schema::PersonsResponse { results, total })
    }

    /// Delete a person and all of their embeddings.
    async fn delete_person(&self, id: i64) -> fdo::Result<String> {
        tracing::info!(id, "delete requested");
        self.blocking(move |pipeline| pipeline.delete_person(id)).await?;
        to_json(&schema::DeleteResponse { deleted: true })
    }
}

impl MienService {
    pub fn new(pipeline: Arc<FacePipeline>, runtime: Handle, default_top_k: usize) -> Self {
        Self {
            pipeline,
            runtime,
            default_top_k,
        }
    }

    fn top_k(&self, requested: u32) -> usize {
        match requested {
            0 => self.default_top_k,
            k => (k as usize).min(MAX_TOP_K),
        }
    }

    async fn run_image(
        &self,
        image: Vec<u8>,
        options: PipelineOptions,
    ) -> fdo::Result<mien_core::PipelineResult> {
        self.blocking(move |pipeline| {
            let image = decode_image(&image)?;
            pipeline.run(&image, &options)
        })
        .await
    }

    /// Run `work` on the blocking pool and map its error to D-Bus.
    async fn blocking<T, F>(&self, work: F) -> fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FacePipeline) -> Result<T, PipelineError> + Send + 'static,
    {
        let pipeline = self.pipeline.clone();
        self.runtime
            .spawn_blocking(move || work(&pipeline))
            .await
            .map_err(|e| fdo::Error::Failed(format!("worker task failed: {e}")))?
            .map_err(to_fdo)
    }
}

/// Map a core error onto the closest standard D-Bus error.
pub fn to_fdo(err: PipelineError) -> fdo::Error {
    match &err {
        PipelineError::InvalidInput(_) => fdo::Error::InvalidArgs(err.to_string()),
        PipelineError::NotFound(_) => fdo::Error::UnknownObject(err.to_string()),
        PipelineError::DuplicateIdentity(_) => fdo::Error::FileExists(err.to_string()),
        PipelineError::NoFaceDetected => fdo::Error::Failed(err.to_string()),
        PipelineError::Collaborator(_) | PipelineError::Store(_) => {
            tracing::error!(error = %err, "request failed");
            fdo::Error::Failed(err.to_string())
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serializing response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::placeholder::{PixelSeedEmbedder, PixelSeedEmotionClassifier, WholeImageDetector};
    use mien_core::{MemoryStore, ModelError};

    fn service(runtime: Handle) -> MienService {
        let pipeline = FacePipeline::new(
            Arc::new(WholeImageDetector),
            Arc::new(PixelSeedEmbedder::default()),
            Arc::new(PixelSeedEmotionClassifier),
            Arc::new(MemoryStore::default()),
        );
        MienService::new(Arc::new(pipeline), runtime, 3)
    }

    fn png() -> Vec<u8> {
        let img = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([x as u8 * 9, y as u8 * 5, 77]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(to_fdo(PipelineError::InvalidInput("x".into())), fdo::Error::InvalidArgs(_)));
        assert!(matches!(to_fdo(PipelineError::NotFound(3)), fdo::Error::UnknownObject(_)));
        assert!(matches!(to_fdo(PipelineError::DuplicateIdentity("a".into())), fdo::Error::FileExists(_)));
        assert!(matches!(
            to_fdo(PipelineError::Collaborator(ModelError::Inference("boom".into()))),
            fdo::Error::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_top_k_defaults_and_caps() {
        let svc = service(Handle::current());
        assert_eq!(svc.top_k(0), 3);
        assert_eq!(svc.top_k(2), 2);
        assert_eq!(svc.top_k(99), MAX_TOP_K);
    }

    #[tokio::test]
    async fn test_enroll_recognize_delete_flow() {
        let svc = service(Handle::current());
        let image = png();

        let enrolled: serde_json::Value =
            serde_json::from_str(&svc.enroll("Alice".into(), vec![image.clone()], String::new()).await.unwrap())
                .unwrap();
        assert_eq!(enrolled["name"], "Alice");
        assert_eq!(enrolled["samples"], 1);

        let listed: serde_json::Value = serde_json::from_str(&svc.list_persons(50, 0).await.unwrap()).unwrap();
        assert_eq!(listed["total"], 1);
        assert_eq!(listed["results"][0]["embedding_count"], 1);

        let faces: serde_json::Value = serde_json::from_str(&svc.recognize(image.clone(), 0).await.unwrap()).unwrap();
        assert_eq!(faces[0]["person"], "Alice");
        assert!((faces[0]["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-5);

        let id = enrolled["person_id"].as_i64().unwrap();
        svc.delete_person(id).await.unwrap();
        assert!(matches!(svc.delete_person(id).await, Err(fdo::Error::UnknownObject(_))));

        let faces: serde_json::Value = serde_json::from_str(&svc.recognize(image, 0).await.unwrap()).unwrap();
        assert_eq!(faces[0]["person"], "Unknown");
        assert!(faces[0]["embedding_norm"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_invalid_image_is_rejected() {
        let svc = service(Handle::current());
        assert!(matches!(svc.detect(Vec::new()).await, Err(fdo::Error::InvalidArgs(_))));
        assert!(matches!(svc.pipeline(b"nope".to_vec(), true, true, 0).await, Err(fdo::Error::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn test_pipeline_reports_timings() {
        let svc = service(Handle::current());
        let body: serde_json::Value = serde_json::from_str(&svc.pipeline(png(), true, true, 0).await.unwrap()).unwrap();
        assert_eq!(body["faces"].as_array().unwrap().len(), 1);
        assert!(body["timing_ms"]["total"].as_f64().unwrap() >= 0.0);
        assert!(body["timing_ms"]["detect"].is_number());
        assert!(body["faces"][0]["emotion"]["emotion"].is_string());
    }
}
