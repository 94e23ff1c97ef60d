//! mien-core — Face recognition pipeline core.
//!
//! Sequences detection, cropping/alignment, embedding, similarity search and
//! emotion classification over injected model collaborators, and ranks
//! enrolled identities against query embeddings.

pub mod alignment;
pub mod emotion;
pub mod error;
pub mod input;
pub mod models;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod placeholder;
pub mod registry;
pub mod similarity;
pub mod store;
pub mod timing;
pub mod types;

pub use emotion::{Emotion, EmotionLabel};
pub use error::{ModelError, PipelineError, StoreError};
pub use input::{decode_base64_image, decode_image};
pub use models::{Detector, Embedder, EmotionClassifier};
pub use pipeline::{FacePipeline, PipelineOptions, PipelineResult};
pub use registry::{EnrollPolicy, Enrollment};
pub use similarity::SimilarityIndex;
pub use store::{MemoryStore, PersonStore};
pub use timing::TimingCollector;
pub use types::{BoundingBox, Detection, Embedding, Landmarks, PersonRecord, Recognition};
