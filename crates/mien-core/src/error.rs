use thiserror::Error;

/// Failure inside a model collaborator (detector, embedder, classifier).
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("{stage} returned {actual} results for {expected} inputs")]
    OutputMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Failure in the person/embedding store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("a person named {0:?} already exists")]
    DuplicateIdentity(String),
    #[error("corrupt embedding record: {0}")]
    CorruptEmbedding(String),
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Error surfaced by pipeline, enrollment and identity operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no faces detected in provided images")]
    NoFaceDetected,
    #[error("person {0} not found")]
    NotFound(i64),
    #[error("a person named {0:?} already exists")]
    DuplicateIdentity(String),
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] ModelError),
    #[error("store: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateIdentity(name) => PipelineError::DuplicateIdentity(name),
            other => PipelineError::Store(other),
        }
    }
}
