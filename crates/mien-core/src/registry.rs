//! Enrollment and identity management on top of the person store.

use crate::alignment;
use crate::error::PipelineError;
use crate::pipeline::{ensure_len, FacePipeline, STAGE_EMBED};
use crate::types::{Embedding, PersonRecord};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How enrollment samples become stored embedding records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollPolicy {
    /// Average all usable samples into a single record.
    #[default]
    Average,
    /// Store one record per usable sample.
    PerSample,
}

impl FromStr for EnrollPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" | "mean" => Ok(EnrollPolicy::Average),
            "per-sample" | "per_sample" | "individual" => Ok(EnrollPolicy::PerSample),
            other => Err(format!("unknown enroll policy {other:?} (expected \"average\" or \"per-sample\")")),
        }
    }
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub person: PersonRecord,
    /// Number of images that contributed a face.
    pub samples: usize,
}

impl FacePipeline {
    /// Enroll `name` from one or more images.
    ///
    /// The first detected face of each image is embedded. Images without a
    /// face are skipped; enrollment fails only if none has one.
    pub fn enroll(
        &self,
        name: &str,
        images: &[RgbImage],
        notes: Option<&str>,
    ) -> Result<Enrollment, PipelineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidInput("name must not be empty".into()));
        }
        if images.is_empty() {
            return Err(PipelineError::InvalidInput("at least one image is required".into()));
        }

        let mut samples = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            let detections = self.detector().detect(image)?;
            let Some(face) = detections.first() else {
                tracing::debug!(image = i, "enroll: no face detected; skipping image");
                continue;
            };
            let crop = alignment::crop_and_align(image, face);
            let mut embedded = self.embedder().embed(std::slice::from_ref(&crop))?;
            ensure_len(STAGE_EMBED, 1, embedded.len())?;
            samples.push(embedded.remove(0));
        }

        if samples.is_empty() {
            return Err(PipelineError::NoFaceDetected);
        }

        let records = match self.enroll_policy {
            EnrollPolicy::Average => vec![Embedding::mean(&samples).ok_or_else(|| {
                PipelineError::InvalidInput("enrollment samples have inconsistent dimensions".into())
            })?],
            EnrollPolicy::PerSample => samples.clone(),
        };

        let person = self.store.add_person(name, &records, notes)?;
        tracing::info!(
            id = person.id,
            name = %person.name,
            samples = samples.len(),
            records = records.len(),
            "person enrolled"
        );

        Ok(Enrollment {
            person,
            samples: samples.len(),
        })
    }

    /// Delete a person and all of their embeddings.
    pub fn delete_person(&self, id: i64) -> Result<(), PipelineError> {
        if !self.store.delete_person(id)? {
            return Err(PipelineError::NotFound(id));
        }
        tracing::info!(id, "person deleted");
        Ok(())
    }

    /// A page of enrolled persons (newest first) and the total count.
    pub fn list_persons(&self, limit: usize, offset: usize) -> Result<(Vec<PersonRecord>, usize), PipelineError> {
        Ok(self.store.list_persons(limit, offset)?)
    }
}
