use crate::error::PipelineError;
use base64::Engine;
use image::RgbImage;

/// Decode an image payload into 8-bit RGB.
///
/// Accepts encoded image bytes (PNG, JPEG, ...) or base64 text of them,
/// optionally as a `data:image/...;base64,` URL.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidInput("image payload is empty".into()));
    }
    if image::guess_format(bytes).is_err() {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return decode_base64_image(text);
        }
    }
    decode_raw(bytes)
}

/// Decode base64 image text. Anything up to the first comma is treated as a
/// data-URL prefix and dropped.
pub fn decode_base64_image(text: &str) -> Result<RgbImage, PipelineError> {
    let payload = match text.split_once(',') {
        Some((_, rest)) => rest,
        None => text,
    };
    let binary = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| PipelineError::InvalidInput(format!("unable to decode base64 image payload: {e}")))?;
    if binary.is_empty() {
        return Err(PipelineError::InvalidInput("image payload is empty".into()));
    }
    decode_raw(&binary)
}

fn decode_raw(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::InvalidInput(format!("unable to decode image bytes: {e}")))?;
    Ok(decoded.to_rgb8())
}
