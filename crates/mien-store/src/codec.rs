//! Raw embedding blob format: each `f32` as 4 little-endian bytes, no header.

use mien_core::StoreError;

const F32_WIDTH: usize = std::mem::size_of::<f32>();

pub fn encode(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * F32_WIDTH);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode `blob` into `out`, reusing its allocation.
pub fn decode_into(blob: &[u8], out: &mut Vec<f32>) -> Result<(), StoreError> {
    if blob.len() % F32_WIDTH != 0 {
        return Err(StoreError::CorruptEmbedding(format!(
            "blob length {} is not a multiple of {F32_WIDTH}",
            blob.len()
        )));
    }
    out.clear();
    out.extend(
        blob.chunks_exact(F32_WIDTH)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    );
    Ok(())
}
