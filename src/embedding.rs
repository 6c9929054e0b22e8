//! Face embedding vectors and similarity math.

use anyhow::{anyhow, Result};

use crate::detect::EMBEDDING_DIM;
use crate::error::PipelineError;

/// Scale `raw` to unit L2 norm.
///
/// The norm is accumulated in `f64`, so components far outside the `f32`
/// squaring range still normalize. A zero (or non-finite) norm would turn
/// every component into NaN and poison later comparisons, so it is rejected
/// as [`PipelineError::DegenerateEmbedding`].
pub fn normalize(raw: &[f32]) -> Result<Vec<f32>> {
    let norm = raw
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(PipelineError::DegenerateEmbedding.into());
    }
    Ok(raw.iter().map(|&x| (f64::from(x) / norm) as f32).collect())
}

/// Cosine similarity of two unit vectors: their dot product.
///
/// Both inputs must already be normalized; lengths must match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(anyhow!(
            "cannot compare embeddings of length {} and {}",
            a.len(),
            b.len()
        ));
    }
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// Check the embedder produced the expected number of values.
pub fn check_dimension(raw: &[f32]) -> Result<()> {
    if raw.len() != EMBEDDING_DIM {
        return Err(PipelineError::EmbeddingDimension {
            expected: EMBEDDING_DIM,
            actual: raw.len(),
        }
        .into());
    }
    Ok(())
}

/// Encode as little-endian `f32`s for blob storage.
pub fn to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode a little-endian `f32` blob.
pub fn from_blob(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(anyhow!(
            "corrupt embedding blob: {} bytes is not a whole number of f32s",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn l2(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    fn random_vector(rng: &mut rand::rngs::StdRng) -> Vec<f32> {
        (0..EMBEDDING_DIM).map(|_| rng.gen_range(-4.0..4.0)).collect()
    }

    #[test]
    fn normalized_vectors_have_unit_norm() -> Result<()> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let v = normalize(&random_vector(&mut rng))?;
            assert!((l2(&v) - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn self_similarity_is_one() -> Result<()> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let v = normalize(&random_vector(&mut rng))?;
            assert!((cosine_similarity(&v, &v)? - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn renormalizing_is_idempotent() -> Result<()> {
        let once = normalize(&[3.0, 4.0])?;
        let twice = normalize(&once)?;
        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(once, vec![0.6, 0.8]);
        Ok(())
    }

    #[test]
    fn zero_vector_is_degenerate() {
        let err = normalize(&[0.0; EMBEDDING_DIM]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::DegenerateEmbedding)
        );
    }

    #[test]
    fn tiny_and_huge_vectors_still_normalize() -> Result<()> {
        for scale in [1e-23f32, 1e-40, 1e20, 3e38] {
            let v = normalize(&[scale; EMBEDDING_DIM])?;
            assert!((l2(&v) - 1.0).abs() < 1e-5, "scale {}", scale);
        }
        Ok(())
    }

    #[test]
    fn non_finite_vector_is_degenerate() {
        let mut v = vec![1.0f32; EMBEDDING_DIM];
        v[3] = f32::INFINITY;
        assert!(normalize(&v).is_err());
        v[3] = f32::NAN;
        assert!(normalize(&v).is_err());
    }

    #[test]
    fn opposite_vectors_score_minus_one() -> Result<()> {
        let a = normalize(&[1.0, 2.0, 2.0])?;
        let b: Vec<f32> = a.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&a, &b)? + 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_err());
    }

    #[test]
    fn wrong_dimension_is_reported() {
        let err = check_dimension(&[1.0; 128]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::EmbeddingDimension {
                expected: 192,
                actual: 128
            })
        );
    }

    #[test]
    fn blob_decode_restores_values() -> Result<()> {
        let v = vec![0.25f32, -1.5, 3.0e-7];
        assert_eq!(from_blob(&to_blob(&v))?, v);
        assert!(from_blob(&[0u8; 5]).is_err());
        Ok(())
    }
}
