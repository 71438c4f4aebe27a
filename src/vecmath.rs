//! Shared vector math for the three embedding-keyed components (Semantic
//! Cache, Intent Router, Tool Retriever): L2-normalization and dot product.
//! Every embedding stored by those components is normalized on arrival, so
//! dot product alone is cosine similarity and the hot-path search loops
//! never pay for the division.

/// L2-normalize `vec` in place. A zero vector is left as-is (rather than
/// dividing by zero) since the embedding service is not expected to ever
/// emit one; guarding here keeps callers infallible.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of two equal-length vectors. Equals cosine similarity when
/// both inputs are L2-normalized.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity between two arbitrary (not necessarily normalized)
/// vectors. Used on cold paths (e.g. test fixtures) where the caller hasn't
/// already normalized; the hot paths in router/cache code normalize once
/// and call [`dot`] directly.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_dot_on_normalized_equals_cosine() {
        let mut a = vec![3.0, 4.0];
        let mut b = vec![4.0, 3.0];
        l2_normalize(&mut a);
        l2_normalize(&mut b);
        let via_dot = dot(&a, &b);
        let via_cosine = cosine_similarity(&a, &b);
        assert!((via_dot - via_cosine).abs() < 1e-6);
        assert!((via_dot - 0.96).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_empty_is_zero() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
    }
}
