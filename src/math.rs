/// Number of components in a face embedding vector.
pub const DIMENSIONS: usize = 128;

/// Euclidean (L2) distance between two vectors.
/// Uses f64 intermediate precision; no normalization is applied, so the
/// scale is tied directly to the embedding model's output space.
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    let mut sum: f64 = 0.0;
    for i in 0..a.len().min(b.len()) {
        let d = a[i] as f64 - b[i] as f64;
        sum += d * d;
    }
    sum.sqrt() as f32
}

/// Coordinate-wise arithmetic mean of a set of vectors.
///
/// The centroid of an empty set is the [`DIMENSIONS`]-length zero vector, a
/// sentinel that never represents a valid identity.
pub fn centroid(vectors: &[&[f32]]) -> Vec<f32> {
    let mut sum = vec![0.0f64; DIMENSIONS];
    if vectors.is_empty() {
        return vec![0.0; DIMENSIONS];
    }

    for v in vectors {
        for (d, val) in sum.iter_mut().enumerate() {
            if d < v.len() {
                *val += v[d] as f64;
            }
        }
    }

    let n = vectors.len() as f64;
    sum.into_iter().map(|x| (x / n) as f32).collect()
}

/// Returns true if every component of the vector is exactly zero,
/// i.e. the vector is the empty-centroid sentinel.
pub fn is_zero(v: &[f32]) -> bool {
    v.iter().all(|&x| x == 0.0)
}
