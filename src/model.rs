use serde::{Deserialize, Serialize};

use crate::error::FaceIdError;
use crate::math::DIMENSIONS;

/// One face instance found in one photo, with its embedding vector.
///
/// Detections are created by the upstream detection pipeline with
/// `cluster_id = None`; the cluster analyzer is the only writer that sets
/// or clears `cluster_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: i64,

    /// Owning user. Clustering never crosses users.
    pub user_id: String,

    /// Source photo this face was found in.
    pub file_id: i64,

    /// 128-dimensional face embedding.
    pub vector: Vec<f32>,

    /// Normalized bounding-box height, used as a quality filter.
    pub height: f32,

    /// Normalized bounding-box width, used as a quality filter.
    pub width: f32,

    /// Owning cluster, if assigned. Membership lives only here; clusters
    /// never hold a member list of their own.
    pub cluster_id: Option<i64>,

    /// Maximum admissible distance from this detection to a cluster
    /// centroid. `0.0` means no gate.
    pub threshold: f32,
}

/// A persisted group of detections believed to be the same identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i64,
    pub user_id: String,

    /// Human-editable name, empty at creation.
    pub title: String,
}

impl Cluster {
    /// A new unsaved cluster for the given user. The store assigns the id
    /// on insert.
    pub fn new(user_id: &str) -> Self {
        Self {
            id: 0,
            user_id: user_id.to_string(),
            title: String::new(),
        }
    }
}

/// Encodes a detection vector to its persisted representation
/// (a JSON array of numbers, as stored in a DB text column).
pub fn encode_vector(v: &[f32]) -> Result<String, FaceIdError> {
    if v.len() != DIMENSIONS {
        return Err(FaceIdError::DimensionMismatch {
            got: v.len(),
            want: DIMENSIONS,
        });
    }
    Ok(serde_json::to_string(v)?)
}

/// Decodes a persisted vector representation, enforcing the
/// 128-component invariant.
pub fn decode_vector(s: &str) -> Result<Vec<f32>, FaceIdError> {
    let v: Vec<f32> = serde_json::from_str(s)?;
    if v.len() != DIMENSIONS {
        return Err(FaceIdError::DimensionMismatch {
            got: v.len(),
            want: DIMENSIONS,
        });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_codec_round_trip() {
        let mut v = vec![0.0f32; DIMENSIONS];
        v[0] = 0.5;
        v[127] = -0.25;

        let encoded = encode_vector(&v).unwrap();
        let decoded = decode_vector(&encoded).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn encode_rejects_wrong_dimension() {
        let v = vec![0.0f32; 64];
        let err = encode_vector(&v).unwrap_err();
        match err {
            FaceIdError::DimensionMismatch { got, want } => {
                assert_eq!(got, 64);
                assert_eq!(want, DIMENSIONS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_rejects_wrong_dimension() {
        let err = decode_vector("[1.0, 2.0]").unwrap_err();
        assert!(matches!(err, FaceIdError::DimensionMismatch { got: 2, .. }));
    }

    #[test]
    fn decode_rejects_malformed_input() {
        let err = decode_vector("not json").unwrap_err();
        assert!(matches!(err, FaceIdError::Serialization(_)));
    }

    #[test]
    fn new_cluster_has_empty_title() {
        let c = Cluster::new("alice");
        assert_eq!(c.id, 0);
        assert_eq!(c.user_id, "alice");
        assert!(c.title.is_empty());
    }
}
