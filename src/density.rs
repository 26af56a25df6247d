use std::collections::VecDeque;

use crate::math::euclidean;

/// Run parameters handed to the clustering primitive.
///
/// `min_cluster_size` and `min_sample_size` are derived per run from the
/// dataset size (see [`crate::FaceClusterAnalyzer`]); the other two come
/// from [`crate::Config`].
#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    /// Smallest number of members a returned cluster may have.
    pub min_cluster_size: usize,

    /// Minimum neighborhood population for a point to seed or extend
    /// a dense region.
    pub min_sample_size: usize,

    /// Minimum separation between clusters when cutting a hierarchy.
    /// Flat (single-level) clusterers may ignore it.
    pub min_cluster_separation: f32,

    /// Maximum edge length within a cluster; points farther apart than
    /// this are never directly connected.
    pub max_cluster_edge_length: f32,
}

/// An ephemeral cluster produced by one clustering run: member indices into
/// the dataset passed to [`FlatClusterer::cluster`]. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatCluster {
    /// Dataset indices, ascending. Disjoint from every other FlatCluster
    /// of the same run.
    pub members: Vec<usize>,
}

/// Density-based clustering primitive.
///
/// Given the run's assembled vectors, returns a partition into flat
/// clusters. Indices absent from every cluster are noise and are ignored
/// downstream.
///
/// Implementations must be deterministic: identical input order and
/// parameters must yield identical output, because identity resolution
/// depends on reproducible indices for overlap voting.
pub trait FlatClusterer: Send + Sync {
    fn cluster(&self, vectors: &[&[f32]], params: &ClusterParams) -> Vec<FlatCluster>;
}

/// Bundled [`FlatClusterer`]: deterministic euclidean density expansion.
///
/// Neighborhood radius is `max_cluster_edge_length`; a point whose
/// neighborhood holds at least `min_sample_size` points (itself included)
/// is a core point and its region is grown breadth-first. Regions smaller
/// than `min_cluster_size` are dropped as noise. `min_cluster_separation`
/// is accepted for contract compatibility but has no effect on a
/// single-level cut.
///
/// Callers with a full hierarchy-cutting implementation (HDBSCAN) can plug
/// their own [`FlatClusterer`] into the analyzer instead.
pub struct DensityClusterer;

impl FlatClusterer for DensityClusterer {
    fn cluster(&self, vectors: &[&[f32]], params: &ClusterParams) -> Vec<FlatCluster> {
        let n = vectors.len();
        if n == 0 {
            return Vec::new();
        }

        const UNDEFINED: i64 = 0;
        const NOISE: i64 = -1;

        let mut labels = vec![UNDEFINED; n];
        let mut cluster_id: i64 = 0;

        for i in 0..n {
            if labels[i] != UNDEFINED {
                continue;
            }

            let neighbors = range_query(vectors, i, params.max_cluster_edge_length);
            if neighbors.len() < params.min_sample_size {
                labels[i] = NOISE;
                continue;
            }

            cluster_id += 1;
            labels[i] = cluster_id;

            let mut seed: VecDeque<usize> =
                neighbors.into_iter().filter(|&j| j != i).collect();

            while let Some(q) = seed.pop_front() {
                if labels[q] == NOISE {
                    labels[q] = cluster_id;
                }
                if labels[q] != UNDEFINED {
                    continue;
                }
                labels[q] = cluster_id;

                let q_neighbors =
                    range_query(vectors, q, params.max_cluster_edge_length);
                if q_neighbors.len() >= params.min_sample_size {
                    seed.extend(q_neighbors);
                }
            }
        }

        // Gather labeled points into clusters, smallest label first.
        let mut clusters: Vec<FlatCluster> = (1..=cluster_id)
            .map(|c| FlatCluster {
                members: labels
                    .iter()
                    .enumerate()
                    .filter(|&(_, &l)| l == c)
                    .map(|(i, _)| i)
                    .collect(),
            })
            .collect();

        clusters.retain(|c| c.members.len() >= params.min_cluster_size);
        clusters
    }
}

/// Indices of all vectors within eps euclidean distance of vectors[idx],
/// the query point included.
fn range_query(vectors: &[&[f32]], idx: usize, eps: f32) -> Vec<usize> {
    let q = vectors[idx];
    vectors
        .iter()
        .enumerate()
        .filter(|(_, v)| euclidean(q, v) <= eps)
        .map(|(i, _)| i)
        .collect()
}
