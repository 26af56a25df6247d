use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::density::{ClusterParams, DensityClusterer, FlatCluster, FlatClusterer};
use crate::error::FaceIdError;
use crate::math::{centroid, euclidean, is_zero};
use crate::model::{Cluster, Detection};
use crate::store::{ClusterStore, DetectionStore, MemoryStore};

/// Tunables for a clustering run.
///
/// Defaults are the values the system was calibrated with; most callers
/// only ever touch `min_dataset_size`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum number of filtered unclustered detections required to
    /// attempt a run. Below this the run is a silent no-op.
    pub min_dataset_size: usize,

    /// Quality filter: detections whose bounding-box height or width is
    /// not strictly greater than this are discarded. Embeddings of very
    /// small faces are unreliable and pollute centroids.
    pub min_detection_size: f32,

    /// Passed through to the clustering primitive.
    pub min_cluster_separation: f32,

    /// Passed through to the clustering primitive.
    pub max_cluster_edge_length: f32,

    /// Upper bound on how many members of each existing cluster are
    /// sampled as anchors per run.
    pub sample_size_existing_clusters: usize,

    /// Overlap below which a flat cluster is considered a new identity.
    pub max_overlap_new_cluster: f32,

    /// Overlap above which a flat cluster is merged into the existing
    /// cluster it overlaps with.
    pub min_overlap_existing_cluster: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_dataset_size: 120,
            min_detection_size: 0.03,
            min_cluster_separation: 0.0,
            max_cluster_edge_length: 0.5,
            sample_size_existing_clusters: 80,
            max_overlap_new_cluster: 0.1,
            min_overlap_existing_cluster: 0.5,
        }
    }
}

/// One position in the assembled dataset. Fresh slots are eligible for
/// (re)assignment; anchor slots carry known cluster identity and exist
/// only to vote.
struct DatasetSlot {
    detection: Detection,
    is_anchor: bool,
}

/// An anchor's claim about which persisted cluster it belongs to.
/// `Unassigned` (a sampled detection with no cluster reference) should not
/// normally occur and is handled defensively.
enum Vote {
    Known(i64),
    Unassigned,
}

/// Incrementally groups face detections into persistent identity clusters.
///
/// One call to [`calculate_clusters`](Self::calculate_clusters) is one
/// batch reconciliation run for one user: fresh detections are clustered
/// together with anchors sampled from existing clusters, each resulting
/// flat cluster is merged into an existing cluster, created as a new one,
/// or discarded based on anchor overlap, and duplicate same-file
/// assignments are pruned afterwards.
///
/// Runs are synchronous and single-threaded. Callers must serialize runs
/// per user; the analyzer provides no mutual exclusion of its own.
pub struct FaceClusterAnalyzer {
    detections: Arc<dyn DetectionStore>,
    clusters: Arc<dyn ClusterStore>,
    clusterer: Box<dyn FlatClusterer>,
    cfg: Config,
}

impl FaceClusterAnalyzer {
    pub fn new(
        detections: Arc<dyn DetectionStore>,
        clusters: Arc<dyn ClusterStore>,
        clusterer: Box<dyn FlatClusterer>,
        cfg: Config,
    ) -> Self {
        Self {
            detections,
            clusters,
            clusterer,
            cfg,
        }
    }

    /// Creates an analyzer backed by a fresh [`MemoryStore`] and the
    /// bundled [`DensityClusterer`]. Returns the store handle so the
    /// caller can seed and inspect it.
    pub fn with_memory_store(cfg: Config) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let analyzer = Self::new(
            store.clone(),
            store.clone(),
            Box::new(DensityClusterer),
            cfg,
        );
        (analyzer, store)
    }

    /// Adjusts the minimum dataset size at runtime.
    pub fn set_min_dataset_size(&mut self, min_size: usize) {
        self.cfg.min_dataset_size = min_size;
    }

    /// Runs one clustering pass for the user and returns the number of
    /// fresh detections assigned to a cluster.
    ///
    /// `batch_size` caps how many unclustered detections are fetched;
    /// `0` means unbounded.
    ///
    /// Storage and serialization failures abort the run immediately.
    /// Assignments written before a failure remain persisted — each one
    /// is written as it is decided — so a failed run can safely be
    /// re-invoked: re-clustering is idempotent for already-correctly
    /// clustered detections and the pruner self-heals duplicate states.
    pub fn calculate_clusters(
        &self,
        user_id: &str,
        batch_size: usize,
    ) -> Result<usize, FaceIdError> {
        debug!(user_id, "retrieving unclustered face detections");

        let unclustered = self
            .detections
            .find_unclustered_by_user_id(user_id, batch_size)?;

        let fresh: Vec<Detection> = unclustered
            .into_iter()
            .filter(|d| {
                d.height > self.cfg.min_detection_size && d.width > self.cfg.min_detection_size
            })
            .collect();

        if fresh.len() < self.cfg.min_dataset_size {
            debug!(
                found = fresh.len(),
                needed = self.cfg.min_dataset_size,
                "not enough face detections found"
            );
            return Ok(0);
        }
        debug!(count = fresh.len(), "found unclustered detections, calculating clusters");

        let mut slots: Vec<DatasetSlot> = fresh
            .into_iter()
            .map(|d| DatasetSlot {
                detection: d,
                is_anchor: false,
            })
            .collect();

        let existing = self.clusters.find_by_user_id(user_id)?;
        let mut max_votes_by_cluster: HashMap<i64, usize> = HashMap::new();
        for cluster in &existing {
            let sampled = self
                .detections
                .find_cluster_sample(cluster.id, self.cfg.sample_size_existing_clusters)?;
            max_votes_by_cluster.insert(cluster.id, sampled.len());
            slots.extend(sampled.into_iter().map(|d| DatasetSlot {
                detection: d,
                is_anchor: true,
            }));
        }

        let n = slots.len();
        let params = ClusterParams {
            min_cluster_size: derived_min_cluster_size(n),
            min_sample_size: derived_min_sample_size(n),
            min_cluster_separation: self.cfg.min_cluster_separation,
            max_cluster_edge_length: self.cfg.max_cluster_edge_length,
        };

        let vectors: Vec<&[f32]> = slots
            .iter()
            .map(|s| s.detection.vector.as_slice())
            .collect();
        let flat_clusters = self.clusterer.cluster(&vectors, &params);

        let mut assigned = 0;
        for flat in &flat_clusters {
            assigned += self.resolve_flat_cluster(user_id, flat, &slots, &max_votes_by_cluster)?;
        }

        debug!(assigned, "clustering complete");
        self.prune_clusters(user_id)?;
        Ok(assigned)
    }

    /// Merges one flat cluster into the persisted state and returns the
    /// number of fresh detections it assigned.
    fn resolve_flat_cluster(
        &self,
        user_id: &str,
        flat: &FlatCluster,
        slots: &[DatasetSlot],
        max_votes_by_cluster: &HashMap<i64, usize>,
    ) -> Result<usize, FaceIdError> {
        let members: Vec<&DatasetSlot> =
            flat.members.iter().filter_map(|&i| slots.get(i)).collect();

        let member_vectors: Vec<&[f32]> = members
            .iter()
            .map(|s| s.detection.vector.as_slice())
            .collect();
        let center = centroid(&member_vectors);

        let votes: Vec<Vote> = members
            .iter()
            .filter(|s| s.is_anchor)
            .map(|s| match s.detection.cluster_id {
                Some(id) => Vote::Known(id),
                None => Vote::Unassigned,
            })
            .collect();

        let (overlap, winning) = tally_overlap(&votes, max_votes_by_cluster);

        let cluster = if overlap > self.cfg.min_overlap_existing_cluster {
            // A positive overlap implies a winning cluster exists.
            let Some(winning_id) = winning else {
                return Ok(0);
            };
            self.clusters.find(winning_id)?
        } else if overlap < self.cfg.max_overlap_new_cluster {
            self.clusters.insert(Cluster::new(user_id))?
        } else {
            // Ambiguous overlap usually means the flat cluster spans parts
            // of two or more existing identities. Defer to a future run
            // rather than corrupt an established cluster.
            debug!(overlap, "ambiguous overlap, discarding flat cluster");
            return Ok(0);
        };

        let mut assigned = 0;
        for slot in members.iter().filter(|s| !s.is_anchor) {
            if slot.detection.threshold > 0.0 && !is_zero(&center) {
                // A per-detection override: too far from the emerging
                // identity despite density-clustering agreement.
                let distance = euclidean(&center, &slot.detection.vector);
                if distance >= slot.detection.threshold {
                    continue;
                }
            }
            self.detections.assoc_with_cluster(&slot.detection, &cluster)?;
            assigned += 1;
        }
        Ok(assigned)
    }

    /// Ensures no cluster of the user holds more than one detection from
    /// the same file, keeping the one closest to the cluster centroid and
    /// returning the rest to the unclustered pool.
    ///
    /// Sweeps all of the user's clusters, not just ones touched by the
    /// last run. Idempotent.
    pub fn prune_clusters(&self, user_id: &str) -> Result<(), FaceIdError> {
        let clusters = self.clusters.find_by_user_id(user_id)?;
        if clusters.is_empty() {
            debug!(user_id, "no face clusters found");
            return Ok(());
        }

        for cluster in &clusters {
            let members = self.detections.find_by_cluster_id(cluster.id)?;

            let duplicates = files_with_duplicate_faces(&members);
            if duplicates.is_empty() {
                continue;
            }

            let member_vectors: Vec<&[f32]> =
                members.iter().map(|d| d.vector.as_slice()).collect();
            let center = centroid(&member_vectors);

            for file_detections in duplicates.values() {
                let mut by_distance: Vec<(f32, &Detection)> = file_detections
                    .iter()
                    .map(|d| (euclidean(&center, &d.vector), *d))
                    .collect();
                by_distance.sort_by(|a, b| {
                    a.0.partial_cmp(&b.0)
                        .unwrap_or(Ordering::Equal)
                        .then(a.1.id.cmp(&b.1.id))
                });

                for (_, detection) in &by_distance[1..] {
                    let mut cleared = (*detection).clone();
                    cleared.cluster_id = None;
                    self.detections.update(&cleared)?;
                }
            }
        }
        Ok(())
    }
}

/// Tallies anchor votes and returns the overlap of the strongest-voted
/// existing cluster: winning votes divided by the number of anchors
/// sampled from that cluster. Ties go to the lowest cluster id. No known
/// votes means overlap 0.0.
fn tally_overlap(votes: &[Vote], max_votes_by_cluster: &HashMap<i64, usize>) -> (f32, Option<i64>) {
    let mut tally: BTreeMap<i64, usize> = BTreeMap::new();
    for vote in votes {
        if let Vote::Known(id) = vote {
            *tally.entry(*id).or_insert(0) += 1;
        }
    }

    let mut winning: Option<(i64, usize)> = None;
    for (&id, &count) in &tally {
        if winning.is_none_or(|(_, best)| count > best) {
            winning = Some((id, count));
        }
    }

    match winning {
        Some((id, count)) => match max_votes_by_cluster.get(&id) {
            Some(&max) if max > 0 => (count as f32 / max as f32, Some(id)),
            _ => (0.0, Some(id)),
        },
        None => (0.0, None),
    }
}

/// Groups detections by source file, keeping only files contributing more
/// than one detection.
fn files_with_duplicate_faces(detections: &[Detection]) -> BTreeMap<i64, Vec<&Detection>> {
    let mut files: BTreeMap<i64, Vec<&Detection>> = BTreeMap::new();
    for detection in detections {
        files.entry(detection.file_id).or_default().push(detection);
    }
    files.retain(|_, group| group.len() > 1);
    files
}

/// Fourth root of the dataset size, clamped to [2, 8]. Grows slowly so
/// clusters stay resistant to noise on large datasets while remaining
/// permissive on small ones.
fn derived_min_cluster_size(n: usize) -> usize {
    (n as f64).powf(0.25).clamp(2.0, 8.0).round() as usize
}

/// Fourth root of the dataset size, clamped to [2, 3].
fn derived_min_sample_size(n: usize) -> usize {
    (n as f64).powf(0.25).clamp(2.0, 3.0).round() as usize
}
