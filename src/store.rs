use std::collections::BTreeMap;
use std::sync::RwLock;

use rand::seq::SliceRandom;

use crate::error::FaceIdError;
use crate::model::{Cluster, Detection};

/// Read/write access to persisted detections.
///
/// All implementations must be safe for concurrent use (Send + Sync).
/// Any method may fail with [`FaceIdError::Store`]; failures are propagated
/// to the caller unmodified and abort the clustering run.
pub trait DetectionStore: Send + Sync {
    /// All detections of the user with no cluster assigned, up to `limit`.
    /// `limit == 0` means unbounded.
    fn find_unclustered_by_user_id(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Detection>, FaceIdError>;

    /// A bounded random sample of up to `limit` members of the cluster.
    fn find_cluster_sample(
        &self,
        cluster_id: i64,
        limit: usize,
    ) -> Result<Vec<Detection>, FaceIdError>;

    /// All members of the cluster.
    fn find_by_cluster_id(&self, cluster_id: i64) -> Result<Vec<Detection>, FaceIdError>;

    /// Persists the detection's membership in the cluster.
    fn assoc_with_cluster(
        &self,
        detection: &Detection,
        cluster: &Cluster,
    ) -> Result<(), FaceIdError>;

    /// Writes the detection back, replacing the stored row.
    fn update(&self, detection: &Detection) -> Result<(), FaceIdError>;
}

/// Read/write access to persisted clusters.
pub trait ClusterStore: Send + Sync {
    /// All clusters owned by the user.
    fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Cluster>, FaceIdError>;

    /// The cluster with the given id.
    fn find(&self, cluster_id: i64) -> Result<Cluster, FaceIdError>;

    /// Persists a new cluster and returns it with its assigned id.
    fn insert(&self, cluster: Cluster) -> Result<Cluster, FaceIdError>;
}

/// In-memory [`DetectionStore`] and [`ClusterStore`] implementation.
/// Data is lost on restart. Suitable for testing or ephemeral use.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    detections: BTreeMap<i64, Detection>,
    clusters: BTreeMap<i64, Cluster>,
    next_detection_id: i64,
    next_cluster_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                detections: BTreeMap::new(),
                clusters: BTreeMap::new(),
                next_detection_id: 0,
                next_cluster_id: 0,
            }),
        }
    }

    /// Stores a detection, assigning an id if it has none (`id == 0`).
    /// Returns the stored id.
    pub fn add_detection(&self, mut detection: Detection) -> i64 {
        let mut inner = self.inner.write().unwrap();
        if detection.id == 0 {
            inner.next_detection_id += 1;
            detection.id = inner.next_detection_id;
        } else if detection.id > inner.next_detection_id {
            inner.next_detection_id = detection.id;
        }
        let id = detection.id;
        inner.detections.insert(id, detection);
        id
    }

    /// The detection with the given id, if present.
    pub fn detection(&self, id: i64) -> Option<Detection> {
        self.inner.read().unwrap().detections.get(&id).cloned()
    }

    /// Number of stored detections.
    pub fn detection_count(&self) -> usize {
        self.inner.read().unwrap().detections.len()
    }

    /// Number of stored clusters.
    pub fn cluster_count(&self) -> usize {
        self.inner.read().unwrap().clusters.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionStore for MemoryStore {
    fn find_unclustered_by_user_id(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Detection>, FaceIdError> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<Detection> = inner
            .detections
            .values()
            .filter(|d| d.user_id == user_id && d.cluster_id.is_none())
            .cloned()
            .collect();
        if limit > 0 && out.len() > limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn find_cluster_sample(
        &self,
        cluster_id: i64,
        limit: usize,
    ) -> Result<Vec<Detection>, FaceIdError> {
        let inner = self.inner.read().unwrap();
        let members: Vec<&Detection> = inner
            .detections
            .values()
            .filter(|d| d.cluster_id == Some(cluster_id))
            .collect();
        let mut rng = rand::thread_rng();
        Ok(members
            .choose_multiple(&mut rng, limit)
            .map(|d| (*d).clone())
            .collect())
    }

    fn find_by_cluster_id(&self, cluster_id: i64) -> Result<Vec<Detection>, FaceIdError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .detections
            .values()
            .filter(|d| d.cluster_id == Some(cluster_id))
            .cloned()
            .collect())
    }

    fn assoc_with_cluster(
        &self,
        detection: &Detection,
        cluster: &Cluster,
    ) -> Result<(), FaceIdError> {
        let mut inner = self.inner.write().unwrap();
        match inner.detections.get_mut(&detection.id) {
            Some(d) => {
                d.cluster_id = Some(cluster.id);
                Ok(())
            }
            None => Err(FaceIdError::Store(format!(
                "no detection with id {}",
                detection.id
            ))),
        }
    }

    fn update(&self, detection: &Detection) -> Result<(), FaceIdError> {
        let mut inner = self.inner.write().unwrap();
        if !inner.detections.contains_key(&detection.id) {
            return Err(FaceIdError::Store(format!(
                "no detection with id {}",
                detection.id
            )));
        }
        inner.detections.insert(detection.id, detection.clone());
        Ok(())
    }
}

impl ClusterStore for MemoryStore {
    fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Cluster>, FaceIdError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .clusters
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    fn find(&self, cluster_id: i64) -> Result<Cluster, FaceIdError> {
        let inner = self.inner.read().unwrap();
        inner
            .clusters
            .get(&cluster_id)
            .cloned()
            .ok_or_else(|| FaceIdError::Store(format!("no cluster with id {cluster_id}")))
    }

    fn insert(&self, mut cluster: Cluster) -> Result<Cluster, FaceIdError> {
        let mut inner = self.inner.write().unwrap();
        if cluster.id == 0 {
            inner.next_cluster_id += 1;
            cluster.id = inner.next_cluster_id;
        } else if cluster.id > inner.next_cluster_id {
            inner.next_cluster_id = cluster.id;
        }
        inner.clusters.insert(cluster.id, cluster.clone());
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::DIMENSIONS;

    fn detection(user_id: &str, file_id: i64, cluster_id: Option<i64>) -> Detection {
        Detection {
            id: 0,
            user_id: user_id.to_string(),
            file_id,
            vector: vec![0.0; DIMENSIONS],
            height: 0.1,
            width: 0.1,
            cluster_id,
            threshold: 0.0,
        }
    }

    #[test]
    fn unclustered_lookup_respects_user_and_limit() {
        let store = MemoryStore::new();
        for _ in 0..5 {
            store.add_detection(detection("alice", 1, None));
        }
        store.add_detection(detection("bob", 1, None));
        store.add_detection(detection("alice", 1, Some(9)));

        let all = store.find_unclustered_by_user_id("alice", 0).unwrap();
        assert_eq!(all.len(), 5);

        let capped = store.find_unclustered_by_user_id("alice", 3).unwrap();
        assert_eq!(capped.len(), 3);
    }

    #[test]
    fn cluster_sample_is_bounded() {
        let store = MemoryStore::new();
        for _ in 0..10 {
            store.add_detection(detection("alice", 1, Some(7)));
        }

        let sample = store.find_cluster_sample(7, 4).unwrap();
        assert_eq!(sample.len(), 4);
        assert!(sample.iter().all(|d| d.cluster_id == Some(7)));

        // Limit above the member count returns everything.
        let sample = store.find_cluster_sample(7, 80).unwrap();
        assert_eq!(sample.len(), 10);
    }

    #[test]
    fn assoc_sets_cluster_reference() {
        let store = MemoryStore::new();
        let id = store.add_detection(detection("alice", 1, None));
        let cluster = store.insert(Cluster::new("alice")).unwrap();
        assert!(cluster.id > 0);

        let d = store.detection(id).unwrap();
        store.assoc_with_cluster(&d, &cluster).unwrap();
        assert_eq!(store.detection(id).unwrap().cluster_id, Some(cluster.id));
    }

    #[test]
    fn assoc_unknown_detection_is_a_store_error() {
        let store = MemoryStore::new();
        let cluster = store.insert(Cluster::new("alice")).unwrap();
        let ghost = detection("alice", 1, None);
        let err = store.assoc_with_cluster(&ghost, &cluster).unwrap_err();
        assert!(matches!(err, FaceIdError::Store(_)));
    }

    #[test]
    fn update_replaces_row() {
        let store = MemoryStore::new();
        let id = store.add_detection(detection("alice", 1, Some(3)));

        let mut d = store.detection(id).unwrap();
        d.cluster_id = None;
        store.update(&d).unwrap();
        assert_eq!(store.detection(id).unwrap().cluster_id, None);
    }

    #[test]
    fn find_missing_cluster_is_a_store_error() {
        let store = MemoryStore::new();
        let err = store.find(42).unwrap_err();
        assert!(matches!(err, FaceIdError::Store(_)));
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.insert(Cluster::new("alice")).unwrap();
        let b = store.insert(Cluster::new("alice")).unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.cluster_count(), 2);
    }
}
