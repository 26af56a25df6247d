//! Incremental face identity clustering.
//!
//! Groups 128-dimensional face-embedding vectors into persistent identity
//! clusters across repeated batch runs. Each run clusters the user's fresh
//! (unclustered) detections together with anchors sampled from existing
//! clusters, then reconciles the result against the persisted state by
//! overlap voting: a flat cluster that re-captures most of an existing
//! cluster's anchors is merged into it, one with almost no anchor overlap
//! becomes a new cluster, and anything in between is discarded until a
//! future run can resolve it.
//!
//! # Usage
//!
//! ```
//! use faceid::{Config, FaceClusterAnalyzer};
//!
//! let (analyzer, _store) = FaceClusterAnalyzer::with_memory_store(Config::default());
//!
//! // Nothing stored yet: below the minimum dataset size, the run is a
//! // silent no-op rather than an error.
//! let assigned = analyzer.calculate_clusters("alice", 0).unwrap();
//! assert_eq!(assigned, 0);
//! ```
//!
//! Production callers implement [`DetectionStore`] and [`ClusterStore`]
//! over their database and may replace the bundled [`DensityClusterer`]
//! with a full hierarchy-cutting implementation via [`FlatClusterer`].
//!
//! # Design
//!
//! Naive re-clustering on every run would scramble cluster identities
//! across runs. Anchors solve this: sampled members of existing clusters
//! ride along in the dataset purely to vote, and are never reassigned.
//! The design trades global optimality for incremental stability.

mod density;
mod error;
mod faceid;
mod math;
mod model;
mod store;

pub use density::{ClusterParams, DensityClusterer, FlatCluster, FlatClusterer};
pub use error::FaceIdError;
pub use faceid::{Config, FaceClusterAnalyzer};
pub use math::{DIMENSIONS, centroid, euclidean};
pub use model::{Cluster, Detection, decode_vector, encode_vector};
pub use store::{ClusterStore, DetectionStore, MemoryStore};
