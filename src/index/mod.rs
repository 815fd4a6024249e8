
pub mod distance;
pub mod kmeans;

pub use distance::DistanceMetric;
pub use kmeans::{KMeansModel, KMeansParams};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::{ChunkId, Result, SemsearchError};

/// Tuning knobs for the inverted-file index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of k-means clusters (`L`) trained on rebuild
    pub cluster_count: usize,
    /// Default number of clusters probed per search (`P`)
    pub probe_count: usize,
    pub metric: DistanceMetric,
    pub max_iterations: usize,
    /// Training stops once no centroid moves further than this
    pub convergence_tolerance: f32,
    /// Upper bound on vectors fed to k-means
    pub training_sample_size: usize,
    pub seed: u64,
    /// Retrain after this many inserts since the last rebuild
    pub rebuild_after_inserts: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cluster_count: 100,
            probe_count: 10,
            metric: DistanceMetric::Euclidean,
            max_iterations: 25,
            convergence_tolerance: 1e-4,
            training_sample_size: 25_600,
            seed: 42,
            rebuild_after_inserts: None,
        }
    }
}

impl IndexConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(1..=65_536).contains(&self.cluster_count) {
            return Err(ConfigError::InvalidClusterCount(self.cluster_count));
        }
        if self.probe_count == 0 || self.probe_count > self.cluster_count {
            return Err(ConfigError::InvalidProbeCount(
                self.probe_count,
                self.cluster_count,
            ));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(self.max_iterations));
        }
        if !self.convergence_tolerance.is_finite() || self.convergence_tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.convergence_tolerance));
        }
        if self.training_sample_size == 0 {
            return Err(ConfigError::InvalidTrainingSampleSize(
                self.training_sample_size,
            ));
        }
        if self.rebuild_after_inserts == Some(0) {
            return Err(ConfigError::InvalidRebuildThreshold(0));
        }
        Ok(())
    }

    #[inline]
    fn kmeans_params(&self) -> KMeansParams {
        KMeansParams {
            clusters: self.cluster_count,
            max_iterations: self.max_iterations,
            tolerance: self.convergence_tolerance,
            seed: self.seed,
            metric: self.metric,
        }
    }
}

/// A vector keyed by the chunk it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    #[inline]
    pub fn new(chunk_id: ChunkId, vector: Vec<f32>) -> Self {
        Self { chunk_id, vector }
    }
}

/// One search candidate; smaller distance is closer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub chunk_id: ChunkId,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebuildReport {
    pub entries: usize,
    pub clusters: usize,
    pub iterations: usize,
    pub converged: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub entries: usize,
    pub dimension: usize,
    pub trained: bool,
    pub clusters: usize,
    pub largest_cluster: usize,
    pub empty_clusters: usize,
    pub inserts_since_rebuild: usize,
}

/// Centroids plus their posting lists. Centroids never change once built; a
/// rebuild produces a whole new layout and swaps it in.
#[derive(Debug)]
struct Layout {
    /// Empty until the first rebuild; an untrained layout has one posting list
    centroids: Vec<Vec<f32>>,
    postings: Vec<RwLock<Vec<IndexEntry>>>,
    /// Cluster currently holding each chunk
    locations: Mutex<HashMap<ChunkId, usize>>,
}

impl Layout {
    fn untrained() -> Self {
        Self {
            centroids: Vec::new(),
            postings: vec![RwLock::new(Vec::new())],
            locations: Mutex::new(HashMap::new()),
        }
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn home_cluster(&self, vector: &[f32], metric: DistanceMetric) -> usize {
        if self.is_trained() {
            kmeans::nearest_centroid(&self.centroids, vector, metric).0
        } else {
            0
        }
    }

    /// The `probes` clusters whose centroids are closest to the query, in
    /// ascending cluster order (the lock acquisition order)
    fn probe_clusters(&self, query: &[f32], probes: usize, metric: DistanceMetric) -> Vec<usize> {
        if !self.is_trained() {
            return vec![0];
        }

        let mut ranked: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(cluster, centroid)| (metric.distance(query, centroid), cluster))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut chosen: Vec<usize> = ranked
            .into_iter()
            .take(probes.clamp(1, self.centroids.len()))
            .map(|(_, cluster)| cluster)
            .collect();
        chosen.sort_unstable();
        chosen
    }

    fn write_clusters(
        &self,
        clusters: BTreeSet<usize>,
    ) -> BTreeMap<usize, RwLockWriteGuard<'_, Vec<IndexEntry>>> {
        clusters
            .into_iter()
            .map(|cluster| (cluster, self.postings[cluster].write()))
            .collect()
    }

    fn snapshot(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self
            .postings
            .iter()
            .flat_map(|posting| posting.read().clone())
            .collect();
        entries.sort_by_key(|entry| entry.chunk_id);
        entries
    }
}

/// Approximate nearest-neighbour index over fixed-dimension vectors.
///
/// Vectors are grouped into clusters around k-means centroids; a search scans
/// only the posting lists of the `P` clusters closest to the query. Before the
/// first rebuild every vector lives in a single list and searches are exact.
///
/// Searches run concurrently with each other and with inserts and deletes that
/// touch other clusters. Writers are serialized. A rebuild trains off to the
/// side while searches keep using the current layout, then swaps the new
/// layout in atomically.
#[derive(Debug)]
pub struct VectorIndex {
    config: IndexConfig,
    dimension: usize,
    layout: RwLock<Arc<Layout>>,
    /// Shared by inserts and deletes, held exclusively by rebuilds
    writers: RwLock<()>,
    inserts_since_rebuild: AtomicUsize,
}

impl VectorIndex {
    #[inline]
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self> {
        if dimension == 0 {
            return Err(SemsearchError::InvalidConfiguration(
                "index dimension must be at least 1".to_string(),
            ));
        }
        config.validate()?;

        Ok(Self {
            config,
            dimension,
            layout: RwLock::new(Arc::new(Layout::untrained())),
            writers: RwLock::new(()),
            inserts_since_rebuild: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.current().locations.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_trained(&self) -> bool {
        self.current().is_trained()
    }

    /// Number of posting lists in the current layout
    #[inline]
    pub fn cluster_count(&self) -> usize {
        self.current().postings.len()
    }

    #[inline]
    pub fn contains(&self, chunk_id: ChunkId) -> bool {
        self.current().locations.lock().contains_key(&chunk_id)
    }

    /// All indexed chunk ids, ascending
    #[inline]
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.current().locations.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[inline]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.current()
            .postings
            .iter()
            .map(|posting| posting.read().len())
            .collect()
    }

    #[inline]
    pub fn stats(&self) -> IndexStats {
        let layout = self.current();
        let sizes: Vec<usize> = layout.postings.iter().map(|p| p.read().len()).collect();
        IndexStats {
            entries: sizes.iter().sum(),
            dimension: self.dimension,
            trained: layout.is_trained(),
            clusters: sizes.len(),
            largest_cluster: sizes.iter().copied().max().unwrap_or(0),
            empty_clusters: sizes.iter().filter(|&&size| size == 0).count(),
            inserts_since_rebuild: self.inserts_since_rebuild.load(Ordering::Relaxed),
        }
    }

    /// Whether enough inserts have accumulated to warrant retraining
    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.config
            .rebuild_after_inserts
            .is_some_and(|threshold| self.inserts_since_rebuild.load(Ordering::Relaxed) >= threshold)
    }

    /// Add entries, replacing any existing entry with the same chunk id.
    ///
    /// Every vector is checked before anything is written, so a dimension
    /// mismatch leaves the index untouched.
    #[inline]
    pub fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            self.check_dimension(&entry.vector)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        let _writer = self.writers.read();
        let layout = self.current();

        let targets: Vec<usize> = entries
            .iter()
            .map(|entry| layout.home_cluster(&entry.vector, self.config.metric))
            .collect();

        let mut locations = layout.locations.lock();
        let mut affected: BTreeSet<usize> = targets.iter().copied().collect();
        affected.extend(
            entries
                .iter()
                .filter_map(|entry| locations.get(&entry.chunk_id).copied()),
        );

        let mut postings = layout.write_clusters(affected);
        let count = entries.len();
        for (entry, target) in entries.into_iter().zip(targets) {
            if let Some(previous) = locations.insert(entry.chunk_id, target) {
                if let Some(posting) = postings.get_mut(&previous) {
                    take_entry(posting, entry.chunk_id);
                }
            }
            if let Some(posting) = postings.get_mut(&target) {
                posting.push(entry);
            }
        }
        drop(postings);
        drop(locations);

        self.inserts_since_rebuild.fetch_add(count, Ordering::Relaxed);
        debug!("Inserted {} vectors into index", count);
        Ok(())
    }

    /// Remove entries by chunk id and hand them back; unknown ids are skipped
    #[inline]
    pub fn remove(&self, chunk_ids: &[ChunkId]) -> Vec<IndexEntry> {
        if chunk_ids.is_empty() {
            return Vec::new();
        }

        let _writer = self.writers.read();
        let layout = self.current();

        let mut locations = layout.locations.lock();
        let affected: BTreeSet<usize> = chunk_ids
            .iter()
            .filter_map(|id| locations.get(id).copied())
            .collect();
        let mut postings = layout.write_clusters(affected);

        let mut removed = Vec::new();
        for id in chunk_ids {
            let Some(cluster) = locations.remove(id) else {
                continue;
            };
            if let Some(entry) = postings
                .get_mut(&cluster)
                .and_then(|posting| take_entry(posting, *id))
            {
                removed.push(entry);
            }
        }
        drop(postings);
        drop(locations);

        debug!("Removed {} vectors from index", removed.len());
        removed
    }

    /// The `k` nearest indexed vectors among the `probes` closest clusters,
    /// ordered by ascending distance with ties broken by chunk id.
    ///
    /// `probes` is clamped to `[1, cluster_count]`. When every cluster is
    /// probed the result matches an exhaustive scan.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize, probes: usize) -> Result<Vec<Neighbor>> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let layout = self.current();
        let clusters = layout.probe_clusters(query, probes, self.config.metric);
        let postings: Vec<_> = clusters
            .iter()
            .map(|&cluster| layout.postings[cluster].read())
            .collect();

        let mut candidates: Vec<Neighbor> = postings
            .iter()
            .flat_map(|posting| posting.iter())
            .map(|entry| Neighbor {
                chunk_id: entry.chunk_id,
                distance: self.config.metric.distance(query, &entry.vector),
            })
            .collect();
        drop(postings);

        candidates.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    /// Search probing the configured default number of clusters
    #[inline]
    pub fn search_default(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search(query, k, self.config.probe_count)
    }

    /// Retrain centroids over every indexed vector and reassign all entries.
    ///
    /// Inserts and deletes wait for the rebuild to finish; searches keep using
    /// the old layout until the new one is swapped in. If `cancel` fires first,
    /// the old layout stays in place and `Cancelled` is returned.
    #[inline]
    pub fn rebuild(&self, cancel: &CancellationToken) -> Result<RebuildReport> {
        let started = Instant::now();
        let _writer = self.writers.write();
        let current = self.current();
        let entries = current.snapshot();

        if entries.is_empty() {
            *self.layout.write() = Arc::new(Layout::untrained());
            self.inserts_since_rebuild.store(0, Ordering::Relaxed);
            debug!("Rebuilt empty index");
            return Ok(RebuildReport {
                entries: 0,
                clusters: 0,
                iterations: 0,
                converged: true,
                duration_ms: elapsed_ms(started),
            });
        }

        let sample = self.training_sample(&entries);
        let model = kmeans::train(&sample, &self.config.kmeans_params(), cancel)?;
        drop(sample);

        let mut postings: Vec<Vec<IndexEntry>> = vec![Vec::new(); model.len()];
        let mut locations = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.into_iter().enumerate() {
            if position % 1024 == 0 && cancel.is_cancelled() {
                warn!("Index rebuild cancelled during reassignment");
                return Err(SemsearchError::Cancelled);
            }
            let cluster =
                kmeans::nearest_centroid(&model.centroids, &entry.vector, self.config.metric).0;
            locations.insert(entry.chunk_id, cluster);
            postings[cluster].push(entry);
        }

        let report = RebuildReport {
            entries: locations.len(),
            clusters: model.len(),
            iterations: model.iterations,
            converged: model.converged,
            duration_ms: 0,
        };

        let rebuilt = Layout {
            centroids: model.centroids,
            postings: postings.into_iter().map(RwLock::new).collect(),
            locations: Mutex::new(locations),
        };
        *self.layout.write() = Arc::new(rebuilt);
        self.inserts_since_rebuild.store(0, Ordering::Relaxed);

        let report = RebuildReport {
            duration_ms: elapsed_ms(started),
            ..report
        };
        info!(
            "Rebuilt index: {} vectors in {} clusters after {} iterations ({}ms)",
            report.entries, report.clusters, report.iterations, report.duration_ms
        );
        Ok(report)
    }

    /// Check that the location map and posting lists agree with each other
    #[inline]
    pub fn verify(&self) -> Result<()> {
        let _writer = self.writers.write();
        let layout = self.current();
        let locations = layout.locations.lock();

        let mut seen = 0;
        for (cluster, posting) in layout.postings.iter().enumerate() {
            for entry in posting.read().iter() {
                seen += 1;
                if locations.get(&entry.chunk_id) != Some(&cluster) {
                    return Err(SemsearchError::IndexCorruptionDetected(format!(
                        "chunk {} found in cluster {} but recorded elsewhere",
                        entry.chunk_id, cluster
                    )));
                }
                if entry.vector.len() != self.dimension {
                    return Err(SemsearchError::IndexCorruptionDetected(format!(
                        "chunk {} has a {}-dimensional vector",
                        entry.chunk_id,
                        entry.vector.len()
                    )));
                }
            }
        }

        if seen != locations.len() {
            return Err(SemsearchError::IndexCorruptionDetected(format!(
                "{} posting entries but {} recorded locations",
                seen,
                locations.len()
            )));
        }
        Ok(())
    }

    fn current(&self) -> Arc<Layout> {
        Arc::clone(&self.layout.read())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(SemsearchError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }

    /// Deterministic training subset: entries are sorted by chunk id and, when
    /// there are too many, a seeded sample of positions is taken
    fn training_sample<'a>(&self, entries: &'a [IndexEntry]) -> Vec<&'a [f32]> {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let limit = self.config.training_sample_size;
        if entries.len() <= limit {
            return entries.iter().map(|entry| entry.vector.as_slice()).collect();
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut positions = rand::seq::index::sample(&mut rng, entries.len(), limit).into_vec();
        positions.sort_unstable();
        positions
            .into_iter()
            .map(|position| entries[position].vector.as_slice())
            .collect()
    }
}

fn take_entry(posting: &mut Vec<IndexEntry>, chunk_id: ChunkId) -> Option<IndexEntry> {
    posting
        .iter()
        .position(|entry| entry.chunk_id == chunk_id)
        .map(|position| posting.swap_remove(position))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
