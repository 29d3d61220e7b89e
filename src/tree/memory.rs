/// In-memory versioned snapshot cache
///
/// Each version (generation) owns its own adjacency and data maps. Readers
/// pinned to an older version are unaffected by a crawl populating a newer
/// one; `publish` is the only point where the published version moves, and
/// it only ever moves forward.
use crate::tree::{storage::GraphStorage, Node, Version};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default number of published generations kept in memory
pub const DEFAULT_RETAINED_VERSIONS: usize = 3;

struct Generation<T> {
    root: Node,
    children: HashMap<String, Vec<Node>>,
    data: HashMap<String, T>,
}

/// Generation-tagged in-memory graph store
pub struct InMemoryGraphStorage<T> {
    generations: RwLock<BTreeMap<Version, Generation<T>>>,
    /// Published version, 0 until the first publish
    current: AtomicU64,
    /// Highest allocated version
    allocated: AtomicU64,
    retained_versions: usize,
}

impl<T> InMemoryGraphStorage<T> {
    /// Create a store keeping the newest `retained_versions` published
    /// generations (at least one)
    pub fn new(retained_versions: usize) -> Self {
        Self {
            generations: RwLock::new(BTreeMap::new()),
            current: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            retained_versions: retained_versions.max(1),
        }
    }

    /// Versions currently held in memory, ascending
    pub async fn versions(&self) -> Vec<Version> {
        self.generations.read().await.keys().copied().collect()
    }
}

impl<T> Default for InMemoryGraphStorage<T> {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_VERSIONS)
    }
}

#[async_trait]
impl<T> GraphStorage<T> for InMemoryGraphStorage<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn children(&self, parent_key: &str, version: Version) -> Vec<Node> {
        let generations = self.generations.read().await;
        generations
            .get(&version)
            .and_then(|g| g.children.get(parent_key))
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, child_key: &str, parent_key: &str, version: Version) {
        // The write guard makes the read-modify-write of the child list atomic
        let mut generations = self.generations.write().await;
        match generations.get_mut(&version) {
            Some(generation) => generation
                .children
                .entry(parent_key.to_string())
                .or_default()
                .push(Node::new(child_key)),
            None => warn!(
                "Dropping append of {} under {}: version {} does not exist",
                child_key, parent_key, version
            ),
        }
    }

    async fn set_data(&self, key: &str, value: T, version: Version) {
        let mut generations = self.generations.write().await;
        match generations.get_mut(&version) {
            Some(generation) => {
                generation.data.insert(key.to_string(), value);
            }
            None => warn!(
                "Dropping data for {}: version {} does not exist",
                key, version
            ),
        }
    }

    async fn data(&self, key: &str, version: Version) -> Option<T> {
        let generations = self.generations.read().await;
        generations.get(&version)?.data.get(key).cloned()
    }

    async fn root(&self, version: Version) -> Option<Node> {
        let generations = self.generations.read().await;
        generations.get(&version).map(|g| g.root.clone())
    }

    async fn current_version(&self) -> Version {
        self.current.load(Ordering::SeqCst)
    }

    async fn use_next_version(&self) -> Version {
        let next = self.current.load(Ordering::SeqCst) + 1;
        self.publish(next).await
    }

    async fn publish(&self, version: Version) -> Version {
        let mut generations = self.generations.write().await;
        let current = self.current.load(Ordering::SeqCst);

        if version <= current {
            warn!(
                "Not publishing version {}: version {} is already published",
                version, current
            );
            return current;
        }
        if !generations.contains_key(&version) {
            warn!(
                "Cannot publish version {}: it was never allocated, staying on {}",
                version, current
            );
            return current;
        }

        self.current.store(version, Ordering::SeqCst);

        // Unpublished generations newer than `version` always survive; older
        // ones can no longer be published
        let oldest_kept = version.saturating_sub(self.retained_versions as Version - 1);
        let before = generations.len();
        generations.retain(|v, _| *v >= oldest_kept);
        let collected = before - generations.len();

        if collected > 0 {
            debug!("Collected {} old tree generation(s)", collected);
        }
        info!("Published tree version {}", version);

        version
    }

    async fn create_new_snapshot(&self, root: Node, data: T) -> Version {
        let version = self.allocated.fetch_add(1, Ordering::SeqCst) + 1;

        let mut generation = Generation {
            root: root.clone(),
            children: HashMap::new(),
            data: HashMap::new(),
        };
        generation.data.insert(root.key().to_string(), data);

        self.generations.write().await.insert(version, generation);
        debug!("Allocated tree version {} rooted at {}", version, root.key());

        version
    }
}
