/// Graph storage backend trait
use crate::tree::{Node, Version};
use async_trait::async_trait;

/// Versioned adjacency + data store behind the tree facade
///
/// Every operation is scoped to a version. Reads of unknown keys or versions
/// return empty results rather than errors.
#[async_trait]
pub trait GraphStorage<T>: Send + Sync {
    /// Children recorded under a parent at a version (empty if none)
    async fn children(&self, parent_key: &str, version: Version) -> Vec<Node>;

    /// Append one child reference to a parent
    ///
    /// Must be atomic against concurrent appends to the same parent.
    async fn append(&self, child_key: &str, parent_key: &str, version: Version);

    async fn set_data(&self, key: &str, value: T, version: Version);

    async fn data(&self, key: &str, version: Version) -> Option<T>;

    /// Root node of a version, absent if the version does not exist
    async fn root(&self, version: Version) -> Option<Node>;

    /// Currently published version
    async fn current_version(&self) -> Version;

    /// Publish the version following the current one and return the
    /// published version
    async fn use_next_version(&self) -> Version;

    /// Publish `version` if it was allocated and is newer than the current
    /// one; returns the published version either way
    async fn publish(&self, version: Version) -> Version;

    /// Allocate a new unpublished version holding only the root entry
    async fn create_new_snapshot(&self, root: Node, data: T) -> Version;
}
