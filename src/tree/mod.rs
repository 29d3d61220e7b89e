/// Federation Tree
///
/// Logical node/tree operations (add root, add child, search, visit) over a
/// pluggable versioned graph storage backend. Nodes carry only a key; data
/// lives in the storage, indexed by key and version.

pub mod memory;
pub mod storage;

pub use memory::InMemoryGraphStorage;
pub use storage::GraphStorage;

use crate::error::{FederationError, FederationResult};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Tree generation identifier
pub type Version = u64;

/// Separator between issuer and subject in a node key
pub const KEY_SEPARATOR: char = '!';

/// `(issuer, subject)` identity of a statement node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    issuer: String,
    subject: String,
}

impl NodeKey {
    pub fn new(issuer: &str, subject: &str) -> FederationResult<Self> {
        if issuer.contains(KEY_SEPARATOR) || subject.contains(KEY_SEPARATOR) {
            return Err(FederationError::InvalidRequest(format!(
                "Node key parts may not contain '{}': {} / {}",
                KEY_SEPARATOR, issuer, subject
            )));
        }

        Ok(Self {
            issuer: issuer.to_string(),
            subject: subject.to_string(),
        })
    }

    /// Parse the `{issuer}!{subject}` wire form, splitting on the first `!`
    pub fn parse(key: &str) -> FederationResult<Self> {
        let (issuer, subject) = key.split_once(KEY_SEPARATOR).ok_or_else(|| {
            FederationError::InvalidRequest(format!("Malformed node key: {}", key))
        })?;
        Self::new(issuer, subject)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn node(&self) -> Node {
        Node::new(self.to_string())
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.issuer, KEY_SEPARATOR, self.subject)
    }
}

impl FromStr for NodeKey {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A tree node, identified solely by its key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    key: String,
}

impl Node {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Case-insensitive key comparison
    pub fn matches(&self, key: &str) -> bool {
        self.key.to_lowercase() == key.to_lowercase()
    }
}

/// Storage handle pinned to one version
pub struct Snapshot<T> {
    storage: Arc<dyn GraphStorage<T>>,
    version: Version,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            version: self.version,
        }
    }
}

impl<T> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .finish()
    }
}

impl<T> Snapshot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(storage: Arc<dyn GraphStorage<T>>, version: Version) -> Self {
        Self { storage, version }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub async fn root(&self) -> Option<Node> {
        self.storage.root(self.version).await
    }

    pub async fn children(&self, node: &Node) -> Vec<Node> {
        self.storage.children(node.key(), self.version).await
    }

    pub async fn data(&self, node: &Node) -> Option<T> {
        self.storage.data(node.key(), self.version).await
    }

    async fn append(&self, child: &Node, parent: &Node) {
        self.storage
            .append(child.key(), parent.key(), self.version)
            .await
    }

    async fn set_data(&self, node: &Node, data: T) {
        self.storage.set_data(node.key(), data, self.version).await
    }
}

/// Traversal context threaded through search and visit
pub struct NodeSearchContext<T> {
    pub level: usize,
    pub include_parent: bool,
    pub snapshot: Snapshot<T>,
}

impl<T> NodeSearchContext<T> {
    /// Context for the next depth level
    pub fn next(&self) -> Self {
        Self {
            level: self.level + 1,
            include_parent: self.include_parent,
            snapshot: self.snapshot.clone(),
        }
    }
}

/// Search request: predicate over node data and context
pub struct SearchRequest<T, P> {
    pub predicate: P,
    pub include_parent: bool,
    pub snapshot: Snapshot<T>,
}

/// A matched node and the depth it was found at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchResult {
    pub node: Node,
    pub level: usize,
}

/// Visit request: the visitor sees `(parent, child)` edges below nodes
/// whose predicate holds
pub struct VisitRequest<T, P, V> {
    pub predicate: P,
    pub visitor: V,
    pub snapshot: Snapshot<T>,
}

/// Tree facade over a graph storage backend
pub struct Tree<T> {
    storage: Arc<dyn GraphStorage<T>>,
}

impl<T> Clone for Tree<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<T> Tree<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(storage: Arc<dyn GraphStorage<T>>) -> Self {
        Self { storage }
    }

    /// Start a new, unpublished version rooted at `node`
    pub async fn add_root(&self, node: Node, data: T) -> Snapshot<T> {
        let version = self.storage.create_new_snapshot(node, data).await;
        Snapshot::new(Arc::clone(&self.storage), version)
    }

    /// Attach `node` under the first node whose key matches
    /// `parent_entity_id` (case-insensitive, depth-first from the root)
    pub async fn add_child(
        &self,
        node: Node,
        parent_entity_id: &str,
        data: T,
        snapshot: &Snapshot<T>,
    ) -> FederationResult<()> {
        let root = snapshot.root().await.ok_or_else(|| {
            FederationError::Tree(format!("Version {} has no root", snapshot.version()))
        })?;

        let parent = Self::find_node(snapshot, root, parent_entity_id)
            .await
            .ok_or_else(|| {
                FederationError::Tree(format!(
                    "Parent {} not found in version {}",
                    parent_entity_id,
                    snapshot.version()
                ))
            })?;

        snapshot.append(&node, &parent).await;
        snapshot.set_data(&node, data).await;

        Ok(())
    }

    /// Snapshot pinned to the currently published version
    pub async fn current_snapshot(&self) -> Snapshot<T> {
        let version = self.storage.current_version().await;
        Snapshot::new(Arc::clone(&self.storage), version)
    }

    /// Publish the next version
    pub async fn publish(&self) -> Version {
        self.storage.use_next_version().await
    }

    /// Publish the version `snapshot` is pinned to, unless a newer one is
    /// already published
    pub async fn publish_snapshot(&self, snapshot: &Snapshot<T>) -> Version {
        self.storage.publish(snapshot.version()).await
    }

    /// Depth-first search; with `include_parent`, every ancestor of a match
    /// is part of the result as well
    pub async fn search<P>(&self, request: SearchRequest<T, P>) -> HashSet<SearchResult>
    where
        P: Fn(&T, &NodeSearchContext<T>) -> bool + Send + Sync,
    {
        let mut results = HashSet::new();

        if let Some(root) = request.snapshot.root().await {
            let context = NodeSearchContext {
                level: 0,
                include_parent: request.include_parent,
                snapshot: request.snapshot,
            };
            Self::search_node(root, context, &request.predicate, &mut results).await;
        }

        results
    }

    /// Depth-first walk that skips subtrees whose root fails the predicate
    pub async fn visit<P, V>(&self, request: VisitRequest<T, P, V>)
    where
        P: Fn(&T, &NodeSearchContext<T>) -> bool + Send + Sync,
        V: FnMut(&Node, &Node) + Send,
    {
        let Some(root) = request.snapshot.root().await else {
            return;
        };

        let context = NodeSearchContext {
            level: 0,
            include_parent: false,
            snapshot: request.snapshot,
        };
        let mut visitor = request.visitor;
        Self::visit_node(root, context, &request.predicate, &mut visitor).await;
    }

    fn find_node<'a>(
        snapshot: &'a Snapshot<T>,
        node: Node,
        key: &'a str,
    ) -> BoxFuture<'a, Option<Node>> {
        async move {
            if node.matches(key) {
                return Some(node);
            }

            for child in snapshot.children(&node).await {
                if let Some(found) = Self::find_node(snapshot, child, key).await {
                    return Some(found);
                }
            }

            None
        }
        .boxed()
    }

    /// Returns whether this node or any descendant matched
    fn search_node<'a, P>(
        node: Node,
        context: NodeSearchContext<T>,
        predicate: &'a P,
        results: &'a mut HashSet<SearchResult>,
    ) -> BoxFuture<'a, bool>
    where
        P: Fn(&T, &NodeSearchContext<T>) -> bool + Send + Sync,
    {
        async move {
            let matched = match context.snapshot.data(&node).await {
                Some(data) => predicate(&data, &context),
                None => false,
            };

            if matched {
                results.insert(SearchResult {
                    node: node.clone(),
                    level: context.level,
                });
            }

            let mut descendant_matched = false;
            for child in context.snapshot.children(&node).await {
                if Self::search_node(child, context.next(), predicate, &mut *results).await {
                    descendant_matched = true;
                }
            }

            if descendant_matched && context.include_parent {
                results.insert(SearchResult {
                    node,
                    level: context.level,
                });
            }

            matched || descendant_matched
        }
        .boxed()
    }

    fn visit_node<'a, P, V>(
        node: Node,
        context: NodeSearchContext<T>,
        predicate: &'a P,
        visitor: &'a mut V,
    ) -> BoxFuture<'a, ()>
    where
        P: Fn(&T, &NodeSearchContext<T>) -> bool + Send + Sync,
        V: FnMut(&Node, &Node) + Send,
    {
        async move {
            let holds = match context.snapshot.data(&node).await {
                Some(data) => predicate(&data, &context),
                None => false,
            };
            if !holds {
                return;
            }

            for child in context.snapshot.children(&node).await {
                visitor(&node, &child);
                Self::visit_node(child, context.next(), predicate, &mut *visitor).await;
            }
        }
        .boxed()
    }
}
