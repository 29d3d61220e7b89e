/// Federation Client
///
/// The capability the crawler uses to talk to remote federation entities:
/// entity configurations, subordinate statements, subordinate listings and
/// trust marks. The core never speaks HTTP itself.

pub mod http;

pub use http::HttpFederationClient;

use crate::error::FederationResult;
use crate::statement::{EntityStatement, FederationEntityMetadata};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Subject entity identifier parameter
pub const PARAM_SUB: &str = "sub";
/// Explicit entity configuration location
pub const PARAM_LOCATION: &str = "location";
pub const PARAM_TRUST_MARK_TYPE: &str = "trust_mark_type";

/// A request against a federation entity
#[derive(Debug, Clone, Default)]
pub struct FederationRequest {
    /// Query parameters
    pub parameters: BTreeMap<String, String>,

    /// Endpoints of the entity the request is addressed to
    pub federation_entity_metadata: Option<FederationEntityMetadata>,

    /// Accept a cached response instead of a fresh one
    pub use_cached_value: bool,
}

impl FederationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: FederationEntityMetadata) -> Self {
        self.federation_entity_metadata = Some(metadata);
        self
    }

    pub fn with_cached_value(mut self, use_cached_value: bool) -> Self {
        self.use_cached_value = use_cached_value;
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// Remote federation operations
#[async_trait]
pub trait FederationClient: Send + Sync {
    /// Entity configuration (self-signed statement) of `sub`
    async fn entity_configuration(&self, request: &FederationRequest)
        -> FederationResult<EntityStatement>;

    /// Subordinate statement about `sub` from the addressed authority
    async fn fetch(&self, request: &FederationRequest) -> FederationResult<EntityStatement>;

    /// Immediate subordinates of the addressed authority
    async fn subordinate_listing(&self, request: &FederationRequest)
        -> FederationResult<Vec<String>>;

    /// Signed trust mark token
    async fn trust_mark(&self, request: &FederationRequest) -> FederationResult<String>;

    /// Entities holding a trust mark type
    async fn trust_marked_listing(&self, request: &FederationRequest)
        -> FederationResult<Vec<String>>;
}

/// Response cache keyed by request
///
/// Expiry policy belongs to the implementation.
#[async_trait]
pub trait RequestCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn put(&self, key: &str, value: String);
}

/// Process-local request cache without expiry
#[derive(Default)]
pub struct InMemoryRequestCache {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryRequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl RequestCache for InMemoryRequestCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: String) {
        self.entries.write().await.insert(key.to_string(), value);
    }
}
