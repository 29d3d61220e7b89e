/// Trust Resolver
///
/// Answers resolve and discovery queries against the published tree version.
/// Resolve assembles the subject's chain from the tree, validates it and
/// returns a signed response; discovery lists matching entities.

pub mod metadata;
pub mod signer;

pub use metadata::{LeafMetadataProcessor, MetadataProcessor};
pub use signer::{JwtSigner, ResponseSigner, RESOLVE_RESPONSE_TYP};

use crate::chain::TrustChainValidator;
use crate::error::{FederationError, FederationResult};
use crate::statement::EntityStatement;
use crate::tree::{NodeSearchContext, SearchRequest, SearchResult, Tree};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Separator of resolve cache key parts
pub const CACHE_KEY_SEPARATOR: char = '|';

/// Default lifetime of a resolve response, in seconds
pub const DEFAULT_RESPONSE_LIFETIME_SECS: i64 = 3600;

/// Resolve query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub subject: String,
    pub trust_anchor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ResolveRequest {
    pub fn new(subject: impl Into<String>, trust_anchor: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            trust_anchor: trust_anchor.into(),
            entity_type: None,
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// `{resolver}|{subject}|{anchor}|{type}`, absent type as empty
    pub fn cache_key(&self, resolver_id: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            resolver_id,
            self.subject,
            self.trust_anchor,
            self.entity_type.as_deref().unwrap_or_default(),
            sep = CACHE_KEY_SEPARATOR
        )
    }

    /// Inverse of [`ResolveRequest::cache_key`], returning the resolver id
    /// and the request
    pub fn from_cache_key(key: &str) -> FederationResult<(String, Self)> {
        let parts: Vec<&str> = key.split(CACHE_KEY_SEPARATOR).collect();
        let [resolver_id, subject, trust_anchor, entity_type] = parts.as_slice() else {
            return Err(FederationError::InvalidRequest(format!(
                "Malformed resolve cache key: {}",
                key
            )));
        };

        if subject.is_empty() || trust_anchor.is_empty() {
            return Err(FederationError::InvalidRequest(format!(
                "Resolve cache key lacks subject or trust anchor: {}",
                key
            )));
        }

        let request = Self {
            subject: subject.to_string(),
            trust_anchor: trust_anchor.to_string(),
            entity_type: (!entity_type.is_empty()).then(|| entity_type.to_string()),
        };
        Ok((resolver_id.to_string(), request))
    }
}

/// Discovery query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub trust_anchor: String,
    /// Any of these entity types
    #[serde(default)]
    pub entity_types: Vec<String>,
    /// All of these trust mark types
    #[serde(default)]
    pub trust_mark_ids: Vec<String>,
}

/// Trust mark entry of a resolve response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustMarkEntry {
    pub trust_mark: String,
    pub trust_mark_type: String,
}

/// Claims of a resolve response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trust_marks: Vec<TrustMarkEntry>,
    /// Compact statements, leaf first
    pub trust_chain: Vec<String>,
}

/// Signed resolve response
#[derive(Debug, Clone)]
pub struct ResolveResponse {
    pub claims: ResolveClaims,
    pub token: String,
}

/// Resolver over the published federation tree
pub struct Resolver {
    entity_id: String,
    trust_anchor: String,
    tree: Tree<EntityStatement>,
    validator: TrustChainValidator,
    metadata: Arc<dyn MetadataProcessor>,
    signer: Arc<dyn ResponseSigner>,
    response_lifetime: i64,
}

impl Resolver {
    pub fn new(
        entity_id: impl Into<String>,
        trust_anchor: impl Into<String>,
        tree: Tree<EntityStatement>,
        validator: TrustChainValidator,
        signer: Arc<dyn ResponseSigner>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            trust_anchor: trust_anchor.into(),
            tree,
            validator,
            metadata: Arc::new(LeafMetadataProcessor),
            signer,
            response_lifetime: DEFAULT_RESPONSE_LIFETIME_SECS,
        }
    }

    pub fn with_metadata_processor(mut self, metadata: Arc<dyn MetadataProcessor>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_response_lifetime(mut self, seconds: i64) -> Self {
        self.response_lifetime = seconds;
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Resolve a subject as of now
    pub async fn resolve(&self, request: &ResolveRequest) -> FederationResult<ResolveResponse> {
        self.resolve_at(request, Utc::now().timestamp()).await
    }

    /// Resolve a subject as of `now` (seconds since the epoch)
    pub async fn resolve_at(
        &self,
        request: &ResolveRequest,
        now: i64,
    ) -> FederationResult<ResolveResponse> {
        self.check_trust_anchor(&request.trust_anchor)?;

        if request.subject.is_empty() {
            return Err(FederationError::InvalidRequest(
                "Resolve request needs a subject".to_string(),
            ));
        }

        let chain = self.find_chain(request).await?;
        debug!("Candidate chain for {} has {} statement(s)", request.subject, chain.len());

        let violations = self.validator.validate_at(&chain, now);
        if !violations.is_empty() {
            return Err(FederationError::InvalidChain(violations));
        }

        let leaf = &chain[0];
        let exp = chain
            .iter()
            .map(|s| s.exp)
            .fold(now + self.response_lifetime, i64::min);

        let trust_marks = leaf
            .trust_marks
            .iter()
            .flatten()
            .map(|mark| TrustMarkEntry {
                trust_mark: mark.trust_mark.clone(),
                trust_mark_type: mark.trust_mark_type.clone(),
            })
            .collect();

        let claims = ResolveClaims {
            iss: self.entity_id.clone(),
            sub: leaf.sub.clone(),
            iat: now,
            exp,
            metadata: self.metadata.process(&chain, request.entity_type.as_deref())?,
            trust_marks,
            trust_chain: chain.iter().map(|s| s.token.clone()).collect(),
        };

        let token = self
            .signer
            .sign(&serde_json::to_value(&claims)?, RESOLVE_RESPONSE_TYP)?;

        info!("Resolved {} through {} statement(s)", leaf.sub, chain.len());
        Ok(ResolveResponse { claims, token })
    }

    /// Entities matching the discovery filters, shallowest first
    pub async fn discovery(&self, request: &DiscoveryRequest) -> FederationResult<Vec<String>> {
        self.check_trust_anchor(&request.trust_anchor)?;

        let entity_types = request.entity_types.clone();
        let trust_mark_ids = request.trust_mark_ids.clone();
        let predicate = move |statement: &EntityStatement, _: &NodeSearchContext<EntityStatement>| {
            statement.is_self_statement()
                && (entity_types.is_empty()
                    || entity_types.iter().any(|t| statement.has_metadata(t)))
                && trust_mark_ids.iter().all(|id| statement.has_trust_mark(id))
        };

        let snapshot = self.tree.current_snapshot().await;
        let results = self
            .tree
            .search(SearchRequest {
                predicate,
                include_parent: false,
                snapshot: snapshot.clone(),
            })
            .await;

        let mut matches = Vec::with_capacity(results.len());
        for result in sorted(results) {
            if let Some(statement) = snapshot.data(&result.node).await {
                matches.push((result.level, statement.sub));
            }
        }
        matches.sort();

        let mut seen = HashSet::new();
        Ok(matches
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    fn check_trust_anchor(&self, trust_anchor: &str) -> FederationResult<()> {
        if !trust_anchor.eq_ignore_ascii_case(&self.trust_anchor) {
            return Err(FederationError::InvalidTrustAnchor(format!(
                "{} is not served by this resolver",
                trust_anchor
            )));
        }
        Ok(())
    }

    /// Leaf-first candidate chain for the requested subject
    async fn find_chain(&self, request: &ResolveRequest) -> FederationResult<Vec<EntityStatement>> {
        let subject = request.subject.clone();
        let entity_type = request.entity_type.clone();
        let predicate = move |statement: &EntityStatement, _: &NodeSearchContext<EntityStatement>| {
            statement.is_self_statement()
                && statement.sub.eq_ignore_ascii_case(&subject)
                && entity_type
                    .as_deref()
                    .map(|t| statement.has_metadata(t))
                    .unwrap_or(true)
        };

        let snapshot = self.tree.current_snapshot().await;
        let results = self
            .tree
            .search(SearchRequest {
                predicate,
                include_parent: true,
                snapshot: snapshot.clone(),
            })
            .await;

        let mut chain = Vec::with_capacity(results.len());
        let mut seen = HashSet::new();
        for result in sorted(results) {
            let Some(statement) = snapshot.data(&result.node).await else {
                continue;
            };

            // Listing-only hops between the subject and the anchor
            if statement.is_intermediate_authority()
                && !statement.sub.eq_ignore_ascii_case(&self.trust_anchor)
                && !statement.sub.eq_ignore_ascii_case(&request.subject)
            {
                continue;
            }

            if seen.insert(result.node.key().to_lowercase()) {
                chain.push(statement);
            }
        }

        if chain.is_empty() {
            return Err(FederationError::NotFound(format!(
                "No trust chain for {}",
                request.subject
            )));
        }

        chain.reverse();
        Ok(chain)
    }
}

/// Search results by level, then key
fn sorted(results: HashSet<SearchResult>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = results.into_iter().collect();
    results.sort_by(|a, b| {
        a.level
            .cmp(&b.level)
            .then_with(|| a.node.key().cmp(b.node.key()))
    });
    results
}
