/// Entity Statements
///
/// Decoded federation entity statements: entity configurations (issuer ==
/// subject) and subordinate statements (an authority vouching for a child).

pub mod jws;

use crate::error::{FederationError, FederationResult};
use crate::tree::NodeKey;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key for federation entities (trust anchors, intermediates)
pub const FEDERATION_ENTITY: &str = "federation_entity";
pub const OPENID_RELYING_PARTY: &str = "openid_relying_party";

/// JWT `typ` of entity statements
pub const ENTITY_STATEMENT_TYP: &str = "entity-statement+jwt";

/// Decoded entity statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityStatement {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<JwkSet>,

    /// Metadata keyed by entity type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_policy: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_hints: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_marks: Option<Vec<TrustMarkRef>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TrustChainConstraints>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_policy_crit: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_endpoint: Option<String>,

    /// Override location of the subject's entity configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_entity_configuration_location: Option<String>,

    /// Compact serialized token this statement was decoded from
    #[serde(skip)]
    pub token: String,
}

/// Trust mark reference carried in a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustMarkRef {
    #[serde(alias = "id")]
    pub trust_mark_type: String,
    pub trust_mark: String,
}

/// Constraints a superior places on the rest of the chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustChainConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_path_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_constraints: Option<NamingConstraints>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_leaf_entity_types: Option<Vec<String>>,
}

/// Permitted / excluded subject identifier prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded: Option<Vec<String>>,
}

/// `federation_entity` metadata: the endpoints an authority exposes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationEntityMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_fetch_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_list_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_resolve_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_trust_mark_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_trust_mark_list_endpoint: Option<String>,
}

impl FederationEntityMetadata {
    /// An authority can be crawled only if it lists and serves subordinates
    pub fn can_list_subordinates(&self) -> bool {
        self.federation_list_endpoint.is_some() && self.federation_fetch_endpoint.is_some()
    }
}

impl EntityStatement {
    /// Decode a compact JWT without verifying its signature
    ///
    /// Verification is the trust chain validator's job; the crawler stores
    /// statements as fetched.
    pub fn from_jwt(token: &str) -> FederationResult<Self> {
        let token = token.trim();
        let payload = jws::decode_payload(token)?;
        let mut statement: EntityStatement = serde_json::from_slice(&payload)?;

        if statement.iss.is_empty() || statement.sub.is_empty() {
            return Err(FederationError::InvalidStatement(
                "Statement is missing iss or sub".to_string(),
            ));
        }

        statement.token = token.to_string();
        Ok(statement)
    }

    /// Entity configuration (self-issued) statement
    pub fn is_self_statement(&self) -> bool {
        self.iss == self.sub
    }

    /// Tree key of this statement
    pub fn node_key(&self) -> FederationResult<NodeKey> {
        NodeKey::new(&self.iss, &self.sub)
    }

    pub fn has_metadata(&self, entity_type: &str) -> bool {
        self.metadata
            .as_ref()
            .map(|m| m.contains_key(entity_type))
            .unwrap_or(false)
    }

    /// Entity types declared in metadata
    pub fn entity_types(&self) -> Vec<&str> {
        self.metadata
            .as_ref()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Parsed `federation_entity` metadata, if present and well-formed
    pub fn federation_entity_metadata(&self) -> Option<FederationEntityMetadata> {
        let value = self.metadata.as_ref()?.get(FEDERATION_ENTITY)?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn has_trust_mark(&self, trust_mark_type: &str) -> bool {
        self.trust_marks
            .as_ref()
            .map(|marks| marks.iter().any(|m| m.trust_mark_type == trust_mark_type))
            .unwrap_or(false)
    }

    /// Self-signed intermediate authority that only routes between a subject
    /// and the trust anchor
    pub fn is_intermediate_authority(&self) -> bool {
        self.is_self_statement()
            && self
                .federation_entity_metadata()
                .map(|m| m.federation_fetch_endpoint.is_some())
                .unwrap_or(false)
    }

    /// Verify the statement signature against a key set
    pub fn verify(&self, keys: &JwkSet) -> FederationResult<()> {
        jws::verify(&self.token, keys)
    }

    /// Verify against the statement's own published keys
    pub fn verify_self_signed(&self) -> FederationResult<()> {
        match &self.jwks {
            Some(keys) => self.verify(keys),
            None => Err(FederationError::InvalidStatement(
                "Statement carries no jwks".to_string(),
            )),
        }
    }
}
