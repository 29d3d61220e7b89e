/// Resolved metadata
use crate::error::{FederationError, FederationResult};
use crate::statement::EntityStatement;
use serde_json::{Map, Value};

/// Derives the metadata of a resolve response from a validated chain
pub trait MetadataProcessor: Send + Sync {
    /// `chain` is leaf-first
    fn process(&self, chain: &[EntityStatement], entity_type: Option<&str>) -> FederationResult<Value>;
}

/// Returns the leaf's own metadata, without applying metadata policies
#[derive(Debug, Clone, Copy, Default)]
pub struct LeafMetadataProcessor;

impl MetadataProcessor for LeafMetadataProcessor {
    fn process(&self, chain: &[EntityStatement], entity_type: Option<&str>) -> FederationResult<Value> {
        let leaf = chain
            .first()
            .ok_or_else(|| FederationError::Internal("Empty chain has no metadata".to_string()))?;
        let metadata = leaf.metadata.clone().unwrap_or_default();

        let selected: Map<String, Value> = match entity_type {
            Some(entity_type) => metadata
                .into_iter()
                .filter(|(key, _)| key == entity_type)
                .collect(),
            None => metadata.into_iter().collect(),
        };

        Ok(Value::Object(selected))
    }
}
