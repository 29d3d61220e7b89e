//! Shared fixture for federation integration tests: HMAC-signed statements
//! and a scripted in-memory federation
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, jwk::JwkSet, Algorithm, EncodingKey, Header};
use oidf_resolver::{
    client::{FederationClient, FederationRequest, PARAM_SUB},
    statement::{EntityStatement, ENTITY_STATEMENT_TYP},
    FederationError, FederationResult,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const NOW: i64 = 1_700_000_000;

pub const TA: &str = "https://ta.example";
pub const IA: &str = "https://ia.example";
pub const RP: &str = "https://rp.example";
pub const OP: &str = "https://op.example";
pub const TMI: &str = "https://tmi.example";
pub const RESOLVER: &str = "https://resolver.example";

pub const GOLD: &str = "https://tmi.example/gold";

/// Symmetric signing key of one entity
pub struct EntityKey {
    kid: String,
    secret: Vec<u8>,
}

impl EntityKey {
    pub fn new(entity_id: &str) -> Self {
        Self {
            kid: format!("{}#sig", entity_id),
            secret: format!("integration-{}-0123456789abcdef", entity_id).into_bytes(),
        }
    }

    pub fn jwks_json(&self) -> Value {
        json!({
            "keys": [{
                "kty": "oct",
                "kid": self.kid,
                "alg": "HS256",
                "k": URL_SAFE_NO_PAD.encode(&self.secret),
            }]
        })
    }

    pub fn jwks(&self) -> JwkSet {
        serde_json::from_value(self.jwks_json()).unwrap()
    }

    pub fn sign(&self, claims: Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.kid.clone());
        header.typ = Some(ENTITY_STATEMENT_TYP.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(&self.secret)).unwrap()
    }
}

/// Authority exposing `{id}/fetch` and `{id}/list`
pub fn authority_metadata(entity_id: &str) -> Value {
    json!({
        "federation_entity": {
            "federation_fetch_endpoint": format!("{}/fetch", entity_id),
            "federation_list_endpoint": format!("{}/list", entity_id),
        }
    })
}

pub fn configuration(entity_id: &str, metadata: Value) -> String {
    configuration_with(entity_id, metadata, json!({}))
}

/// Entity configuration with extra claims merged in
pub fn configuration_with(entity_id: &str, metadata: Value, extra: Value) -> String {
    let key = EntityKey::new(entity_id);
    let mut claims = json!({
        "iss": entity_id,
        "sub": entity_id,
        "iat": NOW - 60,
        "exp": NOW + 3600,
        "jwks": key.jwks_json(),
        "metadata": metadata,
    });
    if let (Some(claims), Some(extra)) = (claims.as_object_mut(), extra.as_object()) {
        claims.extend(extra.clone());
    }
    key.sign(claims)
}

pub fn subordinate(issuer: &str, subject: &str) -> String {
    EntityKey::new(issuer).sign(json!({
        "iss": issuer,
        "sub": subject,
        "iat": NOW - 60,
        "exp": NOW + 3600,
        "jwks": EntityKey::new(subject).jwks_json(),
    }))
}

pub fn op_config(entity_id: &str) -> String {
    format!("config {}", entity_id)
}

pub fn op_fetch(issuer: &str, subject: &str) -> String {
    format!("fetch {} {}", issuer, subject)
}

pub fn op_list(issuer: &str) -> String {
    format!("list {}", issuer)
}

/// Scripted federation with failure injection
#[derive(Default)]
pub struct ScriptedFederation {
    responses: HashMap<String, String>,
    listings: HashMap<String, Vec<String>>,
    failures: Mutex<HashMap<String, u32>>,
    uncached_failures: HashSet<String>,
    requests: Mutex<Vec<(String, bool)>>,
}

impl ScriptedFederation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration(mut self, entity_id: &str, token: String) -> Self {
        self.responses.insert(op_config(entity_id), token);
        self
    }

    pub fn subordinate(mut self, issuer: &str, subject: &str) -> Self {
        self.responses
            .insert(op_fetch(issuer, subject), subordinate(issuer, subject));
        self
    }

    pub fn listing(mut self, issuer: &str, ids: &[&str]) -> Self {
        self.listings
            .insert(op_list(issuer), ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// Fail the next `times` calls of `op`
    pub fn failing(self, op: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(op.to_string(), times);
        self
    }

    /// Fail `op` whenever a fresh response is requested
    pub fn failing_unless_cached(mut self, op: &str) -> Self {
        self.uncached_failures.insert(op.to_string());
        self
    }

    /// `use_cached_value` of every call of `op`, in order
    pub fn cache_flags(&self, op: &str) -> Vec<bool> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, cached)| *cached)
            .collect()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.cache_flags(op).len()
    }

    fn record(&self, op: &str, request: &FederationRequest) -> FederationResult<()> {
        self.requests
            .lock()
            .unwrap()
            .push((op.to_string(), request.use_cached_value));

        if self.uncached_failures.contains(op) && !request.use_cached_value {
            return Err(FederationError::Client(format!("{} unavailable", op)));
        }

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(FederationError::Client(format!("{} failed", op)))
            }
            _ => Ok(()),
        }
    }

    fn issuer(endpoint: Option<&String>, suffix: &str) -> String {
        endpoint
            .and_then(|e| e.strip_suffix(suffix))
            .unwrap_or_default()
            .to_string()
    }

    fn statement(&self, op: &str) -> FederationResult<EntityStatement> {
        let token = self
            .responses
            .get(op)
            .ok_or_else(|| FederationError::Client(format!("{} returned 404", op)))?;
        EntityStatement::from_jwt(token)
    }
}

#[async_trait]
impl FederationClient for ScriptedFederation {
    async fn entity_configuration(
        &self,
        request: &FederationRequest,
    ) -> FederationResult<EntityStatement> {
        let op = op_config(request.parameter(PARAM_SUB).unwrap_or_default());
        self.record(&op, request)?;
        self.statement(&op)
    }

    async fn fetch(&self, request: &FederationRequest) -> FederationResult<EntityStatement> {
        let metadata = request.federation_entity_metadata.clone().unwrap_or_default();
        let op = op_fetch(
            &Self::issuer(metadata.federation_fetch_endpoint.as_ref(), "/fetch"),
            request.parameter(PARAM_SUB).unwrap_or_default(),
        );
        self.record(&op, request)?;
        self.statement(&op)
    }

    async fn subordinate_listing(&self, request: &FederationRequest) -> FederationResult<Vec<String>> {
        let metadata = request.federation_entity_metadata.clone().unwrap_or_default();
        let op = op_list(&Self::issuer(metadata.federation_list_endpoint.as_ref(), "/list"));
        self.record(&op, request)?;
        self.listings
            .get(&op)
            .cloned()
            .ok_or_else(|| FederationError::Client(format!("{} returned 404", op)))
    }

    async fn trust_mark(&self, _request: &FederationRequest) -> FederationResult<String> {
        Err(FederationError::Client("trust marks are not scripted".to_string()))
    }

    async fn trust_marked_listing(&self, _request: &FederationRequest) -> FederationResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// TA -> {IA, TMI}, IA -> {RP, OP}
///
/// RP carries a gold trust mark issued by TMI; TMI is a leaf exposing only a
/// trust mark endpoint.
pub fn federation() -> ScriptedFederation {
    let tmi_metadata = json!({
        "federation_entity": {
            "federation_trust_mark_endpoint": format!("{}/trust_mark", TMI),
        }
    });
    let rp_metadata = json!({
        "openid_relying_party": { "client_name": "Example RP" }
    });
    let rp_trust_marks = json!({
        "trust_marks": [{ "trust_mark_type": GOLD, "trust_mark": "gold.jwt" }]
    });

    ScriptedFederation::new()
        .configuration(TA, configuration(TA, authority_metadata(TA)))
        .configuration(IA, configuration(IA, authority_metadata(IA)))
        .configuration(TMI, configuration(TMI, tmi_metadata))
        .configuration(RP, configuration_with(RP, rp_metadata, rp_trust_marks))
        .configuration(OP, configuration(OP, json!({ "openid_provider": {} })))
        .listing(TA, &[IA, TMI])
        .listing(IA, &[RP, OP])
        .subordinate(TA, IA)
        .subordinate(TA, TMI)
        .subordinate(IA, RP)
        .subordinate(IA, OP)
}
