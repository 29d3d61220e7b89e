/// Shared helpers for unit tests: HMAC-keyed signing of statements and a
/// scripted federation client
use crate::client::{FederationClient, FederationRequest, PARAM_LOCATION, PARAM_SUB};
use crate::error::{FederationError, FederationResult};
use crate::statement::{EntityStatement, ENTITY_STATEMENT_TYP};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, jwk::JwkSet, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Per-entity symmetric test key
pub struct TestKey {
    pub kid: String,
    secret: Vec<u8>,
}

impl TestKey {
    pub fn new(entity_id: &str) -> Self {
        Self {
            kid: format!("{}#sig", entity_id),
            secret: format!("test-secret-{}-0123456789abcdef", entity_id).into_bytes(),
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

    pub fn sign_without_kid(&self, claims: Value) -> String {
        let header = Header::new(Algorithm::HS256);
        encode(&header, &claims, &EncodingKey::from_secret(&self.secret)).unwrap()
    }
}

pub fn sign_statement(key: &TestKey, claims: Value) -> String {
    key.sign(claims)
}

/// Sign and decode in one go
pub fn statement(key: &TestKey, claims: Value) -> EntityStatement {
    EntityStatement::from_jwt(&key.sign(claims)).unwrap()
}

/// Metadata of an authority exposing `{id}/fetch` and `{id}/list`
pub fn authority_metadata(entity_id: &str) -> Value {
    json!({
        "federation_entity": {
            "federation_fetch_endpoint": format!("{}/fetch", entity_id),
            "federation_list_endpoint": format!("{}/list", entity_id),
        }
    })
}

/// Signed entity configuration of `entity_id`
pub fn configuration_token(key: &TestKey, entity_id: &str, metadata: Value, now: i64) -> String {
    key.sign(json!({
        "iss": entity_id,
        "sub": entity_id,
        "iat": now - 60,
        "exp": now + 3600,
        "jwks": key.jwks_json(),
        "metadata": metadata,
    }))
}

/// Signed statement by `issuer` about `subject`
pub fn subordinate_token(
    issuer_key: &TestKey,
    issuer: &str,
    subject_key: &TestKey,
    subject: &str,
    now: i64,
) -> String {
    issuer_key.sign(json!({
        "iss": issuer,
        "sub": subject,
        "iat": now - 60,
        "exp": now + 3600,
        "jwks": subject_key.jwks_json(),
    }))
}

/// Scripted in-memory federation
///
/// Operations are addressed as `config <sub>`, `fetch <issuer> <sub>` and
/// `list <issuer>`, with issuers derived from `{issuer}/fetch` and
/// `{issuer}/list` endpoints. A configuration requested from an explicit
/// location is addressed as `config <location>`.
#[derive(Default)]
pub struct MockFederationClient {
    configurations: HashMap<String, String>,
    subordinates: HashMap<String, String>,
    listings: HashMap<String, Vec<String>>,
    failures: Mutex<HashMap<String, u32>>,
    uncached_failures: HashSet<String>,
    requests: Mutex<Vec<(String, bool)>>,
}

impl MockFederationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configuration(mut self, entity_id: &str, token: String) -> Self {
        self.configurations.insert(format!("config {}", entity_id), token);
        self
    }

    pub fn with_subordinate(mut self, issuer: &str, subject: &str, token: String) -> Self {
        self.subordinates
            .insert(format!("fetch {} {}", issuer, subject), token);
        self
    }

    pub fn with_listing(mut self, issuer: &str, ids: &[&str]) -> Self {
        self.listings.insert(
            format!("list {}", issuer),
            ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    /// Fail the next `times` calls of `op`
    pub fn failing(self, op: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(op.to_string(), times);
        self
    }

    /// Fail `op` whenever a fresh value is requested
    pub fn failing_unless_cached(mut self, op: &str) -> Self {
        self.uncached_failures.insert(op.to_string());
        self
    }

    /// Calls made so far, with their `use_cached_value` flag
    pub fn requests(&self) -> Vec<(String, bool)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.requests().iter().filter(|(o, _)| o == op).count()
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
        if let Some(remaining) = failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FederationError::Client(format!("{} failed", op)));
            }
        }
        Ok(())
    }

    fn issuer(endpoint: Option<&String>, suffix: &str) -> String {
        endpoint
            .and_then(|e| e.strip_suffix(suffix))
            .unwrap_or_default()
            .to_string()
    }

    fn lookup<V: Clone>(map: &HashMap<String, V>, op: &str) -> FederationResult<V> {
        map.get(op)
            .cloned()
            .ok_or_else(|| FederationError::Client(format!("{} returned 404", op)))
    }
}

#[async_trait]
impl FederationClient for MockFederationClient {
    async fn entity_configuration(
        &self,
        request: &FederationRequest,
    ) -> FederationResult<EntityStatement> {
        let target = request
            .parameter(PARAM_LOCATION)
            .or_else(|| request.parameter(PARAM_SUB))
            .unwrap_or_default();
        let op = format!("config {}", target);
        self.record(&op, request)?;
        EntityStatement::from_jwt(&Self::lookup(&self.configurations, &op)?)
    }

    async fn fetch(&self, request: &FederationRequest) -> FederationResult<EntityStatement> {
        let metadata = request.federation_entity_metadata.clone().unwrap_or_default();
        let issuer = Self::issuer(metadata.federation_fetch_endpoint.as_ref(), "/fetch");
        let op = format!(
            "fetch {} {}",
            issuer,
            request.parameter(PARAM_SUB).unwrap_or_default()
        );
        self.record(&op, request)?;
        EntityStatement::from_jwt(&Self::lookup(&self.subordinates, &op)?)
    }

    async fn subordinate_listing(&self, request: &FederationRequest) -> FederationResult<Vec<String>> {
        let metadata = request.federation_entity_metadata.clone().unwrap_or_default();
        let op = format!(
            "list {}",
            Self::issuer(metadata.federation_list_endpoint.as_ref(), "/list")
        );
        self.record(&op, request)?;
        Self::lookup(&self.listings, &op)
    }

    async fn trust_mark(&self, _request: &FederationRequest) -> FederationResult<String> {
        Err(FederationError::Client("trust marks are not scripted".to_string()))
    }

    async fn trust_marked_listing(&self, _request: &FederationRequest) -> FederationResult<Vec<String>> {
        Ok(Vec::new())
    }
}
