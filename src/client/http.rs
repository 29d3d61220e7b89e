/// HTTP federation client - talks to federation endpoints with caching
use crate::{
    client::{
        FederationClient, FederationRequest, InMemoryRequestCache, RequestCache, PARAM_LOCATION,
        PARAM_SUB,
    },
    config::HttpConfig,
    error::{FederationError, FederationResult},
    statement::{EntityStatement, FederationEntityMetadata},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Path of the entity configuration below an entity identifier
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-federation";

/// reqwest-backed federation client
#[derive(Clone)]
pub struct HttpFederationClient {
    http_client: reqwest::Client,
    cache: Arc<dyn RequestCache>,
}

impl HttpFederationClient {
    /// Create a new client with an in-memory request cache
    pub fn new(config: &HttpConfig) -> FederationResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FederationError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            cache: Arc::new(InMemoryRequestCache::new()),
        })
    }

    /// Replace the request cache
    pub fn with_cache(mut self, cache: Arc<dyn RequestCache>) -> Self {
        self.cache = cache;
        self
    }

    /// GET a URL, honoring `use_cached_value`
    ///
    /// A cached request falls back to the network on a miss; a fresh request
    /// always goes to the network and refreshes the cache.
    async fn get_text(&self, url: &str, use_cached_value: bool) -> FederationResult<String> {
        if use_cached_value {
            if let Some(body) = self.cache.get(url).await {
                debug!("Cache HIT: {}", url);
                return Ok(body);
            }
            debug!("Cache MISS: {}", url);
        }

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| FederationError::Client(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(FederationError::Client(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FederationError::Client(format!("Failed to read {}: {}", url, e)))?;

        self.cache.put(url, body.clone()).await;
        Ok(body)
    }

    async fn get_statement(&self, url: &str, use_cached_value: bool) -> FederationResult<EntityStatement> {
        let body = self.get_text(url, use_cached_value).await?;
        EntityStatement::from_jwt(&body)
    }

    async fn get_identifiers(&self, url: &str, use_cached_value: bool) -> FederationResult<Vec<String>> {
        let body = self.get_text(url, use_cached_value).await?;
        serde_json::from_str(&body).map_err(|e| {
            FederationError::Client(format!("Invalid listing from {}: {}", url, e))
        })
    }
}

/// Entity configuration location: explicit `location`, else the well-known
/// path below `sub`
pub fn entity_configuration_url(request: &FederationRequest) -> FederationResult<String> {
    if let Some(location) = request.parameter(PARAM_LOCATION) {
        return Ok(location.to_string());
    }

    let sub = request.parameter(PARAM_SUB).ok_or_else(|| {
        FederationError::InvalidRequest("Entity configuration request needs sub".to_string())
    })?;

    Ok(format!("{}{}", sub.trim_end_matches('/'), WELL_KNOWN_PATH))
}

/// Append URL-encoded query parameters to an endpoint
pub fn endpoint_url(endpoint: &str, parameters: &BTreeMap<String, String>) -> String {
    if parameters.is_empty() {
        return endpoint.to_string();
    }

    let query = parameters
        .iter()
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}{}", endpoint, separator, query)
}

/// Pick an endpoint out of the addressed entity's metadata
fn required_endpoint<F>(request: &FederationRequest, name: &str, select: F) -> FederationResult<String>
where
    F: Fn(&FederationEntityMetadata) -> Option<&String>,
{
    request
        .federation_entity_metadata
        .as_ref()
        .and_then(|metadata| select(metadata))
        .cloned()
        .ok_or_else(|| FederationError::InvalidRequest(format!("Entity exposes no {}", name)))
}

#[async_trait]
impl FederationClient for HttpFederationClient {
    async fn entity_configuration(
        &self,
        request: &FederationRequest,
    ) -> FederationResult<EntityStatement> {
        let mut parameters = request.parameters.clone();
        parameters.remove(PARAM_SUB);
        parameters.remove(PARAM_LOCATION);

        let url = endpoint_url(&entity_configuration_url(request)?, &parameters);
        self.get_statement(&url, request.use_cached_value).await
    }

    async fn fetch(&self, request: &FederationRequest) -> FederationResult<EntityStatement> {
        let endpoint = required_endpoint(request, "federation_fetch_endpoint", |m| {
            m.federation_fetch_endpoint.as_ref()
        })?;

        let url = endpoint_url(&endpoint, &request.parameters);
        self.get_statement(&url, request.use_cached_value).await
    }

    async fn subordinate_listing(&self, request: &FederationRequest) -> FederationResult<Vec<String>> {
        let endpoint = required_endpoint(request, "federation_list_endpoint", |m| {
            m.federation_list_endpoint.as_ref()
        })?;

        let url = endpoint_url(&endpoint, &request.parameters);
        self.get_identifiers(&url, request.use_cached_value).await
    }

    async fn trust_mark(&self, request: &FederationRequest) -> FederationResult<String> {
        let endpoint = required_endpoint(request, "federation_trust_mark_endpoint", |m| {
            m.federation_trust_mark_endpoint.as_ref()
        })?;

        let url = endpoint_url(&endpoint, &request.parameters);
        let body = self.get_text(&url, request.use_cached_value).await?;
        Ok(body.trim().to_string())
    }

    async fn trust_marked_listing(&self, request: &FederationRequest) -> FederationResult<Vec<String>> {
        let endpoint = required_endpoint(request, "federation_trust_mark_list_endpoint", |m| {
            m.federation_trust_mark_list_endpoint.as_ref()
        })?;

        let url = endpoint_url(&endpoint, &request.parameters);
        self.get_identifiers(&url, request.use_cached_value).await
    }
}
