/// Entity Statement Tree Loader
///
/// Crawls the federation below a trust anchor into a fresh tree version.
/// Work is an explicit queue of [`Step`]s; failed steps go through the
/// configured recovery strategy and never abort the crawl. Hooks run once
/// the queue and all deferred rounds are drained.

pub mod step;
pub mod strategy;

pub use step::{ErrorContext, PendingStep, Step, StepExecutionError};
pub use strategy::{ExecutionStrategy, RecoveryAction, StepRecoveryStrategy};

use crate::client::{FederationClient, FederationRequest, PARAM_LOCATION, PARAM_SUB};
use crate::config::CrawlConfig;
use crate::error::{FederationError, FederationResult};
use crate::statement::EntityStatement;
use crate::tree::{Snapshot, Tree};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one crawl
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub crawl_id: Uuid,
    pub root: String,
    /// Version built by this crawl, absent when the root could not be fetched
    pub snapshot: Option<Snapshot<EntityStatement>>,
    pub completed_steps: usize,
    pub failed_attempts: usize,
    pub deferred_rounds: usize,
    /// Steps given up on
    pub dropped: Vec<String>,
}

impl CrawlReport {
    pub fn is_complete(&self) -> bool {
        self.snapshot.is_some() && self.dropped.is_empty()
    }
}

/// Runs after every crawl
#[async_trait]
pub trait CrawlHook: Send + Sync {
    async fn on_crawl_complete(&self, report: &CrawlReport);
}

/// Publishes the version a crawl built
pub struct PublishHook {
    tree: Tree<EntityStatement>,
}

impl PublishHook {
    pub fn new(tree: Tree<EntityStatement>) -> Self {
        Self { tree }
    }
}

#[async_trait]
impl CrawlHook for PublishHook {
    async fn on_crawl_complete(&self, report: &CrawlReport) {
        let Some(snapshot) = &report.snapshot else {
            warn!("Crawl {}: nothing to publish", report.crawl_id);
            return;
        };

        let version = self.tree.publish_snapshot(snapshot).await;
        if version == snapshot.version() {
            info!("Crawl {}: published version {}", report.crawl_id, version);
        } else {
            warn!(
                "Crawl {}: version {} superseded by version {}",
                report.crawl_id,
                snapshot.version(),
                version
            );
        }
    }
}

/// Result of a successful step
struct StepOutput {
    created: Option<Snapshot<EntityStatement>>,
    next: Vec<Step>,
}

impl StepOutput {
    fn next(next: Vec<Step>) -> Self {
        Self {
            created: None,
            next,
        }
    }
}

/// Federation crawler
pub struct EntityStatementTreeLoader {
    tree: Tree<EntityStatement>,
    client: Arc<dyn FederationClient>,
    execution: ExecutionStrategy,
    recovery: StepRecoveryStrategy,
    use_cache_threshold: u32,
    hooks: Vec<Arc<dyn CrawlHook>>,
}

impl EntityStatementTreeLoader {
    pub fn new(tree: Tree<EntityStatement>, client: Arc<dyn FederationClient>) -> Self {
        let defaults = CrawlConfig::default();

        Self {
            tree,
            client,
            execution: ExecutionStrategy::default(),
            recovery: StepRecoveryStrategy::default(),
            use_cache_threshold: defaults.use_cache_threshold,
            hooks: Vec::new(),
        }
    }

    pub fn from_config(
        tree: Tree<EntityStatement>,
        client: Arc<dyn FederationClient>,
        config: &CrawlConfig,
    ) -> Self {
        Self::new(tree, client)
            .with_execution(ExecutionStrategy::from_config(config))
            .with_recovery(StepRecoveryStrategy::from_config(config))
            .with_use_cache_threshold(config.use_cache_threshold)
    }

    pub fn with_execution(mut self, execution: ExecutionStrategy) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_recovery(mut self, recovery: StepRecoveryStrategy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_use_cache_threshold(mut self, threshold: u32) -> Self {
        self.use_cache_threshold = threshold;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn CrawlHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn tree(&self) -> &Tree<EntityStatement> {
        &self.tree
    }

    /// Crawl the federation below `root_id` into a new version
    pub async fn load(&self, root_id: &str) -> CrawlReport {
        let crawl_id = Uuid::new_v4();
        info!("Crawl {}: loading federation from {}", crawl_id, root_id);

        let mut report = CrawlReport {
            crawl_id,
            root: root_id.to_string(),
            snapshot: None,
            completed_steps: 0,
            failed_attempts: 0,
            deferred_rounds: 0,
            dropped: Vec::new(),
        };

        let mut visited = HashSet::new();
        visited.insert(normalize_entity_id(root_id));

        let mut queue = vec![PendingStep::new(Step::ResolveRoot {
            entity_id: root_id.to_string(),
        })];
        let mut deferred: Vec<PendingStep> = Vec::new();
        let mut in_flight = FuturesUnordered::new();
        let limit = self.execution.max_in_flight();

        loop {
            while in_flight.len() < limit {
                let Some(pending) = queue.pop() else {
                    break;
                };
                in_flight.push(self.run(pending, report.snapshot.clone()));
            }

            let Some((pending, result)) = in_flight.next().await else {
                if deferred.is_empty() {
                    break;
                }

                report.deferred_rounds += 1;
                debug!(
                    "Crawl {}: replaying {} deferred step(s), round {}",
                    crawl_id,
                    deferred.len(),
                    report.deferred_rounds
                );
                queue.extend(deferred.drain(..).rev());
                continue;
            };

            match result {
                Ok(output) => {
                    report.completed_steps += 1;
                    if let Some(snapshot) = output.created {
                        report.snapshot = Some(snapshot);
                    }

                    let next: Vec<Step> = output
                        .next
                        .into_iter()
                        .filter(|step| match step {
                            Step::FetchSubordinate { subordinate_id, .. } => {
                                let claimed = visited.insert(normalize_entity_id(subordinate_id));
                                if !claimed {
                                    debug!(
                                        "Crawl {}: {} already scheduled, skipping",
                                        crawl_id, subordinate_id
                                    );
                                }
                                claimed
                            }
                            _ => true,
                        })
                        .collect();

                    // Reversed so the first listed entity is crawled first
                    queue.extend(next.into_iter().rev().map(PendingStep::new));
                }
                Err(error) => {
                    report.failed_attempts += 1;
                    let failure = StepExecutionError::new(pending, error);
                    warn!(
                        "Crawl {}: {} failed (attempt {}): {}",
                        crawl_id,
                        failure.name,
                        failure.error_context.failures(),
                        failure.error
                    );

                    match self.recovery.handle(failure) {
                        RecoveryAction::Retry(pending) => queue.push(pending),
                        RecoveryAction::Defer(pending) => deferred.push(pending),
                        RecoveryAction::Drop { name, error } => {
                            warn!("Crawl {}: dropping {}: {}", crawl_id, name, error);
                            report.dropped.push(name);
                        }
                    }
                }
            }
        }

        info!(
            "Crawl {}: finished with {} step(s), {} failed attempt(s), {} dropped",
            crawl_id,
            report.completed_steps,
            report.failed_attempts,
            report.dropped.len()
        );

        for hook in &self.hooks {
            hook.on_crawl_complete(&report).await;
        }

        report
    }

    async fn run(
        &self,
        pending: PendingStep,
        snapshot: Option<Snapshot<EntityStatement>>,
    ) -> (PendingStep, FederationResult<StepOutput>) {
        let use_cached_value = pending
            .error_context
            .use_cached_value(self.use_cache_threshold);
        let result = self
            .execute(&pending.step, use_cached_value, snapshot.as_ref())
            .await;
        (pending, result)
    }

    async fn execute(
        &self,
        step: &Step,
        use_cached_value: bool,
        snapshot: Option<&Snapshot<EntityStatement>>,
    ) -> FederationResult<StepOutput> {
        match step {
            Step::ResolveRoot { entity_id } => {
                let request = FederationRequest::new()
                    .with_parameter(PARAM_SUB, entity_id.as_str())
                    .with_cached_value(use_cached_value);
                let configuration = self.client.entity_configuration(&request).await?;
                check_statement(&configuration, entity_id, entity_id)?;

                let key = configuration.node_key()?;
                let snapshot = self.tree.add_root(key.node(), configuration.clone()).await;
                debug!("Started version {} at {}", snapshot.version(), key);

                Ok(StepOutput {
                    created: Some(snapshot),
                    next: vec![Step::SubordinateListing {
                        authority: configuration,
                    }],
                })
            }

            Step::SubordinateListing { authority } => {
                let Some(metadata) = authority
                    .federation_entity_metadata()
                    .filter(|m| m.can_list_subordinates())
                else {
                    return Ok(StepOutput::next(Vec::new()));
                };

                let request = FederationRequest::new()
                    .with_metadata(metadata)
                    .with_cached_value(use_cached_value);
                let subordinates = self.client.subordinate_listing(&request).await?;
                debug!("{} lists {} subordinate(s)", authority.sub, subordinates.len());

                Ok(StepOutput::next(
                    subordinates
                        .into_iter()
                        .map(|subordinate_id| Step::FetchSubordinate {
                            authority: authority.clone(),
                            subordinate_id,
                        })
                        .collect(),
                ))
            }

            Step::FetchSubordinate {
                authority,
                subordinate_id,
            } => {
                let snapshot = require_snapshot(snapshot)?;
                let metadata = authority.federation_entity_metadata().ok_or_else(|| {
                    FederationError::InvalidRequest(format!(
                        "{} has no federation_entity metadata",
                        authority.sub
                    ))
                })?;

                let request = FederationRequest::new()
                    .with_parameter(PARAM_SUB, subordinate_id.as_str())
                    .with_metadata(metadata)
                    .with_cached_value(use_cached_value);
                let statement = self.client.fetch(&request).await?;
                check_statement(&statement, &authority.sub, subordinate_id)?;

                let parent = authority.node_key()?.to_string();
                self.tree
                    .add_child(statement.node_key()?.node(), &parent, statement.clone(), snapshot)
                    .await?;

                Ok(StepOutput::next(vec![Step::FetchEntityConfiguration {
                    statement,
                }]))
            }

            Step::FetchEntityConfiguration { statement } => {
                let snapshot = require_snapshot(snapshot)?;

                let mut request = FederationRequest::new()
                    .with_parameter(PARAM_SUB, statement.sub.as_str())
                    .with_cached_value(use_cached_value);
                if let Some(location) = &statement.subject_entity_configuration_location {
                    request = request.with_parameter(PARAM_LOCATION, location.as_str());
                }

                let configuration = self.client.entity_configuration(&request).await?;
                check_statement(&configuration, &statement.sub, &statement.sub)?;

                let parent = statement.node_key()?.to_string();
                self.tree
                    .add_child(
                        configuration.node_key()?.node(),
                        &parent,
                        configuration.clone(),
                        snapshot,
                    )
                    .await?;

                Ok(StepOutput::next(vec![Step::SubordinateListing {
                    authority: configuration,
                }]))
            }
        }
    }
}

fn require_snapshot(
    snapshot: Option<&Snapshot<EntityStatement>>,
) -> FederationResult<&Snapshot<EntityStatement>> {
    snapshot.ok_or_else(|| FederationError::Internal("Crawl has no root version".to_string()))
}

/// Fetched statements must be about what was asked for
fn check_statement(statement: &EntityStatement, issuer: &str, subject: &str) -> FederationResult<()> {
    if !statement.iss.eq_ignore_ascii_case(issuer) || !statement.sub.eq_ignore_ascii_case(subject) {
        return Err(FederationError::InvalidStatement(format!(
            "Expected statement {} -> {}, got {} -> {}",
            issuer, subject, statement.iss, statement.sub
        )));
    }
    Ok(())
}

fn normalize_entity_id(entity_id: &str) -> String {
    entity_id.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        authority_metadata, configuration_token, subordinate_token, MockFederationClient, TestKey,
    };
    use crate::tree::{InMemoryGraphStorage, Node};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const NOW: i64 = 1_700_000_000;
    const TA: &str = "https://ta.example";
    const RP: &str = "https://rp.example";

    fn tree() -> Tree<EntityStatement> {
        Tree::new(Arc::new(InMemoryGraphStorage::<EntityStatement>::default()))
    }

    /// TA lists RP and itself
    fn federation() -> MockFederationClient {
        let ta = TestKey::new(TA);
        let rp = TestKey::new(RP);

        MockFederationClient::new()
            .with_configuration(TA, configuration_token(&ta, TA, authority_metadata(TA), NOW))
            .with_configuration(
                RP,
                configuration_token(&rp, RP, json!({ "openid_relying_party": {} }), NOW),
            )
            .with_listing(TA, &[RP, TA])
            .with_subordinate(TA, RP, subordinate_token(&ta, TA, &rp, RP, NOW))
    }

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CrawlHook for CountingHook {
        async fn on_crawl_complete(&self, _report: &CrawlReport) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_load_builds_unpublished_version() {
        let tree = tree();
        let client = Arc::new(federation());
        let loader = EntityStatementTreeLoader::new(tree.clone(), client.clone());

        let report = loader.load(TA).await;
        assert!(report.is_complete());
        assert_eq!(report.completed_steps, 5);

        let snapshot = report.snapshot.unwrap();
        assert_eq!(snapshot.version(), 1);
        assert_eq!(tree.current_snapshot().await.version(), 0);

        let root = snapshot.root().await.unwrap();
        assert_eq!(root.key(), "https://ta.example!https://ta.example");
        let children = snapshot.children(&root).await;
        assert_eq!(children, vec![Node::new("https://ta.example!https://rp.example")]);
        let leaf = snapshot.children(&children[0]).await;
        assert_eq!(leaf, vec![Node::new("https://rp.example!https://rp.example")]);

        // The anchor listing itself is never fetched
        assert_eq!(client.calls("fetch https://ta.example https://ta.example"), 0);
    }

    #[tokio::test]
    async fn test_publish_hook_runs_once() {
        let tree = tree();
        let counter = Arc::new(CountingHook::default());
        let loader = EntityStatementTreeLoader::new(tree.clone(), Arc::new(federation()))
            .with_hook(Arc::new(PublishHook::new(tree.clone())))
            .with_hook(counter.clone());

        loader.load(TA).await;

        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tree.current_snapshot().await.version(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_root_publishes_nothing() {
        let tree = tree();
        let loader = EntityStatementTreeLoader::new(tree.clone(), Arc::new(MockFederationClient::new()))
            .with_recovery(StepRecoveryStrategy::Drop)
            .with_hook(Arc::new(PublishHook::new(tree.clone())));

        let report = loader.load(TA).await;

        assert!(report.snapshot.is_none());
        assert_eq!(report.dropped, vec!["ResolveRoot(https://ta.example)".to_string()]);
        assert_eq!(tree.current_snapshot().await.version(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_statement_is_a_failure() {
        let ta = TestKey::new(TA);
        let rp = TestKey::new(RP);
        let client = federation().with_subordinate(
            TA,
            RP,
            subordinate_token(&ta, TA, &rp, "https://other.example", NOW),
        );

        let loader = EntityStatementTreeLoader::new(tree(), Arc::new(client))
            .with_recovery(StepRecoveryStrategy::Drop);
        let report = loader.load(TA).await;

        assert_eq!(
            report.dropped,
            vec!["FetchSubordinate(https://ta.example -> https://rp.example)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_configuration_fetched_from_declared_location() {
        const LOCATION: &str = "https://cdn.example/rp-configuration.jwt";
        let ta = TestKey::new(TA);
        let rp = TestKey::new(RP);

        let claims = json!({
            "iss": TA,
            "sub": RP,
            "iat": NOW - 60,
            "exp": NOW + 3600,
            "jwks": rp.jwks_json(),
            "subject_entity_configuration_location": LOCATION,
        });
        let located = configuration_token(
            &rp,
            RP,
            json!({ "openid_relying_party": { "client_name": "located" } }),
            NOW,
        );
        let client = Arc::new(
            MockFederationClient::new()
                .with_configuration(TA, configuration_token(&ta, TA, authority_metadata(TA), NOW))
                .with_listing(TA, &[RP])
                .with_subordinate(TA, RP, ta.sign(claims))
                .with_configuration(LOCATION, located),
        );

        let report = EntityStatementTreeLoader::new(tree(), client.clone())
            .load(TA)
            .await;
        assert!(report.is_complete());
        assert_eq!(client.calls(&format!("config {}", LOCATION)), 1);
        assert_eq!(client.calls(&format!("config {}", RP)), 0);

        let snapshot = report.snapshot.unwrap();
        let leaf = snapshot
            .data(&Node::new("https://rp.example!https://rp.example"))
            .await
            .unwrap();
        assert_eq!(
            leaf.metadata.unwrap()["openid_relying_party"]["client_name"],
            json!("located")
        );
    }

    /// Parks the first subordinate fetch until released
    struct GatedClient {
        inner: MockFederationClient,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedClient {
        fn new(inner: MockFederationClient) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(true),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl FederationClient for GatedClient {
        async fn entity_configuration(
            &self,
            request: &FederationRequest,
        ) -> FederationResult<EntityStatement> {
            self.inner.entity_configuration(request).await
        }

        async fn fetch(&self, request: &FederationRequest) -> FederationResult<EntityStatement> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.fetch(request).await
        }

        async fn subordinate_listing(&self, request: &FederationRequest) -> FederationResult<Vec<String>> {
            self.inner.subordinate_listing(request).await
        }

        async fn trust_mark(&self, request: &FederationRequest) -> FederationResult<String> {
            self.inner.trust_mark(request).await
        }

        async fn trust_marked_listing(&self, request: &FederationRequest) -> FederationResult<Vec<String>> {
            self.inner.trust_marked_listing(request).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_crawls_publish_their_own_versions() {
        let tree = tree();
        let gated = Arc::new(GatedClient::new(federation()));

        let slow = EntityStatementTreeLoader::new(tree.clone(), gated.clone())
            .with_hook(Arc::new(PublishHook::new(tree.clone())));
        let fast = EntityStatementTreeLoader::new(tree.clone(), Arc::new(federation()))
            .with_hook(Arc::new(PublishHook::new(tree.clone())));

        // The slow crawl allocates version 1 and stops inside its first fetch
        let slow_crawl = tokio::spawn(async move { slow.load(TA).await });
        gated.entered.notified().await;

        let fast_report = fast.load(TA).await;
        assert_eq!(fast_report.snapshot.as_ref().unwrap().version(), 2);

        let current = tree.current_snapshot().await;
        assert_eq!(current.version(), 2);
        let root = current.root().await.unwrap();
        assert_eq!(current.children(&root).await.len(), 1);

        gated.release.notify_one();
        let slow_report = slow_crawl.await.unwrap();
        assert!(slow_report.is_complete());
        assert_eq!(slow_report.snapshot.unwrap().version(), 1);

        // Finishing late never rolls the published version back
        assert_eq!(tree.current_snapshot().await.version(), 2);
    }
}
