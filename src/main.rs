/// OIDF Resolver - OpenID Federation trust chain resolver
///
/// Keeps a crawled copy of a federation fresh and resolves entities against
/// it.
use anyhow::Context;
use clap::{Parser, Subcommand};
use oidf_resolver::{
    chain::TrustChainValidator,
    client::HttpFederationClient,
    config::{LoggingConfig, ResolverConfig},
    jobs::RefreshScheduler,
    loader::{EntityStatementTreeLoader, PublishHook},
    resolver::{DiscoveryRequest, JwtSigner, ResolveRequest, Resolver},
    statement::EntityStatement,
    tree::{InMemoryGraphStorage, Tree},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "oidf-resolver")]
#[command(about = "OpenID Federation trust chain resolver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the federation tree fresh until interrupted
    Serve,

    /// Crawl once, then resolve one entity
    Resolve {
        /// Entity identifier to resolve
        subject: String,

        /// Only return metadata of this entity type
        entity_type: Option<String>,
    },

    /// Crawl once, then list entities of the given types
    Discover {
        entity_types: Vec<String>,
    },
}

/// `--verbose` wins over the configured filter
fn log_filter(verbose: bool, logging: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if verbose {
        return Ok(EnvFilter::new("oidf_resolver=debug"));
    }
    EnvFilter::try_new(&logging.level)
        .with_context(|| format!("invalid log filter: {}", logging.level))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = ResolverConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(log_filter(cli.verbose, &config.logging)?)
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    let storage: Arc<InMemoryGraphStorage<EntityStatement>> =
        Arc::new(InMemoryGraphStorage::new(config.crawl.retained_versions));
    let tree = Tree::new(storage);
    let client = Arc::new(HttpFederationClient::new(&config.http)?);

    let loader = EntityStatementTreeLoader::from_config(tree.clone(), client, &config.crawl)
        .with_hook(Arc::new(PublishHook::new(tree.clone())));
    let loader = Arc::new(loader);

    let resolver = Resolver::new(
        config.service.entity_id.clone(),
        config.service.trust_anchor_id.clone(),
        tree.clone(),
        TrustChainValidator::new(config.trusted_keys()?),
        Arc::new(JwtSigner::hmac(
            config.signing.secret.as_bytes(),
            config.signing.key_id.clone(),
        )),
    )
    .with_response_lifetime(config.signing.response_lifetime_secs);

    let trust_anchor = config.service.trust_anchor_id.clone();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let scheduler = Arc::new(RefreshScheduler::new(
                Arc::clone(&loader),
                trust_anchor.clone(),
                Duration::from_secs(config.crawl.refresh_interval_secs),
            ));
            let job = Arc::clone(&scheduler).start();

            info!("Resolver {} serving trust anchor {}", resolver.entity_id(), trust_anchor);
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;

            info!("Shutting down");
            job.abort();
        }

        Commands::Resolve {
            subject,
            entity_type,
        } => {
            let report = loader.load(&trust_anchor).await;
            info!("Crawl {} finished", report.crawl_id);

            let mut request = ResolveRequest::new(subject, trust_anchor);
            if let Some(entity_type) = entity_type {
                request = request.with_entity_type(entity_type);
            }

            match resolver.resolve(&request).await {
                Ok(response) => {
                    println!("{}", serde_json::to_string_pretty(&response.claims)?);
                    println!("{}", response.token);
                }
                Err(e) => {
                    error!("Resolve failed: {}", e);
                    println!("{}", serde_json::to_string_pretty(&e.to_response())?);
                    std::process::exit(1);
                }
            }
        }

        Commands::Discover { entity_types } => {
            loader.load(&trust_anchor).await;

            let entities = resolver
                .discovery(&DiscoveryRequest {
                    trust_anchor,
                    entity_types,
                    trust_mark_ids: Vec::new(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
    }

    Ok(())
}
