/// OIDF Resolver - OpenID Federation trust chain resolver
///
/// Crawls the federation below a trust anchor into a versioned tree cache,
/// validates trust chains assembled from it and answers resolve and
/// discovery queries.

pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod loader;
pub mod resolver;
pub mod statement;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use error::{FederationError, FederationResult};
