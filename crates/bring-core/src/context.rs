//! The explicit context threaded through resolvers, steps and the merger.

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::catalog::MetadataCache;
use crate::config::BringConfig;
use crate::error::{BringError, Result};
use crate::io::url_cache::UrlCache;
use crate::merge::TargetMerger;
use crate::reporter::{NullReporter, Reporter};
use crate::resolver::{Resolver, ResolverRegistry};
use crate::steps::{Step, StepRegistry};
use crate::sync::KeyedLocks;

/// Everything a pipeline needs: configuration, shared caches, registries,
/// concurrency limits and a cancellation token.
///
/// Created once at program start and shared behind an `Arc`.
pub struct BringContext {
    pub config: BringConfig,
    pub client: Client,
    pub reporter: Arc<dyn Reporter>,
    pub cancel: CancellationToken,
    pub resolvers: ResolverRegistry,
    pub steps: StepRegistry,
    pub cache: MetadataCache,
    pub urls: UrlCache,
    pub merger: TargetMerger,
    /// Serializes access to each bare git mirror.
    pub git_locks: KeyedLocks,
    /// Serializes fetches of the same URL so concurrent runs share one download.
    pub download_locks: KeyedLocks,
}

impl std::fmt::Debug for BringContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BringContext")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl BringContext {
    /// Start building a context from `config`.
    pub fn builder(config: BringConfig) -> ContextBuilder {
        ContextBuilder {
            config,
            reporter: None,
            cancel: None,
            resolvers: ResolverRegistry::builtin(),
            steps: StepRegistry::builtin(),
        }
    }

    /// Fail with [`BringError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BringError::Cancelled);
        }
        Ok(())
    }
}

/// Builder for [`BringContext`]; lets tests swap the reporter or register extra plugins.
pub struct ContextBuilder {
    config: BringConfig,
    reporter: Option<Arc<dyn Reporter>>,
    cancel: Option<CancellationToken>,
    resolvers: ResolverRegistry,
    steps: StepRegistry,
}

impl ContextBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Register an additional resolver, replacing any built-in of the same kind.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.register(resolver);
        self
    }

    /// Register an additional step, replacing any built-in of the same kind.
    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.register(step);
        self
    }

    /// Build the context and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`BringError::Config`] if the HTTP client cannot be created.
    pub fn build(self) -> Result<Arc<BringContext>> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| BringError::Config(format!("failed to build HTTP client: {e}")))?;
        let urls = UrlCache::new(self.config.url_cache_path());
        Ok(Arc::new(BringContext {
            client,
            reporter: self.reporter.unwrap_or_else(|| Arc::new(NullReporter)),
            cancel: self.cancel.unwrap_or_default(),
            resolvers: self.resolvers,
            steps: self.steps,
            cache: MetadataCache::new(),
            urls,
            merger: TargetMerger::new(),
            git_locks: KeyedLocks::new(),
            download_locks: KeyedLocks::new(),
            config: self.config,
        }))
    }
}
