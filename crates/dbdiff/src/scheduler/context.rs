//! Application context shared by the scheduler and the HTTP shell.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::drivers;
use crate::error::Result;
use crate::metrics::{ComparisonMetrics, Registry};
use crate::verify::{ConsistencyEngine, Side};

/// Everything built once at startup: configuration, both data sources and
/// the metrics registry.
pub struct AppContext {
    pub config: Config,
    pub engine: ConsistencyEngine,
    pub registry: Arc<Registry>,
    pub metrics: ComparisonMetrics,
}

impl AppContext {
    /// Build connection pools for both sides from configuration.
    ///
    /// Pools connect lazily; use [`AppContext::test_connections`] to fail early.
    pub fn connect(config: Config) -> Result<Self> {
        let source = Side::new(drivers::connect(&config.source)?, config.source.get_schema());
        let target = Side::new(drivers::connect(&config.target)?, config.target.get_schema());
        info!(
            "Comparing {} ({}) against {} ({})",
            source.name(),
            config.source.r#type.as_str(),
            target.name(),
            config.target.r#type.as_str()
        );
        Ok(Self::new(config, source, target))
    }

    pub fn new(config: Config, source: Side, target: Side) -> Self {
        let registry = Arc::new(Registry::new());
        ComparisonMetrics::describe(&registry);
        let metrics = ComparisonMetrics::new(registry.clone(), &config.metrics);
        let engine = ConsistencyEngine::new(source, target, metrics.clone(), config.comparison.clone());
        Self {
            config,
            engine,
            registry,
            metrics,
        }
    }

    /// Round-trip a trivial query on both sides.
    pub async fn test_connections(&self) -> Result<()> {
        let source = self.engine.source();
        let target = self.engine.target();
        let (a, b) = tokio::join!(
            source.provider.test_connection(),
            target.provider.test_connection()
        );
        for (side, result) in [(source, &a), (target, &b)] {
            match result {
                Ok(()) => info!("{}: connection OK", side.name()),
                Err(e) => error!("{}: connection failed: {}", side.name(), e),
            }
        }
        a?;
        b
    }

    /// Prometheus text exposition of every metric family.
    pub fn render_metrics(&self) -> String {
        self.registry.render()
    }

    pub async fn close(&self) {
        self.engine.source().provider.close().await;
        self.engine.target().provider.close().await;
    }
}
