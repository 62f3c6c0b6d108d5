//! Runtime assembly from configuration.
//!
//! Everything a command needs (registry, health checker, metrics and the
//! orchestrator) is built once here and passed around by reference.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{Config, ProviderSettings, ProviderSpec};
use crate::error::ConfigError;
use crate::health::HealthChecker;
use crate::metrics::ProviderMetrics;
use crate::orchestrator::Orchestrator;
use crate::provider::{Provider, RemoteApiProvider, WhisperCliProvider};
use crate::registry::Registry;
use crate::routing::Router;

pub struct Engine {
    registry: Arc<Registry>,
    health: Arc<HealthChecker>,
    metrics: Arc<ProviderMetrics>,
    orchestrator: Arc<Orchestrator>,
}

impl Engine {
    /// Validate `config` and construct every provider it describes.
    ///
    /// A disabled provider that cannot be constructed (for example an unset
    /// API key) is left out with a warning; an enabled one is an error.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let specs = config.validate()?;
        let registry = Arc::new(Registry::new());

        for spec in &specs {
            let provider = match build_provider(spec) {
                Ok(provider) => provider,
                Err(e) if !spec.enabled => {
                    warn!(provider = %spec.name, error = %e, "Skipping disabled provider");
                    continue;
                }
                Err(e) => return Err(e),
            };
            registry.register_with(&spec.name, provider, spec.enabled, spec.priority)?;
        }
        if let Some(default) = &config.default_provider {
            registry.set_default(default)?;
        }

        let health = Arc::new(HealthChecker::new(
            Duration::from_secs(config.health.check_timeout_secs.max(1)),
            Duration::from_secs(config.health.cache_ttl_secs),
        ));
        let metrics = Arc::new(ProviderMetrics::new());
        let router = Router::new(config.routing.clone(), config.fallback_chain.clone());

        let mut orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            router,
            Arc::clone(&health),
            Arc::clone(&metrics),
        );
        for spec in &specs {
            orchestrator = orchestrator.with_policy(&spec.name, spec.policy);
        }

        info!(
            providers = ?registry.list(),
            default = ?registry.default_provider(),
            "Engine ready"
        );

        Ok(Self {
            registry,
            health,
            metrics,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}

/// Construct the backend for one validated spec.
pub fn build_provider(spec: &ProviderSpec) -> Result<Arc<dyn Provider>, ConfigError> {
    Ok(match &spec.settings {
        ProviderSettings::WhisperCpp(settings) => {
            Arc::new(WhisperCliProvider::new(&spec.name, settings.clone()))
        }
        ProviderSettings::OpenAi(settings) | ProviderSettings::WhisperServer(settings) => {
            let flavor = spec
                .settings
                .api_flavor()
                .ok_or_else(|| ConfigError::UnknownProviderType {
                    name: spec.name.clone(),
                    kind: spec.settings.type_tag().to_string(),
                })?;
            Arc::new(RemoteApiProvider::new(&spec.name, flavor, settings.clone())?)
        }
    })
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
