//! Route manager: the active configuration, its table, and assembled pipelines.

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use routeplan_core::{
    load_document, parse_config, save_document, ConfigData, ConversionOptions, ConversionOutput,
    FanOutReport, PipelineTable, PolicyConverter, ReferenceValidator, RouteFanOut,
    ValidationReport,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::assembler::{AssemblyError, PipelineAssembler};
use crate::cache::{spawn_sweeper, AssemblyCache, AssemblyKey, Clock, SweeperHandle, TokioClock};
use crate::config::RuntimeConfig;
use crate::RuntimeError;

/// An activated configuration and everything derived from it. Immutable.
#[derive(Debug)]
pub struct ActiveRoutes {
    pub config: ConfigData,
    pub routes: FanOutReport,
    pub validation: ValidationReport,
    keys: BTreeMap<String, AssemblyKey>,
}

impl ActiveRoutes {
    fn new(config: ConfigData, routes: FanOutReport, validation: ValidationReport) -> Self {
        let keys = config
            .virtual_models
            .keys()
            .map(|id| {
                let key = AssemblyKey::new(id.as_str(), &routes.table.for_virtual_model(id));
                (id.clone(), key)
            })
            .collect();
        Self {
            config,
            routes,
            validation,
            keys,
        }
    }

    pub fn table(&self) -> &PipelineTable {
        &self.routes.table
    }

    /// Cache key of a virtual model's current routes.
    pub fn key(&self, virtual_model_id: &str) -> Option<&AssemblyKey> {
        self.keys.get(virtual_model_id)
    }
}

/// Holds the active routes and assembles pipelines through an external engine.
pub struct RouteManager<A: PipelineAssembler> {
    assembler: A,
    settings: RuntimeConfig,
    validator: ReferenceValidator,
    fan_out: RouteFanOut,
    active: RwLock<Option<Arc<ActiveRoutes>>>,
    // Serializes read-modify-install sequences (load, save)
    reload: Mutex<()>,
    cache: Arc<AssemblyCache<A::Pipeline>>,
}

impl<A: PipelineAssembler> RouteManager<A> {
    pub fn new(assembler: A, settings: RuntimeConfig) -> Self {
        Self::with_clock(assembler, settings, Arc::new(TokioClock))
    }

    /// Create a manager whose cache expires entries on `clock`.
    pub fn with_clock(assembler: A, settings: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = Arc::new(AssemblyCache::with_clock(settings.cache.max_entries, clock));
        Self {
            assembler,
            validator: settings.validator(),
            fan_out: settings.strategy.fan_out(),
            settings,
            active: RwLock::new(None),
            reload: Mutex::new(()),
            cache,
        }
    }

    pub fn settings(&self) -> &RuntimeConfig {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<AssemblyCache<A::Pipeline>> {
        &self.cache
    }

    /// Parse, validate and activate a configuration document.
    ///
    /// Returns the validation report of the activated configuration. With
    /// `require_valid`, a report with errors leaves the previous
    /// configuration active and yields [`RuntimeError::Rejected`].
    pub fn load_value(&self, document: &Value) -> Result<ValidationReport, RuntimeError> {
        let config = parse_config(document)?;
        self.activate(config)
    }

    /// Load a JSON or YAML file, substituting `${ENV_VAR}` placeholders.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ValidationReport, RuntimeError> {
        let path = path.as_ref();
        let document = load_document(path)?;
        let report = self.load_value(&document)?;
        tracing::info!(path = %path.display(), "Loaded route configuration");
        Ok(report)
    }

    /// Write the active configuration (JSON or YAML by extension), refreshing `updatedAt`.
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        let _reload = self.reload.lock();
        let active = self.snapshot()?;
        let mut config = active.config.clone();
        config.touch(Utc::now());
        save_document(path, &config)?;
        self.install(config, active.validation.clone());
        Ok(())
    }

    /// The active routes, if any.
    pub fn current(&self) -> Option<Arc<ActiveRoutes>> {
        self.active.read().clone()
    }

    pub fn current_config(&self) -> Result<ConfigData, RuntimeError> {
        Ok(self.snapshot()?.config.clone())
    }

    pub fn current_table(&self) -> Result<PipelineTable, RuntimeError> {
        Ok(self.snapshot()?.routes.table.clone())
    }

    /// Run fan-out again over the active configuration.
    pub fn generate_table(&self) -> Result<FanOutReport, RuntimeError> {
        let active = self.snapshot()?;
        Ok(self.fan_out.generate(&active.config))
    }

    /// Derive the assembly table and scheduler policy for the active configuration.
    pub fn convert(&self, options: &ConversionOptions) -> Result<ConversionOutput, RuntimeError> {
        let active = self.snapshot()?;
        Ok(PolicyConverter::new().convert(&active.config, options)?)
    }

    /// Cached pipeline for a virtual model, assembling it on a miss.
    pub async fn assemble(&self, virtual_model_id: &str) -> Result<A::Pipeline, RuntimeError> {
        let active = self.snapshot()?;
        self.assemble_in(&active, virtual_model_id).await
    }

    /// Pipelines for every virtual model with at least one entry, assembled concurrently.
    pub async fn assemble_all(&self) -> Result<BTreeMap<String, A::Pipeline>, RuntimeError> {
        let active = self.snapshot()?;
        let ids = active.table().virtual_model_ids();

        let results = join_all(ids.iter().map(|id| {
            let active = &active;
            async move { (id.clone(), self.assemble_in(active, id).await) }
        }))
        .await;

        results
            .into_iter()
            .map(|(id, result)| result.map(|pipeline| (id, pipeline)))
            .collect()
    }

    /// Sweep the assembly cache in the background.
    pub fn start_sweeper(&self) -> SweeperHandle {
        spawn_sweeper(self.cache.clone(), self.settings.cache.sweep_interval)
    }

    async fn assemble_in(
        &self,
        active: &ActiveRoutes,
        virtual_model_id: &str,
    ) -> Result<A::Pipeline, RuntimeError> {
        let key = active
            .key(virtual_model_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownVirtualModel(virtual_model_id.to_string()))?;

        if let Some(pipeline) = self.cache.get(&key) {
            tracing::debug!(virtual_model = %virtual_model_id, "Assembly cache hit");
            return Ok(pipeline);
        }

        let entries = active.table().for_virtual_model(virtual_model_id);
        if entries.is_empty() {
            return Err(AssemblyError::NoEntries(virtual_model_id.to_string()).into());
        }

        let pipeline = self.assembler.assemble(virtual_model_id, &entries).await?;
        self.cache.put(key, pipeline.clone(), self.settings.cache.ttl);
        tracing::debug!(
            virtual_model = %virtual_model_id,
            entries = entries.len(),
            "Assembled pipeline"
        );
        Ok(pipeline)
    }

    fn snapshot(&self) -> Result<Arc<ActiveRoutes>, RuntimeError> {
        self.current().ok_or(RuntimeError::NoConfigurationLoaded)
    }

    fn activate(&self, config: ConfigData) -> Result<ValidationReport, RuntimeError> {
        let _reload = self.reload.lock();
        let report = self.validator.validate(&config);
        if self.settings.require_valid && !report.valid {
            tracing::warn!(
                errors = report.errors.len(),
                "Rejected configuration, keeping previous routes"
            );
            return Err(RuntimeError::Rejected(report));
        }
        for warning in &report.warnings {
            tracing::debug!(%warning, "Configuration warning");
        }

        self.install(config, report.clone());
        Ok(report)
    }

    /// Callers hold `reload`.
    fn install(&self, config: ConfigData, validation: ValidationReport) {
        let routes = self.fan_out.generate(&config);
        for warning in &routes.warnings {
            tracing::warn!(%warning, "Fan-out warning");
        }
        let next = Arc::new(ActiveRoutes::new(config, routes, validation));

        *self.active.write() = Some(next.clone());

        // Keys embed the fingerprint, so anything not current is stale
        let evicted = self
            .cache
            .retain_virtual_models(|key| next.key(&key.virtual_model_id) == Some(key));

        tracing::info!(
            virtual_models = next.config.virtual_models.len(),
            entries = next.routes.table.len(),
            dropped_targets = next.routes.dropped_targets,
            evicted,
            "Activated route configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use async_trait::async_trait;
    use routeplan_core::PipelineEntry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingAssembler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PipelineAssembler for CountingAssembler {
        type Pipeline = Arc<Vec<String>>;

        async fn assemble(
            &self,
            _virtual_model_id: &str,
            entries: &[PipelineEntry],
        ) -> Result<Self::Pipeline, AssemblyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(entries.iter().map(|e| e.id()).collect()))
        }
    }

    fn document() -> Value {
        json!({
            "version": "1.0.0",
            "providers": {
                "openai": {
                    "name": "OpenAI", "type": "openai",
                    "auth": {"type": "apikey", "keys": ["k1", "k2"]},
                    "models": {"gpt-4": {}}
                },
                "anthropic": {
                    "name": "Anthropic", "type": "anthropic",
                    "auth": {"type": "apikey", "keys": ["a1"]},
                    "models": {"claude-3": {}}
                }
            },
            "virtualModels": {
                "default": {"targets": [{"providerId": "openai", "modelId": "gpt-4"}]},
                "thinking": {"targets": [{"providerId": "anthropic", "modelId": "claude-3"}]}
            },
            "updatedAt": "2025-01-01T00:00:00Z"
        })
    }

    fn manager() -> RouteManager<CountingAssembler> {
        RouteManager::new(CountingAssembler::default(), RuntimeConfig::default())
    }

    fn calls(manager: &RouteManager<CountingAssembler>) -> usize {
        manager.assembler.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_nothing_before_load() {
        let manager = manager();
        assert!(matches!(
            manager.generate_table(),
            Err(RuntimeError::NoConfigurationLoaded)
        ));
        assert!(matches!(
            manager.current_table(),
            Err(RuntimeError::NoConfigurationLoaded)
        ));
        assert!(matches!(
            manager.assemble("default").await,
            Err(RuntimeError::NoConfigurationLoaded)
        ));
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_load_activates_table() {
        let manager = manager();
        let report = manager.load_value(&document()).unwrap();
        assert!(report.valid);

        let table = manager.current_table().unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(manager.generate_table().unwrap().table, table);
        assert_eq!(manager.current_config().unwrap().providers.len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected_and_previous_kept() {
        let settings = RuntimeConfig {
            required_virtual_models: vec!["default".to_string()],
            ..RuntimeConfig::default()
        };
        let manager = RouteManager::new(CountingAssembler::default(), settings);
        manager.load_value(&document()).unwrap();

        let mut broken = document();
        broken["virtualModels"].as_object_mut().unwrap().remove("default");
        let err = manager.load_value(&broken).unwrap_err();
        match err {
            RuntimeError::Rejected(report) => assert_eq!(report.errors.len(), 1),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(manager.current_config().unwrap().virtual_models.contains_key("default"));
    }

    #[test]
    fn test_invalid_config_accepted_when_not_required() {
        let settings = RuntimeConfig {
            require_valid: false,
            required_virtual_models: vec!["coding".to_string()],
            ..RuntimeConfig::default()
        };
        let manager = RouteManager::new(CountingAssembler::default(), settings);
        let report = manager.load_value(&document()).unwrap();
        assert!(!report.valid);
        assert_eq!(manager.current_table().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_assemble_is_cached() {
        let manager = manager();
        manager.load_value(&document()).unwrap();

        let first = manager.assemble("default").await.unwrap();
        let second = manager.assemble("default").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(calls(&manager), 1);
        assert_eq!(manager.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_unknown_virtual_model() {
        let manager = manager();
        manager.load_value(&document()).unwrap();
        assert!(matches!(
            manager.assemble("vision").await,
            Err(RuntimeError::UnknownVirtualModel(id)) if id == "vision"
        ));
    }

    #[tokio::test]
    async fn test_reload_invalidates_only_changed_virtual_models() {
        let manager = manager();
        manager.load_value(&document()).unwrap();
        let all = manager.assemble_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(calls(&manager), 2);

        let mut rotated = document();
        rotated["providers"]["openai"]["auth"]["keys"] = json!(["k1", "k3"]);
        rotated["updatedAt"] = json!("2025-02-01T00:00:00Z");
        manager.load_value(&rotated).unwrap();
        assert_eq!(manager.cache().len(), 1);

        manager.assemble_all().await.unwrap();
        assert_eq!(calls(&manager), 3);
    }

    #[tokio::test]
    async fn test_expired_assembly_is_rebuilt() {
        let clock = Arc::new(ManualClock::new());
        let manager = RouteManager::with_clock(
            CountingAssembler::default(),
            RuntimeConfig::default(),
            clock.clone(),
        );
        manager.load_value(&document()).unwrap();

        manager.assemble("thinking").await.unwrap();
        clock.advance(manager.settings().cache.ttl + Duration::from_secs(1));
        manager.assemble("thinking").await.unwrap();
        assert_eq!(calls(&manager), 2);
    }

    #[tokio::test]
    async fn test_virtual_model_without_entries() {
        let manager = manager();
        let mut doc = document();
        doc["virtualModels"]["vision"] = json!({"targets": [{"providerId": "ghost", "modelId": "x"}]});
        // ghost provider is a validation error
        assert!(manager.load_value(&doc).is_err());

        let manager = RouteManager::new(
            CountingAssembler::default(),
            RuntimeConfig {
                require_valid: false,
                ..RuntimeConfig::default()
            },
        );
        manager.load_value(&doc).unwrap();
        assert!(matches!(
            manager.assemble("vision").await,
            Err(RuntimeError::Assembly(AssemblyError::NoEntries(_)))
        ));
        assert_eq!(manager.assemble_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!(
            "routeplan-manager-{}.json",
            std::process::id()
        ));
        let manager = manager();
        manager.load_value(&document()).unwrap();
        manager.assemble("default").await.unwrap();
        let before = manager.current_config().unwrap().updated_at;

        manager.save_file(&path).unwrap();
        let after = manager.current_config().unwrap().updated_at;
        assert!(after > before);
        // timestamps are not part of the fingerprint
        assert_eq!(manager.cache().len(), 1);

        let reloaded = manager_from_file(&path);
        assert_eq!(reloaded.current_config().unwrap().updated_at, after);
        assert_eq!(reloaded.current_table().unwrap().len(), 3);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_save_does_not_revert_concurrent_load() {
        let path = std::env::temp_dir().join(format!(
            "routeplan-manager-race-{}.json",
            std::process::id()
        ));
        let manager = manager();
        manager.load_value(&document()).unwrap();

        let generations = 50;
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for generation in 1..=generations {
                    let mut doc = document();
                    doc["version"] = json!(format!("1.0.{}", generation));
                    manager.load_value(&doc).unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..generations {
                    manager.save_file(&path).unwrap();
                }
            });
        });

        assert_eq!(
            manager.current_config().unwrap().version,
            format!("1.0.{}", generations)
        );
        std::fs::remove_file(&path).ok();
    }

    fn manager_from_file(path: &Path) -> RouteManager<CountingAssembler> {
        let manager = manager();
        manager.load_file(path).unwrap();
        manager
    }

    #[test]
    fn test_convert_uses_active_config() {
        let manager = manager();
        assert!(matches!(
            manager.convert(&ConversionOptions::default()),
            Err(RuntimeError::NoConfigurationLoaded)
        ));
        manager.load_value(&document()).unwrap();
        let output = manager.convert(&ConversionOptions::default()).unwrap();
        assert_eq!(output.assembly_config.module_registry.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sweeper_uses_configured_interval() {
        let manager = manager();
        manager.load_value(&document()).unwrap();
        manager.assemble("default").await.unwrap();

        let handle = manager.start_sweeper();
        let ttl = manager.settings().cache.ttl;
        tokio::time::sleep(ttl + manager.settings().cache.sweep_interval).await;
        assert!(manager.cache().is_empty());
        handle.shutdown().await;
    }
}
