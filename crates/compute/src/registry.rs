//! Registry of analysis algorithms served by one process.
//!
//! Startup code registers [`AlgorithmDescriptor`]s and [`Initializer`]s on
//! an [`AlgorithmRegistry`], then freezes it. Freezing runs the
//! initializers, sizes the shared [`JobSlotPool`] from the configuration
//! and wraps every algorithm in [`SlotGuarded`]. The frozen
//! [`Handlers`] set is read-only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tilestat_core::{ComputeOptions, Config, ParamSpec};
use tracing::{debug, info};

use crate::algorithm::{Algorithm, AlgorithmError, AlgorithmMeta, AlgorithmOutput};
use crate::engine::ExecutionEngine;
use crate::jobs::{JobSlotPool, PoolSnapshot, SlotGuarded};

type Factory = Arc<dyn Fn() -> Box<dyn Algorithm> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("algorithm {path:?} is missing its {field}")]
    MissingField { path: String, field: &'static str },

    #[error("algorithm path {0:?} must start with '/'")]
    InvalidPath(String),

    #[error("algorithm path {0:?} is already registered")]
    DuplicatePath(String),

    #[error("initializer {name} failed: {reason}")]
    Initializer { name: String, reason: String },
}

/// Whether one instance serves every request or each request gets its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Instancing {
    Singleton,
    PerRequest,
}

/// Public description of a registered algorithm.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmInfo {
    pub path: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub instancing: Instancing,
}

/// Everything needed to serve one algorithm.
pub struct AlgorithmDescriptor {
    info: AlgorithmInfo,
    factory: Factory,
}

impl AlgorithmDescriptor {
    /// Describe `T` from its static metadata. `factory` builds a fresh,
    /// not yet configured instance.
    pub fn of<T, F>(factory: F) -> Self
    where
        T: Algorithm + AlgorithmMeta + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let instancing = if T::SINGLETON {
            Instancing::Singleton
        } else {
            Instancing::PerRequest
        };
        Self {
            info: AlgorithmInfo {
                path: T::PATH,
                name: T::NAME,
                description: T::DESCRIPTION,
                params: T::PARAMS,
                instancing,
            },
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Algorithm>),
        }
    }

    pub fn info(&self) -> &AlgorithmInfo {
        &self.info
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let path = self.info.path;
        let missing = |field| RegistryError::MissingField {
            path: path.to_string(),
            field,
        };
        if path.is_empty() {
            return Err(missing("path"));
        }
        if self.info.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if self.info.description.trim().is_empty() {
            return Err(missing("description"));
        }
        if !path.starts_with('/') {
            return Err(RegistryError::InvalidPath(path.to_string()));
        }
        Ok(())
    }
}

/// One-time process setup run before any algorithm is served.
pub trait Initializer: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self, config: &Config) -> Result<(), RegistryError>;
}

struct InitializerEntry {
    initializer: Box<dyn Initializer>,
    done: bool,
}

/// Mutable registry used during startup.
#[derive(Default)]
pub struct AlgorithmRegistry {
    descriptors: Vec<AlgorithmDescriptor>,
    initializers: Vec<InitializerEntry>,
    pool: Arc<JobSlotPool>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose handlers share an existing pool.
    pub fn with_pool(pool: Arc<JobSlotPool>) -> Self {
        Self {
            pool,
            ..Self::default()
        }
    }

    pub fn register(&mut self, descriptor: AlgorithmDescriptor) -> Result<(), RegistryError> {
        descriptor.validate()?;
        let path = descriptor.info.path;
        if self.descriptors.iter().any(|d| d.info.path == path) {
            return Err(RegistryError::DuplicatePath(path.to_string()));
        }
        debug!(path, name = descriptor.info.name, "registered algorithm");
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn add_initializer(&mut self, initializer: impl Initializer + 'static) {
        self.initializers.push(InitializerEntry {
            initializer: Box::new(initializer),
            done: false,
        });
    }

    /// Run every initializer that has not run yet, in registration order.
    pub fn run_initializers(&mut self, config: &Config) -> Result<(), RegistryError> {
        for entry in &mut self.initializers {
            let name = entry.initializer.name();
            if entry.done {
                debug!(initializer = name, "already initialized, skipping");
                continue;
            }
            info!(initializer = name, "running initializer");
            entry.initializer.init(config)?;
            entry.done = true;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Finish startup and produce the read-only handler set.
    pub fn freeze(
        mut self,
        config: &Config,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Result<Handlers, RegistryError> {
        self.run_initializers(config)?;
        self.pool.configure(config.jobs.max_concurrent_jobs);

        let mut by_path = HashMap::with_capacity(self.descriptors.len());
        let mut order = Vec::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            let AlgorithmDescriptor { info, factory } = descriptor;
            let algorithm: Arc<dyn Algorithm> = match info.instancing {
                Instancing::Singleton => {
                    Arc::from(prepare(factory(), config, &engine))
                }
                Instancing::PerRequest => Arc::new(PerRequest {
                    factory,
                    config: config.clone(),
                    engine: Arc::clone(&engine),
                }),
            };
            let guarded = SlotGuarded::new(
                info.path,
                algorithm,
                Arc::clone(&self.pool),
                Arc::clone(&engine),
            );
            order.push(info.path);
            by_path.insert(info.path, Arc::new(Handler { info, guarded }));
        }

        info!(
            algorithms = order.len(),
            max_concurrent_jobs = config.jobs.max_concurrent_jobs,
            "algorithm registry frozen"
        );
        Ok(Handlers {
            by_path,
            order,
            pool: self.pool,
        })
    }
}

/// Hand the instance its configuration and engine, if it asks for them.
fn prepare(
    mut algorithm: Box<dyn Algorithm>,
    config: &Config,
    engine: &Arc<dyn ExecutionEngine>,
) -> Box<dyn Algorithm> {
    if let Some(configurable) = algorithm.configurable() {
        configurable.set_config(config);
    }
    if let Some(engine_aware) = algorithm.engine_aware() {
        engine_aware.set_engine(Arc::clone(engine));
    }
    algorithm
}

/// Builds a fresh instance for every call.
struct PerRequest {
    factory: Factory,
    config: Config,
    engine: Arc<dyn ExecutionEngine>,
}

impl Algorithm for PerRequest {
    fn calc(&self, options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
        prepare((self.factory)(), &self.config, &self.engine).calc(options)
    }
}

/// A registered algorithm behind its job-slot guard.
pub struct Handler {
    info: AlgorithmInfo,
    guarded: SlotGuarded<dyn Algorithm>,
}

impl Handler {
    pub fn info(&self) -> &AlgorithmInfo {
        &self.info
    }

    pub fn calc(&self, options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
        self.guarded.calc(options)
    }
}

/// Read-only set of handlers sharing one job slot pool.
pub struct Handlers {
    by_path: HashMap<&'static str, Arc<Handler>>,
    order: Vec<&'static str>,
    pool: Arc<JobSlotPool>,
}

impl Handlers {
    pub fn get(&self, path: &str) -> Option<Arc<Handler>> {
        self.by_path.get(path).cloned()
    }

    /// Descriptions of every handler in registration order.
    pub fn capabilities(&self) -> Vec<&AlgorithmInfo> {
        self.order
            .iter()
            .filter_map(|path| self.by_path.get(path))
            .map(|h| h.info())
            .collect()
    }

    pub fn pool(&self) -> &Arc<JobSlotPool> {
        &self.pool
    }

    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::engine::LocalEngine;

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Echo {
        max_jobs: usize,
        has_engine: bool,
    }

    impl Algorithm for Echo {
        fn calc(&self, _options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
            Ok(AlgorithmOutput::new(json!({
                "max_jobs": self.max_jobs,
                "has_engine": self.has_engine,
            })))
        }

        fn configurable(&mut self) -> Option<&mut dyn crate::algorithm::Configurable> {
            Some(self)
        }

        fn engine_aware(&mut self) -> Option<&mut dyn crate::algorithm::EngineAware> {
            Some(self)
        }
    }

    impl crate::algorithm::Configurable for Echo {
        fn set_config(&mut self, config: &Config) {
            self.max_jobs = config.jobs.max_concurrent_jobs;
        }
    }

    impl crate::algorithm::EngineAware for Echo {
        fn set_engine(&mut self, _engine: Arc<dyn ExecutionEngine>) {
            self.has_engine = true;
        }
    }

    impl AlgorithmMeta for Echo {
        const PATH: &'static str = "/echo";
        const NAME: &'static str = "Echo";
        const DESCRIPTION: &'static str = "Returns its own configuration";
    }

    struct Counted;

    impl Algorithm for Counted {
        fn calc(&self, _options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
            Ok(AlgorithmOutput::new(json!(null)))
        }
    }

    impl AlgorithmMeta for Counted {
        const PATH: &'static str = "/counted";
        const NAME: &'static str = "Counted";
        const DESCRIPTION: &'static str = "Counts constructions";
        const SINGLETON: bool = true;
    }

    struct Unnamed;

    impl Algorithm for Unnamed {
        fn calc(&self, _options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
            Ok(AlgorithmOutput::new(json!(null)))
        }
    }

    impl AlgorithmMeta for Unnamed {
        const PATH: &'static str = "no-slash";
        const NAME: &'static str = "";
        const DESCRIPTION: &'static str = "Missing a name";
    }

    struct Relative;

    impl Algorithm for Relative {
        fn calc(&self, _options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
            Ok(AlgorithmOutput::new(json!(null)))
        }
    }

    impl AlgorithmMeta for Relative {
        const PATH: &'static str = "relative";
        const NAME: &'static str = "Relative";
        const DESCRIPTION: &'static str = "Path without a leading slash";
    }

    struct CountingInit {
        runs: Arc<AtomicUsize>,
    }

    impl Initializer for CountingInit {
        fn name(&self) -> &str {
            "counting"
        }

        fn init(&self, _config: &Config) -> Result<(), RegistryError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine() -> Arc<dyn ExecutionEngine> {
        Arc::new(LocalEngine::new(2).unwrap())
    }

    fn config(max_jobs: usize) -> Config {
        let mut config = Config::default();
        config.jobs.max_concurrent_jobs = max_jobs;
        config
    }

    #[test]
    fn invalid_descriptors_are_rejected() {
        let mut registry = AlgorithmRegistry::new();

        let err = registry.register(AlgorithmDescriptor::of(|| Unnamed)).unwrap_err();
        assert!(matches!(err, RegistryError::MissingField { field: "name", .. }));

        let err = registry.register(AlgorithmDescriptor::of(|| Relative)).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPath(p) if p == "relative"));

        registry.register(AlgorithmDescriptor::of(Echo::default)).unwrap();
        let err = registry.register(AlgorithmDescriptor::of(Echo::default)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicatePath(p) if p == "/echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capabilities_are_wired_before_calc() {
        let mut registry = AlgorithmRegistry::new();
        registry.register(AlgorithmDescriptor::of(Echo::default)).unwrap();
        let handlers = registry.freeze(&config(3), engine()).unwrap();

        let handler = handlers.get("/echo").unwrap();
        let output = handler.calc(&ComputeOptions::default()).unwrap();
        assert_eq!(output.results, json!({"max_jobs": 3, "has_engine": true}));
        assert_eq!(handler.info().instancing, Instancing::PerRequest);
        assert_eq!(handlers.pool().capacity(), 3);
    }

    #[test]
    fn singletons_are_built_once() {
        let mut registry = AlgorithmRegistry::new();
        registry
            .register(AlgorithmDescriptor::of(|| {
                BUILT.fetch_add(1, Ordering::SeqCst);
                Counted
            }))
            .unwrap();
        let handlers = registry.freeze(&config(2), engine()).unwrap();
        let handler = handlers.get("/counted").unwrap();

        for _ in 0..3 {
            handler.calc(&ComputeOptions::default()).unwrap();
        }
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn initializers_run_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = AlgorithmRegistry::new();
        registry.add_initializer(CountingInit {
            runs: Arc::clone(&runs),
        });

        registry.run_initializers(&config(1)).unwrap();
        registry.run_initializers(&config(1)).unwrap();
        let _handlers = registry.freeze(&config(1), engine()).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_share_one_pool() {
        let mut registry = AlgorithmRegistry::new();
        registry.register(AlgorithmDescriptor::of(Echo::default)).unwrap();
        registry.register(AlgorithmDescriptor::of(|| Counted)).unwrap();
        let handlers = registry.freeze(&config(1), engine()).unwrap();

        let lease = handlers.pool().try_acquire().unwrap();
        for path in ["/echo", "/counted"] {
            let err = handlers
                .get(path)
                .unwrap()
                .calc(&ComputeOptions::default())
                .unwrap_err();
            assert!(matches!(err, AlgorithmError::Busy(_)));
        }
        drop(lease);

        let names: Vec<&str> = handlers.capabilities().iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Echo", "Counted"]);
    }
}
