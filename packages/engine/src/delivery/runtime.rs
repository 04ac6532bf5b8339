//! Execution runtimes
//!
//! The runtime factory caches a per-profile delivery config builder and a
//! reader pool per builder, then hands out lightweight runtimes referencing
//! both. Builders select the filter provider by asking each registered
//! provider whether it can serve the binding set.

use super::filter::{ExecutionContext, Filter, XmlReader};
use super::planner::DispatchPlanner;
use super::{ContentDeliveryConfig, ContentHandlerBinding};
use crate::error::{ConfigError, ConfigResult, FilterError};
use crate::sequence::ProfileSet;
use log::debug;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Base-profile key used when no profile set is supplied.
const DEFAULT_PROFILE_KEY: &str = "default";

/// A content filtering strategy. The builder consults each provider in
/// registration order and uses the first that accepts the binding set.
pub trait FilterProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_provider(&self, bindings: &[ContentHandlerBinding]) -> bool;
    fn create_config(
        &self,
        bindings: &[ContentHandlerBinding],
    ) -> ConfigResult<ContentDeliveryConfig>;
}

/// Streaming provider: plans Before/After visitors into dispatch indices.
pub struct SaxNgFilterProvider;

impl FilterProvider for SaxNgFilterProvider {
    fn name(&self) -> &str {
        "sax-ng"
    }

    fn is_provider(&self, bindings: &[ContentHandlerBinding]) -> bool {
        bindings
            .iter()
            .all(|b| !b.handler.capabilities().is_empty())
    }

    fn create_config(
        &self,
        bindings: &[ContentHandlerBinding],
    ) -> ConfigResult<ContentDeliveryConfig> {
        DispatchPlanner::new().plan(bindings)
    }
}

/// Builds and caches delivery configs for one base profile.
pub struct ContentDeliveryConfigBuilder {
    base_profile: String,
    providers: Vec<Arc<dyn FilterProvider>>,
    cache: Mutex<HashMap<String, Arc<ContentDeliveryConfig>>>,
}

impl ContentDeliveryConfigBuilder {
    fn new(base_profile: String, providers: Vec<Arc<dyn FilterProvider>>) -> Self {
        ContentDeliveryConfigBuilder {
            base_profile,
            providers,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_profile(&self) -> &str {
        &self.base_profile
    }

    /// Build (or reuse) the delivery config for a binding set. Configs are
    /// cached per binding fingerprint so every runtime sharing the same
    /// `(profile, bindings)` key sees the same immutable indices.
    pub fn build(
        &self,
        bindings: &[ContentHandlerBinding],
        profiles: Option<&ProfileSet>,
    ) -> ConfigResult<Arc<ContentDeliveryConfig>> {
        let applicable: Vec<ContentHandlerBinding> = bindings
            .iter()
            .filter(|b| b.config.is_target(profiles))
            .cloned()
            .collect();

        let fingerprint = fingerprint(&applicable);
        if let Some(cached) = self.cache.lock().unwrap().get(&fingerprint) {
            return Ok(Arc::clone(cached));
        }

        let provider = self
            .providers
            .iter()
            .find(|p| p.is_provider(&applicable))
            .ok_or_else(|| ConfigError::FactoryInstantiation {
                class_name: "FilterProvider".to_string(),
                message: format!(
                    "no registered provider accepts the {} applicable bindings",
                    applicable.len()
                ),
                config_path: String::new(),
            })?;
        debug!(
            "building delivery config for profile '{}' via provider '{}'",
            self.base_profile,
            provider.name()
        );
        let delivery = Arc::new(provider.create_config(&applicable)?);
        self.cache
            .lock()
            .unwrap()
            .entry(fingerprint)
            .or_insert_with(|| Arc::clone(&delivery));
        Ok(delivery)
    }
}

fn fingerprint(bindings: &[ContentHandlerBinding]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(bindings.len());
    for binding in bindings {
        parts.push(format!(
            "{}#{}#{:?}",
            binding.config.selector(),
            binding.handler.name(),
            binding.handler.capabilities()
        ));
    }
    parts.join("|")
}

struct PoolState {
    idle: Vec<XmlReader>,
    created: usize,
}

/// Bounded blocking pool of readers. `acquire` suspends until a reader is
/// free or the timeout elapses; a discarded reader's slot is recreated on a
/// later acquire.
pub struct ReaderPool {
    state: Mutex<PoolState>,
    available: Condvar,
    capacity: usize,
    timeout: Duration,
}

impl ReaderPool {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        ReaderPool {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                created: 0,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
            timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn acquire(&self) -> Result<PooledReader<'_>, FilterError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(reader) = state.idle.pop() {
                return Ok(PooledReader {
                    pool: self,
                    reader: Some(reader),
                    discard: false,
                });
            }
            if state.created < self.capacity {
                state.created += 1;
                return Ok(PooledReader {
                    pool: self,
                    reader: Some(XmlReader::new()),
                    discard: false,
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FilterError::ReaderAcquisitionTimeout {
                    timeout: self.timeout,
                });
            }
            let (guard, wait) = self.available.wait_timeout(state, remaining).unwrap();
            state = guard;
            if wait.timed_out() && state.idle.is_empty() && state.created >= self.capacity {
                return Err(FilterError::ReaderAcquisitionTimeout {
                    timeout: self.timeout,
                });
            }
        }
    }

    fn release(&self, mut reader: XmlReader, discard: bool) {
        let mut state = self.state.lock().unwrap();
        if discard {
            state.created -= 1;
        } else {
            reader.reset();
            state.idle.push(reader);
        }
        drop(state);
        self.available.notify_one();
    }
}

/// RAII guard over a pooled reader. Dropped readers return to the pool
/// reset; readers marked discarded are dropped for good.
pub struct PooledReader<'a> {
    pool: &'a ReaderPool,
    reader: Option<XmlReader>,
    discard: bool,
}

impl PooledReader<'_> {
    /// Mark the reader as unusable; the pool will grow a replacement.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl std::fmt::Debug for PooledReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledReader")
            .field("reader", &self.reader)
            .field("discard", &self.discard)
            .finish()
    }
}

impl Deref for PooledReader<'_> {
    type Target = XmlReader;

    fn deref(&self) -> &XmlReader {
        self.reader.as_ref().unwrap()
    }
}

impl DerefMut for PooledReader<'_> {
    fn deref_mut(&mut self) -> &mut XmlReader {
        self.reader.as_mut().unwrap()
    }
}

impl Drop for PooledReader<'_> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            self.pool.release(reader, self.discard);
        }
    }
}

/// Caches builders per base profile and reader pools per builder, and
/// produces execution runtimes referencing both.
pub struct EngineRuntimeFactory {
    providers: Vec<Arc<dyn FilterProvider>>,
    builders: Mutex<HashMap<String, Arc<ContentDeliveryConfigBuilder>>>,
    pools: Mutex<HashMap<usize, Arc<ReaderPool>>>,
    pool_capacity: usize,
    pool_timeout: Duration,
}

impl EngineRuntimeFactory {
    pub fn new() -> Self {
        EngineRuntimeFactory {
            providers: vec![Arc::new(SaxNgFilterProvider)],
            builders: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            pool_capacity: 4,
            pool_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_pool(mut self, capacity: usize, timeout: Duration) -> Self {
        self.pool_capacity = capacity;
        self.pool_timeout = timeout;
        self
    }

    /// Providers are consulted in registration order, most recent first.
    pub fn add_provider(&mut self, provider: Arc<dyn FilterProvider>) {
        self.providers.insert(0, provider);
    }

    /// Builder for a base profile; exactly one per key, concurrent callers
    /// included.
    pub fn builder(&self, profiles: Option<&ProfileSet>) -> Arc<ContentDeliveryConfigBuilder> {
        let key = profiles
            .map(|p| p.base_profile.clone())
            .unwrap_or_else(|| DEFAULT_PROFILE_KEY.to_string());
        let mut builders = self.builders.lock().unwrap();
        Arc::clone(builders.entry(key.clone()).or_insert_with(|| {
            Arc::new(ContentDeliveryConfigBuilder::new(
                key,
                self.providers.clone(),
            ))
        }))
    }

    fn pool_for(&self, builder: &Arc<ContentDeliveryConfigBuilder>) -> Arc<ReaderPool> {
        let key = Arc::as_ptr(builder) as usize;
        let mut pools = self.pools.lock().unwrap();
        Arc::clone(pools.entry(key).or_insert_with(|| {
            Arc::new(ReaderPool::new(self.pool_capacity, self.pool_timeout))
        }))
    }

    /// Produce a runtime for one request. The runtime references the cached
    /// delivery config and reader pool; it owns neither.
    pub fn create(
        &self,
        profiles: Option<&ProfileSet>,
        bindings: &[ContentHandlerBinding],
    ) -> ConfigResult<ExecutionRuntime> {
        let builder = self.builder(profiles);
        let delivery = builder.build(bindings, profiles)?;
        let pool = self.pool_for(&builder);
        Ok(ExecutionRuntime { delivery, pool })
    }
}

impl Default for EngineRuntimeFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// One request's view of the engine: shared delivery config plus the shared
/// reader pool.
pub struct ExecutionRuntime {
    delivery: Arc<ContentDeliveryConfig>,
    pool: Arc<ReaderPool>,
}

impl ExecutionRuntime {
    pub fn delivery(&self) -> &ContentDeliveryConfig {
        &self.delivery
    }

    pub fn reader_pool(&self) -> &Arc<ReaderPool> {
        &self.pool
    }

    /// Filter a document, creating a fresh execution context.
    pub fn filter(&self, source: &str, url: &str) -> Result<ExecutionContext, FilterError> {
        let mut context = ExecutionContext::new(&self.delivery);
        self.filter_with(source, url, &mut context)?;
        Ok(context)
    }

    /// Filter a document into an existing execution context. A reader that
    /// fails mid-document is discarded instead of returning to the pool.
    pub fn filter_with(
        &self,
        source: &str,
        url: &str,
        context: &mut ExecutionContext,
    ) -> Result<(), FilterError> {
        let mut reader = self.pool.acquire()?;
        let result = Filter::new(&self.delivery).filter(&mut reader, source, url, context);
        if result.is_err() && !reader.at_document_boundary() {
            reader.discard();
        }
        result
    }
}
