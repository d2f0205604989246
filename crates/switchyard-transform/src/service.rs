//! Transformer registry and per-provider chain cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::Value;
use switchyard_config::{Config, ProviderConfig, TransformerSpec};
use switchyard_observability::{record_transform_outcome, transform_span, Direction};
use tracing::{debug, info, Instrument};

use crate::error::{Result, TransformError};
use crate::payload::{ProviderResponse, RequestPayload};
use crate::transformer::{Transformer, TransformerChain};

/// Names appended after the provider's own transformer in a default chain
pub const DEFAULT_CHAIN_TAIL: [&str; 3] = ["maxtoken", "parameters", "tool"];

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

struct CacheEntry {
    chain: Arc<TransformerChain>,
    last_access: AtomicU64,
}

#[derive(Default)]
struct ServiceState {
    transformers: HashMap<String, Arc<dyn Transformer>>,
    chains: HashMap<String, CacheEntry>,
    providers: HashMap<String, ProviderConfig>,
}

/// Owns registered transformers and assembles cached per-provider chains.
///
/// Safe to share across any number of concurrent requests. Lookups take the
/// shared lock; registration and cache inserts take the exclusive lock.
pub struct TransformerService {
    state: RwLock<ServiceState>,
    capacity: usize,
    clock: AtomicU64,
}

impl Default for TransformerService {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

fn chain_key(provider: &str) -> String {
    format!("provider:{}", provider)
}

impl TransformerService {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(ServiceState::default()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    /// Empty service sized and seeded with the providers from `config`
    pub fn from_config(config: &Config) -> Self {
        let service = Self::new(config.engine.chain_cache_capacity);
        {
            let mut state = service.state.write();
            for provider in &config.providers {
                state.providers.insert(provider.name.clone(), provider.clone());
            }
        }
        service
    }

    /// Service with every built-in transformer registered.
    ///
    /// An error here is a programming defect; callers abort startup on it.
    pub fn with_builtins(config: &Config) -> Result<Self> {
        let service = Self::from_config(config);
        crate::registry::register_builtin_transformers(&service, config)?;
        Ok(service)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a transformer under its name. The first registration wins.
    pub fn register(&self, transformer: Arc<dyn Transformer>) -> Result<()> {
        let name = transformer.name().to_string();
        let mut state = self.state.write();
        if state.transformers.contains_key(&name) {
            return Err(TransformError::DuplicateTransformer(name));
        }
        debug!(transformer = %name, endpoint = ?transformer.endpoint(), "registered transformer");
        state.transformers.insert(name, transformer);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Transformer>> {
        self.state
            .read()
            .transformers
            .get(name)
            .cloned()
            .ok_or_else(|| TransformError::TransformerNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().transformers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().transformers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every transformer serving `endpoint`, sorted by name.
    ///
    /// Transformers without an endpoint are grouped under `""`.
    pub fn get_by_endpoint(&self, endpoint: &str) -> Vec<Arc<dyn Transformer>> {
        let mut matches: Vec<Arc<dyn Transformer>> = self
            .state
            .read()
            .transformers
            .values()
            .filter(|t| t.endpoint().unwrap_or("") == endpoint)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name().cmp(b.name()));
        matches
    }

    /// Build a chain from configured specs.
    ///
    /// Specs with options get a dedicated instance from
    /// [`Transformer::with_options`]; the rest share the registered one.
    pub fn create_chain(&self, specs: &[TransformerSpec]) -> Result<TransformerChain> {
        let mut chain = TransformerChain::default();
        for spec in specs {
            let transformer = self.get(&spec.name)?;
            let transformer = if spec.options.is_empty() {
                transformer
            } else {
                transformer.with_options(&spec.options)?.unwrap_or(transformer)
            };
            chain.push(transformer);
        }
        Ok(chain)
    }

    pub fn create_chain_from_names<S: AsRef<str>>(&self, names: &[S]) -> Result<TransformerChain> {
        let mut chain = TransformerChain::default();
        for name in names {
            chain.push(self.get(name.as_ref())?);
        }
        Ok(chain)
    }

    /// Provider transformer followed by the common tail, skipping anything
    /// not registered.
    pub fn default_chain(&self, provider: &str) -> TransformerChain {
        let state = self.state.read();
        let transformers = std::iter::once(provider)
            .chain(DEFAULT_CHAIN_TAIL)
            .filter_map(|name| state.transformers.get(name).cloned())
            .collect();
        TransformerChain::new(transformers)
    }

    fn build_chain(&self, provider: &str) -> Result<TransformerChain> {
        let specs = self
            .state
            .read()
            .providers
            .get(provider)
            .map(|p| p.transformers.clone())
            .unwrap_or_default();
        if specs.is_empty() {
            Ok(self.default_chain(provider))
        } else {
            self.create_chain(&specs)
        }
    }

    /// Cached chain for `provider`, built on first use.
    pub fn get_or_create_chain(&self, provider: &str) -> Result<Arc<TransformerChain>> {
        let key = chain_key(provider);
        if let Some(entry) = self.state.read().chains.get(&key) {
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            return Ok(Arc::clone(&entry.chain));
        }

        let built = Arc::new(self.build_chain(provider)?);

        let mut state = self.state.write();
        if let Some(entry) = state.chains.get(&key) {
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            return Ok(Arc::clone(&entry.chain));
        }
        while state.chains.len() >= self.capacity {
            let oldest = state
                .chains
                .iter()
                .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else { break };
            debug!(key = %oldest, "evicting least recently used chain");
            state.chains.remove(&oldest);
        }
        debug!(provider, chain = ?built.names(), "cached transformer chain");
        state.chains.insert(
            key,
            CacheEntry {
                chain: Arc::clone(&built),
                last_access: AtomicU64::new(self.tick()),
            },
        );
        Ok(built)
    }

    /// Replace a provider's configuration and drop its cached chain
    pub fn configure_provider(&self, provider: ProviderConfig) {
        let mut state = self.state.write();
        state.chains.remove(&chain_key(&provider.name));
        info!(provider = %provider.name, transformers = provider.transformers.len(), "provider configured");
        state.providers.insert(provider.name.clone(), provider);
    }

    pub fn cache_len(&self) -> usize {
        self.state.read().chains.len()
    }

    /// Providers with a cached chain, sorted
    pub fn cached_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self
            .state
            .read()
            .chains
            .keys()
            .filter_map(|key| key.strip_prefix("provider:").map(str::to_string))
            .collect();
        providers.sort();
        providers
    }

    pub fn clear_cache(&self) {
        self.state.write().chains.clear();
    }

    /// Run a canonical request through the provider's chain
    pub fn transform_request(&self, provider: &str, body: Value) -> Result<RequestPayload> {
        let span = transform_span(provider, Direction::Request);
        let _entered = span.enter();
        let start = Instant::now();

        let result = self
            .get_or_create_chain(provider)
            .and_then(|chain| chain.transform_request_in(RequestPayload::Body(body), provider));
        record_transform_outcome(provider, Direction::Request, start.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    /// Run a vendor response, buffered or streaming, back through the chain
    pub async fn transform_response(&self, provider: &str, response: ProviderResponse) -> Result<ProviderResponse> {
        let span = transform_span(provider, Direction::Response);
        async move {
            let start = Instant::now();
            let result = match self.get_or_create_chain(provider) {
                Ok(chain) => chain.transform_response_out(response).await,
                Err(e) => Err(e),
            };
            record_transform_outcome(provider, Direction::Response, start.elapsed(), result.as_ref().map(|_| ()));
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct Named {
        name: &'static str,
        endpoint: Option<&'static str>,
        tag: Option<String>,
    }

    impl Named {
        fn new(name: &'static str) -> Arc<dyn Transformer> {
            Arc::new(Self {
                name,
                endpoint: None,
                tag: None,
            })
        }

        fn at(name: &'static str, endpoint: &'static str) -> Arc<dyn Transformer> {
            Arc::new(Self {
                name,
                endpoint: Some(endpoint),
                tag: None,
            })
        }
    }

    #[async_trait]
    impl Transformer for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn endpoint(&self) -> Option<&str> {
            self.endpoint
        }

        fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
            let tag = self.tag.clone().unwrap_or_else(|| self.name.to_string());
            request.map_body(|mut body| {
                if let Some(trace) = body["trace"].as_array_mut() {
                    trace.push(json!(tag));
                }
                Ok(body)
            })
        }

        fn with_options(&self, options: &Map<String, Value>) -> Result<Option<Arc<dyn Transformer>>> {
            Ok(options.get("tag").and_then(Value::as_str).map(|tag| {
                Arc::new(Self {
                    name: self.name,
                    endpoint: self.endpoint,
                    tag: Some(tag.to_string()),
                }) as Arc<dyn Transformer>
            }))
        }
    }

    fn trace_of(service: &TransformerService, provider: &str) -> Value {
        service
            .transform_request(provider, json!({"trace": []}))
            .unwrap()
            .into_body()["trace"]
            .clone()
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let service = TransformerService::default();
        service.register(Named::at("a", "/first")).unwrap();
        let err = service.register(Named::at("a", "/second")).unwrap_err();

        assert!(matches!(err, TransformError::DuplicateTransformer(ref n) if n == "a"));
        assert_eq!(service.get("a").unwrap().endpoint(), Some("/first"));
        assert!(matches!(service.get("b"), Err(TransformError::TransformerNotFound(_))));
    }

    #[test]
    fn test_endpoint_grouping() {
        let service = TransformerService::default();
        service.register(Named::at("b", "/v1/messages")).unwrap();
        service.register(Named::at("a", "/v1/messages")).unwrap();
        service.register(Named::new("c")).unwrap();
        service.register(Named::new("d")).unwrap();

        let names = |ts: Vec<Arc<dyn Transformer>>| ts.iter().map(|t| t.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(service.get_by_endpoint("/v1/messages")), vec!["a", "b"]);
        assert_eq!(names(service.get_by_endpoint("")), vec!["c", "d"]);
        assert!(service.get_by_endpoint("/nothing").is_empty());
        assert_eq!(service.list(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_default_chain_skips_unregistered() {
        let service = TransformerService::default();
        for name in ["acme", "maxtoken", "tool"] {
            service.register(Named::new(name)).unwrap();
        }
        assert_eq!(trace_of(&service, "acme"), json!(["acme", "maxtoken", "tool"]));
        assert_eq!(trace_of(&service, "other"), json!(["maxtoken", "tool"]));
    }

    #[test]
    fn test_configured_chain_applies_options() {
        let mut config = Config::default();
        config.providers.push(
            ProviderConfig::new("acme")
                .with_transformer(TransformerSpec::new("x"))
                .with_transformer(TransformerSpec::new("y").with_option("tag", json!("y-custom"))),
        );
        let service = TransformerService::from_config(&config);
        service.register(Named::new("x")).unwrap();
        service.register(Named::new("y")).unwrap();

        assert_eq!(trace_of(&service, "acme"), json!(["x", "y-custom"]));

        service.configure_provider(ProviderConfig::new("acme").with_transformer(TransformerSpec::new("z")));
        let err = service.transform_request("acme", json!({"trace": []})).unwrap_err();
        assert_eq!(err.to_string(), "transformer not found: z");
    }

    #[test]
    fn test_lru_eviction() {
        let service = TransformerService::new(2);
        let a = service.get_or_create_chain("a").unwrap();
        service.get_or_create_chain("b").unwrap();

        let again = service.get_or_create_chain("a").unwrap();
        assert!(Arc::ptr_eq(&a, &again));

        service.get_or_create_chain("c").unwrap();
        assert_eq!(service.cache_len(), 2);
        assert_eq!(service.cached_providers(), vec!["a", "c"]);

        service.clear_cache();
        assert_eq!(service.cache_len(), 0);
    }

    #[test]
    fn test_chain_from_names() {
        let service = TransformerService::default();
        for name in ["x", "y"] {
            service.register(Named::new(name)).unwrap();
        }
        let chain = service.create_chain_from_names(&["y", "x"]).unwrap();
        assert_eq!(chain.names(), vec!["y", "x"]);

        let err = service.create_chain_from_names(&["x", "missing"]).unwrap_err();
        assert!(matches!(err, TransformError::TransformerNotFound(ref n) if n == "missing"));
    }

    #[test]
    fn test_concurrent_lookups_share_one_chain() {
        let service = TransformerService::default();
        service.register(Named::new("acme")).unwrap();

        let chains: Vec<Arc<TransformerChain>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| service.get_or_create_chain("acme").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(service.cache_len(), 1);
        let cached = service.get_or_create_chain("acme").unwrap();
        assert!(chains.iter().all(|chain| Arc::ptr_eq(chain, &cached)));
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let service = TransformerService::new(4);
        std::thread::scope(|scope| {
            for i in 0..32 {
                let service = &service;
                scope.spawn(move || {
                    service.get_or_create_chain(&format!("p{}", i % 12)).unwrap();
                    assert!(service.cache_len() <= 4);
                });
            }
        });
        assert_eq!(service.cache_len(), 4);
    }
}
