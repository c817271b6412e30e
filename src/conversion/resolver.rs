//! Lowest-cost conversion path search
//!
//! Resolution order for `resolve(from, to)`:
//! 1. same type: identity path
//! 2. a registered direct rule
//! 3. the type hierarchy: generalization to an ancestor, specialization to a
//!    descendant
//! 4. a two-hop search through exactly one intermediate type (rule targets,
//!    ancestors and descendants of `from`), rejecting any
//!    candidate whose total cost exceeds [`MAX_PATH_COST`]
//!
//! Found paths are memoized per `(from, to)`. Registering a rule evicts every
//! cached path that has either endpoint of the rule as an endpoint or passes
//! through it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use moka::sync::Cache;

use super::{ConversionError, ConversionPath, ConversionRule, ConversionStrategy, PreservationLevel};
use crate::registry::TypeRegistry;

/// Ceiling on the total cost of a multi-hop path
pub const MAX_PATH_COST: f64 = 5.0;

/// Cost of moving to a declared ancestor
pub const GENERALIZATION_COST: f64 = 1.0;

/// Cost of moving to a declared descendant
pub const SPECIALIZATION_COST: f64 = 2.0;

const SPECIALIZATION_WARNING: &str = "Specialization may require additional data";
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

type PathKey = (String, String);

/// Finds and caches conversion paths between types
pub struct ConversionPathResolver {
    registry: Arc<dyn TypeRegistry>,
    rules: RwLock<BTreeMap<PathKey, ConversionRule>>,
    cache: Cache<PathKey, ConversionPath>,
    generation: AtomicU64,
}

impl ConversionPathResolver {
    pub fn new(registry: Arc<dyn TypeRegistry>) -> Self {
        Self::with_cache_config(registry, DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a resolver with custom cache configuration
    ///
    /// # Arguments
    ///
    /// * `registry` - Type registry used for hierarchy lookups
    /// * `ttl` - Time-to-live for cached paths
    /// * `max_capacity` - Maximum number of cached paths
    pub fn with_cache_config(
        registry: Arc<dyn TypeRegistry>,
        ttl: Duration,
        max_capacity: u64,
    ) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();

        Self {
            registry,
            rules: RwLock::new(BTreeMap::new()),
            cache,
            generation: AtomicU64::new(0),
        }
    }

    /// Register or replace the rule keyed by `(rule.from_type, rule.to_type)`
    ///
    /// # Errors
    ///
    /// Returns `ConversionError` if the cost is negative or not finite, or if
    /// the rule maps a type onto itself.
    pub fn register_rule(&self, rule: ConversionRule) -> Result<(), ConversionError> {
        if !rule.cost.is_finite() || rule.cost < 0.0 {
            return Err(ConversionError::InvalidCost {
                from: rule.from_type,
                to: rule.to_type,
                cost: rule.cost,
            });
        }
        if rule.from_type == rule.to_type {
            return Err(ConversionError::SelfConversion(rule.from_type));
        }

        let from = rule.from_type.clone();
        let to = rule.to_type.clone();
        {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            self.generation.fetch_add(1, Ordering::SeqCst);
            rules.insert((from.clone(), to.clone()), rule);
        }

        let evicted = self.invalidate_touching(&[from.as_str(), to.as_str()]);
        tracing::debug!(from = %from, to = %to, evicted, "Registered conversion rule");
        Ok(())
    }

    /// Register many rules, stopping at the first invalid one
    ///
    /// # Errors
    ///
    /// Returns the first `ConversionError` encountered.
    pub fn register_rules(
        &self,
        rules: impl IntoIterator<Item = ConversionRule>,
    ) -> Result<(), ConversionError> {
        rules.into_iter().try_for_each(|rule| self.register_rule(rule))
    }

    /// All registered rules ordered by `(from, to)`
    #[must_use]
    pub fn rules(&self) -> Vec<ConversionRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Find the lowest-cost path from `from` to `to`
    ///
    /// Returns `None` when no rule combination connects the types.
    pub fn resolve(&self, from: &str, to: &str) -> Option<ConversionPath> {
        if from == to {
            return Some(ConversionPath::identity(from));
        }

        let key = (from.to_string(), to.to_string());
        if let Some(path) = self.cache.get(&key) {
            return Some(path);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let path = self.search(from, to)?;

        // Registration bumps the generation under the write lock and evicts
        // after releasing it, so holding the read lock here orders the insert
        // either before that eviction or after a visible bump.
        let _rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) == generation {
            self.cache.insert(key, path.clone());
        }
        Some(path)
    }

    /// Drop every cached path
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Number of cached paths
    #[must_use]
    pub fn cached_paths(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    fn search(&self, from: &str, to: &str) -> Option<ConversionPath> {
        if let Some(step) = self.single_step(from, to) {
            return Some(ConversionPath::from_steps(from, to, vec![step]));
        }
        self.two_hop(from, to)
    }

    /// A direct rule, or failing that a hierarchical step
    fn single_step(&self, from: &str, to: &str) -> Option<ConversionRule> {
        self.direct_rule(from, to)
            .or_else(|| self.hierarchical_step(from, to))
    }

    fn direct_rule(&self, from: &str, to: &str) -> Option<ConversionRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(from.to_string(), to.to_string()))
            .cloned()
    }

    fn hierarchical_step(&self, from: &str, to: &str) -> Option<ConversionRule> {
        if self.registry.is_ancestor(to, from) {
            let mut rule = ConversionRule::direct(from, to, GENERALIZATION_COST);
            rule.strategy = ConversionStrategy::Hierarchical;
            return Some(rule);
        }
        if self.registry.is_ancestor(from, to) {
            let mut rule = ConversionRule::direct(from, to, SPECIALIZATION_COST)
                .with_preservation(PreservationLevel::Strict)
                .with_warning(SPECIALIZATION_WARNING);
            rule.strategy = ConversionStrategy::Hierarchical;
            return Some(rule);
        }
        None
    }

    /// Cheapest path through exactly one intermediate type
    fn two_hop(&self, from: &str, to: &str) -> Option<ConversionPath> {
        let mut intermediates: BTreeSet<String> = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .range((from.to_string(), String::new())..)
            .take_while(|((source, _), _)| source == from)
            .map(|((_, target), _)| target.clone())
            .collect();
        intermediates.extend(self.registry.ancestors(from));
        intermediates.extend(
            self.registry
                .list_types()
                .into_iter()
                .filter(|t| self.registry.is_ancestor(from, &t.id))
                .map(|t| t.id),
        );
        intermediates.remove(to);
        intermediates.remove(from);

        let mut best: Option<ConversionPath> = None;
        for mid in &intermediates {
            let Some(first) = self.single_step(from, mid) else {
                continue;
            };
            let Some(second) = self.single_step(mid, to) else {
                continue;
            };
            let candidate = ConversionPath::from_steps(from, to, vec![first, second]);
            if candidate.total_cost > MAX_PATH_COST {
                continue;
            }
            if best
                .as_ref()
                .is_none_or(|b| candidate.total_cost < b.total_cost)
            {
                best = Some(candidate);
            }
        }
        best
    }

    fn invalidate_touching(&self, endpoints: &[&str]) -> usize {
        let stale: Vec<Arc<PathKey>> = self
            .cache
            .iter()
            .filter(|(key, path)| {
                endpoints
                    .iter()
                    .any(|e| key.0 == *e || key.1 == *e || path.touches(e))
            })
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.cache.invalidate(key.as_ref());
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryTypeRegistry, TypeDefinition};
    use std::sync::{Mutex, OnceLock, Weak};

    fn resolver() -> ConversionPathResolver {
        let registry = InMemoryTypeRegistry::from_definitions([
            TypeDefinition::new("block"),
            TypeDefinition::new("text").with_parent("block"),
            TypeDefinition::new("title").with_parent("text"),
            TypeDefinition::new("quote"),
            TypeDefinition::new("code"),
            TypeDefinition::new("image"),
            TypeDefinition::new("video"),
        ])
        .unwrap();
        ConversionPathResolver::new(Arc::new(registry))
    }

    #[test]
    fn test_same_type_is_identity() {
        let resolver = resolver();
        let path = resolver.resolve("quote", "quote").unwrap();
        assert!(path.steps.is_empty());
        assert_eq!(path.total_cost, 0.0);
        assert!(path.is_safe);
    }

    #[test]
    fn test_direct_rule() {
        let resolver = resolver();
        resolver
            .register_rule(ConversionRule::direct("text", "title", 0.5))
            .unwrap();

        let path = resolver.resolve("text", "title").unwrap();
        assert_eq!(path.steps.len(), 1);
        assert_eq!(path.total_cost, 0.5);
        assert_eq!(path.steps[0].strategy, ConversionStrategy::Direct);
    }

    #[test]
    fn test_generalization_to_ancestor() {
        let resolver = resolver();
        let path = resolver.resolve("title", "block").unwrap();
        assert_eq!(path.steps.len(), 1);
        assert_eq!(path.total_cost, GENERALIZATION_COST);
        assert_eq!(path.steps[0].strategy, ConversionStrategy::Hierarchical);
        assert!(path.estimated_data_loss > 0.0);
        assert!(path.is_safe);
    }

    #[test]
    fn test_specialization_warns() {
        let resolver = resolver();
        let path = resolver.resolve("block", "title").unwrap();
        assert_eq!(path.total_cost, SPECIALIZATION_COST);
        assert_eq!(path.total_warnings, vec![SPECIALIZATION_WARNING.to_string()]);
    }

    #[test]
    fn test_two_hop_sums_costs_and_warnings() {
        let resolver = resolver();
        resolver
            .register_rule(ConversionRule::direct("quote", "text", 1.0).with_warning("drops author"))
            .unwrap();
        resolver
            .register_rule(ConversionRule::direct("text", "code", 1.5).with_warning("monospace"))
            .unwrap();

        let path = resolver.resolve("quote", "code").unwrap();
        assert_eq!(path.steps.len(), 2);
        assert_eq!(path.total_cost, 2.5);
        assert_eq!(path.total_warnings, vec!["drops author", "monospace"]);
    }

    #[test]
    fn test_two_hop_through_descendant() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("text", "code", 1.0)).unwrap();
        assert!(resolver.resolve("block", "text").is_some());

        let path = resolver.resolve("block", "code").unwrap();
        assert_eq!(path.steps.len(), 2);
        assert_eq!(path.steps[0].to_type, "text");
        assert_eq!(path.steps[0].strategy, ConversionStrategy::Hierarchical);
        assert_eq!(path.total_cost, SPECIALIZATION_COST + 1.0);
    }

    #[test]
    fn test_two_hop_picks_cheapest_intermediate() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("quote", "code", 9.0)).unwrap();
        resolver.register_rule(ConversionRule::direct("image", "quote", 2.0)).unwrap();
        resolver.register_rule(ConversionRule::direct("image", "text", 1.0)).unwrap();
        resolver.register_rule(ConversionRule::direct("text", "code", 1.0)).unwrap();

        let path = resolver.resolve("image", "code").unwrap();
        assert_eq!(path.total_cost, 2.0);
        assert_eq!(path.steps[0].to_type, "text");
    }

    #[test]
    fn test_two_hop_rejects_expensive_paths() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("quote", "image", 3.0)).unwrap();
        resolver.register_rule(ConversionRule::direct("image", "code", 2.5)).unwrap();

        assert!(resolver.resolve("quote", "code").is_none());
    }

    #[test]
    fn test_three_hops_are_not_searched() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("quote", "image", 0.1)).unwrap();
        resolver.register_rule(ConversionRule::direct("image", "code", 0.1)).unwrap();
        resolver.register_rule(ConversionRule::direct("code", "video", 0.1)).unwrap();

        assert!(resolver.resolve("quote", "code").is_some());
        assert!(resolver.resolve("image", "video").is_some());
        assert!(resolver.resolve("quote", "video").is_none());
    }

    #[test]
    fn test_unconnected_types_have_no_path() {
        let resolver = resolver();
        assert!(resolver.resolve("image", "code").is_none());
    }

    #[test]
    fn test_registering_rule_invalidates_cached_path() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("quote", "text", 1.0)).unwrap();
        resolver.register_rule(ConversionRule::direct("text", "code", 1.0)).unwrap();

        let cached = resolver.resolve("quote", "code").unwrap();
        assert_eq!(cached.steps.len(), 2);
        assert_eq!(resolver.cached_paths(), 1);

        resolver.register_rule(ConversionRule::direct("quote", "code", 0.75)).unwrap();

        let fresh = resolver.resolve("quote", "code").unwrap();
        assert_eq!(fresh.steps.len(), 1);
        assert_eq!(fresh.total_cost, 0.75);
    }

    #[test]
    fn test_replacing_rule_invalidates_cached_path() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("text", "title", 0.5)).unwrap();
        assert_eq!(resolver.resolve("text", "title").unwrap().total_cost, 0.5);

        resolver.register_rule(ConversionRule::direct("text", "title", 0.25)).unwrap();
        assert_eq!(resolver.resolve("text", "title").unwrap().total_cost, 0.25);
    }

    /// Registers one rule on the resolver the first time a type is looked up
    struct RegisteringRegistry {
        inner: InMemoryTypeRegistry,
        resolver: OnceLock<Weak<ConversionPathResolver>>,
        pending: Mutex<Option<ConversionRule>>,
    }

    impl TypeRegistry for RegisteringRegistry {
        fn type_exists(&self, id: &str) -> bool {
            self.inner.type_exists(id)
        }

        fn get_type(&self, id: &str) -> Option<TypeDefinition> {
            let pending = self.pending.lock().unwrap().take();
            if let Some(rule) = pending
                && let Some(resolver) = self.resolver.get().and_then(Weak::upgrade)
            {
                resolver.register_rule(rule).unwrap();
            }
            self.inner.get_type(id)
        }

        fn list_types(&self) -> Vec<TypeDefinition> {
            self.inner.list_types()
        }
    }

    #[test]
    fn test_rule_registered_mid_search_is_not_cached_stale() {
        let registry = Arc::new(RegisteringRegistry {
            inner: InMemoryTypeRegistry::from_definitions([
                TypeDefinition::new("quote"),
                TypeDefinition::new("text"),
                TypeDefinition::new("code"),
            ])
            .unwrap(),
            resolver: OnceLock::new(),
            pending: Mutex::new(None),
        });
        let resolver = Arc::new(ConversionPathResolver::new(registry.clone()));
        registry.resolver.set(Arc::downgrade(&resolver)).unwrap();
        resolver.register_rule(ConversionRule::direct("quote", "text", 1.0)).unwrap();
        resolver.register_rule(ConversionRule::direct("text", "code", 1.0)).unwrap();

        *registry.pending.lock().unwrap() = Some(ConversionRule::direct("quote", "code", 0.5));
        let raced = resolver.resolve("quote", "code").unwrap();
        assert_eq!(raced.steps.len(), 2);
        assert_eq!(resolver.cached_paths(), 0);

        let fresh = resolver.resolve("quote", "code").unwrap();
        assert_eq!(fresh.total_cost, 0.5);
        assert_eq!(resolver.cached_paths(), 1);
    }

    #[test]
    fn test_unrelated_rule_keeps_cache() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("text", "title", 0.5)).unwrap();
        resolver.resolve("text", "title").unwrap();

        resolver.register_rule(ConversionRule::direct("image", "code", 1.0)).unwrap();
        assert_eq!(resolver.cached_paths(), 1);
    }

    #[test]
    fn test_invalid_cost_rejected() {
        let resolver = resolver();
        let err = resolver
            .register_rule(ConversionRule::direct("text", "title", -1.0))
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidCost { .. }));
        assert!(resolver
            .register_rule(ConversionRule::direct("text", "title", f64::NAN))
            .is_err());
        assert!(resolver.rules().is_empty());
    }

    #[test]
    fn test_clear_cache() {
        let resolver = resolver();
        resolver.register_rule(ConversionRule::direct("text", "title", 0.5)).unwrap();
        resolver.resolve("text", "title").unwrap();
        resolver.clear_cache();
        assert_eq!(resolver.cached_paths(), 0);
    }
}
