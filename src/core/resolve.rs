//! Dependency closure: root releases plus one resolved release per dependency.
//!
//! Only the requirements declared by the roots are walked. Dependencies of
//! dependencies are not followed; release authors are expected to publish a
//! flat requirement list.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::constraint::ConstraintAlgebra;
use super::release::Release;
use super::version::{ConstraintSet, Version, normalize_name};
use crate::error::{Error, ProviderError, Result};
use crate::provider::{ReleaseProvider, RetryPolicy};

/// Memoized `list_versions` results with an explicit time-to-live.
///
/// A zero TTL disables caching entirely.
#[derive(Debug)]
pub struct VersionCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Vec<Version>)>>,
}

impl VersionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached versions for `package`; expired entries are evicted.
    pub fn get(&self, package: &str) -> Option<Vec<Version>> {
        if self.ttl.is_zero() {
            return None;
        }
        let key = normalize_name(package);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some((stored, versions)) if stored.elapsed() < self.ttl => Some(versions.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, package: &str, versions: Vec<Version>) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .lock()
            .insert(normalize_name(package), (Instant::now(), versions));
    }

    pub fn invalidate(&self, package: &str) {
        self.entries.lock().remove(&normalize_name(package));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for VersionCache {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Merged constraint for one dependency, keyed by normalized name.
#[derive(Debug, Clone)]
struct Wanted {
    name: String,
    constraint: ConstraintSet,
}

/// Expands root releases into the full set of releases to install.
pub struct ClosureBuilder {
    provider: Arc<dyn ReleaseProvider>,
    algebra: ConstraintAlgebra,
    cache: Arc<VersionCache>,
    retry: RetryPolicy,
    parallelism: usize,
}

impl ClosureBuilder {
    pub fn new(provider: Arc<dyn ReleaseProvider>) -> Self {
        Self {
            provider,
            algebra: ConstraintAlgebra::default(),
            cache: Arc::new(VersionCache::disabled()),
            retry: RetryPolicy::default(),
            parallelism: 1,
        }
    }

    #[must_use]
    pub fn with_algebra(mut self, algebra: ConstraintAlgebra) -> Self {
        self.algebra = algebra;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<VersionCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum number of concurrent provider round-trips.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn algebra(&self) -> &ConstraintAlgebra {
        &self.algebra
    }

    /// Roots followed by their resolved dependencies in name order.
    ///
    /// Fails on duplicate root names, on the first package whose merged
    /// constraints conflict, and on the first (by name) dependency that
    /// cannot be resolved or fetched.
    pub fn resolve(&self, roots: &[Release]) -> Result<Vec<Release>> {
        let mut root_keys = HashSet::with_capacity(roots.len());
        for root in roots {
            if !root_keys.insert(root.key()) {
                return Err(Error::DuplicateRootPackage(root.name.clone()));
            }
        }

        let wanted = self.merge_requirements(roots)?;

        let mut pending = Vec::new();
        for (key, want) in wanted {
            match roots.iter().find(|r| r.key() == key) {
                Some(root) if !want.constraint.matches(&root.version) => {
                    warn!(
                        package = %want.name,
                        constraint = %want.constraint,
                        root = %root.version,
                        "root release does not satisfy a sibling's requirement"
                    );
                }
                Some(_) => {}
                None => pending.push((key, want)),
            }
        }

        debug!(roots = roots.len(), dependencies = pending.len(), "resolving dependencies");
        let fetched = self.fetch_all(&pending);

        let mut closure = roots.to_vec();
        for ((key, _), result) in pending.iter().zip(fetched) {
            let release = result?;
            debug!(package = %key, version = %release.version, "resolved");
            closure.push(release);
        }
        Ok(closure)
    }

    fn merge_requirements(&self, roots: &[Release]) -> Result<BTreeMap<String, Wanted>> {
        let mut wanted: BTreeMap<String, Wanted> = BTreeMap::new();
        for requirement in roots.iter().flat_map(|r| &r.requires) {
            let key = requirement.key();
            let previous = wanted
                .get(&key)
                .map(|w| w.constraint.clone())
                .unwrap_or_default();
            let constraint = self
                .algebra
                .merge(&requirement.name, &previous, &requirement.constraint)?;
            wanted
                .entry(key)
                .and_modify(|w| w.constraint = constraint.clone())
                .or_insert_with(|| Wanted {
                    name: requirement.name.clone(),
                    constraint,
                });
        }
        Ok(wanted)
    }

    /// Results in the same order as `pending`.
    fn fetch_all(&self, pending: &[(String, Wanted)]) -> Vec<Result<Release>> {
        if self.parallelism <= 1 || pending.len() <= 1 {
            return pending.iter().map(|(_, want)| self.fetch_one(want)).collect();
        }

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism.min(pending.len()))
            .build()
        {
            Ok(pool) => pool.install(|| pending.par_iter().map(|(_, want)| self.fetch_one(want)).collect()),
            Err(e) => {
                warn!(error = %e, "could not start resolver pool, fetching sequentially");
                pending.iter().map(|(_, want)| self.fetch_one(want)).collect()
            }
        }
    }

    fn fetch_one(&self, want: &Wanted) -> Result<Release> {
        let versions = self.available_versions(&want.name)?;
        let version = self
            .algebra
            .select_best(&want.constraint, &versions)
            .ok_or_else(|| Error::UnresolvableDependency {
                package: want.name.clone(),
                constraint: want.constraint.clone(),
            })?;

        self.retry
            .run("fetching release", || self.provider.get_release(&want.name, version))
            .map_err(|source| provider_error("fetching release", &want.name, source))
    }

    fn available_versions(&self, package: &str) -> Result<Vec<Version>> {
        if let Some(versions) = self.cache.get(package) {
            return Ok(versions);
        }
        let versions = self
            .retry
            .run("listing versions", || self.provider.list_versions(package))
            .map_err(|source| provider_error("listing versions", package, source))?;
        self.cache.insert(package, versions.clone());
        Ok(versions)
    }
}

fn provider_error(step: &'static str, package: &str, source: ProviderError) -> Error {
    Error::ReleaseProvider {
        step,
        package: package.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::version::Requirement;

    struct Static(Vec<Release>);

    impl ReleaseProvider for Static {
        fn list_versions(&self, package: &str) -> std::result::Result<Vec<Version>, ProviderError> {
            let key = normalize_name(package);
            let versions: Vec<Version> = self
                .0
                .iter()
                .filter(|r| r.key() == key)
                .map(|r| r.version.clone())
                .collect();
            if versions.is_empty() {
                Err(ProviderError::NotFound(package.to_string()))
            } else {
                Ok(versions)
            }
        }

        fn get_release(&self, package: &str, version: &Version) -> std::result::Result<Release, ProviderError> {
            let key = normalize_name(package);
            self.0
                .iter()
                .find(|r| r.key() == key && &r.version == version)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(format!("{package} {version}")))
        }
    }

    fn req(s: &str) -> Requirement {
        Requirement::parse(s).unwrap()
    }

    fn release(name: &str, version: &str) -> Release {
        Release::new(name, version.parse().unwrap())
    }

    fn builder() -> ClosureBuilder {
        ClosureBuilder::new(Arc::new(Static(vec![
            release("idna", "3.4"),
            release("idna", "3.6"),
            release("urllib3", "1.26.18"),
            release("urllib3", "2.1.0"),
        ])))
        .with_retry(RetryPolicy::none())
    }

    #[test]
    fn test_constraints_from_all_roots_are_merged() {
        let roots = vec![
            release("app", "1.0").with_requirement(req("urllib3>=1.21")),
            release("lib", "2.0").with_requirement(req("urllib3<2")),
        ];
        let closure = builder().resolve(&roots).unwrap();
        let ids: Vec<String> = closure.iter().map(Release::id).collect();
        assert_eq!(ids, vec!["app==1.0.0", "lib==2.0.0", "urllib3==1.26.18"]);
    }

    #[test]
    fn test_conflict_names_the_package() {
        let roots = vec![
            release("app", "1.0").with_requirement(req("idna==3.4")),
            release("lib", "2.0").with_requirement(req("idna==3.6")),
        ];
        match builder().resolve(&roots) {
            Err(Error::Conflict { package, .. }) => assert_eq!(package, "idna"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_roots_are_not_fetched_again() {
        let roots = vec![
            release("app", "1.0").with_requirement(req("Lib_Core>=1")),
            release("lib-core", "1.5"),
        ];
        let closure = builder().resolve(&roots).unwrap();
        assert_eq!(closure.len(), 2);
    }

    #[test]
    fn test_dependencies_of_dependencies_are_not_walked() {
        let provider = Static(vec![release("mid", "1.0").with_requirement(req("leaf>=1"))]);
        let roots = vec![release("app", "1.0").with_requirement(req("mid"))];
        let closure = ClosureBuilder::new(Arc::new(provider)).resolve(&roots).unwrap();
        let ids: Vec<String> = closure.iter().map(Release::id).collect();
        assert_eq!(ids, vec!["app==1.0.0", "mid==1.0.0"]);
    }

    #[test]
    fn test_missing_package_is_provider_error() {
        let roots = vec![release("app", "1.0").with_requirement(req("ghost"))];
        let err = builder().resolve(&roots).unwrap_err();
        assert!(matches!(
            err,
            Error::ReleaseProvider { step: "listing versions", ref package, source: ProviderError::NotFound(_) }
                if package == "ghost"
        ));
    }

    #[test]
    fn test_version_cache_ttl_and_invalidation() {
        let cache = VersionCache::new(Duration::from_secs(60));
        cache.insert("Zope.Interface", vec![Version::new(6, 0, 0)]);
        assert_eq!(cache.get("zope-interface"), Some(vec![Version::new(6, 0, 0)]));

        cache.invalidate("zope_interface");
        assert!(cache.get("zope-interface").is_none());

        cache.insert("a", vec![]);
        cache.insert("b", vec![]);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = VersionCache::disabled();
        cache.insert("idna", vec![Version::new(3, 6, 0)]);
        assert!(cache.get("idna").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries_are_evicted() {
        let cache = VersionCache::new(Duration::from_millis(1));
        cache.insert("idna", vec![Version::new(3, 6, 0)]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("idna").is_none());
        assert!(cache.is_empty());
    }
}
