//! Resolution behaviour across the constraint algebra, artifact selection
//! and the closure builder.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeIndex, constraint, release, version};
use levitate_env::core::artifact::{Artifact, ReleaseFile};
use levitate_env::{
    ClosureBuilder, CompatibilityProfile, ConstraintAlgebra, Error, ProbeRange, Release, RetryPolicy,
    VersionCache, select_best_artifact,
};
use pretty_assertions::assert_eq;

fn ids(releases: &[Release]) -> Vec<String> {
    releases.iter().map(Release::id).collect()
}

fn index() -> FakeIndex {
    FakeIndex::new([
        release("urllib3", "1.26.18", &[]),
        release("urllib3", "2.1.0", &[]),
        release("idna", "3.4", &[]),
        release("idna", "3.6", &[]),
        release("certifi", "2023.11.17", &[]),
        release("charset-normalizer", "3.3.2", &[]),
    ])
}

fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        backoff: Duration::ZERO,
    }
}

#[test]
fn test_merge_tightens_bounds() {
    let algebra = ConstraintAlgebra::default();
    let merged = algebra
        .merge("pkg", &constraint(">=1.0,<2.0"), &constraint(">=1.5"))
        .unwrap();
    assert_eq!(merged, constraint(">=1.5,<2.0"));
}

#[test]
fn test_merge_of_distinct_pins_conflicts() {
    let algebra = ConstraintAlgebra::default();
    match algebra.merge("pkg", &constraint("==1.0"), &constraint("==2.0")) {
        Err(Error::Conflict { package, clauses }) => {
            assert_eq!(package, "pkg");
            assert_eq!(clauses.clauses().len(), 2);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn test_select_best_prefix_pin_prefers_highest_release() {
    let algebra = ConstraintAlgebra::new(ProbeRange::default());
    let available = [version("1.2.0rc1"), version("1.2.3"), version("2.0.0")];
    assert_eq!(algebra.select_best(&constraint("==1.2"), &available), Some(&version("1.2.3")));
    assert_eq!(algebra.select_best(&constraint(">=3"), &available), None);
}

#[test]
fn test_most_specific_artifact_wins() {
    let files = [
        ReleaseFile::new("numpy-1.26.4-cp311-cp311-manylinux_2_17_x86_64.whl", 1, "native"),
        ReleaseFile::new("numpy-1.26.4-py3-none-any.whl", 1, "pure"),
    ];
    let artifacts: Vec<Artifact> = Artifact::parse_all(&files);
    let profile =
        CompatibilityProfile::from_strs(["cp311-cp311-manylinux_2_17_x86_64", "py3-none-any"]).unwrap();

    assert_eq!(select_best_artifact(&artifacts, &profile).unwrap().locator, "native");
}

#[test]
fn test_duplicate_roots_rejected() {
    let builder = ClosureBuilder::new(Arc::new(index()));
    let roots = vec![release("requests", "2.31.0", &[]), release("Requests", "2.30.0", &[])];
    assert!(matches!(builder.resolve(&roots), Err(Error::DuplicateRootPackage(name)) if name == "Requests"));
}

#[test]
fn test_resolve_is_idempotent() {
    let builder = ClosureBuilder::new(Arc::new(index())).with_retry(no_retry());
    let roots = vec![release(
        "requests",
        "2.31.0",
        &["urllib3>=1.21.1,<3", "idna>=2.5,<4", "certifi>=2017.4.17", "charset-normalizer<4,>=2"],
    )];

    let first = builder.resolve(&roots).unwrap();
    let second = builder.resolve(&roots).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        ids(&first),
        vec![
            "requests==2.31.0",
            "certifi==2023.11.17",
            "charset-normalizer==3.3.2",
            "idna==3.6.0",
            "urllib3==2.1.0",
        ]
    );
}

#[test]
fn test_parallel_and_sequential_agree() {
    let roots = vec![
        release("app", "1.0", &["urllib3<2", "idna", "certifi"]),
        release("tool", "0.3", &["idna<3.5", "charset-normalizer"]),
    ];
    let sequential = ClosureBuilder::new(Arc::new(index())).resolve(&roots).unwrap();
    let parallel = ClosureBuilder::new(Arc::new(index()))
        .with_parallelism(4)
        .resolve(&roots)
        .unwrap();

    assert_eq!(ids(&sequential), ids(&parallel));
    assert!(ids(&parallel).contains(&"idna==3.4.0".to_string()));
    assert!(ids(&parallel).contains(&"urllib3==1.26.18".to_string()));
}

#[test]
fn test_conflict_across_roots_names_package() {
    let builder = ClosureBuilder::new(Arc::new(index()));
    let roots = vec![
        release("app", "1.0", &["urllib3>=2"]),
        release("tool", "0.3", &["urllib3<2"]),
    ];
    match builder.resolve(&roots) {
        Err(Error::Conflict { package, .. }) => assert_eq!(package, "urllib3"),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn test_unresolvable_dependency_reports_constraint() {
    let builder = ClosureBuilder::new(Arc::new(index()));
    let roots = vec![release("app", "1.0", &["idna>=4"])];
    let err = builder.resolve(&roots).unwrap_err();
    assert!(matches!(err, Error::UnresolvableDependency { ref package, .. } if package == "idna"));
    assert!(err.to_string().contains(">=4"));
    assert!(!err.is_transient());
}

#[test]
fn test_transient_listing_failures_are_retried() {
    let provider = Arc::new(index().flaky(2));
    let builder = ClosureBuilder::new(provider.clone()).with_retry(RetryPolicy {
        max_attempts: 3,
        backoff: Duration::ZERO,
    });
    let closure = builder.resolve(&[release("app", "1.0", &["idna"])]).unwrap();
    assert_eq!(ids(&closure), vec!["app==1.0.0", "idna==3.6.0"]);
    assert_eq!(provider.list_calls(), 3);
}

#[test]
fn test_exhausted_retries_surface_provider_error() {
    let provider = Arc::new(index().flaky(5));
    let builder = ClosureBuilder::new(provider).with_retry(RetryPolicy {
        max_attempts: 2,
        backoff: Duration::ZERO,
    });
    let err = builder.resolve(&[release("app", "1.0", &["idna"])]).unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("idna"));
}

#[test]
fn test_version_cache_saves_round_trips_until_invalidated() {
    let provider = Arc::new(index());
    let cache = Arc::new(VersionCache::new(Duration::from_secs(300)));
    let builder = ClosureBuilder::new(provider.clone()).with_cache(cache.clone());
    let roots = vec![release("app", "1.0", &["idna"])];

    builder.resolve(&roots).unwrap();
    builder.resolve(&roots).unwrap();
    assert_eq!(provider.list_calls(), 1);

    cache.invalidate("idna");
    builder.resolve(&roots).unwrap();
    assert_eq!(provider.list_calls(), 2);
}
