//! Collaborator interfaces: where releases come from and how runtimes are built.
//!
//! The resolver and lifecycle manager only decide; fetching release metadata
//! and driving the host toolchain is delegated to these traits.

pub mod command;
pub mod events;
pub mod index;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::core::release::Release;
use crate::core::version::{ConstraintSet, Version};
use crate::error::{ProviderError, ProvisionError};

pub use command::CommandProvisioner;
pub use events::{EventSink, NullSink, TracingSink};
pub use index::IndexProvider;

/// Supplies release metadata. Implementations must be safe to call from
/// several resolver threads at once.
pub trait ReleaseProvider: Send + Sync {
    /// Every published version of `package`.
    fn list_versions(&self, package: &str) -> Result<Vec<Version>, ProviderError>;

    /// Full metadata for one release.
    fn get_release(&self, package: &str, version: &Version) -> Result<Release, ProviderError>;
}

/// Thin wrapper over the host's runtime and package toolchain.
pub trait RuntimeProvisioner: Send + Sync {
    /// Create a runtime under `root` whose version satisfies `constraint`;
    /// returns the runtime executable.
    fn create_runtime(&self, root: &Path, constraint: &ConstraintSet) -> Result<PathBuf, ProvisionError>;

    fn delete_runtime(&self, root: &Path) -> Result<(), ProvisionError>;

    fn install_artifacts(&self, runtime: &Path, locators: &[String], no_cache: bool) -> Result<(), ProvisionError>;

    fn uninstall_packages(&self, runtime: &Path, names: &[String]) -> Result<(), ProvisionError>;

    fn runtime_version(&self, runtime: &Path) -> Result<Version, ProvisionError>;
}

/// Bounded retry for idempotent reads. Only transient errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op`, sleeping `backoff * 2^n` between transient failures.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T, ProviderError>) -> Result<T, ProviderError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff.saturating_mul(1 << (attempt - 1).min(16));
                    debug!(what, attempt, ?delay, error = %e, "retrying");
                    if delay > Duration::ZERO {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
