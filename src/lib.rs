//! Package requirement resolution and isolated environment management.
//!
//! A caller describes an environment as a set of root [`Release`]s plus a
//! runtime version requirement per host OS. [`EnvironmentManager::install`]
//! then:
//!
//! 1. expands the roots into a closure with [`ClosureBuilder`], merging every
//!    declared requirement per package through the [`ConstraintAlgebra`];
//! 2. picks one installable artifact per release against the host's
//!    [`CompatibilityProfile`];
//! 3. creates (or reuses) a runtime through a [`RuntimeProvisioner`] and
//!    installs the artifacts into it;
//! 4. records the result in `env.toml`, the only marker of an installed
//!    environment.
//!
//! Release metadata comes from a [`ReleaseProvider`]; [`IndexProvider`] speaks
//! a PyPI-style JSON index and [`CommandProvisioner`] drives `venv` and `pip`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use levitate_env::{
//!     CancelToken, ClosureBuilder, CommandProvisioner, CompatibilityProfile, EnvironmentManager,
//!     EnvironmentSpec, IndexProvider, InstallOptions, Release, Version,
//! };
//!
//! # fn main() -> levitate_env::Result<()> {
//! let index = Arc::new(IndexProvider::new("https://pypi.org/pypi", std::time::Duration::from_secs(30)));
//! let spec = EnvironmentSpec::new("3f9a2c1", vec![Release::new("requests", Version::new(2, 31, 0))])
//!     .with_runtime("linux", ">=3.10,<3.12".parse()?);
//!
//! let manager = EnvironmentManager::new(
//!     "/tmp/envs/3f9a2c1-default",
//!     ClosureBuilder::new(index),
//!     Arc::new(CommandProvisioner::new(vec!["python3".into()])),
//!     CompatibilityProfile::for_host(&Version::new(3, 11, 0)),
//! );
//! manager.install(&spec, InstallOptions::default(), &CancelToken::new())?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod core;
pub mod env;
pub mod error;
pub mod hooks;
pub mod output;
pub mod provider;

pub use cancel::CancelToken;
pub use config::Settings;
pub use crate::core::artifact::{Artifact, CompatTag, CompatibilityProfile, ReleaseFile, select_best_artifact};
pub use crate::core::constraint::{ConstraintAlgebra, ProbeRange};
pub use crate::core::release::Release;
pub use crate::core::resolve::{ClosureBuilder, VersionCache};
pub use crate::core::version::{ConstraintClause, ConstraintSet, Operator, Requirement, Version};
pub use env::{EnvState, EnvironmentManager, EnvironmentSpec, InstallOptions};
pub use error::{Error, Result};
pub use hooks::HookTable;
pub use provider::{
    CommandProvisioner, EventSink, IndexProvider, NullSink, ReleaseProvider, RetryPolicy, RuntimeProvisioner,
    TracingSink,
};
