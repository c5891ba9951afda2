//! Error types for resolution and environment lifecycle.
//!
//! Every variant names the package, constraint, artifact or path that caused it.
//! Deterministic failures (conflicts, malformed input, missing versions) are never
//! retried; only [`ProviderError::Connection`] is considered transient.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::version::ConstraintSet;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed requirement '{input}': {reason}")]
    MalformedRequirement { input: String, reason: String },

    #[error("conflicting constraints for '{package}': {clauses}")]
    Conflict {
        package: String,
        clauses: ConstraintSet,
    },

    #[error("no compatible artifact for {release} (candidates: {})", display_candidates(.candidates))]
    NoCompatibleArtifact {
        release: String,
        candidates: Vec<String>,
    },

    #[error("package '{0}' is declared by more than one root release")]
    DuplicateRootPackage(String),

    #[error("no available version of '{package}' satisfies '{constraint}'")]
    UnresolvableDependency {
        package: String,
        constraint: ConstraintSet,
    },

    #[error("dependency resolution produced no packages to install")]
    NoPackagesToInstall,

    #[error("environment at {} is not installed", .path.display())]
    NotInstalled { path: PathBuf },

    #[error("runtime provisioning failed while {step} at {}: {source}", .path.display())]
    RuntimeProvision {
        step: String,
        path: PathBuf,
        #[source]
        source: ProvisionError,
    },

    #[error("release provider failed while {step} for '{package}': {source}")]
    ReleaseProvider {
        step: &'static str,
        package: String,
        #[source]
        source: ProviderError,
    },

    #[error("timed out after {waited:?} waiting for environment lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("operation cancelled before {0}")]
    Cancelled(&'static str),

    #[error("invalid environment metadata at {}: {message}", .path.display())]
    Metadata { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedRequirement {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the failed operation could change the outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ReleaseProvider { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

fn display_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "none".to_string()
    } else {
        candidates.join(", ")
    }
}

/// Failure reported by a [`ReleaseProvider`](crate::provider::ReleaseProvider).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid release metadata: {0}")]
    Invalid(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Connection(_))
    }
}

/// Failure reported by a [`RuntimeProvisioner`](crate::provider::RuntimeProvisioner).
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("command failed: {cmd} (exit code: {code:?})\nstderr: {stderr}")]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("no interpreter satisfies '{0}'")]
    NoInterpreter(ConstraintSet),

    #[error("unrecognised runtime version output: {0}")]
    BadVersion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
