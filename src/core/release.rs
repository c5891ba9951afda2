//! Published releases as handed over by a release provider.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::artifact::{Artifact, CompatibilityProfile, ReleaseFile, select_best_artifact};
use super::version::{Requirement, Version, normalize_name};
use crate::error::{Error, Result};

/// One published version of a package. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub files: Vec<ReleaseFile>,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    /// Source repository locator (e.g. `git+https://...`) installable without a built artifact.
    #[serde(default)]
    pub source: Option<String>,
}

impl Release {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            files: Vec::new(),
            requires: Vec::new(),
            source: None,
        }
    }

    pub fn with_file(mut self, file: ReleaseFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    pub fn with_source(mut self, locator: impl Into<String>) -> Self {
        self.source = Some(locator.into());
        self
    }

    /// Normalized package name.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Stable identifier: `name==version`.
    pub fn id(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }

    /// Built artifacts whose filenames parse; malformed ones are skipped with a warning.
    pub fn artifacts(&self) -> Vec<Artifact> {
        Artifact::parse_all(&self.files)
    }

    /// Locator of the best artifact for `profile`, or the source locator when
    /// the release has no built artifacts at all.
    pub fn installable_locator(&self, profile: &CompatibilityProfile) -> Result<String> {
        let artifacts = self.artifacts();
        if artifacts.is_empty() {
            return self.source.clone().ok_or_else(|| Error::NoCompatibleArtifact {
                release: self.to_string(),
                candidates: self.files.iter().map(|f| f.filename.clone()).collect(),
            });
        }
        select_best_artifact(&artifacts, profile)
            .map(|artifact| artifact.locator.clone())
            .map_err(|e| match e {
                Error::NoCompatibleArtifact { candidates, .. } => Error::NoCompatibleArtifact {
                    release: self.to_string(),
                    candidates,
                },
                other => other,
            })
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}
