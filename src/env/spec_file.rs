//! On-disk environment descriptions used by the CLI.
//!
//! ```toml
//! id = "3f9a2c1"
//! variant = "dev"
//!
//! [runtime]
//! linux = ">=3.10,<3.12"
//! windows = "==3.11"
//!
//! [[release]]
//! name = "requests"
//! version = "2.31.0"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::{DEFAULT_VARIANT, EnvironmentSpec};
use crate::core::release::Release;
use crate::core::version::{ConstraintSet, Version};
use crate::error::{Error, Result};
use crate::provider::{ReleaseProvider, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RootEntry {
    pub name: String,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecFile {
    pub id: String,
    #[serde(default = "default_variant")]
    pub variant: String,
    #[serde(default)]
    pub runtime: BTreeMap<String, ConstraintSet>,
    #[serde(rename = "release", default)]
    pub releases: Vec<RootEntry>,
}

fn default_variant() -> String {
    DEFAULT_VARIANT.to_string()
}

impl SpecFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&content).map_err(|e| match e {
            Error::Config(message) => Error::Config(format!("{}: {message}", path.display())),
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let spec: SpecFile = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if spec.id.trim().is_empty() {
            return Err(Error::Config("environment id must not be empty".into()));
        }
        if spec.id.contains(['/', '\\']) || spec.variant.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "environment id and variant must not contain path separators: {}-{}",
                spec.id, spec.variant
            )));
        }
        Ok(spec)
    }

    /// Spec whose roots carry only name and version; enough for lifecycle
    /// checks that do not resolve anything.
    pub fn offline(&self) -> EnvironmentSpec {
        EnvironmentSpec {
            id: self.id.clone(),
            variant: self.variant.clone(),
            runtime: self.runtime.clone(),
            releases: self
                .releases
                .iter()
                .map(|root| Release::new(root.name.clone(), root.version.clone()))
                .collect(),
        }
    }

    /// Fetch every root release from `provider`.
    pub fn fetch(&self, provider: &dyn ReleaseProvider, retry: &RetryPolicy) -> Result<EnvironmentSpec> {
        let releases = self
            .releases
            .iter()
            .map(|root| {
                retry
                    .run("fetching release", || provider.get_release(&root.name, &root.version))
                    .map_err(|source| Error::ReleaseProvider {
                        step: "fetching root release",
                        package: root.name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<Release>>>()?;

        Ok(EnvironmentSpec {
            id: self.id.clone(),
            variant: self.variant.clone(),
            runtime: self.runtime.clone(),
            releases,
        })
    }
}
