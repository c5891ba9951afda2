//! Release metadata from a JSON package index.
//!
//! Speaks the PyPI-style JSON API:
//! - `GET {base}/{name}/json` lists releases (`{"releases": {"1.0.0": [...]}}`)
//! - `GET {base}/{name}/{version}/json` describes one release
//!   (`{"info": {"requires_dist": [...]}, "urls": [...]}`)

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::ReleaseProvider;
use crate::core::artifact::ReleaseFile;
use crate::core::release::Release;
use crate::core::version::{Requirement, Version};
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct ProjectDoc {
    #[serde(default)]
    releases: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDoc {
    info: InfoDoc,
    #[serde(default)]
    urls: Vec<FileDoc>,
}

#[derive(Debug, Deserialize)]
struct InfoDoc {
    name: String,
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
    #[serde(default)]
    project_urls: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct FileDoc {
    filename: String,
    #[serde(default)]
    size: u64,
    url: String,
    #[serde(default)]
    yanked: bool,
}

/// [`ReleaseProvider`] backed by an HTTP JSON index.
pub struct IndexProvider {
    agent: ureq::Agent,
    base_url: String,
}

impl IndexProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("levitate-env/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, ProviderError> {
        debug!(url, "GET");
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(404, _) => ProviderError::NotFound(what.to_string()),
            ureq::Error::Status(code, _) if code >= 500 || code == 429 => {
                ProviderError::Connection(format!("{} returned HTTP {}", url, code))
            }
            ureq::Error::Status(code, _) => {
                ProviderError::Invalid(format!("{} returned HTTP {}", url, code))
            }
            ureq::Error::Transport(t) => ProviderError::Connection(t.to_string()),
        })?;
        response
            .into_json()
            .map_err(|e| ProviderError::Invalid(format!("failed to parse {}: {}", url, e)))
    }
}

impl ReleaseProvider for IndexProvider {
    fn list_versions(&self, package: &str) -> Result<Vec<Version>, ProviderError> {
        let url = format!("{}/{}/json", self.base_url, package);
        let doc: ProjectDoc = self.get_json(&url, package)?;
        let mut versions: Vec<Version> = doc
            .releases
            .keys()
            .filter_map(|raw| match raw.parse::<Version>() {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!(package, version = %raw, error = %e, "ignoring unparseable version");
                    None
                }
            })
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn get_release(&self, package: &str, version: &Version) -> Result<Release, ProviderError> {
        let url = format!("{}/{}/{}/json", self.base_url, package, version);
        let doc: ReleaseDoc = self.get_json(&url, &format!("{} {}", package, version))?;

        let requires = doc
            .info
            .requires_dist
            .unwrap_or_default()
            .iter()
            .filter_map(|raw| strip_markers(raw))
            .map(|req| {
                Requirement::parse(&req)
                    .map_err(|e| ProviderError::Invalid(format!("{} {}: {}", package, version, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let source = doc.info.project_urls.and_then(|urls| {
            urls.iter()
                .find(|(label, _)| matches!(label.to_ascii_lowercase().as_str(), "source" | "repository"))
                .map(|(_, url)| format!("git+{}", url))
        });

        let files = doc
            .urls
            .into_iter()
            .filter(|f| !f.yanked)
            .map(|f| ReleaseFile::new(f.filename, f.size, f.url))
            .collect();

        Ok(Release {
            name: doc.info.name,
            version: version.clone(),
            files,
            requires,
            source,
        })
    }
}

/// Reduce a `requires_dist` entry to a plain requirement string.
///
/// Entries gated on an extra are dropped; other environment markers are
/// discarded. Extras brackets and parenthesised constraints are flattened:
/// `requests[socks] (>=2.0) ; python_version >= "3.8"` becomes `requests>=2.0`.
fn strip_markers(raw: &str) -> Option<String> {
    let (spec, marker) = match raw.split_once(';') {
        Some((spec, marker)) => (spec, Some(marker)),
        None => (raw, None),
    };
    if marker.is_some_and(|m| m.contains("extra")) {
        return None;
    }

    let mut out = String::with_capacity(spec.len());
    let mut in_extras = false;
    for c in spec.chars() {
        match c {
            '[' => in_extras = true,
            ']' => in_extras = false,
            '(' | ')' | ' ' | '\t' => {}
            _ if in_extras => {}
            _ => out.push(c),
        }
    }
    Some(out)
}
