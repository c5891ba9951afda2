//! Built artifacts and host compatibility scoring.
//!
//! Artifact filenames follow the wheel naming grammar:
//!
//! ```text
//! {name}-{version}(-{build})?-{runtime}-{abi}-{platform}.whl
//! ```
//!
//! Each of the three tag fields may hold several `.`-separated values
//! (`py2.py3-none-any`), which expand into one tag triple per combination.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::version::Version;
use crate::error::{Error, Result};

/// One `(runtime, abi, platform)` compatibility tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompatTag {
    pub runtime: String,
    pub abi: String,
    pub platform: String,
}

impl CompatTag {
    pub fn new(runtime: impl Into<String>, abi: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            abi: abi.into(),
            platform: platform.into(),
        }
    }
}

impl FromStr for CompatTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(r), Some(a), Some(p)) if !r.is_empty() && !a.is_empty() && !p.is_empty() => {
                Ok(CompatTag::new(r, a, p))
            }
            _ => Err(format!("expected runtime-abi-platform, got '{}'", s)),
        }
    }
}

impl fmt::Display for CompatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.runtime, self.abi, self.platform)
    }
}

/// A downloadable file as reported by a release provider, before tag parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    /// Where the installer fetches the file from (URL or local path).
    pub locator: String,
}

impl ReleaseFile {
    pub fn new(filename: impl Into<String>, size: u64, locator: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size,
            locator: locator.into(),
        }
    }
}

/// A built artifact with its parsed compatibility tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub name: String,
    pub version: Version,
    pub tags: Vec<CompatTag>,
    pub size: u64,
    pub locator: String,
}

impl Artifact {
    /// Parse a wheel-style filename into an artifact.
    pub fn parse(file: &ReleaseFile) -> Result<Self, String> {
        let stem = file
            .filename
            .strip_suffix(".whl")
            .ok_or_else(|| "not a built artifact (.whl)".to_string())?;

        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() != 5 && parts.len() != 6 {
            return Err(format!("expected 5 or 6 dash-separated fields, found {}", parts.len()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err("empty field".to_string());
        }
        if parts.len() == 6 && !parts[2].starts_with(|c: char| c.is_ascii_digit()) {
            return Err(format!("build tag '{}' must start with a digit", parts[2]));
        }

        let version = parts[1]
            .parse::<Version>()
            .map_err(|e| e.to_string())?;

        let n = parts.len();
        let mut tags = Vec::new();
        for runtime in parts[n - 3].split('.') {
            for abi in parts[n - 2].split('.') {
                for platform in parts[n - 1].split('.') {
                    tags.push(CompatTag::new(runtime, abi, platform));
                }
            }
        }

        Ok(Self {
            filename: file.filename.clone(),
            name: parts[0].to_string(),
            version,
            tags,
            size: file.size,
            locator: file.locator.clone(),
        })
    }

    /// Parse every file, skipping (with a warning) names outside the grammar.
    pub fn parse_all(files: &[ReleaseFile]) -> Vec<Artifact> {
        files
            .iter()
            .filter_map(|file| match Artifact::parse(file) {
                Ok(artifact) => Some(artifact),
                Err(reason) => {
                    warn!(filename = %file.filename, %reason, "skipping artifact with unrecognised name");
                    None
                }
            })
            .collect()
    }
}

/// Tags the host can consume, most specific first.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityProfile {
    tags: Vec<CompatTag>,
    index: HashMap<CompatTag, usize>,
}

impl CompatibilityProfile {
    pub fn new(tags: Vec<CompatTag>) -> Self {
        let mut index = HashMap::with_capacity(tags.len());
        for (i, tag) in tags.iter().enumerate() {
            index.entry(tag.clone()).or_insert(i);
        }
        Self { tags, index }
    }

    /// Build from `runtime-abi-platform` strings.
    pub fn from_strs<'a>(tags: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        tags.into_iter()
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Profile for a CPython-compatible runtime of `version` on the current host.
    pub fn for_host(version: &Version) -> Self {
        let platforms = host_platforms(std::env::consts::OS, std::env::consts::ARCH);
        Self::for_runtime(version, &platforms)
    }

    /// Tag order: exact interpreter ABI, stable ABI, ABI-less, then pure
    /// `py3` tags, each platform-specific before `any`.
    pub fn for_runtime(version: &Version, platforms: &[String]) -> Self {
        let cp = format!("cp{}{}", version.major, version.minor);
        let py_minor = format!("py{}{}", version.major, version.minor);
        let py_major = format!("py{}", version.major);

        let mut tags = Vec::new();
        for abi in [cp.as_str(), "abi3", "none"] {
            for platform in platforms {
                tags.push(CompatTag::new(&cp, abi, platform));
            }
        }
        // Older stable-ABI builds remain loadable on newer interpreters.
        for minor in (2..version.minor).rev() {
            for platform in platforms {
                tags.push(CompatTag::new(format!("cp{}{}", version.major, minor), "abi3", platform));
            }
        }
        for runtime in [&py_minor, &py_major] {
            for platform in platforms {
                tags.push(CompatTag::new(runtime.as_str(), "none", platform));
            }
        }
        tags.push(CompatTag::new(&cp, "none", "any"));
        tags.push(CompatTag::new(&py_minor, "none", "any"));
        tags.push(CompatTag::new(&py_major, "none", "any"));
        Self::new(tags)
    }

    pub fn tags(&self) -> &[CompatTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Sum of `len - index` over the distinct tags shared with the profile.
    pub fn score(&self, artifact: &Artifact) -> usize {
        let mut seen = HashSet::new();
        artifact
            .tags
            .iter()
            .filter(|tag| seen.insert(*tag))
            .filter_map(|tag| self.index.get(tag))
            .map(|&i| self.tags.len() - i)
            .sum()
    }
}

/// Platform tags for an OS/arch pair, most specific first.
pub fn host_platforms(os: &str, arch: &str) -> Vec<String> {
    match os {
        "linux" => vec![
            format!("manylinux_2_28_{arch}"),
            format!("manylinux_2_17_{arch}"),
            format!("manylinux2014_{arch}"),
            format!("manylinux1_{arch}"),
            format!("linux_{arch}"),
        ],
        "macos" => {
            let arch = if arch == "aarch64" { "arm64" } else { arch };
            vec![
                format!("macosx_14_0_{arch}"),
                format!("macosx_11_0_{arch}"),
                format!("macosx_10_9_{arch}"),
                "macosx_10_9_universal2".to_string(),
            ]
        }
        "windows" => vec![match arch {
            "x86_64" => "win_amd64".to_string(),
            "aarch64" => "win_arm64".to_string(),
            _ => "win32".to_string(),
        }],
        other => vec![format!("{other}_{arch}")],
    }
}

/// Pick the highest-scoring artifact; ties go to the earliest candidate.
///
/// Fails with [`Error::NoCompatibleArtifact`] when nothing scores above zero,
/// including when `candidates` is empty.
pub fn select_best_artifact<'a>(
    candidates: &'a [Artifact],
    profile: &CompatibilityProfile,
) -> Result<&'a Artifact> {
    let mut best: Option<(&Artifact, usize)> = None;
    for candidate in candidates {
        let score = profile.score(candidate);
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(artifact, _)| artifact)
        .ok_or_else(|| Error::NoCompatibleArtifact {
            release: candidates
                .first()
                .map(|a| format!("{} {}", a.name, a.version))
                .unwrap_or_else(|| "<no candidates>".to_string()),
            candidates: candidates.iter().map(|a| a.filename.clone()).collect(),
        })
}
