//! Persisted environment metadata.
//!
//! `env.toml` is written only after every package installed successfully;
//! its presence is what makes an environment "installed".
//!
//! ```toml
//! # env.toml - written by levitate-env, do not edit manually
//! id = "3f9a2c1"
//! variant = "default"
//! runtime_constraint = ">=3.10,<3.12"
//! runtime_path = "/home/me/.local/share/levitate-env/envs/3f9a2c1-default/runtime/bin/python"
//! spec_digest = "9b7e..."
//! installed_at = 1760745600
//!
//! [[release]]
//! name = "requests"
//! version = "2.31.0"
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::release::Release;
use crate::core::version::{ConstraintSet, Version};
use crate::error::{Error, Result};

pub const METADATA_FILE: &str = "env.toml";
pub const LAST_USED_FILE: &str = ".last-used";

const HEADER: &str = "# env.toml - written by levitate-env, do not edit manually\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRelease {
    pub name: String,
    pub version: Version,
}

impl InstalledRelease {
    pub fn id(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

impl From<&Release> for InstalledRelease {
    fn from(release: &Release) -> Self {
        Self {
            name: release.name.clone(),
            version: release.version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvMetadata {
    pub id: String,
    pub variant: String,
    #[serde(default)]
    pub runtime_constraint: ConstraintSet,
    pub runtime_path: PathBuf,
    pub spec_digest: String,
    #[serde(default)]
    pub installed_at: u64,
    #[serde(rename = "release", default)]
    pub releases: Vec<InstalledRelease>,
}

impl EnvMetadata {
    pub fn path(root: &Path) -> PathBuf {
        root.join(METADATA_FILE)
    }

    pub fn exists(root: &Path) -> bool {
        Self::path(root).is_file()
    }

    pub fn read(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        toml::from_str(&content).map_err(|e| Error::Metadata {
            path,
            message: e.to_string(),
        })
    }

    /// Write via a temp file and rename so readers never see a partial file.
    pub fn write(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        let content = toml::to_string_pretty(self).map_err(|e| Error::Metadata {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let temp_path = root.join(format!(".{}.tmp.{}", METADATA_FILE, std::process::id()));
        let mut temp_file = std::fs::File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
        temp_file
            .write_all(format!("{HEADER}{content}").as_bytes())
            .and_then(|()| temp_file.sync_all())
            .map_err(|e| Error::io(&temp_path, e))?;
        drop(temp_file);

        std::fs::rename(&temp_path, &path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            Error::io(&path, e)
        })
    }

    pub fn release_ids(&self) -> Vec<String> {
        self.releases.iter().map(InstalledRelease::id).collect()
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// SHA-256 over the runtime constraint and the sorted release ids.
pub fn spec_digest<'a>(runtime: &ConstraintSet, release_ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = release_ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = Sha256::new();
    hasher.update(b"runtime=");
    hasher.update(runtime.to_string().as_bytes());
    for id in ids {
        hasher.update(b"\n");
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Bump the last-used marker's mtime, creating it if needed.
pub fn touch_last_used(root: &Path) -> Result<()> {
    let path = root.join(LAST_USED_FILE);
    if !path.exists() {
        std::fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
    }
    filetime::set_file_mtime(&path, FileTime::now()).map_err(|e| Error::io(&path, e))
}

pub fn last_used(root: &Path) -> Option<SystemTime> {
    std::fs::metadata(root.join(LAST_USED_FILE))
        .and_then(|m| m.modified())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample() -> EnvMetadata {
        EnvMetadata {
            id: "3f9a2c1".into(),
            variant: "default".into(),
            runtime_constraint: ConstraintSet::parse(">=3.10,<3.12").unwrap(),
            runtime_path: PathBuf::from("/envs/3f9a2c1-default/runtime/bin/python"),
            spec_digest: "abc".into(),
            installed_at: 1_760_745_600,
            releases: vec![InstalledRelease {
                name: "requests".into(),
                version: Version::new(2, 31, 0),
            }],
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        assert!(!EnvMetadata::exists(dir.path()));

        sample().write(dir.path()).unwrap();
        assert!(EnvMetadata::exists(dir.path()));

        let content = std::fs::read_to_string(EnvMetadata::path(dir.path())).unwrap();
        assert!(content.starts_with("# env.toml"));
        assert!(content.contains("[[release]]"));
        assert!(content.contains("runtime_constraint = \">=3.10,<3.12\""));

        assert_eq!(EnvMetadata::read(dir.path()).unwrap(), sample());
    }

    #[test]
    fn test_corrupt_metadata_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(EnvMetadata::path(dir.path()), "id = [").unwrap();
        let err = EnvMetadata::read(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Metadata { .. }));
    }

    #[test]
    fn test_digest_ignores_release_order() {
        let runtime = ConstraintSet::parse(">=3.10").unwrap();
        let a = spec_digest(&runtime, ["idna==3.6.0", "requests==2.31.0"]);
        let b = spec_digest(&runtime, ["requests==2.31.0", "idna==3.6.0"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_runtime = ConstraintSet::parse(">=3.11").unwrap();
        assert_ne!(a, spec_digest(&other_runtime, ["idna==3.6.0", "requests==2.31.0"]));
        assert_ne!(a, spec_digest(&runtime, ["idna==3.6.0"]));
    }

    #[test]
    fn test_touch_bumps_mtime() {
        let dir = TempDir::new().unwrap();
        assert!(last_used(dir.path()).is_none());

        touch_last_used(dir.path()).unwrap();
        let marker = dir.path().join(LAST_USED_FILE);
        let old = SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_mtime(&marker, FileTime::from_system_time(old)).unwrap();

        touch_last_used(dir.path()).unwrap();
        let bumped = last_used(dir.path()).unwrap();
        assert!(bumped > old + Duration::from_secs(60));
    }
}
